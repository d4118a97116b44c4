//! Configuration layering.
//!
//! Every setting resolves through the same precedence chain: explicit flag,
//! then the optional YAML config file, then the `GW_*` environment, then
//! the built-in default.

use anyhow::{anyhow, bail, Context, Result};
use ipnet::IpNet;
use serde::Deserialize;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use ghostwire_k8s::pattern::DEFAULT_PREVIEW_PATTERN;

pub const DEFAULT_NAT_CHAIN: &str = "CANARY_DNAT";
const DEFAULT_JUMP_HOOK: &str = "OUTPUT";
const DEFAULT_EXCLUDE_CIDRS: &str = "169.254.169.254/32,10.96.0.10/32";
const DEFAULT_AUDIT_PATH: &str = "/shared/dnat.map";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_POLL_INTERVAL: &str = "2s";

/// The optional YAML configuration file. Keys mirror the `GW_*` environment
/// variables with hyphens instead of underscores.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConfigFile {
    pub namespace: Option<String>,
    pub svc_preview_pattern: Option<String>,
    pub active_suffix: Option<String>,
    pub preview_suffix: Option<String>,
    pub role_label_key: Option<String>,
    pub role_active: Option<String>,
    pub role_preview: Option<String>,
    pub poll_interval: Option<String>,
    pub nat_chain: Option<String>,
    pub jump_hook: Option<String>,
    pub exclude_cidrs: Option<String>,
    pub ipv6: Option<bool>,
    pub iptables_dnat_map: Option<String>,
    pub listen_addr: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigFile {
    /// Loads the file when a path was given; otherwise an empty layer.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("parse config file {}", path.display()))
    }
}

/// Flags for `ghostwire init`.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct InitArgs {
    /// Namespace to discover services in
    #[clap(long)]
    pub namespace: Option<String>,

    /// Preview-name template containing a {{name}} placeholder
    #[clap(long)]
    pub svc_preview_pattern: Option<String>,

    /// Active suffix for suffix-based pairing
    #[clap(long)]
    pub active_suffix: Option<String>,

    /// Preview suffix for suffix-based pairing
    #[clap(long)]
    pub preview_suffix: Option<String>,

    /// Name of the private NAT chain
    #[clap(long)]
    pub nat_chain: Option<String>,

    /// Comma-separated CIDRs excluded from DNAT
    #[clap(long)]
    pub exclude_cidrs: Option<String>,

    /// Also manage the IPv6 tables
    #[clap(long)]
    pub ipv6: Option<bool>,

    /// Path of the shared audit map
    #[clap(long)]
    pub iptables_dnat_map: Option<String>,
}

/// Flags for `ghostwire watcher`.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct WatcherArgs {
    /// Pod label carrying the role value
    #[clap(long)]
    pub role_label_key: Option<String>,

    /// Label value selecting the active backends
    #[clap(long)]
    pub role_active: Option<String>,

    /// Label value selecting the preview backends
    #[clap(long)]
    pub role_preview: Option<String>,

    /// Label poll cadence, e.g. 2s or 500ms
    #[clap(long)]
    pub poll_interval: Option<String>,

    /// Name of the private NAT chain
    #[clap(long)]
    pub nat_chain: Option<String>,

    /// Hook chain to jump from (OUTPUT or PREROUTING)
    #[clap(long)]
    pub jump_hook: Option<String>,

    /// Also manage the IPv6 tables
    #[clap(long)]
    pub ipv6: Option<bool>,

    /// Path of the shared audit map
    #[clap(long)]
    pub iptables_dnat_map: Option<String>,

    /// Listen address for the metrics and health endpoint
    #[clap(long)]
    pub listen_addr: Option<String>,
}

/// Preparer settings resolved from all layers.
#[derive(Clone, Debug)]
pub struct PreparerSettings {
    pub namespace: String,
    pub preview_pattern: String,
    pub active_suffix: String,
    pub preview_suffix: String,
    pub chain: String,
    pub exclude_cidrs: Vec<IpNet>,
    pub dual_stack: bool,
    pub audit_path: Option<PathBuf>,
}

impl PreparerSettings {
    pub fn resolve(args: &InitArgs, file: &ConfigFile) -> Result<Self> {
        let namespace = args
            .namespace
            .clone()
            .or_else(|| file.namespace.clone())
            .or_else(|| env("GW_NAMESPACE"))
            .or_else(|| env("POD_NAMESPACE"))
            .unwrap_or_else(|| "default".to_string());

        let preview_pattern = layer(
            args.svc_preview_pattern.clone(),
            file.svc_preview_pattern.clone(),
            "GW_SVC_PREVIEW_PATTERN",
            DEFAULT_PREVIEW_PATTERN,
        );
        let active_suffix = layer(
            args.active_suffix.clone(),
            file.active_suffix.clone(),
            "GW_ACTIVE_SUFFIX",
            "-active",
        );
        let preview_suffix = layer(
            args.preview_suffix.clone(),
            file.preview_suffix.clone(),
            "GW_PREVIEW_SUFFIX",
            "-preview",
        );

        let raw_cidrs = layer(
            args.exclude_cidrs.clone(),
            file.exclude_cidrs.clone(),
            "GW_EXCLUDE_CIDRS",
            DEFAULT_EXCLUDE_CIDRS,
        );

        Ok(Self {
            namespace,
            preview_pattern,
            active_suffix,
            preview_suffix,
            chain: resolve_chain(args.nat_chain.clone(), file),
            exclude_cidrs: parse_exclude_cidrs(&raw_cidrs)?,
            dual_stack: resolve_bool(args.ipv6, file.ipv6, "GW_IPV6", false)?,
            audit_path: resolve_audit_path(args.iptables_dnat_map.clone(), file),
        })
    }
}

/// Watcher settings resolved from all layers. Pod identity comes from the
/// downward API and is required.
#[derive(Clone, Debug)]
pub struct WatcherSettings {
    pub pod_name: String,
    pub pod_namespace: String,
    pub label_key: String,
    pub active_value: String,
    pub preview_value: String,
    pub poll_interval: Duration,
    pub chain: String,
    pub hook: String,
    pub dual_stack: bool,
    pub audit_path: PathBuf,
    pub listen_addr: SocketAddr,
}

impl WatcherSettings {
    pub fn resolve(args: &WatcherArgs, file: &ConfigFile) -> Result<Self> {
        let pod_name =
            env("POD_NAME").ok_or_else(|| anyhow!("environment variable POD_NAME is required"))?;
        let pod_namespace = env("POD_NAMESPACE")
            .ok_or_else(|| anyhow!("environment variable POD_NAMESPACE is required"))?;

        let label_key = layer(
            args.role_label_key.clone(),
            file.role_label_key.clone(),
            "GW_ROLE_LABEL_KEY",
            "role",
        );
        let active_value = layer(
            args.role_active.clone(),
            file.role_active.clone(),
            "GW_ROLE_ACTIVE",
            "active",
        );
        let preview_value = layer(
            args.role_preview.clone(),
            file.role_preview.clone(),
            "GW_ROLE_PREVIEW",
            "preview",
        );

        let raw_interval = layer(
            args.poll_interval.clone(),
            file.poll_interval.clone(),
            "GW_POLL_INTERVAL",
            DEFAULT_POLL_INTERVAL,
        );
        let poll_interval = parse_duration(&raw_interval)
            .with_context(|| format!("parse poll interval {raw_interval:?}"))?;
        if poll_interval.is_zero() {
            bail!("poll interval must be positive, got {raw_interval:?}");
        }

        let hook = layer(
            args.jump_hook.clone(),
            file.jump_hook.clone(),
            "GW_JUMP_HOOK",
            DEFAULT_JUMP_HOOK,
        );
        if hook != "OUTPUT" && hook != "PREROUTING" {
            bail!("jump hook must be OUTPUT or PREROUTING, got {hook:?}");
        }

        let raw_listen = layer(
            args.listen_addr.clone(),
            file.listen_addr.clone(),
            "GW_LISTEN_ADDR",
            DEFAULT_LISTEN_ADDR,
        );
        let listen_addr = raw_listen
            .parse()
            .with_context(|| format!("parse listen address {raw_listen:?}"))?;

        let audit_path = layer(
            args.iptables_dnat_map.clone(),
            file.iptables_dnat_map.clone(),
            "GW_IPTABLES_DNAT_MAP",
            DEFAULT_AUDIT_PATH,
        );

        Ok(Self {
            pod_name,
            pod_namespace,
            label_key,
            active_value,
            preview_value,
            poll_interval,
            chain: resolve_chain(args.nat_chain.clone(), file),
            hook,
            dual_stack: resolve_bool(args.ipv6, file.ipv6, "GW_IPV6", false)?,
            audit_path: PathBuf::from(audit_path),
            listen_addr,
        })
    }
}

/// Resolves the log level ahead of logging initialization.
pub fn resolve_log_level(flag: Option<String>, file: &ConfigFile) -> Result<kubert::LogFilter> {
    let raw = layer(flag, file.log_level.clone(), "GW_LOG_LEVEL", "info");
    raw.parse()
        .map_err(|error| anyhow!("parse log level {raw:?}: {error}"))
}

/// Parses the comma-separated exclusion list. Entries are trimmed and empty
/// entries dropped; any unparseable CIDR is fatal.
pub fn parse_exclude_cidrs(csv: &str) -> Result<Vec<IpNet>> {
    csv.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<IpNet>()
                .with_context(|| format!("parse exclude cidr {part:?}"))
        })
        .collect()
}

/// Parses duration strings like `250ms`, `2s`, `1m`, with a bare `0`
/// accepted for zero.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let Some(offset) = s.rfind(|c: char| c.is_ascii_digit()) else {
        bail!("{s:?} does not contain a duration value");
    };
    let (magnitude, unit) = s.split_at(offset + 1);
    let magnitude = magnitude
        .parse::<u64>()
        .with_context(|| format!("parse duration magnitude {magnitude:?}"))?;

    let unit_millis = match unit {
        "" if magnitude == 0 => 0,
        "ms" => 1,
        "s" => 1000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => bail!("invalid duration unit {unit:?} (expected 'ms', 's', 'm', or 'h')"),
    };

    let total = magnitude
        .checked_mul(unit_millis)
        .ok_or_else(|| anyhow!("duration {s:?} overflows"))?;
    Ok(Duration::from_millis(total))
}

fn resolve_chain(flag: Option<String>, file: &ConfigFile) -> String {
    let chain = layer(flag, file.nat_chain.clone(), "GW_NAT_CHAIN", DEFAULT_NAT_CHAIN);
    let chain = chain.trim();
    if chain.is_empty() {
        DEFAULT_NAT_CHAIN.to_string()
    } else {
        chain.to_string()
    }
}

fn resolve_audit_path(flag: Option<String>, file: &ConfigFile) -> Option<PathBuf> {
    let path = layer(
        flag,
        file.iptables_dnat_map.clone(),
        "GW_IPTABLES_DNAT_MAP",
        DEFAULT_AUDIT_PATH,
    );
    let path = path.trim();
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

fn resolve_bool(flag: Option<bool>, file: Option<bool>, env_key: &str, default: bool) -> Result<bool> {
    if let Some(value) = flag.or(file) {
        return Ok(value);
    }
    match env(env_key) {
        None => Ok(default),
        Some(raw) => {
            parse_bool(&raw).ok_or_else(|| anyhow!("invalid boolean {raw:?} for {env_key}"))
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn layer(flag: Option<String>, file: Option<String>, env_key: &str, default: &str) -> String {
    layer_with(flag, file, env(env_key), default)
}

fn layer_with(
    flag: Option<String>,
    file: Option<String>,
    env_value: Option<String>,
    default: &str,
) -> String {
    flag.or(file)
        .or(env_value)
        .unwrap_or_else(|| default.to_string())
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}
