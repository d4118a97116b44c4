#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Packet-filter controller for the preparer side of ghostwire's routing
//! flow: creating and priming the private DNAT chain, appending exclusion
//! RETURN rules and DNAT targets for each service mapping, and emitting the
//! audit map. The watcher only adds or removes the single jump into the
//! configured chain at runtime.

use ghostwire_core::ServiceMapping;
use ipnet::IpNet;
use std::{
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
};
use thiserror::Error;
use tracing::info;

mod audit;
mod chain;
mod exclusions;
mod executor;
mod jump;
mod rules;
pub mod testing;

pub use self::audit::{count_audit_lines, write_audit, AuditError};
pub use self::chain::{chain_exists, ensure_chain};
pub use self::exclusions::add_exclusions;
pub use self::executor::{CommandError, CommandExecutor, Executor, IpFamily};
pub use self::jump::{add_jump, jump_exists, remove_jump};
pub use self::rules::add_dnat_rules;

/// The kernel table holding the private chain and its jump.
pub const NAT_TABLE: &str = "nat";

/// Wait flag value passed to every invocation so concurrent callers
/// serialize on the kernel's table lock instead of racing.
pub(crate) const WAIT: &str = "5";

static IPV6_CHAIN_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Number of IPv6 chain-preparation failures since process start.
pub fn ipv6_chain_failures() -> u64 {
    IPV6_CHAIN_FAILURES.load(Ordering::Relaxed)
}

pub(crate) fn incr_ipv6_chain_failures() {
    IPV6_CHAIN_FAILURES.fetch_add(1, Ordering::Relaxed);
}

/// Resets the process-wide failure counter. Only meaningful in tests.
#[doc(hidden)]
pub fn reset_ipv6_chain_failures() {
    IPV6_CHAIN_FAILURES.store(0, Ordering::Relaxed);
}

/// Preparer-side chain configuration.
#[derive(Clone, Debug)]
pub struct NatConfig {
    pub chain: String,
    pub exclude_cidrs: Vec<IpNet>,
    pub dual_stack: bool,
    pub audit_path: Option<PathBuf>,
}

/// Preparer failure, identifying the step that failed.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("prepare chain {chain}: {source}")]
    Chain {
        chain: String,
        #[source]
        source: CommandError,
    },

    #[error("add exclusions: {0}")]
    Exclusions(#[source] CommandError),

    #[error("add dnat rules: {0}")]
    DnatRules(#[source] CommandError),

    #[error("write dnat map: {0}")]
    Audit(#[from] AuditError),
}

/// Runs the preparer sequence: ensure the chain, append exclusions, append
/// DNAT rules, write the audit map. Returns the number of DNAT rules
/// inserted. A failure leaves partial kernel state behind; the next run's
/// `ensure_chain` flushes it.
pub async fn setup(
    exec: &dyn Executor,
    config: &NatConfig,
    mappings: &[ServiceMapping],
) -> Result<usize, SetupError> {
    ensure_chain(exec, NAT_TABLE, &config.chain, config.dual_stack)
        .await
        .map_err(|source| SetupError::Chain {
            chain: config.chain.clone(),
            source,
        })?;

    add_exclusions(
        exec,
        NAT_TABLE,
        &config.chain,
        &config.exclude_cidrs,
        config.dual_stack,
    )
    .await
    .map_err(SetupError::Exclusions)?;

    let added = add_dnat_rules(exec, NAT_TABLE, &config.chain, mappings, config.dual_stack)
        .await
        .map_err(SetupError::DnatRules)?;

    if let Some(path) = &config.audit_path {
        write_audit(path, mappings)?;
    }

    info!(
        chain = %config.chain,
        exclusions = config.exclude_cidrs.len(),
        dnat_rules = added,
        dual_stack = config.dual_stack,
        "dnat chain prepared but not activated; the watcher adds the jump when the role becomes preview"
    );

    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingExecutor;
    use ghostwire_core::Protocol;
    use std::num::NonZeroU16;

    fn mapping(port: u16) -> ServiceMapping {
        ServiceMapping {
            service: "orders".to_string(),
            port: NonZeroU16::new(port).unwrap(),
            protocol: Protocol::Tcp,
            active_ip: "10.0.0.10".parse().unwrap(),
            preview_ip: "10.0.1.10".parse().unwrap(),
        }
    }

    fn config(audit_path: Option<PathBuf>) -> NatConfig {
        NatConfig {
            chain: "CANARY_DNAT".to_string(),
            exclude_cidrs: vec!["169.254.169.254/32".parse().unwrap()],
            dual_stack: false,
            audit_path,
        }
    }

    #[tokio::test]
    async fn runs_steps_in_order_and_writes_audit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dnat.map");
        let exec = RecordingExecutor::new();

        let added = setup(&exec, &config(Some(path.clone())), &[mapping(80), mapping(443)])
            .await
            .unwrap();

        assert_eq!(added, 2);
        assert_eq!(
            exec.runs(),
            vec![
                "iptables -w 5 -t nat -N CANARY_DNAT",
                "iptables -w 5 -t nat -A CANARY_DNAT -d 169.254.169.254/32 -j RETURN",
                "iptables -w 5 -t nat -A CANARY_DNAT -d 10.0.0.10 -p tcp --dport 80 \
                 -j DNAT --to-destination 10.0.1.10:80",
                "iptables -w 5 -t nat -A CANARY_DNAT -d 10.0.0.10 -p tcp --dport 443 \
                 -j DNAT --to-destination 10.0.1.10:443",
            ]
        );
        assert_eq!(count_audit_lines(&path).unwrap(), 2);
    }

    #[tokio::test]
    async fn rerun_flushes_before_rebuilding() {
        let exec = RecordingExecutor::new();
        exec.probe_ok(IpFamily::V4, "-w 5 -t nat -L CANARY_DNAT", true);

        setup(&exec, &config(None), &[mapping(80)]).await.unwrap();

        let runs = exec.runs();
        assert_eq!(runs[0], "iptables -w 5 -t nat -F CANARY_DNAT");
        assert_eq!(runs.len(), 3);
    }

    #[tokio::test]
    async fn chain_failure_is_reported_as_chain_step() {
        let exec = RecordingExecutor::new();
        exec.run_fails(IpFamily::V4, "-w 5 -t nat -N CANARY_DNAT");
        let error = setup(&exec, &config(None), &[]).await.unwrap_err();
        assert!(matches!(error, SetupError::Chain { .. }), "{error}");
    }

    #[tokio::test]
    async fn exclusion_failure_is_reported_as_exclusion_step() {
        let exec = RecordingExecutor::new();
        exec.run_fails(
            IpFamily::V4,
            "-w 5 -t nat -A CANARY_DNAT -d 169.254.169.254/32 -j RETURN",
        );
        let error = setup(&exec, &config(None), &[]).await.unwrap_err();
        assert!(matches!(error, SetupError::Exclusions(_)), "{error}");
    }

    #[tokio::test]
    async fn audit_failure_is_reported_as_audit_step() {
        let exec = RecordingExecutor::new();
        let error = setup(
            &exec,
            &config(Some(PathBuf::from("/shared/../etc/dnat.map"))),
            &[],
        )
        .await
        .unwrap_err();
        assert!(matches!(error, SetupError::Audit(_)), "{error}");
    }
}
