//! The one-shot preparer: discover active/preview service pairs and
//! materialize the DNAT chain. Routing stays inactive until the watcher
//! adds the jump rule.

use anyhow::{anyhow, Context, Result};
use ghostwire_k8s::discovery::{self, ClusterServices, DiscoveryConfig};
use ghostwire_nat::{self as nat, CommandExecutor, NatConfig};
use std::time::Duration;
use tokio::time;
use tracing::info;

use crate::config::{ConfigFile, InitArgs, PreparerSettings};

/// Overall deadline for the preparer run.
const PREPARE_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(args: &InitArgs, file: &ConfigFile) -> Result<()> {
    let settings = PreparerSettings::resolve(args, file)?;
    time::timeout(PREPARE_TIMEOUT, prepare(&settings))
        .await
        .map_err(|_| anyhow!("preparer timed out after {PREPARE_TIMEOUT:?}"))?
}

async fn prepare(settings: &PreparerSettings) -> Result<()> {
    let client = ghostwire_k8s::Client::try_default()
        .await
        .context("create kubernetes client")?;
    let lister = ClusterServices::new(client);

    let discovery_config = DiscoveryConfig {
        namespace: settings.namespace.clone(),
        preview_pattern: settings.preview_pattern.clone(),
        active_suffix: settings.active_suffix.clone(),
        preview_suffix: settings.preview_suffix.clone(),
    };
    let mappings = discovery::discover(&lister, &discovery_config)
        .await
        .context("service discovery failed")?;
    info!(
        mappings = mappings.len(),
        namespace = %settings.namespace,
        "service discovery complete"
    );

    let nat_config = NatConfig {
        chain: settings.chain.clone(),
        exclude_cidrs: settings.exclude_cidrs.clone(),
        dual_stack: settings.dual_stack,
        audit_path: settings.audit_path.clone(),
    };
    let executor = CommandExecutor::new();
    let rules = nat::setup(&executor, &nat_config, &mappings).await?;
    info!(chain = %settings.chain, dnat_rules = rules, "dnat chain prepared");

    Ok(())
}
