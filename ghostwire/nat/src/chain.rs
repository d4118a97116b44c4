use tracing::{info, warn};

use crate::{
    executor::{CommandError, Executor, IpFamily},
    WAIT,
};

/// Reports whether the IPv4 chain is present in the table.
pub async fn chain_exists(
    exec: &dyn Executor,
    table: &str,
    chain: &str,
) -> Result<bool, CommandError> {
    family_chain_exists(exec, IpFamily::V4, table, chain).await
}

/// Leaves the chain present and empty: creates it if absent, flushes it if
/// it already exists. The IPv6 leg is best-effort because clusters may lack
/// IPv6 support entirely; its failures are counted process-wide.
pub async fn ensure_chain(
    exec: &dyn Executor,
    table: &str,
    chain: &str,
    dual_stack: bool,
) -> Result<(), CommandError> {
    ensure_family_chain(exec, IpFamily::V4, table, chain).await?;

    if dual_stack {
        if let Err(error) = ensure_family_chain(exec, IpFamily::V6, table, chain).await {
            warn!(%error, table, chain, "ip6tables chain preparation failed");
            crate::incr_ipv6_chain_failures();
        }
    }

    Ok(())
}

async fn family_chain_exists(
    exec: &dyn Executor,
    family: IpFamily,
    table: &str,
    chain: &str,
) -> Result<bool, CommandError> {
    exec.probe(family, &["-w", WAIT, "-t", table, "-L", chain])
        .await
}

async fn ensure_family_chain(
    exec: &dyn Executor,
    family: IpFamily,
    table: &str,
    chain: &str,
) -> Result<(), CommandError> {
    if family_chain_exists(exec, family, table, chain).await? {
        info!(table, chain, ipv6 = family.is_v6(), "flushing existing chain");
        exec.run(family, &["-w", WAIT, "-t", table, "-F", chain])
            .await
    } else {
        info!(table, chain, ipv6 = family.is_v6(), "creating chain");
        exec.run(family, &["-w", WAIT, "-t", table, "-N", chain])
            .await
    }
}
