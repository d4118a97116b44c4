use tracing::{debug, info, warn};

use crate::{
    executor::{CommandError, Executor, IpFamily},
    WAIT,
};

/// Reports whether the IPv4 jump from `hook` into `chain` is present.
pub async fn jump_exists(
    exec: &dyn Executor,
    table: &str,
    hook: &str,
    chain: &str,
) -> Result<bool, CommandError> {
    family_jump_exists(exec, IpFamily::V4, table, hook, chain).await
}

/// Inserts the jump at position 1 of the hook chain so it evaluates before
/// any pre-existing hook rule. A present jump is left alone. The IPv6 leg
/// is applied symmetrically when dual-stack is on; its failures are logged
/// but not fatal.
pub async fn add_jump(
    exec: &dyn Executor,
    table: &str,
    hook: &str,
    chain: &str,
    dual_stack: bool,
) -> Result<(), CommandError> {
    add_family_jump(exec, IpFamily::V4, table, hook, chain).await?;

    if dual_stack {
        if let Err(error) = add_family_jump(exec, IpFamily::V6, table, hook, chain).await {
            warn!(%error, table, hook, chain, "failed to add ipv6 jump rule");
        }
    }

    Ok(())
}

/// Deletes the jump by rule match. An absent jump is a no-op. The IPv6 leg
/// mirrors [`add_jump`].
pub async fn remove_jump(
    exec: &dyn Executor,
    table: &str,
    hook: &str,
    chain: &str,
    dual_stack: bool,
) -> Result<(), CommandError> {
    remove_family_jump(exec, IpFamily::V4, table, hook, chain).await?;

    if dual_stack {
        if let Err(error) = remove_family_jump(exec, IpFamily::V6, table, hook, chain).await {
            warn!(%error, table, hook, chain, "failed to remove ipv6 jump rule");
        }
    }

    Ok(())
}

async fn family_jump_exists(
    exec: &dyn Executor,
    family: IpFamily,
    table: &str,
    hook: &str,
    chain: &str,
) -> Result<bool, CommandError> {
    exec.probe(family, &["-w", WAIT, "-t", table, "-C", hook, "-j", chain])
        .await
}

async fn add_family_jump(
    exec: &dyn Executor,
    family: IpFamily,
    table: &str,
    hook: &str,
    chain: &str,
) -> Result<(), CommandError> {
    if family_jump_exists(exec, family, table, hook, chain).await? {
        debug!(table, hook, chain, ipv6 = family.is_v6(), "jump rule already present");
        return Ok(());
    }

    info!(table, hook, chain, ipv6 = family.is_v6(), "adding jump rule");
    exec.run(
        family,
        &["-w", WAIT, "-t", table, "-I", hook, "1", "-j", chain],
    )
    .await
}

async fn remove_family_jump(
    exec: &dyn Executor,
    family: IpFamily,
    table: &str,
    hook: &str,
    chain: &str,
) -> Result<(), CommandError> {
    if !family_jump_exists(exec, family, table, hook, chain).await? {
        debug!(table, hook, chain, ipv6 = family.is_v6(), "jump rule absent; nothing to remove");
        return Ok(());
    }

    info!(table, hook, chain, ipv6 = family.is_v6(), "removing jump rule");
    exec.run(
        family,
        &["-w", WAIT, "-t", table, "-D", hook, "-j", chain],
    )
    .await
}
