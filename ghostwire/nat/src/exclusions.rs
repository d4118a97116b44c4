use ipnet::IpNet;
use tracing::{info, warn};

use crate::{
    executor::{CommandError, Executor, IpFamily},
    WAIT,
};

/// Appends a RETURN rule for each CIDR that must bypass the DNAT chain.
///
/// Rule order in the chain matches the input order; exclusions are always
/// appended before any DNAT rule. IPv6 networks are skipped when dual-stack
/// is off.
pub async fn add_exclusions(
    exec: &dyn Executor,
    table: &str,
    chain: &str,
    cidrs: &[IpNet],
    dual_stack: bool,
) -> Result<(), CommandError> {
    for net in cidrs {
        let family = match net {
            IpNet::V4(_) => IpFamily::V4,
            IpNet::V6(_) => IpFamily::V6,
        };
        let cidr = net.to_string();

        if family.is_v6() && !dual_stack {
            warn!(%cidr, table, chain, "skipping ipv6 exclusion without dual-stack support");
            continue;
        }

        info!(%cidr, table, chain, ipv6 = family.is_v6(), "adding exclusion");
        exec.run(
            family,
            &["-w", WAIT, "-t", table, "-A", chain, "-d", &cidr, "-j", "RETURN"],
        )
        .await?;
    }

    Ok(())
}
