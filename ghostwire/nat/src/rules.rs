use ghostwire_core::ServiceMapping;
use std::{net::IpAddr, num::NonZeroU16};
use tracing::{info, warn};

use crate::{
    executor::{CommandError, Executor, IpFamily},
    WAIT,
};

/// Appends one DNAT rule per mapping and returns the number inserted.
///
/// Mixed-family mappings are skipped, as are IPv6 mappings when dual-stack
/// is off; both are logged. Any insertion failure aborts.
pub async fn add_dnat_rules(
    exec: &dyn Executor,
    table: &str,
    chain: &str,
    mappings: &[ServiceMapping],
    dual_stack: bool,
) -> Result<usize, CommandError> {
    let mut added = 0;
    for mapping in mappings {
        if mapping.active_ip.is_ipv6() != mapping.preview_ip.is_ipv6() {
            warn!(
                service = %mapping.service,
                active_ip = %mapping.active_ip,
                preview_ip = %mapping.preview_ip,
                "skipping dnat rule with mixed address families"
            );
            continue;
        }

        let family = if mapping.active_ip.is_ipv6() {
            IpFamily::V6
        } else {
            IpFamily::V4
        };
        if family.is_v6() && !dual_stack {
            warn!(
                service = %mapping.service,
                active_ip = %mapping.active_ip,
                preview_ip = %mapping.preview_ip,
                "skipping ipv6 dnat rule without dual-stack support"
            );
            continue;
        }

        let active = mapping.active_ip.to_string();
        let port = mapping.port.to_string();
        let target = dnat_target(mapping.preview_ip, mapping.port);

        info!(
            service = %mapping.service,
            port = %mapping.port,
            protocol = %mapping.protocol,
            active_ip = %mapping.active_ip,
            preview_ip = %mapping.preview_ip,
            ipv6 = family.is_v6(),
            "adding dnat rule"
        );
        exec.run(
            family,
            &[
                "-w",
                WAIT,
                "-t",
                table,
                "-A",
                chain,
                "-d",
                &active,
                "-p",
                mapping.protocol.lower(),
                "--dport",
                &port,
                "-j",
                "DNAT",
                "--to-destination",
                &target,
            ],
        )
        .await?;
        added += 1;
    }

    Ok(added)
}

fn dnat_target(ip: IpAddr, port: NonZeroU16) -> String {
    match ip {
        IpAddr::V4(ip) => format!("{ip}:{port}"),
        // ip6tables requires the bracketed form.
        IpAddr::V6(ip) => format!("[{ip}]:{port}"),
    }
}
