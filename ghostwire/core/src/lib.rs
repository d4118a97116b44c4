#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Domain types shared by the discovery and packet-filter crates.

use std::{fmt, net::IpAddr, num::NonZeroU16, str::FromStr};
use thiserror::Error;

/// A single port mapping between an active service and its preview twin.
///
/// Mappings drive DNAT rule creation and the audit map. They are immutable
/// once emitted by discovery; both addresses are valid cluster IPs of the
/// same family and are never identical.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceMapping {
    pub service: String,
    pub port: NonZeroU16,
    pub protocol: Protocol,
    pub active_ip: IpAddr,
    pub preview_ip: IpAddr,
}

impl fmt::Display for ServiceMapping {
    /// Renders the audit record form, e.g.
    /// `orders:80/TCP 10.0.0.10 -> 10.0.1.10`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{} {} -> {}",
            self.service, self.port, self.protocol, self.active_ip, self.preview_ip
        )
    }
}

/// Transport protocol of a service port.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        }
    }

    /// Lowercase form used in rule arguments (`-p tcp`).
    pub fn lower(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = InvalidProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "SCTP" => Ok(Protocol::Sctp),
            _ => Err(InvalidProtocol(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unsupported protocol {0:?}")]
pub struct InvalidProtocol(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parses_any_case() {
        assert_eq!("TCP".parse(), Ok(Protocol::Tcp));
        assert_eq!("udp".parse(), Ok(Protocol::Udp));
        assert_eq!("Sctp".parse(), Ok(Protocol::Sctp));
        assert_eq!(
            "icmp".parse::<Protocol>(),
            Err(InvalidProtocol("icmp".to_string()))
        );
    }

    #[test]
    fn protocol_renders_both_cases() {
        assert_eq!(Protocol::Tcp.to_string(), "TCP");
        assert_eq!(Protocol::Sctp.lower(), "sctp");
    }

    #[test]
    fn mapping_renders_audit_record() {
        let mapping = ServiceMapping {
            service: "orders".to_string(),
            port: NonZeroU16::new(80).unwrap(),
            protocol: Protocol::Tcp,
            active_ip: "10.0.0.10".parse().unwrap(),
            preview_ip: "10.0.1.10".parse().unwrap(),
        };
        assert_eq!(mapping.to_string(), "orders:80/TCP 10.0.0.10 -> 10.0.1.10");
    }
}
