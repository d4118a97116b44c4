//! Active/preview service pairing.
//!
//! Lists services in one namespace, derives each base service's preview
//! name by suffix or template, and emits one mapping per port the pair has
//! in common. Discovery is read-only and safe to repeat.

use ahash::AHashMap as HashMap;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ghostwire_core::{Protocol, ServiceMapping};
use std::{net::IpAddr, num::NonZeroU16};
use tracing::{debug, info, warn};

use crate::pattern::{derive_preview_name, DEFAULT_PREVIEW_PATTERN};
use crate::{Api, Client, ListParams, Service, ServicePort};

/// Sentinel ClusterIP value for headless services.
const CLUSTER_IP_NONE: &str = "None";

/// Read-only list capability over namespaced services.
#[async_trait]
pub trait ListServices: Send + Sync {
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>>;
}

/// Lists services through the cluster API.
#[derive(Clone)]
pub struct ClusterServices {
    client: Client,
}

impl ClusterServices {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ListServices for ClusterServices {
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>> {
        let api = Api::<Service>::namespaced(self.client.clone(), namespace);
        let services = api
            .list(&ListParams::default())
            .await
            .with_context(|| format!("list services in namespace {namespace}"))?;
        Ok(services.items)
    }
}

/// Inputs for active/preview pairing.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    pub namespace: String,
    pub preview_pattern: String,
    pub active_suffix: String,
    pub preview_suffix: String,
}

/// Lists services in the configured namespace and pairs each base service
/// with its preview counterpart, emitting one mapping per shared port.
pub async fn discover(
    lister: &dyn ListServices,
    config: &DiscoveryConfig,
) -> Result<Vec<ServiceMapping>> {
    if config.namespace.is_empty() {
        bail!("discovery namespace must not be empty");
    }
    if config.preview_pattern.is_empty() {
        bail!("preview pattern must not be empty");
    }

    let services = lister.list_services(&config.namespace).await?;

    let by_name: HashMap<&str, &Service> = services
        .iter()
        .filter_map(|svc| svc.metadata.name.as_deref().map(|name| (name, svc)))
        .collect();

    let mut mappings = Vec::new();
    for svc in &services {
        let Some(name) = svc.metadata.name.as_deref() else {
            continue;
        };

        // Under the defaults, `foo-preview` must not be treated as a base
        // that would look for `foo-preview-preview`.
        if config.preview_pattern == DEFAULT_PREVIEW_PATTERN
            && config.preview_suffix == "-preview"
            && name.ends_with(&config.preview_suffix)
        {
            debug!(service = name, "skipping preview service as base");
            continue;
        }

        let preview_name = derive_preview_name(
            name,
            &config.active_suffix,
            &config.preview_suffix,
            &config.preview_pattern,
        );
        let Some(preview_svc) = by_name.get(preview_name.as_str()).copied() else {
            debug!(service = name, expected_preview = %preview_name, "no preview service found");
            continue;
        };

        let Some(active_ip) = valid_cluster_ip(svc) else {
            warn!(
                service = name,
                cluster_ip = raw_cluster_ip(svc).unwrap_or(""),
                "skipping service with invalid cluster ip"
            );
            continue;
        };
        let Some(preview_ip) = valid_cluster_ip(preview_svc) else {
            warn!(
                service = name,
                preview_service = %preview_name,
                cluster_ip = raw_cluster_ip(preview_svc).unwrap_or(""),
                "skipping service with invalid preview cluster ip"
            );
            continue;
        };
        if active_ip == preview_ip {
            warn!(
                service = name,
                preview_service = %preview_name,
                cluster_ip = %active_ip,
                "skipping service with identical active and preview cluster ips"
            );
            continue;
        }
        if active_ip.is_ipv6() != preview_ip.is_ipv6() {
            warn!(
                service = name,
                active_ip = %active_ip,
                preview_ip = %preview_ip,
                "skipping service pair with mixed address families"
            );
            continue;
        }

        let ports = service_ports(svc);
        if ports.is_empty() {
            warn!(service = name, "skipping service with no ports");
            continue;
        }

        let preview_ports = numeric_port_map(service_ports(preview_svc));

        for port in ports {
            let Some((number, protocol)) = numeric_port_key(port) else {
                warn!(
                    service = name,
                    port = port.port,
                    "skipping port with invalid number or protocol"
                );
                continue;
            };
            let Some(preview_port) = preview_ports.get(&(number, protocol)) else {
                warn!(
                    service = name,
                    preview_service = %preview_name,
                    port = %number,
                    protocol = %protocol,
                    "preview service missing matching port"
                );
                continue;
            };

            let active_port_name = port.name.as_deref().unwrap_or("");
            let preview_port_name = preview_port.name.as_deref().unwrap_or("");
            if !active_port_name.is_empty()
                && !preview_port_name.is_empty()
                && active_port_name != preview_port_name
            {
                warn!(
                    service = name,
                    preview_service = %preview_name,
                    port = %number,
                    active_port_name,
                    preview_port_name,
                    "port name mismatch for numeric match"
                );
            }

            info!(
                service = name,
                preview_service = %preview_name,
                port = %number,
                protocol = %protocol,
                active_ip = %active_ip,
                preview_ip = %preview_ip,
                "discovered preview mapping"
            );
            mappings.push(ServiceMapping {
                service: name.to_string(),
                port: number,
                protocol,
                active_ip,
                preview_ip,
            });
        }
    }

    Ok(mappings)
}

fn service_ports(svc: &Service) -> &[ServicePort] {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or(&[])
}

fn raw_cluster_ip(svc: &Service) -> Option<&str> {
    let spec = svc.spec.as_ref()?;
    spec.cluster_ips
        .as_ref()
        .and_then(|ips| ips.first())
        .or(spec.cluster_ip.as_ref())
        .map(String::as_str)
}

fn valid_cluster_ip(svc: &Service) -> Option<IpAddr> {
    let raw = raw_cluster_ip(svc)?;
    if raw.is_empty() || raw == CLUSTER_IP_NONE {
        return None;
    }
    raw.parse().ok()
}

fn numeric_port_map(
    ports: &[ServicePort],
) -> HashMap<(NonZeroU16, Protocol), &ServicePort> {
    ports
        .iter()
        .filter_map(|port| numeric_port_key(port).map(|key| (key, port)))
        .collect()
}

fn numeric_port_key(port: &ServicePort) -> Option<(NonZeroU16, Protocol)> {
    let number = u16::try_from(port.port).ok().and_then(NonZeroU16::new)?;
    let protocol = match port.protocol.as_deref() {
        None => Protocol::Tcp,
        Some(raw) => raw.parse().ok()?,
    };
    Some((number, protocol))
}
