//! Broker endpoint discovery.
//!
//! Workers reach the broker through its in-cluster service address. Clients
//! outside the cluster use either a statically configured endpoint or one
//! discovered from a `NodePort` service and the node list.

use k8s_openapi::api::core::v1::{Node, Service};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cluster::ClusterApi;
use crate::config::BrokerSettings;
use crate::error::{ProvisionError, Result};

/// Address type preference when picking a node address.
const ADDRESS_PREFERENCE: [&str; 2] = ["ExternalIP", "InternalIP"];

/// Externally advertised broker endpoint. Either part may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExternalEndpoint {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ExternalEndpoint {
    /// `tcp://host:port`, when both parts are known.
    pub fn url(&self) -> Option<String> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some(format!("tcp://{host}:{port}")),
            _ => None,
        }
    }

    /// The statically configured parts, nothing discovered.
    pub fn configured(settings: &BrokerSettings) -> Self {
        Self {
            host: settings.external_host.clone(),
            port: settings.external_port,
        }
    }
}

/// Whether resolving the external endpoint has to ask the cluster: some part
/// is missing from the configuration and a discovery service is named.
pub fn needs_discovery(settings: &BrokerSettings) -> bool {
    settings.external_service_name.is_some()
        && (settings.external_host.is_none() || settings.external_port.is_none())
}

pub struct BrokerLocator<'a> {
    api: &'a dyn ClusterApi,
}

impl<'a> BrokerLocator<'a> {
    pub fn new(api: &'a dyn ClusterApi) -> Self {
        Self { api }
    }

    /// Cluster-internal address of `service` in `namespace`.
    pub async fn internal_address(&self, service: &str, namespace: &str) -> Result<String> {
        let svc = self
            .api
            .read_service(namespace, service)
            .await
            .map_err(|e| ProvisionError::cluster("Service", service, "failed to read broker service", e))?;

        svc.spec
            .and_then(|spec| spec.cluster_ip)
            .filter(|ip| !ip.is_empty() && ip != "None")
            .ok_or_else(|| {
                ProvisionError::deployment("Service", service, "broker service has no cluster address")
            })
    }

    /// Discover the endpoint from a `NodePort` service. Failures are
    /// logged and leave the corresponding part unset.
    pub async fn discover_external(&self, service: &str, namespace: &str) -> ExternalEndpoint {
        let port = match self.api.read_service(namespace, service).await {
            Ok(svc) => node_port(&svc),
            Err(e) => {
                warn!(service, namespace, error = %e, "Failed to read external broker service");
                None
            }
        };

        let host = match self.api.list_nodes().await {
            Ok(nodes) => select_node_address(&nodes),
            Err(e) => {
                warn!(error = %e, "Failed to list nodes");
                None
            }
        };

        debug!(?host, ?port, "Discovered external broker endpoint");
        ExternalEndpoint { host, port }
    }

    /// Static configuration wins when both host and port are set; otherwise
    /// each part falls back to discovery on its own.
    pub async fn external_endpoint(&self, settings: &BrokerSettings) -> ExternalEndpoint {
        let configured = ExternalEndpoint::configured(settings);
        let service = match &settings.external_service_name {
            Some(service) if needs_discovery(settings) => service,
            _ => return configured,
        };

        let discovered = self.discover_external(service, &settings.namespace).await;
        ExternalEndpoint {
            host: configured.host.or(discovered.host),
            port: configured.port.or(discovered.port),
        }
    }
}

/// First node-level port exposed by the service.
pub fn node_port(service: &Service) -> Option<u16> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .filter_map(|p| p.node_port)
        .find_map(|p| u16::try_from(p).ok().filter(|p| *p != 0))
}

/// Prefer an external address, then an internal one, then anything.
pub fn select_node_address(nodes: &[Node]) -> Option<String> {
    let addresses: Vec<_> = nodes
        .iter()
        .filter_map(|n| n.status.as_ref()?.addresses.as_ref())
        .flatten()
        .filter(|a| !a.address.is_empty())
        .collect();

    ADDRESS_PREFERENCE
        .iter()
        .find_map(|wanted| addresses.iter().find(|a| a.type_ == *wanted))
        .or_else(|| addresses.first())
        .map(|a| a.address.clone())
}
