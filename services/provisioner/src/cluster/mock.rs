//! In-memory cluster for testing and local development.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeStatus, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::Mutex;
use tracing::info;

use super::{ClusterApi, ClusterConnector, ClusterError};
use crate::error::{ProvisionError, Result};
use crate::manifest::ManifestDocument;

/// A create call that reached the mock and succeeded.
#[derive(Debug, Clone)]
pub struct CreatedResource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub document: ManifestDocument,
}

#[derive(Debug, Clone)]
struct StoredDeployment {
    namespace: String,
    name: String,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct MockState {
    namespaces: HashSet<String>,
    /// Created namespaces not yet visible, with the reads left until they are.
    pending_namespaces: HashMap<String, usize>,
    namespace_delay: usize,
    /// Namespaces another caller creates between our read and our create.
    racing_namespaces: HashSet<String>,
    deployments: Vec<StoredDeployment>,
    services: HashMap<(String, String), Service>,
    nodes: Vec<Node>,
    fail_node_listing: bool,
    conflicts: HashSet<(String, String)>,
    failures: HashMap<(String, String), u16>,
    created: Vec<CreatedResource>,
    create_calls: usize,
    api_calls: usize,
}

impl MockState {
    fn failure(&self, kind: &str, name: &str) -> Option<ClusterError> {
        self.failures
            .get(&(kind.to_string(), name.to_string()))
            .map(|code| ClusterError::Api {
                code: *code,
                message: format!("injected failure for {kind} '{name}'"),
            })
    }
}

/// Cluster double with scripted state.
///
/// Builder methods seed the state; the `ClusterApi` impl mutates it the way
/// an API server would. Created deployments keep their labels so a later
/// fingerprint lookup finds them.
#[derive(Debug, Default)]
pub struct MockCluster {
    state: Mutex<MockState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, name: &str) -> Self {
        self.state.get_mut().namespaces.insert(name.to_string());
        self
    }

    pub fn with_deployment(mut self, namespace: &str, name: &str, labels: &[(&str, &str)]) -> Self {
        self.state.get_mut().deployments.push(StoredDeployment {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self
    }

    pub fn with_service(mut self, service: Service) -> Self {
        let namespace = service.metadata.namespace.clone().unwrap_or_default();
        let name = service.metadata.name.clone().unwrap_or_default();
        self.state.get_mut().services.insert((namespace, name), service);
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.state.get_mut().nodes.push(node);
        self
    }

    /// Node listing fails with a server error.
    pub fn with_node_list_failure(mut self) -> Self {
        self.state.get_mut().fail_node_listing = true;
        self
    }

    /// Creating `kind`/`name` reports a conflict.
    pub fn with_conflict(mut self, kind: &str, name: &str) -> Self {
        self.state
            .get_mut()
            .conflicts
            .insert((kind.to_string(), name.to_string()));
        self
    }

    /// Any call touching `kind`/`name` fails with `code`.
    pub fn with_failure(mut self, kind: &str, name: &str, code: u16) -> Self {
        self.state
            .get_mut()
            .failures
            .insert((kind.to_string(), name.to_string()), code);
        self
    }

    /// Newly created namespaces stay invisible for `reads` reads.
    pub fn with_namespace_delay(mut self, reads: usize) -> Self {
        self.state.get_mut().namespace_delay = reads;
        self
    }

    /// Another caller creates namespace `name` just before this client's
    /// create reaches the server: the first read finds nothing, the create
    /// conflicts, and the namespace then shows up subject to the usual
    /// visibility delay.
    pub fn with_concurrent_namespace_create(mut self, name: &str) -> Self {
        self.state
            .get_mut()
            .racing_namespaces
            .insert(name.to_string());
        self
    }

    /// Successful creates, in call order.
    pub async fn created(&self) -> Vec<CreatedResource> {
        self.state.lock().await.created.clone()
    }

    /// Create calls received, including rejected ones.
    pub async fn create_calls(&self) -> usize {
        self.state.lock().await.create_calls
    }

    /// Every API call received.
    pub async fn api_calls(&self) -> usize {
        self.state.lock().await.api_calls
    }

    pub async fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().await.namespaces.contains(name)
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn read_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.api_calls += 1;

        if let Some(err) = state.failure("Namespace", name) {
            return Err(err);
        }
        if state.namespaces.contains(name) {
            return Ok(());
        }

        match state.pending_namespaces.get(name).copied() {
            Some(0) => {
                state.pending_namespaces.remove(name);
                state.namespaces.insert(name.to_string());
                Ok(())
            }
            Some(remaining) => {
                state
                    .pending_namespaces
                    .insert(name.to_string(), remaining - 1);
                Err(ClusterError::NotFound)
            }
            None => Err(ClusterError::NotFound),
        }
    }

    async fn read_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        let mut state = self.state.lock().await;
        state.api_calls += 1;

        if let Some(err) = state.failure("Service", name) {
            return Err(err);
        }
        state
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or(ClusterError::NotFound)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let mut state = self.state.lock().await;
        state.api_calls += 1;

        if state.fail_node_listing {
            return Err(ClusterError::Api {
                code: 500,
                message: "injected node listing failure".to_string(),
            });
        }
        Ok(state.nodes.clone())
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let mut state = self.state.lock().await;
        state.api_calls += 1;

        let wanted: Vec<(&str, &str)> = label_selector
            .split(',')
            .filter(|term| !term.is_empty())
            .filter_map(|term| term.split_once('='))
            .collect();

        Ok(state
            .deployments
            .iter()
            .filter(|d| d.namespace == namespace)
            .filter(|d| {
                wanted
                    .iter()
                    .all(|(k, v)| d.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|d| d.name.clone())
            .collect())
    }

    async fn create(
        &self,
        namespace: &str,
        document: &ManifestDocument,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.api_calls += 1;
        state.create_calls += 1;

        let kind = document.kind();
        let name = document.name().to_string();

        if let Some(err) = state.failure(kind, &name) {
            return Err(err);
        }
        if state.conflicts.contains(&(kind.to_string(), name.clone())) {
            return Err(ClusterError::AlreadyExists);
        }

        match document {
            ManifestDocument::Namespace(_) => {
                if state.racing_namespaces.remove(&name) {
                    let delay = state.namespace_delay;
                    if delay == 0 {
                        state.namespaces.insert(name);
                    } else {
                        state.pending_namespaces.insert(name, delay);
                    }
                    return Err(ClusterError::AlreadyExists);
                }
                if state.namespaces.contains(&name) || state.pending_namespaces.contains_key(&name) {
                    return Err(ClusterError::AlreadyExists);
                }
                if state.namespace_delay == 0 {
                    state.namespaces.insert(name.clone());
                } else {
                    let delay = state.namespace_delay;
                    state.pending_namespaces.insert(name.clone(), delay);
                }
            }
            ManifestDocument::Deployment(deployment) => {
                let duplicate = state
                    .deployments
                    .iter()
                    .any(|d| d.namespace == namespace && d.name == name);
                if duplicate {
                    return Err(ClusterError::AlreadyExists);
                }
                state.deployments.push(StoredDeployment {
                    namespace: namespace.to_string(),
                    name: name.clone(),
                    labels: deployment.metadata.labels.clone().unwrap_or_default(),
                });
            }
            _ => {
                let duplicate = state
                    .created
                    .iter()
                    .any(|c| c.kind == kind && c.name == name && c.namespace == namespace);
                if duplicate {
                    return Err(ClusterError::AlreadyExists);
                }
            }
        }

        info!(kind, name = %name, namespace, "Mock: created resource");
        state.created.push(CreatedResource {
            kind: kind.to_string(),
            name,
            namespace: namespace.to_string(),
            document: document.clone(),
        });
        Ok(())
    }
}

/// Hands out a shared [`MockCluster`] and counts connects.
pub struct MockConnector {
    cluster: Arc<MockCluster>,
    connects: AtomicUsize,
    fail: bool,
}

impl MockConnector {
    pub fn new(cluster: Arc<MockCluster>) -> Self {
        Self {
            cluster,
            connects: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// A connector whose credentials never load.
    pub fn failing(cluster: Arc<MockCluster>) -> Self {
        Self {
            fail: true,
            ..Self::new(cluster)
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn cluster(&self) -> &Arc<MockCluster> {
        &self.cluster
    }
}

#[async_trait]
impl ClusterConnector for MockConnector {
    async fn connect(&self, credential_path: &Path) -> Result<Arc<dyn ClusterApi>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProvisionError::configuration(format!(
                "failed to load kubeconfig {}",
                credential_path.display()
            )));
        }
        Ok(self.cluster.clone())
    }
}

/// A `NodePort` service with one port.
pub fn node_port_service(name: &str, namespace: &str, cluster_ip: &str, node_port: Option<i32>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            cluster_ip: Some(cluster_ip.to_string()),
            ports: Some(vec![ServicePort {
                port: 5560,
                node_port,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A node with the given `(type, address)` pairs.
pub fn node(name: &str, addresses: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            addresses: Some(
                addresses
                    .iter()
                    .map(|(type_, address)| NodeAddress {
                        type_: type_.to_string(),
                        address: address.to_string(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delayed_namespace_becomes_visible() {
        let cluster = MockCluster::new().with_namespace_delay(2);
        cluster
            .create("", &ManifestDocument::namespace("ns"))
            .await
            .unwrap();

        assert!(cluster.read_namespace("ns").await.unwrap_err().is_not_found());
        assert!(cluster.read_namespace("ns").await.unwrap_err().is_not_found());
        cluster.read_namespace("ns").await.unwrap();
        assert!(cluster.has_namespace("ns").await);
    }

    #[tokio::test]
    async fn duplicate_namespace_create_conflicts() {
        let cluster = MockCluster::new().with_namespace("ns");
        let err = cluster
            .create("", &ManifestDocument::namespace("ns"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(cluster.create_calls().await, 1);
        assert!(cluster.created().await.is_empty());
    }

    #[tokio::test]
    async fn selector_matches_every_term() {
        let cluster = MockCluster::new()
            .with_deployment("ns", "a", &[("digest", "x"), ("app", "w")])
            .with_deployment("ns", "b", &[("digest", "y"), ("app", "w")])
            .with_deployment("other", "c", &[("digest", "x")]);

        assert_eq!(cluster.list_deployments("ns", "digest=x").await.unwrap(), ["a"]);
        assert_eq!(
            cluster.list_deployments("ns", "app=w,digest=y").await.unwrap(),
            ["b"]
        );
        assert_eq!(cluster.list_deployments("ns", "").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn injected_failure_applies_to_reads() {
        let cluster = MockCluster::new().with_failure("Namespace", "ns", 403);
        match cluster.read_namespace("ns").await.unwrap_err() {
            ClusterError::Api { code, .. } => assert_eq!(code, 403),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
