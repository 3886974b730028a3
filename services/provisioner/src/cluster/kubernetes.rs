//! [`ClusterApi`] backed by a real Kubernetes API server.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::debug;

use super::{ClusterApi, ClusterConnector, ClusterError};
use crate::error::{ProvisionError, Result};
use crate::manifest::ManifestDocument;

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => match response.code {
                404 => ClusterError::NotFound,
                409 => ClusterError::AlreadyExists,
                code => ClusterError::Api {
                    code,
                    message: response.message,
                },
            },
            other => ClusterError::Transport(other.to_string()),
        }
    }
}

/// Connects with a kubeconfig file.
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, credential_path: &Path) -> Result<Arc<dyn ClusterApi>> {
        let kubeconfig = Kubeconfig::read_from(credential_path).map_err(|e| {
            ProvisionError::configuration_with(
                format!("failed to read kubeconfig {}", credential_path.display()),
                e,
            )
        })?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ProvisionError::configuration_with("failed to load kubeconfig", e))?;

        let client = Client::try_from(config)
            .map_err(|e| ProvisionError::configuration_with("failed to build cluster client", e))?;

        Ok(Arc::new(KubeCluster::new(client)))
    }
}

/// Kubernetes API client bundle.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn read_namespace(&self, name: &str) -> Result<(), ClusterError> {
        Api::<Namespace>::all(self.client.clone()).get(name).await?;
        Ok(())
    }

    async fn read_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        let service = Api::<Service>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await?;
        Ok(service)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let nodes = Api::<Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await?;
        Ok(nodes.items)
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let deployments = Api::<Deployment>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(deployments
            .items
            .into_iter()
            .filter_map(|d| d.metadata.name)
            .collect())
    }

    async fn create(
        &self,
        namespace: &str,
        document: &ManifestDocument,
    ) -> Result<(), ClusterError> {
        let params = PostParams::default();
        let client = self.client.clone();
        debug!(kind = document.kind(), name = document.name(), namespace, "Creating resource");

        match document {
            ManifestDocument::Namespace(ns) => {
                Api::<Namespace>::all(client).create(&params, ns).await?;
            }
            ManifestDocument::Deployment(deployment) => {
                Api::<Deployment>::namespaced(client, namespace)
                    .create(&params, deployment)
                    .await?;
            }
            ManifestDocument::Service(service) => {
                Api::<Service>::namespaced(client, namespace)
                    .create(&params, service)
                    .await?;
            }
            ManifestDocument::ConfigMap(config_map) => {
                Api::<ConfigMap>::namespaced(client, namespace)
                    .create(&params, config_map)
                    .await?;
            }
            ManifestDocument::Role(role) => {
                Api::<Role>::namespaced(client, namespace)
                    .create(&params, role)
                    .await?;
            }
            ManifestDocument::RoleBinding(binding) => {
                Api::<RoleBinding>::namespaced(client, namespace)
                    .create(&params, binding)
                    .await?;
            }
            ManifestDocument::Ingress(ingress) => {
                Api::<Ingress>::namespaced(client, namespace)
                    .create(&params, ingress)
                    .await?;
            }
            ManifestDocument::NetworkPolicy(policy) => {
                Api::<NetworkPolicy>::namespaced(client, namespace)
                    .create(&params, policy)
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn classifies_api_statuses() {
        assert!(ClusterError::from(api_error(404)).is_not_found());
        assert!(ClusterError::from(api_error(409)).is_already_exists());
        match ClusterError::from(api_error(403)) {
            ClusterError::Api { code, message } => {
                assert_eq!(code, 403);
                assert_eq!(message, "status 403");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }
}
