//! Cluster access.
//!
//! The provisioning steps talk to the control plane through [`ClusterApi`],
//! which exposes only the calls they need. A [`ClusterSession`] is opened
//! per provisioning call: credentials are resolved and loaded again every
//! time so rotated kubeconfigs are picked up without a restart.

pub mod kubernetes;
pub mod mock;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use thiserror::Error;
use tracing::debug;

use crate::config::{ProvisionerSettings, KUBECONFIG_LOCAL_PATH_VAR, KUBECONFIG_MOUNT_PATH_VAR};
use crate::error::{ProvisionError, Result};
use crate::manifest::ManifestDocument;

pub use kubernetes::{KubeCluster, KubeConnector};
pub use mock::{MockCluster, MockConnector};

/// Classified cluster API failure.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// HTTP 404.
    #[error("resource not found")]
    NotFound,

    /// HTTP 409 on create.
    #[error("resource already exists")]
    AlreadyExists,

    /// Any other API status.
    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },

    /// The request never produced an API status.
    #[error("request failed: {0}")]
    Transport(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists)
    }
}

/// The control plane calls used by provisioning.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Read a namespace.
    async fn read_namespace(&self, name: &str) -> Result<(), ClusterError>;

    /// Read a service.
    async fn read_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;

    /// List all nodes.
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;

    /// Names of deployments in `namespace` matching `label_selector`.
    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, ClusterError>;

    /// Create a document. Namespaced kinds are created in `namespace`.
    async fn create(&self, namespace: &str, document: &ManifestDocument)
        -> Result<(), ClusterError>;
}

/// Builds a [`ClusterApi`] from a credential file.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, credential_path: &Path) -> Result<Arc<dyn ClusterApi>>;
}

/// A loaded client bundle, valid for one provisioning call.
pub struct ClusterSession {
    credential_path: PathBuf,
    api: Arc<dyn ClusterApi>,
}

impl ClusterSession {
    /// Resolve credentials and connect.
    pub async fn open(
        settings: &ProvisionerSettings,
        connector: &dyn ClusterConnector,
    ) -> Result<Self> {
        let path = Self::resolve_path(settings)?;
        Self::load(connector, path).await
    }

    /// Pick the credential file: the mounted path first, then the local
    /// path. The first candidate that exists wins.
    pub fn resolve_path(settings: &ProvisionerSettings) -> Result<PathBuf> {
        [
            settings.kubeconfig_mount_path.as_ref(),
            settings.kubeconfig_local_path.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find(|path| path.exists())
        .cloned()
        .ok_or_else(|| {
            ProvisionError::configuration(format!(
                "kubeconfig not found; set {KUBECONFIG_MOUNT_PATH_VAR} or {KUBECONFIG_LOCAL_PATH_VAR} to an existing path"
            ))
        })
    }

    /// Initialise the client bundle from `path`.
    pub async fn load(connector: &dyn ClusterConnector, path: PathBuf) -> Result<Self> {
        debug!(path = %path.display(), "Loading cluster credentials");
        let api = connector.connect(&path).await?;
        Ok(Self {
            credential_path: path,
            api,
        })
    }

    pub fn api(&self) -> &dyn ClusterApi {
        self.api.as_ref()
    }

    pub fn credential_path(&self) -> &Path {
        &self.credential_path
    }
}
