//! End-to-end provisioning.
//!
//! A call validates the requirement list, loads fresh credentials, makes
//! sure the group namespace exists, skips work when an equivalent
//! deployment is already running there, and otherwise templates and applies
//! the worker bundle. Steps run sequentially; nothing is rolled back on
//! failure, and a retry tolerates whatever the earlier attempt created.

use std::sync::Arc;

use rexec_requirements::RequirementSpec;
use serde::Serialize;
use tracing::{info, instrument};

use crate::apply::ManifestApplier;
use crate::assets::Assets;
use crate::broker::{needs_discovery, BrokerLocator, ExternalEndpoint};
use crate::cluster::{ClusterConnector, ClusterSession};
use crate::config::ProvisionerSettings;
use crate::error::{ProvisionError, Result};
use crate::manifest::{ManifestDocument, ManifestTemplater, TemplateContext, DIGEST_LABEL};
use crate::namespace::{NamespaceManager, NamespaceState};

/// Terminal state of a provisioning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// A deployment with the same fingerprint already runs in the namespace.
    Exists,
    Created,
}

impl ProvisionOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Exists => "remote execution server instance with user-provided requirements exists.",
            Self::Created => "remote execution server instance created for user.",
        }
    }
}

/// Client-facing broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerConfig {
    pub api_url: String,
    pub broker_external_host: Option<String>,
    pub broker_external_port: Option<u16>,
    pub broker_external_url: Option<String>,
}

pub struct Provisioner {
    settings: ProvisionerSettings,
    connector: Arc<dyn ClusterConnector>,
    assets: Assets,
    templater: ManifestTemplater,
}

impl Provisioner {
    pub fn new(settings: ProvisionerSettings, connector: Arc<dyn ClusterConnector>) -> Self {
        let assets = Assets::new(settings.assets_dir.clone());
        let templater = ManifestTemplater::new(&settings);
        Self {
            settings,
            connector,
            assets,
            templater,
        }
    }

    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    pub fn namespace_for(&self, group_id: &str) -> String {
        format!("{}{}", self.settings.namespace_prefix, group_id)
    }

    #[instrument(skip(self, requirements), fields(namespace = tracing::field::Empty))]
    pub async fn provision(
        &self,
        group_id: &str,
        user_id: &str,
        requirements: &[String],
    ) -> Result<ProvisionOutcome> {
        // Validation never touches the cluster.
        let spec = RequirementSpec::parse(requirements)?;

        let namespace = self.namespace_for(group_id);
        tracing::Span::current().record("namespace", namespace.as_str());

        let session = ClusterSession::open(&self.settings, self.connector.as_ref()).await?;
        let api = session.api();

        let state = NamespaceManager::new(api)
            .ensure(
                &namespace,
                &ManifestDocument::namespace(&namespace),
                self.settings.namespace_wait_timeout,
            )
            .await?;

        let fingerprint = spec.fingerprint();

        // A namespace created by this call cannot hold a matching deployment.
        if state == NamespaceState::Existing {
            let selector = format!("{DIGEST_LABEL}={fingerprint}");
            let matches = api
                .list_deployments(&namespace, &selector)
                .await
                .map_err(|e| {
                    ProvisionError::cluster("Deployment", &selector, "failed to list deployments", e)
                })?;
            if !matches.is_empty() {
                info!(%fingerprint, deployments = ?matches, "Matching deployment already exists");
                return Ok(ProvisionOutcome::Exists);
            }
        }

        let builtin = self
            .assets
            .builtin_requirements(&self.settings.builtin_requirements_name)
            .await?;
        let bundle = self
            .assets
            .bundle(&self.settings.deployment_manifest_name)
            .await?;

        let broker_addr = BrokerLocator::new(api)
            .internal_address(&self.settings.broker.service_name, &self.settings.broker.namespace)
            .await?;

        let documents = self.templater.render(
            bundle,
            &TemplateContext {
                namespace: &namespace,
                fingerprint: &fingerprint,
                spec: &spec,
                builtin_requirements: &builtin,
                broker_addr: &broker_addr,
            },
        )?;

        let report = ManifestApplier::new(api)
            .apply_all(&namespace, &documents)
            .await?;

        info!(
            user_id,
            %fingerprint,
            runtime_version = spec.runtime_version(),
            created = report.created.len(),
            existing = report.existing.len(),
            "Provisioned worker"
        );
        Ok(ProvisionOutcome::Created)
    }

    /// Broker connection details for clients, with `api_url` echoed back.
    pub async fn broker_config(&self, api_url: String) -> Result<BrokerConfig> {
        let broker = &self.settings.broker;

        // Only touch the cluster when discovery will actually run.
        let endpoint = if !needs_discovery(broker) {
            ExternalEndpoint::configured(broker)
        } else {
            let session = ClusterSession::open(&self.settings, self.connector.as_ref()).await?;
            BrokerLocator::new(session.api())
                .external_endpoint(broker)
                .await
        };

        Ok(BrokerConfig {
            api_url,
            broker_external_url: endpoint.url(),
            broker_external_host: endpoint.host,
            broker_external_port: endpoint.port,
        })
    }
}
