//! Create-if-absent application of manifest documents.

use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::error::{ProvisionError, Result};
use crate::manifest::ManifestDocument;

/// Result of applying one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    /// The control plane reported a conflict; the existing object is kept.
    AlreadyExists,
}

/// Summary of a bundle application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
}

/// Applies documents with the matching create call.
///
/// A conflict is success, never an update. Concurrent provisioning calls
/// for the same target rely on this: the control plane's conflict response
/// is the only serialization point.
pub struct ManifestApplier<'a> {
    api: &'a dyn ClusterApi,
}

impl<'a> ManifestApplier<'a> {
    pub fn new(api: &'a dyn ClusterApi) -> Self {
        Self { api }
    }

    pub async fn apply(&self, namespace: &str, document: &ManifestDocument) -> Result<ApplyOutcome> {
        let kind = document.kind();
        let name = document.name();

        match self.api.create(namespace, document).await {
            Ok(()) => {
                info!(kind, name, namespace, "Created resource");
                Ok(ApplyOutcome::Created)
            }
            Err(e) if e.is_already_exists() => {
                debug!(kind, name, namespace, "Resource already exists");
                Ok(ApplyOutcome::AlreadyExists)
            }
            Err(e) => Err(ProvisionError::cluster(
                kind,
                name,
                format!("failed to create {kind}"),
                e,
            )),
        }
    }

    /// Apply documents in order, stopping at the first hard failure.
    /// Documents created before the failure stay created.
    pub async fn apply_all(
        &self,
        namespace: &str,
        documents: &[ManifestDocument],
    ) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();

        for document in documents {
            let label = format!("{}/{}", document.kind(), document.name());
            match self.apply(namespace, document).await? {
                ApplyOutcome::Created => report.created.push(label),
                ApplyOutcome::AlreadyExists => report.existing.push(label),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockCluster;
    use crate::manifest::parse_bundle;

    const BUNDLE: &str = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
---
apiVersion: v1
kind: Service
metadata:
  name: rexec-server
---
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: worker
";

    #[tokio::test]
    async fn conflicts_do_not_stop_the_bundle() {
        let cluster = MockCluster::new().with_conflict("Service", "rexec-server");
        let documents = parse_bundle(BUNDLE).unwrap();

        let report = ManifestApplier::new(&cluster)
            .apply_all("ns", &documents)
            .await
            .unwrap();

        assert_eq!(report.created, ["ConfigMap/settings", "Role/worker"]);
        assert_eq!(report.existing, ["Service/rexec-server"]);
        assert_eq!(cluster.create_calls().await, 3);
    }

    #[tokio::test]
    async fn second_run_sees_only_conflicts() {
        let cluster = MockCluster::new();
        let documents = parse_bundle(BUNDLE).unwrap();
        let applier = ManifestApplier::new(&cluster);

        applier.apply_all("ns", &documents).await.unwrap();
        let report = applier.apply_all("ns", &documents).await.unwrap();

        assert!(report.created.is_empty());
        assert_eq!(report.existing.len(), 3);
        assert_eq!(cluster.created().await.len(), 3);
    }

    #[tokio::test]
    async fn other_failures_carry_kind_and_name() {
        let cluster = MockCluster::new().with_failure("Service", "rexec-server", 422);
        let documents = parse_bundle(BUNDLE).unwrap();

        let err = ManifestApplier::new(&cluster)
            .apply_all("ns", &documents)
            .await
            .unwrap_err();

        match err {
            ProvisionError::Deployment { kind, name, source, .. } => {
                assert_eq!(kind, "Service");
                assert_eq!(name, "rexec-server");
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The ConfigMap before the failure stays; the Role after it is never sent.
        let created = cluster.created().await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, "ConfigMap");
        assert_eq!(cluster.create_calls().await, 2);
    }
}
