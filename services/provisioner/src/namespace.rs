//! Namespace existence, creation and readiness.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::apply::ManifestApplier;
use crate::cluster::ClusterApi;
use crate::error::{ProvisionError, Result};
use crate::manifest::ManifestDocument;

/// Readiness poll interval. Fixed, no backoff.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Whether `ensure` found the namespace or had to create it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceState {
    Existing,
    Created,
}

pub struct NamespaceManager<'a> {
    api: &'a dyn ClusterApi,
}

impl<'a> NamespaceManager<'a> {
    pub fn new(api: &'a dyn ClusterApi) -> Self {
        Self { api }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        match self.api.read_namespace(name).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(ProvisionError::cluster(
                "Namespace",
                name,
                "failed to read namespace",
                e,
            )),
        }
    }

    /// Create the namespace if it is missing and wait until it is readable.
    pub async fn ensure(
        &self,
        name: &str,
        creation: &ManifestDocument,
        timeout: Duration,
    ) -> Result<NamespaceState> {
        if self.exists(name).await? {
            debug!(namespace = name, "Namespace exists");
            return Ok(NamespaceState::Existing);
        }

        info!(namespace = name, "Creating namespace");
        ManifestApplier::new(self.api).apply("", creation).await?;
        self.wait_ready(name, timeout).await?;
        Ok(NamespaceState::Created)
    }

    pub async fn wait_ready(&self, name: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.exists(name).await? {
                info!(namespace = name, "Namespace is ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ProvisionError::deployment(
                    "Namespace",
                    name,
                    "timeout waiting for namespace to become ready",
                ));
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockCluster;

    const TIMEOUT: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn missing_namespace_reads_as_absent() {
        let cluster = MockCluster::new();
        assert!(!NamespaceManager::new(&cluster).exists("ns").await.unwrap());
    }

    #[tokio::test]
    async fn read_failure_is_a_deployment_error() {
        let cluster = MockCluster::new().with_failure("Namespace", "ns", 500);
        let err = NamespaceManager::new(&cluster).exists("ns").await.unwrap_err();
        assert!(err.is_deployment());
    }

    #[tokio::test]
    async fn existing_namespace_is_left_alone() {
        let cluster = MockCluster::new().with_namespace("ns");
        let state = NamespaceManager::new(&cluster)
            .ensure("ns", &ManifestDocument::namespace("ns"), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(state, NamespaceState::Existing);
        assert_eq!(cluster.create_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_once_per_second_until_visible() {
        let cluster = MockCluster::new().with_namespace_delay(3);
        let started = Instant::now();

        let state = NamespaceManager::new(&cluster)
            .ensure("ns", &ManifestDocument::namespace("ns"), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(state, NamespaceState::Created);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert!(cluster.has_namespace("ns").await);
    }

    #[tokio::test(start_paused = true)]
    async fn creation_conflict_still_waits() {
        let cluster = MockCluster::new().with_conflict("Namespace", "ns");
        let err = NamespaceManager::new(&cluster)
            .ensure("ns", &ManifestDocument::namespace("ns"), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(err.is_deployment());
        assert!(err.to_string().contains("timeout waiting for namespace"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_creation_is_absorbed_and_awaited() {
        let cluster = MockCluster::new()
            .with_namespace_delay(2)
            .with_concurrent_namespace_create("ns");
        let started = Instant::now();

        let state = NamespaceManager::new(&cluster)
            .ensure("ns", &ManifestDocument::namespace("ns"), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(state, NamespaceState::Created);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(cluster.create_calls().await, 1);
        assert!(cluster.created().await.is_empty());
        assert!(cluster.has_namespace("ns").await);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_the_deadline() {
        let cluster = MockCluster::new().with_namespace_delay(100);
        let started = Instant::now();

        let err = NamespaceManager::new(&cluster)
            .ensure("ns", &ManifestDocument::namespace("ns"), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(err.is_deployment());
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
