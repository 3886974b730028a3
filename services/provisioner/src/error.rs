//! Provisioning error types.

use rexec_requirements::RequirementError;
use thiserror::Error;

use crate::cluster::ClusterError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the provisioning core.
///
/// Each step raises the kind that applies; nothing in the core reclassifies
/// them. Mapping to transport status codes happens in the HTTP layer.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Missing or unreadable credentials or packaged assets.
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The submitted requirement list is malformed or incomplete.
    #[error("validation error: {0}")]
    Validation(#[from] RequirementError),

    /// A cluster API call failed (other than a tolerated create conflict).
    #[error("deployment error for {kind} '{name}': {message}")]
    Deployment {
        kind: String,
        name: String,
        message: String,
        #[source]
        source: Option<ClusterError>,
    },
}

impl ProvisionError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn deployment(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Deployment {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
            source: None,
        }
    }

    /// A failed cluster call against `kind`/`name`.
    pub fn cluster(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
        source: ClusterError,
    ) -> Self {
        let message = format!("{}: {}", message.into(), source);
        Self::Deployment {
            kind: kind.into(),
            name: name.into(),
            message,
            source: Some(source),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_deployment(&self) -> bool {
        matches!(self, Self::Deployment { .. })
    }
}

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
