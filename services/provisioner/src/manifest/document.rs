//! Typed manifest documents.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;

use crate::error::{ProvisionError, Result};

/// One document of a manifest bundle, restricted to the kinds the
/// provisioner knows how to create.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestDocument {
    Namespace(Namespace),
    Deployment(Deployment),
    Service(Service),
    ConfigMap(ConfigMap),
    Role(Role),
    RoleBinding(RoleBinding),
    Ingress(Ingress),
    NetworkPolicy(NetworkPolicy),
}

impl ManifestDocument {
    /// Build a document from a decoded YAML value, dispatching on `kind`.
    pub fn from_value(value: serde_yaml::Value) -> Result<Self> {
        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let name = value
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let document = match kind.as_str() {
            "Namespace" => Self::Namespace(decode(&kind, &name, value)?),
            "Deployment" => Self::Deployment(decode(&kind, &name, value)?),
            "Service" => Self::Service(decode(&kind, &name, value)?),
            "ConfigMap" => Self::ConfigMap(decode(&kind, &name, value)?),
            "Role" => Self::Role(decode(&kind, &name, value)?),
            "RoleBinding" => Self::RoleBinding(decode(&kind, &name, value)?),
            "Ingress" => Self::Ingress(decode(&kind, &name, value)?),
            "NetworkPolicy" => Self::NetworkPolicy(decode(&kind, &name, value)?),
            "" => {
                return Err(ProvisionError::deployment(
                    "<none>",
                    name,
                    "manifest document has no kind",
                ))
            }
            _ => {
                return Err(ProvisionError::deployment(
                    kind.clone(),
                    name,
                    "unsupported manifest kind",
                ))
            }
        };

        Ok(document)
    }

    /// The manifest used to create a group namespace.
    pub fn namespace(name: &str) -> Self {
        Self::Namespace(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Namespace(_) => "Namespace",
            Self::Deployment(_) => "Deployment",
            Self::Service(_) => "Service",
            Self::ConfigMap(_) => "ConfigMap",
            Self::Role(_) => "Role",
            Self::RoleBinding(_) => "RoleBinding",
            Self::Ingress(_) => "Ingress",
            Self::NetworkPolicy(_) => "NetworkPolicy",
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Namespace(r) => &r.metadata,
            Self::Deployment(r) => &r.metadata,
            Self::Service(r) => &r.metadata,
            Self::ConfigMap(r) => &r.metadata,
            Self::Role(r) => &r.metadata,
            Self::RoleBinding(r) => &r.metadata,
            Self::Ingress(r) => &r.metadata,
            Self::NetworkPolicy(r) => &r.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Namespace(r) => &mut r.metadata,
            Self::Deployment(r) => &mut r.metadata,
            Self::Service(r) => &mut r.metadata,
            Self::ConfigMap(r) => &mut r.metadata,
            Self::Role(r) => &mut r.metadata,
            Self::RoleBinding(r) => &mut r.metadata,
            Self::Ingress(r) => &mut r.metadata,
            Self::NetworkPolicy(r) => &mut r.metadata,
        }
    }

    /// `metadata.name`, or an empty string when unset.
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }
}

fn decode<T: DeserializeOwned>(kind: &str, name: &str, value: serde_yaml::Value) -> Result<T> {
    serde_yaml::from_value(value).map_err(|e| {
        ProvisionError::configuration_with(format!("invalid {kind} manifest '{name}'"), e)
    })
}
