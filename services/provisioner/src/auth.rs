//! Caller identity.
//!
//! Bearer tokens are validated by an external identity service; this module
//! only calls it and interprets the answer.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AuthSettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    /// The identity service failed or answered unexpectedly.
    #[error("{0}")]
    Upstream(String),
}

/// A validated caller.
#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    #[serde(default = "unknown_subject")]
    pub sub: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub groups: Vec<GroupClaim>,
}

fn unknown_subject() -> String {
    "unknown".to_string()
}

/// Group membership as reported by the identity service.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GroupClaim {
    Name(String),
    Object {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    Other(Value),
}

impl GroupClaim {
    /// Lower-cased group name without a leading `/`.
    pub fn normalized(&self) -> Option<String> {
        let raw = match self {
            Self::Name(name) => name.as_str(),
            Self::Object { path, name } => path
                .as_deref()
                .filter(|p| !p.is_empty())
                .or(name.as_deref())?,
            Self::Other(_) => return None,
        };
        Some(normalize_group(raw)).filter(|g| !g.is_empty())
    }
}

fn normalize_group(name: &str) -> String {
    name.trim().to_lowercase().trim_start_matches('/').to_string()
}

/// Client for the token validation endpoint.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    client: reqwest::Client,
    url: String,
}

impl IdentityClient {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthorized("token is required".to_string()));
        }

        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Identity service request failed");
                AuthError::Unauthorized(format!("auth service unavailable: {e}"))
            })?;

        let status = response.status().as_u16();
        match status {
            200 => {}
            401 => return Err(AuthError::Unauthorized("invalid or expired token".to_string())),
            403 => {
                return Err(AuthError::Forbidden(
                    "token does not have sufficient permissions".to_string(),
                ))
            }
            500 => return Err(AuthError::Upstream("authentication service error".to_string())),
            other => {
                return Err(AuthError::Upstream(format!(
                    "authentication service returned unexpected response (HTTP {other})"
                )))
            }
        }

        let body: Value = response.json().await.map_err(|e| {
            AuthError::Upstream(format!("authentication service returned invalid body: {e}"))
        })?;

        if let Some(error) = body.get("error") {
            let detail = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            return Err(AuthError::Unauthorized(format!("token validation failed: {detail}")));
        }

        let identity: Identity = serde_json::from_value(body).map_err(|e| {
            AuthError::Upstream(format!("authentication service returned invalid body: {e}"))
        })?;
        debug!(sub = %identity.sub, groups = identity.groups.len(), "Token validated");
        Ok(identity)
    }
}

/// Allowed groups from settings, normalized.
pub fn allowed_groups(settings: &AuthSettings) -> Vec<String> {
    settings
        .group_names
        .iter()
        .map(|g| normalize_group(g))
        .filter(|g| !g.is_empty())
        .collect()
}

/// The first of the caller's groups that is allowed, or `None` when
/// group-based access is off.
pub fn require_group_membership(
    identity: &Identity,
    settings: &AuthSettings,
) -> Result<Option<String>, AuthError> {
    if !settings.enable_group_based_access {
        return Ok(None);
    }

    let allowed = allowed_groups(settings);
    if allowed.is_empty() {
        return Err(AuthError::Forbidden(
            "group-based access is enabled but no groups are configured".to_string(),
        ));
    }

    identity
        .groups
        .iter()
        .filter_map(GroupClaim::normalized)
        .find(|g| allowed.contains(g))
        .map(Some)
        .ok_or_else(|| {
            AuthError::Forbidden("access forbidden: user is not a member of an allowed group".to_string())
        })
}
