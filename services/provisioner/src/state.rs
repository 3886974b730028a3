//! Application state shared across request handlers.

use std::sync::Arc;

use crate::auth::IdentityClient;
use crate::config::AuthSettings;
use crate::provision::Provisioner;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    provisioner: Provisioner,
    identity: Option<IdentityClient>,
    auth: AuthSettings,
    root_path: String,
}

impl AppState {
    pub fn new(
        provisioner: Provisioner,
        identity: Option<IdentityClient>,
        auth: AuthSettings,
        root_path: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                provisioner,
                identity,
                auth,
                root_path: root_path.into(),
            }),
        }
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.inner.provisioner
    }

    /// `None` when token validation is disabled.
    pub fn identity(&self) -> Option<&IdentityClient> {
        self.inner.identity.as_ref()
    }

    pub fn auth(&self) -> &AuthSettings {
        &self.inner.auth
    }

    pub fn root_path(&self) -> &str {
        &self.inner.root_path
    }
}
