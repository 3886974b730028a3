//! Service configuration.
//!
//! Everything is read from environment variables. Provisioning settings use
//! the `REXEC_` prefix, identity settings `AUTH_`, and the HTTP root path
//! `APP_ROOT_PATH`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

pub const KUBECONFIG_MOUNT_PATH_VAR: &str = "REXEC_KUBECONFIG_MOUNT_PATH";
pub const KUBECONFIG_LOCAL_PATH_VAR: &str = "REXEC_KUBECONFIG_LOCAL_PATH";

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// Path prefix the API is served under, used when advertising its URL.
    pub root_path: String,
    pub provisioner: ProvisionerSettings,
    pub auth: AuthSettings,
}

/// Settings for the provisioning core.
#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    /// First credential candidate (mounted into the container).
    pub kubeconfig_mount_path: Option<PathBuf>,
    /// Second credential candidate (developer machine).
    pub kubeconfig_local_path: Option<PathBuf>,
    pub namespace_prefix: String,
    pub namespace_wait_timeout: Duration,
    pub broker: BrokerSettings,
    /// Name of the worker container inside the Deployment.
    pub container_name: String,
    /// Image repository; the runtime version becomes the tag.
    pub runtime_image: String,
    pub deployment_manifest_name: String,
    pub builtin_requirements_name: String,
    pub assets_dir: PathBuf,
}

/// Where the shared broker lives and how clients reach it.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub service_name: String,
    pub namespace: String,
    pub port: u16,
    /// NodePort service used to discover the external endpoint.
    pub external_service_name: Option<String>,
    pub external_host: Option<String>,
    pub external_port: Option<u16>,
}

/// Identity provider settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Token validation endpoint. `None` disables token checks.
    pub api_url: Option<String>,
    pub enable_group_based_access: bool,
    pub group_names: Vec<String>,
    /// Group used when group-based access is disabled.
    pub default_group_id: String,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            kubeconfig_mount_path: Some(PathBuf::from("/code/env_variables/.kubeconfig")),
            kubeconfig_local_path: None,
            namespace_prefix: "rexec-server-".to_string(),
            namespace_wait_timeout: Duration::from_secs(60),
            broker: BrokerSettings::default(),
            container_name: "rexec-server".to_string(),
            runtime_image: "python".to_string(),
            deployment_manifest_name: "rexec-server-deployment.yaml".to_string(),
            builtin_requirements_name: "requirements.txt".to_string(),
            assets_dir: PathBuf::from("assets"),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            service_name: "rexec-broker-internal-ip".to_string(),
            namespace: "rexec-broker".to_string(),
            port: 5560,
            external_service_name: Some("rexec-broker-external-ip".to_string()),
            external_host: None,
            external_port: None,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            api_url: None,
            enable_group_based_access: false,
            group_names: Vec::new(),
            default_group_id: "test-group".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = ProvisionerSettings::default();
        let broker_defaults = BrokerSettings::default();
        let auth_defaults = AuthSettings::default();

        let listen_addr = env
            .get("REXEC_LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".to_string())
            .parse()
            .context("REXEC_LISTEN_ADDR is not a socket address")?;

        let log_level = env
            .get("REXEC_LOG_LEVEL")
            .unwrap_or_else(|| "info".to_string());

        let root_path = env.get("APP_ROOT_PATH").unwrap_or_default();

        let broker = BrokerSettings {
            service_name: env
                .get("REXEC_BROKER_SERVICE_NAME")
                .unwrap_or(broker_defaults.service_name),
            namespace: env
                .get("REXEC_BROKER_NAMESPACE")
                .unwrap_or(broker_defaults.namespace),
            port: env.parse("REXEC_BROKER_PORT")?.unwrap_or(broker_defaults.port),
            // An explicitly empty value disables discovery.
            external_service_name: match env.raw("REXEC_BROKER_EXTERNAL_SERVICE_NAME") {
                Some(value) if value.trim().is_empty() => None,
                Some(value) => Some(value.trim().to_string()),
                None => broker_defaults.external_service_name,
            },
            external_host: env.get("REXEC_BROKER_EXTERNAL_HOST"),
            external_port: env.parse("REXEC_BROKER_EXTERNAL_PORT")?,
        };

        let provisioner = ProvisionerSettings {
            kubeconfig_mount_path: match env.raw(KUBECONFIG_MOUNT_PATH_VAR) {
                Some(value) if value.trim().is_empty() => None,
                Some(value) => Some(PathBuf::from(value.trim())),
                None => defaults.kubeconfig_mount_path,
            },
            kubeconfig_local_path: env.get(KUBECONFIG_LOCAL_PATH_VAR).map(PathBuf::from),
            namespace_prefix: env
                .get("REXEC_NAMESPACE_PREFIX")
                .unwrap_or(defaults.namespace_prefix),
            namespace_wait_timeout: env
                .parse("REXEC_NAMESPACE_WAIT_TIMEOUT_SECONDS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.namespace_wait_timeout),
            broker,
            container_name: env
                .get("REXEC_CONTAINER_NAME")
                .unwrap_or(defaults.container_name),
            runtime_image: env
                .get("REXEC_RUNTIME_IMAGE")
                .unwrap_or(defaults.runtime_image),
            deployment_manifest_name: env
                .get("REXEC_DEPLOYMENT_MANIFEST_NAME")
                .unwrap_or(defaults.deployment_manifest_name),
            builtin_requirements_name: env
                .get("REXEC_BUILTIN_REQUIREMENTS_NAME")
                .unwrap_or(defaults.builtin_requirements_name),
            assets_dir: env
                .get("REXEC_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_dir),
        };

        let auth = AuthSettings {
            api_url: env.get("AUTH_API_URL"),
            enable_group_based_access: env
                .get("AUTH_ENABLE_GROUP_BASED_ACCESS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            group_names: env
                .get("AUTH_GROUP_NAMES")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|g| !g.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            default_group_id: env
                .get("REXEC_DEFAULT_GROUP_ID")
                .unwrap_or(auth_defaults.default_group_id),
        };

        Ok(Self {
            listen_addr,
            log_level,
            root_path,
            provisioner,
            auth,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    /// Trimmed, non-empty value.
    fn get(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.get(key)
            .map(|v| v.parse::<T>().with_context(|| format!("{key} has invalid value '{v}'")))
            .transpose()
    }
}
