//! Per-group remote execution workers on Kubernetes.
//!
//! The crate ships the `rexec-api` binary; the library surface exists for
//! integration testing and reuse.

pub mod api;
pub mod apply;
pub mod assets;
pub mod auth;
pub mod broker;
pub mod cluster;
pub mod config;
pub mod error;
pub mod manifest;
pub mod namespace;
pub mod provision;
pub mod state;

pub use error::{ProvisionError, Result};
pub use provision::{BrokerConfig, ProvisionOutcome, Provisioner};
