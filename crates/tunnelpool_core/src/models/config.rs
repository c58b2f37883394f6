//! Configuration file model.
//!
//! A configuration file is JSON holding the database parameters and an
//! optional tunnel credential:
//!
//! ```json
//! {
//!   "database": { "host": "127.0.0.1", "user": "app", "database": "orders" },
//!   "tunnel": { "host": "bastion", "user": "ubuntu", "auth_method": "key", "secret": "~/.ssh/id_ed25519" }
//! }
//! ```
//!
//! Secrets may be supplied through `TUNNELPOOL_DB_PASSWORD` and
//! `TUNNELPOOL_SSH_SECRET` instead of the file.

use crate::error::{TunnelPoolError, TunnelPoolResult};
use crate::models::{DatabaseParams, TunnelCredential};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding the database password.
pub const DB_PASSWORD_ENV: &str = "TUNNELPOOL_DB_PASSWORD";
/// Environment variable overriding the SSH password or key path.
pub const SSH_SECRET_ENV: &str = "TUNNELPOOL_SSH_SECRET";

/// Everything needed to open a connection handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Database connection parameters
    pub database: DatabaseParams,
    /// Optional SSH tunnel
    #[serde(default)]
    pub tunnel: Option<TunnelCredential>,
}

impl ClientConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> TunnelPoolResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.database.validate().map_err(TunnelPoolError::config)?;
        Ok(config)
    }

    /// Load a configuration file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> TunnelPoolResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TunnelPoolError::io(format!("Failed to read config file {}", path.display()), e)
        })?;

        let mut config = Self::from_json(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());

        tracing::debug!(
            path = %path.display(),
            database = %config.database.display_url(),
            tunneled = config.tunnel.is_some(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Replace secrets with values from `lookup` where present.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup(DB_PASSWORD_ENV) {
            self.database.password = password;
        }
        if let (Some(tunnel), Some(secret)) = (self.tunnel.as_mut(), lookup(SSH_SECRET_ENV)) {
            tunnel.secret = secret;
        }
    }
}
