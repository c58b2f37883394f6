//! Database connection parameters, pool settings and pool status models.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default ceiling on open connections when none is configured.
pub const DEFAULT_MAX_OPEN_CONNECTIONS: usize = 100;
/// Default ceiling on idle connections when none is configured.
pub const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 20;
/// Idle connections older than this are dropped.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);
/// Connections are never reused after this age.
pub const MAX_LIFETIME: Duration = Duration::from_secs(7200);
/// Upper bound on establishing a single database connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_port() -> u16 {
    5432
}

/// Parameters for a PostgreSQL connection pool.
///
/// A zero `max_open_connections` or `max_idle_connections` means "unset" and
/// resolves to the defaults in [`PoolSettings::from_params`].
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseParams {
    /// Server hostname or IP, as seen from the tunnel endpoint when tunneled
    pub host: String,
    /// Login username
    pub user: String,
    /// Server port (default 5432)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login password
    #[serde(default)]
    pub password: String,
    /// Database name
    pub database: String,
    /// Maximum open connections (0 = default 100)
    #[serde(default)]
    pub max_open_connections: usize,
    /// Maximum idle connections (0 = default 20)
    #[serde(default)]
    pub max_idle_connections: usize,
    /// Map entity types to plural table names
    #[serde(default)]
    pub pluralize_table_names: bool,
    /// Seconds allowed for creating one connection (0 = default 10)
    #[serde(default)]
    pub connect_timeout_secs: u64,
}

impl DatabaseParams {
    /// Create connection parameters with required fields.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: default_port(),
            password: password.into(),
            database: database.into(),
            max_open_connections: 0,
            max_idle_connections: 0,
            pluralize_table_names: false,
            connect_timeout_secs: 0,
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the maximum number of open connections.
    pub fn with_max_open_connections(mut self, max: usize) -> Self {
        self.max_open_connections = max;
        self
    }

    /// Set the maximum number of idle connections.
    pub fn with_max_idle_connections(mut self, max: usize) -> Self {
        self.max_idle_connections = max;
        self
    }

    /// Use plural table names.
    pub fn with_pluralized_tables(mut self, pluralize: bool) -> Self {
        self.pluralize_table_names = pluralize;
        self
    }

    /// Set the deadline for creating one connection, rounded up to whole seconds.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self
    }

    /// Validate the parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Host is required".to_string());
        }
        if self.port == 0 {
            return Err("Port must be non-zero".to_string());
        }
        if self.user.is_empty() {
            return Err("User is required".to_string());
        }
        if self.database.is_empty() || self.database.len() > 63 {
            return Err("Database name must be 1-63 characters".to_string());
        }
        Ok(())
    }

    /// Get the display connection string (without password).
    pub fn display_url(&self) -> String {
        format!("postgresql://{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

impl std::fmt::Debug for DatabaseParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseParams")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("password", &"********")
            .field("database", &self.database)
            .field("max_open_connections", &self.max_open_connections)
            .field("max_idle_connections", &self.max_idle_connections)
            .field("pluralize_table_names", &self.pluralize_table_names)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Resolved pool limits and lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Ceiling on open connections
    pub max_open: usize,
    /// Ceiling on idle connections kept by the reaper
    pub max_idle: usize,
    /// Idle connections older than this are dropped
    pub idle_timeout: Duration,
    /// Connections older than this are dropped
    pub max_lifetime: Duration,
    /// Upper bound on creating a single connection
    pub connect_timeout: Duration,
}

impl PoolSettings {
    /// Resolve settings from connection parameters, applying defaults for unset limits.
    pub fn from_params(params: &DatabaseParams) -> Self {
        let max_open = match params.max_open_connections {
            0 => DEFAULT_MAX_OPEN_CONNECTIONS,
            n => n,
        };
        let max_idle = match params.max_idle_connections {
            0 => DEFAULT_MAX_IDLE_CONNECTIONS,
            n => n,
        };
        let connect_timeout = match params.connect_timeout_secs {
            0 => CONNECT_TIMEOUT,
            secs => Duration::from_secs(secs),
        };
        Self {
            max_open,
            max_idle,
            idle_timeout: IDLE_TIMEOUT,
            max_lifetime: MAX_LIFETIME,
            connect_timeout,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: DEFAULT_MAX_OPEN_CONNECTIONS,
            max_idle: DEFAULT_MAX_IDLE_CONNECTIONS,
            idle_timeout: IDLE_TIMEOUT,
            max_lifetime: MAX_LIFETIME,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

/// Connection pool status.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Maximum pool capacity
    pub max_size: usize,
    /// Current connections (idle + active)
    pub size: usize,
    /// Idle connections (can be negative during contention)
    pub available: isize,
    /// Tasks waiting for connections
    pub waiting: usize,
}

impl PoolStatus {
    /// Check if the pool is healthy.
    pub fn is_healthy(&self) -> bool {
        self.available >= 0 && self.waiting == 0
    }

    /// Get the number of active (in-use) connections.
    pub fn active(&self) -> usize {
        self.size.saturating_sub(self.available.max(0) as usize)
    }

    /// Get pool utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.active() as f64 / self.max_size as f64) * 100.0
        }
    }
}
