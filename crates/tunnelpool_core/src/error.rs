//! Error types for tunnelpool.
//!
//! Every failure in tunnel authentication, pool construction and pool checkout
//! is reported through [`TunnelPoolError`]. Nested failures are wrapped with a
//! descriptive prefix via [`TunnelPoolError::with_context`], which keeps the
//! error kind intact, or via [`TunnelPoolError::into_connection`], which
//! reports them as a connection failure caused by the original error.

use std::time::Duration;
use thiserror::Error;

/// Boxed error source.
type Source = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the crate.
pub type TunnelPoolResult<T> = Result<T, TunnelPoolError>;

/// Main error type for tunnelpool.
#[derive(Debug, Error)]
pub enum TunnelPoolError {
    /// Invalid or unsupported configuration (e.g. unknown SSH auth method).
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// A credential could not be decoded (e.g. malformed private key).
    #[error("Credential error: {message}")]
    Credential {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Source>,
    },

    /// Local I/O failure, such as an unreadable key file.
    #[error("IO error: {message}")]
    Io {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<std::io::Error>,
    },

    /// An operation did not finish within its deadline.
    #[error("Timeout: {message}")]
    Timeout {
        /// Human-readable error message.
        message: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// SSH tunnel failure (connect, authenticate or channel open).
    #[error("Transport error: {message}")]
    Transport {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Source>,
    },

    /// Database connection failed.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Source>,
    },

    /// The underlying pool could not be built or accessed.
    #[error("Pool access error: {message}")]
    PoolAccess {
        /// Human-readable error message.
        message: String,
    },

    /// The database rejected the login.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// Query execution error with PostgreSQL-specific details.
    #[error("{message}")]
    Query {
        /// PostgreSQL error message.
        message: String,
        /// Additional detail from PostgreSQL.
        detail: Option<String>,
        /// PostgreSQL hint.
        hint: Option<String>,
        /// PostgreSQL error code (e.g., "42P01").
        code: Option<String>,
    },
}

impl TunnelPoolError {
    // ========== Constructors ==========

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new credential error.
    pub fn credential(message: impl Into<String>) -> Self {
        Self::Credential { message: message.into(), source: None }
    }

    /// Create a new credential error with source.
    pub fn credential_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Credential { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new I/O error with source.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { message: message.into(), source: Some(source) }
    }

    /// Create a new timeout error.
    pub fn timeout(message: impl Into<String>, after: Duration) -> Self {
        Self::Timeout { message: message.into(), after }
    }

    /// Create a new transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    /// Create a new transport error with source.
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new pool access error.
    pub fn pool_access(message: impl Into<String>) -> Self {
        Self::PoolAccess { message: message.into() }
    }

    // ========== Methods ==========

    /// Prefix the message with `context`, keeping the error kind and source.
    pub fn with_context(mut self, context: &str) -> Self {
        let message = match &mut self {
            Self::Config { message }
            | Self::Credential { message, .. }
            | Self::Io { message, .. }
            | Self::Timeout { message, .. }
            | Self::Transport { message, .. }
            | Self::Connection { message, .. }
            | Self::PoolAccess { message }
            | Self::Authentication { message, .. }
            | Self::Query { message, .. } => message,
        };
        *message = format!("{context}: {message}");
        self
    }

    /// Wrap as a [`Connection`](Self::Connection) error prefixed with
    /// `context`, keeping `self` as the source.
    pub fn into_connection(self, context: &str) -> Self {
        let message = format!("{context}: {}", self.message());
        Self::Connection { message, source: Some(Box::new(self)) }
    }

    /// Get the message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Config { message }
            | Self::Credential { message, .. }
            | Self::Io { message, .. }
            | Self::Timeout { message, .. }
            | Self::Transport { message, .. }
            | Self::Connection { message, .. }
            | Self::PoolAccess { message }
            | Self::Authentication { message, .. }
            | Self::Query { message, .. } => message,
        }
    }

    /// Check if this error is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "Config",
            Self::Credential { .. } => "Credential",
            Self::Io { .. } => "IO",
            Self::Timeout { .. } => "Timeout",
            Self::Transport { .. } => "Transport",
            Self::Connection { .. } => "Connection",
            Self::PoolAccess { .. } => "Pool",
            Self::Authentication { .. } => "Authentication",
            Self::Query { .. } => "Query",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Config { .. } => Some("Check the connection and tunnel settings"),
            Self::Credential { .. } => {
                Some("The key may be encrypted - provide the passphrase")
            }
            Self::Io { .. } => Some("Check that the file exists and is readable"),
            Self::Timeout { .. } => Some("Verify the SSH server is running and reachable"),
            Self::Transport { .. } => Some("Check your SSH credentials and server settings"),
            Self::Connection { .. } => Some("Check that the database server is running"),
            Self::PoolAccess { .. } => Some("Check the pool size settings"),
            Self::Authentication { hint, .. } => hint.as_deref(),
            Self::Query { hint, .. } => hint.as_deref(),
        }
    }

    /// Get PostgreSQL error code (if applicable).
    pub fn pg_code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to TunnelPoolError.
impl From<tokio_postgres::Error> for TunnelPoolError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let code_str = db_err.code().code();
            match code_str {
                "28P01" => {
                    return TunnelPoolError::Authentication {
                        message,
                        hint: Some("Invalid password - check your credentials".to_string()),
                    }
                }
                "28000" => {
                    return TunnelPoolError::Authentication {
                        message,
                        hint: Some(
                            "Authentication failed - check username and permissions".to_string(),
                        ),
                    }
                }
                _ if code_str.starts_with("08") => {
                    return TunnelPoolError::Connection { message, source: Some(Box::new(err)) }
                }
                _ => {
                    return TunnelPoolError::Query {
                        message,
                        detail: db_err.detail().map(String::from),
                        hint: db_err.hint().map(String::from),
                        code: Some(code_str.to_string()),
                    }
                }
            }
        }

        if err.is_closed() {
            return TunnelPoolError::Connection {
                message: "Connection closed".to_string(),
                source: Some(Box::new(err)),
            };
        }

        TunnelPoolError::Connection { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Convert from std::io::Error to TunnelPoolError.
impl From<std::io::Error> for TunnelPoolError {
    fn from(err: std::io::Error) -> Self {
        TunnelPoolError::Io { message: err.to_string(), source: Some(err) }
    }
}

/// Convert from serde_json::Error to TunnelPoolError.
impl From<serde_json::Error> for TunnelPoolError {
    fn from(err: serde_json::Error) -> Self {
        TunnelPoolError::Config { message: format!("Invalid configuration file: {err}") }
    }
}
