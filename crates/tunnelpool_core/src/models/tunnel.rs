//! SSH tunnel credential models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for connecting and authenticating to the SSH server.
pub const DEFAULT_TUNNEL_TIMEOUT: Duration = Duration::from_secs(15);

fn default_ssh_port() -> u16 {
    22
}

/// SSH authentication method.
///
/// Parsed leniently so an unknown method survives deserialization and is
/// rejected when the tunnel is authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TunnelAuthMethod {
    /// Password authentication; the credential secret is the password
    Password,
    /// Private key authentication; the credential secret is the key file path
    KeyFile,
    /// Any other method name
    Unsupported(String),
}

impl TunnelAuthMethod {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Password => "password",
            Self::KeyFile => "key",
            Self::Unsupported(name) => name,
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "password" => Self::Password,
            "key" | "keyfile" | "key_file" | "key-file" => Self::KeyFile,
            _ => Self::Unsupported(s.to_string()),
        }
    }
}

impl From<String> for TunnelAuthMethod {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<TunnelAuthMethod> for String {
    fn from(method: TunnelAuthMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for TunnelAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the SSH server's host key is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Accept any host key without verification
    #[default]
    AcceptAny,
    /// Verify against an OpenSSH known_hosts file (default `~/.ssh/known_hosts`)
    KnownHosts {
        /// Custom known_hosts path
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

/// Credentials for the SSH bastion a database connection is tunneled through.
#[derive(Clone, Serialize, Deserialize)]
pub struct TunnelCredential {
    /// SSH server hostname
    pub host: String,
    /// SSH username
    pub user: String,
    /// SSH server port (default 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Authentication method
    pub auth_method: TunnelAuthMethod,
    /// Password, or private key file path for key authentication
    #[serde(default)]
    pub secret: String,
    /// Passphrase for an encrypted private key
    #[serde(default)]
    pub key_passphrase: Option<String>,
    /// Connect and authenticate timeout in seconds (0 = default 15)
    #[serde(default)]
    pub timeout_secs: u64,
    /// Host key verification policy
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
}

impl TunnelCredential {
    /// Create a password-authenticated credential.
    pub fn password(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, user, TunnelAuthMethod::Password, password)
    }

    /// Create a key-file-authenticated credential.
    pub fn key_file(
        host: impl Into<String>,
        user: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        let key_path = key_path.into().to_string_lossy().into_owned();
        Self::new(host, user, TunnelAuthMethod::KeyFile, key_path)
    }

    /// Create a credential with an explicit method.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        auth_method: TunnelAuthMethod,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: default_ssh_port(),
            auth_method,
            secret: secret.into(),
            key_passphrase: None,
            timeout_secs: 0,
            host_key_policy: HostKeyPolicy::default(),
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the key passphrase.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.key_passphrase = Some(passphrase.into());
        self
    }

    /// Set the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Set the host key policy.
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// Effective connect timeout.
    pub fn timeout(&self) -> Duration {
        match self.timeout_secs {
            0 => DEFAULT_TUNNEL_TIMEOUT,
            secs => Duration::from_secs(secs),
        }
    }

    /// The SSH endpoint as `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for TunnelCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret: &dyn fmt::Debug = match self.auth_method {
            TunnelAuthMethod::KeyFile => &self.secret,
            _ => &"********",
        };
        f.debug_struct("TunnelCredential")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("auth_method", &self.auth_method)
            .field("secret", secret)
            .field("timeout_secs", &self.timeout_secs)
            .field("host_key_policy", &self.host_key_policy)
            .finish()
    }
}
