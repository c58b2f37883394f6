// SSH tunnel service for forwarding database connections through a bastion

use crate::error::{TunnelPoolError, TunnelPoolResult};
use crate::models::{HostKeyPolicy, TunnelAuthMethod, TunnelCredential};
use crate::services::dialer::{BoxedStream, Dial};
use async_trait::async_trait;
use russh::client;
use russh::Disconnect;
use russh_keys::key::KeyPair;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// SSH client handler for russh.
struct SshClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

#[async_trait]
impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                tracing::warn!(
                    host = %self.host,
                    port = self.port,
                    "Accepting SSH host key without verification"
                );
                Ok(true)
            }
            HostKeyPolicy::KnownHosts { path } => {
                let verified = match path {
                    Some(path) => russh_keys::check_known_hosts_path(
                        &self.host,
                        self.port,
                        server_public_key,
                        path,
                    ),
                    None => russh_keys::check_known_hosts(&self.host, self.port, server_public_key),
                };
                match verified {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        tracing::warn!(host = %self.host, "SSH host key not found in known_hosts");
                        Ok(false)
                    }
                    Err(e) => {
                        tracing::warn!(host = %self.host, error = %e, "SSH host key verification failed");
                        Ok(false)
                    }
                }
            }
        }
    }
}

/// An authenticated SSH session able to open forwarded streams.
///
/// Cheap to clone; all clones share one session. Dialing takes `&self`, so
/// the pool may open several channels concurrently.
#[derive(Clone)]
pub struct TunnelTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    handle: client::Handle<SshClientHandler>,
    endpoint: String,
    user: String,
    closed: AtomicBool,
}

impl TunnelTransport {
    /// The SSH endpoint (`host:port`) this transport is connected to.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.handle.is_closed()
    }

    /// Open a `direct-tcpip` channel to `address` (`host:port`).
    pub async fn dial(&self, address: &str) -> TunnelPoolResult<BoxedStream> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TunnelPoolError::transport("SSH tunnel is closed"));
        }

        let (host, port) = split_address(address)?;
        let channel = self
            .inner
            .handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| {
                TunnelPoolError::transport_with_source(
                    format!("Failed to open SSH channel to {address}"),
                    e,
                )
            })?;

        tracing::debug!(
            endpoint = %self.inner.endpoint,
            target = %address,
            "SSH channel opened"
        );
        Ok(Box::pin(channel.into_stream()))
    }

    /// Disconnect the SSH session. Calling this more than once is a no-op.
    pub async fn close(&self) -> TunnelPoolResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self
            .inner
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;

        tracing::info!(
            endpoint = %self.inner.endpoint,
            user = %self.inner.user,
            "SSH tunnel closed"
        );

        match result {
            Ok(()) => Ok(()),
            // The server may already have dropped the session.
            Err(_) if self.inner.handle.is_closed() => Ok(()),
            Err(e) => Err(TunnelPoolError::transport_with_source("Failed to close SSH tunnel", e)),
        }
    }
}

#[async_trait]
impl Dial for TunnelTransport {
    async fn dial(&self, address: &str) -> TunnelPoolResult<BoxedStream> {
        TunnelTransport::dial(self, address).await
    }
}

impl std::fmt::Debug for TunnelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelTransport")
            .field("endpoint", &self.inner.endpoint)
            .field("user", &self.inner.user)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Authenticates SSH tunnels.
pub struct TunnelDialer;

impl TunnelDialer {
    /// Connect and authenticate to the SSH server described by `credential`.
    ///
    /// The private key (if any) is loaded before any network activity. The
    /// connect and authentication steps together must finish within
    /// [`TunnelCredential::timeout`].
    pub async fn authenticate(credential: &TunnelCredential) -> TunnelPoolResult<TunnelTransport> {
        let auth = match &credential.auth_method {
            TunnelAuthMethod::Password => SshAuth::Password(credential.secret.clone()),
            TunnelAuthMethod::KeyFile => SshAuth::Key(
                Self::load_private_key(&credential.secret, credential.key_passphrase.as_deref())
                    .await?,
            ),
            TunnelAuthMethod::Unsupported(name) => {
                return Err(TunnelPoolError::config(format!("unknown ssh auth method: {name}")));
            }
        };

        let timeout = credential.timeout();
        tracing::info!(
            endpoint = %credential.endpoint(),
            user = %credential.user,
            auth_method = %credential.auth_method,
            "Establishing SSH tunnel"
        );

        let handle = tokio::time::timeout(timeout, Self::connect_ssh(credential, auth))
            .await
            .map_err(|_| {
                TunnelPoolError::timeout(
                    format!(
                        "SSH connection to {} did not complete within {:?}",
                        credential.endpoint(),
                        timeout
                    ),
                    timeout,
                )
            })??;

        tracing::info!(
            "SSH authentication successful for {}@{}",
            credential.user,
            credential.host
        );

        Ok(TunnelTransport {
            inner: Arc::new(TransportInner {
                handle,
                endpoint: credential.endpoint(),
                user: credential.user.clone(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Connect to the SSH server and authenticate.
    async fn connect_ssh(
        credential: &TunnelCredential,
        auth: SshAuth,
    ) -> TunnelPoolResult<client::Handle<SshClientHandler>> {
        let config = client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let config = Arc::new(config);

        let handler = SshClientHandler {
            host: credential.host.clone(),
            port: credential.port,
            policy: credential.host_key_policy.clone(),
        };

        let mut handle =
            client::connect(config, (credential.host.as_str(), credential.port), handler)
                .await
                .map_err(|e| {
                    TunnelPoolError::transport_with_source(
                        format!("Failed to connect to SSH server {}", credential.endpoint()),
                        e,
                    )
                })?;

        let authenticated = match auth {
            SshAuth::Password(password) => handle
                .authenticate_password(&credential.user, password)
                .await
                .map_err(|e| {
                    TunnelPoolError::transport_with_source("SSH password authentication failed", e)
                })?,
            SshAuth::Key(key) => {
                handle.authenticate_publickey(&credential.user, key).await.map_err(|e| {
                    TunnelPoolError::transport_with_source("SSH key authentication failed", e)
                })?
            }
        };

        if !authenticated {
            return Err(TunnelPoolError::transport(format!(
                "SSH server rejected credentials for {}@{}",
                credential.user, credential.host
            )));
        }

        Ok(handle)
    }

    /// Load a private key from a file.
    async fn load_private_key(path: &str, passphrase: Option<&str>) -> TunnelPoolResult<Arc<KeyPair>> {
        let path = expand_home(path);
        let key_data = tokio::fs::read(&path).await.map_err(|e| {
            TunnelPoolError::io(format!("Failed to read SSH key file {}", path.display()), e)
        })?;

        let key = russh_keys::decode_secret_key(&String::from_utf8_lossy(&key_data), passphrase)
            .map_err(|e| {
                let message = if passphrase.is_some() {
                    "Failed to decrypt SSH key"
                } else {
                    "Failed to parse SSH key"
                };
                TunnelPoolError::credential_with_source(
                    format!("{message} {}", path.display()),
                    e,
                )
            })?;

        Ok(Arc::new(key))
    }
}

/// Secret material for one authentication attempt.
enum SshAuth {
    Password(String),
    Key(Arc<KeyPair>),
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
fn split_address(address: &str) -> TunnelPoolResult<(&str, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| TunnelPoolError::config(format!("Invalid dial address: {address}")))?;
    let port = port
        .parse()
        .map_err(|_| TunnelPoolError::config(format!("Invalid port in dial address: {address}")))?;
    Ok((host.trim_start_matches('[').trim_end_matches(']'), port))
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &str) -> std::path::PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => Path::new(path).to_path_buf(),
    }
}
