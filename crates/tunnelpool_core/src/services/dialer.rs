//! Network dialers and the per-factory dialer registry.
//!
//! The driver never opens sockets itself: each pooled connection is created
//! from a stream produced by the [`Dial`] registered for the DSN scheme.

use crate::error::{TunnelPoolError, TunnelPoolResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Scheme for direct TCP connections.
pub const DIRECT_SCHEME: &str = "tcp";
/// Scheme for connections forwarded through an SSH tunnel.
pub const TUNNEL_SCHEME: &str = "postgres+ssh";

/// A bidirectional byte stream the driver can speak PostgreSQL over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> AsyncStream for T {}

/// Type-erased stream returned by a dialer.
pub type BoxedStream = Pin<Box<dyn AsyncStream>>;

/// Opens a stream to `host:port`.
#[async_trait]
pub trait Dial: Send + Sync {
    /// Open a new stream to `address` (`host:port`).
    async fn dial(&self, address: &str) -> TunnelPoolResult<BoxedStream>;
}

/// Dials plain TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl Dial for TcpDialer {
    async fn dial(&self, address: &str) -> TunnelPoolResult<BoxedStream> {
        let stream = TcpStream::connect(address).await.map_err(|e| {
            TunnelPoolError::connection_with_source(format!("Failed to reach {address}"), e)
        })?;
        stream.set_nodelay(true)?;
        tracing::trace!(address = %address, "Direct TCP stream opened");
        Ok(Box::pin(stream))
    }
}

/// Maps DSN schemes to dialers.
///
/// Scoped to one [`ConnectionFactory`](crate::services::ConnectionFactory);
/// registering a scheme again replaces the previous dialer.
pub struct DialerRegistry {
    dialers: RwLock<HashMap<String, Arc<dyn Dial>>>,
}

impl DialerRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self { dialers: RwLock::new(HashMap::new()) }
    }

    /// Create a registry with the direct TCP dialer registered.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(DIRECT_SCHEME, Arc::new(TcpDialer));
        registry
    }

    /// Register `dialer` for `scheme`, replacing any previous entry.
    pub fn register(&self, scheme: impl Into<String>, dialer: Arc<dyn Dial>) {
        let scheme = scheme.into();
        let replaced = self.dialers.write().insert(scheme.clone(), dialer).is_some();
        tracing::debug!(scheme = %scheme, replaced, "Dialer registered");
    }

    /// Remove the dialer for `scheme`.
    pub fn unregister(&self, scheme: &str) -> Option<Arc<dyn Dial>> {
        self.dialers.write().remove(scheme)
    }

    /// Look up the dialer for `scheme`.
    pub fn resolve(&self, scheme: &str) -> Option<Arc<dyn Dial>> {
        self.dialers.read().get(scheme).cloned()
    }

    /// Check whether `scheme` has a dialer.
    pub fn contains(&self, scheme: &str) -> bool {
        self.dialers.read().contains_key(scheme)
    }

    /// Registered scheme names, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<_> = self.dialers.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

impl Default for DialerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
