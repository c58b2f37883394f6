//! Connection factory and the handle it produces.
//!
//! `ConnectionFactory::open` is the single entry point: it optionally
//! authenticates an SSH tunnel, builds the pool over that tunnel (or the
//! dialer registered for the direct scheme), verifies it with a round trip
//! and publishes the tunnel in the registry. Either a fully configured
//! [`ConnectionHandle`] is returned or nothing is left open.

use crate::error::{TunnelPoolError, TunnelPoolResult};
use crate::models::{DatabaseParams, PoolSettings, PoolStatus, TunnelCredential};
use crate::services::dialer::{Dial, DialerRegistry, DIRECT_SCHEME, TUNNEL_SCHEME};
use crate::services::dsn::DataSourceName;
use crate::services::naming::NamingStrategy;
use crate::services::pool::{self, Pool, PooledConnection};
use crate::services::tunnel::{TunnelDialer, TunnelTransport};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opens pooled database connections, optionally through SSH tunnels.
pub struct ConnectionFactory {
    registry: DialerRegistry,
    ping_on_open: bool,
}

impl ConnectionFactory {
    /// Create a factory with the direct TCP dialer registered.
    pub fn new() -> Self {
        Self::with_registry(DialerRegistry::new())
    }

    /// Create a factory over an existing registry.
    pub fn with_registry(registry: DialerRegistry) -> Self {
        Self { registry, ping_on_open: true }
    }

    /// Skip the `SELECT 1` round trip after building the pool.
    pub fn without_ping(mut self) -> Self {
        self.ping_on_open = false;
        self
    }

    /// The factory's dialer registry.
    pub fn registry(&self) -> &DialerRegistry {
        &self.registry
    }

    /// Open a pooled connection described by `params`, tunneled through
    /// `credential` when given.
    ///
    /// A tunneled pool always dials through the transport authenticated by
    /// this call. The transport is registered as the tunnel-scheme dialer only
    /// once the handle is ready, so a failed open leaves the registry as it
    /// was.
    pub async fn open(
        &self,
        params: &DatabaseParams,
        credential: Option<&TunnelCredential>,
    ) -> TunnelPoolResult<ConnectionHandle> {
        params.validate().map_err(TunnelPoolError::config)?;

        let Some(credential) = credential else {
            let dsn = DataSourceName::new(params, DIRECT_SCHEME);
            let dialer = self.registry.resolve(&dsn.scheme).ok_or_else(|| {
                TunnelPoolError::config(format!("No dialer registered for scheme '{}'", dsn.scheme))
            })?;
            return self.open_pool(params, dsn, dialer, None).await;
        };

        let dsn = DataSourceName::new(params, TUNNEL_SCHEME);
        let transport = TunnelDialer::authenticate(credential)
            .await
            .map_err(|e| e.with_context("ssh connect error"))?;
        let dialer: Arc<dyn Dial> = Arc::new(transport.clone());

        match self.open_pool(params, dsn, dialer.clone(), Some(transport.clone())).await {
            Ok(handle) => {
                self.registry.register(TUNNEL_SCHEME, dialer);
                Ok(handle)
            }
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    tracing::warn!(
                        error = %close_err,
                        "Failed to close SSH tunnel after open failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn open_pool(
        &self,
        params: &DatabaseParams,
        dsn: DataSourceName,
        dialer: Arc<dyn Dial>,
        transport: Option<TunnelTransport>,
    ) -> TunnelPoolResult<ConnectionHandle> {
        let settings = PoolSettings::from_params(params);
        let pool = pool::build_pool(&dsn, dialer, settings)?;

        if self.ping_on_open {
            if let Err(e) = ping(&pool).await {
                pool.close();
                return Err(e.into_connection("database connect error"));
            }
        }

        let reaper = CancellationToken::new();
        pool::spawn_reaper(pool.clone(), settings, reaper.clone());

        let handle = ConnectionHandle {
            id: Uuid::new_v4(),
            pool,
            transport,
            naming: NamingStrategy::from_pluralize(params.pluralize_table_names),
            settings,
            dsn: dsn.redacted(),
            connected_at: Utc::now(),
            reaper,
            closed: AtomicBool::new(false),
        };

        tracing::info!(
            handle_id = %handle.id,
            dsn = %handle.dsn,
            max_open = settings.max_open,
            max_idle = settings.max_idle,
            tunneled = handle.is_tunneled(),
            "Connection pool opened"
        );
        Ok(handle)
    }
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a no-op round trip on a pooled connection.
async fn ping(pool: &Pool) -> TunnelPoolResult<()> {
    let conn = pool::checkout(pool).await?;
    conn.execute("SELECT 1", &[]).await?;
    Ok(())
}

/// A ready-to-use connection pool, owning the SSH tunnel it runs over.
pub struct ConnectionHandle {
    id: Uuid,
    pool: Pool,
    transport: Option<TunnelTransport>,
    naming: NamingStrategy,
    settings: PoolSettings,
    dsn: String,
    connected_at: DateTime<Utc>,
    reaper: CancellationToken,
    closed: AtomicBool,
}

impl ConnectionHandle {
    /// Get the handle's unique identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get when the pool was opened.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// The DSN with the password masked.
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Resolved pool limits.
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Table naming strategy for mapped entities.
    pub fn naming(&self) -> &NamingStrategy {
        &self.naming
    }

    /// Table name for entity type `T`.
    pub fn table_name<T: ?Sized>(&self) -> String {
        self.naming.table_name_of::<T>()
    }

    /// Whether connections go through an SSH tunnel.
    pub fn is_tunneled(&self) -> bool {
        self.transport.is_some()
    }

    /// The SSH tunnel, if any.
    pub fn transport(&self) -> Option<&TunnelTransport> {
        self.transport.as_ref()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Acquire a connection from the pool.
    pub async fn get(&self) -> TunnelPoolResult<PooledConnection> {
        pool::checkout(&self.pool).await
    }

    /// Run a no-op round trip.
    pub async fn ping(&self) -> TunnelPoolResult<()> {
        ping(&self.pool).await
    }

    /// Get current pool status.
    pub fn status(&self) -> PoolStatus {
        pool::pool_status(&self.pool)
    }

    /// Close the pool, then the SSH tunnel if one is owned.
    ///
    /// Only the first call does any work; later calls return `Ok(())`.
    pub async fn close(&self) -> TunnelPoolResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.reaper.cancel();
        self.pool.close();
        tracing::info!(handle_id = %self.id, "Connection pool closed");

        if let Some(transport) = &self.transport {
            transport.close().await?;
        }
        Ok(())
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.reaper.cancel();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("dsn", &self.dsn)
            .field("transport", &self.transport)
            .field("settings", &self.settings)
            .field("closed", &self.is_closed())
            .finish()
    }
}
