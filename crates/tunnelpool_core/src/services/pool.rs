//! Database connection pooling with deadpool over pluggable dialers.
//!
//! Provides:
//! - A deadpool manager creating `tokio-postgres` clients on dialed streams
//! - Recycling that retires idle and over-age connections, with idle time
//!   counted from the moment a connection is handed back
//! - An idle reaper bounding the number of idle connections

use crate::error::{TunnelPoolError, TunnelPoolResult};
use crate::models::{PoolSettings, PoolStatus};
use crate::services::dialer::Dial;
use crate::services::dsn::DataSourceName;

use deadpool::managed::{self, Metrics, RecycleError, RecycleResult};
use deadpool::Runtime;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;

/// Pool of `tokio-postgres` clients.
pub type Pool = managed::Pool<DialManager>;

/// Application name reported to PostgreSQL.
pub const APPLICATION_NAME: &str = "tunnelpool";

/// How often the idle reaper runs.
pub const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// A pooled `tokio-postgres` client and the moment it last became idle.
pub struct PgClient {
    client: tokio_postgres::Client,
    idle_since: Instant,
}

impl PgClient {
    /// How long the client has sat unused in the pool.
    pub fn idle_for(&self) -> Duration {
        self.idle_since.elapsed()
    }
}

impl std::ops::Deref for PgClient {
    type Target = tokio_postgres::Client;

    fn deref(&self) -> &tokio_postgres::Client {
        &self.client
    }
}

/// Creates clients by dialing through a [`Dial`] and handing the stream to
/// the driver.
pub struct DialManager {
    pg_config: tokio_postgres::Config,
    address: String,
    dialer: Arc<dyn Dial>,
    settings: PoolSettings,
}

impl DialManager {
    /// Create a manager for `dsn` dialed through `dialer`.
    pub fn new(dsn: &DataSourceName, dialer: Arc<dyn Dial>, settings: PoolSettings) -> Self {
        let mut pg_config = dsn.to_pg_config(APPLICATION_NAME);
        pg_config.connect_timeout(settings.connect_timeout);
        Self { pg_config, address: dsn.address(), dialer, settings }
    }
}

impl managed::Manager for DialManager {
    type Type = PgClient;
    type Error = TunnelPoolError;

    async fn create(&self) -> Result<PgClient, TunnelPoolError> {
        let stream = self.dialer.dial(&self.address).await?;
        let (client, connection) = self.pg_config.connect_raw(stream, NoTls).await?;

        let address = self.address.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(address = %address, error = %e, "Database connection terminated");
            }
        });

        tracing::debug!(address = %self.address, "Database connection created");
        Ok(PgClient { client, idle_since: Instant::now() })
    }

    async fn recycle(
        &self,
        client: &mut PgClient,
        metrics: &Metrics,
    ) -> RecycleResult<TunnelPoolError> {
        if client.is_closed() {
            return Err(RecycleError::Backend(TunnelPoolError::connection("Connection closed")));
        }
        if metrics.age() >= self.settings.max_lifetime {
            return Err(RecycleError::Backend(TunnelPoolError::connection(
                "Connection exceeded its maximum lifetime",
            )));
        }
        if client.idle_for() >= self.settings.idle_timeout {
            return Err(RecycleError::Backend(TunnelPoolError::connection(
                "Connection exceeded its idle timeout",
            )));
        }
        Ok(())
    }
}

/// Build a pool for `dsn`. No connection is made until the first checkout.
pub fn build_pool(
    dsn: &DataSourceName,
    dialer: Arc<dyn Dial>,
    settings: PoolSettings,
) -> TunnelPoolResult<Pool> {
    let manager = DialManager::new(dsn, dialer, settings);

    Pool::builder(manager)
        .max_size(settings.max_open)
        .create_timeout(Some(settings.connect_timeout))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| TunnelPoolError::pool_access(format!("Failed to create pool: {e}")))
}

/// Acquire a client, mapping pool errors onto crate errors.
pub async fn checkout(pool: &Pool) -> TunnelPoolResult<PooledConnection> {
    pool.get().await.map(|client| PooledConnection { client }).map_err(|e| match e {
        managed::PoolError::Backend(err) => err,
        managed::PoolError::Timeout(kind) => TunnelPoolError::timeout(
            format!("Timed out waiting for a database connection ({kind:?})"),
            pool.timeouts().create.unwrap_or_default(),
        ),
        managed::PoolError::Closed => TunnelPoolError::connection("Connection pool is closed"),
        other => TunnelPoolError::connection(format!("Failed to acquire connection: {other}")),
    })
}

/// Drop idle connections past their idle timeout or lifetime, then trim the
/// rest down to `max_idle`. Returns the number of connections dropped.
pub fn reap_idle(pool: &Pool, settings: &PoolSettings) -> usize {
    let mut kept = 0usize;
    let mut removed = 0usize;

    let _ = pool.retain(|client, metrics| {
        let fresh =
            metrics.age() < settings.max_lifetime && client.idle_for() < settings.idle_timeout;
        let keep = fresh && kept < settings.max_idle;
        if keep {
            kept += 1;
        } else {
            removed += 1;
        }
        keep
    });

    if removed > 0 {
        tracing::debug!(removed, kept, "Reaped idle database connections");
    }
    removed
}

/// Spawn the idle reaper for `pool`, running until `cancel` fires.
pub fn spawn_reaper(pool: Pool, settings: PoolSettings, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    reap_idle(&pool, &settings);
                }
                _ = cancel.cancelled() => {
                    tracing::trace!("Idle reaper stopped");
                    break;
                }
            }
        }
    });
}

/// Convert deadpool status into [`PoolStatus`].
pub fn pool_status(pool: &Pool) -> PoolStatus {
    let status = pool.status();
    PoolStatus {
        max_size: status.max_size,
        size: status.size,
        available: status.available as isize,
        waiting: status.waiting,
    }
}

/// A connection acquired from the pool.
///
/// Automatically returns to the pool when dropped; its idle time starts
/// counting from that moment.
pub struct PooledConnection {
    client: managed::Object<DialManager>,
}

impl PooledConnection {
    /// Borrow the underlying client.
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client.client
    }

    /// Execute a query that returns rows.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> TunnelPoolResult<Vec<tokio_postgres::Row>> {
        self.client.query(sql, params).await.map_err(TunnelPoolError::from)
    }

    /// Execute a query that returns exactly one row.
    pub async fn query_one(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> TunnelPoolResult<tokio_postgres::Row> {
        self.client.query_one(sql, params).await.map_err(TunnelPoolError::from)
    }

    /// Execute a query that doesn't return rows.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> TunnelPoolResult<u64> {
        self.client.execute(sql, params).await.map_err(TunnelPoolError::from)
    }

    /// Prepare a statement for repeated execution.
    pub async fn prepare(&self, sql: &str) -> TunnelPoolResult<tokio_postgres::Statement> {
        self.client.prepare(sql).await.map_err(TunnelPoolError::from)
    }

    /// Begin a transaction.
    pub async fn transaction(&mut self) -> TunnelPoolResult<Transaction<'_>> {
        let txn = self.client.client.transaction().await.map_err(TunnelPoolError::from)?;
        Ok(Transaction { txn })
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.client.idle_since = Instant::now();
    }
}

/// A database transaction.
///
/// Automatically rolls back on drop unless committed.
pub struct Transaction<'a> {
    txn: tokio_postgres::Transaction<'a>,
}

impl<'a> Transaction<'a> {
    /// Execute a query within the transaction.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> TunnelPoolResult<Vec<tokio_postgres::Row>> {
        self.txn.query(sql, params).await.map_err(TunnelPoolError::from)
    }

    /// Execute a statement within the transaction.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> TunnelPoolResult<u64> {
        self.txn.execute(sql, params).await.map_err(TunnelPoolError::from)
    }

    /// Commit the transaction.
    pub async fn commit(self) -> TunnelPoolResult<()> {
        self.txn.commit().await.map_err(TunnelPoolError::from)
    }

    /// Rollback the transaction explicitly.
    pub async fn rollback(self) -> TunnelPoolResult<()> {
        self.txn.rollback().await.map_err(TunnelPoolError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseParams;
    use crate::services::dialer::{TcpDialer, DIRECT_SCHEME};
    use crate::services::test_support::{closed_port, FakePostgres, PgReply};

    fn dsn_for(port: u16) -> DataSourceName {
        let params = DatabaseParams::new("127.0.0.1", "app", "secret", "test").with_port(port);
        DataSourceName::new(&params, DIRECT_SCHEME)
    }

    fn unreachable_dsn() -> DataSourceName {
        dsn_for(closed_port())
    }

    fn short_lived(idle_timeout_ms: u64, max_lifetime_ms: u64) -> PoolSettings {
        PoolSettings {
            idle_timeout: Duration::from_millis(idle_timeout_ms),
            max_lifetime: Duration::from_millis(max_lifetime_ms),
            ..PoolSettings::default()
        }
    }

    #[test]
    fn test_build_pool_is_lazy_and_sized() {
        let settings = PoolSettings { max_open: 7, ..PoolSettings::default() };
        let pool = build_pool(&unreachable_dsn(), Arc::new(TcpDialer), settings).unwrap();
        let status = pool_status(&pool);

        assert_eq!(status.max_size, 7);
        assert_eq!(status.size, 0);
        assert_eq!(status.waiting, 0);
    }

    #[test]
    fn test_manager_keeps_dsn_settings() {
        let manager =
            DialManager::new(&unreachable_dsn(), Arc::new(TcpDialer), PoolSettings::default());

        assert_eq!(manager.pg_config.get_application_name(), Some(APPLICATION_NAME));
        assert_eq!(manager.pg_config.get_connect_timeout(), Some(&Duration::from_secs(10)));
        assert!(manager.address.starts_with("127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_checkout_from_unreachable_server_fails() {
        let pool =
            build_pool(&unreachable_dsn(), Arc::new(TcpDialer), PoolSettings::default()).unwrap();

        let err = checkout(&pool).await.err().unwrap();
        assert_eq!(err.category(), "Connection");
        assert_eq!(pool_status(&pool).size, 0);
    }

    #[tokio::test]
    async fn test_checkout_from_closed_pool_fails() {
        let pool =
            build_pool(&unreachable_dsn(), Arc::new(TcpDialer), PoolSettings::default()).unwrap();
        pool.close();

        let err = checkout(&pool).await.err().unwrap();
        assert!(err.message().contains("closed"));
    }

    #[test]
    fn test_reap_empty_pool() {
        let pool =
            build_pool(&unreachable_dsn(), Arc::new(TcpDialer), PoolSettings::default()).unwrap();
        assert_eq!(reap_idle(&pool, &PoolSettings::default()), 0);
    }

    #[tokio::test]
    async fn test_busy_time_does_not_count_as_idle() {
        let server = FakePostgres::start(PgReply::Ready).await;
        let settings = short_lived(300, 60_000);
        let pool = build_pool(&dsn_for(server.port), Arc::new(TcpDialer), settings).unwrap();

        let conn = checkout(&pool).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(conn);

        assert_eq!(reap_idle(&pool, &settings), 0);
        let _again = checkout(&pool).await.unwrap();
        assert_eq!(server.accepts(), 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_retires_returned_connection() {
        let server = FakePostgres::start(PgReply::Ready).await;
        let settings = short_lived(200, 60_000);
        let pool = build_pool(&dsn_for(server.port), Arc::new(TcpDialer), settings).unwrap();

        drop(checkout(&pool).await.unwrap());
        tokio::time::sleep(Duration::from_millis(400)).await;

        // Recycling on checkout replaces the stale connection.
        drop(checkout(&pool).await.unwrap());
        assert_eq!(server.accepts(), 2);
        assert_eq!(pool_status(&pool).size, 1);

        // The reaper drops it once it goes stale too.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(reap_idle(&pool, &settings), 1);
        assert_eq!(pool_status(&pool).size, 0);
    }

    #[tokio::test]
    async fn test_max_lifetime_retires_connection() {
        let server = FakePostgres::start(PgReply::Ready).await;
        let settings = short_lived(60_000, 200);
        let pool = build_pool(&dsn_for(server.port), Arc::new(TcpDialer), settings).unwrap();

        drop(checkout(&pool).await.unwrap());
        assert_eq!(reap_idle(&pool, &settings), 0);
        tokio::time::sleep(Duration::from_millis(400)).await;

        drop(checkout(&pool).await.unwrap());
        assert_eq!(server.accepts(), 2);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(reap_idle(&pool, &settings), 1);
    }

    #[tokio::test]
    async fn test_reaper_trims_to_max_idle() {
        let server = FakePostgres::start(PgReply::Ready).await;
        let settings = PoolSettings { max_idle: 1, ..PoolSettings::default() };
        let pool = build_pool(&dsn_for(server.port), Arc::new(TcpDialer), settings).unwrap();

        let held = [
            checkout(&pool).await.unwrap(),
            checkout(&pool).await.unwrap(),
            checkout(&pool).await.unwrap(),
        ];
        drop(held);
        assert_eq!(pool_status(&pool).size, 3);

        assert_eq!(reap_idle(&pool, &settings), 2);
        let status = pool_status(&pool);
        assert_eq!(status.size, 1);
        assert_eq!(status.available, 1);
    }

    #[tokio::test]
    async fn test_rejected_login_is_authentication_error() {
        let server = FakePostgres::start(PgReply::BadPassword).await;
        let settings = PoolSettings::default();
        let pool = build_pool(&dsn_for(server.port), Arc::new(TcpDialer), settings).unwrap();

        let err = checkout(&pool).await.err().unwrap();
        assert_eq!(err.category(), "Authentication");
    }
}
