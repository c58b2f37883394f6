//! Backend services for tunnelpool.
//!
//! - `tunnel` - SSH tunnel authentication and forwarded streams
//! - `dialer` - Dialer trait and the per-factory scheme registry
//! - `dsn` - Data source name building and parsing
//! - `pool` - deadpool manager, idle reaper and pooled connections
//! - `factory` - ConnectionFactory and ConnectionHandle
//! - `naming` - Table naming strategy

pub mod dialer;
pub mod dsn;
pub mod factory;
pub mod naming;
pub mod pool;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod test_support;

pub use dialer::{BoxedStream, Dial, DialerRegistry, TcpDialer, DIRECT_SCHEME, TUNNEL_SCHEME};
pub use dsn::DataSourceName;
pub use factory::{ConnectionFactory, ConnectionHandle};
pub use naming::NamingStrategy;
pub use pool::{PgClient, Pool, PooledConnection, Transaction};
pub use tunnel::{TunnelDialer, TunnelTransport};
