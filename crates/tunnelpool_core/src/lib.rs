//! Pooled PostgreSQL connections, optionally tunneled through an SSH bastion.
//!
//! This crate provides:
//!
//! - **error**: Error kinds for tunnel, credential and pool failures
//! - **models**: Connection parameters, tunnel credentials, config file
//! - **services**: Tunnel dialer, dialer registry, pool and connection factory
//! - **logging**: Structured logging setup

pub mod error;
pub mod logging;
pub mod models;
pub mod services;


pub use error::{TunnelPoolError, TunnelPoolResult};
pub use models::{
    ClientConfig, DatabaseParams, HostKeyPolicy, PoolSettings, PoolStatus, TunnelAuthMethod,
    TunnelCredential,
};
pub use services::{
    ConnectionFactory, ConnectionHandle, DataSourceName, Dial, DialerRegistry, NamingStrategy,
    PooledConnection, TunnelDialer, TunnelTransport,
};
