//! Data models for tunnelpool.
//!
//! - `connection` - DatabaseParams, PoolSettings, PoolStatus
//! - `tunnel` - TunnelCredential, TunnelAuthMethod, HostKeyPolicy
//! - `config` - ClientConfig file model

pub mod config;
pub mod connection;
pub mod tunnel;

pub use config::ClientConfig;
pub use connection::{DatabaseParams, PoolSettings, PoolStatus};
pub use tunnel::{HostKeyPolicy, TunnelAuthMethod, TunnelCredential};
