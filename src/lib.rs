//! Tether
//!
//! Pooled HTTP(S) connections for long-running agents talking to a small set
//! of servers.
//!
//! Connections are cached per [`Site`] (scheme, host and port) and per trust
//! context, so a connection verified under one set of trust roots is never
//! handed to a caller presenting another. The caller owns a connection from
//! the moment it is borrowed until it is released or closed.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use tether::{Client, Config, ConnectionConfig, Factory, Provider, ProviderMode, SslContext};
//!
//! let factory = Factory::new(ConnectionConfig::from_env());
//! let provider = Provider::new(ProviderMode::Pooled, factory, Config::default());
//! let client = Client::new(provider, SslContext::system());
//!
//! let response = client.get("https://puppet:8140/status/v1/simple".parse()?).await?;
//! println!("{}", String::from_utf8_lossy(response.body()));
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod bridge;
pub mod client;
pub mod conn;
mod error;
pub mod factory;
pub mod pool;
pub mod provider;
mod session;
mod site;
pub mod trust;

pub use self::client::{Client, ClientError};
pub use self::conn::{HttpConnection, TransportConnection, VerifyMode};
pub use self::error::{Error, UriError};
pub use self::factory::{ConnectionConfig, ConnectionFactory, Factory};
pub use self::pool::{Config, ConnectionPool, PooledConnection};
pub use self::provider::{ConnectionProvider, DummyPool, NoCachePool, Provider, ProviderMode};
pub use self::session::Session;
pub use self::site::Site;
pub use self::trust::{ClientIdentity, SslContext, TrustContext, Verifier};

/// A boxed error, for callers which erase error types.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
