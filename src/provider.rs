//! Interchangeable strategies for handing out connections.
//!
//! Every strategy runs a body with a started connection through
//! [`ConnectionProvider::with_connection`]. They differ only in what happens
//! to the connection afterwards:
//!
//! - [`ConnectionPool`] caches it for reuse.
//! - [`NoCachePool`] closes it, so nothing outlives a single call.
//! - [`DummyPool`] does no bookkeeping at all.
//!
//! [`Provider`] picks one of them at construction time.

use std::fmt;

use crate::conn::TransportConnection;
use crate::factory::ConnectionFactory;
use crate::pool::{self, Config, ConnectionPool};
use crate::trust::TrustContext;
use crate::{Error, Site};

/// A source of started connections of type `C`, validated by trust contexts
/// of type `V`.
#[allow(async_fn_in_trait)]
pub trait ConnectionProvider<C, V> {
    /// Run `body` with a started connection to `site`, set up under
    /// `context`.
    ///
    /// Errors from acquiring the connection are converted into `E`. Errors
    /// from `body` are returned unchanged.
    async fn with_connection<T, E, B>(&self, site: &Site, context: &V, body: B) -> Result<T, E>
    where
        B: AsyncFnOnce(&mut C) -> Result<T, E>,
        E: From<Error>;

    /// Close any connections the provider holds on to.
    async fn close(&self);
}

impl<C, V, F> ConnectionProvider<C, V> for ConnectionPool<C, V, F>
where
    C: TransportConnection,
    V: TrustContext<C>,
    F: ConnectionFactory<C>,
{
    async fn with_connection<T, E, B>(&self, site: &Site, context: &V, body: B) -> Result<T, E>
    where
        B: AsyncFnOnce(&mut C) -> Result<T, E>,
        E: From<Error>,
    {
        ConnectionPool::with_connection(self, site, context, body).await
    }

    async fn close(&self) {
        ConnectionPool::close(self).await
    }
}

/// Opens a new connection for every call and closes it afterwards.
#[derive(Debug, Clone)]
pub struct NoCachePool<F> {
    factory: F,
}

impl<F> NoCachePool<F> {
    /// Open connections with `factory`.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// The factory used for every call.
    pub fn factory(&self) -> &F {
        &self.factory
    }
}

impl<C, V, F> ConnectionProvider<C, V> for NoCachePool<F>
where
    C: TransportConnection,
    V: TrustContext<C>,
    F: ConnectionFactory<C>,
{
    async fn with_connection<T, E, B>(&self, site: &Site, context: &V, body: B) -> Result<T, E>
    where
        B: AsyncFnOnce(&mut C) -> Result<T, E>,
        E: From<Error>,
    {
        let mut connection = pool::open_connection(&self.factory, site, context).await?;
        let value = body(&mut connection).await?;
        pool::close_connection(site, &mut connection).await;
        Ok(value)
    }

    async fn close(&self) {}
}

/// Creates connections on demand and leaves their lifetime to the caller.
#[derive(Debug, Clone)]
pub struct DummyPool<F> {
    factory: F,
}

impl<F> DummyPool<F> {
    /// Create connections with `factory`.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// The factory used for every call.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// A new, unstarted connection to `site`, straight from the factory.
    pub fn take_connection<C>(&self, site: &Site) -> Result<C, Error>
    where
        F: ConnectionFactory<C>,
    {
        self.factory.create_connection(site)
    }
}

impl<C, V, F> ConnectionProvider<C, V> for DummyPool<F>
where
    C: TransportConnection,
    V: TrustContext<C>,
    F: ConnectionFactory<C>,
{
    async fn with_connection<T, E, B>(&self, site: &Site, context: &V, body: B) -> Result<T, E>
    where
        B: AsyncFnOnce(&mut C) -> Result<T, E>,
        E: From<Error>,
    {
        let mut connection = pool::open_connection(&self.factory, site, context).await?;
        body(&mut connection).await
    }

    async fn close(&self) {}
}

/// Selects a connection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderMode {
    /// Cache connections in a [`ConnectionPool`].
    #[default]
    Pooled,

    /// Use a fresh connection for every call, see [`NoCachePool`].
    NoCache,

    /// No bookkeeping, see [`DummyPool`].
    Dummy,
}

/// One of the connection strategies, chosen by [`ProviderMode`].
pub enum Provider<C, V, F> {
    /// A caching pool.
    Pooled(ConnectionPool<C, V, F>),

    /// A fresh connection per call.
    NoCache(NoCachePool<F>),

    /// No bookkeeping.
    Dummy(DummyPool<F>),
}

impl<C, V, F> Provider<C, V, F> {
    /// Build the provider for `mode`. `config` only applies to
    /// [`ProviderMode::Pooled`].
    pub fn new(mode: ProviderMode, factory: F, config: Config) -> Self {
        match mode {
            ProviderMode::Pooled => Provider::Pooled(ConnectionPool::new(factory, config)),
            ProviderMode::NoCache => Provider::NoCache(NoCachePool::new(factory)),
            ProviderMode::Dummy => Provider::Dummy(DummyPool::new(factory)),
        }
    }

    /// The strategy in use.
    pub fn mode(&self) -> ProviderMode {
        match self {
            Provider::Pooled(_) => ProviderMode::Pooled,
            Provider::NoCache(_) => ProviderMode::NoCache,
            Provider::Dummy(_) => ProviderMode::Dummy,
        }
    }

    /// The factory connections are created with.
    pub fn factory(&self) -> &F {
        match self {
            Provider::Pooled(pool) => pool.factory(),
            Provider::NoCache(pool) => pool.factory(),
            Provider::Dummy(pool) => pool.factory(),
        }
    }
}

impl<C, V, F: Clone> Clone for Provider<C, V, F> {
    fn clone(&self) -> Self {
        match self {
            Provider::Pooled(pool) => Provider::Pooled(pool.clone()),
            Provider::NoCache(pool) => Provider::NoCache(pool.clone()),
            Provider::Dummy(pool) => Provider::Dummy(pool.clone()),
        }
    }
}

impl<C, V, F: fmt::Debug> fmt::Debug for Provider<C, V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Pooled(pool) => f.debug_tuple("Pooled").field(pool).finish(),
            Provider::NoCache(pool) => f.debug_tuple("NoCache").field(pool).finish(),
            Provider::Dummy(pool) => f.debug_tuple("Dummy").field(pool).finish(),
        }
    }
}

impl<C, V, F> ConnectionProvider<C, V> for Provider<C, V, F>
where
    C: TransportConnection,
    V: TrustContext<C>,
    F: ConnectionFactory<C>,
{
    async fn with_connection<T, E, B>(&self, site: &Site, context: &V, body: B) -> Result<T, E>
    where
        B: AsyncFnOnce(&mut C) -> Result<T, E>,
        E: From<Error>,
    {
        match self {
            Provider::Pooled(pool) => pool.with_connection(site, context, body).await,
            Provider::NoCache(pool) => {
                ConnectionProvider::<C, V>::with_connection(pool, site, context, body).await
            }
            Provider::Dummy(pool) => {
                ConnectionProvider::<C, V>::with_connection(pool, site, context, body).await
            }
        }
    }

    async fn close(&self) {
        match self {
            Provider::Pooled(pool) => pool.close().await,
            Provider::NoCache(pool) => ConnectionProvider::<C, V>::close(pool).await,
            Provider::Dummy(pool) => ConnectionProvider::<C, V>::close(pool).await,
        }
    }
}
