//! Connection pooling.
//!
//! [`ConnectionPool`] caches started connections per [`Site`], keyed also by
//! the trust context they were validated under. A borrowed connection is
//! owned by the caller until it is either released back to the pool or
//! closed, so a connection is never in two places at once.
//!
//! Cached connections are handed out most recently released first. Each
//! borrow discards every expired or peer-closed entry for the site, along with
//! entries in front of the match which were validated under a different
//! trust context.
//!
//! The pool lock is only ever held for map operations. Creating, starting
//! and closing connections all happen outside of it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::conn::{TransportConnection, VerifyMode};
use crate::factory::ConnectionFactory;
use crate::trust::TrustContext;
use crate::{Error, Session, Site};

mod idle;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;

use self::idle::IdleConnections;
pub use self::idle::PooledConnection;

/// Configuration for a connection pool.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// How long a released connection may sit idle before it is closed
    /// instead of reused. [`Duration::ZERO`] expires connections
    /// immediately, which disables reuse.
    pub keepalive_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keepalive_timeout: Duration::from_secs(4),
        }
    }
}

impl Config {
    /// A configuration with the given keepalive timeout.
    pub fn with_keepalive_timeout(keepalive_timeout: Duration) -> Self {
        Self { keepalive_timeout }
    }

    /// The deadline for a connection released at `now`.
    ///
    /// Timeouts too large to represent never expire in practice.
    pub(crate) fn expires_at(&self, now: Instant) -> Instant {
        now.checked_add(self.keepalive_timeout).unwrap_or_else(|| now + FAR_FUTURE)
    }
}

// About 30 years, the same horizon tokio uses for unbounded deadlines.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A pool of started connections, shared by every clone.
pub struct ConnectionPool<C, V, F> {
    inner: Arc<PoolInner<C, V, F>>,
}

struct PoolInner<C, V, F> {
    factory: F,
    config: Config,
    idle: Mutex<HashMap<Site, IdleConnections<C, V>>>,
}

impl<C, V, F> Clone for ConnectionPool<C, V, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C, V, F> fmt::Debug for ConnectionPool<C, V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let idle = self.inner.idle.lock();
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("sites", &idle.len())
            .field(
                "idle",
                &idle.values().map(IdleConnections::len).sum::<usize>(),
            )
            .finish()
    }
}

impl<C, V, F> ConnectionPool<C, V, F> {
    /// Create an empty pool which opens connections with `factory`.
    pub fn new(factory: F, config: Config) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                idle: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The factory used on cache misses.
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// How long released connections stay reusable.
    pub fn keepalive_timeout(&self) -> Duration {
        self.inner.config.keepalive_timeout
    }

    /// The number of idle connections cached for `site`.
    pub fn idle_count(&self, site: &Site) -> usize {
        self.inner
            .idle
            .lock()
            .get(site)
            .map_or(0, IdleConnections::len)
    }
}

impl<C, V, F> ConnectionPool<C, V, F>
where
    C: TransportConnection,
    V: TrustContext<C>,
    F: ConnectionFactory<C>,
{
    /// Take a started connection to `site` which is valid under `context`.
    ///
    /// Returns the most recently released cached connection if one is
    /// usable, otherwise creates, sets up and starts a new one. Cached
    /// connections skipped along the way are closed.
    #[cfg_attr(not(tarpaulin), tracing::instrument(skip_all, fields(%site), level = "debug"))]
    pub async fn borrow(&self, site: &Site, context: &V) -> Result<C, Error> {
        let (cached, stale) = self.take_idle(site, context);

        for mut connection in stale {
            self.close_connection(site, &mut connection).await;
        }

        if let Some(connection) = cached {
            debug!("Using cached connection for {site}");
            return Ok(connection);
        }

        open_connection(&self.inner.factory, site, context).await
    }

    fn take_idle(&self, site: &Site, context: &V) -> (Option<C>, Vec<C>) {
        let mut idle = self.inner.idle.lock();
        let Some(connections) = idle.get_mut(site) else {
            return (None, Vec::new());
        };

        let found = connections.pop(context, Instant::now());
        if connections.is_empty() {
            trace!("no idle connections remain");
            idle.remove(site);
        }
        found
    }

    /// Return a connection to the pool for later reuse under `context`.
    ///
    /// The connection expires after the configured keepalive timeout.
    pub fn release(&self, site: &Site, context: &V, connection: C) {
        debug!("Caching connection for {site}");
        let expires_at = self.inner.config.expires_at(Instant::now());
        let entry = PooledConnection::new(Session::new(connection, expires_at), context.clone());

        self.inner
            .idle
            .lock()
            .entry(site.clone())
            .or_default()
            .push(entry);
    }

    /// Run `body` with a connection to `site`.
    ///
    /// When `body` succeeds the connection is released back to the pool,
    /// unless it is a TLS connection which skipped peer verification or it
    /// was closed during use; those are closed instead. When `body` fails
    /// the error is returned unchanged and the connection is dropped without
    /// being cached. Dropping the returned future has the same effect.
    pub async fn with_connection<T, E, B>(
        &self,
        site: &Site,
        context: &V,
        body: B,
    ) -> Result<T, E>
    where
        B: AsyncFnOnce(&mut C) -> Result<T, E>,
        E: From<Error>,
    {
        let mut connection = self.borrow(site, context).await?;
        let value = body(&mut connection).await?;

        if !connection.is_started() {
            trace!(%site, "connection closed during use");
        } else if connection.use_ssl() && connection.verify_mode() == VerifyMode::None {
            self.close_connection(site, &mut connection).await;
        } else {
            self.release(site, context, connection);
        }

        Ok(value)
    }

    /// Close a connection which will not be reused.
    ///
    /// Returns `false` if the connection was already closed. Failures to
    /// close are logged, never returned.
    pub async fn close_connection(&self, site: &Site, connection: &mut C) -> bool {
        close_connection(site, connection).await
    }

    /// Close every cached connection, leaving the pool empty.
    pub async fn close(&self) {
        let drained: Vec<_> = self.inner.idle.lock().drain().collect();

        for (site, connections) in drained {
            for mut connection in connections.into_connections() {
                self.close_connection(&site, &mut connection).await;
            }
        }
    }
}

/// Create, set up and start a connection, then apply pool-managed socket
/// options.
pub(crate) async fn open_connection<C, V, F>(
    factory: &F,
    site: &Site,
    context: &V,
) -> Result<C, Error>
where
    C: TransportConnection,
    V: TrustContext<C>,
    F: ConnectionFactory<C>,
{
    let mut connection = factory.create_connection(site)?;
    context.setup_connection(&mut connection)?;
    connection.start().await?;
    set_socket_options(site, &connection);
    Ok(connection)
}

pub(crate) async fn close_connection<C>(site: &Site, connection: &mut C) -> bool
where
    C: TransportConnection,
{
    if !connection.is_started() {
        return false;
    }

    debug!("Closing connection for {site}");
    if let Err(e) = connection.finish().await {
        warn!("Failed to close connection for {site}: {e}");
    }
    true
}

fn set_socket_options<C: TransportConnection>(site: &Site, connection: &C) {
    if let Some(socket) = connection.socket() {
        if let Err(error) = socket.set_keepalive(true) {
            warn!(%site, %error, "failed to enable SO_KEEPALIVE");
        }
    }
}
