use std::collections::VecDeque;

use tokio::time::Instant;
use tracing::trace;

use crate::conn::TransportConnection;
use crate::trust::TrustContext;
use crate::Session;

/// An idle connection, with the trust context it was last used under.
#[derive(Debug)]
pub struct PooledConnection<C, V> {
    session: Session<C>,
    context: V,
}

impl<C, V> PooledConnection<C, V> {
    /// Pair a session with the trust context it was validated under.
    pub fn new(session: Session<C>, context: V) -> Self {
        Self { session, context }
    }

    /// The session holding the connection.
    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    /// The trust context the connection was last used under.
    pub fn context(&self) -> &V {
        &self.context
    }

    /// Give up the entry, returning the connection.
    pub fn into_connection(self) -> C {
        self.session.into_connection()
    }
}

/// The idle connections for one site, most recently released first.
#[derive(Debug)]
pub(super) struct IdleConnections<C, V> {
    inner: VecDeque<PooledConnection<C, V>>,
}

impl<C, V> Default for IdleConnections<C, V> {
    fn default() -> Self {
        Self {
            inner: VecDeque::new(),
        }
    }
}

impl<C, V> IdleConnections<C, V> {
    pub(super) fn push(&mut self, entry: PooledConnection<C, V>) {
        self.inner.push_front(entry);
    }

    /// Find the most recent connection usable under `context`.
    ///
    /// Every expired entry and every entry closed by the peer is removed
    /// first, wherever it sits. Entries in front of the match which were
    /// validated under a different context are removed as well. Removed
    /// connections are returned so the caller can close them.
    pub(super) fn pop(&mut self, context: &V, now: Instant) -> (Option<C>, Vec<C>)
    where
        C: TransportConnection,
        V: TrustContext<C>,
    {
        trace!("checking {} idle connections", self.len());

        let (dead, live): (VecDeque<_>, VecDeque<_>) = self.inner.drain(..).partition(|entry| {
            entry.session.is_expired(now) || !entry.session.connection().is_started()
        });
        self.inner = live;

        let mut stale: Vec<C> = dead
            .into_iter()
            .map(PooledConnection::into_connection)
            .collect();
        if !stale.is_empty() {
            trace!("found {} expired or closed connections", stale.len());
        }

        while let Some(entry) = self.inner.pop_front() {
            if context.is_equivalent(&entry.context) {
                trace!("found idle connection");
                return (Some(entry.into_connection()), stale);
            }

            trace!("found connection with a different trust context");
            stale.push(entry.into_connection());
        }

        (None, stale)
    }

    pub(super) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(super) fn into_connections(self) -> impl Iterator<Item = C> {
        self.inner.into_iter().map(PooledConnection::into_connection)
    }
}
