//! In-memory connections, factories and trust contexts for exercising a pool
//! without touching the network.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{ready, BoxFuture};
use futures_util::FutureExt as _;

use crate::conn::{TransportConnection, VerifyMode};
use crate::factory::ConnectionFactory;
use crate::trust::TrustContext;
use crate::{Error, Site};

static IDENT: AtomicU16 = AtomicU16::new(1);

/// Identifies one mock connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u16);

impl ConnectionId {
    fn new() -> Self {
        Self(IDENT.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A handle which simulates the peer hanging up on a [`MockConnection`].
#[derive(Debug, Clone)]
pub struct MockPeer(Arc<AtomicBool>);

impl MockPeer {
    /// Close the connection from the remote end.
    pub fn hang_up(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A connection which only tracks its own lifecycle.
#[derive(Debug)]
pub struct MockConnection {
    ident: ConnectionId,
    site: Site,
    started: bool,
    peer_closed: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    context: Option<String>,
    use_ssl: bool,
    verify_mode: VerifyMode,
    fail_start: bool,
    fail_close: bool,
}

impl MockConnection {
    /// A plain, unstarted connection to `site`.
    pub fn new(site: Site) -> Self {
        Self {
            ident: ConnectionId::new(),
            use_ssl: site.use_ssl(),
            site,
            started: false,
            peer_closed: Arc::new(AtomicBool::new(false)),
            closes: Arc::new(AtomicUsize::new(0)),
            context: None,
            verify_mode: VerifyMode::Peer,
            fail_start: false,
            fail_close: false,
        }
    }

    /// The unique id of this connection.
    pub fn id(&self) -> ConnectionId {
        self.ident
    }

    /// The site this connection was created for.
    pub fn site(&self) -> &Site {
        &self.site
    }

    /// The name of the [`MockContext`] which set this connection up.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// A handle for closing the connection from the remote end.
    pub fn peer(&self) -> MockPeer {
        MockPeer(self.peer_closed.clone())
    }

    /// Mark the connection started without going through a pool.
    pub fn force_start(&mut self) {
        self.started = true;
    }
}

impl TransportConnection for MockConnection {
    fn is_started(&self) -> bool {
        self.started && !self.peer_closed.load(Ordering::SeqCst)
    }

    fn start(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        let result = if self.fail_start {
            Err(Error::connect("mock connect")(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        } else {
            self.started = true;
            Ok(())
        };
        ready(result).boxed()
    }

    fn finish(&mut self) -> BoxFuture<'_, io::Result<()>> {
        let result = if !self.started {
            Err(io::ErrorKind::NotConnected.into())
        } else {
            self.started = false;
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(io::Error::other("mock close failure"))
            } else {
                Ok(())
            }
        };
        ready(result).boxed()
    }

    fn use_ssl(&self) -> bool {
        self.use_ssl
    }

    fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }
}

/// A factory for [`MockConnection`]s which counts what it creates and how
/// many of those connections were closed.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    created: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    verify_mode: VerifyMode,
    fail_start: bool,
    fail_close: bool,
}

impl MockFactory {
    /// A factory for connections which behave.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections to `https` sites skip peer verification.
    pub fn insecure(mut self) -> Self {
        self.verify_mode = VerifyMode::None;
        self
    }

    /// Connections fail to start.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Connections report an error when closed.
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// How many connections were created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// How many started connections were closed.
    pub fn closed(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory<MockConnection> for MockFactory {
    fn create_connection(&self, site: &Site) -> Result<MockConnection, Error> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let mut conn = MockConnection::new(site.clone());
        conn.closes = self.closes.clone();
        conn.verify_mode = self.verify_mode;
        conn.fail_start = self.fail_start;
        conn.fail_close = self.fail_close;
        Ok(conn)
    }
}

/// A trust context identified by name. Contexts with equal names are
/// equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContext(String);

impl MockContext {
    /// A context called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl TrustContext<MockConnection> for MockContext {
    fn setup_connection(&self, connection: &mut MockConnection) -> Result<(), Error> {
        connection.context = Some(self.0.clone());
        Ok(())
    }

    fn is_equivalent(&self, other: &Self) -> bool {
        self == other
    }
}
