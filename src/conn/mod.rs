//! Transport connections.
//!
//! The pool only needs a handful of capabilities from a connection: whether it
//! is started, how to start and finish it, and whether it uses TLS with or
//! without peer verification. Those are captured by [`TransportConnection`].
//!
//! [`HttpConnection`] is the concrete implementation, speaking HTTP/1.1 over
//! TCP, optionally through an HTTP proxy and optionally wrapped in TLS.

use std::io;

use futures_util::future::BoxFuture;
use socket2::SockRef;

use crate::Error;

mod http;
pub mod proxy;
mod tcp;

pub use self::http::HttpConnection;
pub use self::proxy::{NoProxy, ProxyConfig};

/// How the peer certificate of a TLS connection is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VerifyMode {
    /// The peer certificate chain and host name are verified.
    #[default]
    Peer,

    /// Any peer certificate is accepted.
    None,
}

/// The capability surface the pool requires from a connection.
///
/// Connections are created unstarted by a
/// [`ConnectionFactory`][crate::ConnectionFactory]. Starting performs all of
/// the network setup (TCP connect, proxy tunnel, TLS handshake). Finishing
/// tears it down again.
pub trait TransportConnection: Send + 'static {
    /// Returns `true` between a successful [`start`][Self::start] and
    /// [`finish`][Self::finish], as long as the peer has not closed the
    /// connection.
    fn is_started(&self) -> bool;

    /// Open the connection.
    fn start(&mut self) -> BoxFuture<'_, Result<(), Error>>;

    /// Close the connection.
    ///
    /// Fails with [`io::ErrorKind::NotConnected`] when the connection is not
    /// started. The connection counts as finished even if closing the socket
    /// reports an error.
    fn finish(&mut self) -> BoxFuture<'_, io::Result<()>>;

    /// Whether the connection uses TLS.
    fn use_ssl(&self) -> bool;

    /// How the peer is verified, meaningful only when
    /// [`use_ssl`][Self::use_ssl] is `true`.
    fn verify_mode(&self) -> VerifyMode;

    /// The underlying socket, for socket options managed by the pool.
    fn socket(&self) -> Option<SockRef<'_>> {
        None
    }
}
