use std::io;

use thiserror::Error;

/// The URI used to identify a site is invalid.
///
/// Usually, this means that the URI is missing a scheme or host,
/// but it can also mean that the connection string could not be parsed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UriError {
    /// The connection string could not be parsed.
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// The URI is missing a scheme.
    #[error("missing scheme in uri: {0}")]
    MissingScheme(http::Uri),

    /// The URI is missing a host.
    #[error("missing host in uri: {0}")]
    MissingHost(http::Uri),

    /// The scheme is neither `http` nor `https`.
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),
}

/// Transport error type.
///
/// Every failure the pool or a connection can report to its caller. Errors
/// produced while the pool closes connections it owns are logged instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The destination could not be derived from a URI.
    #[error(transparent)]
    Uri(#[from] UriError),

    /// Opening the TCP connection failed.
    #[error("{message}: {source}")]
    Connect {
        /// What was being attempted.
        message: &'static str,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The proxy refused or failed to establish a tunnel.
    #[error("proxy: {0}")]
    Proxy(String),

    /// The TLS handshake with the peer failed.
    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        /// The host name the handshake was verified against.
        host: String,

        /// The underlying error, usually wrapping a [`rustls::Error`].
        #[source]
        source: io::Error,
    },

    /// The TLS client configuration could not be built.
    #[error("tls configuration: {0}")]
    TlsConfig(#[from] rustls::Error),

    /// The HTTP/1.1 handshake failed.
    #[error("http handshake: {0}")]
    Handshake(#[source] hyper::Error),

    /// Sending a request or reading its response failed.
    #[error("request: {0}")]
    Request(#[source] hyper::Error),

    /// A redirect could not be followed.
    #[error("redirect: {0}")]
    Redirect(String),

    /// A connect or read timeout elapsed.
    #[error("{0} operation timed out")]
    Timeout(&'static str),

    /// The connection was used before `start` or after `finish`.
    #[error("connection is not started")]
    NotStarted,

    /// The connection settings are inconsistent.
    #[error("configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn connect(message: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Connect { message, source }
    }

    /// Returns `true` if this error is a connect or read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: std::error::Error, Send, Sync, Into<crate::BoxError>);
    assert_impl_all!(UriError: std::error::Error, Send, Sync);

    #[test]
    fn connect_error_display() {
        let error = Error::connect("tcp connect error")(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(error.to_string(), "tcp connect error: refused");
        assert!(!error.is_timeout());
    }

    #[test]
    fn timeout_display() {
        let error = Error::Timeout("read");
        assert_eq!(error.to_string(), "read operation timed out");
        assert!(error.is_timeout());
    }
}
