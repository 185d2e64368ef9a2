//! Creating new, unstarted connections.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::conn::{HttpConnection, NoProxy, ProxyConfig};
use crate::trust::TlsVersion;
use crate::{Error, Site};

/// Creates a new, unstarted connection for a [`Site`].
///
/// The pool calls this on every cache miss. Implementations configure the
/// connection fully (proxy, timeouts, TLS parameters) but must not start it.
pub trait ConnectionFactory<C>: Send + Sync + 'static {
    /// Create a connection to `site`.
    fn create_connection(&self, site: &Site) -> Result<C, Error>;
}

impl<C, F> ConnectionFactory<C> for F
where
    F: Fn(&Site) -> Result<C, Error> + Send + Sync + 'static,
{
    fn create_connection(&self, site: &Site) -> Result<C, Error> {
        (self)(site)
    }
}

/// Configuration for connections created by a [`Factory`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// The timeout for establishing the TCP connection.
    pub connect_timeout: Option<Duration>,

    /// The timeout for receiving a response head. `None` waits forever.
    pub read_timeout: Option<Duration>,

    /// The HTTP proxy to connect through.
    pub proxy: Option<ProxyConfig>,

    /// Destinations which bypass the proxy, comma separated. `none` disables
    /// the list.
    pub no_proxy: Option<String>,

    /// A no-proxy list taken from the environment, overriding
    /// [`no_proxy`][Self::no_proxy].
    pub no_proxy_override: Option<String>,

    /// The local address to bind outgoing connections to.
    pub source_address: Option<IpAddr>,

    /// The lowest TLS version to negotiate.
    pub min_tls_version: TlsVersion,

    /// Allowed cipher suites by name, e.g. `TLS13_AES_256_GCM_SHA384`.
    /// `None` allows every suite the crypto provider supports.
    pub cipher_suites: Option<Vec<String>>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// Whether to reuse the local address.
    pub reuse_address: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(120)),
            read_timeout: None,
            proxy: None,
            no_proxy: Some("localhost, 127.0.0.1".into()),
            no_proxy_override: None,
            source_address: None,
            min_tls_version: TlsVersion::Tls12,
            cipher_suites: None,
            nodelay: true,
            reuse_address: true,
        }
    }
}

impl ConnectionConfig {
    /// The default configuration, overlaid with the process environment.
    ///
    /// `HTTP_PROXY` / `http_proxy` replace the configured proxy, and
    /// `NO_PROXY` / `no_proxy` override the no-proxy list.
    pub fn from_env() -> Self {
        Self::default().with_env(|name| std::env::var(name).ok())
    }

    fn with_env<E>(mut self, env: E) -> Self
    where
        E: Fn(&str) -> Option<String>,
    {
        let lookup = |upper: &str, lower: &str| {
            env(upper)
                .or_else(|| env(lower))
                .filter(|value| !value.trim().is_empty())
        };

        if let Some(proxy) = lookup("HTTP_PROXY", "http_proxy") {
            match proxy.parse::<ProxyConfig>() {
                Ok(proxy) => self.proxy = Some(proxy),
                Err(error) => warn!(%error, "ignoring invalid HTTP_PROXY"),
            }
        }

        self.no_proxy_override = lookup("NO_PROXY", "no_proxy");
        self
    }
}

/// The default [`ConnectionFactory`], producing [`HttpConnection`]s.
#[derive(Debug, Clone)]
pub struct Factory {
    config: Arc<ConnectionConfig>,
    no_proxy: Option<NoProxy>,
}

impl Factory {
    /// Create a factory with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        let no_proxy = NoProxy::resolve(
            config.no_proxy_override.as_deref(),
            config.no_proxy.as_deref(),
        );

        Self {
            config: Arc::new(config),
            no_proxy,
        }
    }

    /// The connection configuration.
    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }

    /// The proxy connections to `site` go through, if any.
    pub fn proxy_for(&self, site: &Site) -> Option<&ProxyConfig> {
        let proxy = self.config.proxy.as_ref()?;
        if self
            .no_proxy
            .as_ref()
            .is_some_and(|no_proxy| no_proxy.matches(site))
        {
            trace!(%site, "bypassing proxy");
            return None;
        }
        Some(proxy)
    }
}

impl Default for Factory {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl ConnectionFactory<HttpConnection> for Factory {
    fn create_connection(&self, site: &Site) -> Result<HttpConnection, Error> {
        debug!("Creating new connection for {site}");
        let proxy = self.proxy_for(site).cloned();
        Ok(HttpConnection::new(site.clone(), self.config.clone(), proxy))
    }
}
