use std::fmt;
use std::io;
use std::net::Shutdown;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt as _;
use http::header::{HeaderValue, HOST, PROXY_AUTHORIZATION};
use http::{Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use rustls::pki_types::ServerName;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tracing::{debug, trace, Instrument as _};

use super::proxy::{self, ProxyConfig};
use super::{tcp, TransportConnection, VerifyMode};
use crate::bridge::io::TokioIo;
use crate::factory::ConnectionConfig;
use crate::trust::{tls, SslContext};
use crate::{Error, Site};

/// An HTTP/1.1 connection to one [`Site`].
///
/// Created unstarted by [`Factory`][crate::Factory]. Starting it connects
/// (through the proxy, if one applies), performs the TLS handshake for
/// `https` sites and the HTTP/1.1 handshake. Requests are then sent with
/// [`send_request`][HttpConnection::send_request], one at a time.
pub struct HttpConnection {
    site: Site,
    config: Arc<ConnectionConfig>,
    proxy: Option<ProxyConfig>,
    trust: Option<(String, SslContext)>,
    state: State,
}

enum State {
    Idle,
    Ready(Ready),
    Finished,
}

struct Ready {
    sender: http1::SendRequest<Full<Bytes>>,
    // A second handle on the socket owned by the hyper connection task, used
    // for socket options and to shut the connection down.
    socket: socket2::Socket,
    driver: JoinHandle<()>,
}

impl fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Idle => "idle",
            State::Ready(ready) if ready.sender.is_closed() => "closed",
            State::Ready(_) => "ready",
            State::Finished => "finished",
        };

        f.debug_struct("HttpConnection")
            .field("site", &self.site)
            .field("proxy", &self.proxy)
            .field("verify_mode", &self.verify_mode())
            .field("state", &state)
            .finish()
    }
}

impl HttpConnection {
    pub(crate) fn new(
        site: Site,
        config: Arc<ConnectionConfig>,
        proxy: Option<ProxyConfig>,
    ) -> Self {
        Self {
            site,
            config,
            proxy,
            trust: None,
            state: State::Idle,
        }
    }

    /// The destination of this connection.
    pub fn site(&self) -> &Site {
        &self.site
    }

    /// The proxy this connection goes through, if any.
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    pub(crate) fn set_trust(&mut self, hostname: String, ssl_context: SslContext) {
        self.trust = Some((hostname, ssl_context));
    }

    /// Send a request and wait for the response head.
    ///
    /// The request target is rewritten to origin form, or to absolute form
    /// when talking to a plain HTTP proxy, and a `Host` header is added when
    /// missing. The response body must be consumed before the next request
    /// can be sent on this connection.
    pub async fn send_request(
        &mut self,
        mut request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, Error> {
        self.prepare(&mut request)?;
        let read_timeout = self.config.read_timeout;

        let State::Ready(ready) = &mut self.state else {
            return Err(Error::NotStarted);
        };

        ready.sender.ready().await.map_err(Error::Request)?;

        trace!(method = %request.method(), uri = %request.uri(), "sending request");
        let response = ready.sender.send_request(request);
        let response = match read_timeout {
            Some(duration) => tokio::time::timeout(duration, response)
                .await
                .map_err(|_| Error::Timeout("read"))?,
            None => response.await,
        };

        response.map_err(Error::Request)
    }

    fn prepare(&self, request: &mut Request<Full<Bytes>>) -> Result<(), Error> {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let absolute = self.proxy.is_some() && !self.site.use_ssl();
        let uri: Uri = if absolute {
            format!("{}{}", self.site.addr(), path)
                .parse::<Uri>()
                .map_err(|error| Error::Uri(error.into()))?
        } else {
            path.parse::<Uri>().map_err(|error| Error::Uri(error.into()))?
        };
        *request.uri_mut() = uri;

        if !request.headers().contains_key(HOST) {
            let host = if self.site.has_default_port() {
                match self.site.authority().rsplit_once(':') {
                    Some((host, _)) => host.to_owned(),
                    None => self.site.host().to_owned(),
                }
            } else {
                self.site.authority()
            };
            let value = HeaderValue::from_str(&host).map_err(|error| {
                Error::Config(format!("invalid host header {host:?}: {error}"))
            })?;
            request.headers_mut().insert(HOST, value);
        }

        if absolute {
            if let Some(authorization) = self.proxy.as_ref().and_then(ProxyConfig::authorization) {
                let value = HeaderValue::from_str(&authorization).map_err(|error| {
                    Error::Config(format!("invalid proxy credentials: {error}"))
                })?;
                request.headers_mut().insert(PROXY_AUTHORIZATION, value);
            }
        }

        Ok(())
    }

    async fn connect(&mut self) -> Result<(), Error> {
        if matches!(self.state, State::Ready(_)) {
            return Ok(());
        }

        let tls = match &self.trust {
            Some((hostname, ssl_context)) if self.site.use_ssl() => {
                let config = tls::client_config(
                    ssl_context,
                    self.config.min_tls_version,
                    self.config.cipher_suites.as_deref(),
                )?;
                let server_name = ServerName::try_from(hostname.clone()).map_err(|error| {
                    Error::Config(format!("invalid server name {hostname:?}: {error}"))
                })?;
                Some(TlsSetup {
                    hostname: hostname.clone(),
                    config,
                    server_name,
                })
            }
            None if self.site.use_ssl() => {
                return Err(Error::Config(format!(
                    "no trust context attached for {}",
                    self.site
                )));
            }
            _ => None,
        };

        let (host, port) = match &self.proxy {
            Some(proxy) => (proxy.host.as_str(), proxy.port),
            None => (self.site.host(), self.site.port()),
        };

        let stream = tcp::connect(host, port, &self.config).await?;
        let socket = SockRef::from(&stream)
            .try_clone()
            .map_err(Error::connect("tcp socket clone"))?;

        let (sender, driver) = match (tls, &self.proxy) {
            (Some(tls), Some(proxy)) => {
                let tunnel = proxy::tunnel(stream, &self.site, proxy).await?;
                handshake(tls.connect(tunnel).await?).await?
            }
            (Some(tls), None) => handshake(tls.connect(stream).await?).await?,
            (None, _) => handshake(stream).await?,
        };

        self.state = State::Ready(Ready {
            sender,
            socket,
            driver,
        });
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.state, State::Finished) {
            State::Ready(ready) => {
                let Ready {
                    sender,
                    socket,
                    driver,
                } = ready;
                drop(sender);
                let outcome = socket.shutdown(Shutdown::Both);
                driver.abort();
                outcome
            }
            state => {
                self.state = state;
                Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "connection is not started",
                ))
            }
        }
    }
}

struct TlsSetup {
    hostname: String,
    config: Arc<rustls::ClientConfig>,
    server_name: ServerName<'static>,
}

impl TlsSetup {
    async fn connect<IO>(self, stream: IO) -> Result<TlsStream<IO>, Error>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let stream = tokio_rustls::TlsConnector::from(self.config)
            .connect(self.server_name, stream)
            .await
            .map_err(|source| Error::Tls {
                host: self.hostname.clone(),
                source,
            })?;
        trace!(host = %self.hostname, "tls handshake complete");
        Ok(stream)
    }
}

async fn handshake<IO>(
    stream: IO,
) -> Result<(http1::SendRequest<Full<Bytes>>, JoinHandle<()>), Error>
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    trace!("handshake h1");
    let (sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(Error::Handshake)?;

    let driver = tokio::spawn(
        async move {
            if let Err(err) = conn.await {
                debug!(%err, "h1 connection driver error");
            }
        }
        .in_current_span(),
    );
    trace!("handshake complete");

    Ok((sender, driver))
}

impl TransportConnection for HttpConnection {
    fn is_started(&self) -> bool {
        matches!(&self.state, State::Ready(ready) if !ready.sender.is_closed())
    }

    fn start(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        self.connect().boxed()
    }

    fn finish(&mut self) -> BoxFuture<'_, io::Result<()>> {
        let outcome = self.close();
        async move { outcome }.boxed()
    }

    fn use_ssl(&self) -> bool {
        self.site.use_ssl()
    }

    fn verify_mode(&self) -> VerifyMode {
        self.trust
            .as_ref()
            .map(|(_, ssl_context)| ssl_context.verify_mode())
            .unwrap_or_default()
    }

    fn socket(&self) -> Option<SockRef<'_>> {
        match &self.state {
            State::Ready(ready) => Some(SockRef::from(&ready.socket)),
            _ => None,
        }
    }
}

impl Drop for HttpConnection {
    fn drop(&mut self) {
        if let State::Ready(ready) = &self.state {
            ready.driver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(HttpConnection: Send, fmt::Debug);

    fn connection(site: &str, proxy: Option<ProxyConfig>) -> HttpConnection {
        HttpConnection::new(
            site.parse().unwrap(),
            Arc::new(ConnectionConfig::default()),
            proxy,
        )
    }

    fn request(uri: &str) -> Request<Full<Bytes>> {
        Request::get(uri).body(Full::new(Bytes::new())).unwrap()
    }

    #[test]
    fn prepare_origin_form() {
        let conn = connection("https://puppet.example.com:8140", None);
        let mut req = request("https://puppet.example.com:8140/puppet/v3/catalog?env=prod");
        conn.prepare(&mut req).unwrap();

        assert_eq!(req.uri(), "/puppet/v3/catalog?env=prod");
        assert_eq!(req.headers()[HOST], "puppet.example.com:8140");
    }

    #[test]
    fn prepare_default_port_host_header() {
        let conn = connection("http://example.com", None);
        let mut req = request("http://example.com/status");
        conn.prepare(&mut req).unwrap();

        assert_eq!(req.uri(), "/status");
        assert_eq!(req.headers()[HOST], "example.com");
    }

    #[test]
    fn prepare_keeps_explicit_host_header() {
        let conn = connection("http://example.com", None);
        let mut req = Request::get("/status")
            .header(HOST, "alias.example.com")
            .body(Full::new(Bytes::new()))
            .unwrap();
        conn.prepare(&mut req).unwrap();

        assert_eq!(req.headers()[HOST], "alias.example.com");
    }

    #[test]
    fn prepare_absolute_form_through_proxy() {
        let proxy = ProxyConfig::new("proxy", 3128).with_credentials("alice", "s3cret");
        let conn = connection("http://example.com:8080", Some(proxy));
        let mut req = request("/status");
        conn.prepare(&mut req).unwrap();

        assert_eq!(req.uri(), "http://example.com:8080/status");
        assert_eq!(
            req.headers()[PROXY_AUTHORIZATION],
            "Basic YWxpY2U6czNjcmV0"
        );
    }

    #[test]
    fn https_through_proxy_uses_origin_form() {
        let proxy = ProxyConfig::new("proxy", 3128);
        let conn = connection("https://example.com", Some(proxy));
        let mut req = request("https://example.com/status");
        conn.prepare(&mut req).unwrap();

        assert_eq!(req.uri(), "/status");
        assert!(!req.headers().contains_key(PROXY_AUTHORIZATION));
    }

    #[test]
    fn unstarted_connection() {
        let mut conn = connection("https://example.com", None);
        assert!(!conn.is_started());
        assert!(conn.use_ssl());
        assert!(conn.socket().is_none());
        assert_eq!(conn.verify_mode(), VerifyMode::Peer);

        conn.set_trust("example.com".into(), SslContext::insecure());
        assert_eq!(conn.verify_mode(), VerifyMode::None);

        let error = conn.close().unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn send_before_start() {
        let mut conn = connection("http://example.com", None);
        let error = conn.send_request(request("/")).await.unwrap_err();
        assert!(matches!(error, Error::NotStarted));
    }

    #[tokio::test]
    async fn https_without_trust_fails_to_start() {
        let mut conn = connection("https://127.0.0.1:8140", None);
        let error = conn.start().await.unwrap_err();
        assert!(matches!(error, Error::Config(_)), "{error:?}");
        assert!(!conn.is_started());
    }
}
