use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tracing::{trace, warn};

use crate::factory::ConnectionConfig;
use crate::Error;

/// Resolve `host` and connect to the first address which accepts.
///
/// Addresses are tried in resolver order. When a source address is configured,
/// addresses of the other IP family are skipped.
#[cfg_attr(not(tarpaulin), tracing::instrument(skip(config), level = "debug"))]
pub(super) async fn connect(
    host: &str,
    port: u16,
    config: &ConnectionConfig,
) -> Result<TcpStream, Error> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(Error::connect("dns resolution"))?;

    let mut last_error = None;
    for addr in addrs {
        if let Some(source) = config.source_address {
            if source.is_ipv4() != addr.is_ipv4() {
                trace!(%addr, %source, "skipping address of other family");
                continue;
            }
        }

        match connect_addr(addr, config).await {
            Ok(stream) => {
                trace!(peer.addr = %addr, "tcp connected");
                return Ok(stream);
            }
            Err(error) => {
                trace!(%addr, %error, "tcp connect attempt failed");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        Error::connect("dns resolution")(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no usable address for {host}"),
        ))
    }))
}

async fn connect_addr(addr: SocketAddr, config: &ConnectionConfig) -> Result<TcpStream, Error> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(Error::connect("tcp open error"))?;

    // Tokio requires O_NONBLOCK on sockets it adopts.
    socket
        .set_nonblocking(true)
        .map_err(Error::connect("tcp set_nonblocking error"))?;

    if let Some(source) = config.source_address {
        bind_source_address(&socket, source).map_err(Error::connect("tcp bind source address"))?;
    }

    let socket = TcpSocket::from_std_stream(socket.into());

    if config.reuse_address {
        if let Err(e) = socket.set_reuseaddr(true) {
            warn!("tcp set_reuse_address error: {}", e);
        }
    }

    let stream = with_timeout(config.connect_timeout, socket.connect(addr)).await?;

    if config.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("tcp set_nodelay error: {}", e);
        }
    }

    Ok(stream)
}

fn bind_source_address(socket: &socket2::Socket, source: IpAddr) -> io::Result<()> {
    socket.bind(&SocketAddr::new(source, 0).into())
}

async fn with_timeout<F>(timeout: Option<Duration>, connect: F) -> Result<TcpStream, Error>
where
    F: std::future::Future<Output = io::Result<TcpStream>>,
{
    match timeout {
        Some(duration) => match tokio::time::timeout(duration, connect).await {
            Ok(outcome) => outcome.map_err(Error::connect("tcp connect error")),
            Err(_) => Err(Error::Timeout("connect")),
        },
        None => connect.await.map_err(Error::connect("tcp connect error")),
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn connect_to_listener() {
        let _ = tracing_subscriber::fmt::try_init();

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = ConnectionConfig::default();
        let stream = connect("127.0.0.1", port, &config).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn connect_with_source_address() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = ConnectionConfig {
            source_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..Default::default()
        };
        let stream = connect("127.0.0.1", port, &config).await.unwrap();
        assert_eq!(
            stream.local_addr().unwrap().ip(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ConnectionConfig::default();
        let error = connect("127.0.0.1", port, &config).await.unwrap_err();
        assert!(matches!(error, Error::Connect { .. }), "{error:?}");
    }
}
