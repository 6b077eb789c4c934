//! Socket capability layer
//!
//! Sessions, the backend walker, and the quarantine probe never open
//! sockets themselves; they go through the [`Connector`] capability, which
//! makes all of them testable with a fake implementation. The real
//! implementation wraps a non-blocking connect with a writable wait and an
//! `SO_ERROR` check so a timeout is distinguishable from a refusal.

use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::addr::TcpAddress;
use crate::error::ConnectError;

/// Capability for opening backend connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `addr`, bounded by `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ConnectError`]; a timeout is a distinct kind
    /// from connection-refused.
    async fn connect(
        &self,
        addr: &TcpAddress,
        connect_timeout: Duration,
    ) -> Result<TcpStream, ConnectError>;
}

/// The real connector backed by the OS socket layer
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl TcpConnector {
    /// Create a new connector
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn create_socket(sockaddr: std::net::SocketAddr) -> std::io::Result<Socket> {
        let socket = Socket::new(
            Domain::for_address(sockaddr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;

        socket.set_nonblocking(true)?;

        // Detect dead backends on long-lived sessions
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(15));
        socket.set_tcp_keepalive(&keepalive)?;

        Ok(socket)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        addr: &TcpAddress,
        connect_timeout: Duration,
    ) -> Result<TcpStream, ConnectError> {
        let sockaddr = tokio::net::lookup_host((addr.host(), addr.port()))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConnectError::Other {
                addr: addr.clone(),
                reason: format!("could not resolve '{}'", addr.host()),
            })?;

        let socket = Self::create_socket(sockaddr)
            .map_err(|e| ConnectError::from_io(addr.clone(), &e))?;

        // EINPROGRESS is the expected outcome of a non-blocking connect
        match socket.connect(&sockaddr.into()) {
            Ok(()) => {}
            Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(ConnectError::from_io(addr.clone(), &e)),
        }

        let std_stream: std::net::TcpStream = socket.into();
        let stream = TcpStream::from_std(std_stream)
            .map_err(|e| ConnectError::from_io(addr.clone(), &e))?;

        let connect_result = timeout(connect_timeout, async {
            // Writable means the connect finished, one way or the other
            stream
                .writable()
                .await
                .map_err(|e| ConnectError::from_io(addr.clone(), &e))?;

            match stream.take_error() {
                Ok(Some(e)) => Err(ConnectError::from_io(addr.clone(), &e)),
                Ok(None) => Ok(()),
                Err(e) => Err(ConnectError::from_io(addr.clone(), &e)),
            }
        })
        .await;

        match connect_result {
            Ok(Ok(())) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
                }
                Ok(stream)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectError::Timeout {
                addr: addr.clone(),
                timeout_ms: connect_timeout.as_millis() as u64,
            }),
        }
    }
}
