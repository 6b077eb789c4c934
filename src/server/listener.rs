//! Per-bind TCP listener
//!
//! Builds the listening socket through socket2 so the backlog and address
//! reuse are set before the bind, then hands it to tokio.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// A listening socket for one routing bind
#[derive(Debug)]
pub struct BindListener {
    listener: TcpListener,
    listen_addr: SocketAddr,
}

impl BindListener {
    /// Create and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when socket creation, bind, or
    /// listen fails.
    pub fn bind(addr: SocketAddr, backlog: u32) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog as i32)?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener)?;
        let listen_addr = listener.local_addr()?;

        info!("Listening on {} (backlog={})", listen_addr, backlog);

        Ok(Self {
            listener,
            listen_addr,
        })
    }

    /// Accept one client connection.
    ///
    /// # Errors
    ///
    /// Returns the accept error; the caller decides whether it is
    /// recoverable.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        Ok((stream, peer))
    }

    /// The actual bound address (useful when binding to port 0)
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_and_accept() {
        let listener = BindListener::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr();
        assert_ne!(addr.port(), 0);

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });

        let (_stream, peer) = listener.accept().await.unwrap();
        assert_eq!(peer.ip(), addr.ip());
        client.await.unwrap();
    }

    #[test]
    fn test_bind_in_use() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap();
        // SO_REUSEADDR does not allow two live listeners on the same port
        assert!(BindListener::bind(addr, 16).is_err());
    }
}
