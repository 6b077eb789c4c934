//! Per-client routing session
//!
//! A session owns exactly one client stream and, once connected, one
//! server stream. It selects a backend with failover, supervises the
//! handshake inspector until the exchange settles, then relays bytes until
//! either peer closes, the idle bound fires, or the service stops.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use super::stats::ConnectionStats;
use crate::addr::TcpAddress;
use crate::error::{DbRouterError, SessionError};
use crate::io::{relay_with_idle, CopyResult};
use crate::protocol::{classic, HandshakeInspector, ProtocolKind};
use crate::routing::BackendConnector;

/// Everything a session needs, handed over by the accept loop
pub struct SessionContext {
    /// The accepted client stream
    pub client: TcpStream,
    /// Client peer address
    pub client_addr: SocketAddr,
    /// Backend selector of this bind
    pub backend: Arc<BackendConnector>,
    /// Protocol family of this bind
    pub protocol: ProtocolKind,
    /// Relay idle bound
    pub wait_timeout: Duration,
    /// Per-session buffer size
    pub buffer_size: usize,
    /// Stream oversize handshake payloads instead of rejecting them
    pub stream_large_payloads: bool,
    /// Client networks this bind rejects
    pub blocked_client_networks: Arc<Vec<ipnet::IpNet>>,
    /// Service-wide stop signal
    pub shutdown: broadcast::Receiver<()>,
}

/// Outcome of one session
#[derive(Debug)]
pub struct SessionResult {
    /// Client peer address
    pub client_addr: SocketAddr,
    /// Backend the session was routed to, if selection succeeded
    pub server_addr: Option<TcpAddress>,
    /// Byte counters, present when the session completed
    pub copied: Option<CopyResult>,
    /// Error message when the session failed
    pub error: Option<String>,
}

/// Run one session to completion.
pub async fn handle_session(mut ctx: SessionContext) -> SessionResult {
    let mut result = SessionResult {
        client_addr: ctx.client_addr,
        server_addr: None,
        copied: None,
        error: None,
    };

    // Backend selection with sequential failover
    let (mut server, server_addr) = match ctx.backend.connect_next().await {
        Ok(pair) => pair,
        Err(e) => {
            warn!("No backend for client {}: {}", ctx.client_addr, e);
            if ctx.protocol == ProtocolKind::Classic {
                let _ = ctx
                    .client
                    .write_all(&classic::no_destination_error_packet())
                    .await;
            }
            result.error = Some(format!("Backend selection failed: {e}"));
            return result;
        }
    };
    result.server_addr = Some(server_addr.clone());

    // A blocked client never gets to speak to the backend. The server side
    // receives a fake handshake response so it closes cleanly without ever
    // seeing credentials.
    if is_blocked(&ctx.blocked_client_networks, ctx.client_addr.ip()) {
        info!(
            "Client {} rejected by bind ACL, shedding backend {}",
            ctx.client_addr, server_addr
        );
        if ctx.protocol == ProtocolKind::Classic {
            let _ = server.write_all(&classic::blocked_client_response()).await;
        }
        let _ = server.shutdown().await;
        // Drain whatever the backend already sent (its greeting) so the
        // close is a clean FIN rather than a reset
        let mut sink = [0u8; 512];
        let drain = async {
            loop {
                match server.read(&mut sink).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        let _ = tokio::time::timeout(Duration::from_millis(500), drain).await;
        result.error = Some("client blocked by ACL".into());
        return result;
    }

    let mut client = ctx.client;
    let mut inspector =
        HandshakeInspector::new(ctx.protocol, ctx.buffer_size, ctx.stream_large_payloads);

    let mut handshake_bytes = (0u64, 0u64);
    if let Err(e) = run_handshake(
        &mut client,
        &mut server,
        &mut inspector,
        &mut ctx.shutdown,
        ctx.wait_timeout,
        ctx.buffer_size,
        &mut handshake_bytes,
    )
    .await
    {
        debug!(
            "Handshake with {} via {} failed: {}",
            ctx.client_addr, server_addr, e
        );
        result.error = Some(format!("Handshake failed: {e}"));
        return result;
    }

    if inspector.server_error_forwarded() {
        info!(
            "Server {} answered the handshake of {} with an error packet; forwarded",
            server_addr, ctx.client_addr
        );
    }
    if inspector.tls_requested() {
        debug!(
            "Client {} requested TLS; relaying ciphertext to {}",
            ctx.client_addr, server_addr
        );
    }

    // Relay phase: transparent byte forwarding until either side closes
    tokio::select! {
        res = relay_with_idle(&mut client, &mut server, ctx.buffer_size, ctx.wait_timeout) => {
            match res {
                Ok(copied) => {
                    result.copied = Some(CopyResult {
                        client_to_server: copied.client_to_server + handshake_bytes.0,
                        server_to_client: copied.server_to_client + handshake_bytes.1,
                    });
                }
                Err(e) => {
                    debug!(
                        "Session {} via {} ended: {}",
                        ctx.client_addr, server_addr, e
                    );
                    result.error = Some(e.to_string());
                }
            }
        }
        _ = ctx.shutdown.recv() => {
            // Hard close on cancellation: no drain, no protocol goodbye
            debug!("Session {} cancelled by shutdown", ctx.client_addr);
            result.error = Some(SessionError::Cancelled.to_string());
        }
    }

    result
}

/// Drive the handshake inspector until the exchange settles.
///
/// Every chunk read from one peer is inspected, then forwarded to the
/// other. A protocol violation, a peer close, the idle bound, or the stop
/// signal all abort the handshake; the caller closes both sides by
/// dropping the streams.
async fn run_handshake(
    client: &mut TcpStream,
    server: &mut TcpStream,
    inspector: &mut HandshakeInspector,
    shutdown: &mut broadcast::Receiver<()>,
    wait_timeout: Duration,
    buffer_size: usize,
    counters: &mut (u64, u64),
) -> Result<(), DbRouterError> {
    let mut client_buf = vec![0u8; buffer_size];
    let mut server_buf = vec![0u8; buffer_size];

    while !inspector.handshake_done() {
        tokio::select! {
            res = client.read(&mut client_buf) => {
                let n = res.map_err(SessionError::Io)?;
                if n == 0 {
                    return Err(SessionError::PeerClosed.into());
                }
                inspector.observe(&client_buf[..n], false)?;
                server
                    .write_all(&client_buf[..n])
                    .await
                    .map_err(SessionError::Io)?;
                counters.0 += n as u64;
            }
            res = server.read(&mut server_buf) => {
                let n = res.map_err(SessionError::Io)?;
                if n == 0 {
                    return Err(SessionError::PeerClosed.into());
                }
                inspector.observe(&server_buf[..n], true)?;
                client
                    .write_all(&server_buf[..n])
                    .await
                    .map_err(SessionError::Io)?;
                counters.1 += n as u64;
            }
            _ = shutdown.recv() => {
                return Err(SessionError::Cancelled.into());
            }
            () = tokio::time::sleep(wait_timeout) => {
                return Err(SessionError::IdleTimeout.into());
            }
        }
    }

    Ok(())
}

fn is_blocked(networks: &[ipnet::IpNet], ip: IpAddr) -> bool {
    networks.iter().any(|net| net.contains(&ip))
}

/// Spawn a session task holding one unit of the bind's semaphore for its
/// whole lifetime.
pub fn spawn_session(
    ctx: SessionContext,
    stats: Arc<ConnectionStats>,
    permit: OwnedSemaphorePermit,
) -> JoinHandle<()> {
    let span = tracing::info_span!("session", client = %ctx.client_addr);

    tokio::spawn(
        async move {
            let _permit = permit;

            let result = handle_session(ctx).await;

            if let Some(copied) = result.copied {
                stats.record_completed(copied.client_to_server, copied.server_to_client);
                info!(
                    "Session closed: {} -> {}, {} up / {} down bytes",
                    result.client_addr,
                    result
                        .server_addr
                        .map_or_else(|| "-".to_string(), |a| a.to_string()),
                    copied.client_to_server,
                    copied.server_to_client,
                );
            } else {
                stats.record_error();
            }
        }
        .instrument(span),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_blocked() {
        let networks: Vec<ipnet::IpNet> =
            vec!["10.0.0.0/8".parse().unwrap(), "192.168.1.0/24".parse().unwrap()];

        assert!(is_blocked(&networks, "10.1.2.3".parse().unwrap()));
        assert!(is_blocked(&networks, "192.168.1.77".parse().unwrap()));
        assert!(!is_blocked(&networks, "192.168.2.1".parse().unwrap()));
        assert!(!is_blocked(&networks, "127.0.0.1".parse().unwrap()));
        assert!(!is_blocked(&[], "10.1.2.3".parse().unwrap()));
    }
}
