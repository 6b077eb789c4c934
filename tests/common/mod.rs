//! Shared test support: mock classic-protocol backends and a router
//! harness bound to ephemeral ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use dbrouter::config::{Config, ConnectionConfig};
use dbrouter::destination::quarantine::QuarantineConfig;
use dbrouter::destination::resolver::global_registry;
use dbrouter::net::TcpConnector;
use dbrouter::protocol::classic;
use dbrouter::server::RouterService;
use dbrouter::BindConfig;

/// Greeting payload a mock server sends as packet 0
pub const GREETING_PAYLOAD: &[u8] = b"\x0a5.7.30-router-test\x00";

/// OK payload a mock server sends as packet 2
pub const OK_PAYLOAD: &[u8] = &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];

/// Read one classic-protocol packet: returns (seqno, payload)
pub async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = classic::payload_len(&header);
    let seq = classic::seqno(&header);
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok((seq, payload))
}

/// Build a plausible client handshake response payload (no TLS bit)
pub fn plain_response_payload() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&0x0000_a20du32.to_le_bytes()); // capabilities
    payload.extend_from_slice(&(16u32 * 1024 * 1024).to_le_bytes()); // max packet
    payload.push(8); // charset
    payload.extend_from_slice(&[0u8; 23]); // filler
    payload.extend_from_slice(b"tester\0");
    payload.push(0);
    payload
}

/// Build an SSL request payload: CLIENT_SSL set, short form
pub fn ssl_request_payload() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(dbrouter::CLIENT_SSL | 0x0200).to_le_bytes());
    payload.extend_from_slice(&(16u32 * 1024 * 1024).to_le_bytes());
    payload.push(8);
    payload.extend_from_slice(&[0u8; 23]);
    payload
}

/// Handle to a mock backend
pub struct MockServer {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn destination(&self) -> String {
        format!("{}:{}", self.addr.ip(), self.addr.port())
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// A backend that performs the greeting/response/OK exchange and then
/// echoes every byte back until the client side closes. Optionally records
/// each accept into a shared order log.
pub async fn spawn_echo_server(order: Option<(usize, Arc<Mutex<Vec<usize>>>)>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let accepted_clone = Arc::clone(&accepted);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            accepted_clone.fetch_add(1, Ordering::SeqCst);
            if let Some((id, ref log)) = order {
                log.lock().push(id);
            }
            tokio::spawn(async move {
                if stream
                    .write_all(&classic::build_packet(0, GREETING_PAYLOAD))
                    .await
                    .is_err()
                {
                    return;
                }
                let Ok(_response) = read_packet(&mut stream).await else {
                    return;
                };
                if stream
                    .write_all(&classic::build_packet(2, OK_PAYLOAD))
                    .await
                    .is_err()
                {
                    return;
                }

                let mut buf = [0u8; 8192];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    MockServer { addr, accepted }
}

/// A backend that sends the greeting and then captures everything the
/// router forwards to it until EOF, reporting the bytes per connection.
pub async fn spawn_capture_server(
    captured_tx: mpsc::UnboundedSender<Vec<u8>>,
) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let accepted_clone = Arc::clone(&accepted);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            accepted_clone.fetch_add(1, Ordering::SeqCst);
            let tx = captured_tx.clone();
            tokio::spawn(async move {
                if stream
                    .write_all(&classic::build_packet(0, GREETING_PAYLOAD))
                    .await
                    .is_err()
                {
                    return;
                }
                let mut captured = Vec::new();
                let mut buf = [0u8; 8192];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => captured.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = tx.send(captured);
            });
        }
    });

    MockServer { addr, accepted }
}

/// A backend that answers the client handshake response with an error
/// packet and closes.
pub async fn spawn_error_server() -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let accepted_clone = Arc::clone(&accepted);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            accepted_clone.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                if stream
                    .write_all(&classic::build_packet(0, GREETING_PAYLOAD))
                    .await
                    .is_err()
                {
                    return;
                }
                let Ok(_response) = read_packet(&mut stream).await else {
                    return;
                };
                let _ = stream
                    .write_all(&classic::error_packet(2, 1045, "28000", "Access denied"))
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });

    MockServer { addr, accepted }
}

/// Start a router with one bind and fast quarantine probing; returns the
/// running service and the bind's listen address.
pub async fn start_router(bind: BindConfig) -> (Arc<RouterService>, SocketAddr) {
    start_router_with_connection(bind, ConnectionConfig::default()).await
}

/// Start a router with explicit connection settings
pub async fn start_router_with_connection(
    bind: BindConfig,
    connection: ConnectionConfig,
) -> (Arc<RouterService>, SocketAddr) {
    let config = Config {
        binds: vec![bind],
        log: dbrouter::LogConfig::default(),
        connection,
        quarantine: QuarantineConfig {
            probe_interval_ms: 50,
            probe_timeout_ms: 200,
        },
    };
    config.validate().unwrap();

    let service = Arc::new(
        RouterService::build(&config, Arc::new(TcpConnector::new()), global_registry())
            .await
            .unwrap(),
    );
    let addr = service.local_addrs()[0];

    let runner = Arc::clone(&service);
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    (service, addr)
}

/// A bind config bound to an ephemeral port
pub fn ephemeral_bind(destinations: &str) -> BindConfig {
    BindConfig::simple(
        "127.0.0.1:0".parse().unwrap(),
        dbrouter::AccessMode::ReadWrite,
        destinations,
    )
}

/// Poll a condition until it holds or the deadline passes
pub async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// Connect to the router and complete a plain handshake; returns the
/// stream positioned after the OK packet.
pub async fn connect_and_handshake(router_addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(router_addr).await.unwrap();

    let (seq, greeting) = read_packet(&mut stream).await.unwrap();
    assert_eq!(seq, 0);
    assert_eq!(greeting[0], 0x0a);

    stream
        .write_all(&classic::build_packet(1, &plain_response_payload()))
        .await
        .unwrap();

    let (seq, _ok) = read_packet(&mut stream).await.unwrap();
    assert_eq!(seq, 2);

    stream
}
