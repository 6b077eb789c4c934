//! Bidirectional relay between client and server streams
//!
//! Copies data in both directions until both reach EOF, an I/O error
//! occurs, or no byte moves in either direction for longer than the idle
//! limit. A clean close of one direction lets the other drain before the
//! relay finishes.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

use crate::error::SessionError;

/// Byte counters of a finished relay
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyResult {
    /// Bytes transferred from client to server
    pub client_to_server: u64,
    /// Bytes transferred from server to client
    pub server_to_client: u64,
}

impl CopyResult {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_server + self.server_to_client
    }
}

/// Where one relay direction currently is
#[derive(Debug, Clone, Copy)]
enum PipeState {
    /// Waiting for the next chunk from the reader
    Reading,
    /// Writing `buf[sent..filled]` to the other peer
    Writing { sent: usize, filled: usize },
    /// Reader closed; flush and shut down the writer so the peer sees the
    /// close only after everything relayed so far
    Closing,
    /// Direction finished
    Done,
}

/// One direction of the relay
struct Pipe {
    buf: Box<[u8]>,
    state: PipeState,
    relayed: u64,
}

impl Pipe {
    fn new(buf_size: usize) -> Self {
        Self {
            buf: vec![0u8; buf_size].into_boxed_slice(),
            state: PipeState::Reading,
            relayed: 0,
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, PipeState::Done)
    }

    /// Drive this direction as far as both streams currently allow
    fn poll_run<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            match self.state {
                PipeState::Reading => {
                    let mut space = ReadBuf::new(&mut self.buf);
                    match reader.as_mut().poll_read(cx, &mut space) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Ready(Ok(())) => {
                            let filled = space.filled().len();
                            self.state = if filled == 0 {
                                PipeState::Closing
                            } else {
                                PipeState::Writing { sent: 0, filled }
                            };
                        }
                    }
                }
                PipeState::Writing { sent, filled } => {
                    match writer.as_mut().poll_write(cx, &self.buf[sent..filled]) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Ready(Ok(0)) => {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::WriteZero,
                                "peer stopped accepting bytes",
                            )));
                        }
                        Poll::Ready(Ok(n)) => {
                            self.relayed += n as u64;
                            self.state = if sent + n == filled {
                                PipeState::Reading
                            } else {
                                PipeState::Writing {
                                    sent: sent + n,
                                    filled,
                                }
                            };
                        }
                    }
                }
                PipeState::Closing => {
                    // Flush is re-entered on the next poll if shutdown is
                    // not ready yet; flushing twice is harmless
                    match writer.as_mut().poll_flush(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Ready(Ok(())) => {}
                    }
                    match writer.as_mut().poll_shutdown(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Ready(Ok(())) => self.state = PipeState::Done,
                    }
                }
                PipeState::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}

/// Relay future with an idle deadline
struct RelayCopy<'a, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    client: &'a mut A,
    server: &'a mut B,
    up: Pipe,
    down: Pipe,
    idle: Pin<Box<Sleep>>,
    max_idle: Duration,
}

impl<'a, A, B> RelayCopy<'a, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    fn new(client: &'a mut A, server: &'a mut B, buf_size: usize, max_idle: Duration) -> Self {
        Self {
            client,
            server,
            up: Pipe::new(buf_size),
            down: Pipe::new(buf_size),
            idle: Box::pin(sleep(max_idle)),
            max_idle,
        }
    }
}

impl<A, B> Future for RelayCopy<'_, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    type Output = Result<CopyResult, SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        let moved_before = this.up.relayed + this.down.relayed;

        if let Poll::Ready(Err(e)) =
            this.up
                .poll_run(cx, Pin::new(&mut this.client), Pin::new(&mut this.server))
        {
            return Poll::Ready(Err(SessionError::Io(e)));
        }
        if let Poll::Ready(Err(e)) =
            this.down
                .poll_run(cx, Pin::new(&mut this.server), Pin::new(&mut this.client))
        {
            return Poll::Ready(Err(SessionError::Io(e)));
        }

        if this.up.is_done() && this.down.is_done() {
            return Poll::Ready(Ok(CopyResult {
                client_to_server: this.up.relayed,
                server_to_client: this.down.relayed,
            }));
        }

        if this.up.relayed + this.down.relayed != moved_before {
            this.idle.as_mut().reset(Instant::now() + this.max_idle);
        }

        if this.idle.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(SessionError::IdleTimeout));
        }

        Poll::Pending
    }
}

/// Relay bytes between a client and a server stream until both directions
/// reach EOF.
///
/// # Errors
///
/// - `SessionError::IdleTimeout` when no byte moves for `max_idle`
/// - `SessionError::Io` on a transfer error in either direction
pub async fn relay_with_idle<A, B>(
    client: &mut A,
    server: &mut B,
    buf_size: usize,
    max_idle: Duration,
) -> Result<CopyResult, SessionError>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    RelayCopy::new(client, server, buf_size, max_idle).await
}
