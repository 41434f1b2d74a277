//! Per-connection state machine.
//!
//! A session reads bytes into a [`LineBuffer`] until a non-empty line is
//! available, dispatches it to the worker pool, writes the single response
//! and closes the connection:
//!
//! ```text
//! AwaitingLine -> Dispatched -> Responded | Failed -> Closed
//! ```
//!
//! Only one request is ever in flight per connection, and only the first
//! non-empty line is answered. Anything buffered after it is discarded.

use crate::analysis::{AnalysisRequest, AnalysisResult};
use crate::pool::PendingResponse;
use crate::protocol::Response;
use crate::server::ServerContext;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Initial read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

/// Accumulates raw bytes and yields complete, cleaned lines.
///
/// `scanned` marks how far the buffer has already been searched for a
/// newline so partial lines are not rescanned on every read.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(BUFFER_SIZE),
            scanned: 0,
        }
    }

    /// Append bytes received from the network.
    #[cfg(test)]
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Underlying buffer, for reading straight from a socket.
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes received but not yet consumed as lines.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next non-empty line.
    ///
    /// Lines are split on `\n`, stripped of every `\r` and trimmed. Lines
    /// that end up empty are consumed and skipped. Returns `None` once no
    /// complete line remains.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let offset = self.buf[self.scanned..].iter().position(|&b| b == b'\n');
            let Some(offset) = offset else {
                self.scanned = self.buf.len();
                return None;
            };

            let end = self.scanned + offset;
            let text = clean_line(&self.buf[..end]);
            self.buf.advance(end + 1);
            self.scanned = 0;

            if !text.is_empty() {
                return Some(text);
            }
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn clean_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .replace('\r', "")
        .trim()
        .to_string()
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Analysis succeeded and the result was sent
    Responded,
    /// The request failed and the generic error was sent
    Failed,
    /// Peer closed the connection before sending a non-empty line
    PeerClosed,
}

enum SessionState {
    AwaitingLine,
    Dispatched(PendingResponse),
    Responded(AnalysisResult),
    Failed,
    Closed(Outcome),
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::AwaitingLine => "awaiting_line",
            SessionState::Dispatched(_) => "dispatched",
            SessionState::Responded(_) => "responded",
            SessionState::Failed => "failed",
            SessionState::Closed(_) => "closed",
        }
    }
}

/// One client connection driven through its request lifecycle.
pub struct Session<'a, S> {
    stream: S,
    buffer: LineBuffer,
    state: SessionState,
    context: &'a ServerContext,
}

impl<'a, S> Session<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, context: &'a ServerContext) -> Self {
        Self {
            stream,
            buffer: LineBuffer::new(),
            state: SessionState::AwaitingLine,
            context,
        }
    }

    /// Drive the session until the connection is closed.
    pub async fn run(mut self) -> std::io::Result<Outcome> {
        loop {
            let state = std::mem::replace(&mut self.state, SessionState::AwaitingLine);
            let from = state.name();

            let next = match state {
                SessionState::AwaitingLine => match self.buffer.next_line() {
                    Some(text) => {
                        debug!(text = %text, "Dispatching to worker pool");
                        let pending = self.context.pool.dispatch(AnalysisRequest::new(text));
                        SessionState::Dispatched(pending)
                    }
                    None if self.buffer.pending() > self.context.max_line_bytes => {
                        warn!(
                            pending = self.buffer.pending(),
                            limit = self.context.max_line_bytes,
                            "Line exceeds size limit"
                        );
                        SessionState::Failed
                    }
                    None => {
                        let n = self.stream.read_buf(self.buffer.bytes_mut()).await?;
                        if n == 0 {
                            trace!(pending = self.buffer.pending(), "Connection closed by client");
                            SessionState::Closed(Outcome::PeerClosed)
                        } else {
                            SessionState::AwaitingLine
                        }
                    }
                },

                SessionState::Dispatched(pending) => {
                    let worker = pending.worker();
                    match pending.recv_timeout(self.context.request_timeout).await {
                        Ok(result) => SessionState::Responded(result),
                        Err(e) => {
                            warn!(worker, error = %e, "Request failed");
                            SessionState::Failed
                        }
                    }
                }

                SessionState::Responded(result) => {
                    self.context.audit.record(&result);
                    self.stream
                        .write_all(Response::analysis(&result).as_bytes())
                        .await?;
                    SessionState::Closed(Outcome::Responded)
                }

                SessionState::Failed => {
                    self.stream.write_all(Response::internal_error()).await?;
                    SessionState::Closed(Outcome::Failed)
                }

                SessionState::Closed(outcome) => {
                    if outcome != Outcome::PeerClosed {
                        self.stream.shutdown().await?;
                    }
                    return Ok(outcome);
                }
            };

            if from != next.name() {
                trace!(from, to = next.name(), "Session transition");
            }
            self.state = next;
        }
    }
}
