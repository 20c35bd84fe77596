//! Connection state machine for a single client.
//!
//! Each connection reads one request frame at a time, dispatches it, and
//! writes and flushes the reply before reading the next one:
//!
//! ```text
//! AwaitingCommand -> Dispatching -> Replying -> AwaitingCommand
//!        |                              |
//!        +--> ClosedClean               +--> ClosedError
//!        +--> ClosedError
//! ```
//!
//! A decode failure closes the connection without a reply, since the client
//! can no longer be trusted to frame one. The stream is dropped on every exit.

use crate::protocols::resp::{parse, Frame, ParseResult, ProtocolError, RespHandler};
use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::trace;

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Reasons a connection ends abnormally
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Current state of a connection.
#[derive(Debug)]
enum ConnState {
    /// Waiting for the next request frame.
    AwaitingCommand,
    /// A complete request frame is ready to run.
    Dispatching(Frame),
    /// A reply is ready to be written and flushed.
    Replying(Frame),
    /// The client closed the stream between requests.
    ClosedClean,
    /// Decoding, reading or writing failed.
    ClosedError(ConnectionError),
}

/// Framed reader/writer over a byte stream.
pub struct Connection<S> {
    stream: BufWriter<S>,
    buffer: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Connection {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    /// Read one complete frame.
    ///
    /// Returns `Ok(None)` if the stream ends before any byte of a new frame,
    /// and `ProtocolError::Truncated` if it ends partway through one.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            match parse(&self.buffer) {
                ParseResult::Complete(frame, consumed) => {
                    self.buffer.advance(consumed);
                    return Ok(Some(frame));
                }
                ParseResult::Error(e) => return Err(e.into()),
                ParseResult::Incomplete => {}
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Truncated.into());
            }
        }
    }

    /// Write a frame and flush it to the peer
    pub async fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        self.stream.write_all(&frame.encode()).await?;
        self.stream.flush().await
    }
}

/// Run the command loop for one client until it disconnects or fails.
pub async fn handle_connection<S>(stream: S, handler: RespHandler) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(stream);
    let mut state = ConnState::AwaitingCommand;

    loop {
        state = match state {
            ConnState::AwaitingCommand => match conn.read_frame().await {
                Ok(Some(frame)) => ConnState::Dispatching(frame),
                Ok(None) => ConnState::ClosedClean,
                Err(e) => ConnState::ClosedError(e),
            },

            ConnState::Dispatching(frame) => {
                trace!(?frame, "Processing RESP command");
                ConnState::Replying(handler.dispatch(frame))
            }

            ConnState::Replying(reply) => match conn.write_frame(&reply).await {
                Ok(()) => ConnState::AwaitingCommand,
                Err(e) => ConnState::ClosedError(e.into()),
            },

            ConnState::ClosedClean => {
                trace!("Connection closed by client");
                return Ok(());
            }

            ConnState::ClosedError(e) => return Err(e),
        };
    }
}
