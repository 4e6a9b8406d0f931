//! Stream transport: one logical connection per turn.
//!
//! Two wire dialects share one surface (connect / cancel / state watch):
//! the long-lived read-only subscription stream and the command stream that
//! submits a message and reads the reply. Both hand every payload line to
//! the parser and never let a malformed line take the connection down.

mod command;
mod subscription;

pub use command::CommandTransport;
pub use subscription::SubscriptionTransport;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::parser::{parse_line, LegacyPayload, ParseOutcome, ParsedEvent};

/// One message delivered by a transport, in either dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Canonical(Box<ParsedEvent>),
    Legacy(LegacyPayload),
}

/// Observable connection state.
///
/// Legal transitions: `Disconnected → Connecting → Connected →
/// {Disconnected, Error}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error { message: String },
}

impl ConnectionState {
    fn error(message: impl Into<String>) -> Self {
        ConnectionState::Error {
            message: message.into(),
        }
    }
}

/// How a turn's stream ended.
///
/// `Unconfirmed` is the load-bearing variant: a feed that merely closed,
/// with no terminator and no final event, must not be treated as success.
/// Some network intermediaries close connections without delivering the
/// tail of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Explicit terminator seen, or a final event with nothing pending.
    Completed,
    /// Connection closed with no completion signal.
    Unconfirmed,
    /// Cancelled by the caller.
    Cancelled,
}

/// Receiving half of a transport's state observable.
pub type StateWatch = watch::Receiver<ConnectionState>;

/// Consumer of parsed messages during a connection.
pub type EventSink<'a> = &'a mut (dyn FnMut(StreamMessage) + Send);

/// Splits incoming bytes into lines, decoding only complete lines.
///
/// The network hands chunks over at arbitrary boundaries, including inside
/// a multi-byte UTF-8 sequence. The newline byte never occurs inside such a
/// sequence, so splitting on raw bytes first keeps split characters intact.
#[derive(Default)]
struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Drains whatever is left as one unterminated line.
    fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Reads a response body line by line, parsing and delivering each event.
///
/// Parse failures are logged and skipped. Returns when the terminator or a
/// final event arrives, the feed closes, the caller cancels, or the network
/// fails mid-stream.
pub(crate) async fn drive_stream(
    response: reqwest::Response,
    cancel: &CancellationToken,
    on_event: EventSink<'_>,
) -> Result<StreamOutcome, TransportError> {
    let mut body = response.bytes_stream();
    let mut framer = LineFramer::default();

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                framer.extend(&bytes);
                while let Some(line) = framer.next_line() {
                    if let Some(outcome) = feed_line(line.trim_end_matches(['\n', '\r']), on_event) {
                        return Ok(outcome);
                    }
                }
            }
            Some(Err(err)) => {
                return Err(TransportError::network(format!("stream read failed: {err}")));
            }
            None => {
                // Flush a trailing unterminated line before deciding.
                if let Some(line) = framer.take_remainder() {
                    if let Some(outcome) = feed_line(line.trim_end_matches('\r'), on_event) {
                        return Ok(outcome);
                    }
                }
                debug!("feed closed without completion signal");
                return Ok(StreamOutcome::Unconfirmed);
            }
        }
    }
}

/// Parses one line; returns a completion outcome when the line ends the
/// stream, `None` when reading should continue.
fn feed_line(line: &str, on_event: EventSink<'_>) -> Option<StreamOutcome> {
    match parse_line(line) {
        ParseOutcome::Skip => None,
        ParseOutcome::Terminator => Some(StreamOutcome::Completed),
        ParseOutcome::Failure(failure) => {
            warn!(%failure, "skipping unparseable stream line");
            None
        }
        ParseOutcome::Legacy(payload) => {
            on_event(StreamMessage::Legacy(payload));
            None
        }
        ParseOutcome::Event(event) => {
            let is_final = event.is_final_response;
            on_event(StreamMessage::Canonical(event));
            is_final.then_some(StreamOutcome::Completed)
        }
    }
}
