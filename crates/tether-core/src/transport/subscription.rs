//! Subscription dialect: long-lived read-only stream on a pre-known path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::{TransportError, TransportErrorKind};
use crate::transport::{drive_stream, ConnectionState, EventSink, StateWatch, StreamOutcome};

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Read-only stream keyed by a path known at construction time.
///
/// Retries with exponential backoff on failure; after [`MAX_ATTEMPTS`]
/// failures the state goes terminally to `Error`.
pub struct SubscriptionTransport {
    client: Arc<ApiClient>,
    path: String,
    state_tx: watch::Sender<ConnectionState>,
    // Keeps the channel alive so state sends are stored even before any
    // caller subscribes via `state()`.
    _state_rx: StateWatch,
    cancel: CancellationToken,
    backoff_base: Duration,
}

impl SubscriptionTransport {
    pub fn new(client: Arc<ApiClient>, path: impl Into<String>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            client,
            path: path.into(),
            state_tx,
            _state_rx: state_rx,
            cancel: CancellationToken::new(),
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Shrinks backoff delays so retry tests run in real time.
    #[cfg(test)]
    pub(crate) fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn state(&self) -> StateWatch {
        self.state_tx.subscribe()
    }

    /// Aborts the in-flight transfer. Idempotent and safe even if the
    /// transport never connected.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }

    /// Connects and reads until completion, cancellation, or retry
    /// exhaustion. Refuses an empty path without touching the network.
    pub async fn connect(&self, on_event: EventSink<'_>) -> Result<StreamOutcome, TransportError> {
        if self.path.is_empty() {
            let _ = self.state_tx.send(ConnectionState::Disconnected);
            return Err(TransportError::not_routable(
                "subscription path is empty",
            ));
        }

        if self.cancel.is_cancelled() {
            let _ = self.state_tx.send(ConnectionState::Disconnected);
            return Ok(StreamOutcome::Cancelled);
        }

        let mut last_error: Option<TransportError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff_delay(self.backoff_base, attempt);
                info!(attempt, ?delay, "reconnecting subscription stream");
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        let _ = self.state_tx.send(ConnectionState::Disconnected);
                        return Ok(StreamOutcome::Cancelled);
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let _ = self.state_tx.send(ConnectionState::Connecting);
            let response = tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = self.state_tx.send(ConnectionState::Disconnected);
                    return Ok(StreamOutcome::Cancelled);
                }
                response = self.client.open_subscribe_stream(&self.path) => response,
            };

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    warn!(%err, attempt, "subscription connect failed");
                    last_error = Some(err);
                    continue;
                }
            };

            let _ = self.state_tx.send(ConnectionState::Connected);
            match drive_stream(response, &self.cancel, on_event).await {
                Ok(StreamOutcome::Completed) => {
                    let _ = self.state_tx.send(ConnectionState::Disconnected);
                    return Ok(StreamOutcome::Completed);
                }
                Ok(StreamOutcome::Cancelled) => {
                    let _ = self.state_tx.send(ConnectionState::Disconnected);
                    return Ok(StreamOutcome::Cancelled);
                }
                // Closed without a completion signal: treat like a dropped
                // connection and retry.
                Ok(StreamOutcome::Unconfirmed) => {
                    warn!(attempt, "subscription feed closed without completion signal");
                    last_error = Some(TransportError::network(
                        "feed closed without completion signal",
                    ));
                }
                Err(err) => {
                    warn!(%err, attempt, "subscription stream failed mid-read");
                    last_error = Some(err);
                }
            }
        }

        let last = last_error
            .map_or_else(|| "no attempt recorded".to_string(), |e| e.to_string());
        let error = TransportError::new(
            TransportErrorKind::RetriesExhausted,
            format!("giving up after {MAX_ATTEMPTS} attempts: {last}"),
        );
        let _ = self.state_tx.send(ConnectionState::error(error.to_string()));
        Err(error)
    }
}

/// Exponential backoff: base doubled per attempt, capped.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt - 1)).min(BACKOFF_CAP)
}
