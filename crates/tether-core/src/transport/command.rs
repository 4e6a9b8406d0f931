//! Command dialect: stage a message body, then connect for one turn.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::{ApiClient, RunRequest};
use crate::error::TransportError;
use crate::transport::{drive_stream, ConnectionState, EventSink, StateWatch, StreamOutcome};

/// One-shot message-submission stream.
///
/// The endpoint path may be unknown at construction time; connect succeeds
/// anyway by synthesizing it once a staged body carries a non-empty session
/// id (late binding). A connect call must not be refused for an empty
/// configured path if a usable body is already staged.
///
/// Never auto-reconnects: a new command is a new turn, and a failure
/// surfaces once, terminally.
pub struct CommandTransport {
    client: Arc<ApiClient>,
    configured_path: String,
    staged: Mutex<Option<RunRequest>>,
    state_tx: watch::Sender<ConnectionState>,
    // Keeps the channel alive so state sends are stored even before any
    // caller subscribes via `state()`.
    _state_rx: StateWatch,
    cancel: CancellationToken,
}

impl CommandTransport {
    /// `configured_path` may be empty; see [`CommandTransport`].
    pub fn new(client: Arc<ApiClient>, configured_path: impl Into<String>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            client,
            configured_path: configured_path.into(),
            staged: Mutex::new(None),
            state_tx,
            _state_rx: state_rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Stages the body for the next connect. Replaces any previous body.
    pub fn stage_body(&self, request: RunRequest) {
        *self.staged.lock().expect("staged body lock poisoned") = Some(request);
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

    /// Submits the staged body and reads the turn's reply stream.
    pub async fn connect(&self, on_event: EventSink<'_>) -> Result<StreamOutcome, TransportError> {
        let staged = self
            .staged
            .lock()
            .expect("staged body lock poisoned")
            .clone();

        let Some(path) = self.resolve_path(staged.as_ref()) else {
            // Nothing routable: no path and no usable body. No network call.
            let _ = self.state_tx.send(ConnectionState::Disconnected);
            return Err(TransportError::not_routable(
                "no configured path and no staged body with a session id",
            ));
        };
        let Some(request) = staged else {
            let _ = self.state_tx.send(ConnectionState::Disconnected);
            return Err(TransportError::not_routable("no staged body to submit"));
        };

        if self.cancel.is_cancelled() {
            let _ = self.state_tx.send(ConnectionState::Disconnected);
            return Ok(StreamOutcome::Cancelled);
        }

        let _ = self.state_tx.send(ConnectionState::Connecting);
        let response = tokio::select! {
            () = self.cancel.cancelled() => {
                let _ = self.state_tx.send(ConnectionState::Disconnected);
                return Ok(StreamOutcome::Cancelled);
            }
            response = self.client.open_run_stream(&path, &request) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "command connect failed");
                let _ = self.state_tx.send(ConnectionState::error(err.to_string()));
                return Err(err);
            }
        };

        let _ = self.state_tx.send(ConnectionState::Connected);
        match drive_stream(response, &self.cancel, on_event).await {
            Ok(outcome) => {
                let _ = self.state_tx.send(ConnectionState::Disconnected);
                Ok(outcome)
            }
            Err(err) => {
                let _ = self.state_tx.send(ConnectionState::error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Late binding: the configured path wins when present; otherwise the
    /// path is synthesized from the staged body's session id.
    fn resolve_path(&self, staged: Option<&RunRequest>) -> Option<String> {
        if !self.configured_path.is_empty() {
            return Some(self.configured_path.clone());
        }
        match staged {
            Some(request) if !request.session_id.is_empty() => Some(self.client.run_path()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client::NewMessage;
    use crate::config::Config;
    use crate::error::TransportErrorKind;
    use crate::transport::StreamMessage;

    fn api_client(server: &MockServer) -> Arc<ApiClient> {
        let config = Config {
            base_url: server.uri(),
            app_name: "support".into(),
            user_id: "u-1".into(),
            ..Config::default()
        };
        Arc::new(ApiClient::new(&config).unwrap())
    }

    fn run_request(session_id: &str) -> RunRequest {
        RunRequest {
            app_name: "support".into(),
            user_id: "u-1".into(),
            session_id: session_id.into(),
            new_message: NewMessage::user_text("ping"),
            streaming: true,
        }
    }

    fn stream_body(lines: &[&str]) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(lines.join("\n"))
    }

    #[tokio::test]
    async fn test_late_binding_connects_with_empty_configured_path() {
        let server = MockServer::start().await;
        let event = r#"{"id":"e1","author":"agent","invocationId":"i","timestamp":1.0,"content":{"parts":[{"text":"pong"}]}}"#;
        Mock::given(method("POST"))
            .and(path("/run_sse"))
            .and(body_partial_json(serde_json::json!({"sessionId": "s-1"})))
            .respond_with(stream_body(&[event, "[DONE]"]))
            .expect(1)
            .mount(&server)
            .await;

        // Transport built before any session id was known.
        let transport = CommandTransport::new(api_client(&server), "");
        transport.stage_body(run_request("s-1"));

        let state = transport.state();
        let mut texts = Vec::new();
        let mut sink = |message: StreamMessage| {
            if let StreamMessage::Canonical(event) = message {
                texts.push(event.text_content);
            }
        };
        let outcome = transport.connect(&mut sink).await.unwrap();

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(texts, ["pong"]);
        // The watch moved off Disconnected (through Connecting) and back.
        assert_eq!(state.has_changed().ok(), Some(true));
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_no_body_and_empty_path_refused_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(stream_body(&["[DONE]"]))
            .expect(0)
            .mount(&server)
            .await;

        let transport = CommandTransport::new(api_client(&server), "");
        let mut sink = |_message: StreamMessage| {};
        let err = transport.connect(&mut sink).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::NotRoutable);
        assert_eq!(*transport.state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_staged_body_with_empty_session_id_is_not_routable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(stream_body(&["[DONE]"]))
            .expect(0)
            .mount(&server)
            .await;

        let transport = CommandTransport::new(api_client(&server), "");
        transport.stage_body(run_request(""));
        let mut sink = |_message: StreamMessage| {};
        let err = transport.connect(&mut sink).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::NotRoutable);
    }

    #[tokio::test]
    async fn test_http_failure_is_terminal_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/run_sse"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = CommandTransport::new(api_client(&server), "");
        transport.stage_body(run_request("s-1"));
        let mut sink = |_message: StreamMessage| {};
        let err = transport.connect(&mut sink).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::HttpStatus);
        assert!(matches!(
            *transport.state().borrow(),
            ConnectionState::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_eof_without_completion_is_unconfirmed() {
        let server = MockServer::start().await;
        let partial = r#"{"id":"e1","author":"agent","invocationId":"i","timestamp":1.0,"partial":true,"content":{"parts":[{"text":"hal"}]}}"#;
        Mock::given(method("POST"))
            .and(path("/run_sse"))
            .respond_with(stream_body(&[partial]))
            .mount(&server)
            .await;

        let transport = CommandTransport::new(api_client(&server), "");
        transport.stage_body(run_request("s-1"));
        let mut sink = |_message: StreamMessage| {};
        let outcome = transport.connect(&mut sink).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Unconfirmed);
    }

    #[tokio::test]
    async fn test_cancel_before_connect_never_touches_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(stream_body(&["[DONE]"]))
            .expect(0)
            .mount(&server)
            .await;

        let transport = CommandTransport::new(api_client(&server), "");
        transport.stage_body(run_request("s-1"));
        transport.cancel();
        transport.cancel();

        let mut sink = |_message: StreamMessage| {};
        let outcome = transport.connect(&mut sink).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Cancelled);
    }
}
