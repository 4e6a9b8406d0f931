//! Turn orchestration: one request/response cycle against a session.
//!
//! Wires the session manager, a per-turn transport, and a dispatch handler
//! together. The session is always created first, by the server; the
//! transport is built per turn and bound late to the staged body.

use std::sync::Arc;

use anyhow::Result;

use crate::bridge::CompatibilityBridge;
use crate::client::{ApiClient, NewMessage, RunRequest};
use crate::config::{Config, DispatchMode};
use crate::dispatch::{handler_for_session, UpdateSender};
use crate::error::{SessionCreationError, TransportError};
use crate::session::{Session, SessionManager};
use crate::store::ConversationStore;
use crate::transport::{CommandTransport, StreamOutcome, SubscriptionTransport};

/// Entry point owning the shared pieces of the streaming subsystem.
pub struct TurnRunner {
    client: Arc<ApiClient>,
    sessions: SessionManager,
    store: Arc<ConversationStore>,
    mode: DispatchMode,
    bridge: Option<Arc<CompatibilityBridge>>,
}

impl TurnRunner {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_bridge(config, None)
    }

    /// Legacy deployments attach a bridge so canonical events keep flowing
    /// to old consumers during migration.
    pub fn with_bridge(config: &Config, bridge: Option<Arc<CompatibilityBridge>>) -> Result<Self> {
        let client = Arc::new(ApiClient::new(config)?);
        let store = Arc::new(ConversationStore::new());
        let sessions = SessionManager::new(Arc::clone(&client), config.cleanup, Arc::clone(&store));
        Ok(Self {
            client,
            sessions,
            store,
            mode: config.mode,
            bridge,
        })
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Creates the session a message will be composed against. Must succeed
    /// before any send; failure here blocks composition.
    pub async fn create_session(&self) -> Result<Session, SessionCreationError> {
        self.sessions.create().await
    }

    /// Runs one command-dialect turn: stage the message, connect, dispatch
    /// every delivered event, then clean up the handler.
    pub async fn send_message(
        &self,
        session_id: &str,
        text: &str,
        updates: UpdateSender,
    ) -> Result<StreamOutcome, TransportError> {
        let transport = CommandTransport::new(Arc::clone(&self.client), "");
        transport.stage_body(RunRequest {
            app_name: self.client.app_name().to_string(),
            user_id: self.client.user_id().to_string(),
            session_id: session_id.to_string(),
            new_message: NewMessage::user_text(text),
            streaming: true,
        });

        let mut handler = handler_for_session(
            self.mode,
            session_id,
            Arc::clone(&self.store),
            updates,
            self.bridge.clone(),
        );

        let mut delivered = false;
        let result = {
            let mut sink = |message: crate::transport::StreamMessage| {
                delivered = true;
                handler.handle(&message);
            };
            transport.connect(&mut sink).await
        };
        handler.cleanup();

        // The message reached the session once anything streamed back or
        // the turn completed; either way the session is no longer empty.
        if delivered || matches!(result, Ok(StreamOutcome::Completed)) {
            self.sessions.mark_active(session_id);
        }

        result
    }

    /// Attaches to the legacy subscription stream for a session.
    pub async fn watch(
        &self,
        session_id: &str,
        updates: UpdateSender,
    ) -> Result<StreamOutcome, TransportError> {
        let path = self.client.subscribe_path(session_id);
        let transport = SubscriptionTransport::new(Arc::clone(&self.client), path);

        let mut handler = handler_for_session(
            self.mode,
            session_id,
            Arc::clone(&self.store),
            updates,
            self.bridge.clone(),
        );

        let result = {
            let mut sink =
                |message: crate::transport::StreamMessage| handler.handle(&message);
            transport.connect(&mut sink).await
        };
        handler.cleanup();
        result
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::dispatch::SessionUpdate;

    fn config(server: &MockServer) -> Config {
        Config {
            base_url: server.uri(),
            app_name: "support".into(),
            user_id: "u-1".into(),
            ..Config::default()
        }
    }

    fn creation_ok(session_id: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "session_id": session_id,
            "app_name": "support",
            "user_id": "u-1",
            "created_at": "2026-01-01T00:00:00Z"
        }))
    }

    fn stream_body(lines: &[&str]) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(lines.join("\n"))
    }

    fn turn_lines(invocation: &str, ids: &[&str], final_text: &str) -> Vec<String> {
        let mut lines: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"id":"{id}","author":"agent","invocationId":"{invocation}","timestamp":1.0,"partial":true,"content":{{"parts":[{{"text":"…"}}]}}}}"#
                )
            })
            .collect();
        lines.push(format!(
            r#"{{"id":"{invocation}-final","author":"agent","invocationId":"{invocation}","timestamp":2.0,"content":{{"parts":[{{"text":"{final_text}"}}]}}}}"#
        ));
        lines
    }

    #[tokio::test]
    async fn test_ping_on_fresh_session_flips_has_messages_and_fills_buffer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps/support/users/u-1/sessions"))
            .respond_with(creation_ok("s-1"))
            .mount(&server)
            .await;
        let lines = turn_lines("inv-1", &["e1", "e2"], "pong");
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        Mock::given(method("POST"))
            .and(path("/run_sse"))
            .and(body_partial_json(serde_json::json!({"sessionId": "s-1"})))
            .respond_with(stream_body(&refs))
            .mount(&server)
            .await;

        let runner = TurnRunner::new(&config(&server)).unwrap();
        let session = runner.create_session().await.unwrap();
        assert!(!session.metadata.has_messages);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = runner.send_message("s-1", "ping", tx).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);

        // hasMessages flipped, and the buffer gained exactly the delivered
        // events.
        let session = runner.sessions().get("s-1").unwrap();
        assert!(session.metadata.has_messages);
        assert!(session.metadata.first_message_at.is_some());
        assert_eq!(runner.store().buffered_len("s-1"), 3);

        match rx.try_recv().unwrap() {
            SessionUpdate::Progress { .. } => {}
            other => panic!("expected Progress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_two_sequential_turns_append_in_strict_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps/support/users/u-1/sessions"))
            .respond_with(creation_ok("s-1"))
            .mount(&server)
            .await;

        let first = turn_lines("inv-1", &["a1", "a2"], "first");
        let second = turn_lines("inv-2", &["b1"], "second");
        let first_refs: Vec<&str> = first.iter().map(String::as_str).collect();
        let second_refs: Vec<&str> = second.iter().map(String::as_str).collect();

        Mock::given(method("POST"))
            .and(path("/run_sse"))
            .respond_with(stream_body(&first_refs))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let runner = TurnRunner::new(&config(&server)).unwrap();
        runner.create_session().await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        runner.send_message("s-1", "one", tx.clone()).await.unwrap();

        Mock::given(method("POST"))
            .and(path("/run_sse"))
            .respond_with(stream_body(&second_refs))
            .mount(&server)
            .await;
        runner.send_message("s-1", "two", tx).await.unwrap();

        let invocations: Vec<String> = runner
            .store()
            .snapshot("s-1")
            .into_iter()
            .map(|e| e.invocation_id)
            .collect();
        assert_eq!(
            invocations,
            ["inv-1", "inv-1", "inv-1", "inv-2", "inv-2"]
        );
    }

    #[tokio::test]
    async fn test_malformed_line_mid_stream_does_not_break_the_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps/support/users/u-1/sessions"))
            .respond_with(creation_ok("s-1"))
            .mount(&server)
            .await;

        let good = r#"{"id":"e1","author":"agent","invocationId":"i","timestamp":1.0,"partial":true,"content":{"parts":[{"text":"ok"}]}}"#;
        let final_line = r#"{"id":"e2","author":"agent","invocationId":"i","timestamp":2.0,"content":{"parts":[{"text":"done"}]}}"#;
        Mock::given(method("POST"))
            .and(path("/run_sse"))
            .respond_with(stream_body(&[good, "{broken json", final_line]))
            .mount(&server)
            .await;

        let runner = TurnRunner::new(&config(&server)).unwrap();
        runner.create_session().await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = runner.send_message("s-1", "hi", tx).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);
        // The malformed line was skipped; both valid events landed.
        assert_eq!(runner.store().buffered_len("s-1"), 2);
    }

    #[tokio::test]
    async fn test_failed_stream_marks_in_progress_message_errored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps/support/users/u-1/sessions"))
            .respond_with(creation_ok("s-1"))
            .mount(&server)
            .await;

        // Partial progress, then the feed dies with no completion signal.
        let partial = r#"{"id":"e1","author":"agent","invocationId":"i","timestamp":1.0,"partial":true,"content":{"parts":[{"text":"half"}]}}"#;
        Mock::given(method("POST"))
            .and(path("/run_sse"))
            .respond_with(stream_body(&[partial]))
            .mount(&server)
            .await;

        let runner = TurnRunner::new(&config(&server)).unwrap();
        runner.create_session().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = runner.send_message("s-1", "hi", tx).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Unconfirmed);

        let mut saw_aborted = false;
        while let Ok(update) = rx.try_recv() {
            if let SessionUpdate::Aborted { partial_text, .. } = update {
                assert_eq!(partial_text, "half");
                saw_aborted = true;
            }
        }
        assert!(saw_aborted);
    }
}
