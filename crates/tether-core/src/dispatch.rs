//! Turns transport messages into state-store mutations and consumer updates.
//!
//! The strategy (canonical vs legacy) is chosen once, at handler
//! construction, from the runtime mode flag. It is never re-evaluated per
//! event and never silently swapped mid-session.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::bridge::CompatibilityBridge;
use crate::config::DispatchMode;
use crate::events::Source;
use crate::parser::{LegacyPayload, ParsedEvent};
use crate::store::ConversationStore;
use crate::transport::StreamMessage;

/// State mutations surfaced to consumers (renderers, logs).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Streaming progress on the in-flight message.
    Progress {
        session_id: String,
        text: String,
        thought: String,
    },
    /// The in-flight message is complete.
    Finalized {
        session_id: String,
        text: String,
        sources: Vec<Source>,
    },
    /// The service reported an explicit error for this turn.
    SessionError {
        session_id: String,
        code: Option<String>,
        message: String,
    },
    /// The conversation was handed off to another agent.
    Handoff {
        session_id: String,
        target: String,
    },
    /// The stream ended without finalizing; the in-flight message is
    /// errored, not left pending.
    Aborted {
        session_id: String,
        partial_text: String,
    },
}

pub type UpdateSender = mpsc::UnboundedSender<SessionUpdate>;

/// Per-session message handler produced by [`handler_for_session`].
pub trait EventHandler: Send {
    fn handle(&mut self, message: &StreamMessage);
    /// Called once when the turn's stream is over, however it ended.
    fn cleanup(&mut self);
}

/// Builds the handler for one session, selecting the strategy once from the
/// mode flag.
pub fn handler_for_session(
    mode: DispatchMode,
    session_id: impl Into<String>,
    store: Arc<ConversationStore>,
    updates: UpdateSender,
    bridge: Option<Arc<CompatibilityBridge>>,
) -> Box<dyn EventHandler> {
    let session_id = session_id.into();
    match mode {
        DispatchMode::Canonical => Box::new(CanonicalHandler {
            session_id,
            store,
            updates,
            buffer: String::new(),
            started: false,
            done: false,
        }),
        DispatchMode::Legacy => Box::new(LegacyHandler {
            session_id,
            updates,
            bridge,
            started: false,
            done: false,
        }),
    }
}

/// Native-schema handling: appends every raw event to the bounded log and
/// maps the event onto one of four outcomes.
struct CanonicalHandler {
    session_id: String,
    store: Arc<ConversationStore>,
    updates: UpdateSender,
    buffer: String,
    started: bool,
    done: bool,
}

impl EventHandler for CanonicalHandler {
    fn handle(&mut self, message: &StreamMessage) {
        let event = match message {
            StreamMessage::Canonical(event) => event,
            StreamMessage::Legacy(payload) => {
                // Mode mismatch; default to progress rather than dropping.
                warn!(kind = %payload.kind, "legacy payload on canonical handler");
                self.started = true;
                let _ = self.updates.send(SessionUpdate::Progress {
                    session_id: self.session_id.clone(),
                    text: legacy_text(&payload.data),
                    thought: String::new(),
                });
                return;
            }
        };

        self.started = true;
        self.store.append(&self.session_id, event.raw.clone());

        if let Some(code) = &event.raw.error_code {
            self.done = true;
            let _ = self.updates.send(SessionUpdate::SessionError {
                session_id: self.session_id.clone(),
                code: Some(code.clone()),
                message: event
                    .raw
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        } else if event.is_final_response {
            self.buffer.push_str(&event.text_content);
            self.done = true;
            let _ = self.updates.send(SessionUpdate::Finalized {
                session_id: self.session_id.clone(),
                text: self.buffer.clone(),
                sources: event.sources.clone(),
            });
        } else if let Some(target) = &event.transfer_to_agent {
            let _ = self.updates.send(SessionUpdate::Handoff {
                session_id: self.session_id.clone(),
                target: target.clone(),
            });
        } else {
            self.buffer.push_str(&event.text_content);
            let _ = self.updates.send(SessionUpdate::Progress {
                session_id: self.session_id.clone(),
                text: event.text_content.clone(),
                thought: event.thought_content.clone(),
            });
        }
    }

    fn cleanup(&mut self) {
        if self.started && !self.done {
            let _ = self.updates.send(SessionUpdate::Aborted {
                session_id: self.session_id.clone(),
                partial_text: std::mem::take(&mut self.buffer),
            });
        }
    }
}

/// Legacy-schema handling: adapts ad-hoc `type` tags onto the same four
/// outcomes and bridges canonical events. Never touches the raw-event log.
struct LegacyHandler {
    session_id: String,
    updates: UpdateSender,
    bridge: Option<Arc<CompatibilityBridge>>,
    started: bool,
    done: bool,
}

impl EventHandler for LegacyHandler {
    fn handle(&mut self, message: &StreamMessage) {
        match message {
            StreamMessage::Canonical(event) => {
                self.started = true;
                if let Some(bridge) = &self.bridge {
                    bridge.forward(&self.session_id, event);
                    bridge.broadcast_status(&self.session_id, event);
                }
                if event.is_final_response {
                    self.done = true;
                }
            }
            StreamMessage::Legacy(payload) => {
                self.started = true;
                self.handle_legacy(payload);
            }
        }
    }

    fn cleanup(&mut self) {
        if self.started && !self.done {
            let _ = self.updates.send(SessionUpdate::Aborted {
                session_id: self.session_id.clone(),
                partial_text: String::new(),
            });
        }
    }
}

impl LegacyHandler {
    fn handle_legacy(&mut self, payload: &LegacyPayload) {
        let update = match payload.kind.as_str() {
            "error" => {
                self.done = true;
                SessionUpdate::SessionError {
                    session_id: self.session_id.clone(),
                    code: payload
                        .data
                        .get("code")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    message: payload
                        .data
                        .get("message")
                        .and_then(Value::as_str)
                        .map_or_else(|| legacy_text(&payload.data), str::to_string),
                }
            }
            "turn_complete" | "complete" => {
                self.done = true;
                SessionUpdate::Finalized {
                    session_id: self.session_id.clone(),
                    text: legacy_text(&payload.data),
                    sources: Vec::new(),
                }
            }
            "status" | "agent_transfer" => SessionUpdate::Handoff {
                session_id: self.session_id.clone(),
                target: payload
                    .data
                    .get("transferToAgent")
                    .or_else(|| payload.data.get("agent"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            // Unknown tags are progress, not dropped.
            _ => SessionUpdate::Progress {
                session_id: self.session_id.clone(),
                text: legacy_text(&payload.data),
                thought: String::new(),
            },
        };
        let _ = self.updates.send(update);
    }
}

/// Pulls displayable text out of a legacy data object.
fn legacy_text(data: &Value) -> String {
    match data.get("text").or_else(|| data.get("message")) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => match data {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        },
    }
}
