//! Compatibility bridge: canonical events re-emitted in the legacy shape.
//!
//! Active only in legacy mode, purely additive, and independently
//! disableable. Canonical state is never mutated from here.

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::extract;
use crate::parser::ParsedEvent;

/// A legacy-dialect message: `{type, data}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

/// Forwards canonical events into the legacy message shape.
pub struct CompatibilityBridge {
    sink: mpsc::UnboundedSender<LegacyMessage>,
    enabled: bool,
}

impl CompatibilityBridge {
    pub fn new(sink: mpsc::UnboundedSender<LegacyMessage>) -> Self {
        Self {
            sink,
            enabled: true,
        }
    }

    pub fn disabled(sink: mpsc::UnboundedSender<LegacyMessage>) -> Self {
        Self {
            sink,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Re-emits an event's renderable content as a legacy update message.
    pub fn forward(&self, session_id: &str, event: &ParsedEvent) {
        if !self.enabled {
            return;
        }

        let tool_results: Vec<String> = event
            .function_responses
            .iter()
            .map(|response| extract::function_response_text(&response.response))
            .collect();

        let message = LegacyMessage {
            kind: "update".to_string(),
            data: json!({
                "sessionId": session_id,
                "text": event.text_content,
                "toolResults": tool_results,
                "final": event.is_final_response,
            }),
        };
        debug!(%session_id, "bridging update message");
        let _ = self.sink.send(message);
    }

    /// Re-emits a handoff action as a legacy status message. Events without
    /// a handoff produce nothing.
    pub fn broadcast_status(&self, session_id: &str, event: &ParsedEvent) {
        if !self.enabled {
            return;
        }
        let Some(target) = &event.transfer_to_agent else {
            return;
        };

        let message = LegacyMessage {
            kind: "status".to_string(),
            data: json!({
                "sessionId": session_id,
                "transferToAgent": target,
            }),
        };
        debug!(%session_id, %target, "bridging status message");
        let _ = self.sink.send(message);
    }
}
