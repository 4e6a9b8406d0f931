//! Wire-level event types for the agent execution service.
//!
//! These mirror the service's JSON schema one-to-one. Normalization into
//! [`crate::parser::ParsedEvent`] happens in the parser; nothing here is
//! derived or computed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of output from the agent execution service.
///
/// `id` is unique within an invocation. An event with `partial=true` never
/// ends a turn, regardless of any other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub author: String,
    pub invocation_id: String,
    /// Seconds since the Unix epoch, fractional.
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<EventActions>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_metadata: Option<GroundingMetadata>,
}

/// Ordered part sequence attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// One fragment of an event's content.
///
/// The wire schema discriminates by which field is present, so this is an
/// untagged union. Variant order matters: function parts are tried before
/// text so an object carrying both shapes resolves to the structured one.
/// Anything unrecognized lands in `Other` and is skipped by extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
    Text {
        text: String,
        #[serde(default)]
        thought: bool,
    },
    Other(Value),
}

/// Model-requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Tool result flowing back through the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: Value,
}

/// Side-channel actions attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventActions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_to_agent: Option<String>,
    /// Unmodeled action fields are preserved, not dropped.
    #[serde(flatten)]
    pub extra: Value,
}

/// Event-level citation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A citation backing part of a response, normalized from grounding
/// metadata or from sources embedded in a function response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Part {
    /// Returns the text and thought flag if this is a text part.
    pub fn as_text(&self) -> Option<(&str, bool)> {
        match self {
            Part::Text { text, thought } => Some((text, *thought)),
            _ => None,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Part::FunctionCall { .. } | Part::FunctionResponse { .. })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_part_discriminates_by_field_presence() {
        let text: Part = serde_json::from_value(json!({"text": "hi"})).unwrap();
        assert_eq!(text.as_text(), Some(("hi", false)));

        let thought: Part = serde_json::from_value(json!({"text": "hmm", "thought": true})).unwrap();
        assert_eq!(thought.as_text(), Some(("hmm", true)));

        let call: Part =
            serde_json::from_value(json!({"functionCall": {"name": "search", "args": {"q": "x"}}}))
                .unwrap();
        assert!(matches!(call, Part::FunctionCall { .. }));

        let resp: Part = serde_json::from_value(
            json!({"functionResponse": {"name": "search", "response": {"result": "y"}}}),
        )
        .unwrap();
        assert!(matches!(resp, Part::FunctionResponse { .. }));
    }

    #[test]
    fn test_unknown_part_shape_is_preserved() {
        let other: Part =
            serde_json::from_value(json!({"inlineData": {"mimeType": "image/png"}})).unwrap();
        assert!(matches!(other, Part::Other(_)));
        assert!(!other.is_function());
    }

    #[test]
    fn test_event_deserializes_camel_case_wire_names() {
        let event: Event = serde_json::from_value(json!({
            "id": "e1",
            "author": "agent",
            "invocationId": "inv-1",
            "timestamp": 1700000000.5,
            "content": {"parts": [{"text": "hello"}], "role": "model"},
            "turnComplete": true
        }))
        .unwrap();
        assert_eq!(event.invocation_id, "inv-1");
        assert_eq!(event.turn_complete, Some(true));
        assert!(!event.partial);
    }
}
