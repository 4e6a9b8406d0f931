//! Normalizes raw wire lines into typed, derived events.
//!
//! The stream is newline-delimited JSON with SSE-style framing noise mixed
//! in: blank keep-alive lines, `:` comment lines, an optional `data:` prefix,
//! and a `[DONE]` terminator. Everything that is not a parseable event is
//! either skipped or reported as a structured failure; nothing here panics
//! or terminates the stream.

use serde_json::Value;

use crate::error::ParseFailure;
use crate::events::{Event, FunctionCall, FunctionResponse, Source};
use crate::extract;

/// End-of-stream sentinel emitted by the service.
pub const STREAM_TERMINATOR: &str = "[DONE]";

/// Fields checked before any semantic parsing. A missing one yields a
/// failure naming the field.
const REQUIRED_FIELDS: [&str; 4] = ["id", "author", "invocationId", "timestamp"];

/// An event plus everything derived from it in a single pass.
///
/// Built once by [`parse_line`], immutable afterwards, and never serialized
/// back to the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub raw: Event,
    pub text_content: String,
    pub thought_content: String,
    pub function_calls: Vec<FunctionCall>,
    pub function_responses: Vec<FunctionResponse>,
    pub sources: Vec<Source>,
    /// True when the event is not partial and carries no pending tool
    /// call or response, i.e. nothing further is expected for this turn.
    pub is_final_response: bool,
    pub transfer_to_agent: Option<String>,
}

/// An ad-hoc `{type, data}` payload from the legacy stream dialect.
///
/// Carried through unchanged; the legacy dispatcher maps the tag onto the
/// same outcomes canonical events produce.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyPayload {
    /// The wire `type` tag.
    pub kind: String,
    pub data: Value,
}

/// Result of feeding one wire line to the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// A normalized event.
    Event(Box<ParsedEvent>),
    /// A legacy-dialect payload. Both dialects share line framing, so the
    /// parser recognizes both shapes.
    Legacy(LegacyPayload),
    /// Framing noise: blank line or comment. Not an error.
    Skip,
    /// The explicit end-of-stream sentinel.
    Terminator,
    /// The line looked like a payload but could not be normalized.
    Failure(ParseFailure),
}

/// Parses one raw line from either wire dialect.
///
/// Single pass over the content parts; typical events normalize in well
/// under a millisecond. Pure and safe to call concurrently from multiple
/// streams.
pub fn parse_line(raw: &str) -> ParseOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return ParseOutcome::Skip;
    }

    // Tolerate SSE-style data framing from intermediaries.
    let payload = trimmed.strip_prefix("data:").map_or(trimmed, str::trim_start);
    if payload == STREAM_TERMINATOR {
        return ParseOutcome::Terminator;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            return ParseOutcome::Failure(ParseFailure::MalformedJson {
                detail: err.to_string(),
            });
        }
    };

    let Some(object) = value.as_object() else {
        return ParseOutcome::Failure(ParseFailure::NotAnObject);
    };
    for field in REQUIRED_FIELDS {
        if !object.contains_key(field) {
            // Legacy-dialect lines carry a `type` tag instead of the
            // canonical required fields.
            if let Some(kind) = object.get("type").and_then(Value::as_str) {
                return ParseOutcome::Legacy(LegacyPayload {
                    kind: kind.to_string(),
                    data: object.get("data").cloned().unwrap_or(Value::Null),
                });
            }
            return ParseOutcome::Failure(ParseFailure::missing_field(field));
        }
    }

    let event: Event = match serde_json::from_value(value) {
        Ok(event) => event,
        Err(err) => {
            return ParseOutcome::Failure(ParseFailure::MalformedJson {
                detail: err.to_string(),
            });
        }
    };

    #[cfg(debug_assertions)]
    if let Err(failure) = validate(&event) {
        return ParseOutcome::Failure(failure);
    }

    ParseOutcome::Event(Box::new(normalize(event)))
}

/// Derives the renderable view of an event.
fn normalize(event: Event) -> ParsedEvent {
    let parts: &[crate::events::Part] = event
        .content
        .as_ref()
        .map_or(&[], |content| content.parts.as_slice());

    let (text_content, thought_content) = extract::partition_text(parts);

    let mut function_calls = Vec::new();
    let mut function_responses = Vec::new();
    for part in parts {
        match part {
            crate::events::Part::FunctionCall { function_call } => {
                function_calls.push(function_call.clone());
            }
            crate::events::Part::FunctionResponse { function_response } => {
                function_responses.push(function_response.clone());
            }
            _ => {}
        }
    }

    let sources = extract::merge_sources(event.grounding_metadata.as_ref(), &function_responses);

    let transfer_to_agent = event
        .actions
        .as_ref()
        .and_then(|actions| actions.transfer_to_agent.clone());

    // A partial event never ends a turn. Otherwise the turn is over when
    // the service says so explicitly, or when no call/response is pending.
    let is_final_response = !event.partial
        && (event.turn_complete == Some(true)
            || (function_calls.is_empty() && function_responses.is_empty()));

    ParsedEvent {
        raw: event,
        text_content,
        thought_content,
        function_calls,
        function_responses,
        sources,
        is_final_response,
        transfer_to_agent,
    }
}

/// Structural sanity checks beyond field presence.
///
/// Debug builds run this on every event; release builds skip it to keep the
/// hot path lean.
pub fn validate(event: &Event) -> Result<(), ParseFailure> {
    if event.id.is_empty() {
        return Err(ParseFailure::missing_field("id"));
    }
    if event.author.is_empty() {
        return Err(ParseFailure::missing_field("author"));
    }
    if event.invocation_id.is_empty() {
        return Err(ParseFailure::missing_field("invocationId"));
    }
    if !event.timestamp.is_finite() || event.timestamp < 0.0 {
        return Err(ParseFailure::MalformedJson {
            detail: format!("timestamp out of range: {}", event.timestamp),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event_json(extra: Value) -> String {
        let mut base = json!({
            "id": "e1",
            "author": "agent",
            "invocationId": "inv-1",
            "timestamp": 1_700_000_000.0
        });
        base.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        base.to_string()
    }

    fn parsed(line: &str) -> ParsedEvent {
        match parse_line(line) {
            ParseOutcome::Event(event) => *event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_preserves_event_id() {
        let event = parsed(&event_json(json!({})));
        assert_eq!(event.raw.id, "e1");
    }

    #[test]
    fn test_blank_and_comment_lines_skip() {
        assert_eq!(parse_line(""), ParseOutcome::Skip);
        assert_eq!(parse_line("   "), ParseOutcome::Skip);
        assert_eq!(parse_line(": keep-alive"), ParseOutcome::Skip);
    }

    #[test]
    fn test_terminator_detected_with_and_without_prefix() {
        assert_eq!(parse_line("[DONE]"), ParseOutcome::Terminator);
        assert_eq!(parse_line("data: [DONE]"), ParseOutcome::Terminator);
    }

    #[test]
    fn test_data_prefix_is_stripped() {
        let line = format!("data: {}", event_json(json!({})));
        assert_eq!(parsed(&line).raw.id, "e1");
    }

    #[test]
    fn test_malformed_json_is_failure_not_panic() {
        let outcome = parse_line("{not json");
        assert!(matches!(
            outcome,
            ParseOutcome::Failure(ParseFailure::MalformedJson { .. })
        ));
    }

    #[test]
    fn test_each_missing_required_field_is_named() {
        for field in ["id", "author", "invocationId", "timestamp"] {
            let mut value = json!({
                "id": "e1",
                "author": "agent",
                "invocationId": "inv-1",
                "timestamp": 1.0
            });
            value.as_object_mut().unwrap().remove(field);
            match parse_line(&value.to_string()) {
                ParseOutcome::Failure(ParseFailure::MissingField { field: named }) => {
                    assert_eq!(named, field);
                }
                other => panic!("expected missing-field failure for {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_legacy_type_tagged_line_is_recognized() {
        match parse_line(r#"{"type":"update","data":{"text":"hi"}}"#) {
            ParseOutcome::Legacy(payload) => {
                assert_eq!(payload.kind, "update");
                assert_eq!(payload.data["text"], "hi");
            }
            other => panic!("expected legacy payload, got {other:?}"),
        }
    }

    #[test]
    fn test_non_object_payload_is_failure() {
        assert_eq!(
            parse_line("[1, 2, 3]"),
            ParseOutcome::Failure(ParseFailure::NotAnObject)
        );
    }

    #[test]
    fn test_text_and_thought_partition() {
        let event = parsed(&event_json(json!({
            "content": {"parts": [
                {"text": "answer"},
                {"text": "reasoning", "thought": true}
            ]}
        })));
        assert_eq!(event.text_content, "answer");
        assert_eq!(event.thought_content, "reasoning");
    }

    #[test]
    fn test_partial_event_is_never_final() {
        let event = parsed(&event_json(json!({"partial": true, "turnComplete": true})));
        assert!(!event.is_final_response);
    }

    #[test]
    fn test_pending_function_call_is_not_final() {
        let event = parsed(&event_json(json!({
            "content": {"parts": [{"functionCall": {"name": "search", "args": {}}}]}
        })));
        assert!(!event.is_final_response);
        assert_eq!(event.function_calls.len(), 1);
    }

    #[test]
    fn test_plain_text_event_is_final() {
        let event = parsed(&event_json(json!({
            "content": {"parts": [{"text": "done"}]}
        })));
        assert!(event.is_final_response);
    }

    #[test]
    fn test_transfer_to_agent_read_from_actions() {
        let event = parsed(&event_json(json!({
            "actions": {"transferToAgent": "billing_agent"}
        })));
        assert_eq!(event.transfer_to_agent.as_deref(), Some("billing_agent"));
    }

    #[test]
    fn test_grounding_sources_surface_on_parsed_event() {
        let event = parsed(&event_json(json!({
            "groundingMetadata": {"groundingChunks": [
                {"web": {"uri": "https://ref.example", "title": "Ref"}}
            ]}
        })));
        assert_eq!(event.sources.len(), 1);
        assert_eq!(event.sources[0].url, "https://ref.example");
    }

    #[test]
    fn test_validate_rejects_non_finite_timestamp() {
        let mut event = parsed(&event_json(json!({}))).raw;
        event.timestamp = f64::NAN;
        assert!(validate(&event).is_err());
    }
}
