//! Content extraction over already-located parts and response objects.
//!
//! Everything here is total: unexpected shapes fall back to empty values,
//! never to an error. The parser decides *where* content lives; this module
//! decides *what* it renders as.

use std::collections::HashSet;

use serde_json::Value;

use crate::events::{FunctionResponse, GroundingMetadata, Part, Source};

/// Splits the renderable text of a part sequence by the `thought` flag.
///
/// Non-function parts contribute to exactly one of the two buckets, so the
/// result is a partition: no text appears in both.
pub fn partition_text(parts: &[Part]) -> (String, String) {
    let mut text = String::new();
    let mut thought = String::new();
    for part in parts {
        if let Some((t, is_thought)) = part.as_text() {
            if is_thought {
                thought.push_str(t);
            } else {
                text.push_str(t);
            }
        }
    }
    (text, thought)
}

/// Extracts the displayable value from a function response object.
///
/// Precedence is `result`, then `content`, then `output`, then the whole
/// object stringified. The order is load-bearing: upstream tools populate
/// different fields, and reversing it silently drops legitimate output.
pub fn function_response_text(response: &Value) -> String {
    for key in ["result", "content", "output"] {
        if let Some(value) = response.get(key) {
            return value_to_text(value);
        }
    }
    value_to_text(response)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Merges event-level grounding sources with sources embedded in function
/// responses. Order-preserving; de-duplicated by URL.
pub fn merge_sources(
    grounding: Option<&GroundingMetadata>,
    responses: &[FunctionResponse],
) -> Vec<Source> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    let mut push = |source: Source| {
        if !source.url.is_empty() && seen.insert(source.url.clone()) {
            merged.push(source);
        }
    };

    if let Some(metadata) = grounding {
        for chunk in &metadata.grounding_chunks {
            if let Some(web) = &chunk.web {
                push(Source {
                    url: web.uri.clone(),
                    title: web.title.clone(),
                });
            }
        }
    }

    for response in responses {
        for source in embedded_sources(&response.response) {
            push(source);
        }
    }

    merged
}

/// Reads a `sources` array out of a response object, tolerating both
/// `url` and `uri` keys. Anything unshaped yields nothing.
fn embedded_sources(response: &Value) -> Vec<Source> {
    let Some(entries) = response.get("sources").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let url = entry
                .get("url")
                .or_else(|| entry.get("uri"))
                .and_then(Value::as_str)?;
            Some(Source {
                url: url.to_string(),
                title: entry
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect()
}
