//! The `generate` return value and tool-call extraction (spec §4.E
//! step 7, §6's response shape).
//!
//! Tool-call extraction follows the JSON-prefix parsing idiom of
//! `original_source/cactus/ffi/cactus_rag.cpp`: a leading JSON object
//! with a `tool_calls` array is parsed with `serde_json` instead of the
//! original's hand-rolled scanning.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub response: String,
    pub function_calls: Vec<Value>,
    pub time_to_first_token_ms: f64,
    pub tokens_per_second: f64,
    pub total_time_ms: f64,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub outcome: GenerationOutcome,
}

/// Whether the call ran to a natural/stop-sequence conclusion or was
/// externally cancelled. `Stopped` is not an error (spec §7): the
/// partial result is still returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenerationOutcome {
    Completed,
    Stopped,
}

/// Attempts to parse a leading JSON object containing a `tool_calls`
/// array out of `decoded`. On success, returns `(prefix_text,
/// tool_calls)`; otherwise the entire text is the response and there
/// are no tool calls.
pub fn extract_tool_calls(decoded: &str) -> (String, Vec<Value>) {
    let trimmed = decoded.trim_start();
    let Some(end) = matching_brace_end(trimmed) else {
        return (decoded.to_string(), Vec::new());
    };
    let candidate = &trimmed[..end];
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => match map.get("tool_calls").and_then(|v| v.as_array()) {
            Some(calls) => {
                let rest = &trimmed[end..];
                (rest.trim_start().to_string(), calls.clone())
            }
            None => (decoded.to_string(), Vec::new()),
        },
        _ => (decoded.to_string(), Vec::new()),
    }
}

/// Finds the index just past the first balanced `{...}` prefix, if
/// `text` starts with `{`. Ignores braces inside string literals.
fn matching_brace_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_has_no_tool_calls() {
        let (text, calls) = extract_tool_calls("Hello world");
        assert_eq!(text, "Hello world");
        assert!(calls.is_empty());
    }

    #[test]
    fn leading_tool_call_json_is_extracted() {
        let input = r#"{"tool_calls": [{"name": "search", "arguments": {"q": "rust"}}]}Done"#;
        let (text, calls) = extract_tool_calls(input);
        assert_eq!(text, "Done");
        assert_eq!(calls.len(), 1);
    }
}
