//! Deterministic fast path for callers that paste an explicit request.
//!
//! Syntax: `Payload:` followed by a JSON object, plus an optional `URL:`
//! marker anywhere in the text followed by a whitespace-free URL. Markers are
//! case-sensitive; whitespace around the colon is allowed. The payload span
//! runs from the first `{` after the marker to the last `}` in the text.
//!
//! ```text
//! URL: http://localhost:5000/price Payload: {"item": "concert", "qty": 2}
//! ```

use std::sync::OnceLock;

use apiagent_core::{HttpMethod, RequestSpec};
use regex::Regex;
use serde_json::Value;

static PAYLOAD_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static URL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn payload_pattern() -> Option<&'static Regex> {
    PAYLOAD_PATTERN.get_or_init(|| Regex::new(r"(?s)Payload\s*:\s*(\{.*\})").ok()).as_ref()
}

fn url_pattern() -> Option<&'static Regex> {
    URL_PATTERN.get_or_init(|| Regex::new(r"URL\s*:\s*(\S+)").ok()).as_ref()
}

/// Returns a POST spec when `text` carries a valid payload literal, `None`
/// otherwise. Never fails.
pub fn extract(text: &str, fallback_url: &str) -> Option<RequestSpec> {
    let captures = payload_pattern()?.captures(text)?;
    let raw_payload = captures.get(1)?.as_str();

    let payload = match serde_json::from_str::<Value>(raw_payload) {
        Ok(value @ Value::Object(_)) => value,
        _ => return None,
    };

    let url = url_pattern()
        .and_then(|pattern| pattern.captures(text))
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| fallback_url.to_string());

    Some(RequestSpec::new(HttpMethod::Post, url).with_payload(payload))
}
