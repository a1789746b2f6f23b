use std::collections::BTreeMap;

use apiagent_core::{default_headers, HttpMethod, NormalizeError, RequestSpec};
use serde_json::{Map, Value};

/// Turns a parsed candidate object into an executable [`RequestSpec`].
///
/// Only absent fields are defaulted: `headers` to the JSON content type,
/// `payload` to `null`, `method` to GET, and an absent, blank or non-string
/// `url` to `fallback_url`. An explicit `"headers": null` becomes an empty map.
pub fn normalize(
    candidate: &Map<String, Value>,
    fallback_url: &str,
) -> Result<RequestSpec, NormalizeError> {
    let method = match candidate.get("method") {
        None | Some(Value::Null) => HttpMethod::Get,
        Some(Value::String(raw)) => {
            HttpMethod::parse(raw).ok_or_else(|| NormalizeError::UnsupportedMethod(raw.clone()))?
        }
        Some(other) => return Err(NormalizeError::UnsupportedMethod(other.to_string())),
    };

    let url = candidate
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.trim().is_empty())
        .unwrap_or(fallback_url)
        .to_string();

    let headers = match candidate.get("headers") {
        Some(Value::Object(headers)) => headers
            .iter()
            .map(|(name, value)| (name.clone(), header_text(value)))
            .collect::<BTreeMap<_, _>>(),
        Some(Value::Null) => BTreeMap::new(),
        _ => default_headers(),
    };

    let payload = candidate.get("payload").cloned().unwrap_or(Value::Null);

    Ok(RequestSpec { method, url, headers, payload })
}

pub fn normalize_value(candidate: &Value, fallback_url: &str) -> Result<RequestSpec, NormalizeError> {
    match candidate {
        Value::Object(object) => normalize(object, fallback_url),
        _ => Err(NormalizeError::NotAnObject),
    }
}

fn header_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
