//! Locates one JSON object inside free-form gateway output.

use serde_json::{Map, Value};

/// Returns the first JSON object embedded in `text`, or `None` when there is no
/// structured content.
///
/// The widest span, first `{` to last `}`, is tried first. When that does not
/// parse (two objects, braces in surrounding prose), balanced spans are tried
/// in order of their opening brace, skipping braces inside JSON strings.
pub fn extract_json_block(text: &str) -> Option<Map<String, Value>> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    if first < last {
        if let Some(object) = parse_object(&text[first..=last]) {
            return Some(object);
        }
    }

    text.match_indices('{')
        .filter_map(|(start, _)| balanced_span(text, start))
        .find_map(parse_object)
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn balanced_span(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::extract_json_block;

    fn extract(text: &str) -> Option<Value> {
        extract_json_block(text).map(Value::Object)
    }

    #[test]
    fn bare_object_parses() {
        assert_eq!(
            extract(r#"{"method":"GET","url":"http://localhost:5000/events","headers":{},"payload":null}"#),
            Some(json!({
                "method": "GET",
                "url": "http://localhost:5000/events",
                "headers": {},
                "payload": null
            }))
        );
    }

    #[test]
    fn nested_braces_and_surrounding_prose() {
        let text = "Sure! Here is the request:\n{\"method\": \"POST\", \"payload\": {\"filter\": {\"day\": \"fri\"}}}\nLet me know if you need more.";
        assert_eq!(
            extract(text),
            Some(json!({"method": "POST", "payload": {"filter": {"day": "fri"}}}))
        );
    }

    #[test]
    fn markdown_fence_is_ignored() {
        let text = "```json\n{\"method\": \"GET\", \"url\": \"http://localhost:5000/\"}\n```";
        assert_eq!(extract(text), Some(json!({"method": "GET", "url": "http://localhost:5000/"})));
    }

    #[test]
    fn first_of_several_objects_wins() {
        let text = r#"{"method": "GET"} or maybe {"method": "POST"}"#;
        assert_eq!(extract(text), Some(json!({"method": "GET"})));
    }

    #[test]
    fn braces_in_prose_before_the_object_are_skipped() {
        let text = r#"Use the {placeholder} form: {"method": "POST", "url": "http://localhost:5000/price"}"#;
        assert_eq!(
            extract(text),
            Some(json!({"method": "POST", "url": "http://localhost:5000/price"}))
        );
    }

    #[test]
    fn braces_inside_strings_do_not_close_the_span() {
        let text = r#"{"note": "closing } brace", "n": 1} then {"other": true}"#;
        assert_eq!(extract(text), Some(json!({"note": "closing } brace", "n": 1})));
    }

    #[test]
    fn escaped_quotes_inside_strings_are_handled() {
        let text = r#"x {"quote": "say \"}\" loudly"} y {"#;
        assert_eq!(extract(text), Some(json!({"quote": "say \"}\" loudly"})));
    }

    #[test]
    fn no_structured_content() {
        assert_eq!(extract("I am unable to assist you with that request."), None);
        assert_eq!(extract("{ not json at all }"), None);
        assert_eq!(extract("} backwards {"), None);
        assert_eq!(extract(r#"["GET", "http://localhost:5000/"]"#), None);
    }
}
