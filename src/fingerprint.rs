// src/fingerprint.rs
//! Deterministic request identity.
//!
//! The fingerprint is the join key between the cache store and the pending
//! registry: two logically identical requests must always produce the same
//! string. Bodies are canonicalized with recursively sorted object keys so
//! construction order never leaks into the identity.

use crate::queue::Priority;
use crate::transport::HttpMethod;
use serde_json::Value;

/// Compute the fingerprint for a request. Pure function, no side effects.
pub fn fingerprint(method: HttpMethod, url: &str, body: Option<&Value>, priority: Priority) -> String {
    let body_part = body.map(canonical_json).unwrap_or_default();
    format!("{}:{}:{}:{}", method.as_str(), url, body_part, priority.tag())
}

/// Serialize a JSON value with object keys in sorted order at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value::from escapes the key the same way serde_json would
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(
            fingerprint(HttpMethod::Post, "https://api.test/items", Some(&a), Priority::Medium),
            fingerprint(HttpMethod::Post, "https://api.test/items", Some(&b), Priority::Medium),
        );
    }

    #[test]
    fn priority_is_part_of_the_identity() {
        let body = json!({"q": "rust"});
        let high = fingerprint(HttpMethod::Get, "https://api.test/search", Some(&body), Priority::High);
        let low = fingerprint(HttpMethod::Get, "https://api.test/search", Some(&body), Priority::Low);
        assert_ne!(high, low);
    }

    #[test]
    fn bodyless_requests_fingerprint_cleanly() {
        let fp = fingerprint(HttpMethod::Get, "https://api.test/users", None, Priority::Medium);
        assert_eq!(fp, "GET:https://api.test/users::medium");
    }

    #[test]
    fn canonical_form_sorts_nested_keys() {
        let value = json!({"z": [{"b": 1, "a": 2}], "a": true});
        assert_eq!(canonical_json(&value), r#"{"a":true,"z":[{"a":2,"b":1}]}"#);
    }
}
