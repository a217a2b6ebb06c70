//! Deduplication keys.
//!
//! A fingerprint is `sha256("{kind}|{canonical_json}")` rendered as lowercase
//! hex. The canonical form sorts object keys, drops insignificant whitespace
//! and collapses runs of whitespace inside string values, so requests that
//! differ only cosmetically collide.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Collapses every run of whitespace to a single space and trims both ends.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Opaque task identifier. 32 lowercase hex chars, never reused.
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Serializes `value` with sorted keys and normalized string leaves.
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
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
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
        Value::String(s) => out.push_str(&Value::String(normalize_text(s)).to_string()),
        other => out.push_str(&other.to_string()),
    }
}

/// Fingerprint of an already-built JSON payload.
pub fn fingerprint_value(task_kind: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_kind.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_json(payload).as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint of any serializable payload.
pub fn compute_fingerprint<P: Serialize + ?Sized>(
    task_kind: &str,
    payload: &P,
) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(payload)?;
    Ok(fingerprint_value(task_kind, &value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_text_collapses_whitespace() {
        assert_eq!(normalize_text("  hello   world  "), "hello world");
        assert_eq!(normalize_text("a\n\tb"), "a b");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("normal"), "normal");
    }

    #[test]
    fn task_ids_are_unique_hex() {
        let a = new_task_id();
        let b = new_task_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn whitespace_differences_collide() {
        let a = fingerprint_value("step:market_analysis", &json!({"brief": "  a   b "}));
        let b = fingerprint_value("step:market_analysis", &json!({"brief": "a b"}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn kind_and_payload_change_the_fingerprint() {
        let base = fingerprint_value("step:market_analysis", &json!({"brief": "a b"}));
        let other_kind = fingerprint_value("autocomplete", &json!({"brief": "a b"}));
        let other_payload = fingerprint_value("step:market_analysis", &json!({"brief": "a c"}));
        assert_ne!(base, other_kind);
        assert_ne!(base, other_payload);
    }

    #[test]
    fn key_order_is_irrelevant() {
        let a = fingerprint_value("k", &json!({"x": 1, "y": {"b": [1, 2], "a": null}}));
        let b = fingerprint_value("k", &json!({"y": {"a": null, "b": [1, 2]}, "x": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_json_is_compact_and_sorted() {
        let v = json!({"b": "  two  words ", "a": [true, 1.5]});
        assert_eq!(canonical_json(&v), r#"{"a":[true,1.5],"b":"two words"}"#);
    }

    #[test]
    fn compute_fingerprint_accepts_structs() {
        #[derive(Serialize)]
        struct Payload<'a> {
            brief: &'a str,
            image_count: usize,
        }
        let a = compute_fingerprint(
            "step:design_generation",
            &Payload {
                brief: "lamp",
                image_count: 4,
            },
        )
        .unwrap();
        let b = fingerprint_value(
            "step:design_generation",
            &json!({"image_count": 4, "brief": "lamp"}),
        );
        assert_eq!(a, b);
    }
}
