// Swarm Gate - Log Redaction
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Scrubs secrets from JSON before it reaches a log line.

use serde_json::{Map, Value};

pub const REDACTED: &str = "***REDACTED***";

const SENSITIVE_KEYS: &[&str] = &["token", "password", "secret", "api_key", "authorization"];

/// Longest parameter summary written to the log.
const SUMMARY_MAX_CHARS: usize = 200;

/// Long strings that look like key material or YAML documents get clipped.
const LONG_VALUE_CHARS: usize = 100;

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

pub fn redact_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                let redacted = if is_sensitive(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    match v {
                        Value::String(s) if looks_like_material(key, s) => {
                            let head: String = s.chars().take(50).collect();
                            Value::String(format!("{head}...{REDACTED}"))
                        }
                        other => redact_secrets(other),
                    }
                };
                out.insert(key.clone(), redacted);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_secrets).collect()),
        other => other.clone(),
    }
}

fn looks_like_material(key: &str, s: &str) -> bool {
    s.chars().count() > LONG_VALUE_CHARS
        && (s.contains("BEGIN") || s.contains("-----") || key.to_lowercase().contains("yaml"))
}

/// Redacted, single-line, length-capped rendering of call parameters.
pub fn param_summary(params: &Value) -> String {
    let text = redact_secrets(params).to_string();
    if text.chars().count() > SUMMARY_MAX_CHARS {
        let cut: String = text.chars().take(SUMMARY_MAX_CHARS).collect();
        format!("{cut}…")
    } else {
        text
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_keys_redacted_recursively() {
        let input = json!({
            "name": "web",
            "Authorization": "Bearer x",
            "nested": {"db_password": "hunter2", "ok": 1},
            "list": [{"api_key": "k"}]
        });
        let out = redact_secrets(&input);
        assert_eq!(out["name"], "web");
        assert_eq!(out["Authorization"], REDACTED);
        assert_eq!(out["nested"]["db_password"], REDACTED);
        assert_eq!(out["nested"]["ok"], 1);
        assert_eq!(out["list"][0]["api_key"], REDACTED);
    }

    #[test]
    fn key_material_clipped() {
        let pem = format!("-----BEGIN KEY-----{}", "A".repeat(200));
        let out = redact_secrets(&json!({"cert": pem, "note": "short"}));
        let cert = out["cert"].as_str().unwrap();
        assert!(cert.ends_with(REDACTED));
        assert!(cert.len() < 100);
        assert_eq!(out["note"], "short");
    }

    #[test]
    fn summary_is_capped() {
        let big = json!({"data": "x".repeat(1000)});
        assert!(param_summary(&big).chars().count() <= SUMMARY_MAX_CHARS + 1);
        assert_eq!(param_summary(&json!({"id": "abc"})), r#"{"id":"abc"}"#);
    }
}
