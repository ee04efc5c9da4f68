//! Dot-delimited field paths and nested-field extraction over schema-less JSON.

use std::fmt;

use serde_json::Value;
use smallvec::SmallVec;

use crate::{EchoError, EchoResult};

/// A parsed `refPath` such as `spec.template.metadata.labels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: SmallVec<[String; 6]>,
}

impl FieldPath {
    /// Split `raw` on `.`. A single leading `.` is accepted (`.spec.x` is `spec.x`).
    pub fn parse(raw: &str) -> EchoResult<Self> {
        let s = raw.strip_prefix('.').unwrap_or(raw);
        if s.is_empty() {
            return Err(EchoError::MalformedPath { path: raw.to_string(), reason: "path is empty".into() });
        }
        let segments = s.split('.').map(|seg| seg.to_string()).collect();
        Ok(Self { raw: raw.to_string(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.as_str())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Walk `root` along `path`.
///
/// `Ok(None)` when a key is absent. `MalformedPath` when a non-object is met
/// while segments remain. The terminal value is returned as-is.
pub fn extract<'a>(root: &'a Value, path: &FieldPath) -> EchoResult<Option<&'a Value>> {
    let mut cur = root;
    let mut parent: Option<&str> = None;
    for seg in path.segments() {
        let map = match cur {
            Value::Object(map) => map,
            other => {
                let at = parent.map(|p| format!("{:?}", p)).unwrap_or_else(|| "<root>".to_string());
                return Err(EchoError::MalformedPath {
                    path: path.to_string(),
                    reason: format!("{} is a {}, cannot descend into {:?}", at, json_type(other), seg),
                });
            }
        };
        match map.get(seg) {
            Some(next) => cur = next,
            None => return Ok(None),
        }
        parent = Some(seg);
    }
    Ok(Some(cur))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn extracts_nested_scalar() {
        let v = json!({"a": {"b": {"c": 42}}});
        assert_eq!(extract(&v, &p("a.b.c")).unwrap(), Some(&json!(42)));
    }

    #[test]
    fn missing_key_is_not_found_without_error() {
        let v = json!({"a": {"b": {}}});
        assert_eq!(extract(&v, &p("a.b.c")).unwrap(), None);
        assert_eq!(extract(&v, &p("x")).unwrap(), None);
    }

    #[test]
    fn scalar_with_segments_remaining_is_malformed() {
        let v = json!({"a": 5});
        let err = extract(&v, &p("a.b.c")).unwrap_err();
        match err {
            EchoError::MalformedPath { path, reason } => {
                assert_eq!(path, "a.b.c");
                assert!(reason.contains("\"a\" is a number"), "reason={}", reason);
                assert!(reason.contains("\"b\""), "reason={}", reason);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn arrays_and_null_are_not_descended() {
        let v = json!({"items": [{"name": "x"}], "gone": null});
        assert!(matches!(extract(&v, &p("items.0")), Err(EchoError::MalformedPath { .. })));
        assert!(matches!(extract(&v, &p("gone.x")), Err(EchoError::MalformedPath { .. })));
        // a null leaf is still a found value
        assert_eq!(extract(&v, &p("gone")).unwrap(), Some(&Value::Null));
    }

    #[test]
    fn non_object_root_is_malformed() {
        let v = json!([1, 2]);
        let err = extract(&v, &p("a")).unwrap_err();
        assert!(err.to_string().contains("<root> is a array"), "err={}", err);
    }

    #[test]
    fn terminal_value_is_returned_whole() {
        let v = json!({"spec": {"ports": [{"port": 80}, {"port": 443}]}});
        assert_eq!(extract(&v, &p("spec.ports")).unwrap(), Some(&json!([{"port": 80}, {"port": 443}])));
        assert_eq!(extract(&v, &p("spec")).unwrap(), v.get("spec"));
    }

    #[test]
    fn parse_handles_leading_dot_and_empty() {
        let fp = p(".metadata.name");
        assert_eq!(fp.segments().collect::<Vec<_>>(), vec!["metadata", "name"]);
        assert_eq!(fp.as_str(), ".metadata.name");
        assert!(matches!(FieldPath::parse(""), Err(EchoError::MalformedPath { .. })));
        assert!(matches!(FieldPath::parse("."), Err(EchoError::MalformedPath { .. })));
    }

    #[test]
    fn empty_segment_is_a_plain_key_lookup() {
        let v = json!({"a": {"": 1}});
        assert_eq!(extract(&v, &p("a.")).unwrap(), Some(&json!(1)));
        assert_eq!(extract(&json!({"a": {}}), &p("a..b")).unwrap(), None);
    }
}
