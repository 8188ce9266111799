//! Literal template substitution for webhook URLs, headers, bodies and
//! query parameters.
//!
//! Two placeholder forms: `{{path}}` resolves a dotted path with array
//! indexes into the workflow object's properties; `[[inputN]]` references a
//! numbered input field. Substitution is plain string interpolation — no
//! helpers, no partials, no directives — so template injection cannot reach
//! an evaluator.

use serde_json::{Map, Value as JsonValue};

/// Path traversal depth cap; bounds adversarial nesting.
pub const MAX_PATH_DEPTH: usize = 20;

/// Property names that never resolve.
const RESERVED_SEGMENTS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Resolve a dotted path with `[index]` steps against a JSON value. Only
/// own properties are read; reserved segments yield nothing.
pub fn resolve_path(properties: &JsonValue, path: &str) -> Option<JsonValue> {
    let mut current = properties;
    let mut depth = 0;

    for segment in path.split('.') {
        let (name, indexes) = parse_segment(segment)?;

        if !name.is_empty() {
            if RESERVED_SEGMENTS.contains(&name) {
                return None;
            }
            depth += 1;
            if depth > MAX_PATH_DEPTH {
                return None;
            }
            current = current.as_object()?.get(name)?;
        }

        for index in indexes {
            depth += 1;
            if depth > MAX_PATH_DEPTH {
                return None;
            }
            current = current.as_array()?.get(index)?;
        }
    }

    Some(current.clone())
}

/// Split `name[1][0]` into the name and its index chain. Rejects malformed
/// bracket syntax.
fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let bracket = match segment.find('[') {
        Some(i) => i,
        None => return Some((segment, Vec::new())),
    };
    let name = &segment[..bracket];
    let mut indexes = Vec::new();
    let mut rest = &segment[bracket..];
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return None;
        }
        let close = rest.find(']')?;
        let index: usize = rest[1..close].parse().ok()?;
        indexes.push(index);
        rest = &rest[close + 1..];
    }
    Some((name, indexes))
}

/// Substitute both placeholder families in `text`. Unresolvable
/// placeholders become the empty string.
pub fn substitute(
    text: &str,
    properties: &JsonValue,
    inputs: &Map<String, JsonValue>,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        let prop = rest.find("{{");
        let input = rest.find("[[");
        let (start, open, close) = match (prop, input) {
            (Some(p), Some(i)) if p <= i => (p, "{{", "}}"),
            (Some(p), None) => (p, "{{", "}}"),
            (_, Some(i)) => (i, "[[", "]]"),
            (None, None) => break,
        };
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(close) else {
            break;
        };
        let key = after[..end].trim();

        out.push_str(&rest[..start]);
        let value = if open == "{{" {
            resolve_path(properties, key)
        } else {
            inputs.get(key).cloned()
        };
        if let Some(v) = value {
            out.push_str(&json_to_string(&v));
        }
        rest = &after[end + close.len()..];
    }
    out.push_str(rest);
    out
}

fn json_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props() -> JsonValue {
        json!({
            "user": {
                "id": 1,
                "profile": {
                    "name": "John Doe",
                    "emails": ["john@example.com", "backup@example.com"]
                }
            },
            "items": [
                {"id": "a", "values": [1, 2]},
                {"id": "b", "values": [10, 20]}
            ],
            "deeply": {"nested": {"arrays": [[1, 2], [3, 4]]}}
        })
    }

    #[test]
    fn path_extraction_matrix() {
        let p = props();
        assert_eq!(resolve_path(&p, "user.id"), Some(json!(1)));
        assert_eq!(resolve_path(&p, "user.profile.name"), Some(json!("John Doe")));
        assert_eq!(
            resolve_path(&p, "user.profile.emails[0]"),
            Some(json!("john@example.com"))
        );
        assert_eq!(resolve_path(&p, "items[1].id"), Some(json!("b")));
        assert_eq!(resolve_path(&p, "items[0].values[1]"), Some(json!(2)));
        assert_eq!(resolve_path(&p, "deeply.nested.arrays[1][0]"), Some(json!(3)));
        assert_eq!(resolve_path(&p, "nonexistent.path"), None);
        assert_eq!(resolve_path(&p, "__proto__.polluted"), None);
    }

    #[test]
    fn reserved_segments_never_resolve() {
        let p = json!({"constructor": {"x": 1}, "prototype": 2});
        assert_eq!(resolve_path(&p, "constructor.x"), None);
        assert_eq!(resolve_path(&p, "prototype"), None);
        assert_eq!(resolve_path(&p, "a.__proto__"), None);
    }

    #[test]
    fn depth_is_capped() {
        let mut v = json!(1);
        let mut path = String::from("a");
        for _ in 0..30 {
            v = json!({ "a": v });
            path.push_str(".a");
        }
        assert_eq!(resolve_path(&v, &path), None);
    }

    #[test]
    fn malformed_indexes_yield_nothing() {
        let p = props();
        assert_eq!(resolve_path(&p, "items[x]"), None);
        assert_eq!(resolve_path(&p, "items[1"), None);
        assert_eq!(resolve_path(&p, "items[99]"), None);
    }

    #[test]
    fn substitution_is_literal() {
        let p = json!({"name": "Ada", "evil": "{{name}}"});
        let mut inputs = Map::new();
        inputs.insert("input1".to_string(), json!("X"));

        let out = substitute("hi {{name}} [[input1]]", &p, &inputs);
        assert_eq!(out, "hi Ada X");

        // A value containing placeholder syntax is not re-expanded.
        let out = substitute("v={{evil}}", &p, &inputs);
        assert_eq!(out, "v={{name}}");
    }

    #[test]
    fn missing_placeholders_become_empty() {
        let out = substitute("a{{nope}}b[[input9]]c", &json!({}), &Map::new());
        assert_eq!(out, "abc");
    }

    #[test]
    fn numbers_and_objects_stringify() {
        let p = json!({"n": 7, "o": {"k": 1}});
        assert_eq!(substitute("{{n}}", &p, &Map::new()), "7");
        assert_eq!(substitute("{{o}}", &p, &Map::new()), "{\"k\":1}");
    }
}
