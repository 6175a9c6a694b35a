//! Minimal JSONPath support for expected post-data keys: dotted fields,
//! numeric indexes, and `[*]` wildcards over a parsed JSON body. Keys that
//! are full-line regex patterns (`^…$`) select matching field names instead.

use serde_json::Value;

/// A key is JSONPath-shaped when it starts with `$`, or a field-name regex
/// when it is anchored on both ends.
pub fn is_jsonpath_key(key: &str) -> bool {
    key.starts_with('$') || (key.len() >= 2 && key.starts_with('^') && key.ends_with('$'))
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

fn parse_segments(path: &str) -> Option<Vec<Segment>> {
    let rest = path.strip_prefix('$')?;
    let mut segments = Vec::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut field = String::new();
                while let Some(&next) = chars.peek() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    field.push(next);
                    chars.next();
                }
                if field.is_empty() {
                    return None;
                }
                segments.push(Segment::Field(field));
            }
            '[' => {
                let mut inner = String::new();
                for next in chars.by_ref() {
                    if next == ']' {
                        break;
                    }
                    inner.push(next);
                }
                if inner == "*" {
                    segments.push(Segment::Wildcard);
                } else {
                    segments.push(Segment::Index(inner.parse().ok()?));
                }
            }
            _ => return None,
        }
    }
    Some(segments)
}

fn collect<'a>(value: &'a Value, segments: &[Segment], out: &mut Vec<&'a Value>) {
    let Some((head, tail)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match head {
        Segment::Field(name) => {
            if let Some(next) = value.get(name) {
                collect(next, tail, out);
            }
        }
        Segment::Index(idx) => {
            if let Some(next) = value.get(idx) {
                collect(next, tail, out);
            }
        }
        Segment::Wildcard => {
            if let Some(items) = value.as_array() {
                for item in items {
                    collect(item, tail, out);
                }
            }
        }
    }
}

/// Extract the value(s) at `path`. A single match returns that value; several
/// matches return them as an array; zero matches is `None`.
pub fn extract_jsonpath_value(data: &Value, path: &str) -> Option<Value> {
    let segments = parse_segments(path)?;
    let mut matches = Vec::new();
    collect(data, &segments, &mut matches);
    match matches.len() {
        0 => None,
        1 => Some(matches[0].clone()),
        _ => Some(Value::Array(matches.into_iter().cloned().collect())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_jsonpath_and_regex_keys() {
        assert!(is_jsonpath_key("$.note.note"));
        assert!(is_jsonpath_key("$.items[0].price"));
        assert!(is_jsonpath_key("$"));
        assert!(is_jsonpath_key(r"^reply_to_submission_\d+\[comment\]$"));
        assert!(is_jsonpath_key("^.*$"));
        assert!(!is_jsonpath_key("user_id"));
        assert!(!is_jsonpath_key(""));
        assert!(!is_jsonpath_key("^incomplete"));
        assert!(!is_jsonpath_key("incomplete$"));
        assert!(!is_jsonpath_key("field$with$dollars"));
    }

    #[test]
    fn extracts_nested_fields() {
        let data = json!({"note": {"noteable_type": "MergeRequest", "note": "lgtm"}});
        assert_eq!(
            extract_jsonpath_value(&data, "$.note.note"),
            Some(json!("lgtm"))
        );
        let deep = json!({"metadata": {"user": {"profile": {"name": "John"}}}});
        assert_eq!(
            extract_jsonpath_value(&deep, "$.metadata.user.profile.name"),
            Some(json!("John"))
        );
    }

    #[test]
    fn extracts_array_elements() {
        let data = json!({"items": [{"id": 1, "price": "10.00"}, {"id": 2, "price": "20.00"}]});
        assert_eq!(
            extract_jsonpath_value(&data, "$.items[0].price"),
            Some(json!("10.00"))
        );
        let list = json!([{"name": "Alice"}, {"name": "Bob"}]);
        assert_eq!(
            extract_jsonpath_value(&list, "$[0].name"),
            Some(json!("Alice"))
        );
    }

    #[test]
    fn wildcard_collects_every_match() {
        let data = json!({"items": [{"price": "10.00"}, {"price": "20.00"}]});
        assert_eq!(
            extract_jsonpath_value(&data, "$.items[*].price"),
            Some(json!(["10.00", "20.00"]))
        );
    }

    #[test]
    fn missing_paths_return_none() {
        let data = json!({"user_id": "123"});
        assert_eq!(extract_jsonpath_value(&data, "$.note.note"), None);
        assert_eq!(extract_jsonpath_value(&data, "$.note.comment.text"), None);
    }

    #[test]
    fn root_path_returns_document() {
        let data = json!({"a": 1});
        assert_eq!(extract_jsonpath_value(&data, "$"), Some(data.clone()));
    }
}
