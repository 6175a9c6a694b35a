//! Results-schema walker: turns raw JSON payloads into normalized comparison
//! trees. Schemas are JSON-Schema-like (`type`, `items`, `properties`,
//! `format`); the `format` entry selects a registry type, and nodes without a
//! schema entry fall back to the value's own JSON type.

use crate::comparator::CmpValue;
use crate::data_types::{DataType, ParseError};
use serde_json::Value;

/// Which side of the comparison a tree belongs to. On the expected side,
/// nested arrays in scalar positions denote acceptable alternatives (the
/// dataset convention); actual payloads never alternate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSide {
    Expected,
    Actual,
}

fn schema_data_type(schema: Option<&Value>) -> Result<Option<DataType>, ParseError> {
    let Some(schema) = schema else {
        return Ok(None);
    };
    if let Some(format) = schema.get("format").and_then(Value::as_str) {
        return DataType::parse_id(format).map(Some);
    }
    match schema.get("type").and_then(Value::as_str) {
        Some("string") => Ok(Some(DataType::String)),
        Some("number") | Some("integer") => Ok(Some(DataType::Number)),
        Some("boolean") => Ok(Some(DataType::Boolean)),
        Some("null") => Ok(Some(DataType::Null)),
        // Structural kinds are handled by the tree walker itself.
        Some("array") | Some("object") => Ok(None),
        Some(other) => DataType::parse_id(other).map(Some),
        None => Ok(None),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn schema_is_array(schema: Option<&Value>) -> bool {
    schema
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        .map(|t| t == "array")
        .unwrap_or(false)
}

/// Build a comparison tree for a raw value. The raw shape drives the walk;
/// the schema contributes type hints, so a shape mismatch survives
/// normalization and is reported by the comparator instead of erroring here.
pub fn normalize_tree(
    schema: Option<&Value>,
    raw: &Value,
    side: TreeSide,
) -> Result<CmpValue, ParseError> {
    match raw {
        Value::Null => Ok(CmpValue::Null),
        Value::Object(map) => {
            let properties = schema.and_then(|s| s.get("properties"));
            let mut fields = Vec::with_capacity(map.len());
            for (key, value) in map {
                let field_schema = properties.and_then(|p| p.get(key));
                fields.push((key.clone(), normalize_tree(field_schema, value, side)?));
            }
            Ok(CmpValue::Object(fields))
        }
        Value::Array(items) => {
            let item_schema = if schema_is_array(schema) {
                schema.and_then(|s| s.get("items"))
            } else {
                None
            };
            let mut normalized = Vec::with_capacity(items.len());
            for item in items {
                normalized.push(normalize_item(item_schema, item, side)?);
            }
            Ok(CmpValue::Array(normalized))
        }
        scalar => {
            let data_type = schema_data_type(schema)?.unwrap_or_else(|| DataType::infer(scalar));
            Ok(CmpValue::Leaf(data_type.normalize(scalar)?))
        }
    }
}

/// Normalize one array element. Expected-side inner arrays of scalars are
/// alternatives for a single position, unless the schema says items are
/// themselves arrays.
fn normalize_item(
    item_schema: Option<&Value>,
    item: &Value,
    side: TreeSide,
) -> Result<CmpValue, ParseError> {
    if side == TreeSide::Expected && !schema_is_array(item_schema) {
        if let Value::Array(inner) = item {
            if !inner.is_empty() && inner.iter().all(is_scalar) {
                let data_type = schema_data_type(item_schema)?
                    .unwrap_or_else(|| DataType::infer(&inner[0]));
                return Ok(CmpValue::Leaf(data_type.normalize(item)?));
            }
        }
    }
    normalize_tree(item_schema, item, side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{CompareOptions, ValueComparator};
    use serde_json::json;

    fn compare_with_schema(
        schema: Option<&Value>,
        actual: &Value,
        expected: &Value,
        ordered: bool,
    ) -> Vec<wav_types::AssertionResult> {
        let actual = normalize_tree(schema, actual, TreeSide::Actual).expect("normalize actual");
        let expected =
            normalize_tree(schema, expected, TreeSide::Expected).expect("normalize expected");
        let options = CompareOptions {
            ordered,
            ..CompareOptions::default()
        };
        ValueComparator::compare(&actual, &expected, &options)
    }

    #[test]
    fn date_format_schema_normalizes_both_sides() {
        let schema = json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "month": {"type": "string", "format": "date"},
                    "count": {"type": "number"}
                }
            }
        });
        let expected = json!([{"month": "january", "count": 5}]);
        let actual = json!([{"month": "Jan", "count": 5}]);
        let result = compare_with_schema(Some(&schema), &actual, &expected, false);
        assert!(result.is_empty(), "schema-typed match failed: {:?}", result);
    }

    #[test]
    fn without_schema_dates_compare_as_literal_strings() {
        let expected = json!([{"month": "january", "count": 5}]);
        let actual = json!([{"month": "Jan", "count": 5}]);
        let result = compare_with_schema(None, &actual, &expected, false);
        assert!(
            !result.is_empty(),
            "literal string comparison must distinguish Jan from january"
        );
    }

    #[test]
    fn expected_side_nested_arrays_are_alternatives() {
        let expected = json!([["marketing", "mkt"], "ops"]);
        let actual = json!(["mkt", "ops"]);
        let result = compare_with_schema(None, &actual, &expected, true);
        assert!(result.is_empty(), "alternatives should match: {:?}", result);
    }

    #[test]
    fn actual_side_nested_arrays_stay_structural() {
        let expected = json!(["a", "b"]);
        let actual = json!([["a", "b"]]);
        let result = compare_with_schema(None, &actual, &expected, false);
        assert!(!result.is_empty(), "nested actual array is not a scalar");
    }

    #[test]
    fn unknown_schema_format_is_a_config_error() {
        let schema = json!({"type": "array", "items": {"type": "string", "format": "fuzzy"}});
        let err = normalize_tree(Some(&schema), &json!(["x"]), TreeSide::Actual)
            .expect_err("unknown format should fail");
        assert!(matches!(err, ParseError::UnknownType(_)));
    }

    #[test]
    fn schema_fallback_uses_actual_json_type() {
        let schema = json!({"type": "array"});
        let result = compare_with_schema(Some(&schema), &json!([5, true]), &json!([5, true]), false);
        assert!(result.is_empty());
    }

    #[test]
    fn currency_schema_on_object_fields() {
        let schema = json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "min": {"type": "string", "format": "currency"},
                    "max": {"type": "string", "format": "currency"}
                }
            }
        });
        let expected = json!([{"min": 5.49, "max": 375.19}]);
        let actual = json!([{"min": "$5.49", "max": "$375.19"}]);
        assert!(compare_with_schema(Some(&schema), &actual, &expected, false).is_empty());

        let wrong = json!([{"min": "$1.00", "max": "$375.19"}]);
        let result = compare_with_schema(Some(&schema), &wrong, &expected, false);
        assert!(!result.is_empty());
    }
}
