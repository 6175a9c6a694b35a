//! Recursive structural comparison of an expected tree against an actual
//! tree. Output is an ordered list of assertions (empty list = match) whose
//! names carry the full path to the offending node, so a failure deep inside
//! a nested payload is directly actionable.

use crate::data_types::Normalized;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use wav_types::AssertionResult;

/// A normalized comparison tree: structure is explicit, leaves carry
/// normalized values with their alternatives.
#[derive(Debug, Clone)]
pub enum CmpValue {
    Null,
    Leaf(Normalized),
    Array(Vec<CmpValue>),
    Object(Vec<(String, CmpValue)>),
}

impl CmpValue {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Leaf(normalized) => normalized.to_value(),
            Self::Array(items) => Value::Array(items.iter().map(CmpValue::to_value).collect()),
            Self::Object(fields) => {
                let map: Map<String, Value> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect();
                Value::Object(map)
            }
        }
    }

    fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Leaf(normalized) => normalized.is_null(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompareOptions {
    /// Index-wise array comparison when true, multiset matching otherwise.
    pub ordered: bool,
    /// Accept actual objects that carry keys beyond the expected set.
    pub ignore_extra_keys: bool,
    /// Object keys whose values are not compared.
    pub ignored_value_keys: BTreeSet<String>,
    /// Overrides the per-type default tolerance when set.
    pub tolerance: Option<f64>,
}

pub struct ValueComparator;

impl ValueComparator {
    pub fn compare(
        actual: &CmpValue,
        expected: &CmpValue,
        options: &CompareOptions,
    ) -> Vec<AssertionResult> {
        let mut assertions = Vec::new();
        compare_node(actual, expected, "value", options, &mut assertions);
        assertions
    }
}

fn compare_node(
    actual: &CmpValue,
    expected: &CmpValue,
    path: &str,
    options: &CompareOptions,
    out: &mut Vec<AssertionResult>,
) {
    match expected {
        CmpValue::Null => {
            if !actual.is_null() {
                out.push(AssertionResult::failure(
                    format!("{}_none_mismatch", path),
                    format!("expected null, got {}", actual.to_value()),
                ));
            }
        }
        CmpValue::Leaf(expected_leaf) => match actual {
            CmpValue::Leaf(actual_leaf) => {
                if expected_leaf.is_null() || actual_leaf.is_null() {
                    if expected_leaf.is_null() != actual_leaf.is_null() {
                        out.push(AssertionResult::failure(
                            format!("{}_none_mismatch", path),
                            format!(
                                "expected {}, got {}",
                                expected_leaf.to_value(),
                                actual_leaf.to_value()
                            ),
                        ));
                    }
                } else if !actual_leaf.matches(expected_leaf, options.tolerance) {
                    out.push(AssertionResult::failure(
                        format!("{}_mismatch", path),
                        format!(
                            "expected {}, got {}",
                            expected_leaf.to_value(),
                            actual_leaf.to_value()
                        ),
                    ));
                }
            }
            CmpValue::Null => {
                if !expected_leaf.is_null() {
                    out.push(AssertionResult::failure(
                        format!("{}_none_mismatch", path),
                        format!("expected {}, got null", expected_leaf.to_value()),
                    ));
                }
            }
            other => {
                out.push(AssertionResult::failure(
                    format!("{}_mismatch", path),
                    format!(
                        "expected a single value {}, got {}",
                        expected_leaf.to_value(),
                        other.to_value()
                    ),
                ));
            }
        },
        CmpValue::Object(expected_fields) => match actual {
            CmpValue::Object(actual_fields) => {
                compare_objects(actual_fields, expected_fields, path, options, out)
            }
            other => out.push(AssertionResult::failure(
                format!("{}_invalid_format", path),
                format!("expected an object, got {}", other.to_value()),
            )),
        },
        CmpValue::Array(expected_items) => match actual {
            CmpValue::Array(actual_items) => {
                if options.ordered {
                    compare_arrays_ordered(actual_items, expected_items, path, options, out)
                } else {
                    compare_arrays_unordered(actual_items, expected_items, path, options, out)
                }
            }
            other => out.push(AssertionResult::failure(
                format!("{}_invalid_format", path),
                format!("expected an array, got {}", other.to_value()),
            )),
        },
    }
}

fn compare_objects(
    actual: &[(String, CmpValue)],
    expected: &[(String, CmpValue)],
    path: &str,
    options: &CompareOptions,
    out: &mut Vec<AssertionResult>,
) {
    let actual_keys: BTreeSet<&str> = actual.iter().map(|(k, _)| k.as_str()).collect();
    let expected_keys: BTreeSet<&str> = expected.iter().map(|(k, _)| k.as_str()).collect();

    let missing: Vec<&&str> = expected_keys.difference(&actual_keys).collect();
    let extra: Vec<&&str> = actual_keys.difference(&expected_keys).collect();
    let extra_matters = !options.ignore_extra_keys && !extra.is_empty();
    if !missing.is_empty() || extra_matters {
        out.push(AssertionResult::failure(
            format!("{}_keys_mismatch", path),
            format!(
                "object keys differ: missing {:?}, extra {:?}",
                missing, extra
            ),
        ));
    }

    for (key, expected_value) in expected {
        if options.ignored_value_keys.contains(key) {
            continue;
        }
        let Some((_, actual_value)) = actual.iter().find(|(k, _)| k == key) else {
            continue;
        };
        compare_node(
            actual_value,
            expected_value,
            &format!("{}.{}", path, key),
            options,
            out,
        );
    }
}

fn compare_arrays_ordered(
    actual: &[CmpValue],
    expected: &[CmpValue],
    path: &str,
    options: &CompareOptions,
    out: &mut Vec<AssertionResult>,
) {
    for (idx, (actual_item, expected_item)) in actual.iter().zip(expected.iter()).enumerate() {
        compare_node(
            actual_item,
            expected_item,
            &format!("{}[{}]", path, idx),
            options,
            out,
        );
    }
    if actual.len() != expected.len() {
        out.push(AssertionResult::failure(
            format!("{}_array_values_mismatch", path),
            format!(
                "array length mismatch: expected {}, got {}",
                expected.len(),
                actual.len()
            ),
        ));
    }
}

fn matches_completely(actual: &CmpValue, expected: &CmpValue, options: &CompareOptions) -> bool {
    let mut probe = Vec::new();
    compare_node(actual, expected, "probe", options, &mut probe);
    probe.is_empty()
}

/// Multiset matching: each expected element greedily claims the first unused
/// actual element it fully matches, so duplicates are respected.
fn compare_arrays_unordered(
    actual: &[CmpValue],
    expected: &[CmpValue],
    path: &str,
    options: &CompareOptions,
    out: &mut Vec<AssertionResult>,
) {
    let mut used: HashSet<usize> = HashSet::new();
    let mut matched = 0usize;
    for expected_item in expected {
        let found = actual.iter().enumerate().find(|(idx, actual_item)| {
            !used.contains(idx) && matches_completely(actual_item, expected_item, options)
        });
        if let Some((idx, _)) = found {
            used.insert(idx);
            matched += 1;
        }
    }

    let missing = expected.len() - matched;
    let extra = actual.len() - used.len();
    if missing == 0 && extra == 0 {
        return;
    }

    let msg = if missing == 0 {
        format!(
            "Array contains all expected elements ({}/{}) but has {} extra element(s)",
            matched,
            expected.len(),
            extra
        )
    } else if extra == 0 {
        format!(
            "Array is missing {} expected element(s). Matched ({}/{})",
            missing,
            matched,
            expected.len()
        )
    } else {
        format!(
            "Array elements differ. Matched ({}/{}). Missing: {}. Extra: {}",
            matched,
            expected.len(),
            missing,
            extra
        )
    };
    out.push(AssertionResult::failure(
        format!("{}_array_values_mismatch", path),
        msg,
    ));
}
