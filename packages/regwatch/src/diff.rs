//! Structural diff between two extracted field mappings.
//!
//! Numbers compare by exact value (`10` equals `10.0`, no tolerance);
//! strings compare after trimming incidental whitespace; arrays and objects
//! compare element-wise with the same rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::schema::FieldMap;

/// Old and new value of a changed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub old: Value,
    pub new: Value,
}

/// Added, removed, changed and unchanged keys between two mappings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub added: BTreeMap<String, Value>,
    pub removed: BTreeMap<String, Value>,
    pub changed: BTreeMap<String, ValueChange>,
    pub unchanged: BTreeSet<String>,
}

impl FieldDiff {
    /// True iff anything was added, removed or changed.
    pub fn is_changed(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty())
    }

    /// Keys that differ in any way, sorted.
    pub fn differing_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .added
            .keys()
            .chain(self.removed.keys())
            .chain(self.changed.keys())
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

/// Diff `previous` against `current`.
///
/// An empty `previous` makes every current key "added".
pub fn diff_fields(previous: &FieldMap, current: &FieldMap) -> FieldDiff {
    let mut diff = FieldDiff::default();

    for (key, new) in current {
        match previous.get(key) {
            None => {
                diff.added.insert(key.clone(), new.clone());
            }
            Some(old) if values_equal(old, new) => {
                diff.unchanged.insert(key.clone());
            }
            Some(old) => {
                diff.changed.insert(
                    key.clone(),
                    ValueChange {
                        old: old.clone(),
                        new: new.clone(),
                    },
                );
            }
        }
    }

    for (key, old) in previous {
        if !current.contains_key(key) {
            diff.removed.insert(key.clone(), old.clone());
        }
    }

    diff
}

/// Semantic equality used by the diff.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.trim() == y.trim(),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x == y
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x == y
            } else {
                x.as_f64() == y.as_f64()
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldMap {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[test]
    fn test_rate_change() {
        let diff = diff_fields(&fields(json!({"rate": 10.0})), &fields(json!({"rate": 12.0})));

        assert!(diff.is_changed());
        assert_eq!(
            diff.changed["rate"],
            ValueChange {
                old: json!(10.0),
                new: json!(12.0)
            }
        );
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_empty_previous_marks_all_added() {
        let diff = diff_fields(&FieldMap::new(), &fields(json!({"a": 1, "b": null})));
        assert_eq!(diff.added.len(), 2);
        assert!(diff.is_changed());
    }

    #[test]
    fn test_added_removed_and_unchanged() {
        let diff = diff_fields(
            &fields(json!({"keep": "x", "gone": 1})),
            &fields(json!({"keep": " x ", "new": true})),
        );

        assert_eq!(diff.unchanged, BTreeSet::from(["keep".to_string()]));
        assert_eq!(diff.removed.keys().collect::<Vec<_>>(), vec!["gone"]);
        assert_eq!(diff.added.keys().collect::<Vec<_>>(), vec!["new"]);
        assert_eq!(diff.differing_keys(), vec!["gone", "new"]);
    }

    #[test]
    fn test_numbers_exact() {
        assert!(values_equal(&json!(10), &json!(10.0)));
        assert!(!values_equal(&json!(10.0), &json!(10.000001)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn test_nested_values() {
        assert!(values_equal(
            &json!({"tiers": [{"name": " low "}]}),
            &json!({"tiers": [{"name": "low"}]})
        ));
        assert!(!values_equal(&json!([1, 2]), &json!([2, 1])));
    }

    fn arb_fields() -> impl Strategy<Value = FieldMap> {
        proptest::collection::btree_map(
            "[a-z]{1,6}",
            prop_oneof![
                any::<i64>().prop_map(Value::from),
                "[ a-z]{0,8}".prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
                Just(Value::Null),
            ],
            0..8,
        )
    }

    proptest! {
        #[test]
        fn self_diff_is_unchanged(map in arb_fields()) {
            let diff = diff_fields(&map, &map);
            prop_assert!(!diff.is_changed());
            prop_assert_eq!(diff.unchanged.len(), map.len());
        }

        #[test]
        fn diff_partitions_keys(a in arb_fields(), b in arb_fields()) {
            let diff = diff_fields(&a, &b);
            prop_assert_eq!(
                diff.added.len() + diff.changed.len() + diff.unchanged.len(),
                b.len()
            );
            prop_assert_eq!(
                diff.removed.len() + diff.changed.len() + diff.unchanged.len(),
                a.len()
            );
        }
    }
}
