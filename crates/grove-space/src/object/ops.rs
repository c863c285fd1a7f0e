//! Field-level change operations
//!
//! An object is a flat map of named JSON values. Each tree change carries
//! either a full snapshot of the map or the minimal list of operations
//! turning the previous state into the next one.

use grove_core::{GroveError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Object state
pub type Fields = BTreeMap<String, Value>;

/// Operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Assign a value
    Set,
    /// Remove the field
    Unset,
}

/// One field operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOp {
    /// Set or unset
    pub operation: Operation,
    /// Field name
    pub field: String,
    /// New value for `Set`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ChangeOp {
    /// `field = value`
    pub fn set(field: impl Into<String>, value: Value) -> Self {
        Self {
            operation: Operation::Set,
            field: field.into(),
            value: Some(value),
        }
    }

    /// Remove `field`
    pub fn unset(field: impl Into<String>) -> Self {
        Self {
            operation: Operation::Unset,
            field: field.into(),
            value: None,
        }
    }
}

/// Decrypted content of one object change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectContent {
    /// Full state
    Snapshot {
        /// Every field
        fields: Fields,
    },
    /// Operations against the previous state
    Diff {
        /// Operations in application order
        ops: Vec<ChangeOp>,
    },
}

impl ObjectContent {
    /// Encode as JSON
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| GroveError::serialization(format!("malformed object change: {e}")))
    }
}

/// Minimal operations turning `old` into `new`
///
/// Removed fields become `Unset`; added or changed fields become `Set`.
/// Unsets come first, then sets, each in field order.
pub fn diff(old: &Fields, new: &Fields) -> Vec<ChangeOp> {
    let unsets = old
        .keys()
        .filter(|field| !new.contains_key(*field))
        .map(|field| ChangeOp::unset(field.clone()));
    let sets = new
        .iter()
        .filter(|(field, value)| old.get(*field) != Some(*value))
        .map(|(field, value)| ChangeOp::set(field.clone(), value.clone()));
    unsets.chain(sets).collect()
}

/// Apply operations to `fields` in order
pub fn apply(fields: &mut Fields, ops: &[ChangeOp]) {
    for op in ops {
        match (op.operation, &op.value) {
            (Operation::Set, Some(value)) => {
                fields.insert(op.field.clone(), value.clone());
            }
            // A set without a value carries nothing to assign.
            (Operation::Set, None) => {}
            (Operation::Unset, _) => {
                fields.remove(&op.field);
            }
        }
    }
}

/// Fold a sequence of changes into the resulting state
///
/// A snapshot replaces everything before it.
pub fn replay<'a>(contents: impl IntoIterator<Item = &'a ObjectContent>) -> Fields {
    let mut fields = Fields::new();
    for content in contents {
        match content {
            ObjectContent::Snapshot { fields: snapshot } => fields.clone_from(snapshot),
            ObjectContent::Diff { ops } => apply(&mut fields, ops),
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_diff_name_change_and_new_field() {
        let old = fields(&[("name", json!("A"))]);
        let new = fields(&[("name", json!("B")), ("age", json!(5))]);
        let mut ops = diff(&old, &new);
        ops.sort_by(|a, b| a.field.cmp(&b.field));
        assert_eq!(ops, vec![ChangeOp::set("age", json!(5)), ChangeOp::set("name", json!("B"))]);
    }

    #[test]
    fn test_diff_removed_field_is_unset() {
        let old = fields(&[("name", json!("A")), ("tag", json!("x"))]);
        let new = fields(&[("name", json!("A"))]);
        assert_eq!(diff(&old, &new), vec![ChangeOp::unset("tag")]);
    }

    #[test]
    fn test_identical_fields_have_empty_diff() {
        let f = fields(&[("name", json!("A"))]);
        assert!(diff(&f, &f).is_empty());
    }

    #[test]
    fn test_snapshot_resets_replay() {
        let contents = vec![
            ObjectContent::Snapshot {
                fields: fields(&[("a", json!(1))]),
            },
            ObjectContent::Diff {
                ops: vec![ChangeOp::set("b", json!(2))],
            },
            ObjectContent::Snapshot {
                fields: fields(&[("c", json!(3))]),
            },
        ];
        assert_eq!(replay(&contents), fields(&[("c", json!(3))]));
    }

    #[test]
    fn test_content_json_shape() {
        let content = ObjectContent::Diff {
            ops: vec![ChangeOp::unset("x")],
        };
        let json: Value = serde_json::from_slice(&content.to_bytes().unwrap()).unwrap();
        assert_eq!(json, json!({"type": "diff", "ops": [{"operation": "unset", "field": "x"}]}));
    }

    fn arb_fields() -> impl Strategy<Value = Fields> {
        prop::collection::btree_map(
            "[a-e]",
            prop_oneof![
                any::<i64>().prop_map(Value::from),
                "[a-z]{0,4}".prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
            ],
            0..5,
        )
    }

    proptest! {
        #[test]
        fn prop_diff_then_apply_reaches_target(old in arb_fields(), new in arb_fields()) {
            let mut state = old.clone();
            apply(&mut state, &diff(&old, &new));
            prop_assert_eq!(state, new);
        }

        #[test]
        fn prop_replay_of_diffs_reproduces_last_state(states in prop::collection::vec(arb_fields(), 1..8)) {
            let mut contents = vec![ObjectContent::Snapshot { fields: states[0].clone() }];
            for pair in states.windows(2) {
                contents.push(ObjectContent::Diff { ops: diff(&pair[0], &pair[1]) });
            }
            prop_assert_eq!(&replay(&contents), states.last().unwrap());
        }
    }
}
