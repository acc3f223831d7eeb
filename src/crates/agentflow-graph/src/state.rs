//! State schema and reducers
//!
//! When multiple nodes write to the same state field within one step, the
//! field's reducer decides how the writes combine. The schema maps field
//! names to `{type descriptor, reducer}`; fields without an entry fall back
//! to the schema's default reducer (overwrite).
//!
//! Built-in reducers:
//!
//! | Reducer | Behavior |
//! |---------|----------|
//! | [`OverwriteReducer`] | Last write wins |
//! | [`AppendReducer`] | Concatenate arrays / push scalars |
//! | [`MergeReducer`] | Shallow-merge JSON objects |
//! | [`SumReducer`] | Add numeric values |

use crate::error::{GraphError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Pure combiner for per-step channel writes: `(prev, incoming) -> next`
pub trait Reducer: Send + Sync {
    /// Combine the current value with an incoming update.
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value>;

    /// Short name used in diagnostics.
    fn name(&self) -> &str;
}

/// Shared reducer handle
pub type ReducerRef = Arc<dyn Reducer>;

/// Last write wins
#[derive(Debug, Clone, Default)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> Result<Value> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// Concatenate arrays; non-array operands are treated as one-element arrays
#[derive(Debug, Clone, Default)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        let mut items = match current {
            Value::Array(arr) => arr.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        };
        match update {
            Value::Array(arr) => items.extend(arr.iter().cloned()),
            Value::Null => {}
            other => items.push(other.clone()),
        }
        Ok(Value::Array(items))
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// Shallow-merge JSON objects; update keys win
#[derive(Debug, Clone, Default)]
pub struct MergeReducer;

impl Reducer for MergeReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Object(a), Value::Object(b)) => {
                let mut merged = a.clone();
                for (k, v) in b {
                    merged.insert(k.clone(), v.clone());
                }
                Ok(Value::Object(merged))
            }
            (Value::Null, b) => Ok(b.clone()),
            (_, b) => Err(GraphError::State(format!(
                "merge reducer requires objects, got {b}"
            ))),
        }
    }

    fn name(&self) -> &str {
        "merge"
    }
}

/// Add numeric values
#[derive(Debug, Clone, Default)]
pub struct SumReducer;

impl Reducer for SumReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        let a = current.as_f64().unwrap_or(0.0);
        let b = update
            .as_f64()
            .ok_or_else(|| GraphError::State(format!("sum reducer requires a number, got {update}")))?;
        let sum = a + b;
        // Keep integers integral when both operands were.
        if current.as_i64().is_some() || current.is_null() {
            if let Some(bi) = update.as_i64() {
                return Ok(Value::from(current.as_i64().unwrap_or(0) + bi));
            }
        }
        Ok(serde_json::json!(sum))
    }

    fn name(&self) -> &str {
        "sum"
    }
}

/// Field declaration: type descriptor plus reducer
#[derive(Clone)]
pub struct FieldSpec {
    /// Free-form type descriptor (`"array<message>"`, `"number"`, ...)
    pub type_desc: String,
    /// How concurrent writes to this field combine
    pub reducer: ReducerRef,
}

/// Maps state field names to their reducers
#[derive(Clone)]
pub struct StateSchema {
    fields: HashMap<String, FieldSpec>,
    default_reducer: ReducerRef,
}

impl StateSchema {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
            default_reducer: Arc::new(OverwriteReducer),
        }
    }

    /// Declare a field with an explicit reducer.
    pub fn add_field(
        mut self,
        name: impl Into<String>,
        type_desc: impl Into<String>,
        reducer: ReducerRef,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                type_desc: type_desc.into(),
                reducer,
            },
        );
        self
    }

    /// Replace the fallback reducer for undeclared fields.
    pub fn with_default_reducer(mut self, reducer: ReducerRef) -> Self {
        self.default_reducer = reducer;
        self
    }

    /// Declared field names.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// The reducer governing `field`.
    pub fn reducer_for(&self, field: &str) -> &ReducerRef {
        self.fields
            .get(field)
            .map(|f| &f.reducer)
            .unwrap_or(&self.default_reducer)
    }

    /// Merge `update` into `state` field by field through the reducers.
    pub fn apply(&self, state: &mut HashMap<String, Value>, update: &HashMap<String, Value>) -> Result<()> {
        for (field, incoming) in update {
            let current = state.get(field).cloned().unwrap_or(Value::Null);
            let next = self.reducer_for(field).reduce(&current, incoming)?;
            state.insert(field.clone(), next);
        }
        Ok(())
    }
}

impl Default for StateSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: HashMap<&str, &str> = self
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.reducer.name()))
            .collect();
        f.debug_struct("StateSchema").field("fields", &fields).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overwrite_reducer() {
        let r = OverwriteReducer;
        assert_eq!(r.reduce(&json!("old"), &json!("new")).unwrap(), json!("new"));
    }

    #[test]
    fn test_append_reducer() {
        let r = AppendReducer;
        assert_eq!(
            r.reduce(&json!(["a"]), &json!(["b", "c"])).unwrap(),
            json!(["a", "b", "c"])
        );
        assert_eq!(r.reduce(&Value::Null, &json!("x")).unwrap(), json!(["x"]));
        assert_eq!(r.reduce(&json!("a"), &json!("b")).unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn test_merge_reducer() {
        let r = MergeReducer;
        let merged = r
            .reduce(&json!({"a": 1, "b": 2}), &json!({"b": 3, "c": 4}))
            .unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
        assert!(r.reduce(&json!({}), &json!(5)).is_err());
    }

    #[test]
    fn test_sum_reducer() {
        let r = SumReducer;
        assert_eq!(r.reduce(&json!(1), &json!(2)).unwrap(), json!(3));
        assert_eq!(r.reduce(&Value::Null, &json!(7)).unwrap(), json!(7));
        assert_eq!(r.reduce(&json!(0.5), &json!(0.25)).unwrap(), json!(0.75));
        assert!(r.reduce(&json!(1), &json!("x")).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sum_reducer_adds_integers(a in -10_000i64..10_000, b in -10_000i64..10_000) {
                let out = SumReducer.reduce(&json!(a), &json!(b)).unwrap();
                prop_assert_eq!(out, json!(a + b));
            }

            #[test]
            fn append_reducer_concatenates(
                xs in proptest::collection::vec(0i64..100, 0..10),
                ys in proptest::collection::vec(0i64..100, 0..10),
            ) {
                let out = AppendReducer.reduce(&json!(xs), &json!(ys)).unwrap();
                prop_assert_eq!(out.as_array().unwrap().len(), xs.len() + ys.len());
            }
        }
    }

    #[test]
    fn test_schema_apply_mixed_fields() {
        let schema = StateSchema::new()
            .add_field("messages", "array", Arc::new(AppendReducer))
            .add_field("count", "number", Arc::new(SumReducer));

        let mut state = HashMap::from([
            ("messages".to_string(), json!(["hello"])),
            ("count".to_string(), json!(1)),
            ("status".to_string(), json!("thinking")),
        ]);
        let update = HashMap::from([
            ("messages".to_string(), json!(["world"])),
            ("count".to_string(), json!(2)),
            ("status".to_string(), json!("complete")),
        ]);

        schema.apply(&mut state, &update).unwrap();
        assert_eq!(state["messages"], json!(["hello", "world"]));
        assert_eq!(state["count"], json!(3));
        // Undeclared field falls back to overwrite.
        assert_eq!(state["status"], json!("complete"));
    }
}
