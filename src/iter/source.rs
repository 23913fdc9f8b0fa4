//! Iteration sources: arrays, objects, and loaded-content batches.

use serde_json::Value;

use crate::error::{MlldError, Result};
use crate::interp::batch_entries;
use crate::value::{LoopInfo, StructuredValue, ValueKind};

/// One element of an iteration, before loop metadata is attached.
#[derive(Debug, Clone)]
pub struct IterationItem {
    pub value: StructuredValue,
    /// Present when iterating an object; also bound as `@x_key`.
    pub key: Option<String>,
}

impl IterationItem {
    /// The value as it appears inside the body: loop bookkeeping installed
    /// under `.mx.loop`.
    pub fn bound_value(&self, index: usize, total: usize) -> StructuredValue {
        self.value.clone().with_loop(LoopInfo {
            index,
            iteration: index + 1,
            key: self.key.clone(),
            total,
        })
    }
}

/// Split a source value into iteration items.
///
/// Arrays iterate by position, objects by key (in insertion order), and
/// alligator glob batches by file. Anything else is a type error.
pub fn iteration_items(source: &StructuredValue) -> Result<Vec<IterationItem>> {
    if source.kind == ValueKind::LoadedContent {
        if let Some(entries) = batch_entries(source) {
            return Ok(entries
                .into_iter()
                .map(|value| IterationItem { value, key: None })
                .collect());
        }
        // A single loaded file iterates as one item.
        return Ok(vec![IterationItem {
            value: source.clone(),
            key: None,
        }]);
    }

    match &source.data {
        Value::Array(elements) => Ok(elements
            .iter()
            .map(|element| IterationItem {
                value: source.rewrap(element.clone(), ValueKind::Json),
                key: None,
            })
            .collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(key, element)| IterationItem {
                value: source.rewrap(element.clone(), ValueKind::Json),
                key: Some(key.clone()),
            })
            .collect()),
        other => Err(MlldError::TypeMismatch {
            expected: "an array, object, or loaded-content batch".to_string(),
            found: type_name(other).to_string(),
            location: None,
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arrays_iterate_by_position() {
        let source = StructuredValue::json(json!(["a", "b"]));
        let items = iteration_items(&source).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].value.text, "a");
        assert!(items[0].key.is_none());
    }

    #[test]
    fn objects_bind_keys() {
        let source = StructuredValue::json(json!({"x": 1, "y": 2}));
        let items = iteration_items(&source).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key.as_deref(), Some("x"));
        assert_eq!(items[0].value.text, "1");
    }

    #[test]
    fn scalars_are_not_iterable() {
        let source = StructuredValue::text("nope");
        let err = iteration_items(&source).unwrap_err();
        assert!(matches!(err, MlldError::TypeMismatch { .. }));
    }

    #[test]
    fn loop_metadata_lands_under_mx() {
        let source = StructuredValue::json(json!(["a", "b", "c"]));
        let items = iteration_items(&source).unwrap();
        let bound = items[1].bound_value(1, 3);
        let info = bound.metadata.mx.loop_info.as_ref().unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(info.iteration, 2);
        assert_eq!(info.total, 3);
    }
}
