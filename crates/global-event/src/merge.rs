//! Shallow merge of JSON objects contributed by different services.
//!
//! The merge is a flat union of top-level fields applied in source order:
//! when two sources carry the same field the later one wins. Nested objects
//! are replaced, not merged.

use serde_json::{Map, Value};

use crate::{CodecError, Result};

/// Merges the given `(source, payload)` pairs into a single JSON object.
///
/// A missing (`None`) or `null` payload contributes nothing. Any other
/// non-object payload is an error, since it has no fields to merge.
pub fn merge_objects<'a, I>(sources: I) -> Result<Map<String, Value>>
where
    I: IntoIterator<Item = (&'a str, Option<&'a Value>)>,
{
    let mut merged = Map::new();
    for (key, value) in sources {
        if let Some(value) = value {
            merge_into(&mut merged, key, value)?;
        }
    }
    Ok(merged)
}

/// Copies every top-level field of `value` into `target`, overwriting.
pub fn merge_into(target: &mut Map<String, Value>, source_key: &str, value: &Value) -> Result<()> {
    match value {
        Value::Null => Ok(()),
        Value::Object(fields) => {
            for (field, v) in fields {
                target.insert(field.clone(), v.clone());
            }
            Ok(())
        }
        other => Err(CodecError::NotAnObject {
            source_key: source_key.to_string(),
            found: kind(other),
        }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
