//! Incremental Merger: thread-safe merge of a phase's JSON output into the
//! shared accumulator. Only top-level fields receive special treatment —
//! arrays append, maps merge key-wise; everything deeper is replaced as
//! received.

use crate::error::{EngineError, EngineResult};
use serde_json::{Map, Value};
use std::sync::Mutex;

/// The caller-supplied value every phase's JSON is merged into.
///
/// Modeled as the teacher's design note suggests: a tagged union over
/// `Struct` (the caller declared field names up front) and `Map` (open,
/// string-keyed). Both variants are backed by the same `serde_json::Map`
/// representation so the merge algorithm below is single-pass and identical
/// for either shape — "natural JSON names" falls out for free since structs
/// are still represented as JSON objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// A record type with a fixed, caller-declared set of fields.
    Struct(Map<String, Value>),
    /// An open, string-keyed map.
    Map(Map<String, Value>),
}

impl Accumulator {
    pub fn empty_map() -> Self {
        Accumulator::Map(Map::new())
    }

    pub fn empty_struct() -> Self {
        Accumulator::Struct(Map::new())
    }

    pub fn as_value(&self) -> Value {
        match self {
            Accumulator::Struct(m) | Accumulator::Map(m) => Value::Object(m.clone()),
        }
    }

    fn fields_mut(&mut self) -> &mut Map<String, Value> {
        match self {
            Accumulator::Struct(m) | Accumulator::Map(m) => m,
        }
    }
}

/// Serializes concurrent merges behind a single lock, per §4.2/§5.
pub struct Merger {
    accumulator: Mutex<Accumulator>,
}

impl Merger {
    pub fn new(initial: Accumulator) -> Self {
        Self {
            accumulator: Mutex::new(initial),
        }
    }

    /// Merges `json_bytes` (a JSON object) into the accumulator using the
    /// top-level array-append / map-merge-key-wise / scalar-overwrite rules.
    pub fn merge(&self, json_bytes: &[u8]) -> EngineResult<()> {
        let incoming: Value = serde_json::from_slice(json_bytes)
            .map_err(|e| EngineError::merge(format!("malformed phase output: {e}")))?;
        let incoming = incoming
            .as_object()
            .ok_or_else(|| EngineError::merge("phase output is not a JSON object"))?
            .clone();

        let mut guard = self
            .accumulator
            .lock()
            .expect("accumulator mutex poisoned");
        let target = guard.fields_mut();
        merge_top_level(target, incoming)?;
        Ok(())
    }

    /// Merges an already-parsed JSON value (used by pre-calls targeted at
    /// `context`, which never go through the wire as bytes).
    pub fn merge_value(&self, incoming: Map<String, Value>) -> EngineResult<()> {
        let mut guard = self
            .accumulator
            .lock()
            .expect("accumulator mutex poisoned");
        merge_top_level(guard.fields_mut(), incoming)
    }

    /// Takes a JSON-serializable snapshot of the current accumulator, used
    /// for prompt injection (`context: true`).
    pub fn snapshot(&self) -> Value {
        let guard = self
            .accumulator
            .lock()
            .expect("accumulator mutex poisoned");
        guard.as_value()
    }

    /// Consumes the merger, returning the final accumulator.
    pub fn into_inner(self) -> Accumulator {
        self.accumulator
            .into_inner()
            .expect("accumulator mutex poisoned")
    }
}

fn merge_top_level(
    target: &mut Map<String, Value>,
    incoming: Map<String, Value>,
) -> EngineResult<()> {
    for (key, new_value) in incoming {
        match target.get_mut(&key) {
            Some(existing) => merge_one(existing, new_value)?,
            None => {
                target.insert(key, new_value);
            }
        }
    }
    Ok(())
}

fn merge_one(existing: &mut Value, incoming: Value) -> EngineResult<()> {
    match incoming {
        Value::Array(mut incoming_arr) => match existing {
            Value::Array(existing_arr) => {
                existing_arr.append(&mut incoming_arr);
                Ok(())
            }
            other => Err(EngineError::merge(format!(
                "type mismatch merging array into {other}"
            ))),
        },
        Value::Object(incoming_map) => match existing {
            Value::Object(existing_map) => {
                // Recursive merge, but only at this top level: nested values
                // are overwritten, not merged further.
                for (k, v) in incoming_map {
                    existing_map.insert(k, v);
                }
                Ok(())
            }
            other => Err(EngineError::merge(format!(
                "type mismatch merging object into {other}"
            ))),
        },
        scalar => {
            *existing = scalar;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_overlapping_keys_produce_set_union_regardless_of_order() {
        let merger = Merger::new(Accumulator::empty_map());
        merger.merge(br#"{"p1": "x"}"#).unwrap();
        merger.merge(br#"{"p2": "y"}"#).unwrap();
        assert_eq!(merger.snapshot(), json!({"p1": "x", "p2": "y"}));
    }

    #[test]
    fn array_fields_append_in_order() {
        let merger = Merger::new(Accumulator::empty_map());
        merger.merge(br#"{"items": ["a", "b"]}"#).unwrap();
        merger.merge(br#"{"items": ["c"]}"#).unwrap();
        assert_eq!(merger.snapshot(), json!({"items": ["a", "b", "c"]}));
    }

    #[test]
    fn map_fields_merge_key_wise() {
        let merger = Merger::new(Accumulator::empty_map());
        merger.merge(br#"{"m": {"a": 1}}"#).unwrap();
        merger.merge(br#"{"m": {"b": 2}}"#).unwrap();
        assert_eq!(merger.snapshot(), json!({"m": {"a": 1, "b": 2}}));
    }

    #[test]
    fn scalar_fields_overwrite() {
        let merger = Merger::new(Accumulator::empty_map());
        merger.merge(br#"{"count": 1}"#).unwrap();
        merger.merge(br#"{"count": 2}"#).unwrap();
        assert_eq!(merger.snapshot(), json!({"count": 2}));
    }

    #[test]
    fn type_mismatch_is_a_decode_error() {
        let merger = Merger::new(Accumulator::empty_map());
        merger.merge(br#"{"m": 5}"#).unwrap();
        assert!(merger.merge(br#"{"m": {"a": 1}}"#).is_err());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let merger = Merger::new(Accumulator::empty_map());
        assert!(merger.merge(b"not json").is_err());
    }
}
