//! Schema View: a JSON Schema carrier exposing by-session and by-phase
//! derived views, plus `$ref` resolution with cycle detection.

use crate::error::{EngineError, EngineResult};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};

const X_SESSION: &str = "x-session";
const X_PHASE: &str = "x-phase";

/// A JSON Schema object, carried as a raw `serde_json::Value` (object at
/// root) so arbitrary JSON Schema keywords pass through untouched; only
/// `properties`/`required`/`items`/`anyOf`/`$ref` are interpreted here.
#[derive(Debug, Clone)]
pub struct SchemaView(pub Value);

/// A table of named reusable schemas, the target of
/// `$ref: #/components/schemas/<name>`.
pub type RefTable = HashMap<String, Value>;

impl SchemaView {
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    fn properties(&self) -> Option<&Map<String, Value>> {
        self.0.get("properties")?.as_object()
    }

    /// Replaces `$ref` nodes with the referenced schema's content, preserving
    /// the referring node's `x-phase`/`x-session`/`description`. Cycles leave
    /// the deepest re-entry as an unresolved `$ref`. Fails on an unknown ref.
    pub fn resolve(&self, ref_table: &RefTable) -> EngineResult<SchemaView> {
        let mut visited = HashSet::new();
        let resolved = resolve_node(&self.0, ref_table, &mut visited)?;
        Ok(SchemaView(resolved))
    }

    /// Keeps only properties whose `x-session == name`, filtering `required`
    /// to the retained keys.
    pub fn get_session(&self, name: &str) -> EngineResult<SchemaView> {
        self.filter_properties(|prop| prop.get(X_SESSION).and_then(Value::as_str) == Some(name))
    }

    /// Keeps only properties whose `x-phase == index` (properties missing
    /// `x-phase` are treated as phase 0).
    pub fn get_phase(&self, index: u64) -> EngineResult<SchemaView> {
        self.filter_properties(|prop| phase_of(prop) == index)
    }

    /// Sorted, de-duplicated list of all `x-phase` values present.
    pub fn get_phase_indexes(&self) -> Vec<u64> {
        let mut phases = BTreeSet::new();
        if let Some(props) = self.properties() {
            for prop in props.values() {
                phases.insert(phase_of(prop));
            }
        }
        phases.into_iter().collect()
    }

    /// Set of all `x-session` names present (properties without `x-session`
    /// are not assigned to any session and are excluded).
    pub fn get_session_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        if let Some(props) = self.properties() {
            for prop in props.values() {
                if let Some(name) = prop.get(X_SESSION).and_then(Value::as_str) {
                    ids.insert(name.to_string());
                }
            }
        }
        ids
    }

    fn filter_properties(&self, keep: impl Fn(&Value) -> bool) -> EngineResult<SchemaView> {
        let root = self
            .0
            .as_object()
            .ok_or_else(|| EngineError::schema("root schema is not an object"))?;

        let mut out = root.clone();

        let props = root
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut kept_props = Map::new();
        let mut kept_keys = HashSet::new();
        for (key, prop) in props {
            if keep(&prop) {
                kept_keys.insert(key.clone());
                kept_props.insert(key, prop);
            }
        }
        out.insert("properties".to_string(), Value::Object(kept_props));

        if let Some(required) = root.get("required").and_then(Value::as_array) {
            let filtered: Vec<Value> = required
                .iter()
                .filter(|r| r.as_str().map(|s| kept_keys.contains(s)).unwrap_or(false))
                .cloned()
                .collect();
            out.insert("required".to_string(), Value::Array(filtered));
        }

        Ok(SchemaView(Value::Object(out)))
    }
}

impl PartialEq for SchemaView {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

fn phase_of(prop: &Value) -> u64 {
    prop.get(X_PHASE).and_then(Value::as_u64).unwrap_or(0)
}

fn resolve_node(
    node: &Value,
    ref_table: &RefTable,
    visited: &mut HashSet<String>,
) -> EngineResult<Value> {
    if let Some(obj) = node.as_object() {
        if let Some(Value::String(r)) = obj.get("$ref") {
            return resolve_ref(r, obj, ref_table, visited);
        }

        let mut out = Map::new();
        for (key, value) in obj {
            let resolved = match key.as_str() {
                "properties" => resolve_map_values(value, ref_table, visited)?,
                "items" => resolve_node(value, ref_table, visited)?,
                "anyOf" => resolve_array_items(value, ref_table, visited)?,
                _ => value.clone(),
            };
            out.insert(key.clone(), resolved);
        }
        return Ok(Value::Object(out));
    }
    Ok(node.clone())
}

fn resolve_map_values(
    value: &Value,
    ref_table: &RefTable,
    visited: &mut HashSet<String>,
) -> EngineResult<Value> {
    let Some(map) = value.as_object() else {
        return Ok(value.clone());
    };
    let mut out = Map::new();
    for (key, v) in map {
        out.insert(key.clone(), resolve_node(v, ref_table, visited)?);
    }
    Ok(Value::Object(out))
}

fn resolve_array_items(
    value: &Value,
    ref_table: &RefTable,
    visited: &mut HashSet<String>,
) -> EngineResult<Value> {
    let Some(items) = value.as_array() else {
        return Ok(value.clone());
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(resolve_node(item, ref_table, visited)?);
    }
    Ok(Value::Array(out))
}

fn ref_name(r: &str) -> &str {
    r.rsplit('/').next().unwrap_or(r)
}

fn resolve_ref(
    r: &str,
    referring_node: &Map<String, Value>,
    ref_table: &RefTable,
    visited: &mut HashSet<String>,
) -> EngineResult<Value> {
    let name = ref_name(r);

    if visited.contains(name) {
        // Cycle: leave the deepest re-entry as an unresolved $ref.
        return Ok(Value::Object(referring_node.clone()));
    }

    let target = ref_table
        .get(name)
        .ok_or_else(|| EngineError::schema(format!("unknown schema reference '{r}'")))?;

    visited.insert(name.to_string());
    let mut resolved = resolve_node(target, ref_table, visited)?;
    visited.remove(name);

    // The referring node's own x-phase/x-session/description win over the
    // referenced schema's.
    if let Some(resolved_obj) = resolved.as_object_mut() {
        for key in [X_PHASE, X_SESSION, "description"] {
            if let Some(v) = referring_node.get(key) {
                resolved_obj.insert(key.to_string(), v.clone());
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn master() -> SchemaView {
        SchemaView::new(json!({
            "type": "object",
            "properties": {
                "p1": {"type": "string", "x-session": "A", "x-phase": 0},
                "p2": {"type": "string", "x-session": "A", "x-phase": 1},
                "p3": {"type": "string", "x-session": "B", "x-phase": 0},
                "p4": {"type": "string", "x-session": "B", "x-phase": 1},
                "unassigned": {"type": "string"}
            },
            "required": ["p1", "p2", "p3", "p4", "unassigned"]
        }))
    }

    #[test]
    fn get_session_filters_properties_and_required() {
        let a = master().get_session("A").unwrap();
        let props = a.0["properties"].as_object().unwrap();
        assert_eq!(props.len(), 2);
        assert!(props.contains_key("p1"));
        assert!(props.contains_key("p2"));
        assert_eq!(a.0["required"], json!(["p1", "p2"]));
    }

    #[test]
    fn missing_x_session_is_silently_excluded() {
        let a = master().get_session("A").unwrap();
        assert!(!a.0["properties"].as_object().unwrap().contains_key("unassigned"));
    }

    #[test]
    fn missing_x_phase_defaults_to_zero() {
        let schema = SchemaView::new(json!({
            "type": "object",
            "properties": {"p": {"type": "string", "x-session": "A"}}
        }));
        let phase0 = schema.get_phase(0).unwrap();
        assert!(phase0.0["properties"].as_object().unwrap().contains_key("p"));
    }

    #[test]
    fn get_phase_indexes_sorted_unique() {
        assert_eq!(master().get_phase_indexes(), vec![0, 1]);
    }

    #[test]
    fn get_session_ids_excludes_unassigned() {
        let ids = master().get_session_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("A"));
        assert!(ids.contains("B"));
    }

    #[test]
    fn get_phase_then_get_session_commutes_with_get_session_then_get_phase() {
        let m = master();
        let via_phase_then_session = m.get_phase(0).unwrap().get_session("A").unwrap();
        let via_session_then_phase = m.get_session("A").unwrap().get_phase(0).unwrap();
        assert_eq!(via_phase_then_session, via_session_then_phase);
    }

    #[test]
    fn cyclic_ref_resolution_terminates_and_leaves_ref_at_reentry() {
        let mut ref_table = RefTable::new();
        ref_table.insert(
            "node".to_string(),
            json!({
                "type": "object",
                "properties": {
                    "child": {"$ref": "#/components/schemas/node"}
                }
            }),
        );
        let schema = SchemaView::new(json!({"$ref": "#/components/schemas/node"}));
        let resolved = schema.resolve(&ref_table).unwrap();
        let child = &resolved.0["properties"]["child"];
        assert_eq!(child["$ref"], json!("#/components/schemas/node"));
    }

    #[test]
    fn resolve_preserves_referring_nodes_annotations() {
        let mut ref_table = RefTable::new();
        ref_table.insert(
            "shared".to_string(),
            json!({"type": "string", "x-phase": 9}),
        );
        let schema = SchemaView::new(json!({
            "$ref": "#/components/schemas/shared",
            "x-phase": 2,
            "x-session": "A"
        }));
        let resolved = schema.resolve(&ref_table).unwrap();
        assert_eq!(resolved.0["x-phase"], json!(2));
        assert_eq!(resolved.0["x-session"], json!("A"));
    }

    #[test]
    fn resolve_fails_on_unknown_ref() {
        let schema = SchemaView::new(json!({"$ref": "#/components/schemas/missing"}));
        assert!(schema.resolve(&RefTable::new()).is_err());
    }
}
