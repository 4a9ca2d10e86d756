//! The embedded expression language. Built on `rhai` (the expression-engine
//! dependency pulled from `examples/ConaryLabs-Mira/crates/mira-server`'s
//! `Cargo.toml`), with the scope's keys injected as a `rhai::Scope` before
//! each evaluation.
//!
//! Three typed entry points mirror the source: boolean (dependency gates),
//! array (`iterateOn`), and generic (`EvaluateMapValues`'s `$( expr )` path).

use crate::error::{EngineError, EngineResult};
use crate::scope::{Components, Scope};
use rhai::{Array, Dynamic, Engine};
use serde_json::Value;

/// Wraps a configured `rhai::Engine` with the built-ins `unique`, `chunk`,
/// and `render` registered.
pub struct Evaluator {
    engine: Engine,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        let mut engine = Engine::new();

        engine.register_fn("unique", unique_builtin);
        engine.register_fn("chunk", chunk_builtin);
        engine.register_fn("render", render_builtin);

        Self { engine }
    }

    fn rhai_scope(&self, scope: &Scope) -> EngineResult<rhai::Scope<'static>> {
        let mut rscope = rhai::Scope::new();
        rscope.push_dynamic("params", value_to_dynamic(&scope.params)?);
        rscope.push_dynamic("context", value_to_dynamic(&scope.context)?);
        rscope.push_dynamic("vars", value_to_dynamic(&scope.vars)?);
        rscope.push_dynamic("it", value_to_dynamic(&scope.it_or_null())?);
        Ok(rscope)
    }

    /// Evaluates `expr`, failing unless the result is a JSON boolean.
    pub fn evaluate_boolean(&self, expr: &str, scope: &Scope) -> EngineResult<bool> {
        let value = self.evaluate_generic(expr, scope)?;
        value.as_bool().ok_or_else(|| {
            EngineError::configuration(format!(
                "expression '{expr}' did not evaluate to a boolean (got {value})"
            ))
        })
    }

    /// Evaluates `expr`, failing unless the result is a JSON array.
    pub fn evaluate_array(&self, expr: &str, scope: &Scope) -> EngineResult<Vec<Value>> {
        let value = self.evaluate_generic(expr, scope)?;
        match value {
            Value::Array(items) => Ok(items),
            other => Err(EngineError::configuration(format!(
                "expression '{expr}' did not evaluate to an array (got {other})"
            ))),
        }
    }

    /// Evaluates `expr` against `scope`, returning the native JSON type.
    pub fn evaluate_generic(&self, expr: &str, scope: &Scope) -> EngineResult<Value> {
        let mut rscope = self.rhai_scope(scope)?;
        let result: Dynamic = self
            .engine
            .eval_with_scope(&mut rscope, expr)
            .map_err(|e| EngineError::configuration(format!("expression '{expr}' failed: {e}")))?;
        dynamic_to_value(result)
    }
}

fn value_to_dynamic(value: &Value) -> EngineResult<Dynamic> {
    rhai::serde::to_dynamic(value)
        .map_err(|e| EngineError::configuration(format!("scope conversion failed: {e}")))
}

fn dynamic_to_value(dynamic: Dynamic) -> EngineResult<Value> {
    rhai::serde::from_dynamic(&dynamic)
        .map_err(|e| EngineError::configuration(format!("result conversion failed: {e}")))
}

fn unique_builtin(list: Array) -> Array {
    let mut seen: Vec<Value> = Vec::with_capacity(list.len());
    let mut out = Array::with_capacity(list.len());
    for item in list {
        let Ok(value) = dynamic_to_value(item.clone()) else {
            continue;
        };
        if !seen.contains(&value) {
            seen.push(value);
            out.push(item);
        }
    }
    out
}

fn chunk_builtin(list: Array, size: rhai::INT) -> Array {
    if size <= 0 {
        return Array::new();
    }
    let size = size as usize;
    list.chunks(size)
        .map(|chunk| Dynamic::from_array(chunk.to_vec()))
        .collect()
}

fn render_builtin(template: &str, scope_map: rhai::Map) -> String {
    let scope_value = Dynamic::from_map(scope_map);
    let Ok(value) = dynamic_to_value(scope_value) else {
        return String::new();
    };
    let nested_scope = scope_from_json(&value);
    crate::eval::template::render_template(template, &nested_scope).unwrap_or_default()
}

/// Builds a throwaway [`Scope`] from a JSON object for the `render()`
/// built-in; `components` are not addressable from a nested render.
fn scope_from_json(value: &Value) -> Scope {
    let get = |key: &str| value.get(key).cloned().unwrap_or(Value::Null);
    Scope::new(get("params"), get("context"), Components::default()).with_vars(&get("vars"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope_with(params: Value, context: Value) -> Scope {
        Scope::new(params, context, Components::default())
    }

    #[test]
    fn boolean_entry_point_accepts_boolean_expressions() {
        let evaluator = Evaluator::new();
        let scope = scope_with(json!({}), json!({"animal1": "dog"}));
        assert!(evaluator
            .evaluate_boolean("context.animal1.len() > 0", &scope)
            .unwrap());
    }

    #[test]
    fn boolean_entry_point_rejects_non_boolean_result() {
        let evaluator = Evaluator::new();
        let scope = scope_with(json!({}), json!({}));
        assert!(evaluator.evaluate_boolean("1 + 1", &scope).is_err());
    }

    #[test]
    fn array_entry_point_evaluates_params_path() {
        let evaluator = Evaluator::new();
        let scope = scope_with(json!({"items": ["a", "b"]}), json!({}));
        let items = evaluator.evaluate_array("params.items", &scope).unwrap();
        assert_eq!(items, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn unique_builtin_dedups_preserving_order() {
        let evaluator = Evaluator::new();
        let scope = scope_with(json!({"items": [1, 2, 1, 3, 2]}), json!({}));
        let out = evaluator.evaluate_generic("unique(params.items)", &scope).unwrap();
        assert_eq!(out, json!([1, 2, 3]));
    }

    #[test]
    fn chunk_builtin_splits_into_groups() {
        let evaluator = Evaluator::new();
        let scope = scope_with(json!({"items": [1, 2, 3, 4, 5]}), json!({}));
        let out = evaluator.evaluate_generic("chunk(params.items, 2)", &scope).unwrap();
        assert_eq!(out, json!([[1, 2], [3, 4], [5]]));
    }
}
