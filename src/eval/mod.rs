//! Scope & Evaluator: text templates and typed expressions over a [`Scope`].
//!
//! Kept as two distinct evaluators (see `SPEC_FULL.md` §4.3/§9): templates
//! always yield strings, while expressions preserve native JSON types. This
//! is why `EvaluateMapValues` branches on the `$( expr )` marker rather than
//! running everything through one engine.

pub mod expr;
pub mod template;

pub use expr::Evaluator;
pub use template::render_template;

use crate::error::{EngineError, EngineResult};
use crate::scope::Scope;
use serde_json::Value;

/// Rewrites each string value of `map` as either a variable reference
/// (`$( expr )`, evaluated as an expression, preserving native type) or a
/// template (always a string). Non-string values pass through unchanged.
pub fn evaluate_map_values(
    evaluator: &Evaluator,
    map: &serde_json::Map<String, Value>,
    scope: &Scope,
) -> EngineResult<serde_json::Map<String, Value>> {
    let mut out = serde_json::Map::with_capacity(map.len());
    for (key, value) in map {
        let rewritten = match value {
            Value::String(s) => {
                if let Some(expr) = variable_reference(s) {
                    evaluator.evaluate_generic(expr, scope)?
                } else {
                    Value::String(render_template(s, scope)?)
                }
            }
            other => other.clone(),
        };
        out.insert(key.clone(), rewritten);
    }
    Ok(out)
}

/// Recognizes the `$( expr )` variable-reference marker, returning the inner
/// expression text trimmed of surrounding whitespace.
fn variable_reference(s: &str) -> Option<&str> {
    let s = s.trim();
    let inner = s.strip_prefix("$(")?.strip_suffix(')')?;
    Some(inner.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_variable_reference_marker() {
        assert_eq!(variable_reference("$( 1 + 1 )"), Some("1 + 1"));
        assert_eq!(variable_reference("plain text"), None);
        assert_eq!(variable_reference("$(params.count)"), Some("params.count"));
    }
}
