//! The evaluation environment shared by templates and expressions:
//! `{params, context, components, vars, it}`.

use serde_json::Value;
use std::collections::HashMap;

/// Reusable prompt/schema components, addressable by name.
#[derive(Debug, Clone, Default)]
pub struct Components {
    pub prompts: HashMap<String, String>,
    pub schemas: HashMap<String, Value>,
}

/// The fixed-shape evaluation environment.
///
/// Derived scopes (produced by [`Scope::with_vars`] / [`Scope::with_it`])
/// clone and overlay `vars`/`it` non-destructively: the parent scope is left
/// untouched, so sibling evaluations never observe each other's overlays.
#[derive(Debug, Clone)]
pub struct Scope {
    pub params: Value,
    pub context: Value,
    pub components: Components,
    pub vars: Value,
    pub it: Option<Value>,
}

impl Scope {
    pub fn new(params: Value, context: Value, components: Components) -> Self {
        Self {
            params,
            context,
            components,
            vars: Value::Object(Default::default()),
            it: None,
        }
    }

    /// Overlay additional vars on top of the current ones, returning a new
    /// scope. Incoming keys win on conflict.
    pub fn with_vars(&self, overlay: &Value) -> Self {
        let mut merged = self.vars.clone();
        if let (Value::Object(base), Value::Object(add)) = (&mut merged, overlay) {
            for (k, v) in add {
                base.insert(k.clone(), v.clone());
            }
        }
        Self {
            params: self.params.clone(),
            context: self.context.clone(),
            components: self.components.clone(),
            vars: merged,
            it: self.it.clone(),
        }
    }

    /// Bind the iteration value for one element of an `iterateOn` loop.
    pub fn with_it(&self, it: Value) -> Self {
        Self {
            params: self.params.clone(),
            context: self.context.clone(),
            components: self.components.clone(),
            vars: self.vars.clone(),
            it: Some(it),
        }
    }

    /// Replace `context` with a fresh snapshot (taken under the accumulator
    /// lock by the caller).
    pub fn with_context(&self, context: Value) -> Self {
        Self {
            params: self.params.clone(),
            context,
            components: self.components.clone(),
            vars: self.vars.clone(),
            it: self.it.clone(),
        }
    }

    /// The `it` value or `Value::Null` if no iteration is in progress —
    /// convenient for feeding a `rhai::Scope` a value that is always present.
    pub fn it_or_null(&self) -> Value {
        self.it.clone().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn with_vars_does_not_mutate_parent() {
        let base = Scope::new(json!({}), json!({}), Components::default());
        let derived = base.with_vars(&json!({"x": 1}));
        assert_eq!(base.vars, json!({}));
        assert_eq!(derived.vars, json!({"x": 1}));
    }

    #[test]
    fn with_it_leaves_sibling_scopes_unaffected() {
        let base = Scope::new(json!({}), json!({}), Components::default());
        let a = base.with_it(json!("a"));
        let b = base.with_it(json!("b"));
        assert_eq!(a.it, Some(json!("a")));
        assert_eq!(b.it, Some(json!("b")));
        assert_eq!(base.it, None);
    }
}
