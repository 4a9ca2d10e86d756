//! `{{ }}` substitution over a [`Scope`]. Re-applied up to
//! [`crate::config::TEMPLATE_REAPPLICATION_LIMIT`] times so a value that
//! itself contains a template (one level of indirection) still resolves.

use crate::config::TEMPLATE_REAPPLICATION_LIMIT;
use crate::error::{EngineError, EngineResult};
use crate::scope::Scope;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("static regex is valid"));

/// Renders `template` against `scope`, re-expanding up to the configured
/// limit to permit indirection. Stops early once a pass leaves the string
/// unchanged.
pub fn render_template(template: &str, scope: &Scope) -> EngineResult<String> {
    let mut current = template.to_string();
    for _ in 0..TEMPLATE_REAPPLICATION_LIMIT {
        let expanded = render_once(&current, scope)?;
        if expanded == current {
            return Ok(expanded);
        }
        current = expanded;
    }
    Ok(current)
}

fn render_once(template: &str, scope: &Scope) -> EngineResult<String> {
    let mut err = None;
    let result = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let expr = caps[1].trim();
        match resolve_placeholder(expr, scope) {
            Ok(s) => s,
            Err(e) => {
                err = Some(e);
                String::new()
            }
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(result.into_owned())
}

fn resolve_placeholder(expr: &str, scope: &Scope) -> EngineResult<String> {
    if let Some(inner) = expr.strip_prefix("json(").and_then(|s| s.strip_suffix(')')) {
        let value = resolve_path(inner.trim(), scope)?;
        return serde_json::to_string_pretty(&value)
            .map_err(|e| EngineError::configuration(format!("json() template function: {e}")));
    }
    let value = resolve_path(expr, scope)?;
    Ok(value_to_display_string(&value))
}

/// Resolves a dotted path (`params.name`, `context.foo.bar`, `it`) against
/// the scope's fixed top-level keys.
fn resolve_path(path: &str, scope: &Scope) -> EngineResult<Value> {
    let mut segments = path.split('.');
    let root = segments
        .next()
        .ok_or_else(|| EngineError::configuration("empty template placeholder"))?;

    let mut current = match root {
        "params" => scope.params.clone(),
        "context" => scope.context.clone(),
        "vars" => scope.vars.clone(),
        "it" => scope.it_or_null(),
        "components" => {
            // components are prompt/schema tables, not JSON-addressable by
            // default; only `components.prompts.<name>` / `.schemas.<name>`
            // make sense and are handled specially below.
            return resolve_components_path(&mut segments, scope);
        }
        other => {
            return Err(EngineError::configuration(format!(
                "unknown template root '{other}'"
            )));
        }
    };

    for segment in segments {
        current = index_value(&current, segment);
    }
    Ok(current)
}

fn resolve_components_path(
    segments: &mut std::str::Split<'_, char>,
    scope: &Scope,
) -> EngineResult<Value> {
    let kind = segments
        .next()
        .ok_or_else(|| EngineError::configuration("components path missing kind"))?;
    let name = segments
        .next()
        .ok_or_else(|| EngineError::configuration("components path missing name"))?;
    match kind {
        "prompts" => Ok(Value::String(
            scope
                .components
                .prompts
                .get(name)
                .cloned()
                .unwrap_or_default(),
        )),
        "schemas" => Ok(scope
            .components
            .schemas
            .get(name)
            .cloned()
            .unwrap_or(Value::Null)),
        other => Err(EngineError::configuration(format!(
            "unknown components kind '{other}'"
        ))),
    }
}

fn index_value(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
        Value::Array(items) => key
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn value_to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
