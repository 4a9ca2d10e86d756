//! Session State Machine: Init → PrePrompt? → PreCalls? → Phase Loop →
//! Terminate. Grounded on `src/advisory/tool_loop.rs`'s generic trait-bounded
//! driver (timeout wrapper around an inner loop, forced-terminal-call
//! shape) and `mira-chat/src/conductor/orchestrator.rs`'s
//! `transition()`-recording sequential phase iteration — reused one level
//! down, inside a single phase's retry loop, since here phases (not tool
//! rounds) are what advance sequentially.

use crate::error::{EngineError, EngineResult};
use crate::eval::{evaluate_map_values, render_template, Evaluator};
use crate::functions::transform::TransformerChain;
use crate::functions::FunctionRegistry;
use crate::merge::Merger;
use crate::model::{ModelClient, ToolRef};
use crate::plan::{PreCallDescriptor, SessionDescriptor};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::resource::{Destination, LoadedResource, ResourceLoader};
use crate::schema::SchemaView;
use crate::scope::Scope;
use serde_json::Value;
use std::time::Duration;

/// Everything a single session traversal needs, borrowed for the duration of
/// one `run` call (or one iteration element's traversal, when `iterateOn` is
/// set).
pub struct SessionEnv<'a> {
    pub name: &'a str,
    pub descriptor: &'a SessionDescriptor,
    /// The master schema already filtered to this session (`GetSession`).
    pub session_schema: &'a SchemaView,
    pub evaluator: &'a Evaluator,
    pub merger: &'a Merger,
    pub registry: &'a FunctionRegistry,
    pub transformers: &'a TransformerChain,
    pub resource_loader: &'a dyn ResourceLoader,
    pub progress: &'a ProgressSink,
    /// Delay between phase retries — `EngineConfig::phase_retry_delay`
    /// (5s in production, shrunk to zero in tests).
    pub retry_delay: Duration,
}

/// Runs the whole session traversal, looping over `iterateOn`'s elements if
/// present (sequentially, so results merge in encounter order — §4.5's
/// iteration rule).
pub async fn run_session(
    env: &SessionEnv<'_>,
    model_prototype: &dyn ModelClient,
    base_scope: &Scope,
) -> EngineResult<()> {
    let Some(iterate_expr) = &env.descriptor.iterate_on else {
        return run_traversal(env, model_prototype, base_scope).await;
    };

    let elements = env.evaluator.evaluate_array(iterate_expr, base_scope)?;
    for element in elements {
        let scope = base_scope.with_it(element);
        run_traversal(env, model_prototype, &scope).await?;
    }
    Ok(())
}

/// One full Init → PrePrompt → PreCalls → Phase Loop → Terminate traversal.
async fn run_traversal(
    env: &SessionEnv<'_>,
    model_prototype: &dyn ModelClient,
    scope: &Scope,
) -> EngineResult<()> {
    // --- Init ---
    if env.descriptor.attempts < 1 {
        return Err(EngineError::configuration(format!(
            "session '{}' has attempts < 1",
            env.name
        )));
    }
    let mut client = model_prototype.new_session();
    let resources = load_resources(env, scope).await?;
    let resources_for_model: Vec<LoadedResource> = resources
        .iter()
        .filter(|r| r.destination == Destination::Model)
        .cloned()
        .collect();

    let mut scope = scope.clone();
    for (descriptor, resource) in env.descriptor.resources.iter().zip(resources.iter()) {
        if resource.destination != Destination::Vars {
            continue;
        }
        if let Some(structured) = &resource.structured {
            let var_name = descriptor.var.as_deref().unwrap_or("resource");
            scope = scope.with_vars(&serde_json::json!({ var_name: structured }));
        }
    }

    // --- PrePrompt (optional) ---
    let mut used_pre_prompt = false;
    if let Some(pre_prompt) = &env.descriptor.pre_prompt {
        for raw in pre_prompt.clone().into_vec() {
            used_pre_prompt = true;
            let mut rendered = render_template(&raw, &scope)?;
            if env.descriptor.context {
                rendered = prepend_context(&rendered, env.merger);
            }
            client
                .ask(&rendered, None, &[], &[])
                .await
                .map_err(|e| EngineError::phase_failure(env.name, 0, anyhow::anyhow!(e)))?;
        }
    }

    // --- PreCalls (optional) ---
    let mut pre_call_text = String::new();
    for pre_call in &env.descriptor.pre_calls {
        let outcome = run_pre_call(env, &scope, pre_call).await?;
        pre_call_text.push_str(&outcome.text);
        if let Some(patch) = outcome.vars_patch {
            scope = scope.with_vars(&patch);
        }
    }

    // --- Phase Loop ---
    let phase_indexes = env.session_schema.get_phase_indexes();
    for (phase_position, phase) in phase_indexes.iter().enumerate() {
        let phase = *phase as usize;
        run_phase(
            env,
            &mut *client,
            &scope,
            phase,
            phase_position == 0,
            &pre_call_text,
            used_pre_prompt,
            &resources_for_model,
        )
        .await?;
    }

    Ok(())
}

async fn run_phase(
    env: &SessionEnv<'_>,
    client: &mut dyn ModelClient,
    scope: &Scope,
    phase: usize,
    is_first_phase: bool,
    pre_call_text: &str,
    used_pre_prompt: bool,
    resources_for_model: &[LoadedResource],
) -> EngineResult<()> {
    let attempts = env.descriptor.attempts;
    let iteration = scope.it.as_ref().map(|_| 0);

    let prompt_template = if is_first_phase {
        &env.descriptor.prompt
    } else {
        env.descriptor
            .next_phase_prompt
            .as_ref()
            .unwrap_or(&env.descriptor.prompt)
    };

    let mut rendered = render_template(prompt_template, scope)?;
    if is_first_phase {
        if !pre_call_text.is_empty() {
            rendered = format!("{pre_call_text}{rendered}");
        }
        if env.descriptor.context && !used_pre_prompt {
            rendered = prepend_context(&rendered, env.merger);
        }
    }

    let phase_schema = env
        .session_schema
        .get_phase(phase as u64)
        .map_err(|e| EngineError::phase_failure(env.name, phase, anyhow::anyhow!(e)))?;

    let tools = resolve_tools(env);
    let resources_for_call: &[LoadedResource] = if is_first_phase { resources_for_model } else { &[] };

    env.progress
        .send(ProgressEvent::start(env.name, phase, iteration));

    let mut last_error = None;
    for attempt in 0..attempts {
        match client
            .ask(&rendered, Some(&phase_schema.0), &tools, resources_for_call)
            .await
        {
            Ok(bytes) => match env.merger.merge(&bytes) {
                Ok(()) => {
                    env.progress.send(ProgressEvent::end(env.name, phase, iteration));
                    return Ok(());
                }
                Err(e) => {
                    env.progress
                        .send(ProgressEvent::error(env.name, Some(phase), iteration, e.to_string()));
                    last_error = Some(anyhow::anyhow!(e));
                }
            },
            Err(e) => {
                env.progress
                    .send(ProgressEvent::error(env.name, Some(phase), iteration, e.to_string()));
                last_error = Some(anyhow::anyhow!(e));
            }
        }

        if attempt + 1 < attempts {
            tokio::time::sleep(env.retry_delay).await;
        }
    }

    Err(EngineError::phase_failure(
        env.name,
        phase,
        last_error.unwrap_or_else(|| anyhow::anyhow!("phase failed with no error recorded")),
    ))
}

fn resolve_tools(env: &SessionEnv<'_>) -> Vec<ToolRef> {
    env.descriptor
        .tools
        .iter()
        .map(|t| match t.kind.as_str() {
            "collection" => ToolRef::Collection(t.name.clone()),
            "capability" => ToolRef::Capability(t.name.clone()),
            _ => ToolRef::Function(t.name.clone()),
        })
        .collect()
}

fn prepend_context(rendered: &str, merger: &Merger) -> String {
    let context = merger.snapshot();
    let pretty = serde_json::to_string_pretty(&context).unwrap_or_default();
    format!("=== CURRENT CONTEXT ===\n{pretty}\n{rendered}")
}

/// A pre-call's effect: prompt text to splice into the first phase's prompt,
/// and/or a vars overlay to fold into the scope before the phase loop runs.
struct PreCallOutcome {
    text: String,
    vars_patch: Option<Value>,
}

async fn run_pre_call(
    env: &SessionEnv<'_>,
    scope: &Scope,
    pre_call: &PreCallDescriptor,
) -> EngineResult<PreCallOutcome> {
    let args = pre_call
        .args
        .as_object()
        .cloned()
        .unwrap_or_default();
    let evaluated_args = evaluate_map_values(env.evaluator, &args, scope)?;

    let result = env
        .registry
        .invoke(&pre_call.function, Value::Object(evaluated_args), env.transformers)
        .await?;

    match pre_call.destination.as_str() {
        "vars" => Ok(PreCallOutcome {
            text: String::new(),
            vars_patch: Some(result),
        }),
        "context" => {
            if let Some(obj) = result.as_object() {
                env.merger.merge_value(obj.clone())?;
            }
            Ok(PreCallOutcome { text: String::new(), vars_patch: None })
        }
        _ => {
            let pretty = serde_json::to_string_pretty(&result).unwrap_or_default();
            Ok(PreCallOutcome {
                text: format!(
                    "=== CALL: {} - {} ===\n{pretty}\n",
                    pre_call.function, pre_call.args
                ),
                vars_patch: None,
            })
        }
    }
}

async fn load_resources(
    env: &SessionEnv<'_>,
    scope: &Scope,
) -> EngineResult<Vec<LoadedResource>> {
    let mut loaded = Vec::with_capacity(env.descriptor.resources.len());
    for descriptor in &env.descriptor.resources {
        let mut params = evaluate_map_values(
            env.evaluator,
            descriptor.params.as_object().cloned().unwrap_or_default().as_ref() as &_,
            scope,
        )
        .unwrap_or_default();
        if let Some(destination) = &descriptor.destination {
            params.insert("destination".to_string(), Value::String(destination.clone()));
        }
        let params = Value::Object(params);
        let resource = env
            .resource_loader
            .load(&descriptor.identifier, &params)
            .await?;
        let text = String::from_utf8_lossy(&resource.bytes).into_owned();
        let transformed = env
            .transformers
            .apply_resource(&descriptor.identifier, Value::String(text))?;
        let resource = match transformed {
            Value::String(s) => LoadedResource { bytes: s.into_bytes(), ..resource },
            other => LoadedResource {
                bytes: serde_json::to_vec(&other).unwrap_or(resource.bytes),
                structured: Some(other),
                ..resource
            },
        };
        loaded.push(resource);
    }
    Ok(loaded)
}
