//! Runner facade (§4.7): the single-run lifecycle entry point a caller
//! drives. Owns the function registry, transformer chain, resource loader
//! and model-client prototype; initializes the accumulator; hands off to the
//! [`crate::scheduler`] for the actual dependency-ordered execution.
//!
//! Grounded on the teacher's lightweight start/shutdown guard idiom in
//! `backend/src/tasks/mod.rs` (`TaskManager::start`), generalized from an
//! `AtomicBool` guard to a `try_lock`-based one since a `Run` is scoped to a
//! single call rather than a background task's whole lifetime.

use crate::error::{EngineError, EngineResult};
use crate::eval::{render_template, Evaluator};
use crate::functions::transform::TransformerChain;
use crate::functions::FunctionRegistry;
use crate::merge::{Accumulator, Merger};
use crate::model::ModelClient;
use crate::plan::Plan;
use crate::progress;
use crate::resource::ResourceLoader;
use crate::schema::SchemaView;
use crate::scheduler::{self, SchedulerConfig};
use crate::scope::{Components, Scope};
use crate::session::{parse_duration, SessionStatus};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// The result of one `Runner::run` call: the final accumulator value plus
/// every session's terminal status (§4.6 "the accumulator is returned
/// regardless of individual failures").
pub struct RunOutcome {
    pub accumulator: Value,
    pub statuses: HashMap<String, SessionStatus>,
}

/// External collaborators a `Runner` is constructed with — populated before
/// `run` and read-only during a run, per §5's "Shared resources" note.
pub struct Runner {
    registry: Arc<FunctionRegistry>,
    resource_loader: Arc<dyn ResourceLoader>,
    model_prototype: Arc<dyn ModelClient>,
    evaluator: Arc<Evaluator>,
    /// `try_lock`-guarded single-run contract: a second concurrent `run` call
    /// fails immediately with `AlreadyRunning` rather than queuing.
    run_guard: AsyncMutex<()>,
}

impl Runner {
    pub fn new(
        registry: FunctionRegistry,
        resource_loader: Arc<dyn ResourceLoader>,
        model_prototype: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            resource_loader,
            model_prototype,
            evaluator: Arc::new(Evaluator::new()),
            run_guard: AsyncMutex::new(()),
        }
    }

    /// The shared transformer list, function registry, and scope constructor
    /// a caller may want before/after a run — §4.7's "exposes helpers"
    /// bullet. The "script-engine handle" is the [`Evaluator`] itself; there
    /// is no separate no-op variant since the embedded evaluator is always
    /// present.
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Runs one traversal of `plan` against `params`, using `accumulator_is_map`
    /// to decide whether the caller's accumulator is an open map (initialized
    /// empty) or a declared struct (also initialized empty here, since this
    /// crate represents both shapes as a `serde_json::Map` per §9's tagged-union
    /// design note).
    pub async fn run(
        &self,
        plan: &Plan,
        params: Value,
        accumulator_is_map: bool,
        worker_count: usize,
        default_timeout: std::time::Duration,
        phase_retry_delay: std::time::Duration,
        progress_capacity: usize,
    ) -> EngineResult<(RunOutcome, tokio::sync::mpsc::Receiver<progress::ProgressEvent>)> {
        let _guard = self
            .run_guard
            .try_lock()
            .map_err(|_| EngineError::AlreadyRunning)?;

        plan.validate()?;
        self.registry
            .check_required(&plan.required_tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>())
            .await?;

        let components = Components {
            prompts: plan.components.prompts.clone(),
            schemas: plan.components.schemas.clone(),
        };

        let accumulator = if accumulator_is_map {
            Accumulator::empty_map()
        } else {
            Accumulator::empty_struct()
        };
        let merger = Arc::new(Merger::new(accumulator));

        let mut base_scope = Scope::new(params, Value::Object(Default::default()), components);
        if let Some(vars) = plan.vars.as_object() {
            base_scope = base_scope.with_vars(&Value::Object(vars.clone()));
        }

        let transformers = Arc::new(TransformerChain::new(plan.transformer_chain()?));
        let (progress_sink, progress_rx) = progress::channel(progress_capacity);

        // Plan-scoped system prompt and pre-calls run once, before any
        // session: the prototype's system prompt is shared read-only by
        // every per-session clone (§5 "Model client instances").
        let mut prototype_for_run = self.model_prototype.new_session();
        if let Some(system_prompt) = &plan.system_prompt {
            let rendered = render_template(system_prompt, &base_scope)?;
            prototype_for_run.set_system_prompt(rendered);
        }
        for pre_call in &plan.pre_calls {
            let args = pre_call.args.as_object().cloned().unwrap_or_default();
            let evaluated_args = crate::eval::evaluate_map_values(&self.evaluator, &args, &base_scope)?;
            let result = self
                .registry
                .invoke(&pre_call.function, Value::Object(evaluated_args), &transformers)
                .await?;
            match pre_call.destination.as_str() {
                "vars" => base_scope = base_scope.with_vars(&result),
                "context" => {
                    if let Some(obj) = result.as_object() {
                        merger.merge_value(obj.clone())?;
                    }
                }
                _ => {} // "prompt": no plan-level prompt exists to splice into.
            }
        }
        let prototype_for_run: Arc<dyn ModelClient> = Arc::from(prototype_for_run);

        let master_schema = Arc::new(SchemaView::new(plan.schema.clone()));
        let sessions = Arc::new(plan.sessions.clone());

        let scheduler_config = SchedulerConfig {
            worker_count,
            default_timeout,
            phase_retry_delay,
        };

        let statuses = scheduler::run(
            sessions,
            master_schema,
            Arc::clone(&self.evaluator),
            Arc::clone(&merger),
            Arc::clone(&self.registry),
            transformers,
            Arc::clone(&self.resource_loader),
            progress_sink,
            prototype_for_run,
            base_scope,
            scheduler_config,
        )
        .await?;

        let accumulator = merger.snapshot();

        Ok((RunOutcome { accumulator, statuses }, progress_rx))
    }
}

/// Parses a session's `timeout` field against `default_timeout`; exposed so
/// callers assembling their own scheduler config (e.g. tests) reuse the same
/// duration-string parsing the scheduler does internally.
pub fn resolve_timeout(raw: Option<&str>, default: std::time::Duration) -> std::time::Duration {
    parse_duration(raw, default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NullModelClient;
    use crate::resource::MemoryResourceLoader;
    use serde_json::json;

    fn minimal_plan() -> Plan {
        let yaml = r#"
schema:
  type: object
  properties:
    p1:
      type: string
      x-session: A
      x-phase: 0
sessions:
  A:
    prompt: "extract p1"
    attempts: 1
"#;
        Plan::from_yaml(yaml).unwrap()
    }

    #[tokio::test]
    async fn run_executes_the_one_session_and_returns_the_accumulator() {
        let runner = Runner::new(
            FunctionRegistry::new(),
            Arc::new(MemoryResourceLoader::new()),
            Arc::new(NullModelClient::new(vec![br#"{"p1": "hello"}"#.to_vec()])),
        );

        let (outcome, _rx) = runner
            .run(
                &minimal_plan(),
                json!({}),
                true,
                1,
                std::time::Duration::from_secs(5),
                std::time::Duration::ZERO,
                64,
            )
            .await
            .unwrap();

        assert_eq!(outcome.accumulator, json!({"p1": "hello"}));
        assert_eq!(outcome.statuses["A"], SessionStatus::Finished);
    }

    #[tokio::test]
    async fn a_second_concurrent_run_is_rejected() {
        let runner = Arc::new(Runner::new(
            FunctionRegistry::new(),
            Arc::new(MemoryResourceLoader::new()),
            Arc::new(NullModelClient::new(vec![br#"{"p1": "hello"}"#.to_vec()])),
        ));

        let _guard = runner.run_guard.try_lock().unwrap();
        let result = runner
            .run(
                &minimal_plan(),
                json!({}),
                true,
                1,
                std::time::Duration::from_secs(5),
                std::time::Duration::ZERO,
                64,
            )
            .await;
        assert!(matches!(result, Err(EngineError::AlreadyRunning)));
    }
}
