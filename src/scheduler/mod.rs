//! Dependency-Graph Scheduler: holds the status of every session, evaluates
//! dependency predicates, dispatches ready sessions to a bounded pool of
//! workers via a channel, cancels on per-session timeout, recovers from
//! worker panics, and terminates when every session has reached a terminal
//! state.
//!
//! Grounded on `src/advisory/mod.rs`'s `council_streaming` (spawn-per-task +
//! forward-via-channel dispatch) for the worker pool shape, and on
//! `lanegrid-agtrace/crates/agtrace-runtime/src/runtime/watcher.rs` for the
//! `catch_unwind(AssertUnwindSafe(...))` panic-safety idiom, adapted to an
//! async future via `futures::FutureExt::catch_unwind`.

use crate::error::{EngineError, EngineResult};
use crate::eval::Evaluator;
use crate::functions::transform::TransformerChain;
use crate::functions::FunctionRegistry;
use crate::merge::Merger;
use crate::model::ModelClient;
use crate::plan::{DependencyDescriptor, SessionDescriptor};
use crate::progress::ProgressSink;
use crate::resource::ResourceLoader;
use crate::schema::SchemaView;
use crate::scope::Scope;
use crate::session::state_machine::{run_session, SessionEnv};
use crate::session::{parse_duration, SessionStatus};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared, single source of truth for every session's status (§3).
pub type StatusMap = Arc<Mutex<HashMap<String, SessionStatus>>>;

/// How long the scheduler waits between scans when a pass makes no progress
/// (nothing dispatched, nothing newly unsolvable). Keeps the "scan until
/// settled" loop (§9) from busy-spinning while still noticing quickly when a
/// worker finishes.
const SCAN_BACKOFF: Duration = Duration::from_millis(5);

pub struct SchedulerConfig {
    /// Bounded worker pool size, "session workers" (default 1).
    pub worker_count: usize,
    /// Used when a session omits `timeout`.
    pub default_timeout: Duration,
    /// Delay between phase retries, threaded into every session's
    /// `SessionEnv` (shrunk to zero in tests via `EngineConfig::for_testing`).
    pub phase_retry_delay: Duration,
}

struct Task {
    name: String,
    timeout: Duration,
}

/// The outcome of checking one dependency entry (§3 "Dependency").
enum DepOutcome {
    Passed,
    Failed,
    Unsolvable(String),
}

/// Runs every session in `sessions` to a terminal status. Returns the final
/// status map; the accumulator itself lives in `merger` and is read back by
/// the caller (the Runner facade) once this returns.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    sessions: Arc<HashMap<String, SessionDescriptor>>,
    master_schema: Arc<SchemaView>,
    evaluator: Arc<Evaluator>,
    merger: Arc<Merger>,
    registry: Arc<FunctionRegistry>,
    transformers: Arc<TransformerChain>,
    resource_loader: Arc<dyn ResourceLoader>,
    progress: ProgressSink,
    model_prototype: Arc<dyn ModelClient>,
    base_scope: Scope,
    config: SchedulerConfig,
) -> EngineResult<HashMap<String, SessionStatus>> {
    let statuses: StatusMap = Arc::new(Mutex::new(
        sessions
            .keys()
            .map(|name| (name.clone(), SessionStatus::Queued))
            .collect(),
    ));

    let mut session_schemas = HashMap::with_capacity(sessions.len());
    for name in sessions.keys() {
        session_schemas.insert(name.clone(), master_schema.get_session(name)?);
    }
    let session_schemas = Arc::new(session_schemas);

    let worker_count = config.worker_count.max(1);
    let (tx, rx) = mpsc::channel::<Task>(worker_count);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        handles.push(tokio::spawn(worker_loop(
            Arc::clone(&rx),
            Arc::clone(&sessions),
            Arc::clone(&session_schemas),
            Arc::clone(&evaluator),
            Arc::clone(&merger),
            Arc::clone(&registry),
            Arc::clone(&transformers),
            Arc::clone(&resource_loader),
            progress.clone(),
            Arc::clone(&model_prototype),
            base_scope.clone(),
            Arc::clone(&statuses),
            config.phase_retry_delay,
        )));
    }

    loop {
        let (queued_names, all_terminal) = {
            let guard = statuses.lock().expect("status mutex poisoned");
            let queued: Vec<String> = guard
                .iter()
                .filter(|(_, status)| matches!(status, SessionStatus::Queued))
                .map(|(name, _)| name.clone())
                .collect();
            (queued, guard.values().all(SessionStatus::is_terminal))
        };

        if all_terminal {
            break;
        }

        let mut progressed = false;
        for name in queued_names {
            let descriptor = &sessions[&name];
            let scope = base_scope.with_context(merger.snapshot());

            let outcome = resolve_dependencies(&descriptor.depends_on, &statuses, &evaluator, &scope)?;
            match outcome {
                DepOutcome::Unsolvable(reason) => {
                    tracing::info!(session = %name, %reason, "dependency unsolvable, marking noop");
                    statuses
                        .lock()
                        .expect("status mutex poisoned")
                        .insert(name, SessionStatus::Noop { reason });
                    progressed = true;
                }
                DepOutcome::Failed => {
                    // Not ready yet; retry next scan.
                }
                DepOutcome::Passed => {
                    statuses
                        .lock()
                        .expect("status mutex poisoned")
                        .insert(name.clone(), SessionStatus::Committed);
                    let timeout = parse_duration(descriptor.timeout.as_deref(), config.default_timeout);
                    progressed = true;
                    // Blocks when the pool is busy — the intentional
                    // back-pressure called out in §4.6.
                    if tx.send(Task { name, timeout }).await.is_err() {
                        return Err(EngineError::configuration("worker pool shut down unexpectedly"));
                    }
                }
            }
        }

        if !progressed {
            tokio::time::sleep(SCAN_BACKOFF).await;
        }
    }

    drop(tx);
    for handle in handles {
        let _ = handle.await;
    }

    let final_statuses = statuses.lock().expect("status mutex poisoned").clone();
    Ok(final_statuses)
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    sessions: Arc<HashMap<String, SessionDescriptor>>,
    session_schemas: Arc<HashMap<String, SchemaView>>,
    evaluator: Arc<Evaluator>,
    merger: Arc<Merger>,
    registry: Arc<FunctionRegistry>,
    transformers: Arc<TransformerChain>,
    resource_loader: Arc<dyn ResourceLoader>,
    progress: ProgressSink,
    model_prototype: Arc<dyn ModelClient>,
    base_scope: Scope,
    statuses: StatusMap,
    retry_delay: Duration,
) {
    loop {
        let task = {
            let mut guard = rx.lock().await;
            match guard.recv().await {
                Some(task) => task,
                None => return,
            }
        };

        statuses
            .lock()
            .expect("status mutex poisoned")
            .insert(task.name.clone(), SessionStatus::Running);

        let Some(descriptor) = sessions.get(&task.name).cloned() else {
            continue;
        };
        let schema = session_schemas
            .get(&task.name)
            .cloned()
            .unwrap_or_else(|| SchemaView::new(serde_json::json!({"type": "object"})));

        let env = SessionEnv {
            name: &task.name,
            descriptor: &descriptor,
            session_schema: &schema,
            evaluator: &evaluator,
            merger: &merger,
            registry: &registry,
            transformers: &transformers,
            resource_loader: resource_loader.as_ref(),
            progress: &progress,
            retry_delay,
        };

        // Refreshed at the moment execution actually starts, not at dispatch
        // time, so `scope.context` reflects whatever other sessions have
        // merged in since this task was committed.
        let scope = base_scope.with_context(merger.snapshot());

        let outcome = AssertUnwindSafe(tokio::time::timeout(
            task.timeout,
            run_session(&env, model_prototype.as_ref(), &scope),
        ))
        .catch_unwind()
        .await;

        let new_status = match outcome {
            Ok(Ok(Ok(()))) => SessionStatus::Finished,
            Ok(Ok(Err(error))) => SessionStatus::Failed { error: error.to_string() },
            Ok(Err(_elapsed)) => SessionStatus::Failed {
                error: EngineError::timeout(&task.name).to_string(),
            },
            Err(panic) => {
                let message = panic_message(panic);
                tracing::error!(session = %task.name, %message, "worker panicked");
                SessionStatus::Failed { error: message }
            }
        };

        statuses
            .lock()
            .expect("status mutex poisoned")
            .insert(task.name, new_status);
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}

/// Combines every entry in a session's `dependsOn` list: any permanently
/// unsolvable entry makes the whole dependency unsolvable; otherwise any
/// not-yet-ready entry makes it failed (retried next scan); only when every
/// entry has passed is the session ready to dispatch.
fn resolve_dependencies(
    deps: &[DependencyDescriptor],
    statuses: &StatusMap,
    evaluator: &Evaluator,
    scope: &Scope,
) -> EngineResult<DepOutcome> {
    if deps.is_empty() {
        return Ok(DepOutcome::Passed);
    }

    let snapshot = statuses.lock().expect("status mutex poisoned").clone();
    let mut any_failed = false;
    for dep in deps {
        match resolve_one_dependency(dep, &snapshot, evaluator, scope)? {
            DepOutcome::Unsolvable(reason) => return Ok(DepOutcome::Unsolvable(reason)),
            DepOutcome::Failed => any_failed = true,
            DepOutcome::Passed => {}
        }
    }
    Ok(if any_failed { DepOutcome::Failed } else { DepOutcome::Passed })
}

fn resolve_one_dependency(
    dep: &DependencyDescriptor,
    statuses: &HashMap<String, SessionStatus>,
    evaluator: &Evaluator,
    scope: &Scope,
) -> EngineResult<DepOutcome> {
    if let Some(session) = &dep.session {
        match statuses.get(session) {
            None => {
                return Ok(DepOutcome::Unsolvable(format!(
                    "dependency references unknown session '{session}'"
                )))
            }
            Some(status) if status.is_terminal_negative() => {
                return Ok(DepOutcome::Unsolvable(format!(
                    "dependency session '{session}' ended without finishing"
                )))
            }
            Some(SessionStatus::Finished) => {}
            Some(_) => return Ok(DepOutcome::Failed),
        }
    }

    if let Some(expression) = &dep.expression {
        // A false result is treated as unsolvable, not a retry: expressions
        // gate on already-extracted data, so if that data never appears the
        // session is skipped deterministically (§9 open question #2).
        if !evaluator.evaluate_boolean(expression, scope)? {
            return Ok(DepOutcome::Unsolvable(format!(
                "dependency expression '{expression}' evaluated to false"
            )));
        }
    }

    Ok(DepOutcome::Passed)
}
