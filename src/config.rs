//! Engine-wide, environment-overridable settings.
//!
//! Mirrors the teacher's `MiraConfig::from_env()` + global-singleton pattern,
//! but uses `once_cell::sync::Lazy` rather than `lazy_static!` since the
//! former is already a dependency and we don't need a second globals crate.

use once_cell::sync::Lazy;
use std::time::Duration;

/// Fixed by the spec, not user-tunable: the phase-level retry delay.
pub const PHASE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Fixed by the spec: templates are re-applied up to this many times to
/// permit one level of indirection through a value containing a template.
pub const TEMPLATE_REAPPLICATION_LIMIT: usize = 3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded worker pool size. Default 1.
    pub worker_count: usize,
    /// Used when a session omits `timeout`. Default 10 minutes.
    pub default_session_timeout: Duration,
    /// Progress channel capacity before sends are dropped. Default 256.
    pub progress_channel_capacity: usize,
    /// Delay between phase retries. Spec-mandated default of 5 seconds;
    /// exposed as a field (rather than hardcoded) purely so tests can shrink
    /// it — production callers should never change it.
    pub phase_retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            default_session_timeout: Duration::from_secs(600),
            progress_channel_capacity: 256,
            phase_retry_delay: PHASE_RETRY_DELAY,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ENGINE_WORKER_COUNT") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    cfg.worker_count = n;
                } else {
                    tracing::warn!("ENGINE_WORKER_COUNT must be > 0, ignoring '{v}'");
                }
            } else {
                tracing::warn!("invalid ENGINE_WORKER_COUNT '{v}', keeping default");
            }
        }

        if let Ok(v) = std::env::var("ENGINE_DEFAULT_TIMEOUT_SECS") {
            match v.parse::<u64>() {
                Ok(secs) => cfg.default_session_timeout = Duration::from_secs(secs),
                Err(_) => tracing::warn!("invalid ENGINE_DEFAULT_TIMEOUT_SECS '{v}', keeping default"),
            }
        }

        if let Ok(v) = std::env::var("ENGINE_PROGRESS_CAPACITY") {
            match v.parse::<usize>() {
                Ok(n) => cfg.progress_channel_capacity = n,
                Err(_) => tracing::warn!("invalid ENGINE_PROGRESS_CAPACITY '{v}', keeping default"),
            }
        }

        cfg
    }

    /// A config tuned for fast unit/integration tests: no worker-pool or
    /// timeout defaults change, but the retry delay collapses to zero so a
    /// retry scenario doesn't cost wall-clock seconds.
    pub fn for_testing() -> Self {
        Self {
            phase_retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Process-wide default, lazily constructed from the environment on first
/// access. Callers that want a non-global config should use
/// `EngineConfig::from_env()` or construct one directly.
pub static CONFIG: Lazy<EngineConfig> = Lazy::new(EngineConfig::from_env);
