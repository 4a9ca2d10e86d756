//! Crate-wide error type. One variant per error kind in the error handling
//! design: configuration, dependency-unsolvable, phase failure, timeout,
//! panic, and transformer/function error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("dependency unsolvable for session '{session}': {reason}")]
    DependencyUnsolvable { session: String, reason: String },

    #[error("phase {phase} of session '{session}' failed: {source}")]
    PhaseFailure {
        session: String,
        phase: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("session '{session}' timed out")]
    Timeout { session: String },

    #[error("session '{session}' panicked: {message}")]
    Panic { session: String, message: String },

    #[error("transformer '{name}' failed: {source}")]
    Transformer {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("schema error: {0}")]
    Schema(String),

    #[error("merge error: {0}")]
    Merge(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn dependency_unsolvable(session: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyUnsolvable {
            session: session.into(),
            reason: reason.into(),
        }
    }

    pub fn phase_failure(
        session: impl Into<String>,
        phase: usize,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::PhaseFailure {
            session: session.into(),
            phase,
            source: source.into(),
        }
    }

    pub fn timeout(session: impl Into<String>) -> Self {
        Self::Timeout {
            session: session.into(),
        }
    }

    pub fn panic(session: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Panic {
            session: session.into(),
            message: message.into(),
        }
    }

    pub fn transformer(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Transformer {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn merge(msg: impl Into<String>) -> Self {
        Self::Merge(msg.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
