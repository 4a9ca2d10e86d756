//! Model Client contract (collaborator). Generalized from
//! `src/advisory/provider.rs`'s `AdvisoryProvider` trait shape (`name`,
//! `async fn complete`, a clone-style constructor) to the spec's
//! `Ask/New/SetFunctions/SetSystemPrompt/RunFunction` contract.
//!
//! Provider-specific HTTP clients are external collaborators and out of
//! scope here; only the trait and a `NullModelClient` test double live in
//! this crate.

use crate::error::EngineResult;
use crate::functions::RegisteredFunction;
use crate::resource::LoadedResource;
use async_trait::async_trait;
use serde_json::Value;

/// A declared tool surfaced to the model for a given `Ask` call — either a
/// function reference, a collection reference, or an abstract capability
/// (built-in web search, etc).
#[derive(Debug, Clone)]
pub enum ToolRef {
    Function(String),
    Collection(String),
    Capability(String),
}

/// Stateful per-session conversation handle. Each session owns one,
/// obtained by cloning a read-only prototype via [`ModelClient::new_session`]
/// so the prototype's registered functions and system prompt are shared
/// read-only while each instance keeps its own message history — per §5's
/// "Model client instances" shared-resource note.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Clones a fresh, isolated conversation from this (read-only)
    /// prototype.
    fn new_session(&self) -> Box<dyn ModelClient>;

    fn set_functions(&mut self, functions: Vec<RegisteredFunction>);

    fn set_system_prompt(&mut self, prompt: String);

    /// Sends one conversational turn. When `schema` is `None`, returns free
    /// text (used for pre-prompts); when present, the response must be JSON
    /// conformant to it (enforced by the concrete provider, not this trait).
    async fn ask(
        &mut self,
        text: &str,
        schema: Option<&Value>,
        tools: &[ToolRef],
        resources: &[LoadedResource],
    ) -> EngineResult<Vec<u8>>;

    /// Runs a model-initiated function call against this client's bound
    /// functions (used by a provider's own internal tool loop, if any).
    async fn run_function(&mut self, name: &str, args: Value) -> EngineResult<Value>;
}

/// A deterministic test double: returns a fixed, caller-scripted sequence of
/// responses rather than calling a real provider. Grounded on the teacher's
/// pattern of programming against `Arc<dyn AdvisoryProvider>` so tests never
/// need a live model.
pub struct NullModelClient {
    scripted_responses: std::collections::VecDeque<Vec<u8>>,
    pub ask_count: usize,
}

impl NullModelClient {
    pub fn new(scripted_responses: Vec<Vec<u8>>) -> Self {
        Self {
            scripted_responses: scripted_responses.into(),
            ask_count: 0,
        }
    }
}

#[async_trait]
impl ModelClient for NullModelClient {
    fn new_session(&self) -> Box<dyn ModelClient> {
        Box::new(NullModelClient::new(self.scripted_responses.clone().into()))
    }

    fn set_functions(&mut self, _functions: Vec<RegisteredFunction>) {}

    fn set_system_prompt(&mut self, _prompt: String) {}

    async fn ask(
        &mut self,
        _text: &str,
        _schema: Option<&Value>,
        _tools: &[ToolRef],
        _resources: &[LoadedResource],
    ) -> EngineResult<Vec<u8>> {
        self.ask_count += 1;
        self.scripted_responses.pop_front().ok_or_else(|| {
            crate::error::EngineError::configuration("NullModelClient ran out of scripted responses")
        })
    }

    async fn run_function(&mut self, _name: &str, args: Value) -> EngineResult<Value> {
        Ok(args)
    }
}
