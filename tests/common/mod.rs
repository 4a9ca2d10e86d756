// Shared test doubles for the end-to-end scenario tests in this directory.
// Not a test file itself: included via `mod common;`, not picked up by cargo
// as its own integration-test binary (the `tests/common/` subdirectory
// convention).

use async_trait::async_trait;
use schemaflow::error::{EngineError, EngineResult};
use schemaflow::functions::RegisteredFunction;
use schemaflow::model::{ModelClient, ToolRef};
use schemaflow::resource::LoadedResource;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Answers every `ask` with whatever value the caller pre-registered for each
/// property name found in the phase-scoped schema — deterministic regardless
/// of which order concurrent sessions happen to be dispatched in, unlike a
/// single shared response queue.
#[derive(Clone)]
pub struct FieldMapClient {
    fields: Arc<HashMap<String, Value>>,
}

impl FieldMapClient {
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self { fields: Arc::new(fields) }
    }
}

#[async_trait]
impl ModelClient for FieldMapClient {
    fn new_session(&self) -> Box<dyn ModelClient> {
        Box::new(self.clone())
    }

    fn set_functions(&mut self, _functions: Vec<RegisteredFunction>) {}

    fn set_system_prompt(&mut self, _prompt: String) {}

    async fn ask(
        &mut self,
        _text: &str,
        schema: Option<&Value>,
        _tools: &[ToolRef],
        _resources: &[LoadedResource],
    ) -> EngineResult<Vec<u8>> {
        let mut obj = serde_json::Map::new();
        if let Some(props) = schema.and_then(|s| s.get("properties")).and_then(Value::as_object) {
            for key in props.keys() {
                if let Some(value) = self.fields.get(key) {
                    obj.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(serde_json::to_vec(&Value::Object(obj)).unwrap())
    }

    async fn run_function(&mut self, _name: &str, args: Value) -> EngineResult<Value> {
        Ok(args)
    }
}

/// Replays a fixed, ordered sequence of responses (shared across every
/// session clone, so only safe for single-session scenarios) and records
/// every prompt text it was asked, for scenarios that assert on prompt
/// construction.
#[derive(Clone)]
pub struct RecordingClient {
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl RecordingClient {
    pub fn new(responses: Vec<Vec<u8>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ModelClient for RecordingClient {
    fn new_session(&self) -> Box<dyn ModelClient> {
        Box::new(self.clone())
    }

    fn set_functions(&mut self, _functions: Vec<RegisteredFunction>) {}

    fn set_system_prompt(&mut self, _prompt: String) {}

    async fn ask(
        &mut self,
        text: &str,
        _schema: Option<&Value>,
        _tools: &[ToolRef],
        _resources: &[LoadedResource],
    ) -> EngineResult<Vec<u8>> {
        self.prompts.lock().expect("prompts mutex poisoned").push(text.to_string());
        self.responses
            .lock()
            .expect("responses mutex poisoned")
            .pop_front()
            .ok_or_else(|| EngineError::configuration("RecordingClient ran out of scripted responses"))
    }

    async fn run_function(&mut self, _name: &str, args: Value) -> EngineResult<Value> {
        Ok(args)
    }
}

/// A native function callable returning a fixed JSON value, for pre-call
/// scenarios.
pub struct FixedCallable(pub Value);

#[async_trait]
impl schemaflow::functions::Callable for FixedCallable {
    async fn call(&self, _args: Value) -> EngineResult<Value> {
        Ok(self.0.clone())
    }
}
