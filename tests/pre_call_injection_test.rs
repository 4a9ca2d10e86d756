// Pre-call prompt injection (§8 scenario 6): a session's `preCalls` entry
// with the default "prompt" destination splices a `=== CALL: ... ===` block
// (the function name, its raw args, and the pretty-printed result) in front
// of the rendered prompt for the first phase only.

mod common;

use common::{FixedCallable, RecordingClient};
use schemaflow::functions::{FunctionRegistry, RegisteredFunction};
use schemaflow::model::ModelClient;
use schemaflow::resource::MemoryResourceLoader;
use schemaflow::{Plan, Runner};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PLAN_YAML: &str = r#"
schema:
  type: object
  properties:
    p1: { type: string, x-session: S, x-phase: 0 }
sessions:
  S:
    prompt: "extract p1"
    attempts: 1
    preCalls:
      - function: list_files
        args:
          dir: "./x"
"#;

#[tokio::test]
async fn pre_call_result_is_spliced_in_front_of_the_first_phase_prompt() {
    let plan = Plan::from_yaml(PLAN_YAML).unwrap();

    let client = RecordingClient::new(vec![br#"{"p1": "done"}"#.to_vec()]);
    let prompts = Arc::clone(&client.prompts);
    let client: Arc<dyn ModelClient> = Arc::new(client);

    let registry = FunctionRegistry::new();
    registry
        .register(RegisteredFunction {
            name: "list_files".to_string(),
            collection: "fs".to_string(),
            description: "lists files in a directory".to_string(),
            input_schema: json!({"type": "object"}),
            callable: Arc::new(FixedCallable(json!(["a", "b"]))),
        })
        .await;

    let runner = Runner::new(registry, Arc::new(MemoryResourceLoader::new()), client);

    let (outcome, _rx) = runner
        .run(&plan, json!({}), true, 1, Duration::from_secs(5), Duration::ZERO, 64)
        .await
        .unwrap();

    assert_eq!(outcome.accumulator, json!({"p1": "done"}));

    let prompts = prompts.lock().unwrap();
    let prompt = &prompts[0];
    assert!(prompt.starts_with("=== CALL: list_files"));
    assert!(prompt.contains("\"a\""));
    assert!(prompt.contains("\"b\""));
    assert!(prompt.trim_end().ends_with("extract p1"));
}
