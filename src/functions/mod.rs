//! Function Registry: a name-indexed set of callable tools (native
//! functions or remote tool-server functions exposed as local callables).
//!
//! Grounded on `backend/src/agents/registry.rs`'s `RwLock<HashMap<_, _>>`
//! shape (`register`/`get`/`list`/`count` accessors, tracing on load).

pub mod transform;

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A callable tool: native Rust code or a remote tool-server function
/// exposed as a local callable.
#[async_trait]
pub trait Callable: Send + Sync {
    async fn call(&self, args: Value) -> EngineResult<Value>;
}

/// A function registered by name, with its logical collection and
/// declared input schema, matching §4.4's function shape.
#[derive(Clone)]
pub struct RegisteredFunction {
    pub name: String,
    pub collection: String,
    pub description: String,
    pub input_schema: Value,
    pub callable: Arc<dyn Callable>,
}

#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, RegisteredFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, function: RegisteredFunction) {
        tracing::info!(name = %function.name, collection = %function.collection, "registering function");
        self.functions
            .write()
            .await
            .insert(function.name.clone(), function);
    }

    pub async fn get(&self, name: &str) -> Option<RegisteredFunction> {
        self.functions.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<RegisteredFunction> {
        self.functions.read().await.values().cloned().collect()
    }

    pub async fn list_collection(&self, collection: &str) -> Vec<RegisteredFunction> {
        self.functions
            .read()
            .await
            .values()
            .filter(|f| f.collection == collection)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.functions.read().await.len()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.functions.read().await.contains_key(name)
    }

    /// Pre-flight check for a Plan's `requiredTools` declaration: fails at
    /// run start if any named tool is missing.
    pub async fn check_required(&self, required: &[String]) -> EngineResult<()> {
        let functions = self.functions.read().await;
        let missing: Vec<&str> = required
            .iter()
            .filter(|name| !functions.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::configuration(format!(
                "required tools missing from registry: {}",
                missing.join(", ")
            )))
        }
    }

    /// Invokes a registered function per §4.4's five-step protocol: clone
    /// args, apply input transformers, validate a map, call, apply output
    /// transformers. Progress-logs before and after.
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        transformers: &transform::TransformerChain,
    ) -> EngineResult<Value> {
        let function = self
            .get(name)
            .await
            .ok_or_else(|| EngineError::configuration(format!("unknown function '{name}'")))?;

        tracing::info!(function = %name, "invoking function");

        let transformed_args = transformers.apply_input(name, args.clone())?;

        if !transformed_args.is_object() {
            return Err(EngineError::transformer(
                name,
                anyhow::anyhow!("input transformer result is not a JSON object"),
            ));
        }

        let result = function.callable.call(transformed_args).await?;
        let transformed_result = transformers.apply_output(name, result)?;

        tracing::info!(function = %name, "function invocation complete");
        Ok(transformed_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Callable for Echo {
        async fn call(&self, args: Value) -> EngineResult<Value> {
            Ok(args)
        }
    }

    fn echo_fn(name: &str) -> RegisteredFunction {
        RegisteredFunction {
            name: name.to_string(),
            collection: "test".to_string(),
            description: "echoes its args".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
            callable: Arc::new(Echo),
        }
    }

    #[tokio::test]
    async fn register_and_get_round_trips() {
        let registry = FunctionRegistry::new();
        registry.register(echo_fn("list_files")).await;
        assert!(registry.get("list_files").await.is_some());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn check_required_fails_on_missing_tool() {
        let registry = FunctionRegistry::new();
        registry.register(echo_fn("list_files")).await;
        assert!(registry
            .check_required(&["list_files".to_string()])
            .await
            .is_ok());
        assert!(registry
            .check_required(&["missing_tool".to_string()])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn invoke_runs_through_registered_callable() {
        let registry = FunctionRegistry::new();
        registry.register(echo_fn("list_files")).await;
        let transformers = transform::TransformerChain::default();
        let result = registry
            .invoke("list_files", serde_json::json!({"dir": "./x"}), &transformers)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"dir": "./x"}));
    }
}
