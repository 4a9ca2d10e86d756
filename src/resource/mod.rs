//! Resource loader contract (collaborator): `Load(identifier, params) →
//! {identifier, mediaType, bytes, structured?}`. Media type is inferred from
//! the identifier extension by default; loaders may be composed.
//!
//! Grounded on §3/§6's Resource data model; loader-composition idiom follows
//! the teacher's `backend/src/file_system` directory conventions.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Where a resource's content is routed once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Uploaded to the model alongside the phase-0 call.
    Model,
    /// Bound into `vars` under the descriptor's `var` name.
    Vars,
    /// Inlined as text into a pre-prompt/prompt.
    Prompt,
}

#[derive(Debug, Clone)]
pub struct LoadedResource {
    pub identifier: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
    pub structured: Option<Value>,
    pub destination: Destination,
}

#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(&self, identifier: &str, params: &Value) -> EngineResult<LoadedResource>;
}

/// Infers a media type from a file extension, the default used by
/// loaders that don't receive one explicitly.
pub fn infer_media_type(identifier: &str) -> String {
    match Path::new(identifier)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
    {
        Some(ext) if ext == "json" => "application/json".to_string(),
        Some(ext) if ext == "yaml" || ext == "yml" => "application/yaml".to_string(),
        Some(ext) if ext == "txt" || ext == "md" => "text/plain".to_string(),
        Some(ext) if ext == "png" => "image/png".to_string(),
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg".to_string(),
        Some(ext) if ext == "pdf" => "application/pdf".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

/// Loads a resource from the local filesystem. `params.destination` selects
/// the [`Destination`] (default `Prompt`); `params.var` names the `vars`
/// binding when the destination is `Vars`.
pub struct FileResourceLoader {
    pub root: std::path::PathBuf,
}

impl FileResourceLoader {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ResourceLoader for FileResourceLoader {
    async fn load(&self, identifier: &str, params: &Value) -> EngineResult<LoadedResource> {
        let path = self.root.join(identifier);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            EngineError::configuration(format!("failed to load resource '{identifier}': {e}"))
        })?;
        let media_type = infer_media_type(identifier);
        let destination = destination_from_params(params);
        Ok(LoadedResource {
            identifier: identifier.to_string(),
            media_type,
            bytes,
            structured: None,
            destination,
        })
    }
}

/// An in-memory loader for tests and embedded resources.
#[derive(Default)]
pub struct MemoryResourceLoader {
    entries: HashMap<String, (String, Vec<u8>)>,
}

impl MemoryResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identifier: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(identifier.into(), (media_type.into(), bytes));
    }
}

#[async_trait]
impl ResourceLoader for MemoryResourceLoader {
    async fn load(&self, identifier: &str, params: &Value) -> EngineResult<LoadedResource> {
        let (media_type, bytes) = self.entries.get(identifier).cloned().ok_or_else(|| {
            EngineError::configuration(format!("unknown in-memory resource '{identifier}'"))
        })?;
        Ok(LoadedResource {
            identifier: identifier.to_string(),
            media_type,
            bytes,
            structured: None,
            destination: destination_from_params(params),
        })
    }
}

/// Dispatches to one of several composed loaders by a `source` param,
/// falling back to the first loader that recognizes the identifier.
#[derive(Default)]
pub struct DispatchingResourceLoader {
    loaders: Vec<Box<dyn ResourceLoader>>,
}

impl DispatchingResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loader(mut self, loader: Box<dyn ResourceLoader>) -> Self {
        self.loaders.push(loader);
        self
    }
}

#[async_trait]
impl ResourceLoader for DispatchingResourceLoader {
    async fn load(&self, identifier: &str, params: &Value) -> EngineResult<LoadedResource> {
        let mut last_err = None;
        for loader in &self.loaders {
            match loader.load(identifier, params).await {
                Ok(resource) => return Ok(resource),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            EngineError::configuration(format!("no loader could resolve '{identifier}'"))
        }))
    }
}

fn destination_from_params(params: &Value) -> Destination {
    match params.get("destination").and_then(Value::as_str) {
        Some("model") => Destination::Model,
        Some("vars") => Destination::Vars,
        _ => Destination::Prompt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_media_type_from_extension() {
        assert_eq!(infer_media_type("report.pdf"), "application/pdf");
        assert_eq!(infer_media_type("notes.md"), "text/plain");
        assert_eq!(infer_media_type("data.unknown"), "application/octet-stream");
    }

    #[tokio::test]
    async fn memory_loader_returns_registered_bytes() {
        let mut loader = MemoryResourceLoader::new();
        loader.insert("greeting.txt", "text/plain", b"hello".to_vec());
        let resource = loader.load("greeting.txt", &serde_json::json!({})).await.unwrap();
        assert_eq!(resource.bytes, b"hello");
        assert_eq!(resource.destination, Destination::Prompt);
    }

    #[tokio::test]
    async fn memory_loader_errors_on_unknown_identifier() {
        let loader = MemoryResourceLoader::new();
        assert!(loader.load("missing.txt", &serde_json::json!({})).await.is_err());
    }

    #[tokio::test]
    async fn dispatching_loader_falls_through_to_next_loader() {
        let mut memory = MemoryResourceLoader::new();
        memory.insert("b.txt", "text/plain", b"b".to_vec());
        let dispatcher = DispatchingResourceLoader::new()
            .with_loader(Box::new(MemoryResourceLoader::new()))
            .with_loader(Box::new(memory));
        let resource = dispatcher.load("b.txt", &serde_json::json!({})).await.unwrap();
        assert_eq!(resource.bytes, b"b");
    }

    #[tokio::test]
    async fn destination_param_selects_vars() {
        let mut loader = MemoryResourceLoader::new();
        loader.insert("x.txt", "text/plain", b"x".to_vec());
        let resource = loader
            .load("x.txt", &serde_json::json!({"destination": "vars"}))
            .await
            .unwrap();
        assert_eq!(resource.destination, Destination::Vars);
    }
}
