//! Plan document (YAML/JSON) → in-memory [`Plan`]. Grounded on §6's root
//! shape; parsed with `serde_yaml`/`serde_json` depending on file extension,
//! both deserializing into the same struct.

use crate::error::{EngineError, EngineResult};
use crate::functions::transform::{Op, PreParser, Transformer, Trigger};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDescriptor {
    pub identifier: String,
    #[serde(default)]
    pub params: Value,
    #[serde(rename = "in", default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub var: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencyDescriptor {
    pub session: Option<String>,
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Option<Value>,
    pub allowlist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreCallDescriptor {
    pub function: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default = "default_precall_destination")]
    pub destination: String,
}

fn default_precall_destination() -> String {
    "prompt".to_string()
}

fn default_attempts() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionDescriptor {
    pub prompt: String,
    #[serde(rename = "nextPhasePrompt", default)]
    pub next_phase_prompt: Option<String>,
    #[serde(rename = "prePrompt", default)]
    pub pre_prompt: Option<PrePromptField>,
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<DependencyDescriptor>,
    #[serde(default)]
    pub context: bool,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(rename = "iterateOn", default)]
    pub iterate_on: Option<String>,
    #[serde(default)]
    pub vars: Value,
    #[serde(rename = "preCalls", default)]
    pub pre_calls: Vec<PreCallDescriptor>,
}

/// `prePrompt` accepts either a single string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PrePromptField {
    Single(String),
    Many(Vec<String>),
}

impl PrePromptField {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            PrePromptField::Single(s) => vec![s],
            PrePromptField::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ParameterDescriptor {
    pub name: String,
    pub schema: Value,
    #[serde(rename = "looseType", default)]
    pub loose_type: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Components {
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    #[serde(default)]
    pub schemas: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransformerDescriptor {
    pub name: Option<String>,
    pub trigger: String,
    pub target: String,
    pub expr: Option<String>,
    pub jsonata: Option<String>,
    pub jmespath: Option<String>,
    pub code: Option<String>,
    pub parser: Option<String>,
}

impl TransformerDescriptor {
    fn into_transformer(self, index: usize) -> EngineResult<Transformer> {
        let trigger = match self.trigger.as_str() {
            "onFunctionInput" => Trigger::OnFunctionInput(self.target.clone()),
            "onFunctionOutput" => Trigger::OnFunctionOutput(self.target.clone()),
            "onResource" => Trigger::OnResource(self.target.clone()),
            other => {
                return Err(EngineError::configuration(format!(
                    "unknown transformer trigger '{other}'"
                )))
            }
        };

        let op = if let Some(expr) = self.expr {
            Op::Expr(expr)
        } else if let Some(jsonata) = self.jsonata {
            Op::Jsonata(jsonata)
        } else if let Some(jmespath) = self.jmespath {
            Op::Jmespath(jmespath)
        } else if let Some(code) = self.code {
            Op::Script(code)
        } else {
            return Err(EngineError::configuration(
                "transformer declares no expr/jsonata/jmespath/code operator",
            ));
        };

        let pre_parser = match self.parser.as_deref() {
            Some("json") => Some(PreParser::Json),
            Some("csv") => Some(PreParser::Csv),
            Some(other) => {
                return Err(EngineError::configuration(format!(
                    "unknown transformer parser '{other}'"
                )))
            }
            None => None,
        };

        Ok(Transformer {
            name: self.name.unwrap_or_else(|| format!("transformer#{index}")),
            trigger,
            op,
            pre_parser,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RequiredTool {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    pub schema: Value,
    pub sessions: HashMap<String, SessionDescriptor>,
    #[serde(default)]
    pub components: Components,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
    #[serde(default)]
    pub transformers: Vec<TransformerDescriptor>,
    #[serde(rename = "requiredTools", default)]
    pub required_tools: Vec<RequiredTool>,
    #[serde(rename = "systemPrompt", default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub vars: Value,
    #[serde(rename = "preCalls", default)]
    pub pre_calls: Vec<PreCallDescriptor>,
}

impl Plan {
    /// Parses a Plan document from a file, choosing YAML or JSON by
    /// extension.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Plan> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_json(&contents),
        }
    }

    pub fn from_yaml(contents: &str) -> EngineResult<Plan> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_json(contents: &str) -> EngineResult<Plan> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Validates configuration-level invariants: duplicate session names are
    /// impossible by construction (a map), but phase-0 existence, attempts
    /// ≥ 1, and transformer well-formedness are checked here, fatal at run
    /// start per §7.
    pub fn validate(&self) -> EngineResult<()> {
        for (name, session) in &self.sessions {
            if session.attempts < 1 {
                return Err(EngineError::configuration(format!(
                    "session '{name}' has attempts < 1"
                )));
            }
        }
        // Constructing the transformer chain eagerly surfaces malformed
        // transformer entries (missing operator, unknown trigger/parser).
        self.transformer_chain()?;
        Ok(())
    }

    pub fn transformer_chain(&self) -> EngineResult<Vec<Transformer>> {
        self.transformers
            .clone()
            .into_iter()
            .enumerate()
            .map(|(i, t)| t.into_transformer(i))
            .collect()
    }
}
