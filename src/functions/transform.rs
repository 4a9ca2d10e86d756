//! Ordered Transformers: declarative rewrites applied to a function's input
//! or output, or to a loaded resource. A strategy pattern (§9): one entry
//! selects which operator to apply via presence of a field
//! (`expr`/`jsonata`/`jmespath`/`code`).

use crate::error::{EngineError, EngineResult};
use crate::eval::expr::Evaluator;
use crate::scope::{Components, Scope};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    OnFunctionInput(String),
    OnFunctionOutput(String),
    OnResource(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreParser {
    Json,
    Csv,
}

/// Which operator a transformer entry runs, selected by which field was
/// present in the Plan document.
#[derive(Debug, Clone)]
pub enum Op {
    Expr(String),
    /// JSONata is served by the same `rhai`-backed expression evaluator as
    /// `Expr` (see `DESIGN.md`): no corpus crate or mature ecosystem crate
    /// implements JSONata, so this avoids depending on an immature one.
    Jsonata(String),
    Jmespath(String),
    Script(String),
}

pub struct Transformer {
    pub name: String,
    pub trigger: Trigger,
    pub op: Op,
    pub pre_parser: Option<PreParser>,
}

/// An ordered list of transformers; entries for a given trigger run in
/// declaration order, the output of one feeding the input of the next. A
/// transformer failing aborts the chain with that error.
#[derive(Default)]
pub struct TransformerChain {
    transformers: Vec<Transformer>,
    evaluator: Evaluator,
}

impl TransformerChain {
    pub fn new(transformers: Vec<Transformer>) -> Self {
        Self {
            transformers,
            evaluator: Evaluator::new(),
        }
    }

    pub fn apply_input(&self, function_name: &str, value: Value) -> EngineResult<Value> {
        self.apply(&Trigger::OnFunctionInput(function_name.to_string()), value)
    }

    pub fn apply_output(&self, function_name: &str, value: Value) -> EngineResult<Value> {
        self.apply(&Trigger::OnFunctionOutput(function_name.to_string()), value)
    }

    pub fn apply_resource(&self, resource_id: &str, value: Value) -> EngineResult<Value> {
        self.apply(&Trigger::OnResource(resource_id.to_string()), value)
    }

    fn apply(&self, trigger: &Trigger, mut value: Value) -> EngineResult<Value> {
        for transformer in self.transformers.iter().filter(|t| &t.trigger == trigger) {
            value = self.run_one(transformer, value).map_err(|source| {
                EngineError::transformer(transformer.name.clone(), source)
            })?;
        }
        Ok(value)
    }

    fn run_one(&self, transformer: &Transformer, value: Value) -> anyhow::Result<Value> {
        let value = match transformer.pre_parser {
            Some(PreParser::Json) => pre_parse_json(value)?,
            Some(PreParser::Csv) => pre_parse_csv(value)?,
            None => value,
        };

        match &transformer.op {
            Op::Expr(expr) | Op::Jsonata(expr) => self.run_expr(expr, value),
            Op::Script(script) => self.run_expr(script, value),
            Op::Jmespath(expr) => run_jmespath(expr, value),
        }
    }

    fn run_expr(&self, expr: &str, value: Value) -> anyhow::Result<Value> {
        let scope = Scope::new(Value::Null, Value::Null, Components::default()).with_it(value);
        self.evaluator
            .evaluate_generic(expr, &scope)
            .map_err(|e| anyhow::anyhow!(e))
    }
}

fn pre_parse_json(value: Value) -> anyhow::Result<Value> {
    let Value::String(s) = value else {
        return Ok(value);
    };
    Ok(serde_json::from_str(&s)?)
}

fn pre_parse_csv(value: Value) -> anyhow::Result<Value> {
    let Value::String(s) = value else {
        return Ok(value);
    };
    let mut reader = csv::ReaderBuilder::new().from_reader(s.as_bytes());
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = serde_json::Map::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), Value::String(field.to_string()));
        }
        rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
}

fn run_jmespath(expr: &str, value: Value) -> anyhow::Result<Value> {
    let expr = jmespath::compile(expr).map_err(|e| anyhow::anyhow!("invalid jmespath: {e}"))?;
    let searched = expr
        .search(&value)
        .map_err(|e| anyhow::anyhow!("jmespath search failed: {e}"))?;
    Ok(serde_json::to_value(&*searched)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expr_transformer_rewrites_value() {
        let chain = TransformerChain::new(vec![Transformer {
            name: "double".to_string(),
            trigger: Trigger::OnFunctionInput("list_files".to_string()),
            op: Op::Expr("it.count * 2".to_string()),
            pre_parser: None,
        }]);
        let out = chain
            .apply_input("list_files", json!({"count": 3}))
            .unwrap();
        assert_eq!(out, json!(6));
    }

    #[test]
    fn declaration_order_chains_output_to_input() {
        let chain = TransformerChain::new(vec![
            Transformer {
                name: "add_one".to_string(),
                trigger: Trigger::OnFunctionOutput("f".to_string()),
                op: Op::Expr("it + 1".to_string()),
                pre_parser: None,
            },
            Transformer {
                name: "times_two".to_string(),
                trigger: Trigger::OnFunctionOutput("f".to_string()),
                op: Op::Expr("it * 2".to_string()),
                pre_parser: None,
            },
        ]);
        let out = chain.apply_output("f", json!(1)).unwrap();
        assert_eq!(out, json!(4)); // (1 + 1) * 2
    }

    #[test]
    fn failing_transformer_aborts_chain() {
        let chain = TransformerChain::new(vec![Transformer {
            name: "broken".to_string(),
            trigger: Trigger::OnFunctionInput("f".to_string()),
            op: Op::Expr("this is not valid rhai +++".to_string()),
            pre_parser: None,
        }]);
        assert!(chain.apply_input("f", json!({})).is_err());
    }

    #[test]
    fn jmespath_transformer_projects_fields() {
        let chain = TransformerChain::new(vec![Transformer {
            name: "project".to_string(),
            trigger: Trigger::OnFunctionOutput("f".to_string()),
            op: Op::Jmespath("name".to_string()),
            pre_parser: None,
        }]);
        let out = chain
            .apply_output("f", json!({"name": "Ada", "age": 30}))
            .unwrap();
        assert_eq!(out, json!("Ada"));
    }

    #[test]
    fn csv_pre_parser_produces_array_of_objects() {
        let chain = TransformerChain::new(vec![Transformer {
            name: "passthrough".to_string(),
            trigger: Trigger::OnFunctionOutput("f".to_string()),
            op: Op::Expr("it".to_string()),
            pre_parser: Some(PreParser::Csv),
        }]);
        let out = chain
            .apply_output("f", json!("name,age\nAda,30\nGrace,40"))
            .unwrap();
        assert_eq!(
            out,
            json!([
                {"name": "Ada", "age": "30"},
                {"name": "Grace", "age": "40"}
            ])
        );
    }
}
