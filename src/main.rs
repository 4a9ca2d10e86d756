// src/main.rs
// Thin CLI entry point: load a Plan document, wire a Runner, print progress.

use clap::Parser;
use schemaflow::config::EngineConfig;
use schemaflow::functions::FunctionRegistry;
use schemaflow::model::{ModelClient, NullModelClient};
use schemaflow::plan::Plan;
use schemaflow::progress::Action;
use schemaflow::resource::{FileResourceLoader, ResourceLoader};
use schemaflow::Runner;
use std::path::PathBuf;
use std::sync::Arc;

/// Dependency-ordered structured extraction engine
#[derive(Parser, Debug)]
#[command(name = "schemaflow")]
#[command(version)]
#[command(about = "Runs a Plan document against a model, merging results into a single JSON value", long_about = None)]
struct CliArgs {
    /// Path to the Plan document (YAML or JSON, chosen by extension)
    plan: PathBuf,

    /// JSON object of input params, as a literal string (default: `{}`)
    #[arg(long, default_value = "{}")]
    params: String,

    /// Directory resources are loaded relative to
    #[arg(long, default_value = ".")]
    resource_root: PathBuf,

    /// Initialize the accumulator as an open map rather than a fixed struct
    #[arg(long)]
    accumulator_is_map: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    let config = EngineConfig::from_env();

    let plan = Plan::load(&args.plan)?;
    let params: serde_json::Value = serde_json::from_str(&args.params)?;

    // A real provider-specific client is an external collaborator (§2); this
    // binary wires the test double so the engine itself can be exercised
    // end-to-end without a live model.
    let model_prototype: Arc<dyn ModelClient> = Arc::new(NullModelClient::new(vec![]));
    let resource_loader: Arc<dyn ResourceLoader> = Arc::new(FileResourceLoader::new(args.resource_root));

    let runner = Runner::new(FunctionRegistry::new(), resource_loader, model_prototype);

    let (outcome, mut progress_rx) = runner
        .run(
            &plan,
            params,
            args.accumulator_is_map,
            config.worker_count,
            config.default_session_timeout,
            config.phase_retry_delay,
            config.progress_channel_capacity,
        )
        .await?;

    while let Ok(event) = progress_rx.try_recv() {
        match event.action {
            Action::Start => println!("[start] session={} phase={:?}", event.session, event.phase),
            Action::End => println!("[end]   session={} phase={:?}", event.session, event.phase),
            Action::Error => println!(
                "[error] session={} phase={:?}: {}",
                event.session,
                event.phase,
                event.error.as_deref().unwrap_or("unknown")
            ),
        }
    }

    println!("{}", serde_json::to_string_pretty(&outcome.accumulator)?);

    let failures: Vec<_> = outcome
        .statuses
        .iter()
        .filter(|(_, status)| status.is_terminal_negative())
        .collect();
    if !failures.is_empty() {
        for (name, status) in &failures {
            eprintln!("session '{name}' did not finish: {status:?}");
        }
        std::process::exit(1);
    }

    Ok(())
}
