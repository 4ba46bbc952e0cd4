use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use executor_core::{
    ActionSpec, Executor, ExecutorConfig, FifoLockScheduler, FnAction, InMemoryCheckpointStore, PersisterFactory, RecordingPersister,
    WithinProcedure,
};
use serde_json::{json, Value};
use tracing::info;

#[derive(Parser)]
#[command(name = "executor")]
#[command(about = "Demo driver for the execution core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Override the configured log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single demo procedure to completion and print its result.
    Run {
        /// A number of no-op "spawn a follow-up job" steps to chain after
        /// the first action, to exercise the spawned-jobs path.
        #[arg(long, default_value_t = 0)]
        spawn: u32,
    },
    /// Print the resolved configuration and exit.
    Config,
}

fn demo_persister_factory() -> Arc<dyn PersisterFactory> {
    Arc::new(|| -> Box<dyn executor_core::Persister> { Box::new(RecordingPersister::new()) })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config = match &cli.config {
        Some(path) => ExecutorConfig::load(path.to_str().expect("config path must be valid utf-8"))?,
        None => ExecutorConfig::from_env()?,
    };

    match cli.command {
        Commands::Config => {
            println!("{:#?}", config);
            return Ok(());
        }
        Commands::Run { spawn } => {
            info!(?config, "starting demo executor");
            let auto_start = config.auto_start;
            let executor = Executor::new(
                Arc::new(FifoLockScheduler::new()),
                Arc::new(InMemoryCheckpointStore::new(true)),
                demo_persister_factory(),
                config,
            );
            if !auto_start {
                executor.start().await?;
            }

            let action = Arc::new(FnAction::new("executor-cli.chain_step", move |args, _kwargs| async move {
                let step = args[0].as_u64().unwrap_or(0);
                info!(step, "executing demo step");
                Ok(json!({ "step": step }))
            }));

            let spec = ActionSpec::new(action.clone() as Arc<dyn executor_core::Action>, "demo: chain step 0", vec![Value::from(0u64)], json!({}));
            let procedure = executor.enqueue_procedure(WithinProcedure::New, spec).await?;

            for step in 1..=spawn {
                let spec = ActionSpec::new(action.clone() as Arc<dyn executor_core::Action>, format!("demo: chain step {step}"), vec![Value::from(step as u64)], json!({}));
                executor.enqueue_procedure(WithinProcedure::New, spec).await?;
            }

            executor.wait_for_procedure(&procedure).await?;
            println!("procedure {} result: {}", procedure.uuid(), procedure.result().await);

            executor.shutdown().await?;
        }
    }

    Ok(())
}
