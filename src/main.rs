use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow, ensure};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use curly::config::{self as cfg, GlobalErrorBehavior};
use curly::executor::{ActionGroupRunner, DryRunExecutor, HttpExecutor};
use curly::utils::variables::Redactor;

/// Curly CLI
#[derive(Debug, Parser)]
#[command(
    name = curly::PKG_NAME,
    version = curly::PKG_VERSION,
    about = "Run an ordered batch of HTTP admin actions with per-action error policies"
)]
struct Args {
    /// Path to the JSON batch file
    #[arg(short = 'c', long = "config", default_value = "batch.json")]
    config: PathBuf,

    /// Enable dry-run mode (log requests instead of sending them)
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Set log level (e.g., trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Print the JSON Schema for the batch file and exit
    #[arg(long = "print-schema")]
    print_schema: bool,

    /// Bind a variable, overriding the batch file (NAME=VALUE, repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,

    /// Mark a bound variable as secure (repeatable)
    #[arg(long = "secure", value_name = "NAME")]
    secure: Vec<String>,

    /// Override the group error behavior (ignore|halt)
    #[arg(long = "error-behavior")]
    error_behavior: Option<GlobalErrorBehavior>,
}

fn parse_var(raw: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid --var '{}': expected NAME=VALUE", raw))?;
    ensure!(!name.trim().is_empty(), "Invalid --var '{}': empty name", raw);
    Ok((name.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    curly::init_tracing(args.log_level.as_deref());

    if args.print_schema {
        let schema = cfg::generate_schema();
        let json = serde_json::to_string_pretty(&schema)?;
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    info!(
        version = curly::PKG_VERSION,
        config = %args.config.display(),
        dry_run = args.dry_run,
        "Starting curly"
    );

    let mut batch = cfg::load_from_path_async(&args.config).await?;
    for raw in &args.vars {
        let (name, value) = parse_var(raw)?;
        batch.variables.insert(name, value);
    }
    for name in &args.secure {
        ensure!(
            batch.variables.contains_key(name),
            "--secure '{}' names a variable with no value",
            name
        );
        batch.secure_variables.insert(name.clone());
    }
    if let Some(behavior) = args.error_behavior {
        batch.error_behavior = behavior;
    }
    for name in cfg::unbound_variables(&batch) {
        warn!(variable = %name, "No value bound; actions using it will fail");
    }
    debug!(target: "curly", actions = batch.actions.len(), "Batch loaded");

    let cancel = CancellationToken::new();
    let mut run_config = batch.run_config();
    run_config.cancel = cancel.clone();

    let executor: Arc<dyn HttpExecutor> = if args.dry_run {
        let redactor = Redactor::new(&run_config.variables, &run_config.secure_variables);
        Arc::new(DryRunExecutor::new(redactor))
    } else {
        Arc::new(
            batch
                .client_factory()
                .build()
                .context("Failed to build HTTP client")?,
        )
    };

    let runner = ActionGroupRunner::new(batch.name.clone(), batch.actions, run_config, executor)?;

    // Progress: log each result as it lands.
    let mut progress = runner.result().subscribe();
    tokio::spawn(async move {
        let mut seen = 0;
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            for result in snapshot.results().iter().skip(seen) {
                info!(target: "curly::progress", "{result}");
            }
            seen = snapshot.results().len();
            if snapshot.is_finished() {
                break;
            }
        }
    });

    let mut handle = runner.spawn();
    let snapshot = tokio::select! {
        joined = &mut handle => joined.context("Runner task failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping after the current action");
            cancel.cancel();
            handle.await.context("Runner task failed")?
        }
    };

    print!("{snapshot}");
    Ok(if snapshot.completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
