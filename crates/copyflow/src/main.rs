//! Copyflow CLI
//!
//! Renders, expands and validates copy-job workflow documents.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use copyflow::{
    machine::{
        parse_machine, validate_machine, validate_task_policies, JobHandlers, JobTemplate,
        WorkflowDocument,
    },
    template::{expand, AnnotatedNode},
    AppConfig, AppError, OutputFormat, ResultExt,
};
use copyflow_tasks::RemoteResolver;

#[derive(Parser)]
#[command(name = "copyflow")]
#[command(version, about = "Copy job workflow documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (overrides COPYFLOW_OUTPUT_FORMAT)
    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the copy-job document with N replicated workers and print it
    Render {
        /// Number of copy workers (overrides COPYFLOW_POOL_SIZE)
        #[arg(short, long, allow_negative_numbers = true)]
        pool_size: Option<i64>,

        /// Token replaced by each worker's index (overrides COPYFLOW_REPLICA_TOKEN)
        #[arg(short, long)]
        token: Option<String>,
    },

    /// Validate a concrete JSON or YAML workflow document
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Expand an annotated JSON or YAML definition and print the result
    Expand {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// Initialize tracing/logging.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,copyflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()
        .log("loading configuration")
        .context("invalid COPYFLOW_* environment")?;
    let format = cli.format.unwrap_or(config.output_format);

    match cli.command {
        Commands::Render { pool_size, token } => {
            let pool_size = pool_size.unwrap_or(config.pool_size);
            let token = token.unwrap_or_else(|| config.replica_token.clone());
            render(&config, pool_size, &token, format)
        }
        Commands::Validate { file } => validate(&file),
        Commands::Expand { file } => expand_file(&file, format),
    }
}

fn render(
    config: &AppConfig,
    pool_size: i64,
    token: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let handlers = JobHandlers::remote(|task| config.resource_name(task));
    let template = JobTemplate::from_config(config, handlers);

    let definition = template.fan_out(pool_size, token)?;
    let concrete = expand(&definition).log("expanding job definition")?;
    let document = WorkflowDocument::from_concrete(&concrete)?;
    validate_machine(&document.machine)?;
    validate_task_policies(&document.machine)?;

    info!(
        pool_size,
        token,
        handlers = document.handlers.len(),
        "Rendered copy job"
    );
    println!("{}", serialize(&document.machine, format)?);
    Ok(())
}

fn validate(file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .map_err(AppError::from)
        .log(format!("reading {}", file.display()))?;
    let machine = parse_machine(&content).log(format!("validating {}", file.display()))?;
    validate_task_policies(&machine).log(format!("checking policies of {}", file.display()))?;

    println!(
        "{}: valid ({} states, start at '{}')",
        file.display(),
        machine.states.len(),
        machine.start_at
    );
    Ok(())
}

fn expand_file(file: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .map_err(AppError::from)
        .log(format!("reading {}", file.display()))?;
    let value: serde_json::Value = if content.trim_start().starts_with('{') {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };

    let annotated = AnnotatedNode::from_value(value, &RemoteResolver)?;
    let concrete = expand(&annotated).log(format!("expanding {}", file.display()))?;
    println!("{}", serialize(&concrete, format)?);
    Ok(())
}

fn serialize<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    })
}
