//! Paperflow CLI
//!
//! Validates and ingests research documents from the local file system.

mod commands;
mod local;
mod output;

use clap::{Parser, Subcommand};
use colored::Colorize;
use paperflow_observability::{init_tracing, TracingConfig};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(
    name = "paperflow",
    author = "Paperflow Team",
    version,
    about = "Paperflow - batch ingestion of research documents",
    long_about = "Validate a set of documents, upload them, extract their metadata\n\
                  and analyse their content under a bounded number of workers."
)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "PAPERFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log filter directives used when RUST_LOG is not set
    #[arg(long, global = true, env = "PAPERFLOW_LOG", default_value = "warn")]
    log_level: String,

    /// Print error causes and span timings
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, upload and analyse documents
    Ingest {
        /// Files or directories to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Project the completed documents are filed under
        #[arg(short, long, env = "PAPERFLOW_PROJECT")]
        project: String,

        /// Maximum number of documents processed at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Directory receiving uploaded files and the project catalog
        #[arg(short, long, default_value = "paperflow-out")]
        output_dir: PathBuf,
    },

    /// Check documents against the admission rules without uploading them
    Validate {
        /// Files or directories to check
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let tracing_config = TracingConfig::default()
        .with_service_name("paperflow")
        .with_log_level(&cli.log_level)
        .with_span_events(cli.verbose)
        .with_colors(!cli.no_color);
    if let Err(e) = init_tracing(&tracing_config) {
        eprintln!("{}: {}", "Warning".yellow(), e);
    }

    let format = cli.format;
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Ingest {
            paths,
            project,
            concurrency,
            output_dir,
        } => {
            commands::ingest::run(
                &paths,
                &project,
                concurrency,
                &output_dir,
                config_path,
                format,
            )
            .await
        }
        Commands::Validate { paths } => commands::validate::run(&paths, config_path, format).await,
        Commands::Config(cmd) => commands::config::run(cmd, config_path, format),
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            if cli.verbose {
                for cause in e.chain().skip(1) {
                    eprintln!("{}: {}", "Caused by".yellow(), cause);
                }
            }
            ExitCode::FAILURE
        }
    }
}
