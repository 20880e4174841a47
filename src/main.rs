// src/main.rs
mod dataset;
mod device;
mod error;
mod files;
mod hostexpr;
mod probe;
mod schema;
mod settings;
mod stack;
mod target;
mod telemetry;
mod template;
mod workflow;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dataset::DatasetSource;
use device::ShellDevice;
use settings::Settings;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use telemetry::{Telemetry, Uploader};
use tracing_subscriber::EnvFilter;
use url::Url;
use workflow::Workflow;

#[derive(Parser, Debug)]
#[command(name = "ztp-runner", version, about = "Zero-touch provisioning for switch stacks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision the device this runs on
    Run {
        /// Settings file (YAML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Syslog server for device messages
        #[arg(long)]
        syslog: Option<String>,
        /// URL of the JSON dataset
        #[arg(long)]
        data_url: Option<Url>,
        /// URL status snapshots are uploaded to
        #[arg(long)]
        log_url: Option<Url>,
        /// Verbose logging
        #[arg(long)]
        verbose: bool,
    },
    /// Check a dataset file and exit
    Validate {
        /// JSON dataset
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            syslog,
            data_url,
            log_url,
            verbose,
        } => {
            init_tracing(verbose);
            let mut settings = match config {
                Some(path) => Settings::load(&path)?,
                None => Settings::default(),
            };
            settings.syslog = syslog.or(settings.syslog);
            settings.data_url = data_url.or(settings.data_url);
            settings.log_url = log_url.or(settings.log_url);
            run(settings).await
        }
        Command::Validate { file } => {
            init_tracing(false);
            validate(&file)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(settings: Settings) -> Result<ExitCode> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.http_timeout))
        .build()
        .context("build HTTP client")?;

    let device = ShellDevice::new(settings.device);
    let dataset = DatasetSource::new(settings.data, settings.data_url, client.clone());
    let telemetry = Telemetry::new(settings.syslog, Uploader::new(settings.log_url, client));

    let outcome = Workflow::new(device, dataset, telemetry).run().await;
    tracing::debug!(?outcome, "run finished");
    Ok(outcome.exit_code())
}

fn validate(file: &Path) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let data: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", file.display()))?;
    match schema::parse(&data) {
        Ok(records) => {
            let defaults = records.iter().filter(|r| r.is_defaults()).count();
            println!(
                "{}: {} stack record(s), {} defaults record(s)",
                file.display(),
                records.len() - defaults,
                defaults
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}: {e}", file.display());
            Ok(ExitCode::FAILURE)
        }
    }
}
