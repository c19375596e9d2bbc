mod analysis;
mod cli;
mod config;
mod errors;
mod llm_client;
mod models;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Local;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::pipeline::{AnalysisPipeline, PipelineOptions};
use crate::cli::{Args, LogLevel};
use crate::config::Config;
use crate::errors::AppError;
use crate::llm_client::{LlmClient, NullSink, StreamSink, TerminalSink};
use crate::models::Manuscript;
use crate::report::{render_report, report_file_name, write_report};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            e.downcast_ref::<AppError>()
                .map(AppError::exit_code)
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}

async fn run(args: Args) -> Result<PathBuf> {
    // Pre-flight: nothing below talks to the model until all of this passed
    let settings = args.validate().map_err(AppError::from)?;
    init_tracing(settings.log_level)?;

    info!("Starting critic v{}", env!("CARGO_PKG_VERSION"));
    info!("Manuscript: {}", settings.input.display());
    info!("Reports go to: {}", settings.output_dir.display());

    let mut config = Config::from_env().map_err(AppError::from)?;
    if let Some(model) = settings.model.clone() {
        config.model = model;
    }

    let manuscript = Manuscript::load(&settings.input).await?;

    // Live echo only makes sense when one call streams at a time
    let sink: Arc<dyn StreamSink> = match (settings.call_options.stream, settings.concurrency) {
        (true, 1) => Arc::new(TerminalSink),
        (true, _) => {
            warn!("Concurrency > 1: streamed text is not echoed to the terminal");
            Arc::new(NullSink)
        }
        (false, _) => Arc::new(NullSink),
    };

    let llm = LlmClient::new(&config, settings.call_options.clone(), sink).map_err(AppError::from)?;
    info!(
        "LLM client initialized (model: {}, endpoint: {})",
        llm.model(),
        config.base_url
    );

    let pipeline = AnalysisPipeline::new(
        &llm,
        PipelineOptions {
            magazine: settings.magazine.clone(),
            passes: settings.passes.clone(),
            concurrency: settings.concurrency,
        },
    );

    let analysis = tokio::select! {
        analysis = pipeline.run(&manuscript) => analysis,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning in-flight model calls");
            return Err(AppError::Cancelled.into());
        }
    };

    let generated_at = Local::now().naive_local();
    let report = render_report(&manuscript, &analysis, &settings.magazine, generated_at);
    let file_name = report_file_name(manuscript.title(), generated_at);
    let path = write_report(&settings.output_dir, &file_name, &report).await?;

    Ok(path)
}

/// Structured logging to stderr; stdout carries the streamed model text.
/// `RUST_LOG`, when set, takes precedence over `--log-level`.
fn init_tracing(level: LogLevel) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), level.as_filter()))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))
}
