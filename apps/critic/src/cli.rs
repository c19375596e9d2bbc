//! Command-line interface and pre-flight validation.
//!
//! clap rejects unknown log levels and pass names while parsing (exit 2).
//! `Args::validate` then turns the arguments into `Settings` and is the only
//! place that touches the filesystem before the manuscript is read. Its
//! failures are `ConfigError`s, reported before any model call.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::analysis::passes::{AnalysisPass, PassSet};
use crate::errors::ConfigError;
use crate::llm_client::CallOptions;

pub const DEFAULT_MAGAZINE: &str = "科幻世界";
const SUPPORTED_EXTENSIONS: &[&str] = &["txt"];

/// 小说批改工具: submit a short story for a multi-pass editorial critique.
#[derive(Parser, Debug)]
#[command(name = "critic")]
#[command(about = "小说批改工具：读取小说文本，由大语言模型逐项点评并生成 markdown 报告")]
#[command(version)]
pub struct Args {
    /// Manuscript to analyse (plain text, first line is the title)
    pub input: PathBuf,

    /// Directory the report is written to (created if missing)
    #[arg(short, long, default_value = "reports")]
    pub output: PathBuf,

    /// Target publication; shapes the editor persona
    #[arg(short, long, default_value = DEFAULT_MAGAZINE)]
    pub magazine: String,

    /// Logging verbosity
    #[arg(short, long, value_enum, ignore_case = true, default_value = "info")]
    pub log_level: LogLevel,

    /// Comma-separated passes to run (default: all)
    #[arg(long, value_enum, ignore_case = true, value_delimiter = ',')]
    pub passes: Vec<AnalysisPass>,

    /// Maximum model calls in flight
    #[arg(short = 'j', long, default_value_t = 1)]
    pub concurrency: usize,

    /// Wait for whole replies instead of streaming them to the terminal
    #[arg(long)]
    pub no_stream: bool,

    /// Deadline for a single model call, in seconds (0 disables)
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Retries after a rate-limit, server or transport error
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Model identifier (overrides MODEL)
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`. tracing has no level
    /// above ERROR, so CRITICAL shares it.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// Validated run settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub magazine: String,
    pub log_level: LogLevel,
    pub passes: PassSet,
    pub concurrency: usize,
    pub call_options: CallOptions,
    pub model: Option<String>,
}

impl Args {
    /// Checks every argument and prepares the output directory.
    pub fn validate(self) -> Result<Settings, ConfigError> {
        let passes = PassSet::from_selection(&self.passes);
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        check_input(&self.input)?;
        prepare_output_dir(&self.output)?;

        Ok(Settings {
            input: self.input,
            output_dir: self.output,
            magazine: self.magazine,
            log_level: self.log_level,
            passes,
            concurrency: self.concurrency,
            call_options: CallOptions {
                stream: !self.no_stream,
                timeout: (self.timeout > 0).then(|| Duration::from_secs(self.timeout)),
                max_retries: self.max_retries,
            },
            model: self.model,
        })
    }
}

fn check_input(path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::InputNotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(ConfigError::InputNotFile(path.to_path_buf()));
    }
    let supported = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        });
    if !supported {
        return Err(ConfigError::UnsupportedExtension {
            path: path.to_path_buf(),
            supported: SUPPORTED_EXTENSIONS
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", "),
        });
    }
    Ok(())
}

fn prepare_output_dir(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        if !path.is_dir() {
            return Err(ConfigError::OutputNotDirectory(path.to_path_buf()));
        }
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|source| ConfigError::OutputNotCreatable {
        path: path.to_path_buf(),
        source,
    })
}
