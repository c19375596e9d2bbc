use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

/// Pre-flight failures. Every variant aborts the run before any model call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("input file '{0}' does not exist, check the path")]
    InputNotFound(PathBuf),

    #[error("input path '{0}' is not a regular file")]
    InputNotFile(PathBuf),

    #[error("unsupported extension for '{path}', use one of: {supported}")]
    UnsupportedExtension { path: PathBuf, supported: String },

    #[error("output path '{0}' already exists but is not a directory")]
    OutputNotDirectory(PathBuf),

    #[error("could not create output directory '{path}': {source}")]
    OutputNotCreatable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("required environment variable '{0}' is not set")]
    MissingEnv(&'static str),

    #[error("could not read manuscript '{path}': {source}")]
    ManuscriptUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manuscript '{0}' has no title line")]
    EmptyManuscript(PathBuf),
}

/// Application-level error type.
/// `exit_code` maps each variant to the process status reported by `main`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP client setup failed: {0}")]
    ClientSetup(#[from] reqwest::Error),

    #[error("run cancelled before the report was written")]
    Cancelled,
}

impl AppError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.into(),
            source,
        }
    }

    /// Pre-flight problems exit with 2, runtime failures with 1, Ctrl-C with 130.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::Config(_) => ExitCode::from(2),
            AppError::Cancelled => ExitCode::from(130),
            AppError::Io { .. } | AppError::ClientSetup(_) => ExitCode::from(1),
        }
    }
}
