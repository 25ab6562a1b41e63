//! Typed error hierarchy for the issueflow orchestrator.
//!
//! A single enum covers every component so a pipeline can propagate one
//! error type end to end:
//! - infrastructure failures: environment, configuration, subprocesses, I/O
//! - parameter store failures (`ParametersEmpty`, `ParameterNotFound`, `ParameterStore`)
//! - issue tracker failures (`GitHubGraphQl`, `IssueNotFound`, `GitHub`)
//! - sandbox resource failures (git, cloud profile, database, container)

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;

/// Errors raised by issueflow components and pipelines.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Missing required environment variable {name}: {hint}")]
    MissingEnv { name: &'static str, hint: &'static str },

    #[error("Invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("`{command}` timed out after {secs}s")]
    CommandTimedOut { command: String, secs: u64 },

    #[error("No parameters found under {path}")]
    ParametersEmpty { path: String },

    #[error("Required parameter {key} not found under {path}")]
    ParameterNotFound { key: String, path: String },

    #[error("Parameter store request for {path} failed: {message}")]
    ParameterStore { path: String, message: String },

    #[error("GitHub GraphQL operation '{operation}' failed (expected {expected}): {message}")]
    GitHubGraphQl {
        operation: &'static str,
        expected: &'static str,
        message: String,
    },

    #[error("No issue available: {0}")]
    IssueNotFound(String),

    #[error("GitHub CLI error: {0}")]
    GitHub(String),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("AWS profile configuration error: {0}")]
    AwsProfileConfig(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Step '{step}' failed: {message}")]
    Step { step: &'static str, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkflowError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stderr of a failed subprocess, or the display form of any other error.
    ///
    /// Components use this when re-wrapping a runner failure into their own
    /// domain variant, so the message stays short.
    pub(crate) fn detail(&self) -> String {
        match self {
            Self::CommandFailed { stderr, .. } if !stderr.is_empty() => stderr.clone(),
            other => other.to_string(),
        }
    }
}
