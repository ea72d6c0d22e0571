//! Error types for assetpipe
//!
//! Uses `miette` for pretty error reporting with codes and help text.
//! Configuration problems abort before any task runs; transform failures are
//! recorded per file as [`TransformError`] and only surface as
//! [`AssetError::TaskFailed`] once a task has finished.

use miette::Diagnostic;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for assetpipe operations
#[derive(Error, Diagnostic, Debug)]
pub enum AssetError {
    #[error("Configuration file not found")]
    #[diagnostic(
        code(assetpipe::config::not_found),
        help("Create an assetpipe.toml with `assetpipe init`, or drop --config to use the defaults")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse configuration {}", path.display())]
    #[diagnostic(code(assetpipe::config::parse))]
    ConfigParse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Invalid glob pattern '{pattern}'")]
    #[diagnostic(
        code(assetpipe::config::glob),
        help("Negate a pattern with a leading '!'; '*' stays inside one directory, '**' crosses them")
    )]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Task '{name}' not found")]
    #[diagnostic(
        code(assetpipe::task::not_found),
        help("Run `assetpipe list` to see available tasks")
    )]
    TaskNotFound { name: String, available: Vec<String> },

    #[error("Task '{name}' is defined more than once")]
    #[diagnostic(code(assetpipe::task::duplicate))]
    DuplicateTask { name: String },

    #[error("Circular dependency detected: {cycle}")]
    #[diagnostic(
        code(assetpipe::task::cycle),
        help("Check the 'depends' field in your task definitions")
    )]
    CyclicDependency { cycle: String },

    #[error("Invalid task configuration for '{task}': {reason}")]
    #[diagnostic(code(assetpipe::config::invalid_task))]
    InvalidTask { task: String, reason: String },

    #[error("Task '{task}' failed with {} error(s)", errors.len())]
    #[diagnostic(code(assetpipe::task::failed))]
    TaskFailed {
        task: String,
        #[related]
        errors: Vec<TransformError>,
    },

    #[error("{} task(s) failed: {}", tasks.len(), tasks.join(", "))]
    #[diagnostic(code(assetpipe::run::failed))]
    RunFailed { tasks: Vec<String> },

    #[error("I/O error")]
    #[diagnostic(code(assetpipe::io))]
    Io(#[from] std::io::Error),

    #[error("Watch error")]
    #[diagnostic(
        code(assetpipe::watch),
        help("Watch mode needs read access to the source directory")
    )]
    Watch {
        #[source]
        source: notify::Error,
    },

    #[error("Dev server failed to start on port {port}: {message}")]
    #[diagnostic(code(assetpipe::serve), help("Pick another port in [serve] or stop the other server"))]
    Serve { port: u16, message: String },
}

impl AssetError {
    pub(crate) fn invalid_glob(pattern: &str, source: globset::Error) -> Self {
        AssetError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        }
    }

    /// True for errors raised while validating configuration, before any task runs.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AssetError::ConfigNotFound { .. }
                | AssetError::ConfigParse { .. }
                | AssetError::InvalidGlob { .. }
                | AssetError::TaskNotFound { .. }
                | AssetError::DuplicateTask { .. }
                | AssetError::CyclicDependency { .. }
                | AssetError::InvalidTask { .. }
        )
    }
}

/// A failure of one transform on one file.
///
/// Recorded by the pipeline; never aborts processing of sibling files.
#[derive(Diagnostic, Debug, Clone, PartialEq, Eq)]
#[diagnostic(code(assetpipe::transform))]
pub struct TransformError {
    pub plugin: String,
    pub source_path: PathBuf,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl TransformError {
    pub fn new(plugin: impl Into<String>, source_path: &Path, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            source_path: source_path.to_path_buf(),
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Attach a 1-based position.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source_path.display())?;
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, ":{line}:{column}")?,
            (Some(line), None) => write!(f, ":{line}")?,
            _ => {}
        }
        write!(f, " - {}", self.message)
    }
}

impl std::error::Error for TransformError {}

/// Result type alias for assetpipe operations
pub type Result<T> = std::result::Result<T, AssetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_error_display_with_position() {
        let err = TransformError::new("sass", Path::new("src/css/sass/main.scss"), "expected \"}\"")
            .at(3, 5);
        assert_eq!(
            err.to_string(),
            "src/css/sass/main.scss:3:5 - expected \"}\""
        );
    }

    #[test]
    fn test_transform_error_display_without_position() {
        let err = TransformError::new("concat", Path::new("a.js"), "boom");
        assert_eq!(err.to_string(), "a.js - boom");
    }

    #[test]
    fn test_config_error_classification() {
        let err = AssetError::CyclicDependency {
            cycle: "a -> b -> a".to_string(),
        };
        assert!(err.is_config_error());
        assert!(!AssetError::RunFailed { tasks: vec![] }.is_config_error());
    }
}
