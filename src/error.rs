//! Error taxonomy shared by every layer.
//!
//! Library operations return [`AppResult`]. The CLI wraps these in `anyhow`
//! for context; the HTTP server maps each variant to a status code and a
//! machine-readable error code (see [`AppError::code`]).

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the file processor, store, form generator and workflow.
#[derive(Debug, Error)]
pub enum AppError {
    /// A dataset line is not a JSON object. `line` is 1-based.
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Missing or malformed user input. Blocks the transition, changes nothing.
    #[error("{0}")]
    Validation(String),

    /// Any SQLite failure. The enclosing transaction has been rolled back.
    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("stored data is malformed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A referenced image or PDF does not exist on disk.
    #[error("file not found: {}", path.display())]
    MissingResource { path: PathBuf },

    /// A task, annotation or user lookup came back empty.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("I/O error for path '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export failed: {0}")]
    Export(String),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.into(),
            source,
        }
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Parse { .. } => "parse_error",
            AppError::Validation(_) => "validation_error",
            AppError::Persistence(_) | AppError::Encoding(_) => "persistence_error",
            AppError::MissingResource { .. } => "missing_resource",
            AppError::NotFound { .. } => "not_found",
            AppError::Io { .. } | AppError::Export(_) => "internal",
        }
    }
}
