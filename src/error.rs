//! Error taxonomy shared by every backend.
//!
//! Errors fall into three categories. Configuration and integrity errors always
//! propagate to the caller. Backend errors are recovered at the operation boundary
//! (see [`Recover`]) and projected onto the operation's "nothing happened" value.

use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Backend,
    Integrity,
}

#[derive(Debug, Error)]
pub enum Error {
    // --- configuration ---
    #[error("no descriptor provider registered for kind {0}")]
    UnknownDescriptorKind(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("type {0} has no mapping on backend {1}")]
    UnmappedType(String, &'static str),

    #[error("missing required parameter '{0}'")]
    MissingParameter(String),

    #[error("invalid value '{value}' for parameter '{name}'")]
    InvalidParameter { name: String, value: String },

    #[error("attribute '{attribute}' is not declared by field '{field}'")]
    UnknownAttribute { field: String, attribute: String },

    #[error("type mismatch on '{attribute}': expected {expected}, found {found}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        found: String,
    },

    #[error("layout violation: {0}")]
    Layout(String),

    #[error("descriptor {0} has no owning retrievable and cannot be persisted")]
    OwnerlessDescriptor(uuid::Uuid),

    #[error("cached instance is bound to field '{bound}' but '{requested}' was requested")]
    FieldMismatch { requested: String, bound: String },

    #[error("schema '{requested}' does not match connection schema '{connected}'")]
    SchemaMismatch { requested: String, connected: String },

    // --- backend ---
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("postgres error: {source}")]
    Postgres {
        #[from]
        source: tokio_postgres::Error,
    },

    #[error("serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("vectordb error: {0}")]
    Rpc(String),

    /// A statement failed inside an open transaction, so committing rolled it back.
    #[error("transaction rolled back after a failed statement: {0}")]
    Aborted(String),

    // --- integrity ---
    #[error("entity '{entity}' returned a row without column '{column}'")]
    MissingColumn { entity: String, column: String },

    #[error("corrupt value in '{entity}.{column}': {reason}")]
    CorruptValue {
        entity: String,
        column: String,
        reason: String,
    },
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Io { .. } | Error::Postgres { .. } | Error::Json { .. } | Error::Rpc(_) | Error::Aborted(_) => {
                ErrorCategory::Backend
            }
            Error::MissingColumn { .. } | Error::CorruptValue { .. } => ErrorCategory::Integrity,
            _ => ErrorCategory::Configuration,
        }
    }

    pub fn is_backend(&self) -> bool {
        self.category() == ErrorCategory::Backend
    }

    pub(crate) fn corrupt(entity: &str, column: &str, reason: impl Into<String>) -> Self {
        Error::CorruptValue {
            entity: entity.to_string(),
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(entity: &str, column: &str) -> Self {
        Error::MissingColumn {
            entity: entity.to_string(),
            column: column.to_string(),
        }
    }
}

/// Projects backend failures onto a fallback value after logging them.
pub trait Recover<T> {
    fn or_recover(self, entity: &str, operation: &str, fallback: impl FnOnce() -> T) -> Result<T>;
}

impl<T> Recover<T> for Result<T> {
    fn or_recover(self, entity: &str, operation: &str, fallback: impl FnOnce() -> T) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(e) if e.is_backend() => {
                tracing::error!(entity, operation, error = %e, "backend operation failed");
                Ok(fallback())
            }
            Err(e) => Err(e),
        }
    }
}
