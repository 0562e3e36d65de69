use serde_json::{json, Value};
use thiserror::Error;

/// Every failure a request can end in. Each variant maps to one wire code.
#[derive(Debug, Error)]
pub enum FormsError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("{0}")]
    NotAuthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("{0}")]
    CrossReference(String),

    #[error("select a workspace first")]
    NoWorkspace,

    #[error("{source}")]
    Db {
        code: &'static str,
        table: Option<&'static str>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FormsError {
    pub fn validation(message: impl Into<String>) -> Self {
        FormsError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Value) -> Self {
        FormsError::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        FormsError::NotFound(message.into())
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        FormsError::NotAuthorized(message.into())
    }

    pub fn cross_reference(message: impl Into<String>) -> Self {
        FormsError::CrossReference(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            FormsError::NotAuthenticated => "not_authenticated",
            FormsError::NotAuthorized(_) => "not_authorized",
            FormsError::NotFound(_) => "not_found",
            FormsError::Validation { .. } => "bad_params",
            FormsError::CrossReference(_) => "cross_reference_mismatch",
            FormsError::NoWorkspace => "no_workspace",
            FormsError::Db { code, .. } => *code,
            FormsError::Io { .. } => "io_failed",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            FormsError::Validation { details, .. } => details.clone(),
            FormsError::Db {
                table: Some(table), ..
            } => Some(json!({ "table": table })),
            FormsError::Io { path, .. } => Some(json!({ "path": path })),
            _ => None,
        }
    }
}

/// Tags a rusqlite failure with the wire code of the step that failed.
pub trait DbResultExt<T> {
    fn db(self, code: &'static str) -> Result<T, FormsError>;
    fn db_table(self, code: &'static str, table: &'static str) -> Result<T, FormsError>;
}

impl<T> DbResultExt<T> for Result<T, rusqlite::Error> {
    fn db(self, code: &'static str) -> Result<T, FormsError> {
        self.map_err(|source| FormsError::Db {
            code,
            table: None,
            source,
        })
    }

    fn db_table(self, code: &'static str, table: &'static str) -> Result<T, FormsError> {
        self.map_err(|source| FormsError::Db {
            code,
            table: Some(table),
            source,
        })
    }
}
