//! Sandboxed file-tree operations
//!
//! Every operation takes a [`ResolvedPath`] produced by [`SandboxRoot::resolve`],
//! so nothing in here ever touches the filesystem outside the sandbox root.
//!
//! Concurrency contract: handlers share no mutable state. Existence checks
//! followed by `mkdir`/`rename` are check-then-act, so two concurrent
//! requests against the same target name may both pass the check; the loser
//! then gets either a `Conflict` or the OS error from the mutation itself.
//! Uploads are the exception, they commit with a no-clobber persist.

use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shared_types::ErrorResponse;

pub mod content;
pub mod mutation;
pub mod path;
pub mod thumbnail;
pub mod tree;

pub use path::{ResolvedPath, SandboxRoot};

/// Characters that may not appear in a folder or file name
const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FileError {
    #[error("Access denied")]
    AccessDenied,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Server(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
}

impl FileError {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileError::AccessDenied => "ACCESS_DENIED",
            FileError::NotFound(_) => "NOT_FOUND",
            FileError::BadRequest(_) => "BAD_REQUEST",
            FileError::Conflict(_) => "CONFLICT",
            FileError::Server(_) => "SERVER_ERROR",
            FileError::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FileError::AccessDenied => StatusCode::FORBIDDEN,
            FileError::NotFound(_) => StatusCode::NOT_FOUND,
            FileError::BadRequest(_) => StatusCode::BAD_REQUEST,
            FileError::Conflict(_) => StatusCode::CONFLICT,
            FileError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FileError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// Wrap an OS error, keeping its message for the client
    pub fn io(context: &str, err: std::io::Error) -> Self {
        tracing::error!(error = %err, "{context}");
        FileError::Server(format!("{context}: {err}"))
    }

    pub fn not_found() -> Self {
        FileError::NotFound("File or directory not found".to_string())
    }
}

impl From<QueryRejection> for FileError {
    fn from(rejection: QueryRejection) -> Self {
        FileError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for FileError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.as_str().to_string(),
        });
        (status, body).into_response()
    }
}

/// Rejects empty names and names containing path separators or shell metacharacters.
pub fn validate_name(name: &str) -> Result<(), FileError> {
    if name.is_empty() || name.contains(FORBIDDEN_NAME_CHARS) || name.contains('\0') {
        return Err(FileError::BadRequest(format!("Invalid name: {name:?}")));
    }
    Ok(())
}
