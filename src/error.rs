//! # Error Handling Module
//!
//! Provides structured error types for board operations.
//!
//! Two kinds of failure never surface as HTTP error statuses: authorization
//! failures (Forbidden, SelfVote, AlreadyVoted) are soft — the handler turns
//! them into a redirect with a user-visible notice — and a missing session
//! (Unauthenticated) redirects to the login flow. Everything else maps to a
//! status code with a JSON body.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::flash;

/// Result type alias for board operations
pub type BoardResult<T> = Result<T, BoardError>;

/// Comprehensive error type for all board operations
#[derive(Error, Debug)]
pub enum BoardError {
    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(String),

    /// Missing primary key; terminal for the request
    #[error("Not found: {0}")]
    NotFound(String),

    /// No valid session on a route that requires one
    #[error("Sign in to continue")]
    Unauthenticated,

    /// Ownership violation; soft, carries the notice text
    #[error("{0}")]
    Forbidden(String),

    /// Vote on the actor's own question or answer; soft
    #[error("You cannot vote on your own post")]
    SelfVote,

    /// Repeat vote by the same user; soft, no state change
    #[error("You have already voted on this post")]
    AlreadyVoted,

    /// Form rejected; carries field errors and the submitted values
    #[error("Validation failed")]
    Validation(FormErrors),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BoardError {
    /// Returns the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            BoardError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BoardError::NotFound(_) => StatusCode::NOT_FOUND,
            BoardError::Unauthenticated => StatusCode::FOUND,
            BoardError::Forbidden(_) => StatusCode::FORBIDDEN,
            BoardError::SelfVote => StatusCode::FORBIDDEN,
            BoardError::AlreadyVoted => StatusCode::CONFLICT,
            BoardError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BoardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            BoardError::Database(_) => "DATABASE_ERROR",
            BoardError::NotFound(_) => "NOT_FOUND",
            BoardError::Unauthenticated => "UNAUTHENTICATED",
            BoardError::Forbidden(_) => "FORBIDDEN",
            BoardError::SelfVote => "SELF_VOTE",
            BoardError::AlreadyVoted => "ALREADY_VOTED",
            BoardError::Validation(_) => "VALIDATION_FAILED",
            BoardError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Soft failures redirect with a notice instead of erroring; handlers
    /// check this before propagating.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            BoardError::Forbidden(_) | BoardError::SelfVote | BoardError::AlreadyVoted
        )
    }
}

/// Converts BoardError into an Axum HTTP response
impl IntoResponse for BoardError {
    fn into_response(self) -> Response {
        match self {
            BoardError::Unauthenticated => {
                flash::redirect_with_notice(CookieJar::new(), "/auth/login", "Sign in to continue")
            }
            BoardError::Validation(form) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "success": false,
                    "error": {
                        "code": "VALIDATION_FAILED",
                        "message": "Validation failed",
                    },
                    "form": form,
                })),
            )
                .into_response(),
            other => {
                let status = other.status_code();
                let body = Json(json!({
                    "success": false,
                    "error": {
                        "code": other.error_code(),
                        "message": other.to_string(),
                    },
                }));
                (status, body).into_response()
            }
        }
    }
}

/// Convert rusqlite errors to BoardError
impl From<rusqlite::Error> for BoardError {
    fn from(err: rusqlite::Error) -> Self {
        BoardError::Database(err.to_string())
    }
}

/// Convert tokio-rusqlite errors to BoardError
impl From<tokio_rusqlite::Error> for BoardError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        BoardError::Database(err.to_string())
    }
}

/// Field-level validation errors plus the submitted values: everything a
/// form re-render needs. No state is mutated when this is returned.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FormErrors {
    pub values: BTreeMap<String, String>,
    pub errors: BTreeMap<String, Vec<String>>,
}

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submitted value so it can be echoed back
    pub fn value(mut self, field: &str, value: &str) -> Self {
        self.values.insert(field.to_string(), value.to_string());
        self
    }

    /// Add an error message for a field
    pub fn push(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Ok when no field failed, otherwise the Validation error
    pub fn into_result(self) -> BoardResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(BoardError::Validation(self))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            BoardError::NotFound("question".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BoardError::Validation(FormErrors::new()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            BoardError::Database("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_soft_failures() {
        assert!(BoardError::Forbidden("no".to_string()).is_soft());
        assert!(BoardError::SelfVote.is_soft());
        assert!(BoardError::AlreadyVoted.is_soft());
        assert!(!BoardError::Unauthenticated.is_soft());
        assert!(!BoardError::NotFound("answer".to_string()).is_soft());
    }

    #[test]
    fn test_form_errors_collects_fields() {
        let mut form = FormErrors::new().value("subject", "hi");
        assert!(form.clone().into_result().is_ok());

        form.push("content", "Content is required");
        form.push("content", "Too short");

        let err = form.into_result().unwrap_err();
        match err {
            BoardError::Validation(form) => {
                assert_eq!(form.values.get("subject").map(String::as_str), Some("hi"));
                assert_eq!(form.errors.get("content").map(Vec::len), Some(2));
            }
            other => panic!("expected Validation, got {:?}", other),
        }
    }
}
