use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::Value;
use std::{path::PathBuf, time::Duration};
use thiserror::Error as ThisError;

use super::IsRetryable;
use crate::db::FieldErrors;

#[derive(Debug, ThisError)]
pub enum AgentDbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unsupported dialect: {0}")]
    UnsupportedDialect(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Validation failed: {0:?}")]
    Validation(FieldErrors),

    #[error("Record not found")]
    NotFound,

    #[error("Missing parameter :{0}")]
    MissingParam(String),

    #[error("Nothing to write for table {0}")]
    EmptyChangeset(&'static str),

    #[error("Table {0} has no identity field")]
    MissingIdentity(&'static str),

    #[error("Failed to decode column {column}: {message}")]
    Decode { column: String, message: String },

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Migration {file} failed: {source}")]
    Migration {
        file: String,
        #[source]
        source: Box<AgentDbError>,
    },

    #[error("No base migration found in {}", .0.display())]
    MissingBaseMigration(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AgentDbError {
    /// Field errors carried by a validation failure.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            AgentDbError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl IntoResponse for AgentDbError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            AgentDbError::Validation(errors) => {
                let status = StatusCode::UNPROCESSABLE_ENTITY;
                let body = ApiErrorObject {
                    code: "VALIDATION_FAILED".to_string(),
                    message: "One or more fields are invalid.".to_string(),
                    details: serde_json::to_value(errors).ok(),
                };
                (status, body)
            }

            AgentDbError::NotFound => {
                let status = StatusCode::NOT_FOUND;
                let body = ApiErrorObject {
                    code: "NOT_FOUND".to_string(),
                    message: "Record not found.".to_string(),
                    details: None,
                };
                (status, body)
            }

            AgentDbError::Timeout(_) => {
                let status = StatusCode::GATEWAY_TIMEOUT;
                let body = ApiErrorObject {
                    code: "DATABASE_TIMEOUT".to_string(),
                    message: "The database did not respond in time.".to_string(),
                    details: None,
                };
                (status, body)
            }

            AgentDbError::Connection(_)
            | AgentDbError::UnsupportedDialect(_)
            | AgentDbError::Config(_)
            | AgentDbError::DatabaseError(_)
            | AgentDbError::MissingParam(_)
            | AgentDbError::EmptyChangeset(_)
            | AgentDbError::MissingIdentity(_)
            | AgentDbError::Decode { .. }
            | AgentDbError::Migration { .. }
            | AgentDbError::MissingBaseMigration(_)
            | AgentDbError::IoError(_) => {
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                let body = ApiErrorObject {
                    code: "INTERNAL_ERROR".to_string(),
                    message: "An internal server error occurred.".to_string(),
                    details: None,
                };
                (status, body)
            }
        };
        (status, Json(ApiErrorBody { inner: error_body })).into_response()
    }
}

/// Standardized API error response payload.
#[derive(Serialize)]
pub struct ApiErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}

impl IsRetryable for AgentDbError {
    fn is_retryable(&self) -> bool {
        match self {
            AgentDbError::Timeout(_) => true,
            AgentDbError::DatabaseError(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}
