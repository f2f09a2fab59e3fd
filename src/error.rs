use crate::models::ExecutionState;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cyclic dependency detected among: {}", nodes.join(", "))]
    CyclicDependency { nodes: Vec<String> },

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Invalid stack metadata: {0}")]
    InvalidStack(String),

    #[error("Failed to build stages: {0}")]
    StageBuild(#[source] Box<AppError>),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(i64),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Stage not found: {0}")]
    StageNotFound(i64),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Log of task {0} not found")]
    TaskLogNotFound(i64),

    #[error("Job {id} is {state:?} and cannot be retried")]
    JobNotRetryable { id: i64, state: ExecutionState },

    #[error("Job {id} is {state:?} and cannot be canceled")]
    JobNotCancelable { id: i64, state: ExecutionState },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

impl AppError {
    /// Wraps an ordering failure so callers see a single structured server error.
    pub fn stage_build(err: AppError) -> Self {
        match err {
            AppError::StageBuild(_) => err,
            other => AppError::StageBuild(Box::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Protocol(e) => (StatusCode::BAD_REQUEST, e),
            AppError::Json(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::InvalidCommand(e) | AppError::UnsupportedCommand(e) => {
                (StatusCode::BAD_REQUEST, e)
            }
            AppError::TaskLogNotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Log of task '{}' not found", id),
            ),
            AppError::JobNotFound(id) => (StatusCode::NOT_FOUND, format!("Job '{}' not found", id)),
            AppError::StageNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Stage '{}' not found", id))
            }
            AppError::TaskNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Task '{}' not found", id))
            }
            AppError::ClusterNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Cluster '{}' not found", id))
            }
            e @ (AppError::JobNotRetryable { .. } | AppError::JobNotCancelable { .. }) => {
                (StatusCode::CONFLICT, e.to_string())
            }
            e => {
                tracing::error!("Request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
