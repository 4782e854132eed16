//! Boundary error taxonomy.
//!
//! Internal code propagates `anyhow::Error`; the variants here classify the failures
//! that the HTTP layer must report with a specific status code. Handlers recover the
//! variant with `downcast_ref`.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no worker nodes configured")]
    NoNodes,

    #[error("unknown table: {0}")]
    InvalidTable(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid query id: {0:?}")]
    InvalidQueryId(String),

    #[error("cluster is not initialized")]
    NotInitialized,

    #[error("node is not initialized")]
    NodeNotInitialized,

    #[error("operation requires role {expected}, node is {actual}")]
    WrongRole {
        expected: &'static str,
        actual: &'static str,
    },
}

impl ClusterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ClusterError::Config(_)
            | ClusterError::NoNodes
            | ClusterError::InvalidTable(_)
            | ClusterError::InvalidPayload(_)
            | ClusterError::InvalidQueryId(_) => StatusCode::BAD_REQUEST,
            ClusterError::NotInitialized
            | ClusterError::NodeNotInitialized
            | ClusterError::WrongRole { .. } => StatusCode::CONFLICT,
        }
    }
}

/// Status code for an arbitrary error: classified errors map to their own code,
/// everything else is an internal failure.
pub fn status_for(err: &anyhow::Error) -> StatusCode {
    err.downcast_ref::<ClusterError>()
        .map(ClusterError::status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
