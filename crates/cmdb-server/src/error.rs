//! Error types for the cmdb-server crate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use cmdb_core::packs::PackError;
use cmdb_core::CmdbError;
use cmdb_graph::GraphError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Domain(#[from] CmdbError),

    #[error(transparent)]
    Storage(#[from] GraphError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Domain(e) => match e {
                CmdbError::UnknownType(_) | CmdbError::NotFound { .. } => StatusCode::NOT_FOUND,
                CmdbError::InvalidIdentifier(_)
                | CmdbError::MissingRequired(_)
                | CmdbError::InvalidChoice { .. }
                | CmdbError::InvalidRequest(_)
                | CmdbError::Serialization(_)
                | CmdbError::Pack(_) => StatusCode::BAD_REQUEST,
                CmdbError::Auth(_) => StatusCode::UNAUTHORIZED,
                CmdbError::Config(_) | CmdbError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Storage(GraphError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Pack(PackError::Dependency(_)) => StatusCode::BAD_REQUEST,
            Self::Pack(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the message is safe and useful to show a user verbatim.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(serde_json::json!({
            "success": false,
            "error": message,
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
