use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use job_supervisor::SupervisorError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to HTTP clients as `{"detail": "..."}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Conversion already running")]
    AlreadyRunning,

    #[error("No conversion running")]
    NotRunning,

    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("{0}")]
    Analysis(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AlreadyRunning | ApiError::NotRunning | ApiError::SourceNotFound(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Analysis(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::AlreadyRunning => ApiError::AlreadyRunning,
            SupervisorError::NotRunning => ApiError::NotRunning,
            SupervisorError::InvalidInput { path } => ApiError::SourceNotFound(path),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_errors_map_to_client_errors() {
        let cases = [
            (SupervisorError::AlreadyRunning, "Conversion already running"),
            (SupervisorError::NotRunning, "No conversion running"),
            (
                SupervisorError::InvalidInput {
                    path: PathBuf::from("/data/missing"),
                },
                "Source directory not found: /data/missing",
            ),
        ];
        for (err, message) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);
            assert_eq!(api.to_string(), message);
        }
    }

    #[test]
    fn spawn_failure_maps_to_server_error() {
        let api: ApiError = SupervisorError::SpawnFailed {
            program: "node".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        }
        .into();
        assert_eq!(api.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api.to_string().contains("node"));
    }

    #[tokio::test]
    async fn response_body_carries_detail() {
        let resp = ApiError::NotRunning.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "No conversion running");
    }
}
