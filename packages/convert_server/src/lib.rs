// Library interface for the conversion control server.
// Builds the HTTP router around a single supervised conversion job.

pub mod analyze;
pub mod api;
pub mod config;
pub mod error;

pub use analyze::{AnalysisConfig, AnalysisReport};
pub use config::{FileConfig, load_config};
pub use error::ApiError;

use axum::{Router, routing::get};
use job_supervisor::Supervisor;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{MakeSpan, TraceLayer},
};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub analysis: Arc<AnalysisConfig>,
}

/// Tags every request span with a fresh request id.
#[derive(Clone, Copy)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

/// Full application router: `/api/*`, `/health`, `/static/*` and the `/` redirect
pub fn create_router(state: AppState, static_dir: PathBuf) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/health", get(api::health))
        .nest("/api", api::api_routes())
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
