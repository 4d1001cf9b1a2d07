use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info};

use crate::codec::{reencode_jpeg, CodecError};
use crate::config::{Config, ImageConfig, StreamConfig};
use crate::error::SessionError;
use crate::pipeline::CapturePipeline;
use crate::session::CameraSession;

mod stream;

pub use stream::MultipartWriter;

/// Web server state
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<CameraSession>,
    pub pipeline: Arc<CapturePipeline>,
    pub stream: StreamConfig,
    pub image: ImageConfig,
    /// Cancelled on process shutdown so open streams end
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: Arc<CapturePipeline>, config: &Config, shutdown: CancellationToken) -> Self {
        Self {
            session: Arc::clone(pipeline.session()),
            pipeline,
            stream: config.stream.clone(),
            image: config.image.clone(),
            shutdown,
        }
    }

    /// Decode, apply the configured geometry and re-encode a JPEG.
    fn present(&self, jpeg: &[u8]) -> Result<Vec<u8>, CodecError> {
        reencode_jpeg(jpeg, &self.image.transform, self.image.jpeg_quality)
    }
}

/// Error returned by request handlers; rendered as a 500 with the message.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("error converting image: {0}")]
    Codec(#[from] CodecError),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self, "Request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Run device or codec work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

pub fn router(state: AppState, public_dir: &Path, captures_dir: &Path) -> Router {
    Router::new()
        .route("/api/preview", get(stream::preview_handler))
        .route("/api/capture", get(capture_handler))
        .route("/api/capture/auto", get(stream::auto_capture_handler))
        .route("/api/iso", get(iso_handler))
        .route("/health", get(health_handler))
        .nest_service("/captures", ServeDir::new(captures_dir))
        .fallback_service(ServeDir::new(public_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serve `app` until `shutdown` is cancelled.
pub async fn run_server(addr: &str, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Starting web server on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Web server stopped");
    Ok(())
}

/// Single capture, persisted and returned as one JPEG
async fn capture_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let jpeg = blocking(move || {
        let captured = state.pipeline.capture_and_persist()?;
        Ok(state.present(&captured.viewable)?)
    })
    .await?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

#[derive(Debug, Deserialize)]
struct IsoParams {
    iso: Option<String>,
}

/// Read or replace the ISO used for captures
async fn iso_handler(
    State(state): State<AppState>,
    Query(params): Query<IsoParams>,
) -> Result<String, ApiError> {
    let session = Arc::clone(&state.session);
    match params.iso.filter(|v| !v.is_empty()) {
        Some(value) => {
            blocking(move || {
                session.set_baseline(value.clone())?;
                Ok(value)
            })
            .await
        }
        None => blocking(move || Ok(session.baseline())).await,
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check handler
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
