//! HTTP + WebSocket surface
//!
//! REST endpoints for browsing and uploading bar history, plus the
//! `/ws/replay` socket that hosts one replay session per connection.

pub mod data;
pub mod replay_ws;
pub mod upload;

use crate::middleware::request_logging;
use crate::replay::SessionOptions;
use crate::store::BarStore;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Uploads larger than this are rejected before parsing.
const UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: BarStore,
    pub session_options: SessionOptions,
}

impl AppState {
    pub fn new(store: BarStore) -> Self {
        Self {
            store,
            session_options: SessionOptions::default(),
        }
    }

    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = options;
        self
    }
}

/// Create the application router
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(data::health_check))
        .route("/symbols", get(data::list_symbols))
        .route("/dates/:symbol", get(data::list_dates))
        .route("/data/:symbol/:trade_date", get(data::day_data))
        .route("/date-range/:symbol", get(data::date_range))
        .route(
            "/upload-csv",
            post(upload::upload_csv).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/ws/replay", get(replay_ws::replay_handler))
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// CORS for the configured origins; an empty list allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("⚠️  Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Run a blocking store call off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .map_err(ApiError::from)
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Internal(anyhow::Error),
    NotFound(String),
    BadRequest(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Internal(err) => {
                tracing::error!("Storage error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({
            "detail": message,
        }));

        (status, body).into_response()
    }
}
