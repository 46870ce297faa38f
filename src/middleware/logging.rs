//! Request logging middleware.
//!
//! Logs every HTTP request with method, path, status code, and latency.
//! WebSocket upgrades are logged when the handshake completes; the replay
//! session itself logs under its own span.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Logs at INFO for completed requests, WARN for 5xx.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // Health probes are noise
    if path == "/health" {
        return next.run(request).await;
    }

    let span = tracing::info_span!("http_request", method = %method, path = %path);
    let start = Instant::now();
    let response = next.run(request).instrument(span).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    if status == 101 {
        debug!(
            method = %method,
            path = %path,
            latency_ms = latency.as_millis(),
            "WebSocket upgraded"
        );
    } else if status >= 500 {
        warn!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            "Request failed (5xx)"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            "Request completed"
        );
    }

    response
}
