//! `/metrics` scrape endpoint

use axum::{
    Router,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::error::AppError;
use crate::metrics::{HTTP_REQUESTS_TOTAL, REGISTRY};

/// Render the registry in the Prometheus text exposition format.
async fn scrape() -> Result<Response, AppError> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();

    let body = encoder.encode_to_string(&families).map_err(|e| {
        tracing::error!(error = %e, families = families.len(), "Failed to encode metrics");
        AppError::Internal(anyhow::anyhow!("metrics encoding failed: {}", e))
    })?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/metrics", "200"])
        .inc();

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        body,
    )
        .into_response())
}

/// Unauthenticated and stateless, so it is merged after `with_state`.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(scrape))
}
