//! ActivityPub endpoints
//!
//! - Personal inbox
//! - Shared inbox
//!
//! Both only accept requests whose HTTP signature verifies. Processing of
//! the accepted activity is left to downstream consumers.

use axum::body::Bytes;
use axum::extract::OriginalUri;
use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    routing::post,
};

use crate::AppState;
use crate::error::AppError;
use crate::federation::{AuthenticatedActor, SignedRequest};
use crate::identity::{ACTOR_PATH_MARKER, ActorStore};
use crate::metrics::{ACTIVITYPUB_ACTIVITIES_RECEIVED, HTTP_REQUESTS_TOTAL};

/// Create ActivityPub router
///
/// Routes:
/// - POST /ap/users/:username/inbox - Personal inbox
/// - POST /inbox - Shared inbox
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route(&format!("{}:username/inbox", ACTOR_PATH_MARKER), post(inbox))
        .route("/inbox", post(shared_inbox))
}

/// POST /ap/users/:username/inbox
///
/// # Steps
/// 1. Check the local user exists
/// 2. Verify the HTTP Signature
/// 3. Check the activity's actor is the signer
/// 4. Record the signer
async fn inbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    state
        .db
        .find_actor_by_handle(&username, &state.config.server.domain)
        .await?
        .ok_or(AppError::NotFound)?;

    accept_activity(&state, &method, &uri, &headers, &body).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/ap/users/:username/inbox", "202"])
        .inc();
    Ok(StatusCode::ACCEPTED)
}

/// POST /inbox
///
/// Shared inbox for all users on this instance.
async fn shared_inbox(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    accept_activity(&state, &method, &uri, &headers, &body).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/inbox", "202"])
        .inc();
    Ok(StatusCode::ACCEPTED)
}

async fn accept_activity(
    state: &AppState,
    method: &Method,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<AuthenticatedActor, AppError> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let signer = state
        .authenticator
        .verify_request(
            SignedRequest {
                method: method.as_str(),
                path_and_query,
                headers,
            },
            body,
        )
        .await?;

    let activity: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;

    let actor_id = activity
        .get("actor")
        .and_then(|a| a.as_str())
        .ok_or_else(|| AppError::Validation("Missing actor field".to_string()))?;

    if !signer.speaks_for(actor_id) {
        tracing::warn!(
            key_id = %signer.key_id,
            actor = actor_id,
            "Activity actor does not match signer"
        );
        return Err(AppError::Unauthorized);
    }

    let signer = state.authenticator.record(signer).await?;

    let activity_type = activity
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("Unknown");
    ACTIVITYPUB_ACTIVITIES_RECEIVED
        .with_label_values(&[activity_type])
        .inc();

    tracing::info!(
        actor = %signer.actor_uri,
        local_id = %signer.local_id,
        activity_type,
        "Accepted activity"
    );

    Ok(signer)
}
