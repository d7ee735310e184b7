//! Account lookup endpoints
//!
//! Resolve numeric ids, actor URIs and handles to stored accounts.

use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json,
    routing::get,
};

use super::dto::{AccountResponse, LookupQuery};
use crate::AppState;
use crate::error::AppError;
use crate::metrics::HTTP_REQUESTS_TOTAL;

/// Create account router
///
/// Routes:
/// - GET /api/v1/accounts/lookup?acct=...
/// - GET /api/v1/accounts/:id
pub fn accounts_router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/accounts/lookup", get(lookup_account))
        .route("/api/v1/accounts/:id", get(get_account))
}

/// GET /api/v1/accounts/lookup
///
/// `acct` may be a handle (`user`, `user@domain`, `@user@domain`) or an
/// actor URI.
async fn lookup_account(
    State(state): State<AppState>,
    Query(params): Query<LookupQuery>,
) -> Result<Json<AccountResponse>, AppError> {
    let acct = params
        .acct
        .as_deref()
        .map(str::trim)
        .filter(|acct| !acct.is_empty())
        .ok_or_else(|| AppError::Unprocessable("Missing acct parameter".to_string()))?;

    let actor = state.identity.resolve_account_identifier(acct).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/accounts/lookup", "200"])
        .inc();

    Ok(Json(AccountResponse::from_identity(
        actor,
        state.identity.local_domain(),
    )))
}

/// GET /api/v1/accounts/:id
async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AccountResponse>, AppError> {
    let actor = state.identity.resolve_account_identifier(&id).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/accounts/:id", "200"])
        .inc();

    Ok(Json(AccountResponse::from_identity(
        actor,
        state.identity.local_domain(),
    )))
}
