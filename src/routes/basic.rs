//! Basic routes for the Vitrine API

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tracing::instrument;
use utoipa::OpenApi;

use crate::utils::{ApiError, AppState};

/// The OpenAPI docs for basic routes
#[derive(OpenApi)]
#[openapi(paths(health))]
pub struct BasicApiDocs;

/// Check the API and its record store are healthy
///
/// # Arguments
///
/// * `state` - Shared Vitrine objects
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "The API can answer queries", body = bool),
        (status = 500, description = "The record store is unreachable"),
    )
)]
#[instrument(name = "routes::basic::health", skip_all, err(Debug))]
async fn health(State(state): State<AppState>) -> Result<Json<bool>, ApiError> {
    // a healthy API can reach its record store
    state.shared.images.ping().await?;
    Ok(Json(true))
}

/// Add the basic routes to our router
///
/// # Arguments
///
/// * `router` - The router to add routes too
pub fn mount(router: Router<AppState>) -> Router<AppState> {
    router.route("/health", get(health))
}
