//! Serves the OpenAPI docs for the Vitrine API

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use super::basic::BasicApiDocs;
use super::images::ImageApiDocs;
use crate::utils::AppState;

/// The root OpenAPI doc the route groups merge into
#[derive(OpenApi)]
#[openapi(info(title = "Vitrine", description = "The Vitrine image CDN API"))]
struct ApiDocs;

/// Serve the OpenAPI document as json
async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    // merge each route group's docs into one document
    let mut docs = ApiDocs::openapi();
    docs.merge(BasicApiDocs::openapi());
    docs.merge(ImageApiDocs::openapi());
    Json(docs)
}

/// Add the docs routes to our router
///
/// # Arguments
///
/// * `router` - The router to add routes too
pub fn mount(router: Router<AppState>) -> Router<AppState> {
    router.route("/docs/openapi.json", get(openapi))
}
