//! Routes for images

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tracing::instrument;
use utoipa::OpenApi;
use uuid::Uuid;

use crate::models::{Image, ImageSize, ImageUploadForm, ImageUploadResponse, SignedImageResponse};
use crate::utils::{ApiError, AppState};

/// The OpenAPI docs for image routes
#[derive(OpenApi)]
#[openapi(
    paths(upload, fetch, delete_image),
    components(schemas(ImageSize, ImageUploadResponse, SignedImageResponse))
)]
pub struct ImageApiDocs;

/// Uploads an image and scales it to the requested sizes
///
/// # Arguments
///
/// * `state` - Shared Vitrine objects
/// * `form` - The multipart form with a `file` field and a `sizes` field
#[utoipa::path(
    post,
    path = "/api/images/upload",
    responses(
        (status = 200, description = "The image id and the sizes that were stored", body = ImageUploadResponse),
        (status = 400, description = "The upload is not a jpeg or png, or the sizes list is missing, malformed, or larger than the cap"),
        (status = 500, description = "The original image could not be persisted"),
    )
)]
#[instrument(name = "routes::images::upload", skip_all, err(Debug))]
#[axum_macros::debug_handler]
async fn upload(
    State(state): State<AppState>,
    form: Multipart,
) -> Result<Json<ImageUploadResponse>, ApiError> {
    // validate the form before any storage side effect can happen
    let max_sizes = state.shared.config.vitrine.scaling.max_sizes;
    let form = ImageUploadForm::from_multipart(form, max_sizes).await?;
    // ingest the upload and scale it
    let resp = Image::create(form, &state.shared).await?;
    Ok(Json(resp))
}

/// Returns a signed url for an image at a minimum width
///
/// The returned variant is the smallest one at least as wide as requested,
/// degrading to the widest stored variant when nothing is wide enough.
///
/// # Arguments
///
/// * `state` - Shared Vitrine objects
/// * `id` - The id of the image to fetch
/// * `width` - The narrowest acceptable width
#[utoipa::path(
    get,
    path = "/api/images/{id}/{width}",
    params(
        ("id" = Uuid, Path, description = "The id of the image to fetch"),
        ("width" = u32, Path, description = "The narrowest acceptable width"),
    ),
    responses(
        (status = 200, description = "A signed url and the returned variant's actual size", body = SignedImageResponse),
        (status = 404, description = "No variants exist for this image id"),
        (status = 500, description = "The url could not be signed"),
    )
)]
#[instrument(name = "routes::images::fetch", skip(state), err(Debug))]
async fn fetch(
    State(state): State<AppState>,
    Path((id, width)): Path<(Uuid, u32)>,
) -> Result<Json<SignedImageResponse>, ApiError> {
    // resolve the best variant and sign a read url for it
    let resp = Image::resolve(&id, width, &state.shared).await?;
    Ok(Json(resp))
}

/// Deletes an image and all of its variants
///
/// # Arguments
///
/// * `state` - Shared Vitrine objects
/// * `id` - The id of the image to delete
#[utoipa::path(
    delete,
    path = "/api/images/{id}",
    params(
        ("id" = Uuid, Path, description = "The id of the image to delete"),
    ),
    responses(
        (status = 204, description = "The image and its variants were deleted"),
        (status = 404, description = "No image exists with this id"),
    )
)]
#[instrument(name = "routes::images::delete", skip(state), err(Debug))]
async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    // drop the image, its rows, and its stored objects
    Image::delete(&id, &state.shared).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add the image routes to our router
///
/// # Arguments
///
/// * `router` - The router to add routes too
pub fn mount(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/images/upload", post(upload))
        .route("/images/{id}/{width}", get(fetch))
        .route("/images/{id}", delete(delete_image))
}
