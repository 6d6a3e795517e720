//! The record stores Vitrine can persist image rows in

mod images;

pub use images::PgImageStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Image, ImageVariant};
use crate::utils::ApiError;

/// The record store for images and their variants
///
/// Backends take this as an injected collaborator instead of reaching for a
/// process wide registry, so tests can swap in an in memory store.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Create an empty image record
    async fn create_image(&self) -> Result<Image, ApiError>;

    /// Delete an image record, cascading to its variant rows
    ///
    /// Returns true if a record existed.
    ///
    /// # Arguments
    ///
    /// * `image` - The id of the image to delete
    async fn delete_image(&self, image: &Uuid) -> Result<bool, ApiError>;

    /// Record a durably stored variant
    ///
    /// Returns false if this size already exists for this image; the existing
    /// row wins and the insert is dropped.
    ///
    /// # Arguments
    ///
    /// * `image` - The id of the image this variant belongs too
    /// * `variant` - The variant to record
    async fn add_variant(&self, image: &Uuid, variant: &ImageVariant) -> Result<bool, ApiError>;

    /// List all variants for an image ordered by ascending width
    ///
    /// # Arguments
    ///
    /// * `image` - The id of the image to list variants for
    async fn list_variants(&self, image: &Uuid) -> Result<Vec<ImageVariant>, ApiError>;

    /// Check this store answers queries
    async fn ping(&self) -> Result<(), ApiError>;
}
