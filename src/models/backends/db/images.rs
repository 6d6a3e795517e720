//! The postgres backed record store for images

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::postgres::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::ImageStore;
use crate::models::{Image, ImageVariant};
use crate::utils::ApiError;

/// Stores image rows in postgres
#[derive(Clone)]
pub struct PgImageStore {
    /// The pool of connections to postgres
    pool: PgPool,
}

impl PgImageStore {
    /// Build a new postgres backed image store
    ///
    /// # Arguments
    ///
    /// * `pool` - The pool of connections to postgres
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        PgImageStore { pool }
    }
}

#[async_trait]
impl ImageStore for PgImageStore {
    /// Create an empty image record
    #[instrument(name = "db::images::create_image", skip(self), err(Debug))]
    async fn create_image(&self) -> Result<Image, ApiError> {
        // ids are generated app side so callers never wait on a sequence
        let image = Image {
            id: Uuid::new_v4(),
            created: Utc::now(),
        };
        sqlx::query("INSERT INTO images (id, created) VALUES ($1, $2)")
            .bind(image.id)
            .bind(image.created)
            .execute(&self.pool)
            .await?;
        Ok(image)
    }

    /// Delete an image record, cascading to its variant rows
    ///
    /// # Arguments
    ///
    /// * `image` - The id of the image to delete
    #[instrument(name = "db::images::delete_image", skip(self), err(Debug))]
    async fn delete_image(&self, image: &Uuid) -> Result<bool, ApiError> {
        // variant rows cascade with the image record
        let done = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(image)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Record a durably stored variant
    ///
    /// # Arguments
    ///
    /// * `image` - The id of the image this variant belongs too
    /// * `variant` - The variant to record
    #[instrument(name = "db::images::add_variant", skip(self, variant), err(Debug))]
    async fn add_variant(&self, image: &Uuid, variant: &ImageVariant) -> Result<bool, ApiError> {
        // a racing duplicate insert for the same size loses to the unique index
        let done = sqlx::query(
            "INSERT INTO scaled_images (image, width, height, url) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (image, width, height) DO NOTHING",
        )
        .bind(image)
        .bind(variant.width as i32)
        .bind(variant.height as i32)
        .bind(&variant.url)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    /// List all variants for an image ordered by ascending width
    ///
    /// # Arguments
    ///
    /// * `image` - The id of the image to list variants for
    #[instrument(name = "db::images::list_variants", skip(self), err(Debug))]
    async fn list_variants(&self, image: &Uuid) -> Result<Vec<ImageVariant>, ApiError> {
        // pull this image's variant set ordered by ascending width
        let rows = sqlx::query(
            "SELECT width, height, url FROM scaled_images \
             WHERE image = $1 ORDER BY width ASC",
        )
        .bind(image)
        .fetch_all(&self.pool)
        .await?;
        // cast our rows to variants
        let mut variants = Vec::with_capacity(rows.len());
        for row in rows {
            variants.push(ImageVariant {
                width: row.try_get::<i32, _>("width")? as u32,
                height: row.try_get::<i32, _>("height")? as u32,
                url: row.try_get("url")?,
            });
        }
        Ok(variants)
    }

    /// Check this store answers queries
    #[instrument(name = "db::images::ping", skip(self), err(Debug))]
    async fn ping(&self) -> Result<(), ApiError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
