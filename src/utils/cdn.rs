//! Names image variants in the CDN and scratch files on disk

use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::Conf;

/// Builds deterministic keys, locators, and scratch paths for image variants
///
/// Identical inputs always produce identical outputs apart from
/// [`CdnPaths::upload_path`], which is timestamped on purpose.
#[derive(Debug, Clone)]
pub struct CdnPaths {
    /// The bucket variants are stored in
    bucket: String,
    /// The key prefix variants are stored under
    image_path: String,
    /// The local directory scratch files are written too
    scratch: PathBuf,
}

impl CdnPaths {
    /// Build a namer from our config
    ///
    /// # Arguments
    ///
    /// * `conf` - The Vitrine config
    #[must_use]
    pub fn new(conf: &Conf) -> Self {
        CdnPaths {
            bucket: conf.vitrine.cdn.bucket.clone(),
            image_path: conf.vitrine.cdn.image_path.clone(),
            scratch: conf.vitrine.cdn.scratch.clone(),
        }
    }

    /// The key a variant is stored under in the blob store
    ///
    /// # Arguments
    ///
    /// * `image` - The id of the image this variant belongs too
    /// * `ext` - The file extension for this variant
    /// * `width` - The width of this variant
    /// * `height` - The height of this variant
    #[must_use]
    pub fn object_key(&self, image: &Uuid, ext: &str, width: u32, height: u32) -> String {
        format!("{}/{image}_{width}_{height}.{ext}", self.image_path)
    }

    /// The opaque locator for a variant
    ///
    /// Locators are not directly client fetchable; they must be signed first.
    ///
    /// # Arguments
    ///
    /// * `image` - The id of the image this variant belongs too
    /// * `ext` - The file extension for this variant
    /// * `width` - The width of this variant
    /// * `height` - The height of this variant
    #[must_use]
    pub fn locator(&self, image: &Uuid, ext: &str, width: u32, height: u32) -> String {
        format!(
            "s3://{}/{}",
            self.bucket,
            self.object_key(image, ext, width, height)
        )
    }

    /// The scratch path a resized variant is written to before upload
    ///
    /// # Arguments
    ///
    /// * `image` - The id of the image this variant belongs too
    /// * `ext` - The file extension for this variant
    /// * `width` - The width of this variant
    /// * `height` - The height of this variant
    #[must_use]
    pub fn scratch_path(&self, image: &Uuid, ext: &str, width: u32, height: u32) -> PathBuf {
        self.scratch
            .join(format!("{image}_{width}_{height}.{ext}"))
    }

    /// The scratch path to spool an upload too
    ///
    /// The name is timestamped so concurrent uploads of files with the same
    /// name cannot collide on disk.
    ///
    /// # Arguments
    ///
    /// * `base` - The uploaded file's name without its extension
    /// * `ext` - The uploaded file's extension
    #[must_use]
    pub fn upload_path(&self, base: &str, ext: &str) -> PathBuf {
        self.scratch
            .join(format!("{base}_{}.{ext}", Utc::now().timestamp_millis()))
    }

    /// The local directory scratch files are written too
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch
    }
}

/// Remove any files left in the scratch dir by a previous run
///
/// Returns how many files were removed.
///
/// # Arguments
///
/// * `dir` - The scratch dir to sweep
pub async fn sweep_scratch(dir: &Path) -> Result<usize, std::io::Error> {
    // make sure our scratch dir exists
    tokio::fs::create_dir_all(dir).await?;
    // walk the scratch dir and remove anything left behind
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut swept = 0;
    while let Some(entry) = entries.next_entry().await? {
        // skip anything that isn't a file
        if entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path()).await?;
            swept += 1;
        }
    }
    Ok(swept)
}
