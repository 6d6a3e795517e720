//! Logic for ingesting images and resolving their variants

use futures::stream::{self, StreamExt};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use tracing::{Level, event, instrument};
use uuid::Uuid;

use crate::conf::ScalingPolicy;
use crate::models::{
    Image, ImageSize, ImageUploadForm, ImageUploadResponse, ImageVariant, SignedImageResponse,
};
use crate::utils::s3::SignedMethod;
use crate::utils::{ApiError, Shared};
use crate::{bad, internal_err, not_found};

impl Image {
    /// Ingest an uploaded image and scale it to the requested sizes
    ///
    /// The original is always stored at its intrinsic size; a failure there is
    /// fatal and rolls the image record back. The requested sizes are then
    /// scaled concurrently under a bounded worker limit and recovered
    /// according to the configured scaling policy. The response lists exactly
    /// the sizes that were durably recorded.
    ///
    /// # Arguments
    ///
    /// * `form` - The validated upload form
    /// * `shared` - Shared Vitrine objects
    #[instrument(name = "Image::create", skip_all, err(Debug))]
    pub async fn create(
        form: ImageUploadForm,
        shared: &Shared,
    ) -> Result<ImageUploadResponse, ApiError> {
        let scaling = &shared.config.vitrine.scaling;
        // the route validates this too but reject oversized lists before any side effect
        if form.sizes.len() > scaling.max_sizes {
            return bad!(format!(
                "'sizes' must be an array of at most {} elements",
                scaling.max_sizes
            ));
        }
        // spool the upload to scratch space
        let upload_path = shared.cdn.upload_path(&form.name, &form.ext);
        tokio::fs::create_dir_all(shared.cdn.scratch_dir()).await?;
        tokio::fs::write(&upload_path, &form.data).await?;
        // read the intrinsic dimensions of the upload
        let intrinsic = match read_dimensions(upload_path.clone()).await {
            Ok(intrinsic) => intrinsic,
            Err(err) => {
                // nothing durable exists yet so only the scratch file needs cleanup
                unlink(&upload_path).await;
                return Err(err);
            }
        };
        // create the image record to get an id
        let image = match shared.images.create_image().await {
            Ok(image) => image,
            Err(err) => {
                unlink(&upload_path).await;
                return Err(err);
            }
        };
        let id = image.id;
        // store the original unmodified at its intrinsic size; fatal on failure
        if let Err(err) = store_variant(&id, &upload_path, &form.ext, intrinsic, shared).await {
            rollback(&id, &upload_path, shared).await;
            return Err(err);
        }
        // scale the requested sizes with a bounded worker pool
        let results: Vec<(ImageSize, Result<(), ApiError>)> =
            stream::iter(form.sizes.iter().copied())
                .map(|size| {
                    let id = &id;
                    let upload_path = &upload_path;
                    let ext = form.ext.as_str();
                    async move { (size, scale_one(id, upload_path, ext, size, shared).await) }
                })
                .buffer_unordered(scaling.workers.max(1))
                .collect()
                .await;
        // the upload scratch file is no longer needed
        unlink(&upload_path).await;
        // split the settled sizes into stored ones and failures
        let mut sizes = vec![intrinsic];
        let mut failures = 0;
        for (size, result) in results {
            match result {
                Ok(()) => sizes.push(size),
                Err(err) => {
                    // failed sizes are simply dropped from the response
                    event!(
                        Level::WARN,
                        image = %id,
                        width = size.width,
                        height = size.height,
                        error = %err,
                        msg = "Failed to scale image"
                    );
                    failures += 1;
                }
            }
        }
        // under all or nothing any failed size rolls the whole image back
        if failures > 0 && scaling.policy == ScalingPolicy::AllOrNothing {
            // clear the objects we managed to store
            for size in &sizes {
                let locator = shared.cdn.locator(&id, &form.ext, size.width, size.height);
                shared.store.remove(&locator).await;
            }
            // drop the image record and its variant rows
            if let Err(err) = shared.images.delete_image(&id).await {
                event!(Level::ERROR, image = %id, error = %err, msg = "Failed to roll back image");
            }
            return internal_err!(format!(
                "Failed to scale image to {failures} of {} sizes",
                form.sizes.len()
            ));
        }
        // a requested size equal to the intrinsic size settles as one variant
        sizes.sort_unstable();
        sizes.dedup();
        Ok(ImageUploadResponse { id, sizes })
    }

    /// Resolve the smallest stored variant at least as wide as requested
    ///
    /// Falls back to the widest stored variant when nothing is wide enough;
    /// 404 is reserved for images with no variants at all. The returned url
    /// is signed for reads and expires after the configured ttl.
    ///
    /// # Arguments
    ///
    /// * `id` - The id of the image to resolve
    /// * `min_width` - The narrowest acceptable width
    /// * `shared` - Shared Vitrine objects
    #[instrument(name = "Image::resolve", skip(shared), err(Debug))]
    pub async fn resolve(
        id: &Uuid,
        min_width: u32,
        shared: &Shared,
    ) -> Result<SignedImageResponse, ApiError> {
        // load this image's variant set ordered by ascending width
        let variants = shared.images.list_variants(id).await?;
        // pick the best fit for the requested width
        let best = match pick_variant(&variants, min_width) {
            Some(best) => best,
            None => return not_found!("Image not found".to_owned()),
        };
        // sign a read url for the chosen variant
        let ttl = shared.config.vitrine.cdn.signed_url_ttl;
        let url = shared.store.sign(&best.url, SignedMethod::Get, ttl).await?;
        Ok(SignedImageResponse {
            url,
            width: best.width,
            height: best.height,
        })
    }

    /// Delete an image, its variant rows, and its stored objects
    ///
    /// # Arguments
    ///
    /// * `id` - The id of the image to delete
    /// * `shared` - Shared Vitrine objects
    #[instrument(name = "Image::delete", skip(shared), err(Debug))]
    pub async fn delete(id: &Uuid, shared: &Shared) -> Result<(), ApiError> {
        // grab the variant set first so we can clear the blob store too
        let variants = shared.images.list_variants(id).await?;
        // drop the image record; variant rows cascade with it
        if !shared.images.delete_image(id).await? {
            return not_found!("Image not found".to_owned());
        }
        // object deletes are advisory cleanup and never fail the request
        for variant in &variants {
            shared.store.remove(&variant.url).await;
        }
        Ok(())
    }
}

/// Choose the smallest variant at least as wide as requested
///
/// Assumes the variants are ordered by ascending width. Falls back to the
/// widest available variant when none are wide enough, so a degraded image
/// beats a hard error.
///
/// # Arguments
///
/// * `variants` - The variant set ordered by ascending width
/// * `min_width` - The narrowest acceptable width
pub(crate) fn pick_variant(variants: &[ImageVariant], min_width: u32) -> Option<&ImageVariant> {
    // fall back to the widest variant we have
    let mut best = variants.last()?;
    // walk down from the widest, keeping the smallest that still fits
    for variant in variants.iter().rev() {
        if variant.width < min_width {
            break;
        }
        best = variant;
    }
    Some(best)
}

/// The content type for a normalized image extension
fn content_type(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        _ => "image/jpeg",
    }
}

/// Scale an upload to one requested size and persist it
///
/// The scratch file is removed on every exit path.
///
/// # Arguments
///
/// * `id` - The id of the image being scaled
/// * `original` - The scratch path of the original upload
/// * `ext` - The normalized file extension
/// * `size` - The size to scale too
/// * `shared` - Shared Vitrine objects
#[instrument(
    name = "backends::images::scale_one",
    skip(original, shared),
    err(Debug)
)]
async fn scale_one(
    id: &Uuid,
    original: &Path,
    ext: &str,
    size: ImageSize,
    shared: &Shared,
) -> Result<(), ApiError> {
    // resize into scratch space then upload and record the variant
    let scratch = shared.cdn.scratch_path(id, ext, size.width, size.height);
    let outcome = match resize(original.to_owned(), scratch.clone(), size).await {
        Ok(()) => store_variant(id, &scratch, ext, size, shared).await,
        Err(err) => Err(err),
    };
    unlink(&scratch).await;
    outcome
}

/// Upload a local file under its variant key and record the variant row
///
/// # Arguments
///
/// * `id` - The id of the image this variant belongs too
/// * `local` - The local file to upload
/// * `ext` - The normalized file extension
/// * `size` - The size of this variant
/// * `shared` - Shared Vitrine objects
#[instrument(
    name = "backends::images::store_variant",
    skip(local, shared),
    err(Debug)
)]
async fn store_variant(
    id: &Uuid,
    local: &Path,
    ext: &str,
    size: ImageSize,
    shared: &Shared,
) -> Result<(), ApiError> {
    // upload this rendition to the blob store
    let key = shared.cdn.object_key(id, ext, size.width, size.height);
    shared.store.upload(&key, local, content_type(ext)).await?;
    // record the variant row
    let variant = ImageVariant {
        width: size.width,
        height: size.height,
        url: shared.cdn.locator(id, ext, size.width, size.height),
    };
    // a conflicting row means this size already settled; the existing row wins
    if !shared.images.add_variant(id, &variant).await? {
        event!(
            Level::INFO,
            image = %id,
            width = size.width,
            height = size.height,
            msg = "Variant already recorded"
        );
    }
    Ok(())
}

/// Resize a local image file to an exact size on the blocking pool
///
/// # Arguments
///
/// * `original` - The file to resize
/// * `dest` - Where to write the resized file
/// * `size` - The size to scale too
async fn resize(original: PathBuf, dest: PathBuf, size: ImageSize) -> Result<(), ApiError> {
    // decoding and scaling are cpu bound so keep them off the event loop
    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        // decode the original
        let img = image::open(&original)?;
        // scale to exactly the requested size and encode to scratch space
        let scaled = img.resize_exact(size.width, size.height, FilterType::Lanczos3);
        scaled.save(&dest)?;
        Ok(())
    })
    .await?
}

/// Read the intrinsic dimensions of an image file on the blocking pool
///
/// # Arguments
///
/// * `path` - The file to read dimensions from
async fn read_dimensions(path: PathBuf) -> Result<ImageSize, ApiError> {
    tokio::task::spawn_blocking(move || {
        // this only decodes the header, not the full image
        let (width, height) = image::image_dimensions(&path)?;
        Ok(ImageSize { width, height })
    })
    .await?
}

/// Remove a scratch file
///
/// Cleanup is advisory and never fails the request.
///
/// # Arguments
///
/// * `path` - The scratch file to remove
async fn unlink(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        event!(
            Level::WARN,
            path = %path.display(),
            error = %err,
            msg = "Failed to remove scratch file"
        );
    }
}

/// Roll back a partially created image
///
/// # Arguments
///
/// * `id` - The id of the image to roll back
/// * `upload_path` - The scratch path of the original upload
/// * `shared` - Shared Vitrine objects
async fn rollback(id: &Uuid, upload_path: &Path, shared: &Shared) {
    // variant rows cascade with the image record
    if let Err(err) = shared.images.delete_image(id).await {
        event!(Level::ERROR, image = %id, error = %err, msg = "Failed to roll back image record");
    }
    unlink(upload_path).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::Conf;
    use crate::models::backends::db::ImageStore;
    use crate::utils::cdn::CdnPaths;
    use crate::utils::s3::ObjectStore;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    /// Build a variant for resolution tests
    fn variant(width: u32, height: u32) -> ImageVariant {
        ImageVariant {
            width,
            height,
            url: format!("s3://cdn-test/images/test_{width}_{height}.png"),
        }
    }

    #[test]
    fn picks_smallest_variant_wide_enough() {
        let variants = vec![variant(100, 100), variant(300, 300), variant(600, 600)];
        // 250 fits inside 300 but not 100
        assert_eq!(pick_variant(&variants, 250).unwrap().width, 300);
        // an exact match wins over anything wider
        assert_eq!(pick_variant(&variants, 300).unwrap().width, 300);
        // anything at all fits a tiny request, so the smallest wins
        assert_eq!(pick_variant(&variants, 1).unwrap().width, 100);
    }

    #[test]
    fn falls_back_to_widest_variant() {
        let variants = vec![variant(100, 100), variant(300, 300), variant(600, 600)];
        // nothing is 700 wide so degrade to the widest we have
        assert_eq!(pick_variant(&variants, 700).unwrap().width, 600);
    }

    #[test]
    fn empty_variant_sets_pick_nothing() {
        assert!(pick_variant(&[], 100).is_none());
    }

    /// An in memory record store for pipeline tests
    #[derive(Default)]
    struct MemoryImageStore {
        /// The image records that exist
        images: Mutex<HashSet<Uuid>>,
        /// The variant rows per image
        variants: Mutex<HashMap<Uuid, Vec<ImageVariant>>>,
    }

    impl MemoryImageStore {
        /// How many image records exist
        fn image_count(&self) -> usize {
            self.images.lock().unwrap().len()
        }

        /// How many variant rows exist for an image
        fn variant_count(&self, image: &Uuid) -> usize {
            self.variants
                .lock()
                .unwrap()
                .get(image)
                .map_or(0, Vec::len)
        }

        /// Preload an image and its variants
        fn preload(&self, image: Uuid, variants: Vec<ImageVariant>) {
            self.images.lock().unwrap().insert(image);
            self.variants.lock().unwrap().insert(image, variants);
        }
    }

    #[async_trait]
    impl ImageStore for MemoryImageStore {
        async fn create_image(&self) -> Result<Image, ApiError> {
            let image = Image {
                id: Uuid::new_v4(),
                created: chrono::Utc::now(),
            };
            self.images.lock().unwrap().insert(image.id);
            Ok(image)
        }

        async fn delete_image(&self, image: &Uuid) -> Result<bool, ApiError> {
            self.variants.lock().unwrap().remove(image);
            Ok(self.images.lock().unwrap().remove(image))
        }

        async fn add_variant(
            &self,
            image: &Uuid,
            variant: &ImageVariant,
        ) -> Result<bool, ApiError> {
            let mut variants = self.variants.lock().unwrap();
            let rows = variants.entry(*image).or_default();
            // mirror the unique index on (image, width, height)
            if rows
                .iter()
                .any(|row| row.width == variant.width && row.height == variant.height)
            {
                return Ok(false);
            }
            rows.push(variant.clone());
            rows.sort_by_key(|row| row.width);
            Ok(true)
        }

        async fn list_variants(&self, image: &Uuid) -> Result<Vec<ImageVariant>, ApiError> {
            Ok(self
                .variants
                .lock()
                .unwrap()
                .get(image)
                .cloned()
                .unwrap_or_default())
        }

        async fn ping(&self) -> Result<(), ApiError> {
            Ok(())
        }
    }

    /// A blob store that records uploads and can fail selected keys
    #[derive(Default)]
    struct MemoryObjectStore {
        /// The keys that have been stored
        objects: Mutex<HashSet<String>>,
        /// Key fragments that make an upload fail
        fail_keys: Mutex<HashSet<String>>,
    }

    impl MemoryObjectStore {
        /// Make uploads whose key contains this fragment fail
        fn fail_on(&self, fragment: &str) {
            self.fail_keys.lock().unwrap().insert(fragment.to_owned());
        }

        /// How many objects have been stored
        fn object_count(&self) -> usize {
            self.objects.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryObjectStore {
        async fn upload(
            &self,
            key: &str,
            _local: &Path,
            _content_type: &str,
        ) -> Result<(), ApiError> {
            // inject a blob store fault for matching keys
            let failed = self
                .fail_keys
                .lock()
                .unwrap()
                .iter()
                .any(|fragment| key.contains(fragment));
            if failed {
                return internal_err!("Injected blob store fault".to_owned());
            }
            self.objects.lock().unwrap().insert(key.to_owned());
            Ok(())
        }

        async fn sign(
            &self,
            locator: &str,
            _method: SignedMethod,
            ttl: u64,
        ) -> Result<String, ApiError> {
            Ok(format!("{locator}?expires={ttl}"))
        }

        async fn remove(&self, locator: &str) {
            // locators carry the bucket; stored keys do not
            if let Some(key) = locator
                .strip_prefix("s3://")
                .and_then(|rest| rest.split_once('/'))
                .map(|(_, key)| key.to_owned())
            {
                self.objects.lock().unwrap().remove(&key);
            }
        }
    }

    /// Build shared objects around in memory stores
    fn test_shared(
        policy: ScalingPolicy,
        images: Arc<MemoryImageStore>,
        store: Arc<MemoryObjectStore>,
    ) -> Shared {
        // give each test its own scratch dir
        let scratch = std::env::temp_dir().join(format!("vitrine-test-{}", Uuid::new_v4()));
        let mut config = Conf::test_defaults("cdn-test", &scratch.to_string_lossy());
        config.vitrine.scaling.policy = policy;
        let cdn = CdnPaths::new(&config);
        Shared {
            config,
            images,
            store,
            cdn,
        }
    }

    /// Build an upload form holding a real 64x48 png
    fn png_form(sizes: Vec<ImageSize>) -> ImageUploadForm {
        // render a tiny png in memory
        let img = image::RgbaImage::from_pixel(64, 48, image::Rgba([120, 30, 30, 255]));
        let mut raw = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut raw, image::ImageFormat::Png)
            .unwrap();
        ImageUploadForm {
            name: "test".to_owned(),
            ext: "png".to_owned(),
            data: Bytes::from(raw.into_inner()),
            sizes,
        }
    }

    /// The intrinsic size of the test png
    const INTRINSIC: ImageSize = ImageSize {
        width: 64,
        height: 48,
    };

    #[tokio::test]
    async fn upload_scales_all_requested_sizes() {
        let images = Arc::new(MemoryImageStore::default());
        let store = Arc::new(MemoryObjectStore::default());
        let shared = test_shared(ScalingPolicy::BestEffort, images.clone(), store.clone());
        let sizes = vec![
            ImageSize {
                width: 32,
                height: 32,
            },
            ImageSize {
                width: 16,
                height: 16,
            },
        ];
        let resp = Image::create(png_form(sizes.clone()), &shared).await.unwrap();
        // the response lists the intrinsic size plus both requested sizes
        assert_eq!(resp.sizes.len(), 3);
        assert!(resp.sizes.contains(&INTRINSIC));
        assert!(resp.sizes.contains(&sizes[0]));
        assert!(resp.sizes.contains(&sizes[1]));
        // every listed size has a durable row and a stored object
        assert_eq!(images.variant_count(&resp.id), 3);
        assert_eq!(store.object_count(), 3);
        // every listed width resolves back through the resolution service
        for size in &resp.sizes {
            let resolved = Image::resolve(&resp.id, size.width, &shared).await.unwrap();
            assert_eq!(resolved.width, size.width);
        }
    }

    #[tokio::test]
    async fn upload_drops_failed_sizes_best_effort() {
        let images = Arc::new(MemoryImageStore::default());
        let store = Arc::new(MemoryObjectStore::default());
        // make the 32x32 rendition fail to upload
        store.fail_on("_32_32");
        let shared = test_shared(ScalingPolicy::BestEffort, images.clone(), store.clone());
        let sizes = vec![
            ImageSize {
                width: 32,
                height: 32,
            },
            ImageSize {
                width: 16,
                height: 16,
            },
        ];
        let resp = Image::create(png_form(sizes), &shared).await.unwrap();
        // the request still succeeds with the failed size dropped
        assert_eq!(resp.sizes.len(), 2);
        assert!(resp.sizes.contains(&INTRINSIC));
        assert!(resp.sizes.contains(&ImageSize {
            width: 16,
            height: 16
        }));
        // the dropped size has no row either
        assert_eq!(images.variant_count(&resp.id), 2);
    }

    #[tokio::test]
    async fn upload_rolls_back_on_original_failure() {
        let images = Arc::new(MemoryImageStore::default());
        let store = Arc::new(MemoryObjectStore::default());
        // make the intrinsic rendition fail to upload
        store.fail_on("_64_48");
        let shared = test_shared(ScalingPolicy::BestEffort, images.clone(), store.clone());
        let err = Image::create(
            png_form(vec![ImageSize {
                width: 16,
                height: 16,
            }]),
            &shared,
        )
        .await
        .unwrap_err();
        // an original upload failure is fatal to the whole request
        assert_eq!(err.code, StatusCode::INTERNAL_SERVER_ERROR);
        // the image record created at step one did not survive
        assert_eq!(images.image_count(), 0);
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn all_or_nothing_rolls_back_on_any_failure() {
        let images = Arc::new(MemoryImageStore::default());
        let store = Arc::new(MemoryObjectStore::default());
        // the original succeeds but one requested size fails
        store.fail_on("_16_16");
        let shared = test_shared(ScalingPolicy::AllOrNothing, images.clone(), store.clone());
        let sizes = vec![
            ImageSize {
                width: 32,
                height: 32,
            },
            ImageSize {
                width: 16,
                height: 16,
            },
        ];
        let err = Image::create(png_form(sizes), &shared).await.unwrap_err();
        assert_eq!(err.code, StatusCode::INTERNAL_SERVER_ERROR);
        // nothing survives, not even the intrinsic rendition
        assert_eq!(images.image_count(), 0);
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn upload_rejects_oversized_size_lists() {
        let images = Arc::new(MemoryImageStore::default());
        let store = Arc::new(MemoryObjectStore::default());
        let shared = test_shared(ScalingPolicy::BestEffort, images.clone(), store.clone());
        // request one more size than the cap allows
        let sizes = (1..=6)
            .map(|scale| ImageSize {
                width: scale * 10,
                height: scale * 10,
            })
            .collect();
        let err = Image::create(png_form(sizes), &shared).await.unwrap_err();
        assert_eq!(err.code, StatusCode::BAD_REQUEST);
        // no image record was created
        assert_eq!(images.image_count(), 0);
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn resolution_picks_and_signs_the_best_fit() {
        let images = Arc::new(MemoryImageStore::default());
        let store = Arc::new(MemoryObjectStore::default());
        let shared = test_shared(ScalingPolicy::BestEffort, images.clone(), store.clone());
        // preload an image with 100/300/600 wide variants
        let id = Uuid::new_v4();
        images.preload(
            id,
            vec![variant(100, 100), variant(300, 300), variant(600, 600)],
        );
        // 250 resolves to the 300 wide variant
        let resolved = Image::resolve(&id, 250, &shared).await.unwrap();
        assert_eq!(resolved.width, 300);
        // the signed url carries the configured ttl
        assert!(resolved.url.ends_with("?expires=60"));
        // 700 degrades to the widest variant we have
        let resolved = Image::resolve(&id, 700, &shared).await.unwrap();
        assert_eq!(resolved.width, 600);
    }

    #[tokio::test]
    async fn resolution_404s_without_variants() {
        let images = Arc::new(MemoryImageStore::default());
        let store = Arc::new(MemoryObjectStore::default());
        let shared = test_shared(ScalingPolicy::BestEffort, images, store);
        let err = Image::resolve(&Uuid::new_v4(), 100, &shared)
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_cascades_and_404s_when_missing() {
        let images = Arc::new(MemoryImageStore::default());
        let store = Arc::new(MemoryObjectStore::default());
        let shared = test_shared(ScalingPolicy::BestEffort, images.clone(), store.clone());
        // upload an image then delete it
        let resp = Image::create(
            png_form(vec![ImageSize {
                width: 16,
                height: 16,
            }]),
            &shared,
        )
        .await
        .unwrap();
        Image::delete(&resp.id, &shared).await.unwrap();
        // the rows and objects are gone
        assert_eq!(images.image_count(), 0);
        assert_eq!(store.object_count(), 0);
        // a second delete is a 404
        let err = Image::delete(&resp.id, &shared).await.unwrap_err();
        assert_eq!(err.code, StatusCode::NOT_FOUND);
    }
}
