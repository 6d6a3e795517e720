//! Models for images and their scaled variants

use axum::extract::Multipart;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::bad;
use crate::utils::ApiError;

/// A width/height pair an image can be scaled to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub struct ImageSize {
    /// The width in pixels
    pub width: u32,
    /// The height in pixels
    pub height: u32,
}

/// A stored rendition of an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImageVariant {
    /// The width of this rendition in pixels
    pub width: u32,
    /// The height of this rendition in pixels
    pub height: u32,
    /// The opaque locator this rendition is stored at
    pub url: String,
}

impl ImageVariant {
    /// The size of this rendition
    #[must_use]
    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.width,
            height: self.height,
        }
    }
}

/// An image record owning zero or more scaled variants
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Image {
    /// The id of this image
    pub id: Uuid,
    /// When this image was uploaded
    pub created: DateTime<Utc>,
}

/// An uploaded image and the sizes that were durably stored
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImageUploadResponse {
    /// The id of the uploaded image
    pub id: Uuid,
    /// The sizes that were stored, intrinsic size included
    pub sizes: Vec<ImageSize>,
}

/// A signed url for the variant closest to a requested width
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignedImageResponse {
    /// A time limited signed url granting read access
    pub url: String,
    /// The actual width of the returned variant
    pub width: u32,
    /// The actual height of the returned variant
    pub height: u32,
}

/// A validated image upload form
#[derive(Debug, Clone)]
pub struct ImageUploadForm {
    /// The uploaded file's name without its extension
    pub name: String,
    /// The normalized file extension ("jpg" or "png")
    pub ext: String,
    /// The raw bytes of the uploaded file
    pub data: Bytes,
    /// The sizes to scale this upload to
    pub sizes: Vec<ImageSize>,
}

impl ImageUploadForm {
    /// Extract and validate an upload form from multipart data
    ///
    /// Rejects anything that is not a JPEG or PNG before any storage side
    /// effect can happen.
    ///
    /// # Arguments
    ///
    /// * `form` - The multipart form to extract from
    /// * `max_sizes` - The most sizes one upload may request
    pub async fn from_multipart(mut form: Multipart, max_sizes: usize) -> Result<Self, ApiError> {
        // the fields we need to find in this form
        let mut file: Option<(String, String, Bytes)> = None;
        let mut sizes_raw: Option<String> = None;
        // walk the fields in this form
        while let Some(field) = form.next_field().await? {
            // get this field's name
            let name = field.name().map(ToOwned::to_owned);
            match name.as_deref() {
                Some("file") => {
                    // we need the file name to check its extension
                    let file_name = match field.file_name() {
                        Some(file_name) => file_name.to_owned(),
                        None => return bad!("'file' is missing a file name".to_owned()),
                    };
                    // we need the declared content type to check the encoding
                    let mime = match field.content_type() {
                        Some(mime) => mime.to_owned(),
                        None => return bad!("'file' is missing a content type".to_owned()),
                    };
                    // buffer the uploaded bytes
                    let data = field.bytes().await?;
                    file = Some((file_name, mime, data));
                }
                Some("sizes") => sizes_raw = Some(field.text().await?),
                // ignore any fields we don't care about
                _ => continue,
            }
        }
        // both fields are required
        let (file_name, mime, data) = match file {
            Some(file) => file,
            None => return bad!("Missing 'file' parameter".to_owned()),
        };
        let raw = match sizes_raw {
            Some(raw) => raw,
            None => return bad!("Missing 'sizes' parameter".to_owned()),
        };
        // parse and bound the requested sizes
        let sizes = parse_sizes(&raw, max_sizes)?;
        // check this upload is an encoding we support
        let (name, ext) = sniff_file_type(&file_name, &mime)?;
        Ok(ImageUploadForm {
            name,
            ext,
            data,
            sizes,
        })
    }
}

/// Parse and bound a requested sizes list
///
/// # Arguments
///
/// * `raw` - The raw JSON sizes list from the form
/// * `max` - The most sizes one upload may request
pub fn parse_sizes(raw: &str, max: usize) -> Result<Vec<ImageSize>, ApiError> {
    // the sizes field is a JSON array of width/height pairs
    let sizes: Vec<ImageSize> = serde_json::from_str(raw)?;
    // bound how many sizes one upload may fan out to
    if sizes.len() > max {
        return bad!(format!("'sizes' must be an array of at most {max} elements"));
    }
    // zero sized variants can never be stored
    if sizes.iter().any(|size| size.width == 0 || size.height == 0) {
        return bad!("'sizes' dimensions must be positive".to_owned());
    }
    Ok(sizes)
}

/// Check an upload is a JPEG or PNG by its declared type and extension
///
/// Returns the file's base name and its normalized extension. Any directory
/// components in the client supplied name are stripped so the returned base
/// name is always safe to join under the scratch dir.
///
/// # Arguments
///
/// * `file_name` - The uploaded file's name
/// * `mime` - The declared content type
pub fn sniff_file_type(file_name: &str, mime: &str) -> Result<(String, String), ApiError> {
    // clients control this name so only its basename can steer a disk path
    let base = std::path::Path::new(file_name)
        .file_name()
        .and_then(|base| base.to_str());
    let base = match base {
        Some(base) => base,
        None => return bad!(format!("'{file_name}' is not a valid file name")),
    };
    // split the extension off the file name
    let (name, ext) = match base.rsplit_once('.') {
        Some(parts) => parts,
        None => return bad!(format!("'{file_name}' is missing a file extension")),
    };
    let ext = ext.to_ascii_lowercase();
    // both the extension and the declared type must be jpeg or png
    let ext_ok = matches!(ext.as_str(), "jpg" | "jpeg" | "png");
    let mime_ok = match mime.parse::<mime::Mime>() {
        Ok(parsed) => {
            parsed.type_() == mime::IMAGE
                && matches!(parsed.subtype().as_str(), "jpeg" | "jpg" | "png")
        }
        Err(_) => false,
    };
    if !ext_ok || !mime_ok {
        return bad!(format!(
            "File upload only supports jpeg and png files, not '{mime}'"
        ));
    }
    // normalize jpeg to jpg so variants of one image share an extension
    let ext = if ext == "jpeg" { "jpg".to_owned() } else { ext };
    Ok((name.to_owned(), ext))
}
