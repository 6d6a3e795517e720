//! The models for the Vitrine API

pub mod backends;
mod images;

pub use images::{
    Image, ImageSize, ImageUploadForm, ImageUploadResponse, ImageVariant, SignedImageResponse,
    parse_sizes, sniff_file_type,
};
