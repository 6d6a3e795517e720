//! Handles image files in s3

use async_trait::async_trait;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client, config::Credentials};
use std::path::Path;
use std::time::Duration;
use tracing::{Level, event, instrument};

use super::ApiError;
use crate::{bad, internal_err};

/// The HTTP verb a signed url grants access with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedMethod {
    /// The signed url allows reads
    Get,
    /// The signed url allows writes
    Put,
    /// The signed url allows deletes
    Delete,
}

/// A blob store for image variants
///
/// Injected into the pipeline so backends can be tested against fakes
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file to the given key
    ///
    /// # Arguments
    ///
    /// * `key` - The key to store this object under
    /// * `local` - The local file to upload
    /// * `content_type` - The content type to set for this object
    async fn upload(&self, key: &str, local: &Path, content_type: &str) -> Result<(), ApiError>;

    /// Create a time limited signed url for a stored object
    ///
    /// # Arguments
    ///
    /// * `locator` - A locator of the form `s3://bucket/key`
    /// * `method` - The HTTP verb the signed url should grant
    /// * `ttl` - How long the url is valid for in seconds
    async fn sign(&self, locator: &str, method: SignedMethod, ttl: u64)
    -> Result<String, ApiError>;

    /// Delete a stored object by locator
    ///
    /// Deletions are advisory cleanup and never fail the caller.
    ///
    /// # Arguments
    ///
    /// * `locator` - A locator of the form `s3://bucket/key`
    async fn remove(&self, locator: &str);
}

/// Split a locator of the form `s3://bucket/key` into its bucket and key
fn split_locator(locator: &str) -> Result<(&str, &str), ApiError> {
    // strip the scheme off our locator
    let trimmed = match locator.strip_prefix("s3://") {
        Some(trimmed) => trimmed,
        None => return internal_err!(format!("'{locator}' is not a valid locator")),
    };
    // everything before the first slash is the bucket
    match trimmed.split_once('/') {
        Some((bucket, key)) => Ok((bucket, key)),
        None => internal_err!(format!("'{locator}' is missing an object key")),
    }
}

/// An s3 client wrapper
pub struct S3Client {
    /// The bucket to write image variants too
    pub bucket: String,
    /// The aws sdk s3 client
    pub client: Client,
}

impl S3Client {
    /// Build a new s3 client
    ///
    /// # Arguments
    ///
    /// * `bucket` - The bucket to write image variants too
    /// * `conf` - The s3 config options
    #[must_use]
    pub fn new(bucket: &str, conf: &crate::conf::S3) -> Self {
        // get our s3 credentials
        let creds = Credentials::new(&conf.access_key, &conf.secret_token, None, None, "Vitrine");
        // build our s3 config
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .endpoint_url(&conf.endpoint)
            .credentials_provider(SharedCredentialsProvider::new(creds))
            .force_path_style(conf.use_path_style);
        // if we have a region set then add that to our config
        if let Some(region) = &conf.region {
            // set our region
            s3_config_builder =
                s3_config_builder.region(aws_types::region::Region::new(region.clone()));
        }
        // build our s3 config
        let s3_config = s3_config_builder.build();
        // build our s3 client
        let client = Client::from_conf(s3_config);
        S3Client {
            bucket: bucket.to_owned(),
            client,
        }
    }

}

#[async_trait]
impl ObjectStore for S3Client {
    /// Upload a local file to the given key
    ///
    /// # Arguments
    ///
    /// * `key` - The key to store this object under
    /// * `local` - The local file to upload
    /// * `content_type` - The content type to set for this object
    #[instrument(name = "S3Client::upload", skip(self), err(Debug))]
    async fn upload(&self, key: &str, local: &Path, content_type: &str) -> Result<(), ApiError> {
        // ban any keys that might contain traversal attacks
        if key.contains("..") {
            return bad!("S3 file names cannot contain '..'".to_owned());
        }
        // stream this file from disk
        let body = ByteStream::from_path(local).await?;
        // write this file to s3
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    /// Create a time limited signed url for a stored object
    ///
    /// # Arguments
    ///
    /// * `locator` - A locator of the form `s3://bucket/key`
    /// * `method` - The HTTP verb the signed url should grant
    /// * `ttl` - How long the url is valid for in seconds
    #[instrument(name = "S3Client::sign", skip(self), err(Debug))]
    async fn sign(
        &self,
        locator: &str,
        method: SignedMethod,
        ttl: u64,
    ) -> Result<String, ApiError> {
        // split our locator into its bucket and key
        let (bucket, key) = split_locator(locator)?;
        // build the expiry for this url
        let signing = PresigningConfig::expires_in(Duration::from_secs(ttl))?;
        // presign the request for the verb the caller asked for
        let url = match method {
            SignedMethod::Get => self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(signing)
                .await?
                .uri()
                .to_string(),
            SignedMethod::Put => self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .presigned(signing)
                .await?
                .uri()
                .to_string(),
            SignedMethod::Delete => self
                .client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .presigned(signing)
                .await?
                .uri()
                .to_string(),
        };
        Ok(url)
    }

    /// Delete a stored object by locator
    ///
    /// # Arguments
    ///
    /// * `locator` - A locator of the form `s3://bucket/key`
    #[instrument(name = "S3Client::remove", skip(self))]
    async fn remove(&self, locator: &str) {
        // split our locator into its bucket and key
        let parts = match split_locator(locator) {
            Ok(parts) => parts,
            Err(err) => {
                event!(Level::WARN, locator, error = %err, msg = "Skipping delete");
                return;
            }
        };
        // try to delete this object but never surface a failure
        let deleted = self
            .client
            .delete_object()
            .bucket(parts.0)
            .key(parts.1)
            .send()
            .await;
        if let Err(err) = deleted {
            event!(Level::WARN, locator, error = %err, msg = "Failed to delete object");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::split_locator;

    #[test]
    fn split_locators() {
        // well formed locators split into bucket and key
        let (bucket, key) = split_locator("s3://cdn/images/abc_100_100.png").unwrap();
        assert_eq!(bucket, "cdn");
        assert_eq!(key, "images/abc_100_100.png");
    }

    #[test]
    fn reject_malformed_locators() {
        // a missing scheme or key is an error
        assert!(split_locator("cdn/images/abc.png").is_err());
        assert!(split_locator("s3://just-a-bucket").is_err());
    }
}
