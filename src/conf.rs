//! The config for the Vitrine API

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

/// The interface to bind to by default
fn default_interface() -> String {
    "0.0.0.0".to_owned()
}

/// The port to bind to by default
fn default_port() -> u16 {
    3000
}

/// The number of record store connections to pool by default
fn default_pool_size() -> u32 {
    8
}

/// The key prefix image variants are stored under by default
fn default_image_path() -> String {
    "images".to_owned()
}

/// How long signed urls last by default in seconds
fn default_signed_url_ttl() -> u64 {
    60
}

/// The scratch dir uploads and resizes are spooled to by default
fn default_scratch() -> PathBuf {
    PathBuf::from("/tmp/vitrine")
}

/// The largest request body to accept by default (50 MiB)
fn default_upload_limit() -> usize {
    50 * 1024 * 1024
}

/// The most sizes one upload may request by default
fn default_max_sizes() -> usize {
    5
}

/// How many resize tasks may be in flight per upload by default
fn default_workers() -> usize {
    4
}

/// The tracing directives to apply by default
fn default_filter() -> String {
    "info".to_owned()
}

/// The config for the Vitrine API
#[derive(Debug, Clone, Deserialize)]
pub struct Conf {
    /// The Vitrine settings
    pub vitrine: Vitrine,
}

impl Conf {
    /// Load our config from a file and the environment
    ///
    /// Environment variables prefixed with `VITRINE` override file values.
    ///
    /// # Arguments
    ///
    /// * `path` - The path to load a config file from
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("VITRINE").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Build a config suitable for unit tests
    ///
    /// # Arguments
    ///
    /// * `bucket` - The bucket name to use
    /// * `scratch` - The scratch dir to use
    #[cfg(test)]
    #[must_use]
    pub fn test_defaults(bucket: &str, scratch: &str) -> Self {
        Conf {
            vitrine: Vitrine {
                interface: default_interface(),
                port: default_port(),
                db: Db {
                    url: String::new(),
                    pool_size: 1,
                },
                s3: S3 {
                    access_key: String::new(),
                    secret_token: String::new(),
                    endpoint: String::new(),
                    region: None,
                    use_path_style: true,
                },
                cdn: Cdn {
                    bucket: bucket.to_owned(),
                    image_path: default_image_path(),
                    signed_url_ttl: default_signed_url_ttl(),
                    scratch: PathBuf::from(scratch),
                    upload_limit: default_upload_limit(),
                },
                scaling: Scaling::default(),
                cors: Cors::default(),
                tracing: Tracing::default(),
            },
        }
    }
}

/// The settings for the Vitrine API
#[derive(Debug, Clone, Deserialize)]
pub struct Vitrine {
    /// The interface to bind to
    #[serde(default = "default_interface")]
    pub interface: String,
    /// The port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// The record store settings
    pub db: Db,
    /// The s3 connection settings
    pub s3: S3,
    /// The CDN settings
    pub cdn: Cdn,
    /// The image scaling settings
    #[serde(default)]
    pub scaling: Scaling,
    /// The cors settings
    #[serde(default)]
    pub cors: Cors,
    /// The tracing settings
    #[serde(default)]
    pub tracing: Tracing,
}

/// The settings for the record store
#[derive(Debug, Clone, Deserialize)]
pub struct Db {
    /// The url to connect to postgres with
    pub url: String,
    /// The number of connections to pool
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// The settings for connecting to s3
#[derive(Debug, Clone, Deserialize)]
pub struct S3 {
    /// The access key to authenticate with
    pub access_key: String,
    /// The secret token to authenticate with
    pub secret_token: String,
    /// The endpoint to connect to
    pub endpoint: String,
    /// The region our buckets live in if one is needed
    #[serde(default)]
    pub region: Option<String>,
    /// Whether to use path style bucket addressing
    #[serde(default)]
    pub use_path_style: bool,
}

/// The settings for the CDN
#[derive(Debug, Clone, Deserialize)]
pub struct Cdn {
    /// The bucket image variants are stored in
    pub bucket: String,
    /// The key prefix image variants are stored under
    #[serde(default = "default_image_path")]
    pub image_path: String,
    /// How long signed urls last in seconds
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl: u64,
    /// The scratch dir uploads and resizes are spooled to
    #[serde(default = "default_scratch")]
    pub scratch: PathBuf,
    /// The largest request body to accept in bytes
    #[serde(default = "default_upload_limit")]
    pub upload_limit: usize,
}

/// How per size failures during an upload are recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingPolicy {
    /// Failed sizes are dropped from the response and the rest are kept
    BestEffort,
    /// Any failed size rolls the entire upload back
    AllOrNothing,
}

/// The settings for scaling uploads
#[derive(Debug, Clone, Deserialize)]
pub struct Scaling {
    /// How per size failures are recovered
    #[serde(default = "Scaling::default_policy")]
    pub policy: ScalingPolicy,
    /// The most sizes one upload may request
    #[serde(default = "default_max_sizes")]
    pub max_sizes: usize,
    /// How many resize tasks may be in flight per upload
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Scaling {
    /// Scale uploads best effort by default
    fn default_policy() -> ScalingPolicy {
        ScalingPolicy::BestEffort
    }
}

impl Default for Scaling {
    /// Build default scaling settings
    fn default() -> Self {
        Scaling {
            policy: Scaling::default_policy(),
            max_sizes: default_max_sizes(),
            workers: default_workers(),
        }
    }
}

/// The settings for cors
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cors {
    /// Whether to allow any origin
    #[serde(default)]
    pub insecure: bool,
    /// The domains to allow requests from
    #[serde(default)]
    pub domains: Vec<String>,
}

/// The settings for tracing
#[derive(Debug, Clone, Deserialize)]
pub struct Tracing {
    /// The default filter directives to apply
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for Tracing {
    /// Build default tracing settings
    fn default() -> Self {
        Tracing {
            filter: default_filter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Conf, ScalingPolicy, default_upload_limit};

    #[test]
    fn request_bodies_are_bounded_by_default() {
        // uploads are buffered so the request body must carry a cap
        let conf = Conf::test_defaults("cdn-test", "/tmp/vitrine-test");
        assert_eq!(conf.vitrine.cdn.upload_limit, default_upload_limit());
        assert!(conf.vitrine.cdn.upload_limit > 0);
    }

    #[test]
    fn policies_deserialize_from_kebab_case() {
        // the policy enum is spelled in kebab case in config files
        let policy: ScalingPolicy = serde_json::from_str("\"best-effort\"").unwrap();
        assert_eq!(policy, ScalingPolicy::BestEffort);
        let policy: ScalingPolicy = serde_json::from_str("\"all-or-nothing\"").unwrap();
        assert_eq!(policy, ScalingPolicy::AllOrNothing);
    }
}
