//! Shared utilities for the Vitrine API

pub mod cdn;
mod errors;
pub mod s3;
pub mod trace;

pub use errors::ApiError;

use std::sync::Arc;

use cdn::CdnPaths;
use s3::{ObjectStore, S3Client};

use crate::Conf;
use crate::models::backends::db::{ImageStore, PgImageStore};

/// Shared Vitrine objects
pub struct Shared {
    /// The Vitrine config
    pub config: Conf,
    /// The record store for image rows
    pub images: Arc<dyn ImageStore>,
    /// The blob store for image files
    pub store: Arc<dyn ObjectStore>,
    /// The namer for variant keys and scratch paths
    pub cdn: CdnPaths,
}

impl Shared {
    /// Build our shared objects and connect to our databases
    ///
    /// # Arguments
    ///
    /// * `config` - The Vitrine config
    ///
    /// # Panics
    ///
    /// Will panic if we cannot connect to the record store or run migrations.
    pub async fn new(config: Conf) -> Self {
        // build a connection pool to the record store
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.vitrine.db.pool_size)
            .connect(&config.vitrine.db.url)
            .await
            .expect("Failed to connect to the record store");
        // apply any outstanding migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        // build our blob store client
        let store = S3Client::new(&config.vitrine.cdn.bucket, &config.vitrine.s3);
        // build our variant namer
        let cdn = CdnPaths::new(&config);
        Shared {
            config,
            images: Arc::new(PgImageStore::new(pool)),
            store: Arc::new(store),
            cdn,
        }
    }
}

/// The state to pass to our axum handlers
#[derive(Clone)]
pub struct AppState {
    /// Shared Vitrine objects
    pub shared: Arc<Shared>,
}

impl AppState {
    /// Build our app state
    ///
    /// # Arguments
    ///
    /// * `shared` - Shared Vitrine objects
    #[must_use]
    pub fn new(shared: Shared) -> Self {
        AppState {
            shared: Arc::new(shared),
        }
    }
}
