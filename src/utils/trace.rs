//! Sets up tracing for the Vitrine API

use tracing_subscriber::EnvFilter;

/// Setup our tracing subscriber
///
/// `RUST_LOG` wins over the configured directives when it is set.
///
/// # Arguments
///
/// * `filter` - The default filter directives from our config
pub fn setup(filter: &str) {
    // fall back to the configured directives when the env is silent
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
