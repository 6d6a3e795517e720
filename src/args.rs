//! The command line args for the Vitrine API

use clap::Parser;

/// The command line args passed to the Vitrine API
#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct Args {
    /// The path to load the Vitrine config file from
    #[clap(short, long, default_value = "vitrine.yml")]
    pub config: String,
}
