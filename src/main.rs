//! Launches the Vitrine image API

use clap::Parser;
use vitrine::Conf;
use vitrine::args::Args;

#[tokio::main]
async fn main() {
    // parse our command line args
    let args = Args::parse();
    // load our config
    let conf = Conf::new(&args.config).expect("Failed to load config");
    // setup tracing
    vitrine::utils::trace::setup(&conf.vitrine.tracing.filter);
    // start the api
    vitrine::axum(conf).await;
}
