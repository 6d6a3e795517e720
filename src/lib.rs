//! The Vitrine image CDN API
//!
//! Accepts image uploads, scales them to the requested sizes, stores every
//! rendition in a blob store, and resolves time limited signed urls by
//! nearest width.

pub mod args;
pub mod conf;
pub mod models;
mod routes;
pub mod utils;

pub use conf::Conf;

use std::net::{IpAddr, SocketAddr};

use axum::http::Method;
use axum::http::header::{HeaderName, HeaderValue};
use tower_http::cors::CorsLayer;
use tracing::{Level, event};

/// Set a fallback that returns a 404 to disable
async fn disable_fallback() -> axum::http::StatusCode {
    axum::http::StatusCode::NOT_FOUND
}

/// Build the axum app
///
/// # Arguments
///
/// * `state` - The state to pass to our handlers
/// * `conf` - The Vitrine config
fn build_app(state: utils::AppState, conf: &Conf) -> axum::Router {
    use axum::extract::DefaultBodyLimit;
    use axum::{http::Request, response::Response};
    use std::time::Duration;
    use tower_http::set_header::SetResponseHeaderLayer;
    use tower_http::trace::{DefaultMakeSpan, TraceLayer};
    use tracing::Span;

    // build an axum router
    let mut app = axum::Router::new();
    // build a router for our api routes
    let mut api_router = axum::Router::new()
        // disable the fallback for api routes
        .fallback(disable_fallback);
    // add all of our api routes to our api router
    api_router = routes::basic::mount(api_router);
    api_router = routes::docs::mount(api_router);
    api_router = routes::images::mount(api_router);
    // add our api routes
    app = app.nest("/api", api_router);
    // build cors middleware for our app
    let cors = if conf.vitrine.cors.insecure {
        CorsLayer::permissive()
    } else {
        // start building our cors settings and allow all methods we use
        let cors = CorsLayer::new().allow_methods([Method::GET, Method::POST, Method::DELETE]);
        // cast the domains we want to add to the correct type
        let origins = conf
            .vitrine
            .cors
            .domains
            .iter()
            .map(|domain| domain.parse())
            .collect::<Result<Vec<HeaderValue>, _>>()
            .expect("Failed to parse CORS domains");
        cors.allow_origin(origins)
    };
    // add middleware to our app
    app = app
        .layer(DefaultBodyLimit::max(conf.vitrine.cdn.upload_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(|req: &Request<_>, span: &Span| {
                    // get our uri as a str
                    let url_and_query = match req.uri().path_and_query() {
                        Some(path_and_query) => path_and_query.as_str(),
                        None => req.uri().path(),
                    };
                    // get our base url as a str
                    let url = req.uri().path();
                    event!(
                        parent: span,
                        Level::INFO,
                        url = url,
                        uri = url_and_query,
                        msg = "Starting Request"
                    );
                })
                .on_response(|response: &Response, latency: Duration, span: &Span| {
                    // get our status code
                    let code = response.status();
                    // build our response event
                    event!(
                        parent: span,
                        Level::INFO,
                        code = code.as_u16(),
                        status = code.as_str(),
                        latency = latency.as_millis(),
                        msg = "Responding to Request"
                    );
                }),
        )
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("vitrine-version"),
            HeaderValue::from_str(env!("CARGO_PKG_VERSION"))
                .expect("Vitrine version is not a valid header value"),
        ));
    app.with_state(state)
}

/// Launches the Vitrine api using axum
///
/// # Arguments
///
/// * `config` - The Vitrine config
///
/// # Panics
///
/// Will panic if we cannot connect to our databases or bind our listener.
pub async fn axum(config: Conf) {
    // setup shared objects and connect to our databases
    let shared = utils::Shared::new(config.clone()).await;
    // clear any scratch files a previous run left behind
    match utils::cdn::sweep_scratch(shared.cdn.scratch_dir()).await {
        Ok(swept) if swept > 0 => {
            event!(Level::INFO, swept, msg = "Removed leftover scratch files");
        }
        Ok(_) => (),
        Err(err) => {
            event!(Level::WARN, error = %err, msg = "Failed to sweep the scratch dir");
        }
    }
    // build our app state
    let state = utils::AppState::new(shared);
    // build our app
    let app = build_app(state, &config);
    // parse our interface addr
    let bind_addr: IpAddr = config
        .vitrine
        .interface
        .parse()
        .expect("Failed to parse interface addr");
    // get the address and port to bind too
    let addr = SocketAddr::new(bind_addr, config.vitrine.port);
    event!(Level::INFO, interface = %addr, msg = "Starting the Vitrine API");
    // bind the listener for our server
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {addr}"));
    // start handling requests
    axum::serve(listener, app)
        .await
        .expect("Failed to serve the Vitrine API");
}
