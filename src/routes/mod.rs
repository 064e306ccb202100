use axum::{
    http::{header, Method},
    routing::get,
    Extension, Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::relay::Relay;

pub mod ws;

/// The upgrade endpoint lives at `ws_path`; nothing else is routed.
pub fn router(ws_path: &str, relay: Relay) -> Router {
    Router::new()
        .route(ws_path, get(ws::ws_handler))
        .layer(Extension(relay))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
}

/* any origin, mirrored so credentials stay allowed */
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
