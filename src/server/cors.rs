//! Permissive CORS headers on every response.
//!
//! Browsers call the gateway from arbitrary origins (site pages, embedded
//! players), so the three `Access-Control-Allow-*` headers are set
//! unconditionally, error responses included. Preflight answers come from
//! [`preflight`](super::handlers::proxy::preflight).

use axum::{
    Router,
    http::{HeaderName, HeaderValue, header},
};
use tower_http::set_header::SetResponseHeaderLayer;

/// Header name/value pairs attached to every gateway response.
pub const CORS_HEADERS: [(HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
];

/// Wrap `router` so each response carries [`CORS_HEADERS`].
pub fn apply<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    CORS_HEADERS.into_iter().fold(router, |router, (name, value)| {
        router.layer(SetResponseHeaderLayer::overriding(
            name,
            HeaderValue::from_static(value),
        ))
    })
}
