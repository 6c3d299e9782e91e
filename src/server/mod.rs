pub mod cors;
pub mod handlers;
pub mod rate_limit;
pub mod state;
pub mod url_validation;

use crate::{config::Config, error::GatewayError};
use axum::{
    Router,
    http::{HeaderName, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use state::AppState;
use std::any::Any;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

/// Build the full router for the given configuration.
///
/// Layer order, outermost first: version header, CORS headers, rate limiter,
/// panic catcher. CORS sits outside everything else so 400/429/502 answers
/// and converted panics all carry it.
pub fn build_router(config: Config) -> Result<Router, GatewayError> {
    let state = AppState::new(config)?;
    Ok(router_with_state(state))
}

fn router_with_state(state: AppState) -> Router {
    let proxy_path = state.config.proxy_path.clone();

    let router = Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::serve_metrics))
        .route(
            &proxy_path,
            get(handlers::proxy::proxy_stream).options(handlers::proxy::preflight),
        )
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_middleware,
        ));

    cors::apply(router)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-livegate-version"),
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        ))
        .with_state(state)
}

/// Convert a handler panic into a 502 instead of dropping the connection.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {}", detail);
    (StatusCode::BAD_GATEWAY, "Proxy error: internal failure").into_response()
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);

    let state = AppState::new(config)?;

    // Sweep expired rate-limit windows so the counter map stays bounded.
    if let Some(limiter) = state.rate_limiter.clone() {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                limiter.cleanup();
            }
        });
    }

    info!(
        "Gateway mounted at {} (upstream timeout {}s)",
        state.config.proxy_path, state.config.upstream_timeout_secs
    );

    let app = router_with_state(state);

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("🚀 Server listening on http://{}", addr);

    // Peer addresses key the rate limiter when no proxy headers are present.
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, service).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
