//! Transport-level middleware applied to every HTTP route.
//!
//! Listed outermost first: the first layer sees the request first and the
//! response last.

use axum::http::{Method, StatusCode};
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;
use crate::service::middleware::observability::{CORRELATION_ID_HEADER, REQUEST_ID_HEADER};

/// Layer stack produced by [`build_http_layers`], innermost first.
type HttpLayers = Stack<
    TimeoutLayer,
    Stack<
        CorsLayer,
        Stack<
            CompressionLayer,
            Stack<TraceLayer<SharedClassifier<ServerErrorsAsFailures>>, Identity>,
        >,
    >,
>;

/// Builds the HTTP middleware stack.
///
/// 1. `Trace` -- one span per HTTP request
/// 2. `Compression` -- gzip responses when the client accepts it
/// 3. `CORS` -- configured origins; correlation headers are exposed to browsers
/// 4. `Timeout` -- answers 504 once `request_timeout` passes; the dropped
///    request is reported as incomplete by the observability layer
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            config.request_timeout,
        ))
        .into_inner()
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([REQUEST_ID_HEADER, CORRELATION_ID_HEADER])
}
