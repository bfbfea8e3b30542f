use std::time::Duration;

use axum::http::{header, HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{SIGNATURE_HEADER, TIMESTAMP_HEADER, USERNAME_HEADER};

/// How long browsers may cache a preflight answer.
pub const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Request headers a browser may send cross-origin.
pub fn allowed_headers() -> Vec<HeaderName> {
    vec![
        HeaderName::from_static("bakery-protocol-version"),
        HeaderName::from_static("macaroons"),
        HeaderName::from_static("x-requested-with"),
        header::CONTENT_TYPE,
        HeaderName::from_static(USERNAME_HEADER),
        HeaderName::from_static(TIMESTAMP_HEADER),
        HeaderName::from_static(SIGNATURE_HEADER),
    ]
}

/// Every response gets `Access-Control-Allow-Origin: *`; any `OPTIONS`
/// request is answered here with `200` and never reaches a version handler.
pub fn layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(allowed_headers())
        .max_age(PREFLIGHT_MAX_AGE)
}
