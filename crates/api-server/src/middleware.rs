//! Per-origin request limiting for the public form and charge endpoints.

use crate::error::ApiError;
use crate::rest::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use relay_core::RelayError;
use std::net::SocketAddr;
use tracing::warn;

/// The caller's network origin: the first `X-Forwarded-For` hop when behind
/// a proxy, otherwise the peer address.
pub fn origin_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let origin = origin_key(request.headers(), peer);

    if !state.limiter.admit(&origin) {
        warn!(origin = %origin, path = %request.uri().path(), "Rate limit exceeded");
        return ApiError(RelayError::RateLimited).into_response();
    }
    next.run(request).await
}
