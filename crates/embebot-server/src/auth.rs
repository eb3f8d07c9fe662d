//! Bearer token guard for the mutating and log routes.
//!
//! With a token configured every guarded request needs
//! `Authorization: Bearer <token>`. Without one, only loopback peers pass.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::server::AppState;

pub fn is_authorized(token: Option<&SecretString>, addr: &SocketAddr, headers: &HeaderMap) -> bool {
    match token {
        Some(expected) => headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|provided| {
                // Equal-length digests keep the comparison independent of the input.
                Sha256::digest(provided.as_bytes())
                    == Sha256::digest(expected.expose_secret().as_bytes())
            }),
        None => addr.ip().is_loopback(),
    }
}

pub async fn require_control_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_authorized(state.control_token.as_ref(), &addr, request.headers()) {
        next.run(request).await
    } else {
        warn!(peer = %addr, path = %request.uri().path(), "rejected control request");
        StatusCode::UNAUTHORIZED.into_response()
    }
}
