//! Per-session bearer token authentication.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

use crate::server::CacheState;

/// Token the wrapped tool must present for this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// A fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Use a fixed token.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented token.
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

/// Reject requests without `Authorization: Bearer <session token>`.
pub async fn require_bearer_token(
    State(state): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let rejection = match presented {
        Some(token) if state.token.matches(token.trim()) => None,
        Some(_) => Some("Invalid token"),
        None => Some("Authentication required"),
    };

    match rejection {
        None => next.run(request).await,
        Some(message) => {
            debug!(path = %request.uri().path(), reason = message, "Rejected cache request");
            unauthorized(message)
        }
    }
}

fn unauthorized(message: &'static str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer error=\"invalid_token\"")],
        message,
    )
        .into_response()
}
