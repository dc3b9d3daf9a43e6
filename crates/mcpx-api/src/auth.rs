//! Per-backend bearer token authorization
//!
//! Each mount carries its own token set. An empty set lets every request
//! through; otherwise the `Authorization` header, with an optional
//! `Bearer ` prefix, must name one of the tokens.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use mcpx_core::{ProxyError, ProxyResult};

use crate::error::ApiError;

/// Accepted tokens for one mount
#[derive(Debug, Clone, Default)]
pub struct TokenSet(Arc<HashSet<String>>);

impl TokenSet {
    pub fn new(tokens: &[String]) -> Self {
        Self(Arc::new(tokens.iter().cloned().collect()))
    }

    /// No tokens configured: authorization is off
    pub fn is_open(&self) -> bool {
        self.0.is_empty()
    }

    /// Check an `Authorization` header value
    pub fn authorize(&self, header: Option<&str>) -> ProxyResult<()> {
        if self.is_open() {
            return Ok(());
        }

        let header = header.unwrap_or_default();
        let token = header.strip_prefix("Bearer ").unwrap_or(header);

        if token.is_empty() {
            return Err(ProxyError::Auth("missing token".to_string()));
        }
        if !self.0.contains(token) {
            return Err(ProxyError::Auth("invalid token".to_string()));
        }
        Ok(())
    }
}

/// Axum middleware rejecting requests whose token is not in the mount's set
pub async fn require_token(
    State(tokens): State<TokenSet>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if let Err(e) = tokens.authorize(header) {
        tracing::warn!(path = %request.uri().path(), error = %e, "Rejected request");
        return Err(e.into());
    }

    Ok(next.run(request).await)
}
