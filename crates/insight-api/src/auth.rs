//! Bearer token middleware.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use insight_auth::AuthError;

use crate::ApiState;
use crate::error::ApiError;

/// Token from an `Authorization: Bearer <jwt>` header.
pub fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Verifies the bearer token and stores its `Claims` in the request
/// extensions. Rejects with 401 before the handler runs.
pub async fn require_bearer(State(state): State<ApiState>, mut req: Request, next: Next) -> Response {
    let claims = match bearer_token(&req) {
        Some(token) => state.verifier.verify(token),
        None => Err(AuthError::MissingToken),
    };
    match claims {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(e) => {
            debug!(error = %e, path = %req.uri().path(), "rejected bearer token");
            ApiError::from(e).into_response()
        }
    }
}
