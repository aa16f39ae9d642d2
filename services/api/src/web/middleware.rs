//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes, and the optional identity
//! lookup used by the planner WebSocket.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::web::state::AppState;

/// The `session` cookie value, if the request carries one.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|token| !token.is_empty())
}

/// Resolves the signed-in identity, or `None` when signed out or the session
/// is not valid.
pub async fn optional_identity(state: &AppState, headers: &HeaderMap) -> Option<Uuid> {
    let token = session_token(headers)?;
    match state.sessions.resolve_session(token).await {
        Ok(owner_id) => Some(owner_id),
        Err(e) => {
            warn!("Ignoring invalid session cookie: {}", e);
            None
        }
    }
}

/// Middleware that validates the session cookie and extracts the owner id.
///
/// If valid, inserts the owner id into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = session_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let owner_id = state.sessions.resolve_session(token).await.map_err(|e| {
        error!("Failed to validate auth session: {:?}", e);
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(owner_id);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=abc123"));
        assert_eq!(session_token(&headers), Some("abc123"));
        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_token(&headers), None);
    }
}
