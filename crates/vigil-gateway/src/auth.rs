//! Request authorization for `/ws` and `/api/*`.
//!
//! In `token` mode the shared token may arrive three ways, checked in order:
//! `Authorization: Bearer <token>`, the `?token=` query parameter (browsers
//! cannot set headers on a WebSocket upgrade), or the `vigil_session` cookie.

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;
use vigil_core::config::{AuthConfig, AuthMode};
use vigil_core::VigilError;

use crate::app::AppState;
use crate::http::error_body;

pub const SESSION_COOKIE: &str = "vigil_session";

#[derive(Debug, Clone)]
pub struct Authorizer {
    mode: AuthMode,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl Authorizer {
    pub fn from_config(cfg: &AuthConfig) -> Self {
        let token = cfg.token.clone().filter(|t| !t.is_empty());
        if cfg.mode == AuthMode::Token && token.is_none() {
            warn!("auth mode is token but no token is configured; every request will be rejected");
        }
        Self {
            mode: cfg.mode,
            token,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn check(&self, headers: &HeaderMap, query_token: Option<&str>) -> Result<(), VigilError> {
        match self.mode {
            AuthMode::None => Ok(()),
            AuthMode::Token => {
                let expected = self
                    .token
                    .as_deref()
                    .ok_or_else(|| VigilError::AuthFailed("no token configured".into()))?;
                let presented = bearer(headers)
                    .or(query_token)
                    .or_else(|| cookie(headers, SESSION_COOKIE))
                    .ok_or_else(|| VigilError::AuthFailed("missing token".into()))?;
                if presented == expected {
                    Ok(())
                } else {
                    Err(VigilError::AuthFailed("invalid token".into()))
                }
            }
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

/// Route layer guarding every protected route.
pub async fn require_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let query_token = Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.token);

    match state.auth.check(req.headers(), query_token.as_deref()) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            warn!(path = %req.uri().path(), error = %e, "request rejected");
            error_body(StatusCode::UNAUTHORIZED, &e).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn token_auth() -> Authorizer {
        Authorizer::from_config(&AuthConfig {
            mode: AuthMode::Token,
            token: Some("s3cret".into()),
        })
    }

    fn headers(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(name, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn none_mode_allows_everything() {
        let auth = Authorizer::from_config(&AuthConfig::default());
        assert!(auth.check(&HeaderMap::new(), None).is_ok());
    }

    #[test]
    fn bearer_header() {
        let auth = token_auth();
        assert!(auth
            .check(&headers(header::AUTHORIZATION, "Bearer s3cret"), None)
            .is_ok());
        let err = auth
            .check(&headers(header::AUTHORIZATION, "Bearer nope"), None)
            .unwrap_err();
        assert_eq!(err.code(), "AUTH_FAILED");
    }

    #[test]
    fn query_token() {
        let auth = token_auth();
        assert!(auth.check(&HeaderMap::new(), Some("s3cret")).is_ok());
        assert!(auth.check(&HeaderMap::new(), Some("wrong")).is_err());
    }

    #[test]
    fn session_cookie() {
        let auth = token_auth();
        let h = headers(header::COOKIE, "theme=dark; vigil_session=s3cret");
        assert!(auth.check(&h, None).is_ok());
        let h = headers(header::COOKIE, "vigil_sessionx=s3cret");
        assert!(auth.check(&h, None).is_err());
    }

    #[test]
    fn missing_token_rejected() {
        assert!(token_auth().check(&HeaderMap::new(), None).is_err());
    }

    #[test]
    fn token_mode_without_token_rejects() {
        let auth = Authorizer::from_config(&AuthConfig {
            mode: AuthMode::Token,
            token: Some(String::new()),
        });
        assert!(auth.check(&HeaderMap::new(), Some("")).is_err());
    }
}
