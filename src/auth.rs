//! HTTP Basic Authentication for stage routes

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;

/// Authentication configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Username for the stage console (None = auth disabled)
    pub username: Option<String>,
    /// Password for the stage console
    pub password: Option<String>,
}

impl AuthConfig {
    /// Load auth config from environment variables
    /// STAGE_USERNAME and STAGE_PASSWORD must both be set to enable auth
    pub fn from_env() -> Self {
        let username = std::env::var("STAGE_USERNAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let password = std::env::var("STAGE_PASSWORD")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if username.is_some() && password.is_some() {
            tracing::info!("Stage authentication enabled");
            Self { username, password }
        } else {
            if username.is_some() || password.is_some() {
                tracing::warn!(
                    "STAGE_USERNAME and STAGE_PASSWORD must both be set to enable authentication"
                );
            }
            tracing::warn!("Stage authentication DISABLED - anyone can drive the show!");
            Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Validate credentials
    pub fn validate(&self, username: &str, password: &str) -> bool {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => {
                constant_time_eq(u.as_bytes(), username.as_bytes())
                    && constant_time_eq(p.as_bytes(), password.as_bytes())
            }
            _ => true,
        }
    }

    /// Check a raw `Authorization` header value
    fn accepts_header(&self, value: &str) -> bool {
        let Some(credentials) = value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(credentials.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        decoded
            .split_once(':')
            .is_some_and(|(username, password)| self.validate(username, password))
    }
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Middleware for HTTP Basic Authentication on stage routes
pub async fn stage_auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !auth_config.is_enabled() {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| auth_config.accepts_header(value));
    if authorized {
        return next.run(request).await;
    }

    tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated stage request");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"Stagevote Stage\"")],
        "Unauthorized",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> AuthConfig {
        AuthConfig {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
        }
    }

    #[test]
    fn test_auth_config_disabled_when_incomplete() {
        let config = AuthConfig::default();
        assert!(!config.is_enabled());
        assert!(config.validate("any", "thing"));

        let config = AuthConfig {
            username: Some("user".to_string()),
            password: None,
        };
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_auth_config_enabled() {
        let config = enabled();
        assert!(config.is_enabled());
        assert!(config.validate("admin", "secret"));
        assert!(!config.validate("admin", "wrong"));
        assert!(!config.validate("wrong", "secret"));
        assert!(!config.validate("", ""));
    }

    #[test]
    fn test_accepts_header() {
        let config = enabled();
        // "admin:secret"
        assert!(config.accepts_header("Basic YWRtaW46c2VjcmV0"));
        // "user:pass"
        assert!(!config.accepts_header("Basic dXNlcjpwYXNz"));
        assert!(!config.accepts_header("Bearer YWRtaW46c2VjcmV0"));
        assert!(!config.accepts_header("Basic not-base64!"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }
}
