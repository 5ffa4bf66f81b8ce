//! Authentication middleware.
//!
//! Bearer token extraction. When `AUTH_SECRET` is configured the token must
//! match it; otherwise requests are accepted anonymously.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Authenticated caller extracted from request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    /// No secret configured
    Anonymous,
    /// Presented the configured secret
    Token,
}

/// Check an `Authorization` header value against the configured secret.
pub fn authorize(
    header: Option<&str>,
    secret: Option<&str>,
) -> Result<AuthUser, (StatusCode, &'static str)> {
    let Some(secret) = secret else {
        return Ok(AuthUser::Anonymous);
    };

    match header {
        Some(header) => match header.strip_prefix("Bearer ") {
            Some("") => Err((StatusCode::UNAUTHORIZED, "Empty bearer token")),
            Some(token) if token == secret => Ok(AuthUser::Token),
            Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid bearer token")),
            None => Err((
                StatusCode::UNAUTHORIZED,
                "Invalid authorization header format",
            )),
        },
        None => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        authorize(header, state.config.auth_secret.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_without_secret() {
        assert_eq!(authorize(None, None), Ok(AuthUser::Anonymous));
        assert_eq!(authorize(Some("Bearer x"), None), Ok(AuthUser::Anonymous));
    }

    #[test]
    fn secret_must_match() {
        let secret = Some("s3cret");
        assert_eq!(authorize(Some("Bearer s3cret"), secret), Ok(AuthUser::Token));
        assert!(authorize(Some("Bearer wrong"), secret).is_err());
        assert!(authorize(Some("Bearer "), secret).is_err());
        assert!(authorize(Some("Basic s3cret"), secret).is_err());
        assert!(authorize(None, secret).is_err());
    }
}
