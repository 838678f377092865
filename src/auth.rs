use crate::api::AppState;
use crate::error::AppError;
use crate::tables::{Role, User};
use crate::users;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Token user no longer exists")]
    UnknownUser,

    #[error("Failed to issue token: {0}")]
    TokenCreation(String),

    #[error("Authentication backend error: {0}")]
    Backend(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenCreation(_) | AuthError::Backend(_) => {
                AppError::Internal(err.to_string())
            }
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

/// Signing material and token lifetime.
pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiration: Duration,
}

impl AuthKeys {
    pub fn new(secret: &str, expiration: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiration,
        }
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Username at issue time; informational only.
    pub sub: String,
    pub uid: i32,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(user: &User, keys: &AuthKeys) -> Result<String, AuthError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user.username.clone(),
        uid: user.id,
        role: user.role,
        iat: now,
        exp: now + keys.expiration.as_secs() as i64,
    };

    encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
        .map_err(|err| AuthError::TokenCreation(err.to_string()))
}

pub fn decode_token(token: &str, keys: &AuthKeys) -> Result<Claims, AuthError> {
    decode::<Claims>(token, &keys.decoding, &Validation::new(Algorithm::HS256))
        .map(|data| data.claims)
        .map_err(|err| {
            warn!(error = %err, "rejected token");
            AuthError::InvalidToken
        })
}

/// Ownership check shared by the stores. A foreign resource is reported as
/// missing so its existence is not disclosed.
pub fn require_owner(
    user_id: i32,
    owner_id: i32,
    resource: &'static str,
) -> Result<(), AppError> {
    if user_id != owner_id {
        warn!(user_id, owner_id, resource, "ownership check failed");
        return Err(AppError::NotFound(resource));
    }
    Ok(())
}

/// The authenticated caller, resolved from the bearer token to a live user
/// row by `uid`. Ids are never reused, so a renamed user keeps their session.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::MissingToken)?;

        let claims = decode_token(bearer.token(), &state.auth)?;

        let mut conn = state
            .pool
            .get()
            .map_err(|err| AuthError::Backend(err.to_string()))?;
        let user = users::find_by_id(&mut conn, claims.uid).map_err(|err| match err {
            AppError::NotFound(_) => AuthError::UnknownUser,
            other => AuthError::Backend(other.to_string()),
        })?;

        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn sample_user() -> User {
        User {
            id: 7,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: String::new(),
            role: Role::User,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn test_token_round_trip() {
        let keys = AuthKeys::new("test-secret", Duration::from_secs(3600));
        let token = issue_token(&sample_user(), &keys).unwrap();

        let claims = decode_token(&token, &keys).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.uid, 7);
        assert_eq!(claims.role, Role::User);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_foreign_and_expired_tokens_are_rejected() {
        let keys = AuthKeys::new("test-secret", Duration::from_secs(3600));
        let other = AuthKeys::new("other-secret", Duration::from_secs(3600));
        let token = issue_token(&sample_user(), &other).unwrap();
        assert!(matches!(decode_token(&token, &keys), Err(AuthError::InvalidToken)));

        let now = chrono::Utc::now().timestamp();
        let stale = Claims {
            sub: "alice".to_string(),
            uid: 7,
            role: Role::User,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(&Header::new(Algorithm::HS256), &stale, &keys.encoding).unwrap();
        assert!(matches!(decode_token(&token, &keys), Err(AuthError::InvalidToken)));

        assert!(matches!(decode_token("not.a.token", &keys), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_require_owner() {
        assert!(require_owner(1, 1, "milestone").is_ok());
        let err = require_owner(2, 1, "milestone").unwrap_err();
        assert!(matches!(err, AppError::NotFound("milestone")));
    }

    #[test]
    fn test_auth_errors_map_to_statuses() {
        assert_eq!(
            AppError::from(AuthError::MissingToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(AuthError::Backend("pool".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
