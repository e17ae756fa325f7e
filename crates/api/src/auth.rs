//! JWT authentication
//!
//! HS256 bearer tokens. Two extractors: `AuthUser` for any authenticated
//! customer and `AdminUser` for back-office roles. Role comes from the
//! token; there is no per-request database lookup.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Customer id.
    pub sub: Uuid,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

/// Verifies bearer tokens minted by the external identity service; this
/// server never issues tokens itself.
#[derive(Clone)]
pub struct JwtManager {
    decoding: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized)
    }
}

/// Any authenticated actor.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub customer_id: Uuid,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = state.jwt_manager.verify(bearer_token(parts)?)?;
        Ok(AuthUser {
            customer_id: claims.sub,
            role: claims.role,
        })
    }
}

/// Back-office actor. Extraction fails with 403 for non-admin tokens.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub admin_id: Uuid,
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::Forbidden);
        }
        Ok(AdminUser {
            admin_id: user.customer_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use time::{Duration, OffsetDateTime};

    fn issue(secret: &str, customer_id: Uuid, role: &str) -> String {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: customer_id,
            role: role.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + Duration::hours(24)).unix_timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn issued_token_round_trips() {
        let manager = JwtManager::new("test-secret");
        let customer_id = Uuid::new_v4();
        let token = issue("test-secret", customer_id, "customer");
        let claims = manager.verify(&token).unwrap();
        assert_eq!(claims.sub, customer_id);
        assert_eq!(claims.role, "customer");
    }

    #[test]
    fn token_with_wrong_secret_is_rejected() {
        let verifier = JwtManager::new("secret-b");
        let token = issue("secret-a", Uuid::new_v4(), "admin");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let manager = JwtManager::new("test-secret");
        assert!(manager.verify("not-a-jwt").is_err());
    }
}
