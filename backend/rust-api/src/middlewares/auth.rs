use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::user::{Actor, UserRole};
use crate::services::AppState;

/// Claims issued by the Drose Online auth service
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String,  // user_id (ObjectId hex)
    pub role: String, // admin | teacher | student | assistant
    pub exp: usize,
    pub iat: usize,
}

impl JwtClaims {
    pub fn new(user_id: &ObjectId, role: UserRole, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.to_hex(),
            role: role.as_str().to_string(),
            exp: (now + ttl).timestamp().max(0) as usize,
            iat: now.timestamp().max(0) as usize,
        }
    }

    /// The caller identity, or `None` when the claims do not name a known user shape
    pub fn actor(&self) -> Option<Actor> {
        let id = ObjectId::parse_str(&self.sub).ok()?;
        let role = UserRole::parse(&self.role)?;
        Some(Actor::new(id, role))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Invalid token signature")]
    InvalidSignature,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(&self, claims: &JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            })
    }
}

/// Validates the bearer JWT and attaches the caller as an `Actor`
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let claims = jwt_service.validate_token(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    let actor = claims.actor().ok_or_else(|| {
        tracing::warn!(sub = %claims.sub, role = %claims.role, "JWT claims do not describe a user");
        StatusCode::UNAUTHORIZED
    })?;

    tracing::debug!("Authenticated user: {} (role: {})", claims.sub, claims.role);

    request.extensions_mut().insert(actor);
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

pub async fn admin_guard_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    if request
        .extensions()
        .get::<Actor>()
        .is_some_and(|actor| actor.is_admin())
    {
        return Ok(next.run(request).await);
    }
    tracing::warn!("Access denied: admin role required");
    Err(StatusCode::FORBIDDEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_generation_and_validation() {
        let service = JwtService::new("test-secret");
        let user = ObjectId::new();
        let claims = JwtClaims::new(&user, UserRole::Teacher, Duration::hours(1));

        let token = service.generate_token(&claims).unwrap();
        let validated = service.validate_token(&token).unwrap();

        assert_eq!(validated.sub, claims.sub);
        assert_eq!(validated.actor(), Some(Actor::new(user, UserRole::Teacher)));
    }

    #[test]
    fn expired_and_foreign_tokens_are_rejected() {
        let service = JwtService::new("test-secret");
        let claims = JwtClaims::new(&ObjectId::new(), UserRole::Student, Duration::hours(-2));
        let token = service.generate_token(&claims).unwrap();
        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::ExpiredToken)
        ));

        let other = JwtService::new("other-secret");
        let fresh = JwtClaims::new(&ObjectId::new(), UserRole::Student, Duration::hours(1));
        let token = other.generate_token(&fresh).unwrap();
        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn claims_with_unknown_role_have_no_actor() {
        let mut claims = JwtClaims::new(&ObjectId::new(), UserRole::Student, Duration::hours(1));
        claims.role = "parent".to_string();
        assert!(claims.actor().is_none());

        claims.role = "student".to_string();
        claims.sub = "not-an-object-id".to_string();
        assert!(claims.actor().is_none());
    }
}
