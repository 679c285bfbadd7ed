//! Identity boundary: resolves bearer session tokens to stable user ids.
//!
//! Wallet login happens upstream; by the time a request reaches this backend
//! the identity service has exchanged the wallet session for a stable user
//! id, carried as the bearer credential.

use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

/// Authenticated caller extracted from the `Authorization` header.
#[derive(Debug, Clone, Copy)]
pub struct AuthedUser(pub Uuid);

/// Resolve a session token to the stable user id it carries.
pub fn resolve_user_id(token: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(token.trim())
        .map_err(|_| AppError::Unauthorized("invalid session token".into()))
}

impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing authorization header".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("expected bearer token".into()))?;

        Ok(AuthedUser(resolve_user_id(token)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_a_well_formed_token() {
        let id = Uuid::new_v4();
        assert_eq!(resolve_user_id(&id.to_string()).unwrap(), id);
        assert_eq!(resolve_user_id(&format!("  {id} ")).unwrap(), id);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(resolve_user_id("not-a-token").is_err());
        assert!(resolve_user_id("").is_err());
    }
}
