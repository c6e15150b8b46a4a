pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};
use jwt::Claims;

/// Identity asserted by the bearer token, before it is resolved to a user
/// record. At least one of the two fields is always set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
}

impl SessionIdentity {
    /// `None` for a token that names nobody.
    pub fn from_claims(claims: Claims) -> Option<Self> {
        let email = claims
            .email
            .map(|email| email.trim().to_lowercase())
            .filter(|email| !email.is_empty());
        if claims.sub.is_none() && email.is_none() {
            return None;
        }
        Some(Self {
            user_id: claims.sub,
            email,
        })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for SessionIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state.jwt.verify_token(bearer.token()).map_err(|err| {
            tracing::debug!(error = %err, "rejecting bearer token");
            AppError::unauthorized()
        })?;

        SessionIdentity::from_claims(claims).ok_or_else(AppError::unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: Option<Uuid>, email: Option<&str>) -> Claims {
        Claims {
            sub,
            email: email.map(str::to_string),
            iss: "docshare".into(),
            aud: "docshare-api".into(),
            iat: 0,
            exp: 0,
        }
    }

    #[test]
    fn email_claim_is_normalized() {
        let identity = SessionIdentity::from_claims(claims(None, Some(" Bob@Example.com "))).unwrap();
        assert_eq!(identity.user_id, None);
        assert_eq!(identity.email.as_deref(), Some("bob@example.com"));
    }

    #[test]
    fn tokens_naming_nobody_are_rejected() {
        assert!(SessionIdentity::from_claims(claims(None, None)).is_none());
        assert!(SessionIdentity::from_claims(claims(None, Some("  "))).is_none());

        let id = Uuid::new_v4();
        let identity = SessionIdentity::from_claims(claims(Some(id), None)).unwrap();
        assert_eq!(identity.user_id, Some(id));
    }
}
