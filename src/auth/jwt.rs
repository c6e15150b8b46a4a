use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
        })
    }

    /// Tokens carry identity only. Roles and permissions are looked up on every
    /// request so revocations apply immediately.
    pub fn generate_token(&self, user_id: Uuid, email: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: Some(user_id),
            email: Some(email.to_owned()),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

/// `sub` is absent for tokens minted by an external identity provider that
/// only asserts a verified email address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService {
            encoding: EncodingKey::from_secret(b"unit-secret"),
            decoding: DecodingKey::from_secret(b"unit-secret"),
            issuer: "docshare".into(),
            audience: "docshare-clients".into(),
            expiry: Duration::minutes(5),
        }
    }

    #[test]
    fn token_carries_identity_claims() {
        let jwt = service();
        let user_id = Uuid::new_v4();
        let token = jwt.generate_token(user_id, "bob@example.com").unwrap();

        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.sub, Some(user_id));
        assert_eq!(claims.email.as_deref(), Some("bob@example.com"));
    }

    #[test]
    fn rejects_token_for_other_audience() {
        let jwt = service();
        let token = jwt.generate_token(Uuid::new_v4(), "bob@example.com").unwrap();

        let other = JwtService {
            audience: "someone-else".into(),
            ..service()
        };
        assert!(other.verify_token(&token).is_err());
    }
}
