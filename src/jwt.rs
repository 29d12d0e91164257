//! Backend session tokens (HS256 JWT).

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Session token lifetime: 7 days.
pub const SESSION_TOKEN_LIFETIME_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionSigner {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("JWT secret cannot be empty");
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    pub fn issue(&self, user_id: &str) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            user_id: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(SESSION_TOKEN_LIFETIME_SECS)).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).context("Failed to sign session token")
    }

    /// Claims of a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<SessionClaims> {
        decode::<SessionClaims>(token, &self.decoding, &Validation::default())
            .map_err(|e| tracing::debug!("Session token rejected: {}", e))
            .ok()
            .map(|data| data.claims)
    }
}
