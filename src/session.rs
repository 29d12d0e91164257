//! Session validation
//!
//! Owns the sign-in lifecycle on the desktop side: it reads the credential
//! record from the [`CredentialStore`], refreshes it through the identity
//! provider when it has expired, exchanges it for a backend session token
//! when none is cached, and finally asks the provider who the user is.

pub mod backend;
pub mod google;

use crate::credentials::{CredentialStore, Slot};
use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifetime assumed when the provider does not report one.
pub const DEFAULT_TOKEN_LIFETIME_MS: i64 = 3_600_000;

/// OAuth credential record as persisted in the `tokens` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Absolute expiry, Unix milliseconds
    pub expiry_date: i64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl AuthTokens {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expiry_date
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

/// User profile as returned by the backend and cached in the `user` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Profile returned by the provider's user-info endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub verified_email: bool,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

/// Body of `POST /api/auth/google`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleAuthRequest {
    #[serde(rename = "googleToken")]
    pub google_token: String,
}

/// Successful backend validation: a signed session token plus the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSession {
    pub token: String,
    pub user: UserData,
}

/// The OAuth identity provider (Google in production).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the user must visit to grant consent.
    fn authorization_url(&self) -> String;

    /// Exchange an authorization code for a credential record.
    async fn exchange_code(&self, code: &str) -> AuthResult<AuthTokens>;

    /// Obtain a fresh credential record. The returned record may omit the
    /// refresh token.
    async fn refresh(&self, tokens: &AuthTokens) -> AuthResult<AuthTokens>;

    async fn fetch_user_info(&self, access_token: &str) -> AuthResult<ProviderProfile>;

    async fn revoke(&self, token: &str) -> AuthResult<()>;
}

/// The player backend that turns a provider token into a session token.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn validate_google_token(&self, access_token: &str) -> AuthResult<ServerSession>;
}

#[derive(Clone)]
pub struct SessionValidator {
    store: CredentialStore,
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn SessionBackend>,
}

impl SessionValidator {
    pub fn new(
        store: CredentialStore,
        provider: Arc<dyn IdentityProvider>,
        backend: Arc<dyn SessionBackend>,
    ) -> Self {
        Self {
            store,
            provider,
            backend,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Startup hook: refresh a stored record that expired while the app was
    /// closed. Failures are logged; the next [`get_user_info`] reports them.
    ///
    /// [`get_user_info`]: SessionValidator::get_user_info
    pub async fn initialize(&self) {
        let Some(tokens) = self.store.get::<AuthTokens>(Slot::Tokens).await else {
            tracing::debug!("No stored credentials at startup");
            return;
        };

        if tokens.is_expired() {
            match self.refresh(tokens).await {
                Ok(_) => tracing::info!("Refreshed expired credentials at startup"),
                Err(e) => tracing::warn!("Startup credential refresh failed: {}", e),
            }
        }
    }

    pub fn authorization_url(&self) -> String {
        self.provider.authorization_url()
    }

    /// Complete a sign-in with the code returned by the consent screen.
    pub async fn sign_in_with_code(&self, code: &str) -> AuthResult<UserData> {
        let tokens = self.provider.exchange_code(code).await?;
        self.store.set(Slot::Tokens, &tokens).await?;

        let session = self.validate_with_server(&tokens.access_token).await?;
        tracing::info!(user_id = %session.user.id, "Signed in");
        Ok(session.user)
    }

    /// Return the signed-in user's provider profile.
    ///
    /// Backend validation only happens when no session token is cached; a
    /// cached token is trusted even if the backend might have expired it.
    pub async fn get_user_info(&self) -> AuthResult<ProviderProfile> {
        let tokens = self.current_tokens().await?;

        if !self.store.contains(Slot::ServerToken).await {
            tracing::debug!("No cached server token, validating with backend");
            self.validate_with_server(&tokens.access_token).await?;
        }

        let profile = self.provider.fetch_user_info(&tokens.access_token).await?;
        tracing::debug!(user_id = %profile.id, "Fetched user info");
        Ok(profile)
    }

    /// Forget every credential and revoke the grant with the provider.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let tokens = self.store.get::<AuthTokens>(Slot::Tokens).await;

        self.store.delete(Slot::Tokens).await?;
        self.store.delete(Slot::ServerToken).await?;
        self.store.delete(Slot::User).await?;

        if let Some(tokens) = tokens {
            let token = tokens.refresh_token.as_deref().unwrap_or(&tokens.access_token);
            if let Err(e) = self.provider.revoke(token).await {
                tracing::warn!("Failed to revoke provider grant: {}", e);
            }
        }

        tracing::info!("Signed out");
        Ok(())
    }

    pub async fn server_token(&self) -> Option<String> {
        self.store.get(Slot::ServerToken).await
    }

    pub async fn user(&self) -> Option<UserData> {
        self.store.get(Slot::User).await
    }

    /// `Authorization` header value for backend requests.
    pub async fn auth_header(&self) -> Option<String> {
        self.server_token()
            .await
            .map(|token| format!("Bearer {}", token))
    }

    pub async fn is_signed_in(&self) -> bool {
        self.store
            .get::<AuthTokens>(Slot::Tokens)
            .await
            .is_some_and(|t| !t.access_token.is_empty())
    }

    /// Load the credential record, refreshing it first if it has expired.
    async fn current_tokens(&self) -> AuthResult<AuthTokens> {
        let tokens = self
            .store
            .get::<AuthTokens>(Slot::Tokens)
            .await
            .filter(|t| !t.access_token.is_empty())
            .ok_or(AuthError::NotAuthenticated)?;

        if tokens.is_expired() {
            tracing::debug!("Access token expired, refreshing");
            return self.refresh(tokens).await;
        }
        Ok(tokens)
    }

    /// A failed refresh discards the stored record so the UI falls back to
    /// the login screen instead of retrying.
    async fn refresh(&self, tokens: AuthTokens) -> AuthResult<AuthTokens> {
        let result = if tokens.refresh_token.is_none() {
            Err(AuthError::RefreshFailed("No refresh token stored".to_string()))
        } else {
            self.provider.refresh(&tokens).await
        };

        match result {
            Ok(mut refreshed) => {
                if refreshed.refresh_token.is_none() {
                    refreshed.refresh_token = tokens.refresh_token;
                }
                self.store.set(Slot::Tokens, &refreshed).await?;
                tracing::info!("Access token refreshed");
                Ok(refreshed)
            }
            Err(e) => {
                tracing::warn!("Token refresh failed, discarding credentials: {}", e);
                if let Err(store_err) = self.store.delete(Slot::Tokens).await {
                    tracing::error!("Failed to discard credentials: {:#}", store_err);
                }
                Err(e)
            }
        }
    }

    async fn validate_with_server(&self, access_token: &str) -> AuthResult<ServerSession> {
        let session = self.backend.validate_google_token(access_token).await?;
        self.store.set(Slot::ServerToken, &session.token).await?;
        self.store.set(Slot::User, &session.user).await?;
        Ok(session)
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let tokens = AuthTokens {
            access_token: "a".into(),
            refresh_token: None,
            scope: String::new(),
            token_type: "Bearer".into(),
            expiry_date: 1_000,
        };
        assert!(!tokens.is_expired_at(1_000));
        assert!(tokens.is_expired_at(1_001));
    }

    #[test]
    fn token_record_uses_provider_field_names() {
        let json = r#"{"access_token":"ya29","scope":"email","expiry_date":42}"#;
        let tokens: AuthTokens = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.refresh_token.is_none());

        let encoded = serde_json::to_value(&tokens).unwrap();
        assert!(encoded.get("refresh_token").is_none());
        assert_eq!(encoded["expiry_date"], 42);
    }

    #[test]
    fn google_auth_request_uses_camel_case() {
        let body = serde_json::to_value(GoogleAuthRequest {
            google_token: "ya29".into(),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "googleToken": "ya29" }));
    }

    #[test]
    fn server_session_ignores_extra_user_fields() {
        let json = r#"{
            "token": "jwt",
            "user": {"id": "u1", "email": "a@b.c", "name": "Ann", "googleId": "g1", "createdAt": "x"}
        }"#;
        let session: ServerSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.user.id, "u1");
        assert!(session.user.picture.is_none());
    }
}
