//! Google OAuth 2.0 identity provider over reqwest.

use super::{AuthTokens, DEFAULT_TOKEN_LIFETIME_MS, IdentityProvider, ProviderProfile, now_millis};
use crate::error::{AuthError, AuthResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
pub const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/oauth/callback";

/// OAuth client configuration. Endpoints default to Google's and can be
/// pointed elsewhere (e.g. a mock server).
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub revoke_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl OAuthConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: vec![
                "https://www.googleapis.com/auth/userinfo.email".to_string(),
                "https://www.googleapis.com/auth/userinfo.profile".to_string(),
            ],
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            revoke_url: GOOGLE_REVOKE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Point every provider endpoint at `base` (used against mock servers).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.auth_url = format!("{}/o/oauth2/v2/auth", base);
        self.token_url = format!("{}/token", base);
        self.userinfo_url = format!("{}/oauth2/v2/userinfo", base);
        self.revoke_url = format!("{}/revoke", base);
        self
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

pub struct GoogleProvider {
    http: Client,
    config: OAuthConfig,
    auth_url: Url,
}

impl GoogleProvider {
    pub fn new(config: OAuthConfig) -> Result<Self> {
        let auth_url = Url::parse(&config.auth_url)
            .with_context(|| format!("Invalid authorization URL: {}", config.auth_url))?;
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            config,
            auth_url,
        })
    }

    /// POST a grant to the token endpoint. A rejected grant becomes
    /// [`AuthError::Provider`] carrying the OAuth error code and description.
    async fn request_tokens(&self, form: &[(&str, &str)]) -> AuthResult<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error,
                },
                Err(_) => body,
            };
            return Err(AuthError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            AuthError::InvalidResponse(format!("Failed to parse token response: {}", e))
        })
    }
}

impl TokenResponse {
    fn into_tokens(self) -> AuthResult<AuthTokens> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidResponse("No access token received".to_string()))?;

        let lifetime_ms = self
            .expires_in
            .map(|secs| secs * 1000)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_MS);

        Ok(AuthTokens {
            access_token,
            refresh_token: self.refresh_token,
            scope: self.scope.unwrap_or_default(),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expiry_date: now_millis() + lifetime_ms,
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorization_url(&self) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        url.to_string()
    }

    async fn exchange_code(&self, code: &str) -> AuthResult<AuthTokens> {
        tracing::debug!("Exchanging authorization code");
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        self.request_tokens(&form).await?.into_tokens()
    }

    async fn refresh(&self, tokens: &AuthTokens) -> AuthResult<AuthTokens> {
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::RefreshFailed("No refresh token stored".to_string()))?;

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        self.request_tokens(&form)
            .await
            .and_then(TokenResponse::into_tokens)
            .map_err(|e| match e {
                AuthError::Provider { status, message } => {
                    tracing::warn!(status, "Provider rejected refresh token");
                    AuthError::RefreshFailed(message)
                }
                AuthError::InvalidResponse(message) => AuthError::RefreshFailed(message),
                other => other,
            })
    }

    async fn fetch_user_info(&self, access_token: &str) -> AuthResult<ProviderProfile> {
        let response = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(status = status.as_u16(), "User info response");

        if !status.is_success() {
            return Err(AuthError::Provider {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(format!("Failed to parse user info: {}", e)))
    }

    async fn revoke(&self, token: &str) -> AuthResult<()> {
        let response = self
            .http
            .post(&self.config.revoke_url)
            .form(&[("token", token)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Provider {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}
