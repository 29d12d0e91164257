//! reqwest client for the backend's Google validation endpoint.

use super::{GoogleAuthRequest, ServerSession, SessionBackend};
use crate::error::{AuthError, AuthResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub struct HttpSessionBackend {
    http: Client,
    base_url: String,
}

impl HttpSessionBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            anyhow::bail!("Backend URL cannot be empty");
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn validate_google_token(&self, access_token: &str) -> AuthResult<ServerSession> {
        let url = format!("{}/api/auth/google", self.base_url);
        tracing::debug!(url = %url, "Validating Google token with backend");

        let response = self
            .http
            .post(&url)
            .json(&GoogleAuthRequest {
                google_token: access_token.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Backend rejected Google token");
            return Err(AuthError::ServerValidation(error_text));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("Invalid server response: {}", e)))?;

        let has_token = body.get("token").is_some_and(|t| !t.is_null());
        let has_user = body.get("user").is_some_and(|u| !u.is_null());
        if !has_token || !has_user {
            return Err(AuthError::InvalidResponse(
                "Invalid server response format".to_string(),
            ));
        }

        serde_json::from_value(body)
            .map_err(|e| AuthError::InvalidResponse(format!("Invalid server response: {}", e)))
    }
}
