//! Authentication error taxonomy.
//!
//! Every variant means the same thing to the UI: the user is not (or no
//! longer) signed in. Cosmetic failures such as palette extraction never
//! surface as errors at all.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// No credential record is stored
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The provider refused to refresh the access token
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The identity provider returned an error response
    #[error("Identity provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    /// The backend rejected the Google token
    #[error("Server validation failed: {0}")]
    ServerValidation(String),

    /// A response did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The credential store could not persist a change
    #[error("Credential store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl AuthError {
    /// Whether the UI should fall back to the login screen.
    ///
    /// Only a store write failure leaves the user's sign-in state intact.
    pub fn requires_sign_in(&self) -> bool {
        !matches!(self, AuthError::Store(_))
    }
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_send_user_to_login() {
        let err = AuthError::Provider {
            status: 401,
            message: "invalid_token".into(),
        };
        assert!(err.requires_sign_in());
        assert_eq!(err.to_string(), "Identity provider error (401): invalid_token");
    }

    #[test]
    fn store_errors_keep_session() {
        let err = AuthError::from(anyhow::anyhow!("disk full"));
        assert!(!err.requires_sign_in());
        assert!(err.to_string().contains("disk full"));
    }
}
