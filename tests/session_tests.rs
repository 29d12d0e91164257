use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zumi_player::credentials::{CredentialStore, STORE_FILE_NAME, Slot};
use zumi_player::error::{AuthError, AuthResult};
use zumi_player::session::{
    AuthTokens, IdentityProvider, ProviderProfile, ServerSession, SessionBackend,
    SessionValidator, UserData,
};

type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, call: impl Into<String>) {
    log.lock().unwrap().push(call.into());
}

fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

struct MockProvider {
    log: CallLog,
    refresh_fails: bool,
    refreshed_refresh_token: Option<String>,
}

#[async_trait]
impl IdentityProvider for MockProvider {
    fn authorization_url(&self) -> String {
        "https://accounts.example/auth?client_id=test".to_string()
    }

    async fn exchange_code(&self, code: &str) -> AuthResult<AuthTokens> {
        record(&self.log, format!("exchange:{}", code));
        Ok(tokens("exchanged", Some("refresh-1"), far_future()))
    }

    async fn refresh(&self, tokens: &AuthTokens) -> AuthResult<AuthTokens> {
        record(
            &self.log,
            format!("refresh:{}", tokens.refresh_token.as_deref().unwrap_or("")),
        );
        if self.refresh_fails {
            return Err(AuthError::RefreshFailed("invalid_grant".to_string()));
        }
        Ok(AuthTokens {
            access_token: "refreshed".to_string(),
            refresh_token: self.refreshed_refresh_token.clone(),
            scope: "email".to_string(),
            token_type: "Bearer".to_string(),
            expiry_date: far_future(),
        })
    }

    async fn fetch_user_info(&self, access_token: &str) -> AuthResult<ProviderProfile> {
        record(&self.log, format!("userinfo:{}", access_token));
        Ok(ProviderProfile {
            id: "google-1".to_string(),
            email: "ann@example.com".to_string(),
            verified_email: true,
            name: "Ann".to_string(),
            given_name: None,
            family_name: None,
            picture: None,
            locale: None,
        })
    }

    async fn revoke(&self, token: &str) -> AuthResult<()> {
        record(&self.log, format!("revoke:{}", token));
        Err(AuthError::Provider {
            status: 400,
            message: "invalid_token".to_string(),
        })
    }
}

struct MockBackend {
    log: CallLog,
}

#[async_trait]
impl SessionBackend for MockBackend {
    async fn validate_google_token(&self, access_token: &str) -> AuthResult<ServerSession> {
        record(&self.log, format!("backend:{}", access_token));
        Ok(ServerSession {
            token: "server-jwt".to_string(),
            user: UserData {
                id: "user-1".to_string(),
                email: "ann@example.com".to_string(),
                name: "Ann".to_string(),
                picture: None,
            },
        })
    }
}

fn far_future() -> i64 {
    chrono::Utc::now().timestamp_millis() + 3_600_000
}

fn long_ago() -> i64 {
    chrono::Utc::now().timestamp_millis() - 60_000
}

fn tokens(access: &str, refresh: Option<&str>, expiry_date: i64) -> AuthTokens {
    AuthTokens {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        scope: "email profile".to_string(),
        token_type: "Bearer".to_string(),
        expiry_date,
    }
}

struct Harness {
    _dir: TempDir,
    log: CallLog,
    store: CredentialStore,
    validator: SessionValidator,
}

async fn harness_with(refresh_fails: bool, refreshed_refresh_token: Option<&str>) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = CredentialStore::open(dir.path().join(STORE_FILE_NAME), Some("test-key")).await;
    let log: CallLog = Arc::default();

    let provider = MockProvider {
        log: log.clone(),
        refresh_fails,
        refreshed_refresh_token: refreshed_refresh_token.map(str::to_string),
    };
    let backend = MockBackend { log: log.clone() };
    let validator = SessionValidator::new(store.clone(), Arc::new(provider), Arc::new(backend));

    Harness {
        _dir: dir,
        log,
        store,
        validator,
    }
}

async fn harness() -> Harness {
    harness_with(false, None).await
}

#[tokio::test]
async fn test_nothing_stored_is_not_authenticated() {
    let h = harness().await;

    let result = h.validator.get_user_info().await;
    assert!(matches!(result, Err(AuthError::NotAuthenticated)));
    assert!(calls(&h.log).is_empty());
    assert!(!h.validator.is_signed_in().await);
}

#[tokio::test]
async fn test_first_call_validates_with_backend_then_caches() {
    let h = harness().await;
    h.store
        .set(Slot::Tokens, &tokens("access-1", Some("refresh-1"), far_future()))
        .await
        .unwrap();

    let profile = h.validator.get_user_info().await.unwrap();
    assert_eq!(profile.email, "ann@example.com");
    assert_eq!(calls(&h.log), vec!["backend:access-1", "userinfo:access-1"]);

    assert_eq!(h.validator.server_token().await.as_deref(), Some("server-jwt"));
    assert_eq!(h.validator.user().await.unwrap().id, "user-1");
    assert_eq!(
        h.validator.auth_header().await.as_deref(),
        Some("Bearer server-jwt")
    );

    h.validator.get_user_info().await.unwrap();
    assert_eq!(
        calls(&h.log),
        vec!["backend:access-1", "userinfo:access-1", "userinfo:access-1"]
    );
}

#[tokio::test]
async fn test_cached_server_token_skips_backend_even_after_refresh() {
    let h = harness().await;
    h.store
        .set(Slot::Tokens, &tokens("stale", Some("refresh-1"), long_ago()))
        .await
        .unwrap();
    h.store.set(Slot::ServerToken, &"cached-jwt").await.unwrap();

    h.validator.get_user_info().await.unwrap();

    assert_eq!(calls(&h.log), vec!["refresh:refresh-1", "userinfo:refreshed"]);
    assert_eq!(h.validator.server_token().await.as_deref(), Some("cached-jwt"));
}

#[tokio::test]
async fn test_expired_token_is_refreshed_before_any_other_call() {
    let h = harness().await;
    h.store
        .set(Slot::Tokens, &tokens("stale", Some("refresh-1"), long_ago()))
        .await
        .unwrap();

    h.validator.get_user_info().await.unwrap();

    let log = calls(&h.log);
    assert_eq!(log[0], "refresh:refresh-1");
    assert!(log[1..].iter().all(|c| c.ends_with(":refreshed")));
}

#[tokio::test]
async fn test_refresh_keeps_previous_refresh_token_when_omitted() {
    let h = harness().await;
    h.store
        .set(Slot::Tokens, &tokens("stale", Some("refresh-1"), long_ago()))
        .await
        .unwrap();

    h.validator.get_user_info().await.unwrap();

    let stored: AuthTokens = h.store.get(Slot::Tokens).await.unwrap();
    assert_eq!(stored.access_token, "refreshed");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    assert!(!stored.is_expired());
}

#[tokio::test]
async fn test_refresh_takes_rotated_refresh_token() {
    let h = harness_with(false, Some("refresh-2")).await;
    h.store
        .set(Slot::Tokens, &tokens("stale", Some("refresh-1"), long_ago()))
        .await
        .unwrap();

    h.validator.initialize().await;

    let stored: AuthTokens = h.store.get(Slot::Tokens).await.unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-2"));
    assert_eq!(calls(&h.log), vec!["refresh:refresh-1"]);
}

#[tokio::test]
async fn test_failed_refresh_discards_credentials() {
    let h = harness_with(true, None).await;
    h.store
        .set(Slot::Tokens, &tokens("stale", Some("refresh-1"), long_ago()))
        .await
        .unwrap();

    let result = h.validator.get_user_info().await;
    assert!(matches!(result, Err(AuthError::RefreshFailed(_))));
    assert!(!h.store.contains(Slot::Tokens).await);
    assert_eq!(calls(&h.log), vec!["refresh:refresh-1"]);

    let again = h.validator.get_user_info().await;
    assert!(matches!(again, Err(AuthError::NotAuthenticated)));
}

#[tokio::test]
async fn test_expired_record_without_refresh_token_is_discarded() {
    let h = harness().await;
    h.store
        .set(Slot::Tokens, &tokens("stale", None, long_ago()))
        .await
        .unwrap();

    let result = h.validator.get_user_info().await;
    assert!(matches!(result, Err(AuthError::RefreshFailed(_))));
    assert!(!h.store.contains(Slot::Tokens).await);
    assert!(calls(&h.log).is_empty());
}

#[tokio::test]
async fn test_initialize_leaves_fresh_tokens_alone() {
    let h = harness().await;
    h.store
        .set(Slot::Tokens, &tokens("fresh", Some("refresh-1"), far_future()))
        .await
        .unwrap();

    h.validator.initialize().await;

    assert!(calls(&h.log).is_empty());
    assert!(h.validator.is_signed_in().await);
}

#[tokio::test]
async fn test_sign_out_forces_backend_revalidation() {
    let h = harness().await;
    h.store
        .set(Slot::Tokens, &tokens("access-1", Some("refresh-1"), far_future()))
        .await
        .unwrap();
    h.validator.get_user_info().await.unwrap();

    h.validator.sign_out().await.unwrap();
    assert!(!h.store.contains(Slot::Tokens).await);
    assert!(!h.store.contains(Slot::ServerToken).await);
    assert!(!h.store.contains(Slot::User).await);
    assert_eq!(calls(&h.log).last().map(String::as_str), Some("revoke:refresh-1"));

    h.store
        .set(Slot::Tokens, &tokens("access-2", Some("refresh-2"), far_future()))
        .await
        .unwrap();
    h.validator.get_user_info().await.unwrap();

    let log = calls(&h.log);
    assert_eq!(&log[log.len() - 2..], ["backend:access-2", "userinfo:access-2"]);
}

#[tokio::test]
async fn test_sign_out_keeps_pin() {
    let h = harness().await;
    h.store.set(Slot::PinHash, &"abc").await.unwrap();

    h.validator.sign_out().await.unwrap();

    assert!(h.store.contains(Slot::PinHash).await);
    assert!(calls(&h.log).is_empty());
}

#[tokio::test]
async fn test_sign_in_with_code_stores_everything() {
    let h = harness().await;

    let user = h.validator.sign_in_with_code("code-1").await.unwrap();
    assert_eq!(user.id, "user-1");
    assert_eq!(calls(&h.log), vec!["exchange:code-1", "backend:exchanged"]);

    let stored: AuthTokens = h.store.get(Slot::Tokens).await.unwrap();
    assert_eq!(stored.access_token, "exchanged");
    assert_eq!(h.validator.server_token().await.as_deref(), Some("server-jwt"));
}

#[tokio::test]
async fn test_store_is_shared_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(STORE_FILE_NAME);
    {
        let store = CredentialStore::open(&path, Some("test-key")).await;
        store
            .set(Slot::Tokens, &tokens("access-1", Some("refresh-1"), far_future()))
            .await
            .unwrap();
    }

    let reopened = CredentialStore::open(&path, Some("test-key")).await;
    let stored: AuthTokens = reopened.get(Slot::Tokens).await.unwrap();
    assert_eq!(stored.access_token, "access-1");

    let wrong_key = CredentialStore::open(&path, Some("other-key")).await;
    assert!(wrong_key.get::<AuthTokens>(Slot::Tokens).await.is_none());
}
