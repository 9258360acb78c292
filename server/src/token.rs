//! Lifecycle of the shared ERP bearer token.
//!
//! The credential lives only in the shared store; this manager keeps no
//! authoritative copy. Renewal is serialized twice: within the process by a
//! request deduplicator, across processes by a [`DistributedLock`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::dedup::RequestDeduplicator;
use crate::error::{ErpError, LoginError};
use crate::lock::{Acquisition, DistributedLock, LockSettings};
use crate::store::{JsonStore, SharedStore};
use crate::util::now_unix_millis;

const RENEWAL_KEY: &str = "token-renewal";

/// Bearer token as persisted in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
}

impl Credential {
    #[must_use]
    pub const fn is_valid_at(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// Obtains a fresh bearer token from the ERP.
#[async_trait]
pub trait LoginTransport: Send + Sync {
    async fn login(&self) -> Result<String, LoginError>;
}

#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// How long a freshly issued token is considered valid.
    pub lifetime: Duration,
    /// The store TTL is `lifetime - store_margin`.
    pub store_margin: Duration,
    pub lock: LockSettings,
    pub max_login_attempts: u32,
    /// Linear backoff step between transient login failures.
    pub login_backoff: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(20 * 60),
            store_margin: Duration::from_secs(30),
            lock: LockSettings::default(),
            max_login_attempts: 3,
            login_backoff: Duration::from_secs(1),
        }
    }
}

impl From<&sankhya_config::TokenConfig> for TokenSettings {
    fn from(config: &sankhya_config::TokenConfig) -> Self {
        Self {
            lifetime: Duration::from_secs(config.lifetime_secs),
            store_margin: Duration::from_secs(config.store_margin_secs),
            lock: LockSettings {
                ttl: Duration::from_secs(config.lock_ttl_secs),
                poll_interval: Duration::from_millis(config.lock_poll_ms),
                wait_ceiling: Duration::from_secs(config.lock_wait_secs),
            },
            max_login_attempts: config.max_login_attempts.max(1),
            login_backoff: Duration::from_millis(config.login_backoff_ms),
        }
    }
}

#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn SharedStore>,
    login: Arc<dyn LoginTransport>,
    lock: DistributedLock,
    credential_key: String,
    settings: TokenSettings,
    renewals: RequestDeduplicator<String>,
}

enum RenewFailure {
    Login(LoginError),
    Erp(ErpError),
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn SharedStore>,
        login: Arc<dyn LoginTransport>,
        key_prefix: &str,
        settings: TokenSettings,
    ) -> Self {
        let lock = DistributedLock::new(
            Arc::clone(&store),
            format!("{key_prefix}:auth:renewal-lock"),
            settings.lock,
        );
        Self {
            inner: Arc::new(Inner {
                store,
                login,
                lock,
                credential_key: format!("{key_prefix}:auth:credential"),
                settings,
                renewals: RequestDeduplicator::new(),
            }),
        }
    }

    /// Return a valid bearer token, renewing it when needed.
    ///
    /// With `force_refresh` the stored credential is discarded first.
    pub async fn get_token(&self, force_refresh: bool) -> Result<String, ErpError> {
        if force_refresh {
            self.inner.delete_credential().await;
        } else if let Some(credential) = self.inner.read_valid().await {
            return Ok(credential.token);
        }

        let inner = Arc::clone(&self.inner);
        self.inner
            .renewals
            .dedupe(RENEWAL_KEY, move || async move { inner.renew().await })
            .await
    }

    /// Drop the stored credential, e.g. after the ERP rejected it.
    pub async fn invalidate(&self) {
        self.inner.delete_credential().await;
        if let Err(e) = self.inner.lock.clear_stale().await {
            tracing::warn!(error = %e, "Could not check renewal lock for staleness");
        }
    }

    /// Drop the stored credential only if it still carries `rejected`.
    ///
    /// Callers holding a token the ERP refused use this so a credential
    /// renewed in the meantime survives their late rejection.
    pub async fn invalidate_if(&self, rejected: &str) {
        if self.inner.delete_credential_if(rejected).await {
            tracing::debug!("Dropped rejected credential");
            if let Err(e) = self.inner.lock.clear_stale().await {
                tracing::warn!(error = %e, "Could not check renewal lock for staleness");
            }
        }
    }

    /// The stored credential if it is still valid.
    pub async fn current(&self) -> Option<Credential> {
        self.inner.read_valid().await
    }
}

impl Inner {
    async fn read_valid(&self) -> Option<Credential> {
        match self.store.get_json::<Credential>(&self.credential_key).await {
            Ok(Some(credential)) if credential.is_valid_at(now_unix_millis()) => Some(credential),
            Ok(Some(_)) => {
                tracing::debug!("Stored credential is past its expiry");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Credential lookup failed; treating as missing");
                None
            }
        }
    }

    async fn delete_credential(&self) {
        if let Err(e) = self.store.delete(&self.credential_key).await {
            tracing::warn!(error = %e, "Failed to delete stored credential");
        }
    }

    /// Compare-and-delete on the raw stored record. Returns whether it was removed.
    async fn delete_credential_if(&self, rejected: &str) -> bool {
        let raw = match self.store.get(&self.credential_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, "Credential lookup failed; leaving it in place");
                return false;
            }
        };
        let holds_rejected = match serde_json::from_str::<Credential>(&raw) {
            Ok(credential) => credential.token == rejected,
            Err(_) => true,
        };
        if !holds_rejected {
            return false;
        }
        match self.store.delete_if_equals(&self.credential_key, &raw).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to delete stored credential");
                false
            }
        }
    }

    async fn renew(&self) -> Result<String, ErpError> {
        let max_attempts = self.settings.max_login_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.renew_once().await {
                Ok(token) => return Ok(token),
                Err(RenewFailure::Login(e)) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.settings.login_backoff * attempt;
                    tracing::warn!(attempt, error = %e, delay_ms = delay.as_millis(), "Login failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(RenewFailure::Login(e)) => {
                    tracing::error!(attempt, error = %e, "Login failed");
                    self.delete_credential().await;
                    return Err(e.into());
                }
                Err(RenewFailure::Erp(e)) => return Err(e),
            }
        }
    }

    /// One pass of lock, double-check, login, persist. The lock is released on every path.
    async fn renew_once(&self) -> Result<String, RenewFailure> {
        let this = self;
        let guard = match self
            .lock
            .acquire_or_resolve(move || async move { this.read_valid().await.map(|c| c.token) })
            .await
        {
            Acquisition::Acquired(guard) => guard,
            Acquisition::Resolved(token) => {
                tracing::debug!("Credential renewed by another instance while waiting");
                return Ok(token);
            }
            Acquisition::TimedOut => {
                return self
                    .read_valid()
                    .await
                    .map(|c| c.token)
                    .ok_or(RenewFailure::Erp(ErpError::LockTimeout));
            }
        };

        if let Some(credential) = self.read_valid().await {
            guard.release().await;
            return Ok(credential.token);
        }

        let result = match self.login.login().await {
            Ok(token) => {
                self.persist(&token).await;
                tracing::info!("Obtained new ERP credential");
                Ok(token)
            }
            Err(e) => Err(RenewFailure::Login(e)),
        };
        guard.release().await;
        result
    }

    async fn persist(&self, token: &str) {
        let issued_at_ms = now_unix_millis();
        let lifetime_ms = u64::try_from(self.settings.lifetime.as_millis()).unwrap_or(u64::MAX);
        let credential = Credential {
            token: token.to_string(),
            issued_at_ms,
            expires_at_ms: issued_at_ms.saturating_add(lifetime_ms),
        };
        let ttl = self.settings.lifetime.saturating_sub(self.settings.store_margin);
        if let Err(e) = self
            .store
            .set_json(&self.credential_key, &credential, ttl)
            .await
        {
            tracing::warn!(error = %e, "Failed to persist credential; other instances will log in again");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeLogin {
        calls: AtomicUsize,
        delay: Duration,
        script: Mutex<VecDeque<Result<String, LoginError>>>,
    }

    impl FakeLogin {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn scripted(outcomes: Vec<Result<String, LoginError>>) -> Self {
            Self {
                script: Mutex::new(outcomes.into()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LoginTransport for FakeLogin {
        async fn login(&self) -> Result<String, LoginError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(format!("token-{n}")))
        }
    }

    fn server_error() -> LoginError {
        LoginError::Status {
            status: 503,
            body: "maintenance".to_string(),
        }
    }

    fn settings() -> TokenSettings {
        TokenSettings {
            lifetime: Duration::from_secs(60),
            store_margin: Duration::from_secs(1),
            lock: LockSettings {
                ttl: Duration::from_secs(5),
                poll_interval: Duration::from_millis(10),
                wait_ceiling: Duration::from_secs(2),
            },
            max_login_attempts: 3,
            login_backoff: Duration::from_millis(5),
        }
    }

    fn manager(store: &MemoryStore, login: &Arc<FakeLogin>, settings: TokenSettings) -> TokenManager {
        TokenManager::new(
            Arc::new(store.clone()),
            Arc::clone(login) as Arc<dyn LoginTransport>,
            "test",
            settings,
        )
    }

    #[tokio::test]
    async fn concurrent_callers_trigger_one_login() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::slow(Duration::from_millis(50)));
        let tm = manager(&store, &login, settings());

        let calls = (0..16).map(|_| tm.get_token(false));
        let tokens = futures::future::join_all(calls).await;

        assert_eq!(login.calls(), 1);
        for token in tokens {
            assert_eq!(token.unwrap(), "token-1");
        }
    }

    #[tokio::test]
    async fn instances_sharing_a_store_log_in_once() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::slow(Duration::from_millis(100)));
        let a = manager(&store, &login, settings());
        let b = manager(&store, &login, settings());

        let (ta, tb) = tokio::join!(a.get_token(false), b.get_token(false));

        assert_eq!(login.calls(), 1);
        assert_eq!(ta.unwrap(), tb.unwrap());
    }

    #[tokio::test]
    async fn cached_token_is_reused() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::default());
        let tm = manager(&store, &login, settings());

        assert_eq!(tm.get_token(false).await.unwrap(), "token-1");
        assert_eq!(tm.get_token(false).await.unwrap(), "token-1");
        assert_eq!(login.calls(), 1);
        assert!(tm.current().await.is_some());
    }

    #[tokio::test]
    async fn expired_credential_is_not_returned_even_if_stored() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::default());
        let tm = manager(&store, &login, settings());

        let stale = Credential {
            token: "stale".to_string(),
            issued_at_ms: 0,
            expires_at_ms: now_unix_millis() - 1,
        };
        store
            .set_json("test:auth:credential", &stale, Duration::from_secs(600))
            .await
            .unwrap();

        assert!(tm.current().await.is_none());
        assert_eq!(tm.get_token(false).await.unwrap(), "token-1");
        assert_eq!(login.calls(), 1);
    }

    #[tokio::test]
    async fn force_refresh_replaces_valid_token() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::default());
        let tm = manager(&store, &login, settings());

        assert_eq!(tm.get_token(false).await.unwrap(), "token-1");
        assert_eq!(tm.get_token(true).await.unwrap(), "token-2");
        assert_eq!(tm.get_token(false).await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn transient_login_failures_are_retried() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::scripted(vec![Err(server_error()), Err(server_error())]));
        let tm = manager(&store, &login, settings());

        assert_eq!(tm.get_token(false).await.unwrap(), "token-3");
        assert_eq!(login.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_login_retries_surface_service_unavailable() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::scripted(vec![
            Err(server_error()),
            Err(server_error()),
            Err(server_error()),
        ]));
        let tm = manager(&store, &login, settings());

        let err = tm.get_token(false).await.unwrap_err();
        assert!(matches!(err, ErpError::ServiceUnavailable(_)));
        assert_eq!(login.calls(), 3);
        assert!(store.get("test:auth:credential").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_credentials_fail_without_retry_and_free_the_lock() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::scripted(vec![Err(LoginError::Status {
            status: 401,
            body: "invalid user".to_string(),
        })]));
        let tm = manager(&store, &login, settings());

        let err = tm.get_token(false).await.unwrap_err();
        assert!(matches!(err, ErpError::AuthFailed(_)));
        assert_eq!(login.calls(), 1);
        assert!(store.get("test:auth:renewal-lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_login_response_is_auth_failure() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::scripted(vec![Err(LoginError::MalformedResponse(
            "{\"error\":\"x\"}".to_string(),
        ))]));
        let tm = manager(&store, &login, settings());

        assert!(matches!(
            tm.get_token(false).await,
            Err(ErpError::AuthFailed(_))
        ));
    }

    #[tokio::test]
    async fn lock_timeout_when_another_holder_never_finishes() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::default());
        let mut s = settings();
        s.lock.wait_ceiling = Duration::from_millis(60);
        let tm = manager(&store, &login, s);

        store
            .set("test:auth:renewal-lock", "other:0", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(tm.get_token(false).await.unwrap_err(), ErpError::LockTimeout);
        assert_eq!(login.calls(), 0);
    }

    #[tokio::test]
    async fn waiting_instance_picks_up_token_stored_elsewhere() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::default());
        let mut s = settings();
        s.lock.wait_ceiling = Duration::from_millis(60);
        let tm = manager(&store, &login, s);

        store
            .set("test:auth:renewal-lock", "other:0", Duration::from_secs(60))
            .await
            .unwrap();
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let credential = Credential {
                    token: "from-elsewhere".to_string(),
                    issued_at_ms: now_unix_millis(),
                    expires_at_ms: now_unix_millis() + 60_000,
                };
                store
                    .set_json("test:auth:credential", &credential, Duration::from_secs(60))
                    .await
                    .unwrap();
            })
        };

        assert_eq!(tm.get_token(false).await.unwrap(), "from-elsewhere");
        writer.await.unwrap();
        assert_eq!(login.calls(), 0);
    }

    #[tokio::test]
    async fn invalidate_drops_credential() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::default());
        let tm = manager(&store, &login, settings());

        tm.get_token(false).await.unwrap();
        tm.invalidate().await;
        assert!(tm.current().await.is_none());
        assert_eq!(tm.get_token(false).await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn late_rejection_of_old_token_keeps_renewed_credential() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::default());
        let tm = manager(&store, &login, settings());

        let old = tm.get_token(false).await.unwrap();
        tm.invalidate_if(&old).await;
        assert_eq!(tm.get_token(false).await.unwrap(), "token-2");

        tm.invalidate_if(&old).await;
        assert_eq!(tm.current().await.unwrap().token, "token-2");
        assert_eq!(tm.get_token(false).await.unwrap(), "token-2");
        assert_eq!(login.calls(), 2);
    }

    #[tokio::test]
    async fn credential_store_ttl_is_shorter_than_lifetime() {
        let store = MemoryStore::default();
        let login = Arc::new(FakeLogin::default());
        let tm = manager(
            &store,
            &login,
            TokenSettings {
                lifetime: Duration::from_millis(300),
                store_margin: Duration::from_millis(250),
                ..settings()
            },
        );

        tm.get_token(false).await.unwrap();
        let credential = tm.current().await.unwrap();
        assert_eq!(credential.expires_at_ms - credential.issued_at_ms, 300);

        tokio::time::sleep(Duration::from_millis(100)).await;
        // Evicted from the store after 50ms although semantically valid for 300ms.
        assert!(tm.current().await.is_none());
    }
}
