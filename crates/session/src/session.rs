use crate::error::{Error, ErrorKind, Result};
use crate::keys;
use crate::state::AuthState;
use exn::ResultExt;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, watch};
use tracing::instrument;
use yomu_api::Client;
use yomu_api::error::ErrorKind as ApiErrorKind;
use yomu_api::models::Credentials;
use yomu_storage::{KeyValueStore, StoreHandle, get_string};

/// Outcome of one validate-then-refresh probe, shared by every caller that
/// asked for a valid token while it was running.
type Flight = Shared<BoxFuture<'static, std::result::Result<String, ErrorKind>>>;

/// In-memory mirror of the persisted credentials.
#[derive(Default)]
struct Stored {
    access_token: Option<String>,
    refresh_token: Option<String>,
    username: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

struct Inner {
    client: Client,
    secrets: StoreHandle,
    preferences: StoreHandle,
    /// Credential lock: every read-modify-persist of credentials holds it.
    stored: Mutex<Stored>,
    flight: SyncMutex<Option<Flight>>,
    state: watch::Sender<AuthState>,
}

/// The login session.
///
/// Cheap to clone; clones share state. Observers follow
/// [`subscribe()`](Self::subscribe) rather than polling.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

async fn read(store: &dyn KeyValueStore, key: &str) -> Result<Option<String>> {
    get_string(store, key).await.or_raise(|| ErrorKind::Storage)
}

async fn persist(store: &dyn KeyValueStore, key: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => store.put(key, value.as_bytes()).await.or_raise(|| ErrorKind::Storage),
        None => store.remove(key).await.or_raise(|| ErrorKind::Storage),
    }
}

impl Session {
    /// Load whatever credentials were persisted by a previous run. Nothing
    /// is published as authenticated until [`restore()`](Self::restore) or
    /// [`login()`](Self::login) succeeds.
    pub async fn open(client: Client, secrets: StoreHandle, preferences: StoreHandle) -> Result<Self> {
        let stored = Stored {
            access_token: read(&*secrets, keys::ACCESS_TOKEN).await?,
            refresh_token: read(&*secrets, keys::REFRESH_TOKEN).await?,
            username: read(&*preferences, keys::USERNAME).await?,
            client_id: read(&*preferences, keys::CLIENT_ID).await?,
            client_secret: read(&*preferences, keys::CLIENT_SECRET).await?,
        };
        tracing::debug!(
            secrets = secrets.name(),
            preferences = preferences.name(),
            has_token = stored.access_token.is_some(),
            "Opened session"
        );
        let (state, _) = watch::channel(AuthState::default());
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                secrets,
                preferences,
                stored: Mutex::new(stored),
                flight: SyncMutex::new(None),
                state,
            }),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().authenticated
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// The current access token, without checking it.
    pub async fn access_token(&self) -> Option<String> {
        self.inner.stored.lock().await.access_token.clone()
    }

    /// Resume a persisted session.
    ///
    /// Returns `Ok(false)` when there is nothing to resume. If the stored
    /// token can be neither validated nor refreshed the session is logged out
    /// and the error returned.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<bool> {
        let username = {
            let stored = self.inner.stored.lock().await;
            stored.username.clone().filter(|_| stored.access_token.is_some())
        };
        let Some(username) = username else {
            return Ok(false);
        };
        match self.ensure_valid().await {
            Ok(_) => {
                tracing::info!(%username, "Restored session");
                self.inner.state.send_replace(AuthState::signed_in(username));
                Ok(true)
            },
            Err(err) => {
                tracing::info!(error = %*err, "Stored session is no longer valid; logging out");
                self.logout().await?;
                Err(err)
            },
        }
    }

    /// Password grant.
    ///
    /// The client pair is remembered even when the grant fails, so a later
    /// refresh (or the next login form) can reuse it.
    #[instrument(skip_all, fields(username = %credentials.username))]
    pub async fn login(&self, credentials: Credentials) -> Result<()> {
        {
            let mut stored = self.inner.stored.lock().await;
            persist(&*self.inner.preferences, keys::CLIENT_ID, Some(&credentials.client_id)).await?;
            persist(&*self.inner.preferences, keys::CLIENT_SECRET, Some(&credentials.client_secret)).await?;
            stored.client_id = Some(credentials.client_id.clone());
            stored.client_secret = Some(credentials.client_secret.clone());
        }

        let grant = match self.inner.client.password_grant(&credentials).await {
            Ok(grant) => grant,
            Err(err) => {
                let kind = match &*err {
                    ApiErrorKind::Server { status: 401, .. } => ErrorKind::InvalidCredentials,
                    other => ErrorKind::from_api(other),
                };
                tracing::warn!(error = %kind, "Login failed");
                return Err(err).or_raise(|| kind);
            },
        };

        {
            let mut stored = self.inner.stored.lock().await;
            persist(&*self.inner.secrets, keys::ACCESS_TOKEN, Some(&grant.access_token)).await?;
            persist(&*self.inner.secrets, keys::REFRESH_TOKEN, grant.refresh_token.as_deref()).await?;
            persist(&*self.inner.preferences, keys::USERNAME, Some(&credentials.username)).await?;
            stored.access_token = Some(grant.access_token);
            stored.refresh_token = grant.refresh_token;
            stored.username = Some(credentials.username.clone());
        }
        self.inner.state.send_replace(AuthState::signed_in(credentials.username));
        tracing::info!("Logged in");
        Ok(())
    }

    /// Refresh grant. Returns the new access token.
    ///
    /// Any failure is [`RefreshFailed`](ErrorKind::RefreshFailed) and leaves
    /// the stored credentials as they were; whether to log out is the
    /// caller's decision.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<String> {
        let (refresh_token, client_id, client_secret) = {
            let stored = self.inner.stored.lock().await;
            match (&stored.refresh_token, &stored.client_id, &stored.client_secret) {
                (Some(token), Some(id), Some(secret)) => (token.clone(), id.clone(), secret.clone()),
                _ => exn::bail!(ErrorKind::RefreshFailed),
            }
        };
        let grant = self
            .inner
            .client
            .refresh_grant(&refresh_token, &client_id, &client_secret)
            .await
            .or_raise(|| ErrorKind::RefreshFailed)?;

        let mut stored = self.inner.stored.lock().await;
        if stored.refresh_token.as_deref() != Some(refresh_token.as_str()) {
            // Logged out (or in again) while the grant was in flight.
            exn::bail!(ErrorKind::RefreshFailed);
        }
        let refresh_token = grant.refresh_token.unwrap_or(refresh_token);
        persist(&*self.inner.secrets, keys::ACCESS_TOKEN, Some(&grant.access_token))
            .await
            .or_raise(|| ErrorKind::RefreshFailed)?;
        persist(&*self.inner.secrets, keys::REFRESH_TOKEN, Some(&refresh_token))
            .await
            .or_raise(|| ErrorKind::RefreshFailed)?;
        stored.access_token = Some(grant.access_token.clone());
        stored.refresh_token = Some(refresh_token);
        tracing::debug!("Refreshed access token");
        Ok(grant.access_token)
    }

    /// Whether the service accepts the current access token right now.
    ///
    /// Never fails: a missing token, a rejected probe and an unreachable
    /// service all mean "needs refresh".
    pub async fn validate(&self) -> bool {
        let Some(token) = self.access_token().await else {
            return false;
        };
        match self.inner.client.auth_check(&token).await {
            Ok(valid) => valid,
            Err(err) => {
                tracing::debug!(error = %*err, "Token probe failed");
                false
            },
        }
    }

    /// A token the service currently accepts, refreshing it first if needed.
    ///
    /// Concurrent callers share a single validate-then-refresh probe, so at
    /// most one refresh grant is in flight per session. A failed refresh is
    /// reported as [`TokenExpired`](ErrorKind::TokenExpired).
    pub async fn ensure_valid(&self) -> Result<String> {
        if self.access_token().await.is_none() {
            exn::bail!(ErrorKind::TokenExpired);
        }
        let flight = {
            let mut slot = self.lock_flight();
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let flight = self.clone().probe().boxed().shared();
                    *slot = Some(flight.clone());
                    flight
                },
            }
        };
        flight.await.map_err(Error::from)
    }

    async fn probe(self) -> std::result::Result<String, ErrorKind> {
        let outcome = match self.validate().await {
            true => self.access_token().await.ok_or(ErrorKind::TokenExpired),
            false => self.refresh().await.map_err(|err| {
                tracing::warn!(error = %*err, "Could not refresh session");
                ErrorKind::TokenExpired
            }),
        };
        *self.lock_flight() = None;
        outcome
    }

    fn lock_flight(&self) -> MutexGuard<'_, Option<Flight>> {
        self.inner.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget every credential, locally and on disk. Idempotent.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let mut stored = self.inner.stored.lock().await;
        persist(&*self.inner.secrets, keys::ACCESS_TOKEN, None).await?;
        persist(&*self.inner.secrets, keys::REFRESH_TOKEN, None).await?;
        persist(&*self.inner.preferences, keys::USERNAME, None).await?;
        persist(&*self.inner.preferences, keys::CLIENT_ID, None).await?;
        persist(&*self.inner.preferences, keys::CLIENT_SECRET, None).await?;
        *stored = Stored::default();
        self.inner.state.send_replace(AuthState::default());
        tracing::info!("Logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use yomu_api::Endpoints;
    use yomu_api::transport::{Method, MockTransport};
    use yomu_storage::backend::MemoryStore;

    const TOKEN_PATH: &str = "/realms/mangadex/protocol/openid-connect/token";

    struct Fixture {
        transport: Arc<MockTransport>,
        secrets: Arc<MemoryStore>,
        preferences: Arc<MemoryStore>,
        session: Session,
    }

    async fn fixture(secrets: MemoryStore, preferences: MemoryStore) -> Fixture {
        let transport = Arc::new(MockTransport::default());
        let endpoints = Endpoints::parse(
            "https://api.test",
            "https://auth.test/realms/mangadex/protocol/openid-connect/token",
            "https://uploads.test",
        )
        .unwrap();
        let client = Client::new(transport.clone(), endpoints, "en");
        let secrets = Arc::new(secrets);
        let preferences = Arc::new(preferences);
        let session = Session::open(client, secrets.clone(), preferences.clone()).await.unwrap();
        Fixture { transport, secrets, preferences, session }
    }

    async fn signed_in() -> Fixture {
        fixture(
            MemoryStore::with_entries([("access_token", "old-access"), ("refresh_token", "r1")]),
            MemoryStore::with_entries([("username", "reader"), ("client_id", "cid"), ("client_secret", "secret")]),
        )
        .await
    }

    fn credentials(password: &str) -> Credentials {
        Credentials {
            username: "reader".into(),
            password: password.into(),
            client_id: "cid".into(),
            client_secret: "secret".into(),
        }
    }

    #[tokio::test]
    async fn test_login_persists_and_publishes() {
        let f = fixture(MemoryStore::default(), MemoryStore::default()).await;
        f.transport.respond(Method::Post, TOKEN_PATH, 200, json!({"access_token": "a1", "refresh_token": "r1"}));
        let mut state = f.session.subscribe();

        f.session.login(credentials("correct")).await.unwrap();

        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), AuthState::signed_in("reader"));
        assert_eq!(f.secrets.peek("access_token").await, Some(b"a1".to_vec()));
        assert_eq!(f.secrets.peek("refresh_token").await, Some(b"r1".to_vec()));
        assert_eq!(f.preferences.peek("username").await, Some(b"reader".to_vec()));
        assert_eq!(f.preferences.peek("client_id").await, Some(b"cid".to_vec()));
        // Tokens never land in the preferences store.
        assert_eq!(f.preferences.peek("access_token").await, None);
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let f = fixture(MemoryStore::default(), MemoryStore::default()).await;
        f.transport.respond(
            Method::Post,
            TOKEN_PATH,
            401,
            json!({"error": "invalid_grant", "error_description": "Invalid user credentials"}),
        );
        let err = f.session.login(credentials("wrong")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidCredentials);
        assert!(!f.session.is_authenticated());
        assert_eq!(f.secrets.peek("access_token").await, None);
        // The client pair is still remembered.
        assert_eq!(f.preferences.peek("client_secret").await, Some(b"secret".to_vec()));
    }

    #[tokio::test]
    async fn test_login_error_classification() {
        let f = fixture(MemoryStore::default(), MemoryStore::default()).await;

        f.transport.respond(Method::Post, TOKEN_PATH, 400, json!({"error_description": "Account is disabled"}));
        let err = f.session.login(credentials("pw")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Server("Account is disabled".into()));

        f.transport.respond_bytes(Method::Post, TOKEN_PATH, 503, Vec::new());
        let err = f.session.login(credentials("pw")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Server("Status code: 503".into()));

        f.transport.respond(Method::Post, TOKEN_PATH, 200, json!({"token": "wrong shape"}));
        let err = f.session.login(credentials("pw")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Decoding);

        f.transport.fail(Method::Post, TOKEN_PATH);
        let err = f.session.login(credentials("pw")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Network);
        assert!(!f.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_keeps_old_refresh_token() {
        let f = signed_in().await;
        f.transport.route(Method::Post, TOKEN_PATH, |request| {
            assert_eq!(request.form_value("grant_type"), Some("refresh_token"));
            assert_eq!(request.form_value("refresh_token"), Some("r1"));
            assert_eq!(request.form_value("client_id"), Some("cid"));
            yomu_api::transport::Response::json(200, &json!({"access_token": "a2"}))
        });
        assert_eq!(f.session.refresh().await.unwrap(), "a2");
        assert_eq!(f.secrets.peek("access_token").await, Some(b"a2".to_vec()));
        assert_eq!(f.secrets.peek("refresh_token").await, Some(b"r1".to_vec()));
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_credentials() {
        let f = signed_in().await;
        f.transport.respond(Method::Post, TOKEN_PATH, 400, json!({"error": "invalid_grant"}));
        let err = f.session.refresh().await.unwrap_err();
        assert_eq!(*err, ErrorKind::RefreshFailed);
        assert_eq!(f.session.access_token().await.as_deref(), Some("old-access"));
        assert_eq!(f.secrets.peek("refresh_token").await, Some(b"r1".to_vec()));

        f.transport.fail(Method::Post, TOKEN_PATH);
        assert_eq!(*f.session.refresh().await.unwrap_err(), ErrorKind::RefreshFailed);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let f = fixture(MemoryStore::default(), MemoryStore::default()).await;
        assert_eq!(*f.session.refresh().await.unwrap_err(), ErrorKind::RefreshFailed);
        assert_eq!(f.transport.calls().len(), 0);
    }

    #[tokio::test]
    async fn test_validate_never_fails() {
        let f = signed_in().await;
        f.transport.respond(Method::Get, "/auth/check", 200, json!({"isAuthenticated": true}));
        assert!(f.session.validate().await);
        f.transport.respond(Method::Get, "/auth/check", 401, json!({}));
        assert!(!f.session.validate().await);
        f.transport.respond(Method::Get, "/auth/check", 500, json!({}));
        assert!(!f.session.validate().await);
        f.transport.fail(Method::Get, "/auth/check");
        assert!(!f.session.validate().await);
        assert_eq!(f.transport.calls()[0].bearer.as_deref(), Some("old-access"));

        let anonymous = fixture(MemoryStore::default(), MemoryStore::default()).await;
        assert!(!anonymous.session.validate().await);
        assert_eq!(anonymous.transport.calls().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_ensure_valid_refreshes_once() {
        let f = signed_in().await;
        f.transport.set_latency(Duration::from_millis(50));
        f.transport.respond(Method::Get, "/auth/check", 401, json!({}));
        f.transport.respond(Method::Post, TOKEN_PATH, 200, json!({"access_token": "fresh", "refresh_token": "r2"}));

        let results = futures::future::join_all((0..8).map(|_| f.session.ensure_valid())).await;
        for result in results {
            assert_eq!(result.unwrap(), "fresh");
        }
        assert_eq!(f.transport.call_count(Method::Get, "/auth/check"), 1);
        assert_eq!(f.transport.call_count(Method::Post, TOKEN_PATH), 1);

        // Once settled, the next caller probes again.
        f.transport.respond(Method::Get, "/auth/check", 200, json!({}));
        assert_eq!(f.session.ensure_valid().await.unwrap(), "fresh");
        assert_eq!(f.transport.call_count(Method::Get, "/auth/check"), 2);
        assert_eq!(f.transport.call_count(Method::Post, TOKEN_PATH), 1);
    }

    #[tokio::test]
    async fn test_ensure_valid_failures() {
        let anonymous = fixture(MemoryStore::default(), MemoryStore::default()).await;
        assert_eq!(*anonymous.session.ensure_valid().await.unwrap_err(), ErrorKind::TokenExpired);

        let f = signed_in().await;
        f.transport.respond(Method::Get, "/auth/check", 401, json!({}));
        f.transport.respond(Method::Post, TOKEN_PATH, 400, json!({}));
        assert_eq!(*f.session.ensure_valid().await.unwrap_err(), ErrorKind::TokenExpired);
        // Exactly one refresh attempt, no loop.
        assert_eq!(f.transport.call_count(Method::Post, TOKEN_PATH), 1);
    }

    #[tokio::test]
    async fn test_restore() {
        let f = signed_in().await;
        assert!(!f.session.is_authenticated());
        f.transport.respond(Method::Get, "/auth/check", 200, json!({}));
        assert!(f.session.restore().await.unwrap());
        assert_eq!(f.session.state(), AuthState::signed_in("reader"));

        let nothing = fixture(MemoryStore::default(), MemoryStore::default()).await;
        assert!(!nothing.session.restore().await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_expired_logs_out() {
        let f = signed_in().await;
        f.transport.respond(Method::Get, "/auth/check", 401, json!({}));
        f.transport.respond(Method::Post, TOKEN_PATH, 400, json!({}));
        let err = f.session.restore().await.unwrap_err();
        assert_eq!(*err, ErrorKind::TokenExpired);
        assert!(!f.session.is_authenticated());
        assert_eq!(f.secrets.peek("access_token").await, None);
        assert_eq!(f.preferences.peek("username").await, None);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let f = signed_in().await;
        f.transport.respond(Method::Get, "/auth/check", 200, json!({}));
        f.session.restore().await.unwrap();

        f.session.logout().await.unwrap();
        f.session.logout().await.unwrap();
        assert_eq!(f.session.state(), AuthState::default());
        assert!(f.secrets.keys().await.unwrap().is_empty());
        assert!(f.preferences.keys().await.unwrap().is_empty());
        assert_eq!(f.session.access_token().await, None);
    }

    #[tokio::test]
    async fn test_session_survives_reopen() {
        let f = fixture(MemoryStore::default(), MemoryStore::default()).await;
        f.transport.respond(Method::Post, TOKEN_PATH, 200, json!({"access_token": "a1", "refresh_token": "r1"}));
        f.session.login(credentials("pw")).await.unwrap();

        let reopened = Session::open(f.session.client().clone(), f.secrets.clone(), f.preferences.clone()).await.unwrap();
        f.transport.respond(Method::Get, "/auth/check", 200, json!({}));
        assert!(reopened.restore().await.unwrap());
        assert_eq!(reopened.access_token().await.as_deref(), Some("a1"));
    }
}
