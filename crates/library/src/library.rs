use crate::error::{ErrorKind, Result};
use crate::fetch;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::instrument;
use yomu_api::models::{Entry, ReadingStatus};
use yomu_config::LibraryConfig;
use yomu_session::Session;

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryRecord {
    pub entry: Entry,
    pub status: ReadingStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibraryState {
    /// Entry id to record. An entry without a status is absent.
    pub records: BTreeMap<String, LibraryRecord>,
    pub is_syncing: bool,
    pub error: Option<ErrorKind>,
}
impl LibraryState {
    /// Records with `status`, in title order.
    pub fn with_status(&self, status: ReadingStatus, language: &str) -> Vec<&LibraryRecord> {
        let mut records: Vec<_> = self.records.values().filter(|record| record.status == status).collect();
        records.sort_by_cached_key(|record| record.entry.display_title(language).to_lowercase());
        records
    }
}

struct Inner {
    session: Session,
    concurrency: usize,
    state: watch::Sender<LibraryState>,
}

/// The user's reading-status library.
#[derive(Clone)]
pub struct Library {
    inner: Arc<Inner>,
}

impl Library {
    pub fn new(session: Session, concurrency: usize) -> Self {
        let (state, _) = watch::channel(LibraryState::default());
        Self { inner: Arc::new(Inner { session, concurrency: concurrency.max(1), state }) }
    }

    pub fn from_config(session: Session, config: &LibraryConfig) -> Self {
        Self::new(session, config.concurrency)
    }

    pub fn subscribe(&self) -> watch::Receiver<LibraryState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> LibraryState {
        self.inner.state.borrow().clone()
    }

    pub fn status_of(&self, entry_id: &str) -> Option<ReadingStatus> {
        self.inner.state.borrow().records.get(entry_id).map(|record| record.status)
    }

    /// Replace the local library with the service's. Returns the number of
    /// records kept.
    ///
    /// Status strings this client does not know are skipped, and so are
    /// entries whose details fail to load.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<usize> {
        if !self.inner.session.is_authenticated() {
            self.inner.state.send_modify(|state| state.error = Some(ErrorKind::TokenExpired));
            exn::bail!(ErrorKind::TokenExpired);
        }
        self.inner.state.send_modify(|state| state.is_syncing = true);
        match self.fetch_records().await {
            Ok(records) => {
                let count = records.len();
                tracing::info!(records = count, "Synced library");
                self.inner.state.send_modify(|state| {
                    state.records = records;
                    state.is_syncing = false;
                    state.error = None;
                });
                Ok(count)
            },
            Err(err) => {
                tracing::warn!(error = %*err, "Library sync failed");
                self.inner.state.send_modify(|state| {
                    state.is_syncing = false;
                    state.error = Some((*err).clone());
                });
                Err(err)
            },
        }
    }

    async fn fetch_records(&self) -> Result<BTreeMap<String, LibraryRecord>> {
        let session = &self.inner.session;
        let token = session.ensure_valid().await.map_err(ErrorKind::session)?;
        let raw = session.client().reading_statuses(&token).await.map_err(ErrorKind::api)?;

        let mut statuses = BTreeMap::new();
        for (id, status) in raw {
            match status.parse::<ReadingStatus>() {
                Ok(status) => {
                    statuses.insert(id, status);
                },
                Err(_) => tracing::debug!(%id, %status, "Skipping unknown reading status"),
            }
        }

        let ids = statuses.keys().cloned().collect();
        let entries = fetch::entries(session.client(), ids, self.inner.concurrency).await;
        Ok(entries
            .into_iter()
            .filter_map(|(id, entry)| {
                let status = *statuses.get(&id)?;
                Some((id, LibraryRecord { entry, status }))
            })
            .collect())
    }

    /// Set, or with `None` clear, the status of `entry`. The local library
    /// only changes once the service has accepted the update.
    #[instrument(skip_all, fields(entry = %entry.id, status = ?status))]
    pub async fn update_status(&self, entry: &Entry, status: Option<ReadingStatus>) -> Result<()> {
        let session = &self.inner.session;
        let token = session.ensure_valid().await.map_err(ErrorKind::session)?;
        session.client().set_reading_status(&token, &entry.id, status).await.map_err(ErrorKind::api)?;
        self.inner.state.send_modify(|state| match status {
            Some(status) => {
                state.records.insert(entry.id.clone(), LibraryRecord { entry: entry.clone(), status });
            },
            None => {
                state.records.remove(&entry.id);
            },
        });
        tracing::info!("Updated reading status");
        Ok(())
    }

    pub async fn remove(&self, entry: &Entry) -> Result<()> {
        self.update_status(entry, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Follows;
    use crate::testing::{serve_entry, signed_in, signed_out};
    use serde_json::json;
    use std::time::Duration;
    use yomu_api::transport::{Body, Method, MockTransport};
    use yomu_storage::backend::MemoryStore;

    #[tokio::test]
    async fn test_sync_requires_login() {
        let transport = Arc::new(MockTransport::default());
        let library = Library::new(signed_out(&transport).await, 8);
        let err = library.sync().await.unwrap_err();
        assert_eq!(*err, ErrorKind::TokenExpired);
        assert_eq!(library.state().error, Some(ErrorKind::TokenExpired));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sync_replaces_records() {
        let transport = Arc::new(MockTransport::default());
        let session = signed_in(&transport).await;
        transport.respond(
            Method::Get,
            "/manga/status",
            200,
            json!({"result": "ok", "statuses": {"m1": "reading", "m2": "on_hold", "m3": "someday", "m4": "completed"}}),
        );
        serve_entry(&transport, "m1", "First");
        serve_entry(&transport, "m2", "Second");
        serve_entry(&transport, "m3", "Third");
        transport.respond(Method::Get, "/manga/m4", 500, json!({}));

        let library = Library::new(session, 2);
        assert_eq!(library.sync().await.unwrap(), 2);

        let state = library.state();
        assert_eq!(state.records.keys().map(String::as_str).collect::<Vec<_>>(), ["m1", "m2"]);
        assert_eq!(library.status_of("m2"), Some(ReadingStatus::OnHold));
        assert!(!state.is_syncing);
        // The unknown status was never fetched.
        assert_eq!(transport.call_count(Method::Get, "/manga/m3"), 0);
        let status_call = transport.calls().into_iter().find(|call| call.path() == "/manga/status").unwrap();
        assert_eq!(status_call.bearer.as_deref(), Some("token"));

        transport.respond(Method::Get, "/manga/status", 200, json!({"result": "ok", "statuses": []}));
        assert_eq!(library.sync().await.unwrap(), 0);
        assert!(library.state().records.is_empty());
    }

    #[tokio::test]
    async fn test_update_status() {
        let transport = Arc::new(MockTransport::default());
        let library = Library::new(signed_in(&transport).await, 8);
        let entry = Entry::placeholder("m1");

        transport.respond(Method::Post, "/manga/m1/status", 200, json!({"result": "ok"}));
        library.update_status(&entry, Some(ReadingStatus::PlanToRead)).await.unwrap();
        assert_eq!(library.status_of("m1"), Some(ReadingStatus::PlanToRead));
        let calls = transport.calls();
        let Body::Json(body) = &calls.last().unwrap().body else {
            panic!("expected a JSON body");
        };
        assert_eq!(body, &json!({"status": "plan_to_read"}));

        library.remove(&entry).await.unwrap();
        assert_eq!(library.status_of("m1"), None);
        let calls = transport.calls();
        let Body::Json(body) = &calls.last().unwrap().body else {
            panic!("expected a JSON body");
        };
        assert_eq!(body, &json!({"status": null}));
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_library() {
        let transport = Arc::new(MockTransport::default());
        let library = Library::new(signed_in(&transport).await, 8);
        let entry = Entry::placeholder("m1");
        transport.respond(Method::Post, "/manga/m1/status", 200, json!({"result": "ok"}));
        library.update_status(&entry, Some(ReadingStatus::Reading)).await.unwrap();

        transport.respond(Method::Post, "/manga/m1/status", 403, json!({"errors": [{"detail": "Forbidden"}]}));
        let err = library.update_status(&entry, Some(ReadingStatus::Dropped)).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Server("Forbidden".into()));
        assert_eq!(library.status_of("m1"), Some(ReadingStatus::Reading));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_mutations_share_one_refresh() {
        let transport = Arc::new(MockTransport::default());
        let session = signed_in(&transport).await;
        transport.set_latency(Duration::from_millis(50));
        transport.respond(Method::Get, "/auth/check", 401, json!({"result": "error"}));
        transport.respond(Method::Post, "/realms/x/token", 200, json!({"access_token": "fresh", "refresh_token": "r2"}));
        transport.respond(Method::Post, "/manga/m1/status", 200, json!({"result": "ok"}));
        transport.respond(Method::Get, "/user/follows/manga/m2", 404, json!({"result": "error"}));
        transport.respond(Method::Post, "/manga/m2/follow", 200, json!({"result": "ok"}));
        transport.respond(Method::Get, "/user/follows/manga/feed", 200, json!({"data": [], "total": 0}));

        let library = Library::new(session.clone(), 8);
        let follows = Follows::new(session, Arc::new(MemoryStore::default()), 8);
        let m1 = Entry::placeholder("m1");
        let m2 = Entry::placeholder("m2");
        let (updated, followed) = tokio::join!(
            library.update_status(&m1, Some(ReadingStatus::Reading)),
            follows.toggle(&m2),
        );
        updated.unwrap();
        assert!(followed.unwrap());

        // One check from the restore, one shared by both mutations.
        assert_eq!(transport.call_count(Method::Get, "/auth/check"), 2);
        assert_eq!(transport.call_count(Method::Post, "/realms/x/token"), 1);
        let calls = transport.calls();
        let bearers: Vec<_> = calls
            .iter()
            .filter(|call| matches!(call.path(), "/manga/m1/status" | "/manga/m2/follow"))
            .map(|call| call.bearer.as_deref())
            .collect();
        assert_eq!(bearers, [Some("fresh"), Some("fresh")]);
    }
}
