use crate::InFlight;
use crate::error::{ErrorKind, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::instrument;
use yomu_api::Client;
use yomu_api::models::Chapter;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub entry_id: Option<String>,
    /// Chapters with a number, newest first.
    pub chapters: Vec<Chapter>,
    /// Offset of the next request. Advances only by accepted chapters.
    pub offset: u32,
    pub has_more: bool,
    pub is_loading: bool,
    pub error: Option<ErrorKind>,
}

#[derive(Default)]
struct Epoch {
    id: u64,
    entry_id: String,
}

struct Inner {
    client: Client,
    page_size: u32,
    epoch: Mutex<Epoch>,
    state: watch::Sender<FeedState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Incremental loader for one entry's chapter list.
///
/// Chapters without a number are dropped. The offset then trails the
/// service's own count and `has_more` may report one page too many; callers
/// get an empty final page rather than a missing one.
#[derive(Clone)]
pub struct ChapterFeed {
    inner: Arc<Inner>,
}

impl ChapterFeed {
    pub fn new(client: Client, page_size: u32) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        Self {
            inner: Arc::new(Inner { client, page_size: page_size.max(1), epoch: Mutex::new(Epoch::default()), state }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> FeedState {
        self.inner.state.borrow().clone()
    }

    /// Start over with `entry_id` and load its first page.
    #[instrument(level = "debug", skip(self))]
    pub async fn reset_and_load(&self, entry_id: &str) -> Result<()> {
        {
            let mut epoch = lock(&self.inner.epoch);
            epoch.id += 1;
            epoch.entry_id = entry_id.to_string();
            self.inner.state.send_modify(|state| {
                state.entry_id = Some(entry_id.to_string());
                state.chapters.clear();
                state.offset = 0;
                state.has_more = true;
                state.error = None;
            });
        }
        self.fetch_next(entry_id).await
    }

    /// Load the next page for `entry_id`. A no-op while a page is in flight,
    /// once the list is exhausted, or if the feed currently shows another
    /// entry. A feed that has never been loaded starts with `entry_id`.
    pub async fn load_more(&self, entry_id: &str) -> Result<()> {
        if self.inner.state.borrow().entry_id.is_none() {
            return self.reset_and_load(entry_id).await;
        }
        self.fetch_next(entry_id).await
    }

    async fn fetch_next(&self, entry_id: &str) -> Result<()> {
        let claimed = self.inner.state.send_if_modified(|state| {
            let ready = !state.is_loading && state.has_more && state.entry_id.as_deref() == Some(entry_id);
            state.is_loading |= ready;
            ready
        });
        if !claimed {
            return Ok(());
        }
        let _in_flight = InFlight::new(&self.inner.state, |state| std::mem::replace(&mut state.is_loading, false));

        loop {
            let (epoch, entry_id) = {
                let epoch = lock(&self.inner.epoch);
                (epoch.id, epoch.entry_id.clone())
            };
            let offset = self.inner.state.borrow().offset;
            let result = self.inner.client.chapter_feed(&entry_id, self.inner.page_size, offset).await;

            let current = lock(&self.inner.epoch);
            if current.id != epoch {
                tracing::debug!(stale = %entry_id, current = %current.entry_id, "Entry changed mid-load; starting over");
                continue;
            }
            return match result {
                Ok(page) => {
                    let received = page.data.len();
                    let accepted: Vec<Chapter> = page.data.into_iter().filter(Chapter::has_number).collect();
                    tracing::debug!(%entry_id, offset, received, accepted = accepted.len(), total = page.total, "Loaded chapters");
                    self.inner.state.send_modify(|state| {
                        state.offset += accepted.len() as u32;
                        state.chapters.extend(accepted);
                        state.has_more = received > 0 && page.total > state.offset;
                        state.is_loading = false;
                        state.error = None;
                    });
                    Ok(())
                },
                Err(err) => {
                    tracing::warn!(error = %*err, %entry_id, "Could not load chapters");
                    let err = ErrorKind::api(err);
                    self.inner.state.send_modify(|state| {
                        state.is_loading = false;
                        state.error = Some((*err).clone());
                    });
                    Err(err)
                },
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::time::Duration;
    use yomu_api::Endpoints;
    use yomu_api::transport::{Method, MockTransport};

    fn chapter_json(id: &str, number: Option<&str>) -> Value {
        json!({"id": id, "type": "chapter", "attributes": {"chapter": number, "translatedLanguage": "en", "pages": 12}})
    }

    fn feed(transport: &Arc<MockTransport>) -> ChapterFeed {
        let endpoints =
            Endpoints::parse("https://api.test", "https://auth.test/realms/x/token", "https://uploads.test").unwrap();
        ChapterFeed::new(Client::new(transport.clone(), endpoints, "en"), 20)
    }

    fn page(total: u32, numbered: usize, unnumbered: usize) -> Value {
        let mut data: Vec<Value> = (0..numbered).map(|n| chapter_json(&format!("c{n}"), Some(n.to_string().as_str()))).collect();
        data.extend((0..unnumbered).map(|n| chapter_json(&format!("x{n}"), None)));
        json!({"data": data, "total": total, "limit": 20, "offset": 0})
    }

    #[tokio::test]
    async fn test_offset_advances_by_accepted() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Method::Get, "/manga/m1/feed", 200, page(25, 18, 2));
        let feed = feed(&transport);

        feed.reset_and_load("m1").await.unwrap();
        let state = feed.state();
        assert_eq!(state.chapters.len(), 18);
        assert_eq!(state.offset, 18);
        assert!(state.has_more);

        let calls = transport.calls();
        let request = &calls[0];
        assert_eq!(request.query_value("translatedLanguage[]").as_deref(), Some("en"));
        assert_eq!(request.query_value("order[chapter]").as_deref(), Some("desc"));
        assert_eq!(request.query_value("includes[]").as_deref(), Some("scanlation_group"));
        assert_eq!(request.query_values("contentRating[]").len(), 4);

        transport.respond(Method::Get, "/manga/m1/feed", 200, page(25, 5, 0));
        feed.load_more("m1").await.unwrap();
        assert_eq!(transport.calls()[1].query_value("offset").as_deref(), Some("18"));
        let state = feed.state();
        assert_eq!(state.offset, 23);
        // Two unnumbered chapters were never counted, so one more page is requested.
        assert!(state.has_more);

        transport.respond(Method::Get, "/manga/m1/feed", 200, page(25, 0, 0));
        feed.load_more("m1").await.unwrap();
        assert!(!feed.state().has_more);
        feed.load_more("m1").await.unwrap();
        assert_eq!(transport.call_count(Method::Get, "/manga/m1/feed"), 3);
    }

    #[tokio::test]
    async fn test_load_more_other_entry_is_ignored() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Method::Get, "/manga/m1/feed", 200, page(40, 20, 0));
        let feed = feed(&transport);
        feed.reset_and_load("m1").await.unwrap();

        feed.load_more("m2").await.unwrap();
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(feed.state().entry_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_error_is_published() {
        let transport = Arc::new(MockTransport::default());
        transport.fail(Method::Get, "/manga/m1/feed");
        let feed = feed(&transport);

        let err = feed.reset_and_load("m1").await.unwrap_err();
        assert_eq!(*err, ErrorKind::Network);
        let state = feed.state();
        assert_eq!(state.error, Some(ErrorKind::Network));
        assert!(!state.is_loading);
        assert!(state.has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_load_more_fetches_once() {
        let transport = Arc::new(MockTransport::default().with_latency(Duration::from_millis(50)));
        transport.respond(Method::Get, "/manga/m1/feed", 200, page(60, 20, 0));
        let feed = feed(&transport);
        feed.reset_and_load("m1").await.unwrap();

        let (first, second) = tokio::join!(feed.load_more("m1"), feed.load_more("m1"));
        first.unwrap();
        second.unwrap();
        assert_eq!(transport.call_count(Method::Get, "/manga/m1/feed"), 2);
        assert_eq!(feed.state().offset, 40);
    }

    #[tokio::test]
    async fn test_load_more_starts_a_fresh_feed() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Method::Get, "/manga/m1/feed", 200, page(40, 20, 0));
        let feed = feed(&transport);

        feed.load_more("m1").await.unwrap();
        let state = feed.state();
        assert_eq!(state.entry_id.as_deref(), Some("m1"));
        assert_eq!(state.offset, 20);
        assert_eq!(transport.call_count(Method::Get, "/manga/m1/feed"), 1);
    }
}
