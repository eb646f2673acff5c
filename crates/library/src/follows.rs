use crate::error::{ErrorKind, Result};
use crate::fetch;
use exn::ResultExt;
use futures::TryStreamExt;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::instrument;
use url::Url;
use yomu_api::FOLLOW_PAGE_SIZE;
use yomu_api::models::{Chapter, Entry, Relation};
use yomu_session::Session;
use yomu_storage::{StoreHandle, get_json, put_json};

/// Preferences key holding the ids of followed entries, so the list can be
/// shown before the first sync.
pub const FOLLOWED_IDS_KEY: &str = "followed_ids";

/// One chapter of the followed-chapter feed, with its parent entry resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub chapter: Chapter,
    /// A placeholder when the entry's details could not be fetched.
    pub entry: Entry,
    pub entry_title: String,
    pub group: Option<String>,
    pub published_at: Option<OffsetDateTime>,
    pub cover_url: Option<Url>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FollowState {
    /// Followed entries by id. Entries only known from local storage are
    /// placeholders until the next sync.
    pub entries: BTreeMap<String, Entry>,
    /// Newest chapters first.
    pub feed: Vec<FeedItem>,
    pub is_syncing: bool,
    pub error: Option<ErrorKind>,
}

struct Inner {
    session: Session,
    preferences: StoreHandle,
    concurrency: usize,
    state: watch::Sender<FollowState>,
}

/// The user's follow list and the chapter feed derived from it.
#[derive(Clone)]
pub struct Follows {
    inner: Arc<Inner>,
}

impl Follows {
    pub fn new(session: Session, preferences: StoreHandle, concurrency: usize) -> Self {
        let (state, _) = watch::channel(FollowState::default());
        Self { inner: Arc::new(Inner { session, preferences, concurrency: concurrency.max(1), state }) }
    }

    pub fn subscribe(&self) -> watch::Receiver<FollowState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> FollowState {
        self.inner.state.borrow().clone()
    }

    /// Show the follow list saved by the last sync, as placeholders. Returns
    /// how many were found. Unreadable data counts as an empty list.
    pub async fn load_local(&self) -> usize {
        let ids = match get_json::<Vec<String>>(&*self.inner.preferences, FOLLOWED_IDS_KEY).await {
            Ok(ids) => ids.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %*err, "Discarding unreadable follow list");
                Vec::new()
            },
        };
        let count = ids.len();
        self.inner.state.send_modify(|state| {
            state.entries = ids.into_iter().map(|id| (id.clone(), Entry::placeholder(id))).collect();
        });
        count
    }

    async fn token(&self) -> Result<String> {
        if !self.inner.session.is_authenticated() {
            self.inner.state.send_modify(|state| state.error = Some(ErrorKind::TokenExpired));
            exn::bail!(ErrorKind::TokenExpired);
        }
        self.inner.session.ensure_valid().await.map_err(ErrorKind::session)
    }

    async fn persist_ids(&self) -> Result<()> {
        let ids: Vec<String> = self.inner.state.borrow().entries.keys().cloned().collect();
        put_json(&*self.inner.preferences, FOLLOWED_IDS_KEY, &ids).await.or_raise(|| ErrorKind::Storage)
    }

    /// Replace the follow list with the service's, paging until a short
    /// page. Returns the number of followed entries.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<usize> {
        let token = self.token().await?;
        self.inner.state.send_modify(|state| state.is_syncing = true);
        let client = self.inner.session.client();
        let result: yomu_api::error::Result<Vec<Entry>> = client.all_followed_entries(&token).try_collect().await;
        let entries = match result {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %*err, "Follow list sync failed");
                let err = ErrorKind::api(err);
                self.inner.state.send_modify(|state| {
                    state.is_syncing = false;
                    state.error = Some((*err).clone());
                });
                return Err(err);
            },
        };
        let count = entries.len();
        self.inner.state.send_modify(|state| {
            state.entries = entries.into_iter().map(|entry| (entry.id.clone(), entry)).collect();
            state.is_syncing = false;
            state.error = None;
        });
        self.persist_ids().await?;
        tracing::info!(entries = count, "Synced follow list");
        Ok(count)
    }

    /// Ask the service whether `entry_id` is followed.
    pub async fn is_following(&self, entry_id: &str) -> Result<bool> {
        let token = self.token().await?;
        self.inner.session.client().is_following(&token, entry_id).await.map_err(ErrorKind::api)
    }

    pub async fn follow(&self, entry: &Entry) -> Result<()> {
        let token = self.token().await?;
        self.set_following(&token, entry, true).await
    }

    pub async fn unfollow(&self, entry: &Entry) -> Result<()> {
        let token = self.token().await?;
        self.set_following(&token, entry, false).await
    }

    async fn set_following(&self, token: &str, entry: &Entry, follow: bool) -> Result<()> {
        let client = self.inner.session.client();
        match follow {
            true => client.follow(token, &entry.id).await,
            false => client.unfollow(token, &entry.id).await,
        }
        .map_err(ErrorKind::api)?;
        self.inner.state.send_modify(|state| match follow {
            true => {
                state.entries.insert(entry.id.clone(), entry.clone());
            },
            false => {
                state.entries.remove(&entry.id);
            },
        });
        tracing::info!(entry = %entry.id, follow, "Updated follow");
        self.persist_ids().await
    }

    /// Follow `entry` if it is not followed, otherwise unfollow it, then
    /// refresh the feed. Returns whether the entry is now followed.
    ///
    /// The current state is read from the service, not the local list. A
    /// feed refresh failure is logged and does not fail the toggle.
    #[instrument(skip_all, fields(entry = %entry.id))]
    pub async fn toggle(&self, entry: &Entry) -> Result<bool> {
        let token = self.token().await?;
        let following = self.inner.session.client().is_following(&token, &entry.id).await.map_err(ErrorKind::api)?;
        self.set_following(&token, entry, !following).await?;
        if let Err(err) = self.refresh_feed(&token).await {
            tracing::warn!(error = %*err, "Could not refresh the followed feed");
        }
        Ok(!following)
    }

    /// Latest chapters across every followed entry, newest first.
    #[instrument(skip(self))]
    pub async fn load_feed(&self) -> Result<Vec<FeedItem>> {
        let token = self.token().await?;
        self.refresh_feed(&token).await
    }

    async fn refresh_feed(&self, token: &str) -> Result<Vec<FeedItem>> {
        let client = self.inner.session.client();
        let page = client.followed_feed(token, FOLLOW_PAGE_SIZE, 0).await.map_err(ErrorKind::api)?;

        let mut ids: Vec<String> = page.data.iter().filter_map(Chapter::entry_id).map(str::to_string).collect();
        ids.sort();
        ids.dedup();
        let parents = fetch::entries(client, ids, self.inner.concurrency).await;

        let language = client.language();
        let mut items: Vec<FeedItem> = page
            .data
            .into_iter()
            .map(|chapter| {
                let entry_id = chapter.entry_id().unwrap_or_default().to_string();
                let (entry, entry_title) = match parents.get(&entry_id) {
                    Some(entry) => (entry.clone(), entry.display_title(language).to_string()),
                    None => {
                        let title = embedded_title(&chapter, language).unwrap_or_else(|| entry_id.clone());
                        (Entry::placeholder(entry_id), title)
                    },
                };
                let group = chapter.scanlation_groups().next().map(str::to_string);
                FeedItem {
                    group,
                    published_at: chapter.publish_at,
                    cover_url: client.cover_url(&entry),
                    entry,
                    entry_title,
                    chapter,
                }
            })
            .collect();
        items.sort_by_key(|item| Reverse(item.published_at));

        tracing::debug!(items = items.len(), "Loaded followed feed");
        self.inner.state.send_modify(|state| state.feed = items.clone());
        Ok(items)
    }
}

/// Title carried by the chapter's own `manga` relation.
fn embedded_title(chapter: &Chapter, language: &str) -> Option<String> {
    chapter.relations.iter().find_map(|relation| match relation {
        Relation::Manga { title: Some(title), .. } => title.preferred(language).map(str::to_string),
        _ => None,
    })
}
