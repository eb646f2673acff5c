use crate::InFlight;
use crate::error::{ErrorKind, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;
use yomu_api::Client;
use yomu_api::models::{Entry, Filter, Taxonomy};
use yomu_config::CatalogConfig;

/// Everything an observer needs to render the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogState {
    pub entries: Vec<Entry>,
    /// Next page to request within the current filter.
    pub page_index: u32,
    pub is_loading: bool,
    /// At least one page has arrived since the last reset.
    pub has_loaded: bool,
    pub error: Option<ErrorKind>,
    pub tags: Taxonomy,
    /// Size of the full result set as last reported by the service.
    pub total: u32,
}

/// The filter a page belongs to. Bumping `id` invalidates every fetch issued
/// under the previous filter.
#[derive(Default)]
struct Epoch {
    id: u64,
    filter: Filter,
}

struct Inner {
    client: Client,
    page_size: u32,
    debounce: Duration,
    epoch: Mutex<Epoch>,
    pending: Mutex<Option<JoinHandle<()>>>,
    state: watch::Sender<CatalogState>,
}
impl Drop for Inner {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = pending.take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Paginated, filterable view of `GET /manga`.
///
/// Pages load strictly one at a time. Changing the filter starts a new epoch:
/// results are cleared at once and anything still in flight for the old
/// filter is thrown away.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<Inner>,
}

impl Catalog {
    pub fn new(client: Client, page_size: u32, debounce: Duration) -> Self {
        let (state, _) = watch::channel(CatalogState::default());
        Self {
            inner: Arc::new(Inner {
                client,
                page_size: page_size.max(1),
                debounce,
                epoch: Mutex::new(Epoch::default()),
                pending: Mutex::new(None),
                state,
            }),
        }
    }

    pub fn from_config(client: Client, config: &CatalogConfig) -> Self {
        Self::new(client, config.page_size, config.search_debounce())
    }

    pub fn subscribe(&self) -> watch::Receiver<CatalogState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> CatalogState {
        self.inner.state.borrow().clone()
    }

    /// The filter of the current epoch.
    pub fn filter(&self) -> Filter {
        lock(&self.inner.epoch).filter.clone()
    }

    /// Fetch and publish the tag taxonomy used to build filters.
    #[instrument(level = "debug", skip(self))]
    pub async fn load_tags(&self) -> Result<Taxonomy> {
        let tags = self.inner.client.tags().await.map_err(ErrorKind::api)?;
        let taxonomy = Taxonomy::new(tags, self.inner.client.language());
        tracing::debug!(tags = taxonomy.len(), "Loaded tag taxonomy");
        self.inner.state.send_modify(|state| state.tags = taxonomy.clone());
        Ok(taxonomy)
    }

    /// Switch to `filter` and load its first page.
    ///
    /// Results are cleared before this returns control to the runtime. If a
    /// page is already in flight, that load notices the new epoch and fetches
    /// the first page itself, so this call returns without waiting for it.
    #[instrument(level = "debug", skip_all, fields(sort = %filter.sort))]
    pub async fn reset_and_load(&self, filter: Filter) -> Result<()> {
        {
            let mut epoch = lock(&self.inner.epoch);
            epoch.id += 1;
            epoch.filter = filter;
            self.inner.state.send_modify(|state| {
                state.entries.clear();
                state.page_index = 0;
                state.has_loaded = false;
                state.error = None;
                state.total = 0;
            });
        }
        self.load_next_page().await
    }

    /// Load the next page of the current filter. A no-op while another page
    /// load is in flight.
    ///
    /// A failure is published in the state and returned; entries already
    /// loaded stay in place and nothing is retried.
    pub async fn load_next_page(&self) -> Result<()> {
        let claimed = self.inner.state.send_if_modified(|state| !std::mem::replace(&mut state.is_loading, true));
        if !claimed {
            tracing::trace!("Catalog page already loading");
            return Ok(());
        }
        let _in_flight = InFlight::new(&self.inner.state, |state| std::mem::replace(&mut state.is_loading, false));

        loop {
            let (epoch, filter) = {
                let epoch = lock(&self.inner.epoch);
                (epoch.id, epoch.filter.clone())
            };
            let page_index = self.inner.state.borrow().page_index;
            let offset = page_index.saturating_mul(self.inner.page_size);
            let result = self.inner.client.search_entries(&filter, self.inner.page_size, offset).await;

            let current = lock(&self.inner.epoch);
            if current.id != epoch {
                tracing::debug!(stale = epoch, current = current.id, "Filter changed mid-load; fetching first page");
                continue;
            }
            return match result {
                Ok(page) => {
                    tracing::debug!(page = page_index, received = page.data.len(), total = page.total, "Loaded catalog page");
                    self.inner.state.send_modify(|state| {
                        if page_index == 0 {
                            state.entries = page.data;
                        } else {
                            state.entries.extend(page.data);
                        }
                        state.page_index = page_index + 1;
                        state.total = page.total;
                        state.is_loading = false;
                        state.has_loaded = true;
                        state.error = None;
                    });
                    Ok(())
                },
                Err(err) => {
                    tracing::warn!(error = %*err, page = page_index, "Could not load catalog page");
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

    /// Reload with `filter` once the configured quiet period passes without
    /// another call. Each call cancels the one before it.
    pub fn schedule_search(&self, filter: Filter) {
        let catalog = Arc::downgrade(&self.inner);
        let delay = self.inner.debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = Weak::upgrade(&catalog) else {
                return;
            };
            if let Err(err) = (Catalog { inner }).reset_and_load(filter).await {
                tracing::debug!(error = %*err, "Debounced search failed");
            }
        });
        if let Some(previous) = lock(&self.inner.pending).replace(task) {
            previous.abort();
        }
    }
}
