use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use image::DynamicImage;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::instrument;
use url::Url;
use yomu_api::Client;
use yomu_config::ReaderConfig;

#[derive(Default)]
struct Pages {
    /// Bumped by every new sequence; fetches from an older generation are
    /// dropped on arrival.
    generation: u64,
    urls: Vec<Url>,
    images: BTreeMap<usize, Arc<DynamicImage>>,
    loading: BTreeSet<usize>,
}

struct Inner {
    client: Client,
    buffer: usize,
    pages: Mutex<Pages>,
    loaded: watch::Sender<BTreeSet<usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Indices kept warm around `index`: one page behind, `buffer` pages ahead.
/// `None` for an empty sequence.
fn window(index: usize, count: usize, buffer: usize) -> Option<RangeInclusive<usize>> {
    let last = count.checked_sub(1)?;
    let index = index.min(last);
    Some(index.saturating_sub(1)..=index.saturating_add(buffer).min(last))
}

/// Indices this prefetch marked as loading and has not settled yet. Unmarks
/// them if the prefetch is dropped part-way.
struct Claim<'a> {
    inner: &'a Inner,
    generation: u64,
    pending: BTreeSet<usize>,
}
impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut pages = lock(&self.inner.pages);
        if pages.generation == self.generation {
            for index in &self.pending {
                pages.loading.remove(index);
            }
        }
    }
}

/// Decoded page images for the chapter being read, fetched a bounded
/// distance ahead of the reader.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<Inner>,
}

impl PageCache {
    pub fn new(client: Client, buffer: usize) -> Self {
        let (loaded, _) = watch::channel(BTreeSet::new());
        Self { inner: Arc::new(Inner { client, buffer, pages: Mutex::new(Pages::default()), loaded }) }
    }

    pub fn from_config(client: Client, config: &ReaderConfig) -> Self {
        Self::new(client, config.prefetch_buffer)
    }

    /// Replace the page sequence, forgetting every image and in-flight fetch
    /// of the previous one.
    pub fn set_sequence(&self, urls: Vec<Url>) {
        let mut pages = lock(&self.inner.pages);
        pages.generation += 1;
        pages.urls = urls;
        pages.images.clear();
        pages.loading.clear();
        self.inner.loaded.send_replace(BTreeSet::new());
    }

    pub fn count(&self) -> usize {
        lock(&self.inner.pages).urls.len()
    }

    /// Pages [`prefetch_around()`](Self::prefetch_around) requests for `index`.
    pub fn window(&self, index: usize) -> Option<RangeInclusive<usize>> {
        window(index, self.count(), self.inner.buffer)
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        lock(&self.inner.pages).images.contains_key(&index)
    }

    pub fn is_loading(&self, index: usize) -> bool {
        lock(&self.inner.pages).loading.contains(&index)
    }

    pub fn image(&self, index: usize) -> Option<Arc<DynamicImage>> {
        lock(&self.inner.pages).images.get(&index).cloned()
    }

    /// Set of decoded page indices.
    pub fn subscribe(&self) -> watch::Receiver<BTreeSet<usize>> {
        self.inner.loaded.subscribe()
    }

    /// Fetch and decode every page in the window around `index` that is
    /// neither loaded nor already loading. Out-of-range indices are clamped.
    ///
    /// Failed pages are logged and left empty; a later call retries them.
    #[instrument(level = "debug", skip(self))]
    pub async fn prefetch_around(&self, index: usize) {
        let (generation, wanted) = {
            let mut pages = lock(&self.inner.pages);
            let Some(range) = window(index, pages.urls.len(), self.inner.buffer) else {
                return;
            };
            let wanted: Vec<(usize, Url)> = range
                .filter(|i| !pages.images.contains_key(i) && !pages.loading.contains(i))
                .map(|i| (i, pages.urls[i].clone()))
                .collect();
            for (i, _) in &wanted {
                pages.loading.insert(*i);
            }
            (pages.generation, wanted)
        };
        if wanted.is_empty() {
            return;
        }

        let mut claim = Claim { inner: &self.inner, generation, pending: wanted.iter().map(|(i, _)| *i).collect() };
        let mut fetches: FuturesUnordered<_> = wanted
            .into_iter()
            .map(|(index, url)| async move {
                let result = self.fetch(&url).await;
                (index, url, result)
            })
            .collect();
        while let Some((index, url, result)) = fetches.next().await {
            claim.pending.remove(&index);
            self.settle(generation, index, &url, result);
        }
    }

    fn settle(&self, generation: u64, index: usize, url: &Url, result: Result<DynamicImage>) {
        let mut pages = lock(&self.inner.pages);
        if pages.generation != generation {
            tracing::trace!(index, "Dropping page of a replaced sequence");
            return;
        }
        pages.loading.remove(&index);
        match result {
            Ok(image) => {
                pages.images.insert(index, Arc::new(image));
                self.inner.loaded.send_modify(|loaded| {
                    loaded.insert(index);
                });
            },
            Err(err) => tracing::warn!(error = %*err, index, %url, "Could not load page"),
        }
    }

    async fn fetch(&self, url: &Url) -> Result<DynamicImage> {
        let bytes = self.inner.client.fetch_bytes(url).await.map_err(ErrorKind::api)?;
        tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .or_raise(|| ErrorKind::Image("decoder task failed".to_string()))?
            .or_raise(|| ErrorKind::Image(url.to_string()))
    }
}
