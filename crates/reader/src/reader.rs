use crate::cache::PageCache;
use crate::error::{ErrorKind, Result};
use crate::progress::{Progress, ProgressStore};
use std::sync::Arc;
use tracing::instrument;
use yomu_api::Client;
use yomu_api::models::Quality;

struct Open {
    chapter_id: String,
    page: usize,
}

/// Drives one reading session: resolves a chapter's pages, restores where
/// the reader stopped and keeps the cache warm around the current page.
pub struct ChapterReader {
    client: Client,
    cache: PageCache,
    progress: Arc<ProgressStore>,
    quality: Quality,
    open: Option<Open>,
}

impl ChapterReader {
    pub fn new(client: Client, cache: PageCache, progress: Arc<ProgressStore>, quality: Quality) -> Self {
        Self { client, cache, progress, quality, open: None }
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn chapter_id(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.chapter_id.as_str())
    }

    pub fn current_page(&self) -> Option<usize> {
        self.open.as_ref().map(|open| open.page)
    }

    pub fn page_count(&self) -> usize {
        self.cache.count()
    }

    /// Resolve `chapter_id`'s pages and jump to the saved page, if any.
    /// Returns the page the reader starts on.
    #[instrument(skip(self))]
    pub async fn open(&mut self, chapter_id: &str) -> Result<usize> {
        let manifest = self.client.page_manifest(chapter_id).await.map_err(ErrorKind::api)?;
        let urls = manifest.urls(self.quality).map_err(ErrorKind::api)?;
        let count = urls.len();
        self.cache.set_sequence(urls);

        let saved = self.progress.get(chapter_id).await.map_or(0, |progress| progress.current_page);
        let page = saved.min(count.saturating_sub(1));
        tracing::info!(pages = count, page, quality = ?self.quality, "Opened chapter");
        self.open = Some(Open { chapter_id: chapter_id.to_string(), page });
        self.cache.prefetch_around(page).await;
        Ok(page)
    }

    /// Move to `page` (clamped), record it, and prefetch around it.
    pub async fn go_to(&mut self, page: usize) -> Result<Progress> {
        let count = self.cache.count();
        let Some(open) = self.open.as_mut() else {
            exn::bail!(ErrorKind::NoChapter);
        };
        let page = page.min(count.saturating_sub(1));
        let progress = self.progress.update(&open.chapter_id, page, count).await?;
        open.page = page;
        tracing::debug!(page, fraction = progress.fraction(), "Turned page");
        self.cache.prefetch_around(page).await;
        Ok(progress)
    }
}
