use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use yomu_storage::{StoreHandle, get_json, put_json};

/// Preferences key holding every chapter's progress as one JSON object.
pub const PROGRESS_KEY: &str = "reading_progress";

/// Where the reader stopped in one chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_page: usize,
    pub total_pages: usize,
}
impl Progress {
    /// Fraction of the chapter read, `0.0` for chapters of one page or less.
    pub fn fraction(&self) -> f64 {
        if self.total_pages <= 1 {
            return 0.0;
        }
        self.current_page as f64 / (self.total_pages - 1) as f64
    }
}

/// Per-chapter reading progress, persisted in the preferences store.
pub struct ProgressStore {
    store: StoreHandle,
    records: Mutex<BTreeMap<String, Progress>>,
}

impl ProgressStore {
    /// Load saved progress. Unreadable data is discarded with a warning
    /// rather than failing the reader.
    pub async fn open(store: StoreHandle) -> Self {
        let records = match get_json::<BTreeMap<String, Progress>>(&*store, PROGRESS_KEY).await {
            Ok(records) => records.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %*err, "Discarding unreadable reading progress");
                BTreeMap::new()
            },
        };
        tracing::debug!(chapters = records.len(), "Loaded reading progress");
        Self { store, records: Mutex::new(records) }
    }

    pub async fn get(&self, chapter_id: &str) -> Option<Progress> {
        self.records.lock().await.get(chapter_id).copied()
    }

    pub async fn all(&self) -> BTreeMap<String, Progress> {
        self.records.lock().await.clone()
    }

    /// Overwrite the record for `chapter_id` and persist the whole map before
    /// returning. Nothing changes in memory if the write fails.
    pub async fn update(&self, chapter_id: &str, current_page: usize, total_pages: usize) -> Result<Progress> {
        let progress = Progress { current_page, total_pages };
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.insert(chapter_id.to_string(), progress);
        put_json(&*self.store, PROGRESS_KEY, &next).await.or_raise(|| ErrorKind::Storage)?;
        *records = next;
        Ok(progress)
    }
}
