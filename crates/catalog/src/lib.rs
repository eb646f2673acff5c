//! Incremental, filterable browsing of the remote catalog.
//!
//! [`Catalog`] pages through `GET /manga` for the current [`Filter`] and
//! [`ChapterFeed`] through one entry's chapters. Both publish their state on a
//! [`tokio::sync::watch`] channel and never load two pages at once.
//!
//! [`Filter`]: yomu_api::models::Filter

pub mod error;
mod feed;
mod paginator;

pub use crate::feed::{ChapterFeed, FeedState};
pub use crate::paginator::{Catalog, CatalogState};

/// Clears the in-flight flag if a load is dropped before it settles.
pub(crate) struct InFlight<'a, S> {
    state: &'a tokio::sync::watch::Sender<S>,
    clear: fn(&mut S) -> bool,
}
impl<'a, S> InFlight<'a, S> {
    pub(crate) fn new(state: &'a tokio::sync::watch::Sender<S>, clear: fn(&mut S) -> bool) -> Self {
        Self { state, clear }
    }
}
impl<S> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        self.state.send_if_modified(self.clear);
    }
}
