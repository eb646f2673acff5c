use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::BTreeMap;
use yomu_api::Client;
use yomu_api::models::Entry;

/// Fetch details for every id, at most `concurrency` requests at a time.
/// Entries that fail to load are logged and left out.
pub(crate) async fn entries(client: &Client, ids: Vec<String>, concurrency: usize) -> BTreeMap<String, Entry> {
    let mut pending = ids.into_iter().map(|id| async move {
        let result = client.entry(&id).await;
        (id, result)
    });
    let mut fetching = FuturesUnordered::new();
    fetching.extend(pending.by_ref().take(concurrency.max(1)));

    let mut entries = BTreeMap::new();
    while let Some((id, result)) = fetching.next().await {
        match result {
            Ok(entry) => {
                entries.insert(id, entry);
            },
            Err(err) => tracing::warn!(error = %*err, %id, "Could not fetch entry details; leaving it out"),
        }
        // Refill one-for-one so no more than `concurrency` are ever in flight.
        if let Some(next) = pending.next() {
            fetching.push(next);
        }
    }
    entries
}
