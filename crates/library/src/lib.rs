//! Reconciles the local view of the user's library and follow list with the
//! remote service, which is always the source of truth.
//!
//! Both [`Library`] and [`Follows`] publish their state on a
//! [`tokio::sync::watch`] channel and only change it after the service has
//! accepted a mutation.

pub mod error;
mod fetch;
mod follows;
mod library;

pub use crate::follows::{FOLLOWED_IDS_KEY, FeedItem, FollowState, Follows};
pub use crate::library::{Library, LibraryRecord, LibraryState};

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::{Value, json};
    use std::sync::Arc;
    use yomu_api::transport::{Method, MockTransport};
    use yomu_api::{Client, Endpoints};
    use yomu_session::Session;
    use yomu_storage::backend::MemoryStore;

    pub fn entry_json(id: &str, title: &str) -> Value {
        json!({
            "id": id,
            "type": "manga",
            "attributes": {"title": {"en": title}, "updatedAt": "2024-01-01T00:00:00+00:00"},
            "relationships": [{"id": format!("cover-{id}"), "type": "cover_art", "attributes": {"fileName": "cover.jpg"}}]
        })
    }

    pub fn serve_entry(transport: &MockTransport, id: &str, title: &str) {
        transport.respond(Method::Get, format!("/manga/{id}"), 200, json!({"result": "ok", "data": entry_json(id, title)}));
    }

    /// A session restored from stored credentials whose token the mock
    /// service accepts.
    pub async fn signed_in(transport: &Arc<MockTransport>) -> Session {
        let endpoints =
            Endpoints::parse("https://api.test", "https://auth.test/realms/x/token", "https://uploads.test").unwrap();
        let client = Client::new(transport.clone(), endpoints, "en");
        let secrets = MemoryStore::with_entries([("access_token", "token"), ("refresh_token", "refresh")]);
        let preferences =
            MemoryStore::with_entries([("username", "reader"), ("client_id", "cid"), ("client_secret", "secret")]);
        let session = Session::open(client, Arc::new(secrets), Arc::new(preferences)).await.unwrap();
        transport.respond(Method::Get, "/auth/check", 200, json!({"result": "ok", "isAuthenticated": true}));
        assert!(session.restore().await.unwrap());
        session
    }

    pub async fn signed_out(transport: &Arc<MockTransport>) -> Session {
        let endpoints =
            Endpoints::parse("https://api.test", "https://auth.test/realms/x/token", "https://uploads.test").unwrap();
        let client = Client::new(transport.clone(), endpoints, "en");
        Session::open(client, Arc::new(MemoryStore::default()), Arc::new(MemoryStore::default())).await.unwrap()
    }
}
