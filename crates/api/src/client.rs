//! Typed operations against the remote service.

use crate::error::{ErrorKind, Result};
use crate::models::{
    Chapter, Collection, ContentRating, Credentials, Entry, Filter, PageManifest, ReadingStatus, Single, Tag,
    TokenGrant,
};
use crate::query::Query;
use crate::transport::{Request, Response};
use crate::TransportHandle;
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;
use url::Url;
use yomu_config::ApiConfig;

/// Page size used for the follow list and the followed-chapter feed.
pub const FOLLOW_PAGE_SIZE: u32 = 100;

/// Base URLs for the three hosts the client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base: Url,
    /// Full URL of the OAuth token endpoint.
    pub auth: Url,
    pub uploads: Url,
}
impl Endpoints {
    pub fn parse(base: &str, auth: &str, uploads: &str) -> Result<Self> {
        let parse = |value: &str| Url::parse(value).or_raise(|| ErrorKind::InvalidUrl(value.to_string()));
        Ok(Self { base: parse(base)?, auth: parse(auth)?, uploads: parse(uploads)? })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            base: config.base_url().or_raise(|| ErrorKind::InvalidUrl(config.base_url.clone()))?,
            auth: config.auth_url().or_raise(|| ErrorKind::InvalidUrl(config.auth_url.clone()))?,
            uploads: config.uploads_url().or_raise(|| ErrorKind::InvalidUrl(config.uploads_url.clone()))?,
        })
    }
}

/// Cheaply cloneable handle to the remote service.
#[derive(Clone)]
pub struct Client {
    transport: TransportHandle,
    endpoints: Arc<Endpoints>,
    language: Arc<str>,
}

impl Client {
    pub fn new(transport: TransportHandle, endpoints: Endpoints, language: &str) -> Self {
        Self { transport, endpoints: Arc::new(endpoints), language: Arc::from(language) }
    }

    pub fn from_config(transport: TransportHandle, config: &ApiConfig) -> Result<Self> {
        Ok(Self::new(transport, Endpoints::from_config(config)?, &config.language))
    }

    /// Preferred translation language.
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn cover_url(&self, entry: &Entry) -> Option<Url> {
        entry.cover_url(&self.endpoints.uploads)
    }

    fn api_url(&self, segments: &[&str], query: &Query) -> Result<Url> {
        let mut url = self.endpoints.base.clone();
        url.path_segments_mut()
            .map_err(|()| ErrorKind::InvalidUrl(self.endpoints.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.pairs());
        }
        Ok(url)
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        tracing::debug!(transport = self.transport.name(), method = %request.method, path = request.path(), "Sending request");
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            tracing::debug!(status = response.status, "Request was not successful");
        }
        Ok(response)
    }

    /// Execute and decode a successful response; anything else becomes a
    /// [`Server`](ErrorKind::Server) error carrying the service's detail.
    async fn fetch<T: DeserializeOwned>(&self, request: Request, what: &'static str) -> Result<T> {
        let response = self.execute(request).await?;
        if !response.is_success() {
            exn::bail!(ErrorKind::from_response(response.status, &response.body));
        }
        response.decode(what)
    }

    async fn expect_success(&self, request: Request) -> Result<()> {
        let response = self.execute(request).await?;
        if !response.is_success() {
            exn::bail!(ErrorKind::from_response(response.status, &response.body));
        }
        Ok(())
    }

    /// One page of `GET /manga` for the given filter.
    #[instrument(level = "debug", skip(self, filter), fields(sort = %filter.sort))]
    pub async fn search_entries(&self, filter: &Filter, limit: u32, offset: u32) -> Result<Collection<Entry>> {
        let query = filter.to_query(limit, offset, &self.language);
        self.fetch(Request::get(self.api_url(&["manga"], &query)?), "entry list").await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn entry(&self, id: &str) -> Result<Entry> {
        let query = Query::new().with("includes[]", "cover_art");
        let single: Single<Entry> = self.fetch(Request::get(self.api_url(&["manga", id], &query)?), "entry").await?;
        Ok(single.data)
    }

    /// One page of an entry's chapters, newest chapter number first.
    #[instrument(level = "debug", skip(self))]
    pub async fn chapter_feed(&self, entry_id: &str, limit: u32, offset: u32) -> Result<Collection<Chapter>> {
        let query = Query::new()
            .with("limit", limit)
            .with("offset", offset)
            .with("translatedLanguage[]", &*self.language)
            .with("order[chapter]", "desc")
            .with("includes[]", "scanlation_group")
            .with_all("contentRating[]", ContentRating::ALL.iter().map(ContentRating::as_str));
        self.fetch(Request::get(self.api_url(&["manga", entry_id, "feed"], &query)?), "chapter list").await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn tags(&self) -> Result<Vec<Tag>> {
        let collection: Collection<Tag> =
            self.fetch(Request::get(self.api_url(&["manga", "tag"], &Query::new())?), "tag list").await?;
        Ok(collection.data)
    }

    /// Resolve the image server for a chapter.
    #[instrument(level = "debug", skip(self))]
    pub async fn page_manifest(&self, chapter_id: &str) -> Result<PageManifest> {
        self.fetch(Request::get(self.api_url(&["at-home", "server", chapter_id], &Query::new())?), "page manifest").await
    }

    /// Raw bytes of an arbitrary URL (page images, covers).
    pub async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self.execute(Request::get(url.clone())).await?;
        if response.status != 200 {
            exn::bail!(ErrorKind::from_response(response.status, &response.body));
        }
        Ok(response.body)
    }

    #[instrument(level = "debug", skip_all, fields(username = %credentials.username))]
    pub async fn password_grant(&self, credentials: &Credentials) -> Result<TokenGrant> {
        let request = Request::post(self.endpoints.auth.clone()).form([
            ("grant_type", "password"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ]);
        self.fetch(request, "token grant").await
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn refresh_grant(&self, refresh_token: &str, client_id: &str, client_secret: &str) -> Result<TokenGrant> {
        let request = Request::post(self.endpoints.auth.clone()).form([
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ]);
        self.fetch(request, "token grant").await
    }

    /// Whether the service currently accepts `token`. Only a `200` counts.
    pub async fn auth_check(&self, token: &str) -> Result<bool> {
        let response = self.execute(Request::get(self.api_url(&["auth", "check"], &Query::new())?).bearer(token)).await?;
        Ok(response.status == 200)
    }

    /// Entry id to raw status string, exactly as the service reports it.
    #[instrument(level = "debug", skip_all)]
    pub async fn reading_statuses(&self, token: &str) -> Result<BTreeMap<String, String>> {
        #[derive(Deserialize)]
        struct Statuses {
            #[serde(default, deserialize_with = "map_or_empty_list")]
            statuses: BTreeMap<String, String>,
        }
        let request = Request::get(self.api_url(&["manga", "status"], &Query::new())?).bearer(token);
        let response: Statuses = self.fetch(request, "reading status map").await?;
        Ok(response.statuses)
    }

    /// Set (or with `None`, clear) the reading status of an entry.
    #[instrument(level = "debug", skip(self, token))]
    pub async fn set_reading_status(&self, token: &str, entry_id: &str, status: Option<ReadingStatus>) -> Result<()> {
        let body = json!({ "status": status.map(|status| status.as_str()) });
        let request = Request::post(self.api_url(&["manga", entry_id, "status"], &Query::new())?).bearer(token).json(body);
        self.expect_success(request).await
    }

    #[instrument(level = "debug", skip(self, token))]
    pub async fn is_following(&self, token: &str, entry_id: &str) -> Result<bool> {
        let url = self.api_url(&["user", "follows", "manga", entry_id], &Query::new())?;
        let response = self.execute(Request::get(url).bearer(token)).await?;
        match response.status {
            200 => Ok(true),
            404 => Ok(false),
            status => exn::bail!(ErrorKind::from_response(status, &response.body)),
        }
    }

    #[instrument(level = "debug", skip(self, token))]
    pub async fn follow(&self, token: &str, entry_id: &str) -> Result<()> {
        let url = self.api_url(&["manga", entry_id, "follow"], &Query::new())?;
        self.expect_success(Request::post(url).bearer(token)).await
    }

    #[instrument(level = "debug", skip(self, token))]
    pub async fn unfollow(&self, token: &str, entry_id: &str) -> Result<()> {
        let url = self.api_url(&["manga", entry_id, "follow"], &Query::new())?;
        self.expect_success(Request::delete(url).bearer(token)).await
    }

    /// One page of the user's followed entries.
    #[instrument(level = "debug", skip(self, token))]
    pub async fn followed_entries(&self, token: &str, limit: u32, offset: u32) -> Result<Collection<Entry>> {
        let query = Query::new()
            .with("limit", limit)
            .with("offset", offset)
            .with("includes[]", "cover_art")
            .with_all("contentRating[]", ContentRating::ALL.iter().map(ContentRating::as_str));
        let url = self.api_url(&["user", "follows", "manga"], &query)?;
        self.fetch(Request::get(url).bearer(token), "followed entry list").await
    }

    /// Every followed entry, paging until the service returns a short page.
    ///
    /// The stream ends after yielding the first error.
    pub fn all_followed_entries<'a>(&'a self, token: &'a str) -> impl Stream<Item = Result<Entry>> + Send + 'a {
        stream! {
            let mut offset = 0;
            loop {
                let page = match self.followed_entries(token, FOLLOW_PAGE_SIZE, offset).await {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(err);
                        break;
                    },
                };
                let received = page.data.len() as u32;
                for entry in page.data {
                    yield Ok(entry);
                }
                if received < FOLLOW_PAGE_SIZE {
                    break;
                }
                offset += received;
            }
        }
    }

    /// Latest chapters across every followed entry, newest first.
    #[instrument(level = "debug", skip(self, token))]
    pub async fn followed_feed(&self, token: &str, limit: u32, offset: u32) -> Result<Collection<Chapter>> {
        let query = Query::new()
            .with("limit", limit)
            .with("offset", offset)
            .with("translatedLanguage[]", &*self.language)
            .with("order[publishAt]", "desc")
            .with_all("includes[]", ["manga", "scanlation_group", "cover_art"])
            .with_all("contentRating[]", ContentRating::ALL.iter().map(ContentRating::as_str));
        let url = self.api_url(&["user", "follows", "manga", "feed"], &query)?;
        self.fetch(Request::get(url).bearer(token), "followed chapter feed").await
    }
}

/// The service sends `[]` instead of `{}` for an empty map.
fn map_or_empty_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Map(BTreeMap<String, String>),
        List(serde::de::IgnoredAny),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Map(map) => map,
        Raw::List(_) => BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SortOption;
    use crate::transport::{Body, Method, MockTransport};
    use futures::TryStreamExt;
    use serde_json::{Value, json};

    fn client(transport: &Arc<MockTransport>) -> Client {
        let endpoints =
            Endpoints::parse("https://api.test", "https://auth.test/realms/x/token", "https://uploads.test").unwrap();
        Client::new(transport.clone(), endpoints, "en")
    }

    fn entry_json(id: &str, title: &str) -> Value {
        json!({"id": id, "type": "manga", "attributes": {"title": {"en": title}, "updatedAt": "2024-01-01T00:00:00+00:00"}})
    }

    #[tokio::test]
    async fn test_search_builds_query() {
        let transport = Arc::new(MockTransport::default());
        transport.route(Method::Get, "/manga", |request| {
            assert_eq!(request.query_value("order[title]").as_deref(), Some("asc"));
            assert_eq!(request.query_value("offset").as_deref(), Some("20"));
            Response::json(200, &json!({"data": [entry_json("1", "A")], "total": 21, "limit": 20, "offset": 20}))
        });
        let filter = Filter::default().with_sort(SortOption::TitleAsc);
        let page = client(&transport).search_entries(&filter, 20, 20).await.unwrap();
        assert_eq!(page.total, 21);
        assert_eq!(page.data[0].display_title("en"), "A");
    }

    #[tokio::test]
    async fn test_server_error_detail() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(
            Method::Get,
            "/manga/abc",
            404,
            json!({"result": "error", "errors": [{"status": 404, "title": "Not Found", "detail": "Manga abc not found"}]}),
        );
        let err = client(&transport).entry("abc").await.unwrap_err();
        assert_eq!(*err, ErrorKind::Server { status: 404, detail: "Manga abc not found".into() });
    }

    #[tokio::test]
    async fn test_decoding_error() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Method::Get, "/manga/tag", 200, json!({"unexpected": true}));
        let err = client(&transport).tags().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Decoding(_)));
    }

    #[tokio::test]
    async fn test_password_grant_form() {
        let transport = Arc::new(MockTransport::default());
        transport.route(Method::Post, "/realms/x/token", |request| {
            assert_eq!(request.form_value("grant_type"), Some("password"));
            assert_eq!(request.form_value("username"), Some("reader"));
            assert_eq!(request.form_value("client_secret"), Some("shh"));
            Response::json(200, &json!({"access_token": "a", "refresh_token": "r", "expires_in": 900}))
        });
        let credentials = Credentials {
            username: "reader".into(),
            password: "pw".into(),
            client_id: "cid".into(),
            client_secret: "shh".into(),
        };
        let grant = client(&transport).password_grant(&credentials).await.unwrap();
        assert_eq!(grant.access_token, "a");
        assert_eq!(grant.refresh_token.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_reading_statuses_empty_list() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Method::Get, "/manga/status", 200, json!({"result": "ok", "statuses": []}));
        assert!(client(&transport).reading_statuses("t").await.unwrap().is_empty());

        transport.respond(Method::Get, "/manga/status", 200, json!({"result": "ok", "statuses": {"m1": "reading"}}));
        let statuses = client(&transport).reading_statuses("t").await.unwrap();
        assert_eq!(statuses.get("m1").map(String::as_str), Some("reading"));
        assert_eq!(transport.calls()[0].bearer.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_set_reading_status_body() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Method::Post, "/manga/m1/status", 200, json!({"result": "ok"}));
        let client = client(&transport);
        client.set_reading_status("t", "m1", None).await.unwrap();
        client.set_reading_status("t", "m1", Some(ReadingStatus::PlanToRead)).await.unwrap();
        let calls = transport.calls();
        assert_eq!(calls[0].body, Body::Json(json!({"status": null})));
        assert_eq!(calls[1].body, Body::Json(json!({"status": "plan_to_read"})));
    }

    #[tokio::test]
    async fn test_is_following() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(Method::Get, "/user/follows/manga/yes", 200, json!({"result": "ok"}));
        transport.respond(Method::Get, "/user/follows/manga/no", 404, json!({"result": "error"}));
        transport.respond(Method::Get, "/user/follows/manga/err", 503, json!({}));
        let client = client(&transport);
        assert!(client.is_following("t", "yes").await.unwrap());
        assert!(!client.is_following("t", "no").await.unwrap());
        let err = client.is_following("t", "err").await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_followed_entries_paging() {
        let transport = Arc::new(MockTransport::default());
        transport.route(Method::Get, "/user/follows/manga", |request| {
            let offset: usize = request.query_value("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
            // 130 follows in total: one full page, then a short one.
            let count = 130usize.saturating_sub(offset).min(100);
            let data: Vec<Value> = (offset..offset + count).map(|i| entry_json(&i.to_string(), "T")).collect();
            Response::json(200, &json!({"data": data, "total": 130, "limit": 100, "offset": offset}))
        });
        let client = client(&transport);
        let entries: Vec<Entry> = client.all_followed_entries("t").try_collect().await.unwrap();
        assert_eq!(entries.len(), 130);
        assert_eq!(transport.call_count(Method::Get, "/user/follows/manga"), 2);
    }

    #[tokio::test]
    async fn test_fetch_bytes_requires_ok() {
        let transport = Arc::new(MockTransport::default());
        transport.respond_bytes(Method::Get, "/data-saver/h/1.jpg", 200, vec![1, 2, 3]);
        transport.respond_bytes(Method::Get, "/data-saver/h/2.jpg", 403, Vec::new());
        let client = client(&transport);
        let ok = Url::parse("https://cdn.test/data-saver/h/1.jpg").unwrap();
        assert_eq!(client.fetch_bytes(&ok).await.unwrap(), vec![1, 2, 3]);
        let forbidden = Url::parse("https://cdn.test/data-saver/h/2.jpg").unwrap();
        assert_eq!(client.fetch_bytes(&forbidden).await.unwrap_err().status(), Some(403));
    }
}
