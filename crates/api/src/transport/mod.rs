//! The single seam between this workspace and the network.
//!
//! Every remote call goes through [`Transport::send()`], so tests swap in
//! [`MockTransport`] and never touch a socket.

mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::http::HttpTransport;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockTransport;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use derive_more::Display;
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use url::Url;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    #[display("GET")]
    Get,
    #[display("POST")]
    Post,
    #[display("DELETE")]
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
}

/// An outgoing request, independent of any HTTP library.
#[derive(Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub bearer: Option<String>,
    pub body: Body,
}
impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, bearer: None, body: Body::Empty }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn delete(url: Url) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        self.body = Body::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// First decoded value of a query parameter.
    pub fn query_value(&self, key: &str) -> Option<String> {
        self.url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
    }

    pub fn query_values(&self, key: &str) -> Vec<String> {
        self.url.query_pairs().filter(|(k, _)| k == key).map(|(_, v)| v.into_owned()).collect()
    }

    /// Value of a form field, for form-encoded bodies.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            Body::Form(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}
impl Debug for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        // Bodies and tokens may carry credentials.
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}
impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, body: body.into() }
    }

    /// Response with a JSON body. Serialization failures produce an empty
    /// body.
    pub fn json(status: u16, value: &impl Serialize) -> Self {
        Self { status, body: serde_json::to_vec(value).unwrap_or_default() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body, naming the payload (`what`) in the error.
    pub fn decode<T: DeserializeOwned>(&self, what: &'static str) -> Result<T> {
        serde_json::from_slice(&self.body).or_raise(|| ErrorKind::Decoding(what.to_string()))
    }
}

/// Sends requests and returns whatever status the service answered with.
///
/// Implementations only fail for transport-level problems
/// ([`Network`](crate::error::ErrorKind::Network)); interpreting status codes
/// is left to the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn send(&self, request: Request) -> Result<Response>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_helpers() {
        let url = Url::parse("https://api.test/manga?limit=20&includes%5B%5D=author&includes%5B%5D=artist").unwrap();
        let request = Request::post(url).bearer("secret").form([("grant_type", "password")]);
        assert_eq!(request.path(), "/manga");
        assert_eq!(request.query_value("limit").as_deref(), Some("20"));
        assert_eq!(request.query_values("includes[]"), vec!["author", "artist"]);
        assert_eq!(request.form_value("grant_type"), Some("password"));
        assert!(!format!("{request:?}").contains("secret"));
    }

    #[test]
    fn test_decode_failure() {
        let response = Response::new(200, "not json");
        let err = response.decode::<Value>("entry").unwrap_err();
        assert_eq!(*err, ErrorKind::Decoding("entry".into()));
        assert!(Response::new(204, "").is_success());
        assert!(!Response::new(401, "").is_success());
    }
}
