//! Production transport backed by `reqwest`.

use super::{Body, Method, Request, Response, Transport};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::time::Duration;
use yomu_config::ApiConfig;

/// HTTPS transport with a fixed user agent and per-request timeout.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}
impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .or_raise(|| ErrorKind::Network("could not initialise HTTP client".to_string()))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(&config.user_agent, config.timeout())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: Request) -> Result<Response> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, request.url.clone());
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Form(pairs) => builder.form(pairs),
        };

        let response = builder.send().await.or_raise(|| ErrorKind::Network(request.url.path().to_string()))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.or_raise(|| ErrorKind::Network(request.url.path().to_string()))?;
        tracing::trace!(method = %request.method, path = request.url.path(), status, bytes = body.len(), "Received response");
        Ok(Response { status, body: body.to_vec() })
    }
}
