//! In-memory transport for testing.

use super::{Method, Request, Response, Transport};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Handler = Box<dyn Fn(&Request) -> Result<Response> + Send + Sync>;

struct Route {
    method: Method,
    path: String,
    handler: Handler,
}

/// Routed fake of the remote service.
///
/// Routes match on method and exact URL path; the most recently registered
/// route wins, so a test can change the service's behaviour half way
/// through. Unrouted requests get a `404`. Every request is recorded before
/// the optional latency is applied.
///
/// # Examples
///
/// ```ignore
/// use yomu_api::transport::{Method, MockTransport};
/// use serde_json::json;
///
/// let transport = MockTransport::default();
/// transport.respond(Method::Get, "/auth/check", 200, json!({"isAuthenticated": true}));
/// ```
pub struct MockTransport {
    name: String,
    routes: Mutex<Vec<Route>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<Request>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Delay every response by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Register a handler that builds the response from the request.
    pub fn route(
        &self,
        method: Method,
        path: impl Into<String>,
        handler: impl Fn(&Request) -> Response + Send + Sync + 'static,
    ) -> &Self {
        self.push(method, path.into(), Box::new(move |request: &Request| -> Result<Response> { Ok(handler(request)) }))
    }

    /// Register a fixed JSON response.
    pub fn respond(&self, method: Method, path: impl Into<String>, status: u16, body: Value) -> &Self {
        self.route(method, path, move |_| Response::json(status, &body))
    }

    /// Register a fixed raw response.
    pub fn respond_bytes(&self, method: Method, path: impl Into<String>, status: u16, body: Vec<u8>) -> &Self {
        self.route(method, path, move |_| Response::new(status, body.clone()))
    }

    /// Make requests to this route fail at the transport level.
    pub fn fail(&self, method: Method, path: impl Into<String>) -> &Self {
        let path = path.into();
        let message = format!("connection refused: {path}");
        self.push(method, path, Box::new(move |_: &Request| -> Result<Response> {
            exn::bail!(ErrorKind::Network(message.clone()))
        }))
    }

    fn push(&self, method: Method, path: String, handler: Handler) -> &Self {
        lock(&self.routes).push(Route { method, path, handler });
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<Request> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, method: Method, path: &str) -> usize {
        lock(&self.calls).iter().filter(|request| request.method == method && request.path() == path).count()
    }
}
impl Default for MockTransport {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            routes: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: Request) -> Result<Response> {
        lock(&self.calls).push(request.clone());
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let routes = lock(&self.routes);
        match routes.iter().rev().find(|route| route.method == request.method && route.path == request.path()) {
            Some(route) => (route.handler)(&request),
            None => Ok(Response::json(
                404,
                &json!({"result": "error", "errors": [{"status": 404, "title": "Not Found", "detail": "no route"}]}),
            )),
        }
    }
}
