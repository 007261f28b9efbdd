//! Scripted in-process backend for tests and demos.
//!
//! Routes are matched on method and path. Each route holds a queue of
//! responses; the last one repeats. Unrouted requests fail at the transport
//! level, which the gateway reports as unavailable.

use crate::transport::{BackendRequest, BackendTransport, Method, TransportError, TransportResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;

type Scripted = Result<TransportResponse, TransportError>;

struct Route {
    method: Method,
    path: String,
    responses: VecDeque<Scripted>,
}

#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<BackendRequest>>,
}

pub fn envelope_ok(data: Value) -> TransportResponse {
    TransportResponse {
        status: 200,
        body: json!({ "ok": true, "data": data }).to_string(),
    }
}

pub fn envelope_err(status: u16, code: &str, message: &str) -> TransportResponse {
    TransportResponse {
        status,
        body: json!({ "ok": false, "error": { "code": code, "message": message } }).to_string(),
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method path`.
    pub fn respond(&self, method: Method, path: &str, response: Scripted) -> &Self {
        let mut routes = self.routes.lock();
        match routes.iter_mut().find(|r| r.method == method && r.path == path) {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                path: path.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    pub fn ok(&self, method: Method, path: &str, data: Value) -> &Self {
        self.respond(method, path, Ok(envelope_ok(data)))
    }

    pub fn fail(&self, method: Method, path: &str, status: u16, code: &str, message: &str) -> &Self {
        self.respond(method, path, Ok(envelope_err(status, code, message)))
    }

    pub fn offline(&self, method: Method, path: &str) -> &Self {
        self.respond(method, path, Err(TransportError("connection refused".to_string())))
    }

    /// Every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<BackendRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path() == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BackendTransport for FakeTransport {
    async fn execute(&self, request: &BackendRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().push(request.clone());
        let mut routes = self.routes.lock();
        let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == request.method && r.path == request.path())
        else {
            return Err(TransportError(format!(
                "no route for {} {}",
                request.method.as_str(),
                request.path()
            )));
        };
        if route.responses.len() > 1 {
            if let Some(next) = route.responses.pop_front() {
                return next;
            }
        }
        route
            .responses
            .front()
            .cloned()
            .unwrap_or_else(|| Err(TransportError("empty route".to_string())))
    }
}
