//! In-memory [`Transport`] for tests in this crate and in host applications.
//!
//! Built only with the `testutils` feature.

use std::sync::Mutex;

use reqwest::Method;

use crate::error::{FluidFeaturesError, Result};
use crate::transport::{ApiRequest, ApiResponse, Transport};

enum Route {
    Respond(ApiResponse),
    Fail(String),
}

/// Records every request and answers from routes registered per
/// `(method, path)`. Unrouted requests get a `404`.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<(Method, String, Route)>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method path` with `status` and a JSON body.
    pub fn respond(&self, method: Method, path: &str, status: u16, body: serde_json::Value) {
        self.add(
            method,
            path,
            Route::Respond(ApiResponse {
                status,
                body: body.to_string(),
            }),
        );
    }

    /// Answer `method path` with a raw body.
    pub fn respond_raw(&self, method: Method, path: &str, status: u16, body: &str) {
        self.add(
            method,
            path,
            Route::Respond(ApiResponse {
                status,
                body: body.to_string(),
            }),
        );
    }

    /// Fail `method path` with a transport error.
    pub fn fail(&self, method: Method, path: &str, message: &str) {
        self.add(method, path, Route::Fail(message.to_string()));
    }

    fn add(&self, method: Method, path: &str, route: Route) {
        self.routes
            .lock()
            .unwrap()
            .push((method, path.to_string(), route));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose path matches `path`, in order.
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path() == path)
            .cloned()
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let path = request.path();
        let method = request.method.clone();
        self.requests.lock().unwrap().push(request);

        let routes = self.routes.lock().unwrap();
        let route = routes
            .iter()
            .rev()
            .find(|(m, p, _)| *m == method && *p == path);
        match route {
            Some((_, _, Route::Respond(response))) => Ok(response.clone()),
            Some((_, _, Route::Fail(message))) => {
                Err(FluidFeaturesError::Transport(message.clone().into()))
            }
            None => Ok(ApiResponse {
                status: 404,
                body: String::new(),
            }),
        }
    }
}
