use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};

use crate::config::Config;
use crate::error::{FluidFeaturesError, Result};

/// A request against the FluidFeatures API, relative to the configured base URI.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Unencoded path segments, e.g. `["app", "123", "features"]`.
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ApiRequest {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// The unencoded path, used for logging.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The HTTP seam between the SDK and the FluidFeatures service.
///
/// Implementations are shared by every in-flight transaction, so they must
/// tolerate concurrent callers. A non-success status is a successful
/// `send`; only failures to get any response at all are errors.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// Pooled, persistent HTTP transport backed by the reqwest blocking client.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_uri: Url,
    secret: String,
    warn_threshold: Duration,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let base_uri = Url::parse(&config.base_uri).map_err(|e| {
            FluidFeaturesError::Configuration(format!("invalid base_uri {}: {}", config.base_uri, e))
        })?;
        if base_uri.cannot_be_a_base() {
            return Err(FluidFeaturesError::Configuration(format!(
                "invalid base_uri {}",
                config.base_uri
            )));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_size)
            .build()?;
        Ok(HttpTransport {
            client,
            base_uri,
            secret: config.secret.clone(),
            warn_threshold: config.warn_threshold,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> Url {
        let mut url = self.base_uri.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(&request.segments);
        }
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        url
    }

    fn send_once(&self, url: &Url, request: &ApiRequest) -> reqwest::Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .header(AUTHORIZATION, &self.secret)
            .header(ACCEPT, "application/json");
        if let Some(ref body) = request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }
        let response = builder.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(ApiResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = self.url_for(&request);
        let start = Instant::now();

        let result = match self.send_once(&url, &request) {
            // A pooled connection may have been closed by the server; retry once.
            // A request that may already have reached the server is only
            // repeated when its method is idempotent.
            Err(e) if should_retry(&request.method, &e) => {
                tracing::debug!("{} {} failed ({}), retrying once", request.method, url, e);
                self.send_once(&url, &request)
            }
            other => other,
        };

        let elapsed = start.elapsed();
        if elapsed > self.warn_threshold {
            tracing::warn!(
                "{} {} took {}ms (threshold {}ms)",
                request.method,
                url,
                elapsed.as_millis(),
                self.warn_threshold.as_millis()
            );
        }
        Ok(result?)
    }
}

fn should_retry(method: &Method, e: &reqwest::Error) -> bool {
    if e.is_timeout() {
        return false;
    }
    e.is_connect() || (e.is_request() && is_idempotent(method))
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}
