use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::json;

use crate::error::{FluidFeaturesError, Result};
use crate::features::{parse_feature_map, parse_feature_set, FeatureMap, FeatureSet};
use crate::report::HitReport;
use crate::transport::{ApiRequest, ApiResponse, Transport};
use crate::user::UserIdentity;

/// Result of loading a user's features. Never an error: failures degrade to
/// an empty map with `degraded` set.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFetch {
    pub features: FeatureMap,
    pub elapsed: Duration,
    pub degraded: bool,
}

/// Thin client for the FluidFeatures application API.
///
/// Holds no per-request state, so one instance is shared by every
/// transaction in the process.
pub struct FluidFeaturesClient {
    transport: Arc<dyn Transport>,
    app_id: String,
}

impl FluidFeaturesClient {
    pub fn new(transport: Arc<dyn Transport>, app_id: impl Into<String>) -> Self {
        FluidFeaturesClient {
            transport,
            app_id: app_id.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn app_request<I, S>(&self, method: Method, segments: I) -> ApiRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = ApiRequest::new(method, ["app", self.app_id.as_str()]);
        request
            .segments
            .extend(segments.into_iter().map(Into::into));
        request
    }

    /// Control how much of the user base sees `feature_name`.
    pub fn set_feature_rollout(&self, feature_name: &str, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(FluidFeaturesError::Usage(format!(
                "rollout percent must be 0-100, got {}",
                percent
            )));
        }
        let request = self
            .app_request(Method::PUT, ["features", feature_name])
            .with_body(json!({"enabled": {"percent": percent}}));
        let path = request.path();

        let response = self.transport.send(request).inspect_err(|e| {
            tracing::error!("request to set feature enabled percent failed: {}: {}", path, e);
        })?;
        if !response.is_success() {
            tracing::error!(
                "[{}] failed to set feature enabled percent: {}: {}",
                response.status,
                path,
                response.body
            );
            return Err(upstream(response));
        }
        tracing::info!("set {} rollout to {}%", feature_name, percent);
        Ok(())
    }

    /// Every feature the service knows for this application.
    pub fn list_features(&self) -> Result<FeatureSet> {
        let request = self.app_request(Method::GET, ["features"]);
        let path = request.path();

        let response = self.transport.send(request).inspect_err(|e| {
            tracing::error!("request failed when getting feature set from {}: {}", path, e);
        })?;
        if !response.is_success() {
            tracing::error!(
                "[{}] failed to get feature set: {}: {}",
                response.status,
                path,
                response.body
            );
            return Err(upstream(response));
        }
        parse_feature_set(&response.body).inspect_err(|e| {
            tracing::error!("invalid feature set returned from {}: {}", path, e);
        })
    }

    /// Features enabled for `user`. Any failure yields an empty map.
    pub fn fetch_user_features(&self, user: &UserIdentity) -> FeatureFetch {
        let start = Instant::now();
        let result = self.request_user_features(user);
        let elapsed = start.elapsed();
        match result {
            Ok(features) => FeatureFetch {
                features,
                elapsed,
                degraded: false,
            },
            Err(e) => {
                tracing::warn!(
                    "could not load features for user {}, using defaults: {}",
                    user.unique_id,
                    e
                );
                FeatureFetch {
                    features: FeatureMap::new(),
                    elapsed,
                    degraded: true,
                }
            }
        }
    }

    fn request_user_features(&self, user: &UserIdentity) -> Result<FeatureMap> {
        let request = self
            .app_request(Method::GET, ["user", user.unique_id.as_str(), "features"])
            .with_query(user.query_attributes());
        let path = request.path();

        let response = self.transport.send(request)?;
        if !response.is_success() {
            tracing::error!(
                "[{}] failed to get user features: {}: {}",
                response.status,
                path,
                response.body
            );
            return Err(upstream(response));
        }
        parse_feature_map(&response.body)
    }

    /// Report the features and goals hit during one request.
    ///
    /// A non-success status is logged and dropped; transport failures are
    /// returned.
    pub fn report_hit(&self, user_id: &str, report: &HitReport) -> Result<()> {
        let request = self
            .app_request(Method::POST, ["user", user_id, "features", "hit"])
            .with_body(serde_json::to_value(report)?);
        let path = request.path();

        let response = self.transport.send(request)?;
        if !response.is_success() {
            tracing::error!(
                "[{}] failed to log features hit: {}: {}",
                response.status,
                path,
                response.body
            );
        }
        Ok(())
    }
}

fn upstream(response: ApiResponse) -> FluidFeaturesError {
    FluidFeaturesError::Upstream {
        status: response.status,
        body: response.body,
    }
}
