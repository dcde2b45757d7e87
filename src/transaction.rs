use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::FluidFeaturesClient;
use crate::config::DEFAULT_VERSION;
use crate::features::FeatureMap;
use crate::hits::{FeatureDefaults, HitLog, UnknownFeatures};
use crate::report::{FeatureReport, HitReport, Hits, RequestStats, Stats};
use crate::user::UserIdentity;

/// Application-wide defaults applied when a check omits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDefaults {
    pub version: String,
    pub enabled: bool,
}

impl Default for TransactionDefaults {
    fn default() -> Self {
        TransactionDefaults {
            version: DEFAULT_VERSION.to_string(),
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Created,
    FeaturesLoaded,
    Ended,
}

/// Feature and goal bookkeeping for a single incoming request.
///
/// The user's feature map is fetched on the first feature check. Every check
/// is recorded, and one report is posted when the transaction ends, either
/// through [`Transaction::end_transaction`] or on drop.
pub struct Transaction {
    client: Option<Arc<FluidFeaturesClient>>,
    user: UserIdentity,
    url: String,
    defaults: TransactionDefaults,
    state: TransactionState,
    features: Option<FeatureMap>,
    fetch_duration: Option<Duration>,
    fetch_degraded: bool,
    feature_hits: HitLog,
    goal_hits: HitLog,
    unknown: UnknownFeatures,
    started_at: Instant,
}

impl Transaction {
    /// `client` is `None` when the SDK is disabled: checks answer with their
    /// defaults and nothing is sent.
    pub(crate) fn new(
        client: Option<Arc<FluidFeaturesClient>>,
        user: UserIdentity,
        url: String,
        defaults: TransactionDefaults,
    ) -> Self {
        Transaction {
            client,
            user,
            url,
            defaults,
            state: TransactionState::Created,
            features: None,
            fetch_duration: None,
            fetch_degraded: false,
            feature_hits: HitLog::default(),
            goal_hits: HitLog::default(),
            unknown: UnknownFeatures::default(),
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn feature_hits(&self) -> &HitLog {
        &self.feature_hits
    }

    pub fn goal_hits(&self) -> &HitLog {
        &self.goal_hits
    }

    pub fn unknown_features(&self) -> &UnknownFeatures {
        &self.unknown
    }

    /// Time spent loading the feature map, once loaded.
    pub fn fetch_duration(&self) -> Option<Duration> {
        self.fetch_duration
    }

    /// True when the feature map could not be loaded and defaults were used.
    pub fn fetch_degraded(&self) -> bool {
        self.fetch_degraded
    }

    /// Is `name` enabled for this request's user, using the configured
    /// default version and default-enabled flag.
    pub fn is_enabled(&mut self, name: &str) -> bool {
        let default_enabled = self.defaults.enabled;
        self.feature_enabled(name, None, default_enabled)
    }

    /// Is version `version` of feature `name` enabled for this request's
    /// user. Features the service does not know yet answer
    /// `default_enabled` and are reported as unknown.
    pub fn feature_enabled(&mut self, name: &str, version: Option<&str>, default_enabled: bool) -> bool {
        let version = version.unwrap_or(&self.defaults.version).to_string();

        if self.state == TransactionState::Ended {
            tracing::debug!("feature '{}' checked after transaction ended", name);
            return self
                .features
                .as_ref()
                .and_then(|f| f.get(name))
                .and_then(|v| v.lookup(&version))
                .unwrap_or(default_enabled);
        }

        self.load_features();
        self.feature_hits.record(name, &version);

        let known = self
            .features
            .as_ref()
            .and_then(|f| f.get(name))
            .and_then(|v| v.lookup(&version));
        match known {
            Some(enabled) => enabled,
            None => {
                tracing::debug!(
                    "seeing feature '{}' (version '{}') for the first time",
                    name,
                    version
                );
                self.unknown.record(
                    name,
                    &version,
                    FeatureDefaults {
                        enabled: default_enabled,
                    },
                );
                default_enabled
            }
        }
    }

    /// Record that the user reached goal `name`. Sent with the end-of-request
    /// report.
    pub fn goal_hit(&mut self, name: &str, version: Option<&str>) {
        if self.state == TransactionState::Ended {
            tracing::debug!("goal '{}' hit after transaction ended", name);
            return;
        }
        let version = version.unwrap_or(&self.defaults.version).to_string();
        self.goal_hits.record(name, &version);
    }

    fn load_features(&mut self) {
        if self.features.is_some() {
            return;
        }
        let features = match self.client {
            Some(ref client) => {
                let fetch = client.fetch_user_features(&self.user);
                self.fetch_duration = Some(fetch.elapsed);
                self.fetch_degraded = fetch.degraded;
                fetch.features
            }
            None => FeatureMap::new(),
        };
        self.features = Some(features);
        self.state = TransactionState::FeaturesLoaded;
    }

    /// Finish the request and post the hit report. Later calls do nothing.
    ///
    /// Reporting failures are logged and dropped.
    pub fn end_transaction(&mut self) {
        if self.state == TransactionState::Ended {
            tracing::debug!("transaction for user {} already ended", self.user.unique_id);
            return;
        }
        self.state = TransactionState::Ended;

        let Some(client) = self.client.clone() else {
            return;
        };
        let report = self.build_report();
        if let Err(e) = client.report_hit(&self.user.unique_id, &report) {
            tracing::warn!(
                "request to log user features hit failed for user {}: {}",
                self.user.unique_id,
                e
            );
        }
    }

    fn build_report(&mut self) -> HitReport {
        HitReport {
            user: self.user.summary(),
            stats: Stats {
                request: RequestStats {
                    duration: self.started_at.elapsed().as_secs_f64(),
                },
                ff_latency: self.fetch_duration.map(|d| d.as_secs_f64()),
            },
            features: FeatureReport {
                hit: self.feature_hits.clone(),
                unknown: std::mem::take(&mut self.unknown),
            },
            hits: Hits {
                feature: self.feature_hits.clone(),
                goal: self.goal_hits.clone(),
            },
            url: self.url.clone(),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.end_transaction();
    }
}
