use serde::Serialize;

use crate::hits::{HitLog, UnknownFeatures};
use crate::user::UserSummary;

/// The end-of-request report posted to `/user/{id}/features/hit`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitReport {
    pub user: UserSummary,
    pub stats: Stats,
    pub features: FeatureReport,
    pub hits: Hits,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub request: RequestStats,
    /// Seconds spent fetching the user's features, `null` when never fetched.
    pub ff_latency: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestStats {
    /// Seconds from transaction start to report.
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureReport {
    pub hit: HitLog,
    pub unknown: UnknownFeatures,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hits {
    pub feature: HitLog,
    pub goal: HitLog,
}
