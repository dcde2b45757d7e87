use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{FluidFeaturesError, Result};

/// The state of one feature for one user, as returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Unversioned feature: the same answer for every version.
    Flat(bool),
    /// Versioned feature: version name to enabled.
    Versioned(BTreeMap<String, bool>),
}

impl FeatureValue {
    /// `None` means the service has no record of this version.
    pub fn lookup(&self, version: &str) -> Option<bool> {
        match self {
            FeatureValue::Flat(enabled) => Some(*enabled),
            FeatureValue::Versioned(versions) => versions.get(version).copied(),
        }
    }
}

pub type FeatureMap = BTreeMap<String, FeatureValue>;

/// Every feature the service knows for the application, with its raw
/// enabled-percent metadata.
pub type FeatureSet = BTreeMap<String, serde_json::Value>;

/// Parse a user-features response body.
///
/// Entries that are neither a boolean nor a map of booleans are skipped so a
/// single odd entry does not hide every other feature.
pub fn parse_feature_map(body: &str) -> Result<FeatureMap> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(body)?;
    let mut features = FeatureMap::new();
    for (name, value) in raw {
        match serde_json::from_value::<FeatureValue>(value) {
            Ok(v) => {
                features.insert(name, v);
            }
            Err(e) => {
                tracing::debug!("skipping feature '{}' with unexpected value: {}", name, e);
            }
        }
    }
    Ok(features)
}

/// Parse a list-features response body.
pub fn parse_feature_set(body: &str) -> Result<FeatureSet> {
    if body.trim().is_empty() {
        return Err(FluidFeaturesError::Protocol(
            "empty feature set returned".to_string(),
        ));
    }
    Ok(serde_json::from_str(body)?)
}
