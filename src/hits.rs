use std::collections::BTreeMap;

use serde::Serialize;

/// Empty marker recorded for each evaluated (name, version) pair.
/// Serializes as `{}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Hit {}

/// Feature (or goal) name to version name to marker.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct HitLog(BTreeMap<String, BTreeMap<String, Hit>>);

impl HitLog {
    pub fn record(&mut self, name: &str, version: &str) {
        self.0
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), Hit {});
    }

    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.0.get(name).is_some_and(|v| v.contains_key(version))
    }

    /// Number of distinct (name, version) pairs.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Defaults supplied by the caller the first time an unknown feature is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureDefaults {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UnknownFeature {
    pub versions: BTreeMap<String, FeatureDefaults>,
}

/// Features the service has no record of, reported so it can register them.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct UnknownFeatures(BTreeMap<String, UnknownFeature>);

impl UnknownFeatures {
    pub fn record(&mut self, name: &str, version: &str, defaults: FeatureDefaults) {
        self.0
            .entry(name.to_string())
            .or_default()
            .versions
            .insert(version.to_string(), defaults);
    }

    pub fn get(&self, name: &str, version: &str) -> Option<FeatureDefaults> {
        self.0.get(name)?.versions.get(version).copied()
    }

    pub fn len(&self) -> usize {
        self.0.values().map(|f| f.versions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
