use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{FluidFeaturesError, Result};

/// The user a transaction evaluates features for.
///
/// `uniques` and `cohorts` hold arbitrary JSON attribute values. They are sent
/// verbatim in the hit report and coerced to strings for the user-features
/// query (see [`UserIdentity::query_attributes`]).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserIdentity {
    pub unique_id: String,
    pub anonymous: bool,
    pub name: Option<String>,
    pub uniques: BTreeMap<String, Value>,
    pub cohorts: BTreeMap<String, Value>,
}

impl UserIdentity {
    pub fn new(unique_id: impl Into<String>) -> Self {
        UserIdentity {
            unique_id: unique_id.into(),
            ..Default::default()
        }
    }

    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_unique(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.uniques.insert(key.into(), value.into());
        self
    }

    pub fn with_cohort(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.cohorts.insert(key.into(), value.into());
        self
    }

    /// Rejects identities without a usable id. This is a programming mistake
    /// in the host application, not an upstream problem.
    pub fn validate(&self) -> Result<()> {
        if self.unique_id.trim().is_empty() {
            return Err(FluidFeaturesError::Usage(
                "user identity requires a non-empty unique_id".to_string(),
            ));
        }
        Ok(())
    }

    /// Query parameters for the user-features request: the anonymous flag,
    /// then every unique and cohort attribute id as a string.
    pub fn query_attributes(&self) -> Vec<(String, String)> {
        let mut ids: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in self.uniques.iter().chain(self.cohorts.iter()) {
            if let Some(id) = attribute_id(value) {
                ids.insert(key.clone(), id);
            }
        }
        let anonymous = ids
            .remove("anonymous")
            .unwrap_or_else(|| self.anonymous.to_string());

        let mut query = Vec::with_capacity(ids.len() + 1);
        query.push(("anonymous".to_string(), anonymous));
        query.extend(ids);
        query
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.unique_id.clone(),
            name: self.name.clone(),
            anonymous: self.anonymous,
            unique: self.uniques.clone(),
            cohorts: self.cohorts.clone(),
        }
    }
}

/// Coerce an attribute value to the string id sent to the service.
fn attribute_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => match map.get("id") {
            Some(Value::Object(_)) | None => None,
            Some(id) => attribute_id(id),
        },
        Value::Array(_) | Value::Null => None,
    }
}

/// The user section of a hit report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub anonymous: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub unique: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub cohorts: BTreeMap<String, Value>,
}
