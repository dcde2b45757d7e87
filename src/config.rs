use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FluidFeaturesError, Result};

pub const DEFAULT_BASE_URI: &str = "https://www.fluidfeatures.com/service";
pub const DEFAULT_VERSION: &str = "default";

/// Raw contents of `fluidfeatures.toml`.
///
/// The `[common]` section applies to every environment; each named section
/// (`[development]`, `[production]`, ...) overrides it.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub common: ConfigSection,
    #[serde(flatten)]
    pub environments: HashMap<String, ConfigSection>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigSection {
    pub base_uri: Option<String>,
    pub app_id: Option<String>,
    pub secret: Option<String>,
    pub timeout_ms: Option<u64>,
    pub warn_threshold_ms: Option<u64>,
    pub pool_size: Option<usize>,
    pub default_version: Option<String>,
    pub default_enabled: Option<bool>,
}

impl ConfigSection {
    /// Fill every unset field from `fallback`.
    fn or(self, fallback: &ConfigSection) -> ConfigSection {
        ConfigSection {
            base_uri: self.base_uri.or_else(|| fallback.base_uri.clone()),
            app_id: self.app_id.or_else(|| fallback.app_id.clone()),
            secret: self.secret.or_else(|| fallback.secret.clone()),
            timeout_ms: self.timeout_ms.or(fallback.timeout_ms),
            warn_threshold_ms: self.warn_threshold_ms.or(fallback.warn_threshold_ms),
            pool_size: self.pool_size.or(fallback.pool_size),
            default_version: self
                .default_version
                .or_else(|| fallback.default_version.clone()),
            default_enabled: self.default_enabled.or(fallback.default_enabled),
        }
    }

    /// Apply `FLUIDFEATURES_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Apply `FLUIDFEATURES_*` overrides read through `lookup`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("FLUIDFEATURES_BASEURI") {
            self.base_uri = Some(val);
        }
        if let Some(val) = lookup("FLUIDFEATURES_APPID") {
            self.app_id = Some(val);
        }
        if let Some(val) = lookup("FLUIDFEATURES_SECRET") {
            self.secret = Some(val);
        }
    }
}

/// Validated SDK configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub base_uri: String,
    pub app_id: String,
    pub secret: String,
    pub timeout: Duration,
    pub warn_threshold: Duration,
    pub pool_size: usize,
    pub default_version: String,
    pub default_enabled: bool,
}

impl Config {
    /// Load the configuration for `environment` from a TOML file, then apply
    /// environment variable overrides. A missing file is treated as empty so
    /// that the environment variables alone can configure the SDK.
    pub fn load(path: impl AsRef<Path>, environment: &str) -> Result<Config> {
        let path = path.as_ref();
        let file = match std::fs::read_to_string(path) {
            Ok(content) => Self::parse_file(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("{} not found, using environment only", path.display());
                ConfigFile::default()
            }
            Err(e) => return Err(e.into()),
        };
        let mut section = file.resolve(environment);
        section.apply_env_overrides();
        Self::from_section(section)
    }

    /// Build the configuration from `FLUIDFEATURES_*` environment variables only.
    pub fn from_env() -> Result<Config> {
        let mut section = ConfigSection::default();
        section.apply_env_overrides();
        Self::from_section(section)
    }

    pub fn parse_file(content: &str) -> Result<ConfigFile> {
        Ok(toml::from_str(content)?)
    }

    /// Validate `section`. An unset `base_uri` means the hosted service.
    pub fn from_section(section: ConfigSection) -> Result<Config> {
        let base_uri = match section.base_uri {
            None => DEFAULT_BASE_URI.to_string(),
            uri => non_empty(uri, "base_uri")?,
        };
        let app_id = non_empty(section.app_id, "app_id")?;
        let secret = non_empty(section.secret, "secret")?;
        Ok(Config {
            base_uri: base_uri.trim_end_matches('/').to_string(),
            app_id,
            secret,
            timeout: Duration::from_millis(section.timeout_ms.unwrap_or(2_000)),
            warn_threshold: Duration::from_millis(section.warn_threshold_ms.unwrap_or(250)),
            pool_size: section.pool_size.unwrap_or(10),
            default_version: section
                .default_version
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            default_enabled: section.default_enabled.unwrap_or(false),
        })
    }
}

impl ConfigFile {
    /// Merge the named environment section over `[common]`.
    pub fn resolve(&self, environment: &str) -> ConfigSection {
        match self.environments.get(environment) {
            Some(section) => section.clone().or(&self.common),
            None => self.common.clone(),
        }
    }
}

fn non_empty(value: Option<String>, key: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(FluidFeaturesError::Configuration(format!(
            "missing {} (set it in the config file or FLUIDFEATURES_{})",
            key,
            key.replace('_', "").to_uppercase()
        ))),
    }
}
