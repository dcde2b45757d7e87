use std::sync::Arc;
use std::time::Duration;

use crate::client::FluidFeaturesClient;
use crate::config::{Config, ConfigSection};
use crate::error::Result;
use crate::transaction::TransactionDefaults;
use crate::transport::{HttpTransport, Transport};
use crate::FluidFeatures;

/// Configures a [`FluidFeatures`] handle.
///
/// Credentials left unset fall back to the `FLUIDFEATURES_BASEURI`,
/// `FLUIDFEATURES_APPID` and `FLUIDFEATURES_SECRET` environment variables.
#[derive(Default)]
pub struct FluidFeaturesBuilder {
    section: ConfigSection,
    transport: Option<Arc<dyn Transport>>,
}

pub fn create_builder() -> FluidFeaturesBuilder {
    FluidFeaturesBuilder::default()
}

impl FluidFeaturesBuilder {
    pub fn base_uri(mut self, uri: &str) -> Self {
        self.section.base_uri = Some(uri.to_string());
        self
    }

    pub fn app_id(mut self, app_id: &str) -> Self {
        self.section.app_id = Some(app_id.to_string());
        self
    }

    pub fn secret(mut self, secret: &str) -> Self {
        self.section.secret = Some(secret.to_string());
        self
    }

    /// Upper bound on every call to the service. Slower calls count as
    /// failures.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.section.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Calls slower than this are logged at warn level.
    pub fn warn_threshold(mut self, threshold: Duration) -> Self {
        self.section.warn_threshold_ms = Some(threshold.as_millis() as u64);
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.section.pool_size = Some(size);
        self
    }

    /// Version name used when a check does not name one.
    pub fn default_version(mut self, version: &str) -> Self {
        self.section.default_version = Some(version.to_string());
        self
    }

    /// Answer for unknown features checked through [`crate::Transaction::is_enabled`].
    pub fn default_enabled(mut self, enabled: bool) -> Self {
        self.section.default_enabled = Some(enabled);
        self
    }

    /// Use a custom transport instead of the pooled HTTP client.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<FluidFeatures> {
        let config = Config::from_section(with_env_fallback(self.section, |key| {
            std::env::var(key).ok()
        }))?;
        match self.transport {
            Some(transport) => Ok(FluidFeatures::with_transport(&config, transport)),
            None => FluidFeatures::from_config(&config),
        }
    }
}

/// Values set on the builder win; unset credentials come from `lookup`.
fn with_env_fallback<F>(section: ConfigSection, lookup: F) -> ConfigSection
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = ConfigSection::default();
    env.apply_overrides_from(lookup);
    ConfigSection {
        base_uri: section.base_uri.or(env.base_uri),
        app_id: section.app_id.or(env.app_id),
        secret: section.secret.or(env.secret),
        ..section
    }
}

impl FluidFeatures {
    pub fn from_config(config: &Config) -> Result<FluidFeatures> {
        let transport = Arc::new(HttpTransport::new(config)?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> FluidFeatures {
        tracing::info!(
            "fluidfeatures initializing as app {} with {}",
            config.app_id,
            config.base_uri
        );
        FluidFeatures {
            client: Some(Arc::new(FluidFeaturesClient::new(
                transport,
                config.app_id.clone(),
            ))),
            defaults: TransactionDefaults {
                version: config.default_version.clone(),
                enabled: config.default_enabled,
            },
        }
    }
}
