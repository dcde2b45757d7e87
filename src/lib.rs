//! Client SDK for the FluidFeatures feature flagging service.
//!
//! A [`FluidFeatures`] handle is created once per process. Each incoming
//! request gets its own [`Transaction`], which loads the user's features on
//! the first check, records every feature and goal hit, and reports them
//! once when the request ends.
//!
//! # Examples
//! ```no_run
//! use fluidfeatures::{FluidFeatures, UserIdentity};
//!
//! let ff = FluidFeatures::builder()
//!     .base_uri("https://www.fluidfeatures.com/service")
//!     .app_id("1vu33ki6emqe3")
//!     .secret("sssseeecrrreeetttt")
//!     .build()
//!     .unwrap();
//!
//! let user = UserIdentity::new("42").with_cohort("plan", "gold");
//! let mut tx = ff.create_transaction(user, "https://example.com/checkout").unwrap();
//! if tx.feature_enabled("new-checkout", None, false) {
//!     // ...
//! }
//! tx.goal_hit("purchase", None);
//! tx.end_transaction();
//! ```

use std::path::Path;
use std::sync::Arc;

pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod features;
pub mod hits;
pub mod report;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
pub mod transaction;
pub mod transport;
pub mod user;
pub mod visitor;

pub use builder::FluidFeaturesBuilder;
pub use client::{FeatureFetch, FluidFeaturesClient};
pub use config::Config;
pub use error::{FluidFeaturesError, Result};
pub use features::{FeatureMap, FeatureSet, FeatureValue};
pub use hits::{FeatureDefaults, HitLog, UnknownFeatures};
pub use report::HitReport;
pub use transaction::{Transaction, TransactionDefaults, TransactionState};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
pub use user::UserIdentity;
pub use visitor::{resolve_visitor, CookieAction, Visitor, ANONYMOUS_COOKIE};

/// Process-wide entry point: owns the shared client and hands out
/// per-request transactions.
///
/// A disabled handle (no credentials) still hands out transactions; they
/// answer every check with its default and never touch the network.
pub struct FluidFeatures {
    client: Option<Arc<FluidFeaturesClient>>,
    defaults: TransactionDefaults,
}

impl FluidFeatures {
    pub fn builder() -> FluidFeaturesBuilder {
        builder::create_builder()
    }

    pub fn disabled(defaults: TransactionDefaults) -> FluidFeatures {
        FluidFeatures {
            client: None,
            defaults,
        }
    }

    /// Load `environment` from the config file at `path`. Missing
    /// credentials disable the integration instead of failing the host.
    pub fn from_file_or_disabled(path: impl AsRef<Path>, environment: &str) -> FluidFeatures {
        match Config::load(path, environment).and_then(|c| FluidFeatures::from_config(&c)) {
            Ok(ff) => ff,
            Err(e) => {
                tracing::warn!("fluidfeatures is disabled: {}", e);
                FluidFeatures::disabled(TransactionDefaults::default())
            }
        }
    }

    /// Like [`FluidFeatures::from_file_or_disabled`] but reads only the
    /// `FLUIDFEATURES_*` environment variables.
    pub fn from_env_or_disabled() -> FluidFeatures {
        match Config::from_env().and_then(|c| FluidFeatures::from_config(&c)) {
            Ok(ff) => ff,
            Err(e) => {
                tracing::warn!("fluidfeatures is disabled: {}", e);
                FluidFeatures::disabled(TransactionDefaults::default())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub fn client(&self) -> Option<&Arc<FluidFeaturesClient>> {
        self.client.as_ref()
    }

    pub fn defaults(&self) -> &TransactionDefaults {
        &self.defaults
    }

    /// Start the transaction for one incoming request.
    ///
    /// Fails only when `user` has no id, which is a bug in the caller.
    pub fn create_transaction(&self, user: UserIdentity, url: impl Into<String>) -> Result<Transaction> {
        user.validate()?;
        Ok(Transaction::new(
            self.client.clone(),
            user,
            url.into(),
            self.defaults.clone(),
        ))
    }
}
