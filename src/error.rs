use std::io;

/// Errors produced by the FluidFeatures SDK.
///
/// Only [`FluidFeaturesError::Usage`] is meant to reach application code from
/// the transaction API. Everything else is either returned by the admin
/// operations on [`crate::FluidFeaturesClient`] or logged and degraded to a
/// safe default.
#[derive(thiserror::Error, Debug)]
pub enum FluidFeaturesError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to parse config file: {0}")]
    ConfigFile(#[from] toml::de::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("invalid usage: {0}")]
    Usage(String),
}

impl From<reqwest::Error> for FluidFeaturesError {
    fn from(e: reqwest::Error) -> Self {
        FluidFeaturesError::Transport(Box::new(e))
    }
}

impl From<serde_json::Error> for FluidFeaturesError {
    fn from(e: serde_json::Error) -> Self {
        FluidFeaturesError::Protocol(e.to_string())
    }
}

impl FluidFeaturesError {
    /// True for failures caused by the remote service or the network, which
    /// flag evaluation degrades around instead of surfacing.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            FluidFeaturesError::Transport(_)
                | FluidFeaturesError::Upstream { .. }
                | FluidFeaturesError::Protocol(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FluidFeaturesError>;
