//! Error types for the simulation harness.

use replay_core::LikelihoodError;
use thiserror::Error;

/// Errors that can occur while setting up or running a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// The likelihood core rejected its inputs
    #[error("Likelihood error: {0}")]
    Likelihood(#[from] LikelihoodError),

    /// Invalid simulation configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Config or export file could not be read/written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SimError {
    /// Creates a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
