//! Error types for the replay likelihood core.

use thiserror::Error;

/// Errors surfaced by the likelihood core.
///
/// Only structural and configuration problems are reported. Ordinary
/// floating point edge cases (underflow to 0.0, NaN inputs) flow through
/// the numbers instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LikelihoodError {
    /// Invalid hyperparameter or input value (variance, bandwidth, batch size, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The track layout is invalid: a bin center cannot be reached from an anchor
    #[error("Graph topology error at node {node}: {reason}")]
    GraphTopology { node: usize, reason: String },

    /// Array shapes do not line up
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}

impl LikelihoodError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an unreachable-node topology error.
    pub fn unreachable(node: usize) -> Self {
        Self::GraphTopology {
            node,
            reason: "bin center is unreachable from the anchor (disconnected track graph)"
                .to_string(),
        }
    }

    /// Creates a dimension mismatch error.
    pub fn dimensions(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LikelihoodError>;
