//! Hyperparameters for a fitted likelihood model.

use serde::{Deserialize, Serialize};

use crate::error::{LikelihoodError, Result};

/// Default spatial kernel variance (cm² along the track).
pub const DEFAULT_VARIANCE: f64 = 8.0;

/// Default number of positions solved per distance batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Configuration for the multiunit likelihood pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LikelihoodConfig {
    /// Variance of the Gaussian spatial mixing kernel (default: 8.0)
    pub variance: f64,

    /// Positions per shortest-path batch (default: 10_000)
    pub batch_size: usize,

    /// One smoothing bandwidth per multiunit feature channel
    pub bandwidths: Vec<f64>,

    /// Duration of one training time step in seconds (default: 1.0)
    pub time_bin_size: f64,
}

impl Default for LikelihoodConfig {
    fn default() -> Self {
        Self {
            variance: DEFAULT_VARIANCE,
            batch_size: DEFAULT_BATCH_SIZE,
            bandwidths: vec![20.0; 4], // tetrode amplitudes, µV
            time_bin_size: 1.0,
        }
    }
}

impl LikelihoodConfig {
    /// Creates a config with the given bandwidths and default everything else.
    pub fn with_bandwidths(bandwidths: Vec<f64>) -> Self {
        Self {
            bandwidths,
            ..Default::default()
        }
    }

    /// Checks every hyperparameter, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        validate_variance(self.variance)?;
        validate_bandwidths(&self.bandwidths)?;
        if self.batch_size == 0 {
            return Err(LikelihoodError::config("batch size must be at least 1"));
        }
        if !(self.time_bin_size.is_finite() && self.time_bin_size > 0.0) {
            return Err(LikelihoodError::config(format!(
                "time bin size must be positive, got {}",
                self.time_bin_size
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_variance(variance: f64) -> Result<()> {
    if variance.is_finite() && variance > 0.0 {
        Ok(())
    } else {
        Err(LikelihoodError::config(format!(
            "variance must be positive and finite, got {}",
            variance
        )))
    }
}

pub(crate) fn validate_bandwidths(bandwidths: &[f64]) -> Result<()> {
    for (channel, &bandwidth) in bandwidths.iter().enumerate() {
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return Err(LikelihoodError::config(format!(
                "bandwidth for feature channel {} must be positive, got {}",
                channel, bandwidth
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LikelihoodConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.variance, 8.0);
    }

    #[test]
    fn test_rejects_bad_hyperparameters() {
        let mut config = LikelihoodConfig::default();
        config.variance = -1.0;
        assert!(matches!(config.validate(), Err(LikelihoodError::Configuration(_))));

        let config = LikelihoodConfig::with_bandwidths(vec![1.0, 0.0]);
        assert!(matches!(config.validate(), Err(LikelihoodError::Configuration(_))));

        let mut config = LikelihoodConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LikelihoodConfig =
            serde_json::from_str(r#"{ "bandwidths": [1.0, 2.0] }"#).unwrap();
        assert_eq!(config.bandwidths, vec![1.0, 2.0]);
        assert_eq!(config.variance, DEFAULT_VARIANCE);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }
}
