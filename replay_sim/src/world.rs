//! Simulation configuration and recorded sessions.

use nalgebra::DMatrix;
use replay_core::LikelihoodConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SimError;

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Duration of the training session in seconds (the test session is half)
    pub duration_secs: f64,

    /// Position/spike sampling rate in Hz
    pub sampling_rate_hz: f64,

    /// Place bin size along the track (cm)
    pub bin_size: f64,

    /// Running speed of the animal (cm/s)
    pub running_speed: f64,

    /// Standard deviation of the measured speed (cm/s)
    pub speed_noise_std: f64,

    /// Number of electrodes (tetrodes)
    pub num_electrodes: usize,

    /// Units contributing to each electrode
    pub units_per_electrode: usize,

    /// Peak firing rate of a unit at its field center (Hz)
    pub peak_rate_hz: f64,

    /// Place field width along the track (cm, 1 std)
    pub field_width: f64,

    /// Mark amplitude noise (µV, 1 std)
    pub mark_noise_std: f64,

    /// Seconds between replay events (0 = no replay)
    pub replay_interval_secs: f64,

    /// Duration of one replay event in seconds
    pub replay_duration_secs: f64,

    /// Replayed trajectory speed relative to running speed
    pub replay_speed_factor: f64,

    /// Maximum median decoding error (cm) for the run to pass
    pub max_median_error: f64,

    /// Likelihood hyperparameters; bandwidths need one entry per mark channel
    pub likelihood: LikelihoodConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            duration_secs: 40.0,
            sampling_rate_hz: 100.0,
            bin_size: 5.0,
            running_speed: 25.0,
            speed_noise_std: 1.5,
            num_electrodes: 4,
            units_per_electrode: 4,
            peak_rate_hz: 30.0,
            field_width: 8.0,
            mark_noise_std: 6.0,
            replay_interval_secs: 4.0,
            replay_duration_secs: 0.2,
            replay_speed_factor: 10.0,
            max_median_error: 30.0,
            likelihood: LikelihoodConfig {
                variance: 8.0,
                batch_size: 10_000,
                bandwidths: vec![15.0; 4],
                time_bin_size: 0.01,
            },
        }
    }
}

impl SimConfig {
    /// Loads a config from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Seconds per sample.
    pub fn dt(&self) -> f64 {
        1.0 / self.sampling_rate_hz
    }

    /// Number of mark channels per electrode.
    pub fn num_features(&self) -> usize {
        self.likelihood.bandwidths.len()
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let positive = [
            ("duration_secs", self.duration_secs),
            ("sampling_rate_hz", self.sampling_rate_hz),
            ("bin_size", self.bin_size),
            ("running_speed", self.running_speed),
            ("field_width", self.field_width),
            ("replay_speed_factor", self.replay_speed_factor),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SimError::config(format!("{} must be positive, got {}", name, value)));
            }
        }
        if self.num_electrodes == 0 || self.units_per_electrode == 0 {
            return Err(SimError::config("need at least one electrode and one unit"));
        }
        if self.replay_interval_secs < 0.0 || self.replay_duration_secs < 0.0 {
            return Err(SimError::config("replay timing must be non-negative"));
        }
        self.likelihood.validate()?;
        Ok(())
    }
}

/// A recorded session: behaviour plus multiunit marks.
#[derive(Debug, Clone)]
pub struct SimSession {
    /// Sample times (s)
    pub time: Vec<f64>,

    /// Tracked linear position of the animal
    pub positions: Vec<f64>,

    /// Linear position represented by the spiking (differs during replay)
    pub represented_positions: Vec<f64>,

    /// Measured speed (cm/s)
    pub speed: Vec<f64>,

    /// Replay flag per sample
    pub is_replay: Vec<bool>,

    /// One `n_time × n_features` mark matrix per electrode, NaN rows = no spike
    pub marks: Vec<DMatrix<f64>>,
}

impl SimSession {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Number of electrodes that spiked at sample `t`.
    pub fn spikes_at(&self, t: usize) -> usize {
        self.marks
            .iter()
            .filter(|m| m.row(t).iter().all(|v| !v.is_nan()))
            .count()
    }

    pub fn total_spikes(&self) -> usize {
        (0..self.len()).map(|t| self.spikes_at(t)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_features(), 4);
        assert!((config.dt() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_partial_json_config() {
        let config: SimConfig =
            serde_json::from_str(r#"{ "seed": 7, "num_electrodes": 2 }"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.num_electrodes, 2);
        assert_eq!(config.running_speed, SimConfig::default().running_speed);
    }

    #[test]
    fn test_spike_counts() {
        let marks = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, f64::NAN, f64::NAN, 3.0, f64::NAN]);
        let session = SimSession {
            time: vec![0.0, 0.01, 0.02],
            positions: vec![0.0; 3],
            represented_positions: vec![0.0; 3],
            speed: vec![1.0; 3],
            is_replay: vec![false; 3],
            marks: vec![marks.clone(), marks],
        };

        assert_eq!(session.spikes_at(0), 2);
        assert_eq!(session.spikes_at(1), 0);
        // Partially missing features do not count as a spike.
        assert_eq!(session.spikes_at(2), 0);
        assert_eq!(session.total_spikes(), 2);
    }

    #[test]
    fn test_invalid_config() {
        let config = SimConfig {
            bin_size: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.likelihood.bandwidths = vec![0.0];
        assert!(config.validate().is_err());
    }
}
