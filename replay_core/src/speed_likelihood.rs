//! Speed evidence for the replay state.
//!
//! Each state (replay / no replay) gets a Gaussian GLM with a log link on
//! the previous time step's speed, without intercept:
//!
//! ```text
//! E[speed_t] = exp(β · speed_{t-1})
//! ```
//!
//! fit by iteratively reweighted least squares. The evidence for replay at
//! each time step is the ratio of the two per-observation Gaussian
//! likelihoods.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

use crate::error::{LikelihoodError, Result};

const MAX_ITERATIONS: usize = 100;
const DEVIANCE_TOLERANCE: f64 = 1e-8;

/// Per-time-step evidence from the animal's speed.
pub trait SpeedLikelihood {
    /// Likelihood ratio replay / no replay for every time step.
    fn likelihood_ratio(&self, speed: &DVector<f64>) -> DVector<f64>;
}

/// Lag-1 design: `lagged[0] = 0`, `lagged[t] = speed[t - 1]`.
pub fn lag_speed(speed: &DVector<f64>) -> DVector<f64> {
    let mut lagged = DVector::zeros(speed.len());
    for t in 1..speed.len() {
        lagged[t] = speed[t - 1];
    }
    lagged
}

/// One fitted Gaussian / log-link GLM
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedGlm {
    /// Coefficient on the lagged speed
    pub coefficient: f64,

    /// Pearson estimate of the residual variance
    pub scale: f64,
}

impl SpeedGlm {
    /// Fits `speed ~ lagged_speed - 1` by IRLS.
    pub fn fit(speed: &DVector<f64>, lagged: &DVector<f64>) -> Result<Self> {
        let n = speed.len();
        if n < 2 || lagged.len() != n {
            return Err(LikelihoodError::config(format!(
                "speed model needs at least 2 paired samples, got {} speeds and {} lags",
                n,
                lagged.len()
            )));
        }
        if speed.iter().chain(lagged.iter()).any(|v| !v.is_finite()) {
            return Err(LikelihoodError::config("speed samples must be finite"));
        }

        let mean = speed.mean();
        let mut mu = speed.map(|y| (y + mean) / 2.0);
        if mu.iter().any(|&m| m <= 0.0) {
            return Err(LikelihoodError::config(
                "log-link speed model needs positive mean speed",
            ));
        }
        let mut eta = mu.map(f64::ln);

        let mut coefficient = 0.0;
        let mut deviance = f64::INFINITY;
        for iteration in 0..MAX_ITERATIONS {
            let weights = mu.component_mul(&mu);
            let working = &eta + (speed - &mu).component_div(&mu);

            let numerator = weights.component_mul(lagged).dot(&working);
            let denominator = weights.component_mul(lagged).dot(lagged);
            if !(denominator > 0.0 && denominator.is_finite() && numerator.is_finite()) {
                return Err(LikelihoodError::config(
                    "degenerate lagged-speed design (no usable variation)",
                ));
            }
            coefficient = numerator / denominator;

            eta = lagged * coefficient;
            mu = eta.map(f64::exp);

            let next = (speed - &mu).norm_squared();
            let converged = (next - deviance).abs() <= DEVIANCE_TOLERANCE;
            deviance = next;
            if converged {
                debug!(iteration, coefficient, deviance, "speed GLM converged");
                break;
            }
        }

        let scale = deviance / (n - 1) as f64;
        Ok(Self { coefficient, scale })
    }

    /// Predicted mean speed for each lagged speed.
    pub fn predict(&self, lagged: &DVector<f64>) -> DVector<f64> {
        lagged.map(|x| (self.coefficient * x).exp())
    }

    /// Gaussian log-likelihood of each observation under this model.
    pub fn log_likelihood(&self, speed: &DVector<f64>, lagged: &DVector<f64>) -> DVector<f64> {
        let prediction = self.predict(lagged);
        let log_norm = (2.0 * PI * self.scale).ln();
        speed.zip_map(&prediction, |y, mu| {
            -0.5 * ((y - mu) * (y - mu) / self.scale + log_norm)
        })
    }
}

/// Replay vs. no-replay speed model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaggedSpeedModel {
    pub replay: SpeedGlm,
    pub no_replay: SpeedGlm,
}

impl LaggedSpeedModel {
    /// Fits one GLM per state; the lag is taken over the full sequence.
    pub fn fit(speed: &DVector<f64>, is_replay: &[bool]) -> Result<Self> {
        if is_replay.len() != speed.len() {
            return Err(LikelihoodError::dimensions(format!(
                "{} speeds but {} replay flags",
                speed.len(),
                is_replay.len()
            )));
        }
        let lagged = lag_speed(speed);
        let select = |state: bool| {
            let (y, x): (Vec<f64>, Vec<f64>) = is_replay
                .iter()
                .enumerate()
                .filter(|(_, &flag)| flag == state)
                .map(|(t, _)| (speed[t], lagged[t]))
                .unzip();
            (DVector::from_vec(y), DVector::from_vec(x))
        };

        let (y, x) = select(true);
        let replay = SpeedGlm::fit(&y, &x)?;
        let (y, x) = select(false);
        let no_replay = SpeedGlm::fit(&y, &x)?;

        debug!(?replay, ?no_replay, "fitted speed likelihood model");
        Ok(Self { replay, no_replay })
    }
}

impl SpeedLikelihood for LaggedSpeedModel {
    fn likelihood_ratio(&self, speed: &DVector<f64>) -> DVector<f64> {
        let lagged = lag_speed(speed);
        let replay = self.replay.log_likelihood(speed, &lagged);
        let no_replay = self.no_replay.log_likelihood(speed, &lagged);
        (replay - no_replay).map(|log_ratio| {
            let ratio = log_ratio.exp();
            if ratio == f64::INFINITY {
                1.0
            } else {
                ratio
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lag_speed() {
        let speed = DVector::from_vec(vec![3.0, 4.0, 5.0]);
        assert_eq!(lag_speed(&speed), DVector::from_vec(vec![0.0, 3.0, 4.0]));
    }

    #[test]
    fn test_fit_recovers_coefficient() {
        let mut speeds = vec![1.0];
        for t in 1..200 {
            let noise = if t % 2 == 0 { 1.01 } else { 0.99 };
            let previous: f64 = speeds[t - 1];
            speeds.push((0.1 * previous).exp() * noise);
        }
        let speed = DVector::from_vec(speeds);
        let lagged = lag_speed(&speed);

        let glm = SpeedGlm::fit(&speed, &lagged).unwrap();
        assert_relative_eq!(glm.coefficient, 0.1, epsilon = 0.01);
        assert!(glm.scale > 0.0 && glm.scale < 1e-3);
    }

    #[test]
    fn test_ratio_favours_matching_state() {
        let model = LaggedSpeedModel {
            replay: SpeedGlm {
                coefficient: 2.0f64.ln() / 2.0,
                scale: 1.0,
            },
            no_replay: SpeedGlm {
                coefficient: 30.0f64.ln() / 30.0,
                scale: 25.0,
            },
        };
        let ratio = model.likelihood_ratio(&DVector::from_vec(vec![2.0, 2.0, 2.0]));
        assert_eq!(ratio.len(), 3);
        assert!(ratio.iter().all(|&r| r > 1.0));

        let ratio = model.likelihood_ratio(&DVector::from_vec(vec![30.0, 30.0, 30.0]));
        assert!(ratio[2] < 1.0);
    }

    #[test]
    fn test_infinite_ratio_is_clamped() {
        let model = LaggedSpeedModel {
            replay: SpeedGlm {
                coefficient: 0.0,
                scale: 1.0,
            },
            no_replay: SpeedGlm {
                coefficient: 0.0,
                scale: 1e-10,
            },
        };
        let ratio = model.likelihood_ratio(&DVector::from_vec(vec![2.0]));
        assert_eq!(ratio[0], 1.0);
    }

    #[test]
    fn test_fit_needs_both_states() {
        let speed = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let result = LaggedSpeedModel::fit(&speed, &[false; 4]);
        assert!(matches!(result, Err(LikelihoodError::Configuration(_))));

        let result = LaggedSpeedModel::fit(&speed, &[false; 3]);
        assert!(matches!(result, Err(LikelihoodError::DimensionMismatch(_))));
    }
}
