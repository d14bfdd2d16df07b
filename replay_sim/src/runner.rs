//! Scenario runner - fits the likelihood on one session and decodes another.

use nalgebra::{DMatrix, DVector};
use replay_core::{
    DistanceSolver, LaggedSpeedModel, LikelihoodError, MultiunitLikelihood, SpeedLikelihood,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SimError;
use crate::exporter::{SimExport, SimFrame};
use crate::oracle::Oracle;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimSession};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Samples in the decoded (test) session
    pub total_samples: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Spikes (all electrodes) in the training session
    pub training_spikes: usize,

    /// Spikes (all electrodes) in the test session
    pub test_spikes: usize,

    /// Test samples with at least one spike
    pub decoded_samples: usize,

    /// Median decoding error outside replay (cm)
    pub median_error: Option<f64>,

    /// Mean decoding error outside replay (cm)
    pub mean_error: Option<f64>,

    /// Median error against the replayed trajectory (cm)
    pub replay_median_error: Option<f64>,

    /// Mean speed likelihood ratio over replay samples
    pub replay_speed_ratio: Option<f64>,

    /// Mean speed likelihood ratio over running samples
    pub running_speed_ratio: Option<f64>,
}

/// Runs decoding scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Base configuration before scenario overrides
    config: SimConfig,

    /// Training duration override in seconds
    max_duration_secs: Option<f64>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: SimConfig::default(),
            max_duration_secs: None,
        }
    }

    /// Sets the base configuration.
    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the training duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = Some(secs);
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario).0
    }

    /// Runs a scenario and keeps the per-sample decoding frames.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        match self.execute(scenario) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "scenario aborted");
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_samples: 0,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                };
                (result, SimExport::new(scenario.name(), self.seed))
            }
        }
    }

    fn scenario_config(&self, scenario: ScenarioId) -> SimConfig {
        let mut config = scenario.configure(&self.config);
        config.seed = self.seed;
        if let Some(secs) = self.max_duration_secs {
            config.duration_secs = secs;
        }
        // Training steps are one sample long.
        config.likelihood.time_bin_size = config.dt();
        config
    }

    fn execute(&self, scenario: ScenarioId) -> Result<(ScenarioResult, SimExport), SimError> {
        let config = self.scenario_config(scenario);
        config.validate()?;
        let dt = config.dt();

        // Setup
        let layout = scenario.layout(config.bin_size);
        let track = layout.build()?;
        let route = scenario.route(&layout)?;
        let solver = DistanceSolver::new(track.graph)?.with_batch_size(config.likelihood.batch_size);
        let mut oracle = Oracle::new(config.clone(), solver.clone(), route)?;

        let training = oracle.record_session(config.duration_secs)?;
        let test = oracle.record_session(config.duration_secs / 2.0)?;
        info!(
            "  Recorded {} training / {} test samples on {} bins",
            training.len(),
            test.len(),
            track.is_interior.len()
        );

        // Fit
        let model = MultiunitLikelihood::fit(
            &training.positions,
            &training.marks,
            &training.is_replay,
            &solver,
            track.is_interior,
            config.likelihood.clone(),
        )?;
        let speed_model = fit_speed_model(&training)?;

        // Decode
        let likelihood = model.likelihood(&test.marks, dt)?;
        let distances = solver.solve(&test.represented_positions)?;
        let speed_ratio = speed_model.map(|m| m.likelihood_ratio(&DVector::from_vec(test.speed.clone())));

        let interior_rank = interior_ranks(model.is_interior());
        let bin_centers = solver.table().bin_center_positions().to_vec();

        let mut export = SimExport::new(scenario.name(), self.seed);
        export.bin_centers = bin_centers.clone();
        let mut running_errors = Vec::new();
        let mut replay_errors = Vec::new();

        for t in 0..test.len() {
            let num_spikes = test.spikes_at(t);
            let decoded = if num_spikes > 0 {
                map_bin(&likelihood, t).and_then(|bin| interior_rank[bin])
            } else {
                None
            };
            let error = decoded.map(|rank| distances[(t, rank)]);
            if let Some(error) = error {
                if test.is_replay[t] {
                    replay_errors.push(error);
                } else {
                    running_errors.push(error);
                }
            }

            export.add_frame(SimFrame {
                time_sec: test.time[t],
                position: test.positions[t],
                represented_position: test.represented_positions[t],
                decoded_position: decoded.map(|rank| bin_centers[rank]),
                decoding_error: error,
                speed_ratio: speed_ratio.as_ref().map(|r| r[t]),
                speed: test.speed[t],
                is_replay: test.is_replay[t],
                num_spikes,
            });
        }

        let metrics = ScenarioMetrics {
            training_spikes: training.total_spikes(),
            test_spikes: test.total_spikes(),
            decoded_samples: running_errors.len() + replay_errors.len(),
            median_error: median(&running_errors),
            mean_error: mean(&running_errors),
            replay_median_error: median(&replay_errors),
            replay_speed_ratio: speed_ratio
                .as_ref()
                .and_then(|r| mean_where(r, &test.is_replay, true)),
            running_speed_ratio: speed_ratio
                .as_ref()
                .and_then(|r| mean_where(r, &test.is_replay, false)),
        };
        debug!(?metrics, "decoding metrics");

        let failure_reason = judge(scenario, &config, &metrics);
        let passed = failure_reason.is_none();
        export.finalize(passed, metrics.median_error);

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_samples: test.len(),
            failure_reason,
            metrics,
        };
        Ok((result, export))
    }
}

/// Fits the speed model, or `None` if the session lacks one of the states.
fn fit_speed_model(session: &SimSession) -> Result<Option<LaggedSpeedModel>, SimError> {
    let speed = DVector::from_vec(session.speed.clone());
    match LaggedSpeedModel::fit(&speed, &session.is_replay) {
        Ok(model) => Ok(Some(model)),
        Err(LikelihoodError::Configuration(reason)) => {
            warn!(%reason, "speed model unavailable");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Returns the failure reason, if any.
fn judge(scenario: ScenarioId, config: &SimConfig, metrics: &ScenarioMetrics) -> Option<String> {
    let Some(median_error) = metrics.median_error else {
        return Some("no samples could be decoded".to_string());
    };
    if median_error > config.max_median_error {
        return Some(format!(
            "median error {:.1} cm exceeds {:.1} cm",
            median_error, config.max_median_error
        ));
    }
    if scenario.scores_replay() {
        match metrics.replay_median_error {
            Some(error) if error <= config.max_median_error => {}
            Some(error) => {
                return Some(format!(
                    "replay median error {:.1} cm exceeds {:.1} cm",
                    error, config.max_median_error
                ))
            }
            None => return Some("no replay samples were decoded".to_string()),
        }
    }
    if let (Some(replay), Some(running)) = (metrics.replay_speed_ratio, metrics.running_speed_ratio) {
        if replay <= running {
            return Some(format!(
                "speed evidence favours replay while running ({:.3} <= {:.3})",
                replay, running
            ));
        }
    }
    None
}

/// Maps each place bin to its rank among interior bins.
fn interior_ranks(is_interior: &[bool]) -> Vec<Option<usize>> {
    let mut rank = 0;
    is_interior
        .iter()
        .map(|&inside| {
            inside.then(|| {
                rank += 1;
                rank - 1
            })
        })
        .collect()
}

/// Column with the largest positive likelihood, first one on ties.
fn map_bin(likelihood: &DMatrix<f64>, t: usize) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (bin, &value) in likelihood.row(t).iter().enumerate() {
        if value > 0.0 && best.map_or(true, |(_, b)| value > b) {
            best = Some((bin, value));
        }
    }
    best.map(|(bin, _)| bin)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn mean_where(values: &DVector<f64>, flags: &[bool], state: bool) -> Option<f64> {
    let selected: Vec<f64> = values
        .iter()
        .zip(flags)
        .filter(|(_, &flag)| flag == state)
        .map(|(&v, _)| v)
        .collect();
    mean(&selected)
}
