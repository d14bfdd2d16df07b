//! Decoding scenarios for the simulator.

use replay_core::TrackLayout;

use crate::error::SimError;
use crate::oracle::Route;
use crate::world::SimConfig;

/// Length of the straight track (cm)
const LINEAR_LENGTH: f64 = 100.0;

/// W-track dimensions (cm)
const W_ARM_LENGTH: f64 = 60.0;
const W_CONNECTOR_LENGTH: f64 = 30.0;
const W_SPACING: f64 = 15.0;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: Straight track, default population
    LinearTrack,

    /// SIM-002: Branching W-maze, graph distances differ from linear ones
    WTrack,

    /// SIM-003: Low firing rates, many samples without any spike
    SparseSpiking,

    /// SIM-004: Frequent long replay events
    ReplayBurst,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::LinearTrack,
            ScenarioId::WTrack,
            ScenarioId::SparseSpiking,
            ScenarioId::ReplayBurst,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::LinearTrack => "linear_track",
            ScenarioId::WTrack => "w_track",
            ScenarioId::SparseSpiking => "sparse_spiking",
            ScenarioId::ReplayBurst => "replay_burst",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::LinearTrack => "100 cm straight track, 4 tetrodes x 4 units",
            ScenarioId::WTrack => "W-maze with two choice arms, decode along graph distances",
            ScenarioId::SparseSpiking => "8 Hz peak rates, most samples carry no spike",
            ScenarioId::ReplayBurst => "0.4 s replay every second, decode the replayed path",
        }
    }

    /// Returns true if the scenario also scores decoding during replay.
    pub fn scores_replay(&self) -> bool {
        matches!(self, ScenarioId::ReplayBurst)
    }

    /// Applies the scenario's overrides to a base configuration.
    pub fn configure(&self, base: &SimConfig) -> SimConfig {
        let mut config = base.clone();
        match self {
            ScenarioId::LinearTrack | ScenarioId::WTrack => {}
            ScenarioId::SparseSpiking => {
                config.peak_rate_hz = 8.0;
                config.max_median_error = base.max_median_error * 1.5;
            }
            ScenarioId::ReplayBurst => {
                config.replay_interval_secs = 1.0;
                config.replay_duration_secs = 0.4;
            }
        }
        config
    }

    /// Track layout the scenario runs on.
    pub fn layout(&self, bin_size: f64) -> TrackLayout {
        match self {
            ScenarioId::WTrack => {
                TrackLayout::w_track(W_ARM_LENGTH, W_CONNECTOR_LENGTH, W_SPACING, bin_size)
            }
            _ => TrackLayout::linear(LINEAR_LENGTH, bin_size),
        }
    }

    /// Route the animal runs on `layout`.
    ///
    /// On the W-track this alternates center → left → center → right.
    pub fn route(&self, layout: &TrackLayout) -> Result<Route, SimError> {
        let segments = layout.segments();
        let legs = match self {
            ScenarioId::WTrack => {
                if segments.len() != 5 {
                    return Err(SimError::config(format!(
                        "W-track route needs 5 segments, layout has {}",
                        segments.len()
                    )));
                }
                let left = [segments[0], segments[1], segments[2]];
                let right = [segments[0], segments[3], segments[4]];
                [Route::excursion(&left), Route::excursion(&right)].concat()
            }
            _ => Route::excursion(segments),
        };
        Route::new(legs)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear_track" | "linear" | "sim-001" => Ok(ScenarioId::LinearTrack),
            "w_track" | "wtrack" | "sim-002" => Ok(ScenarioId::WTrack),
            "sparse_spiking" | "sparse" | "sim-003" => Ok(ScenarioId::SparseSpiking),
            "replay_burst" | "replay" | "sim-004" => Ok(ScenarioId::ReplayBurst),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
