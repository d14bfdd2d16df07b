//! Ground truth oracle for simulation.
//!
//! The Oracle knows what the recordings only hint at:
//! - The animal's true position along its route
//! - Which place-field unit produced each multiunit spike
//! - When a replay event is under way and which trajectory it replays

use nalgebra::DMatrix;
use rand::distributions::WeightedIndex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Poisson};
use replay_core::track_layout::TrackSegment;
use replay_core::DistanceSolver;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SimError;
use crate::world::{SimConfig, SimSession};

/// Speed measured while the animal sits still during replay (cm/s).
const REST_SPEED: f64 = 0.5;

/// Lowest mark amplitude a unit can have (µV).
const MIN_AMPLITUDE: f64 = 50.0;

/// Highest mark amplitude a unit can have (µV).
const MAX_AMPLITUDE: f64 = 300.0;

/// A closed path over the linearized track, as a list of directed legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    legs: Vec<(f64, f64)>,
    length: f64,
}

impl Route {
    /// Creates a route from `(from, to)` legs in linear coordinates.
    pub fn new(legs: Vec<(f64, f64)>) -> Result<Self, SimError> {
        let length: f64 = legs.iter().map(|(from, to)| (to - from).abs()).sum();
        if !(length.is_finite() && length > 0.0) {
            return Err(SimError::config("route must have positive length"));
        }
        Ok(Self { legs, length })
    }

    /// Runs out along `path` and back again.
    pub fn excursion(path: &[TrackSegment]) -> Vec<(f64, f64)> {
        let out = path
            .iter()
            .map(|segment| (segment.start, segment.start + segment.length));
        let back = path
            .iter()
            .rev()
            .map(|segment| (segment.start + segment.length, segment.start));
        out.chain(back).collect()
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Linear position after travelling `distance` along the (looping) route.
    pub fn position_at(&self, distance: f64) -> f64 {
        let mut remaining = distance.rem_euclid(self.length);
        for &(from, to) in &self.legs {
            let leg = (to - from).abs();
            if remaining <= leg {
                return from + (to - from).signum() * remaining;
            }
            remaining -= leg;
        }
        self.legs.last().map_or(0.0, |&(_, to)| to)
    }
}

/// A place-field unit recorded on an electrode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Column of the bin center the field is centered on
    pub field_bin: usize,

    /// Mean spike amplitude on each channel (µV)
    pub mark_mean: Vec<f64>,
}

/// An electrode picking up several units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Electrode {
    pub units: Vec<Unit>,
}

/// Ground truth for the simulation.
pub struct Oracle {
    config: SimConfig,
    solver: DistanceSolver,
    route: Route,
    electrodes: Vec<Electrode>,
    rng: ChaCha8Rng,

    /// Distance travelled along the route
    route_distance: f64,

    /// Samples generated so far
    step_count: u64,

    /// Current simulation time
    time: f64,
}

impl Oracle {
    /// Creates an oracle with a random unit population.
    ///
    /// The population and the behaviour draw from separate streams derived
    /// from `config.seed`, so every session shares the same units.
    pub fn new(config: SimConfig, solver: DistanceSolver, route: Route) -> Result<Self, SimError> {
        config.validate()?;
        let n_bins = solver.num_bin_centers();
        if n_bins == 0 {
            return Err(SimError::config("track has no bin centers"));
        }

        let population_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let behaviour_seed = config.seed.wrapping_mul(0x517cc1b727220a95);

        let mut population_rng = ChaCha8Rng::seed_from_u64(population_seed);
        let n_features = config.num_features();
        let electrodes = (0..config.num_electrodes)
            .map(|_| Electrode {
                units: (0..config.units_per_electrode)
                    .map(|_| Unit {
                        field_bin: population_rng.gen_range(0..n_bins),
                        mark_mean: (0..n_features)
                            .map(|_| population_rng.gen_range(MIN_AMPLITUDE..MAX_AMPLITUDE))
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            config,
            solver,
            route,
            electrodes,
            rng: ChaCha8Rng::seed_from_u64(behaviour_seed),
            route_distance: 0.0,
            step_count: 0,
            time: 0.0,
        })
    }

    pub fn electrodes(&self) -> &[Electrode] {
        &self.electrodes
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Firing rate at a given track distance from a unit's field center.
    pub fn firing_rate(&self, distance_to_field: f64) -> f64 {
        let z = distance_to_field / self.config.field_width;
        self.config.peak_rate_hz * (-0.5 * z * z).exp()
    }

    /// Records the next `duration_secs` of behaviour and spiking.
    pub fn record_session(&mut self, duration_secs: f64) -> Result<SimSession, SimError> {
        let dt = self.config.dt();
        let n_time = (duration_secs / dt).round() as usize;

        let speed_noise = Normal::new(0.0, self.config.speed_noise_std)
            .map_err(|e| SimError::config(format!("speed noise: {}", e)))?;
        let replay_steps = (self.config.replay_duration_secs / dt).round() as u64;
        let interval_steps = (self.config.replay_interval_secs / dt).round() as u64;

        let mut session = SimSession {
            time: Vec::with_capacity(n_time),
            positions: Vec::with_capacity(n_time),
            represented_positions: Vec::with_capacity(n_time),
            speed: Vec::with_capacity(n_time),
            is_replay: Vec::with_capacity(n_time),
            marks: Vec::new(),
        };

        let mut replay_remaining = 0;
        let mut replay_cursor = 0.0;
        for _ in 0..n_time {
            if interval_steps > 0
                && replay_steps > 0
                && self.step_count % interval_steps == interval_steps - 1
            {
                replay_remaining = replay_steps;
                replay_cursor = self.route_distance;
            }

            let in_replay = replay_remaining > 0;
            let position;
            let represented;
            let speed;
            if in_replay {
                replay_remaining -= 1;
                replay_cursor += self.config.running_speed * self.config.replay_speed_factor * dt;
                position = self.route.position_at(self.route_distance);
                represented = self.route.position_at(replay_cursor);
                speed = REST_SPEED + 0.1 * speed_noise.sample(&mut self.rng);
            } else {
                self.route_distance += self.config.running_speed * dt;
                position = self.route.position_at(self.route_distance);
                represented = position;
                speed = self.config.running_speed + speed_noise.sample(&mut self.rng);
            }

            session.time.push(self.time);
            session.positions.push(position);
            session.represented_positions.push(represented);
            session.speed.push(speed.abs().max(1e-3));
            session.is_replay.push(in_replay);

            self.step_count += 1;
            self.time += dt;
        }

        session.marks = self.generate_marks(&session.represented_positions)?;
        debug!(
            samples = n_time,
            spikes = session.total_spikes(),
            time = self.time,
            "recorded session"
        );
        Ok(session)
    }

    /// Samples one mark matrix per electrode from the represented positions.
    fn generate_marks(&mut self, represented: &[f64]) -> Result<Vec<DMatrix<f64>>, SimError> {
        let dt = self.config.dt();
        let n_time = represented.len();
        let n_features = self.config.num_features();
        let distances = self.solver.solve(represented)?;
        let mark_noise = Normal::new(0.0, self.config.mark_noise_std)
            .map_err(|e| SimError::config(format!("mark noise: {}", e)))?;

        let mut all_marks = Vec::with_capacity(self.electrodes.len());
        for electrode in &self.electrodes {
            let mut marks = DMatrix::from_element(n_time, n_features, f64::NAN);
            for t in 0..n_time {
                let rates: Vec<f64> = electrode
                    .units
                    .iter()
                    .map(|unit| self.firing_rate(distances[(t, unit.field_bin)]))
                    .collect();
                let expected = rates.iter().sum::<f64>() * dt;
                let Ok(spike_count) = Poisson::new(expected) else {
                    continue;
                };
                // At most one spike per electrode and sample.
                let count: f64 = spike_count.sample(&mut self.rng);
                if count < 1.0 {
                    continue;
                }
                let Ok(choice) = WeightedIndex::new(&rates) else {
                    continue;
                };
                let unit = &electrode.units[choice.sample(&mut self.rng)];
                for (channel, mean) in unit.mark_mean.iter().enumerate() {
                    marks[(t, channel)] = mean + mark_noise.sample(&mut self.rng);
                }
            }
            all_marks.push(marks);
        }
        Ok(all_marks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use replay_core::TrackLayout;

    fn linear_oracle(seed: u64) -> Oracle {
        let config = SimConfig {
            seed,
            ..Default::default()
        };
        let track = TrackLayout::linear(100.0, config.bin_size).build().unwrap();
        let solver = DistanceSolver::new(track.graph).unwrap();
        let route = Route::new(vec![(0.0, 100.0), (100.0, 0.0)]).unwrap();
        Oracle::new(config, solver, route).unwrap()
    }

    #[test]
    fn test_route_position() {
        let route = Route::new(vec![(0.0, 100.0), (100.0, 0.0)]).unwrap();
        assert_eq!(route.length(), 200.0);
        assert_eq!(route.position_at(30.0), 30.0);
        assert_eq!(route.position_at(130.0), 70.0);
        assert_eq!(route.position_at(230.0), 30.0);
    }

    #[test]
    fn test_excursion_returns_home() {
        let path = [
            TrackSegment { start: 0.0, length: 60.0 },
            TrackSegment { start: 75.0, length: 30.0 },
        ];
        let legs = Route::excursion(&path);
        assert_eq!(legs, vec![(0.0, 60.0), (75.0, 105.0), (105.0, 75.0), (60.0, 0.0)]);
        let route = Route::new(legs).unwrap();
        assert_eq!(route.position_at(65.0), 80.0);
        assert_eq!(route.position_at(route.length() - 1.0), 1.0);
    }

    #[test]
    fn test_empty_route_rejected() {
        assert!(Route::new(vec![]).is_err());
        assert!(Route::new(vec![(5.0, 5.0)]).is_err());
    }

    #[test]
    fn test_session_shapes() {
        let mut oracle = linear_oracle(42);
        let session = oracle.record_session(2.0).unwrap();

        assert_eq!(session.len(), 200);
        assert_eq!(session.marks.len(), 4);
        for marks in &session.marks {
            assert_eq!(marks.nrows(), 200);
            assert_eq!(marks.ncols(), 4);
        }
        assert!(session.total_spikes() > 0);
        assert!((oracle.time() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_replay_windows() {
        let mut oracle = linear_oracle(42);
        let session = oracle.record_session(10.0).unwrap();

        let replay_samples = session.is_replay.iter().filter(|&&r| r).count();
        // Two 0.2 s events at 100 Hz in 10 s with a 4 s interval
        assert_eq!(replay_samples, 40);
        for t in 0..session.len() {
            if session.is_replay[t] {
                assert!(session.speed[t] < 2.0);
            } else {
                assert_eq!(session.positions[t], session.represented_positions[t]);
            }
        }
    }

    #[test]
    fn test_deterministic_with_seed() {
        let mut a = linear_oracle(7);
        let mut b = linear_oracle(7);
        let sa = a.record_session(1.0).unwrap();
        let sb = b.record_session(1.0).unwrap();

        assert_eq!(sa.positions, sb.positions);
        assert_eq!(sa.speed, sb.speed);
        for (ma, mb) in sa.marks.iter().zip(&sb.marks) {
            for (x, y) in ma.iter().zip(mb.iter()) {
                assert!(x == y || (x.is_nan() && y.is_nan()));
            }
        }
    }

    #[test]
    fn test_sessions_share_population() {
        let mut oracle = linear_oracle(3);
        let fields: Vec<usize> = oracle.electrodes()[0].units.iter().map(|u| u.field_bin).collect();
        let first = oracle.record_session(1.0).unwrap();
        let second = oracle.record_session(1.0).unwrap();

        let after: Vec<usize> = oracle.electrodes()[0].units.iter().map(|u| u.field_bin).collect();
        assert_eq!(fields, after);
        assert!((second.time[0] - first.time[first.len() - 1] - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_firing_rate_peaks_at_field() {
        let oracle = linear_oracle(1);
        assert_eq!(oracle.firing_rate(0.0), 30.0);
        assert_relative_eq!(oracle.firing_rate(8.0), 30.0 * (-0.5f64).exp(), epsilon = 1e-12);
        assert!(oracle.firing_rate(80.0) < 1e-10);
    }

    proptest! {
        #[test]
        fn prop_route_stays_on_legs(distance in -1000.0f64..1000.0) {
            let route = Route::new(vec![(0.0, 60.0), (75.0, 105.0), (105.0, 75.0), (60.0, 0.0)]).unwrap();
            let position = route.position_at(distance);
            prop_assert!((0.0..=60.0).contains(&position) || (75.0..=105.0).contains(&position));
        }
    }
}
