//! Marked-point-process likelihood of multiunit spiking over place bins.
//!
//! Fitting (non-replay times only):
//! - place occupancy: mean Gaussian track kernel over all kept positions
//! - per electrode: training spikes (marks + their spatial kernel rows),
//!   mean firing rate in spikes per second (training steps last
//!   `config.time_bin_size` seconds) and ground process intensity
//!   `mean_rate · place_field / occupancy`
//!
//! Evaluation, per electrode and time step of length Δt:
//!
//! ```text
//! log L = log(joint_mark_intensity · Δt) - ground_process_intensity · Δt
//! joint_mark_intensity = mean_rate · (kde / n_train_spikes) / occupancy
//! ```
//!
//! with the first term dropped at times without a spike, then summed
//! over electrodes. A spike is a row whose features are all non-NaN.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info};

use crate::config::LikelihoodConfig;
use crate::error::{LikelihoodError, Result};
use crate::likelihood::{combine_log_likelihoods, scale_log_likelihood};
use crate::multiunit_kde::evaluate_kde;
use crate::spatial_kernel::gaussian_track_distances;
use crate::track_distance::{solve_distances, DistanceSolver};

/// Fitted state of one electrode (tetrode / multiunit channel group)
#[derive(Debug, Clone)]
pub struct ElectrodeModel {
    /// Feature vectors of the training spikes (`n_spikes × n_features`)
    pub train_marks: DMatrix<f64>,

    /// Spatial mixing kernel of the training spikes (`n_spikes × n_interior`)
    pub spatial_kernel: DMatrix<f64>,

    /// Spikes per second over the kept training steps
    pub mean_rate: f64,

    /// Spike rate (per second) in each bin, regardless of marks (all bins)
    pub ground_process_intensity: DVector<f64>,
}

impl ElectrodeModel {
    pub fn num_spikes(&self) -> usize {
        self.train_marks.nrows()
    }
}

/// Multiunit likelihood model on a track graph.
#[derive(Debug, Clone)]
pub struct MultiunitLikelihood {
    config: LikelihoodConfig,
    solver: DistanceSolver,
    is_interior: Vec<bool>,
    interior_bins: Vec<usize>,
    occupancy: DVector<f64>,
    electrodes: Vec<ElectrodeModel>,
}

/// Returns true when every feature of the row is present.
fn is_spike(marks: &DMatrix<f64>, row: usize) -> bool {
    marks.row(row).iter().all(|v| !v.is_nan())
}

fn select_rows(matrix: &DMatrix<f64>, rows: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), matrix.ncols(), |i, j| matrix[(rows[i], j)])
}

impl MultiunitLikelihood {
    /// Fits the model from a training session.
    ///
    /// # Arguments
    /// * `positions` - linear position per time step (NaN = untracked)
    /// * `marks` - one `n_time × n_features` matrix per electrode, NaN rows = no spike
    /// * `is_replay` - replay flag per time step; replay times are excluded
    /// * `solver` - track graph + node index table
    /// * `is_interior` - mask over all place bins
    /// * `config` - variance, bandwidths, batch size, training step length
    pub fn fit(
        positions: &[f64],
        marks: &[DMatrix<f64>],
        is_replay: &[bool],
        solver: &DistanceSolver,
        is_interior: Vec<bool>,
        config: LikelihoodConfig,
    ) -> Result<Self> {
        config.validate()?;

        let n_time = positions.len();
        if is_replay.len() != n_time {
            return Err(LikelihoodError::dimensions(format!(
                "{} positions but {} replay flags",
                n_time,
                is_replay.len()
            )));
        }
        for (electrode, electrode_marks) in marks.iter().enumerate() {
            if electrode_marks.nrows() != n_time || electrode_marks.ncols() != config.bandwidths.len() {
                return Err(LikelihoodError::dimensions(format!(
                    "electrode {} marks are {}x{}, expected {}x{}",
                    electrode,
                    electrode_marks.nrows(),
                    electrode_marks.ncols(),
                    n_time,
                    config.bandwidths.len()
                )));
            }
        }

        let interior_bins: Vec<usize> = is_interior
            .iter()
            .enumerate()
            .filter_map(|(bin, &inside)| inside.then_some(bin))
            .collect();
        if interior_bins.len() != solver.num_bin_centers() {
            return Err(LikelihoodError::dimensions(format!(
                "interior mask marks {} bins but the track has {} bin centers",
                interior_bins.len(),
                solver.num_bin_centers()
            )));
        }

        let kept: Vec<usize> = (0..n_time)
            .filter(|&t| !is_replay[t] && !positions[t].is_nan())
            .collect();
        if kept.is_empty() {
            return Err(LikelihoodError::config(
                "no non-replay time steps with a tracked position",
            ));
        }
        let kept_positions: Vec<f64> = kept.iter().map(|&t| positions[t]).collect();

        let distances = solve_distances(
            &kept_positions,
            solver.graph(),
            solver.table(),
            config.batch_size,
        )?;
        let kernel = gaussian_track_distances(&distances, config.variance)?;

        let n_bins = is_interior.len();
        let occupancy_interior = kernel.row_mean().transpose();
        let mut occupancy = DVector::zeros(n_bins);
        for (col, &bin) in interior_bins.iter().enumerate() {
            occupancy[bin] = occupancy_interior[col];
        }

        let electrodes = marks
            .iter()
            .enumerate()
            .map(|(electrode, electrode_marks)| {
                let spike_rows: Vec<usize> = (0..kept.len())
                    .filter(|&i| is_spike(electrode_marks, kept[i]))
                    .collect();
                let spike_times: Vec<usize> = spike_rows.iter().map(|&i| kept[i]).collect();

                let train_marks = select_rows(electrode_marks, &spike_times);
                let spatial_kernel = select_rows(&kernel, &spike_rows);
                let mean_rate =
                    spike_rows.len() as f64 / (kept.len() as f64 * config.time_bin_size);

                let mut ground_process_intensity = DVector::zeros(n_bins);
                if !spike_rows.is_empty() {
                    let place_field = spatial_kernel.row_mean();
                    for (col, &bin) in interior_bins.iter().enumerate() {
                        if occupancy[bin] > 0.0 {
                            ground_process_intensity[bin] =
                                mean_rate * place_field[col] / occupancy[bin];
                        }
                    }
                }

                debug!(electrode, spikes = spike_rows.len(), mean_rate, "fitted electrode");
                ElectrodeModel {
                    train_marks,
                    spatial_kernel,
                    mean_rate,
                    ground_process_intensity,
                }
            })
            .collect::<Vec<_>>();

        info!(
            time_steps = n_time,
            kept = kept.len(),
            electrodes = electrodes.len(),
            bins = n_bins,
            "fitted multiunit likelihood"
        );

        Ok(Self {
            config,
            solver: solver.clone(),
            is_interior,
            interior_bins,
            occupancy,
            electrodes,
        })
    }

    pub fn config(&self) -> &LikelihoodConfig {
        &self.config
    }

    pub fn electrodes(&self) -> &[ElectrodeModel] {
        &self.electrodes
    }

    pub fn is_interior(&self) -> &[bool] {
        &self.is_interior
    }

    /// Place occupancy density per bin (zero on exterior bins).
    pub fn occupancy(&self) -> &DVector<f64> {
        &self.occupancy
    }

    pub fn num_bins(&self) -> usize {
        self.is_interior.len()
    }

    fn check_marks(&self, marks: &[DMatrix<f64>]) -> Result<usize> {
        if marks.len() != self.electrodes.len() {
            return Err(LikelihoodError::dimensions(format!(
                "model has {} electrodes but marks for {} were given",
                self.electrodes.len(),
                marks.len()
            )));
        }
        let n_time = marks.first().map(|m| m.nrows()).unwrap_or(0);
        for (electrode, electrode_marks) in marks.iter().enumerate() {
            if electrode_marks.nrows() != n_time
                || electrode_marks.ncols() != self.config.bandwidths.len()
            {
                return Err(LikelihoodError::dimensions(format!(
                    "electrode {} marks are {}x{}, expected {}x{}",
                    electrode,
                    electrode_marks.nrows(),
                    electrode_marks.ncols(),
                    n_time,
                    self.config.bandwidths.len()
                )));
            }
        }
        Ok(n_time)
    }

    /// Poisson-mark log-likelihood of one electrode (`n_time × n_bins`).
    fn electrode_log_likelihood(
        &self,
        electrode: &ElectrodeModel,
        marks: &DMatrix<f64>,
        time_bin_size: f64,
    ) -> Result<DMatrix<f64>> {
        let n_time = marks.nrows();
        let spike_times: Vec<usize> = (0..n_time).filter(|&t| is_spike(marks, t)).collect();

        let kde = evaluate_kde(
            &select_rows(marks, &spike_times),
            &electrode.train_marks,
            &self.config.bandwidths,
            &electrode.spatial_kernel,
            &self.is_interior,
        )?;
        let n_train = electrode.num_spikes().max(1) as f64;

        let mut log_likelihood = DMatrix::from_element(n_time, self.num_bins(), f64::NEG_INFINITY);
        for t in 0..n_time {
            for &bin in &self.interior_bins {
                log_likelihood[(t, bin)] =
                    -electrode.ground_process_intensity[bin] * time_bin_size;
            }
        }
        for (row, &t) in spike_times.iter().enumerate() {
            for &bin in &self.interior_bins {
                let occupancy = self.occupancy[bin];
                let intensity = if occupancy > 0.0 {
                    electrode.mean_rate * (kde[(row, bin)] / n_train) / occupancy * time_bin_size
                } else {
                    0.0
                };
                log_likelihood[(t, bin)] += intensity.ln();
            }
        }

        Ok(log_likelihood)
    }

    /// Joint log-likelihood over electrodes (`n_time × n_bins`) for test
    /// steps lasting `time_bin_size` seconds.
    ///
    /// Exterior bins hold `-inf`.
    pub fn log_likelihood(&self, marks: &[DMatrix<f64>], time_bin_size: f64) -> Result<DMatrix<f64>> {
        let n_time = self.check_marks(marks)?;
        if self.electrodes.is_empty() {
            let mut empty = DMatrix::from_element(n_time, self.num_bins(), f64::NEG_INFINITY);
            for &bin in &self.interior_bins {
                empty.column_mut(bin).fill(0.0);
            }
            return Ok(empty);
        }

        let per_electrode = self
            .electrodes
            .iter()
            .zip(marks)
            .map(|(electrode, electrode_marks)| {
                self.electrode_log_likelihood(electrode, electrode_marks, time_bin_size)
            })
            .collect::<Result<Vec<_>>>()?;

        combine_log_likelihoods(&per_electrode)
    }

    /// Likelihood scaled so its maximum is 1.0.
    pub fn likelihood(&self, marks: &[DMatrix<f64>], time_bin_size: f64) -> Result<DMatrix<f64>> {
        Ok(scale_log_likelihood(&self.log_likelihood(marks, time_bin_size)?))
    }

    /// Replay vs. no-replay likelihood ratio per time step and bin.
    ///
    /// The no-replay state assumes the animal is where it was tracked: its
    /// log-likelihood is read at the interior bin closest along the track
    /// to the recorded position. Rows for untracked (NaN) positions are NaN.
    pub fn likelihood_ratio(
        &self,
        marks: &[DMatrix<f64>],
        positions: &[f64],
        time_bin_size: f64,
    ) -> Result<DMatrix<f64>> {
        let replay = self.log_likelihood(marks, time_bin_size)?;
        if positions.len() != replay.nrows() {
            return Err(LikelihoodError::dimensions(format!(
                "{} positions for {} time steps",
                positions.len(),
                replay.nrows()
            )));
        }

        let distances = self.solver.solve(positions)?;
        let mut ratio = DMatrix::from_element(replay.nrows(), replay.ncols(), f64::NAN);
        for t in 0..replay.nrows() {
            let Some(nearest) = nearest_bin(distances.row(t).iter().copied()) else {
                continue;
            };
            let no_replay = replay[(t, self.interior_bins[nearest])];
            for bin in 0..replay.ncols() {
                let log_ratio = replay[(t, bin)] - no_replay;
                ratio[(t, bin)] = if log_ratio.is_nan() {
                    0.0
                } else {
                    let value = log_ratio.exp();
                    if value == f64::INFINITY {
                        1.0
                    } else {
                        value
                    }
                };
            }
        }
        Ok(ratio)
    }
}

/// Column of the smallest finite distance, first one on ties.
fn nearest_bin(distances: impl Iterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (col, distance) in distances.enumerate() {
        if distance.is_nan() {
            return None;
        }
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((col, distance));
        }
    }
    best.map(|(col, _)| col)
}
