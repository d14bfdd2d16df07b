//! Multiunit KDE Likelihood
//!
//! Product-kernel density of multiunit feature vectors against a training
//! sample, projected onto spatial bins through the spatial mixing kernel.
//!
//! For test observation `i` and training spike `j`:
//!
//! ```text
//! K[i, j]   = Π_c  exp(-½ ((x[i,c] - y[j,c]) / b[c])²) / (b[c] √(2π))
//! kde[i, :] = K[i, :] · S          (S = spatial kernel, n_train × n_interior)
//! ```
//!
//! No `1 / n_train` averaging is applied here; callers normalise.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use crate::config::validate_bandwidths;
use crate::error::{LikelihoodError, Result};

/// √(2π)
pub const SQRT_2PI: f64 = 2.506_628_274_631_000_2;

/// Product kernel between one evaluation point and every training row.
///
/// Returns a vector of length `samples.nrows()`.
pub fn product_kernel(eval_point: &[f64], samples: &DMatrix<f64>, bandwidths: &[f64]) -> DVector<f64> {
    let n_samples = samples.nrows();
    let mut kernel = DVector::from_element(n_samples, 1.0);

    for (channel, (&bandwidth, &x)) in bandwidths
        .iter()
        .zip(eval_point)
        .enumerate()
        .take(samples.ncols())
    {
        let norm = bandwidth * SQRT_2PI;
        let column = samples.column(channel);
        for (value, &sample) in kernel.iter_mut().zip(column.iter()) {
            let z = (x - sample) / bandwidth;
            *value *= (-0.5 * z * z).exp() / norm;
        }
    }

    kernel
}

/// Evaluates the multiunit likelihood surface.
///
/// # Arguments
/// * `test_features` - `m × d` feature vectors to evaluate
/// * `train_features` - `k × d` training spikes
/// * `bandwidths` - one positive bandwidth per feature channel (length `d`)
/// * `spatial_kernel` - `k × b` mixing weights from training spikes to interior bins
/// * `is_interior` - mask over all bins with exactly `b` true entries
///
/// # Returns
/// An `m × is_interior.len()` matrix, zero on exterior bins.
pub fn evaluate_kde(
    test_features: &DMatrix<f64>,
    train_features: &DMatrix<f64>,
    bandwidths: &[f64],
    spatial_kernel: &DMatrix<f64>,
    is_interior: &[bool],
) -> Result<DMatrix<f64>> {
    validate_bandwidths(bandwidths)?;

    let n_test = test_features.nrows();
    let n_train = train_features.nrows();
    let n_bins = is_interior.len();
    let interior: Vec<usize> = is_interior
        .iter()
        .enumerate()
        .filter_map(|(bin, &inside)| inside.then_some(bin))
        .collect();

    if test_features.ncols() != bandwidths.len() {
        return Err(LikelihoodError::dimensions(format!(
            "test features have {} channels but {} bandwidths were given",
            test_features.ncols(),
            bandwidths.len()
        )));
    }
    if n_train > 0 && train_features.ncols() != bandwidths.len() {
        return Err(LikelihoodError::dimensions(format!(
            "training features have {} channels but {} bandwidths were given",
            train_features.ncols(),
            bandwidths.len()
        )));
    }
    if spatial_kernel.nrows() != n_train || spatial_kernel.ncols() != interior.len() {
        return Err(LikelihoodError::dimensions(format!(
            "spatial kernel is {}x{}, expected {}x{} (training spikes x interior bins)",
            spatial_kernel.nrows(),
            spatial_kernel.ncols(),
            n_train,
            interior.len()
        )));
    }

    if n_train == 0 {
        debug!(n_test, n_bins, "empty training sample, returning zero surface");
        return Ok(DMatrix::zeros(n_test, n_bins));
    }

    debug!(n_test, n_train, n_channels = bandwidths.len(), "evaluating multiunit KDE");

    let rows: Vec<Vec<f64>> = (0..n_test)
        .into_par_iter()
        .map(|i| {
            let eval_point: Vec<f64> = test_features.row(i).iter().copied().collect();
            let kernel = product_kernel(&eval_point, train_features, bandwidths);
            let projected = spatial_kernel.tr_mul(&kernel);

            let mut row = vec![0.0; n_bins];
            for (&bin, &value) in interior.iter().zip(projected.iter()) {
                row[bin] = value;
            }
            row
        })
        .collect();

    let data: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(DMatrix::from_row_slice(n_test, n_bins, &data))
}
