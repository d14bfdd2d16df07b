//! Spatial Mixing Kernel
//!
//! Gaussian density (mean 0) of every track distance: how much a training
//! sample at one place contributes to each spatial bin, decaying with
//! path distance along the track.

use nalgebra::DMatrix;
use std::f64::consts::PI;

use crate::config::validate_variance;
use crate::error::Result;

/// Gaussian density of `distance` with mean 0 and the given variance.
#[inline]
pub fn gaussian_density(distance: f64, variance: f64) -> f64 {
    (-0.5 * distance * distance / variance).exp() / (2.0 * PI * variance).sqrt()
}

/// Elementwise Gaussian density of a distance matrix.
///
/// Fails with a configuration error for a non-positive or non-finite
/// variance. NaN distances stay NaN.
pub fn gaussian_track_distances(distances: &DMatrix<f64>, variance: f64) -> Result<DMatrix<f64>> {
    validate_variance(variance)?;
    Ok(distances.map(|d| gaussian_density(d, variance)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LikelihoodError;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_distance_is_peak_density() {
        let distances = DMatrix::from_row_slice(2, 2, &[0.0, 3.0, 0.0, 0.0]);
        let kernel = gaussian_track_distances(&distances, 8.0).unwrap();

        let peak = 1.0 / (2.0 * PI * 8.0).sqrt();
        assert_relative_eq!(kernel[(0, 0)], peak);
        assert_relative_eq!(kernel[(1, 0)], peak);
        assert_relative_eq!(kernel[(1, 1)], peak);
        assert!(kernel[(0, 1)] < peak);
    }

    #[test]
    fn test_matches_closed_form() {
        let distances = DMatrix::from_row_slice(1, 3, &[1.0, 2.0, 4.0]);
        let kernel = gaussian_track_distances(&distances, 4.0).unwrap();
        for (col, d) in [1.0f64, 2.0, 4.0].iter().enumerate() {
            let expected = (-d * d / 8.0).exp() / (8.0 * PI).sqrt();
            assert_relative_eq!(kernel[(0, col)], expected, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_shape_is_preserved() {
        let distances = DMatrix::from_element(4, 7, 1.5);
        let kernel = gaussian_track_distances(&distances, 2.0).unwrap();
        assert_eq!(kernel.shape(), (4, 7));
    }

    #[test]
    fn test_far_distances_underflow_to_zero() {
        let distances = DMatrix::from_element(1, 1, 1e4);
        let kernel = gaussian_track_distances(&distances, 1.0).unwrap();
        assert_eq!(kernel[(0, 0)], 0.0);
    }

    #[test]
    fn test_invalid_variance() {
        let distances = DMatrix::from_element(1, 1, 1.0);
        assert!(matches!(
            gaussian_track_distances(&distances, -1.0),
            Err(LikelihoodError::Configuration(_))
        ));
        assert!(gaussian_track_distances(&distances, 0.0).is_err());
        assert!(gaussian_track_distances(&distances, f64::NAN).is_err());
    }
}
