//! Numerical stabilizers for log-likelihood surfaces.
//!
//! - [`scale_log_likelihood`]: `exp(ll - max(ll))`, so the largest value is 1.0
//! - [`combine_log_likelihoods`]: sums per-source log-likelihoods
//!
//! Both also come as decorators ([`scaled_likelihood`],
//! [`combined_likelihood`]) wrapping a log-likelihood-producing closure.

use nalgebra::DMatrix;

use crate::error::{LikelihoodError, Result};

/// Rescales a log-likelihood by its global maximum and exponentiates.
///
/// The maximum is taken over the whole matrix, not per row, so only the
/// multiplicative scale changes. An empty matrix is returned as is; if
/// every entry is `-inf` the result is all zeros.
pub fn scale_log_likelihood(log_likelihood: &DMatrix<f64>) -> DMatrix<f64> {
    if log_likelihood.is_empty() {
        return log_likelihood.clone();
    }
    let max = log_likelihood
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return DMatrix::zeros(log_likelihood.nrows(), log_likelihood.ncols());
    }
    log_likelihood.map(|v| (v - max).exp())
}

/// Wraps a log-likelihood function so it returns a scaled likelihood.
pub fn scaled_likelihood<A, F>(log_likelihood: F) -> impl Fn(A) -> Result<DMatrix<f64>>
where
    F: Fn(A) -> Result<DMatrix<f64>>,
{
    move |args| log_likelihood(args).map(|ll| scale_log_likelihood(&ll))
}

/// How a stack of per-source log-likelihoods is reduced.
#[derive(Debug, Clone, Copy)]
pub enum SourceStack<'a> {
    /// Exactly one source: the result is that source, squeezed.
    Single(&'a DMatrix<f64>),

    /// Several same-shaped sources: the result is their elementwise sum.
    Many(&'a [DMatrix<f64>]),
}

impl<'a> SourceStack<'a> {
    /// Classifies a stack, checking that every source has the same shape.
    pub fn classify(sources: &'a [DMatrix<f64>]) -> Result<Self> {
        match sources {
            [] => Err(LikelihoodError::dimensions(
                "cannot combine an empty stack of log-likelihoods",
            )),
            [single] => Ok(SourceStack::Single(single)),
            [first, rest @ ..] => {
                if let Some(bad) = rest.iter().find(|s| s.shape() != first.shape()) {
                    return Err(LikelihoodError::dimensions(format!(
                        "per-source log-likelihoods disagree in shape: {:?} vs {:?}",
                        first.shape(),
                        bad.shape()
                    )));
                }
                Ok(SourceStack::Many(sources))
            }
        }
    }

    pub fn num_sources(&self) -> usize {
        match self {
            SourceStack::Single(_) => 1,
            SourceStack::Many(sources) => sources.len(),
        }
    }

    /// Reduces the stack to one joint log-likelihood.
    pub fn reduce(&self) -> DMatrix<f64> {
        match self {
            SourceStack::Single(source) => (*source).clone(),
            SourceStack::Many(sources) => {
                let mut total = sources[0].clone();
                for source in &sources[1..] {
                    total += source;
                }
                total
            }
        }
    }
}

/// Sums per-source log-likelihoods into one joint log-likelihood.
pub fn combine_log_likelihoods(sources: &[DMatrix<f64>]) -> Result<DMatrix<f64>> {
    Ok(SourceStack::classify(sources)?.reduce())
}

/// Wraps a per-source log-likelihood function so it returns the joint sum.
pub fn combined_likelihood<A, F>(log_likelihoods: F) -> impl Fn(A) -> Result<DMatrix<f64>>
where
    F: Fn(A) -> Result<Vec<DMatrix<f64>>>,
{
    move |args| combine_log_likelihoods(&log_likelihoods(args)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_scaled_max_is_one() {
        let ll = DMatrix::from_row_slice(2, 3, &[-1000.0, -1001.0, -1002.0, -999.5, -1500.0, -2000.0]);
        let scaled = scale_log_likelihood(&ll);
        assert_eq!(scaled.max(), 1.0);
        assert_eq!(scaled[(1, 0)], 1.0);
        assert_relative_eq!(scaled[(0, 0)], (-0.5f64).exp());
    }

    #[test]
    fn test_scaling_preserves_order() {
        let ll = DMatrix::from_row_slice(1, 4, &[-3.0, 0.5, -1.0, 2.0]);
        let scaled = scale_log_likelihood(&ll);
        assert!(scaled[(0, 0)] < scaled[(0, 2)]);
        assert!(scaled[(0, 2)] < scaled[(0, 1)]);
        assert!(scaled[(0, 1)] < scaled[(0, 3)]);
    }

    #[test]
    fn test_scaling_edge_cases() {
        let empty = DMatrix::<f64>::zeros(0, 3);
        assert_eq!(scale_log_likelihood(&empty).shape(), (0, 3));

        let impossible = DMatrix::from_element(2, 2, f64::NEG_INFINITY);
        assert!(scale_log_likelihood(&impossible).iter().all(|&v| v == 0.0));

        let partial = DMatrix::from_row_slice(1, 2, &[f64::NEG_INFINITY, -4.0]);
        let scaled = scale_log_likelihood(&partial);
        assert_eq!(scaled[(0, 0)], 0.0);
        assert_eq!(scaled[(0, 1)], 1.0);
    }

    #[test]
    fn test_scaled_decorator() {
        let f = scaled_likelihood(|offset: f64| Ok(DMatrix::from_row_slice(1, 2, &[offset, offset - 1.0])));
        let out = f(-800.0).unwrap();
        assert_eq!(out[(0, 0)], 1.0);
        assert_relative_eq!(out[(0, 1)], (-1.0f64).exp());
    }

    #[test]
    fn test_single_source_is_squeezed_input() {
        let raw = DMatrix::from_row_slice(1, 4, &[-1.0, -2.0, -3.0, -4.0]);
        let combined = combine_log_likelihoods(std::slice::from_ref(&raw)).unwrap();
        assert_eq!(combined, raw);
    }

    #[test]
    fn test_many_sources_sum() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = DMatrix::from_row_slice(2, 2, &[0.5, 0.5, -1.0, -1.0]);
        let c = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 1.0]);
        let stack = [a, b, c];

        assert_eq!(SourceStack::classify(&stack).unwrap().num_sources(), 3);
        let combined = combine_log_likelihoods(&stack).unwrap();
        assert_eq!(combined, DMatrix::from_row_slice(2, 2, &[1.5, 3.5, 2.0, 4.0]));
    }

    #[test]
    fn test_single_source_equals_sum_over_one() {
        let raw = DMatrix::from_row_slice(1, 3, &[0.25, -7.0, 3.0]);
        let zero = DMatrix::zeros(1, 3);
        let single = combine_log_likelihoods(std::slice::from_ref(&raw)).unwrap();
        let summed = combine_log_likelihoods(&[raw.clone(), zero]).unwrap();
        assert_eq!(single, summed);
    }

    #[test]
    fn test_inconsistent_shapes() {
        let stack = [DMatrix::zeros(2, 2), DMatrix::zeros(2, 3)];
        assert!(matches!(
            combine_log_likelihoods(&stack),
            Err(LikelihoodError::DimensionMismatch(_))
        ));
        assert!(combine_log_likelihoods(&[]).is_err());
    }

    #[test]
    fn test_combined_decorator() {
        let f = combined_likelihood(|n: usize| {
            Ok((0..n).map(|i| DMatrix::from_element(1, 2, i as f64)).collect())
        });
        assert_eq!(f(4).unwrap(), DMatrix::from_element(1, 2, 6.0));
    }

    proptest! {
        #[test]
        fn prop_scaled_max_is_exactly_one(values in proptest::collection::vec(-1e6f64..1e6, 1..64)) {
            let ll = DMatrix::from_row_slice(1, values.len(), &values);
            let scaled = scale_log_likelihood(&ll);
            prop_assert_eq!(scaled.max(), 1.0);
            prop_assert!(scaled.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }
}
