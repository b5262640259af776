//! Finite-difference checks of the analytic gradient and Hessian.
//!
//! The gradient is compared against central differences of `nlZ`, and every Hessian
//! column against central differences of the analytic gradient. Errors are mixed
//! relative errors, `|a − n| / max(1, |a|, |n|)`, so entries near zero are judged
//! absolutely and large entries relatively.

use crate::covariance::CovarianceFunction;
use crate::hyper::Hyperparameters;
use crate::inference::{InferenceError, InferenceLevel, Observations, infer_exact};
use crate::likelihood::Likelihood;
use crate::mean::MeanFunction;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("Finite-difference step must be positive and finite, got {0}.")]
    InvalidStep(f64),
    #[error("Inference failed while probing hyperparameter {index}: {source}")]
    Probe {
        index: usize,
        #[source]
        source: InferenceError,
    },
    #[error("Inference at the {0:?} level returned without the requested outputs.")]
    IncompleteOutput(InferenceLevel),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

#[derive(Debug, Clone)]
pub struct DerivativeReport {
    pub nlz: f64,
    pub analytic_gradient: Array1<f64>,
    pub numeric_gradient: Array1<f64>,
    pub analytic_hessian: Array2<f64>,
    pub numeric_hessian: Array2<f64>,
    pub max_gradient_error: f64,
    pub worst_gradient_index: usize,
    pub max_hessian_error: f64,
    pub worst_hessian_index: (usize, usize),
}

impl DerivativeReport {
    pub fn passes(&self, tolerance: f64) -> bool {
        self.max_gradient_error < tolerance && self.max_hessian_error < tolerance
    }
}

pub fn mixed_relative_error(analytic: f64, numeric: f64) -> f64 {
    (analytic - numeric).abs() / 1.0_f64.max(analytic.abs()).max(numeric.abs())
}

/// Evaluates the Hessian level at `hyp` and compares it against central differences
/// with step `step` in every flat hyperparameter coordinate.
pub fn check_derivatives<M, C>(
    hyp: &Hyperparameters,
    mean: &M,
    cov: &mut C,
    likelihood: &Likelihood,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    step: f64,
) -> Result<DerivativeReport, DiagnosticsError>
where
    M: MeanFunction + ?Sized,
    C: CovarianceFunction + ?Sized,
{
    if !(step.is_finite() && step > 0.0) {
        return Err(DiagnosticsError::InvalidStep(step));
    }

    let full = infer_exact(
        hyp,
        mean,
        cov,
        likelihood,
        x,
        Observations::Targets(y),
        InferenceLevel::Hessian,
    )?;
    let (Some(nlz), Some(grad), Some(hess)) = (full.nlz, full.dnlz, full.hessian) else {
        return Err(DiagnosticsError::IncompleteOutput(InferenceLevel::Hessian));
    };
    let analytic_gradient = grad.to_flat();
    let analytic_hessian = hess.matrix;

    let d = hyp.dimension();
    let mut numeric_gradient = Array1::zeros(d);
    let mut numeric_hessian = Array2::zeros((d, d));
    for k in 0..d {
        let mut probe = |delta: f64| -> Result<(f64, Array1<f64>), DiagnosticsError> {
            let shifted = hyp.perturbed(k, delta);
            let out = infer_exact(
                &shifted,
                mean,
                cov,
                likelihood,
                x,
                Observations::Targets(y),
                InferenceLevel::Gradient,
            )
            .map_err(|source| DiagnosticsError::Probe { index: k, source })?;
            match (out.nlz, out.dnlz) {
                (Some(nlz), Some(grad)) => Ok((nlz, grad.to_flat())),
                _ => Err(DiagnosticsError::IncompleteOutput(InferenceLevel::Gradient)),
            }
        };
        let (nlz_plus, grad_plus) = probe(step)?;
        let (nlz_minus, grad_minus) = probe(-step)?;
        numeric_gradient[k] = (nlz_plus - nlz_minus) / (2.0 * step);
        let column = (&grad_plus - &grad_minus) / (2.0 * step);
        numeric_hessian.column_mut(k).assign(&column);
    }

    let (worst_gradient_index, max_gradient_error) = analytic_gradient
        .iter()
        .zip(numeric_gradient.iter())
        .map(|(&a, &n)| mixed_relative_error(a, n))
        .enumerate()
        .fold((0, 0.0), |best, (i, e)| if e > best.1 { (i, e) } else { best });

    let (worst_hessian_index, max_hessian_error) = analytic_hessian
        .indexed_iter()
        .map(|(ij, &a)| (ij, mixed_relative_error(a, numeric_hessian[ij])))
        .fold(((0, 0), 0.0), |best, (ij, e)| if e > best.1 { (ij, e) } else { best });

    log::debug!(
        "Derivative check: gradient error {max_gradient_error:.3e} at {worst_gradient_index}, \
         Hessian error {max_hessian_error:.3e} at {worst_hessian_index:?}"
    );

    Ok(DerivativeReport {
        nlz,
        analytic_gradient,
        numeric_gradient,
        analytic_hessian,
        numeric_hessian,
        max_gradient_error,
        worst_gradient_index,
        max_hessian_error,
        worst_hessian_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::ArdSquaredExponential;
    use crate::mean::{ConstMean, ZeroMean};
    use ndarray::array;

    #[test]
    fn analytic_derivatives_pass_on_a_small_problem() {
        let x = array![[-1.0, 0.5], [0.0, -0.3], [0.7, 1.2], [1.9, 0.1]];
        let y = array![0.4, -0.1, 0.9, 0.2];
        let hyp = Hyperparameters::new(array![0.2, -0.1, 0.3], -1.2, array![0.25]);
        let report = check_derivatives(
            &hyp,
            &ConstMean,
            &mut ArdSquaredExponential::new(),
            &Likelihood::Gaussian,
            x.view(),
            y.view(),
            1e-5,
        )
        .unwrap();
        assert!(report.passes(1e-4), "{report:?}");
        assert_eq!(report.analytic_hessian.dim(), (5, 5));
    }

    #[test]
    fn rejects_non_positive_step() {
        let x = array![[0.0]];
        let y = array![1.0];
        let hyp = Hyperparameters::new(array![0.0, 0.0], 0.0, array![]);
        let result = check_derivatives(
            &hyp,
            &ZeroMean,
            &mut ArdSquaredExponential::new(),
            &Likelihood::Gaussian,
            x.view(),
            y.view(),
            0.0,
        );
        assert!(matches!(result, Err(DiagnosticsError::InvalidStep(_))));
    }

    #[test]
    fn mixed_error_is_absolute_near_zero() {
        assert!((mixed_relative_error(1e-9, 2e-9) - 1e-9).abs() < 1e-18);
        assert!((mixed_relative_error(200.0, 202.0) - 2.0 / 202.0).abs() < 1e-15);
    }
}
