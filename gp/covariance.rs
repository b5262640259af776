//! # Covariance Functions with Second-Order Derivatives
//!
//! Exact GP inference at the Hessian level needs more from a covariance function than
//! its value and gradient: it needs the mixed second derivative `∂²K/∂θ_i∂θ_j` for every
//! pair of covariance hyperparameters. [`CovarianceFunction`] spells that contract out as
//! named operations, and [`ArdSquaredExponential`] implements it for the ARD
//! squared-exponential kernel
//!
//! `K_uv = σ_f² exp(−½ Σ_k (x_uk − z_vk)² / ℓ_k²)`,  `ℓ_k = exp(θ_k)`,  `σ_f² = exp(2θ_p)`.
//!
//! Every length-scale Hessian entry carries the zeroth-order kernel as a common factor,
//! so the kernel is computed once per sweep of Hessian requests and cached on the
//! instance. A sweep is opened explicitly with [`CovarianceFunction::begin_sweep`], and
//! a request for the pair `(0, 0)` always re-primes the cache.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovarianceError {
    #[error(
        "Covariance function expects {expected} hyperparameters for {input_dim} input dimensions, but {found} were given."
    )]
    HyperparameterCount {
        expected: usize,
        found: usize,
        input_dim: usize,
    },
    #[error("Hyperparameter index {index} is out of range for {count} covariance hyperparameters.")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("Cross inputs have {found} features but the training inputs have {expected}.")]
    FeatureMismatch { expected: usize, found: usize },
    #[error("The covariance Hessian is not defined for the diagonal-only input.")]
    DiagonalHessianUnsupported,
}

/// Second argument of a covariance evaluation.
#[derive(Debug, Clone, Copy)]
pub enum CrossInput<'a> {
    /// Evaluate at `z = x`.
    Training,
    /// Evaluate the cross-covariance against these rows.
    Points(ArrayView2<'a, f64>),
    /// Only the self-covariance of each row of `x`, returned as an `n × 1` column.
    Diagonal,
}

/// Covariance function contract consumed by the exact inference engine.
pub trait CovarianceFunction {
    /// Number of hyperparameters for inputs with `input_dim` features.
    fn num_hyperparameters(&self, input_dim: usize) -> usize;

    /// Kernel matrix `K(x, z)`.
    fn evaluate(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        z: CrossInput<'_>,
    ) -> Result<Array2<f64>, CovarianceError>;

    /// `∂K/∂θ_i`.
    fn gradient(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        z: CrossInput<'_>,
        i: usize,
    ) -> Result<Array2<f64>, CovarianceError>;

    /// Opens a sweep of Hessian requests for the given hyperparameters and data.
    fn begin_sweep(
        &mut self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        z: CrossInput<'_>,
    ) -> Result<(), CovarianceError>;

    /// `∂²K/∂θ_i∂θ_j`.
    fn hessian(
        &mut self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        z: CrossInput<'_>,
        i: usize,
        j: usize,
    ) -> Result<Array2<f64>, CovarianceError>;
}

/// Kernel of one sweep, keyed on everything it was built from.
#[derive(Debug, Clone)]
struct SweepCache {
    hyp: Array1<f64>,
    x: Array2<f64>,
    z: Array2<f64>,
    kernel: Array2<f64>,
}

impl SweepCache {
    fn matches(&self, hyp: ArrayView1<f64>, x: ArrayView2<f64>, z: ArrayView2<f64>) -> bool {
        self.hyp.view() == hyp && self.x.view() == x && self.z.view() == z
    }
}

/// ARD squared-exponential kernel with `p` length-scales and one output scale.
///
/// Hyperparameters are `[log ℓ_1, ..., log ℓ_p, log σ_f]`. Each instance owns its own
/// kernel cache, so concurrent evaluations need one instance per context.
#[derive(Debug, Clone, Default)]
pub struct ArdSquaredExponential {
    cache: Option<SweepCache>,
}

impl ArdSquaredExponential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel matrix cached by the current sweep, if one has been primed.
    pub fn cached_kernel(&self) -> Option<&Array2<f64>> {
        self.cache.as_ref().map(|c| &c.kernel)
    }

    fn check_hyperparameters(
        &self,
        hyp: ArrayView1<f64>,
        input_dim: usize,
    ) -> Result<(), CovarianceError> {
        let expected = self.num_hyperparameters(input_dim);
        if hyp.len() != expected {
            return Err(CovarianceError::HyperparameterCount {
                expected,
                found: hyp.len(),
                input_dim,
            });
        }
        Ok(())
    }

    fn check_index(index: usize, count: usize) -> Result<(), CovarianceError> {
        if index >= count {
            return Err(CovarianceError::IndexOutOfRange { index, count });
        }
        Ok(())
    }

    /// Resolves the cross input to a matrix view, `None` for the diagonal marker.
    fn resolve<'a, 'b, 'c>(
        x: ArrayView2<'a, f64>,
        z: CrossInput<'b>,
    ) -> Result<Option<ArrayView2<'c, f64>>, CovarianceError>
    where
        'a: 'c,
        'b: 'c,
    {
        match z {
            CrossInput::Training => Ok(Some(x.reborrow())),
            CrossInput::Points(points) => {
                if points.ncols() != x.ncols() {
                    return Err(CovarianceError::FeatureMismatch {
                        expected: x.ncols(),
                        found: points.ncols(),
                    });
                }
                Ok(Some(points.reborrow()))
            }
            CrossInput::Diagonal => Ok(None),
        }
    }

    /// Squared scaled difference along one input dimension, `(x_{:,k}/ℓ_k ⊟ z_{:,k}/ℓ_k)²`.
    fn scaled_sq_diff(
        x: ArrayView2<f64>,
        z: ArrayView2<f64>,
        k: usize,
        log_ell: f64,
    ) -> Array2<f64> {
        let inv_ell = (-log_ell).exp();
        Array2::from_shape_fn((x.nrows(), z.nrows()), |(u, v)| {
            let d = x[(u, k)] * inv_ell - z[(v, k)] * inv_ell;
            d * d
        })
    }

    fn kernel(hyp: ArrayView1<f64>, x: ArrayView2<f64>, z: ArrayView2<f64>) -> Array2<f64> {
        let p = x.ncols();
        let sf2 = (2.0 * hyp[p]).exp();
        let mut sq_dist = Array2::<f64>::zeros((x.nrows(), z.nrows()));
        for k in 0..p {
            sq_dist += &Self::scaled_sq_diff(x, z, k, hyp[k]);
        }
        sq_dist.mapv(|d| sf2 * (-0.5 * d).exp())
    }

    fn build_cache(hyp: ArrayView1<f64>, x: ArrayView2<f64>, z: ArrayView2<f64>) -> SweepCache {
        log::trace!(
            "Priming covariance sweep cache for a {}x{} kernel",
            x.nrows(),
            z.nrows()
        );
        SweepCache {
            hyp: hyp.to_owned(),
            x: x.to_owned(),
            z: z.to_owned(),
            kernel: Self::kernel(hyp, x, z),
        }
    }
}

impl CovarianceFunction for ArdSquaredExponential {
    fn num_hyperparameters(&self, input_dim: usize) -> usize {
        input_dim + 1
    }

    fn evaluate(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        z: CrossInput<'_>,
    ) -> Result<Array2<f64>, CovarianceError> {
        self.check_hyperparameters(hyp, x.ncols())?;
        match Self::resolve(x, z)? {
            Some(zv) => Ok(Self::kernel(hyp, x, zv)),
            None => {
                let sf2 = (2.0 * hyp[x.ncols()]).exp();
                Ok(Array2::from_elem((x.nrows(), 1), sf2))
            }
        }
    }

    fn gradient(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        z: CrossInput<'_>,
        i: usize,
    ) -> Result<Array2<f64>, CovarianceError> {
        let p = x.ncols();
        self.check_hyperparameters(hyp, p)?;
        Self::check_index(i, p + 1)?;
        match Self::resolve(x, z)? {
            Some(zv) => {
                let k = Self::kernel(hyp, x, zv);
                if i < p {
                    Ok(k * &Self::scaled_sq_diff(x, zv, i, hyp[i]))
                } else {
                    Ok(k * 2.0)
                }
            }
            None => {
                if i < p {
                    Ok(Array2::zeros((x.nrows(), 1)))
                } else {
                    let sf2 = (2.0 * hyp[p]).exp();
                    Ok(Array2::from_elem((x.nrows(), 1), 2.0 * sf2))
                }
            }
        }
    }

    fn begin_sweep(
        &mut self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        z: CrossInput<'_>,
    ) -> Result<(), CovarianceError> {
        self.check_hyperparameters(hyp, x.ncols())?;
        let zv = Self::resolve(x, z)?.ok_or(CovarianceError::DiagonalHessianUnsupported)?;
        self.cache = Some(Self::build_cache(hyp, x, zv));
        Ok(())
    }

    fn hessian(
        &mut self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        z: CrossInput<'_>,
        i: usize,
        j: usize,
    ) -> Result<Array2<f64>, CovarianceError> {
        if i > j {
            return self.hessian(hyp, x, z, j, i);
        }
        let p = x.ncols();
        self.check_hyperparameters(hyp, p)?;
        Self::check_index(j, p + 1)?;
        let zv = Self::resolve(x, z)?.ok_or(CovarianceError::DiagonalHessianUnsupported)?;

        // The output scale enters as a plain factor σ_f², so its mixed partials are
        // twice the first derivative in the other index.
        if j == p {
            return Ok(self.gradient(hyp, x, z, i)? * 2.0);
        }

        let cache = match self.cache.take() {
            Some(cache) if (i, j) != (0, 0) && cache.matches(hyp, x, zv) => cache,
            _ => Self::build_cache(hyp, x, zv),
        };

        let d_i = Self::scaled_sq_diff(x, zv, i, hyp[i]);
        let mut d_j = Self::scaled_sq_diff(x, zv, j, hyp[j]);
        if i == j {
            d_j -= 2.0;
        }
        let out = d_i * &d_j * &cache.kernel;
        self.cache = Some(cache);
        Ok(out)
    }
}
