//! # Posterior Sufficient Statistics
//!
//! After conditioning on the training data a GP regression posterior is summarised by
//! the weight vector `alpha = (K + σ²I)^{-1}(y − μ(x))`, the per-row square-root noise
//! precision `sw`, and a representation of `(K + σ²I)^{-1}`. Two representations exist:
//!
//! - **High noise** (`σ² ≥ 1e-6`): the lower Cholesky factor of `K/σ² + I`. Scaling by
//!   `1/σ²` keeps the factor well conditioned.
//! - **Low noise** (`σ² < 1e-6`): the factor form loses accuracy, so `−(K + σ²I)^{-1}`
//!   is stored directly.
//!
//! The representation is an explicit enum tag on the record, so a posterior supplied
//! back to the inference engine never has to be classified by inspecting its values.

use crate::faer_ndarray::{FaerCholesky, FaerCholeskyFactor, FaerLinalgError};
use crate::likelihood::NoiseRegime;
use faer::Side;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PosteriorFactor {
    /// Lower Cholesky factor of `K/σ² + I`.
    HighNoise { chol: Array2<f64> },
    /// `−(K + σ²I)^{-1}`.
    LowNoise { neg_inverse: Array2<f64> },
}

impl PosteriorFactor {
    pub fn regime(&self) -> NoiseRegime {
        match self {
            PosteriorFactor::HighNoise { .. } => NoiseRegime::HighNoise,
            PosteriorFactor::LowNoise { .. } => NoiseRegime::LowNoise,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        match self {
            PosteriorFactor::HighNoise { chol } => chol.dim(),
            PosteriorFactor::LowNoise { neg_inverse } => neg_inverse.dim(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    pub alpha: Array1<f64>,
    /// `1/σ` for every training row.
    pub sw: Array1<f64>,
    pub factor: PosteriorFactor,
}

impl Posterior {
    pub fn regime(&self) -> NoiseRegime {
        self.factor.regime()
    }
}

/// `K + σ²I`.
fn shifted_kernel(kernel: &Array2<f64>, sn2: f64) -> Array2<f64> {
    let mut v = kernel.clone();
    v.diag_mut().mapv_inplace(|d| d + sn2);
    v
}

enum SystemSolver {
    /// Factor of `K/σ² + I`.
    Scaled(FaerCholeskyFactor),
    /// `(K + σ²I)^{-1}` and, when available, the factor of `K + σ²I`.
    Direct {
        chol: Option<FaerCholeskyFactor>,
        v_inv: Array2<f64>,
    },
}

/// A factorized training system `V = K + σ²I` together with its posterior.
pub(crate) struct FittedSystem {
    pub posterior: Posterior,
    /// `y − μ(x)`.
    pub residual: Array1<f64>,
    sn2: f64,
    solver: SystemSolver,
}

impl FittedSystem {
    /// Factorizes `K + σ²I` in the representation selected by `σ²` and solves for `alpha`.
    pub fn fit(
        kernel: &Array2<f64>,
        residual: Array1<f64>,
        sn2: f64,
    ) -> Result<Self, FaerLinalgError> {
        let n = residual.len();
        let sw = Array1::from_elem(n, 1.0 / sn2.sqrt());
        let regime = NoiseRegime::select(sn2);
        log::debug!("Factorizing {n}x{n} training system, σ² = {sn2:.3e}, {regime:?}");

        let (alpha, factor, solver) = match regime {
            NoiseRegime::HighNoise => {
                let mut scaled = kernel / sn2;
                scaled.diag_mut().mapv_inplace(|d| d + 1.0);
                let chol = scaled.cholesky(Side::Lower)?;
                let alpha = chol.solve_vec(&residual) / sn2;
                let factor = PosteriorFactor::HighNoise {
                    chol: chol.lower().clone(),
                };
                (alpha, factor, SystemSolver::Scaled(chol))
            }
            NoiseRegime::LowNoise => {
                let chol = shifted_kernel(kernel, sn2).cholesky(Side::Lower)?;
                let alpha = chol.solve_vec(&residual);
                let v_inv = chol.inverse();
                let factor = PosteriorFactor::LowNoise {
                    neg_inverse: -&v_inv,
                };
                let solver = SystemSolver::Direct {
                    chol: Some(chol),
                    v_inv,
                };
                (alpha, factor, solver)
            }
        };

        Ok(Self {
            posterior: Posterior { alpha, sw, factor },
            residual,
            sn2,
            solver,
        })
    }

    /// Rebuilds the system from a previously computed posterior. The residual is
    /// recovered as `(K + σ²I)·alpha`; the stored factor is reused as tagged.
    pub fn from_posterior(
        kernel: &Array2<f64>,
        posterior: Posterior,
        sn2: f64,
    ) -> Result<Self, FaerLinalgError> {
        let residual = kernel.dot(&posterior.alpha) + &(&posterior.alpha * sn2);
        if posterior.regime() != NoiseRegime::select(sn2) {
            log::debug!(
                "Supplied posterior uses the {:?} representation while σ² = {sn2:.3e} would select {:?}",
                posterior.regime(),
                NoiseRegime::select(sn2)
            );
        }
        let solver = match &posterior.factor {
            PosteriorFactor::HighNoise { chol } => {
                SystemSolver::Scaled(FaerCholeskyFactor::from_lower(chol.clone())?)
            }
            PosteriorFactor::LowNoise { neg_inverse } => SystemSolver::Direct {
                chol: None,
                v_inv: -neg_inverse,
            },
        };
        Ok(Self {
            posterior,
            residual,
            sn2,
            solver,
        })
    }

    pub fn noise_variance(&self) -> f64 {
        self.sn2
    }

    /// `nlZ = Σ log L_ii + ½(rᵀα + n·log(2π/factor))`, where `factor` is `1/σ²` for the
    /// scaled factor and `1` for the direct one.
    pub fn negative_log_marginal(
        &mut self,
        kernel: &Array2<f64>,
    ) -> Result<f64, FaerLinalgError> {
        let n = self.residual.len() as f64;
        let fit = self.residual.dot(&self.posterior.alpha);
        let (half_log_det, factor) = match &mut self.solver {
            SystemSolver::Scaled(chol) => (chol.half_log_det(), 1.0 / self.sn2),
            SystemSolver::Direct { chol, .. } => match chol {
                Some(existing) => (existing.half_log_det(), 1.0),
                None => {
                    // Only the inverse was supplied; the log-determinant needs a factor.
                    let fresh = shifted_kernel(kernel, self.sn2).cholesky(Side::Lower)?;
                    let half_log_det = fresh.half_log_det();
                    *chol = Some(fresh);
                    (half_log_det, 1.0)
                }
            },
        };
        Ok(half_log_det + 0.5 * (fit + n * (2.0 * PI / factor).ln()))
    }

    /// Dense `(K + σ²I)^{-1}`.
    pub fn inverse(&self) -> Array2<f64> {
        match &self.solver {
            SystemSolver::Scaled(chol) => chol.inverse() / self.sn2,
            SystemSolver::Direct { v_inv, .. } => v_inv.clone(),
        }
    }

    pub fn into_posterior(self) -> Posterior {
        self.posterior
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn kernel() -> Array2<f64> {
        array![[1.0, 0.6, 0.2], [0.6, 1.0, 0.5], [0.2, 0.5, 1.0]]
    }

    fn dense_nlml(kernel: &Array2<f64>, r: &Array1<f64>, sn2: f64) -> f64 {
        let v = shifted_kernel(kernel, sn2);
        let chol = v.cholesky(Side::Lower).unwrap();
        let alpha = chol.solve_vec(r);
        chol.half_log_det() + 0.5 * r.dot(&alpha) + 0.5 * r.len() as f64 * (2.0 * PI).ln()
    }

    #[test]
    fn both_regimes_solve_the_same_system() {
        let k = kernel();
        let r = array![0.4, -0.3, 1.1];
        for sn2 in [0.3, 1e-8] {
            let mut sys = FittedSystem::fit(&k, r.clone(), sn2).unwrap();
            let v = shifted_kernel(&k, sn2);
            let back = v.dot(&sys.posterior.alpha);
            for (a, b) in back.iter().zip(r.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-9);
            }
            let eye = v.dot(&sys.inverse());
            for ((i, j), e) in eye.indexed_iter() {
                assert_abs_diff_eq!(*e, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-9);
            }
            let nlz = sys.negative_log_marginal(&k).unwrap();
            assert_abs_diff_eq!(nlz, dense_nlml(&k, &r, sn2), epsilon = 1e-9);
        }
    }

    #[test]
    fn regime_tag_follows_threshold() {
        let k = kernel();
        let r = array![1.0, 0.0, -1.0];
        let high = FittedSystem::fit(&k, r.clone(), 1e-2).unwrap();
        assert_eq!(high.posterior.regime(), NoiseRegime::HighNoise);
        let low = FittedSystem::fit(&k, r, 1e-7).unwrap();
        assert_eq!(low.posterior.regime(), NoiseRegime::LowNoise);
        assert_abs_diff_eq!(low.posterior.sw[0], 1.0 / 1e-7_f64.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn supplied_posterior_recovers_residual_and_nlml() {
        let k = kernel();
        let r = array![0.2, 0.9, -0.4];
        for sn2 in [0.05, 1e-8] {
            let mut fresh = FittedSystem::fit(&k, r.clone(), sn2).unwrap();
            let nlz = fresh.negative_log_marginal(&k).unwrap();
            let mut rebuilt =
                FittedSystem::from_posterior(&k, fresh.posterior.clone(), sn2).unwrap();
            for (a, b) in rebuilt.residual.iter().zip(r.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-9);
            }
            assert_abs_diff_eq!(
                rebuilt.negative_log_marginal(&k).unwrap(),
                nlz,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn indefinite_system_fails() {
        let k = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(FittedSystem::fit(&k, array![1.0, 1.0], 1e-3).is_err());
    }
}
