//! # Hyperparameter Records
//!
//! The hyperparameter vector of a GP regression model is partitioned into three
//! ordered blocks: covariance (`cov`), Gaussian noise (`lik`, the log noise standard
//! deviation) and mean (`mean`). The flat order used for gradients and Hessians is
//! always `[cov..., lik, mean...]`.

use crate::faer_ndarray::{FaerCholesky, FaerLinalgError};
use faer::Side;
use ndarray::{Array1, Array2, s};
use std::ops::Range;

/// Hyperparameters of a GP regression model, one named field per block.
#[derive(Debug, Clone, PartialEq)]
pub struct Hyperparameters {
    pub cov: Array1<f64>,
    pub lik: f64,
    pub mean: Array1<f64>,
}

impl Hyperparameters {
    pub fn new(cov: Array1<f64>, lik: f64, mean: Array1<f64>) -> Self {
        Self { cov, lik, mean }
    }

    pub fn num_cov(&self) -> usize {
        self.cov.len()
    }

    pub fn num_mean(&self) -> usize {
        self.mean.len()
    }

    /// Total dimension `num_cov + 1 + num_mean`.
    pub fn dimension(&self) -> usize {
        self.num_cov() + 1 + self.num_mean()
    }

    pub fn to_flat(&self) -> Array1<f64> {
        let nc = self.num_cov();
        let mut flat = Array1::zeros(self.dimension());
        flat.slice_mut(s![..nc]).assign(&self.cov);
        flat[nc] = self.lik;
        flat.slice_mut(s![nc + 1..]).assign(&self.mean);
        flat
    }

    /// Copy of `self` with flat entry `index` shifted by `delta`.
    pub fn perturbed(&self, index: usize, delta: f64) -> Self {
        let nc = self.num_cov();
        let mut out = self.clone();
        if index < nc {
            out.cov[index] += delta;
        } else if index == nc {
            out.lik += delta;
        } else {
            out.mean[index - nc - 1] += delta;
        }
        out
    }
}

/// Gradient of the negative log marginal likelihood, mirroring [`Hyperparameters`].
#[derive(Debug, Clone, PartialEq)]
pub struct HyperGradient {
    pub cov: Array1<f64>,
    pub lik: f64,
    pub mean: Array1<f64>,
}

impl HyperGradient {
    pub fn zeros(num_cov: usize, num_mean: usize) -> Self {
        Self {
            cov: Array1::zeros(num_cov),
            lik: 0.0,
            mean: Array1::zeros(num_mean),
        }
    }

    pub fn to_flat(&self) -> Array1<f64> {
        Hyperparameters::new(self.cov.clone(), self.lik, self.mean.clone()).to_flat()
    }
}

/// Full Hessian of the negative log marginal likelihood.
///
/// `matrix` is `d × d` with rows and columns laid out as `[cov..., lik, mean...]`;
/// the three index fields record which rows belong to which block.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperHessian {
    pub matrix: Array2<f64>,
    pub covariance_ind: Range<usize>,
    pub likelihood_ind: usize,
    pub mean_ind: Range<usize>,
}

impl HyperHessian {
    /// Allocates the zero Hessian with its final shape and block ranges.
    pub fn zeros(num_cov: usize, num_mean: usize) -> Self {
        let d = num_cov + 1 + num_mean;
        Self {
            matrix: Array2::zeros((d, d)),
            covariance_ind: 0..num_cov,
            likelihood_ind: num_cov,
            mean_ind: num_cov + 1..d,
        }
    }

    pub fn dimension(&self) -> usize {
        self.matrix.nrows()
    }

    /// Completes a lower-triangular fill by adding the transpose of the strict lower
    /// triangle. The upper triangle must still be zero; the result is exactly symmetric.
    pub(crate) fn mirror_lower(&mut self) {
        let d = self.dimension();
        for i in 0..d {
            for j in 0..i {
                self.matrix[(j, i)] += self.matrix[(i, j)];
            }
        }
    }

    pub fn is_symmetric(&self) -> bool {
        let d = self.dimension();
        (0..d).all(|i| (0..i).all(|j| self.matrix[(i, j)] == self.matrix[(j, i)]))
    }

    /// Laplace approximation to the hyperparameter posterior covariance, `H⁻¹`.
    ///
    /// Only meaningful at a minimum of the negative log marginal likelihood, where
    /// `H` is positive definite; elsewhere the Cholesky factorization fails.
    pub fn laplace_covariance(&self) -> Result<Array2<f64>, FaerLinalgError> {
        Ok(self.matrix.cholesky(Side::Lower)?.inverse())
    }

    /// Square roots of the diagonal of [`Self::laplace_covariance`].
    pub fn standard_errors(&self) -> Result<Array1<f64>, FaerLinalgError> {
        Ok(self.laplace_covariance()?.diag().mapv(f64::sqrt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn flat_layout_is_cov_lik_mean() {
        let hyp = Hyperparameters::new(array![0.1, 0.2], -1.0, array![3.0]);
        assert_eq!(hyp.dimension(), 4);
        assert_eq!(hyp.to_flat(), array![0.1, 0.2, -1.0, 3.0]);
    }

    #[test]
    fn perturbed_touches_one_block() {
        let hyp = Hyperparameters::new(array![0.0, 0.0], 0.0, array![0.0, 0.0]);
        assert_eq!(hyp.perturbed(1, 0.5).cov, array![0.0, 0.5]);
        assert_eq!(hyp.perturbed(2, 0.5).lik, 0.5);
        assert_eq!(hyp.perturbed(4, 0.5).mean, array![0.0, 0.5]);
    }

    #[test]
    fn hessian_ranges_follow_block_sizes() {
        let h = HyperHessian::zeros(2, 0);
        assert_eq!(h.dimension(), 3);
        assert_eq!(h.covariance_ind, 0..2);
        assert_eq!(h.likelihood_ind, 2);
        assert!(h.mean_ind.is_empty());

        let h = HyperHessian::zeros(3, 2);
        assert_eq!(h.mean_ind, 4..6);
    }

    #[test]
    fn mirror_lower_produces_exact_symmetry() {
        let mut h = HyperHessian::zeros(1, 1);
        h.matrix = array![[1.0, 0.0, 0.0], [0.3, 2.0, 0.0], [0.1, 0.7, 3.0]];
        h.mirror_lower();
        assert!(h.is_symmetric());
        assert_eq!(h.matrix[(0, 2)], 0.1);
        assert_eq!(h.matrix[(1, 2)], 0.7);
    }

    #[test]
    fn laplace_covariance_inverts_hessian() {
        let mut h = HyperHessian::zeros(1, 0);
        h.matrix = array![[4.0, 1.0], [1.0, 2.0]];
        let cov = h.laplace_covariance().unwrap();
        let eye = h.matrix.dot(&cov);
        assert_abs_diff_eq!(eye[(0, 0)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eye[(0, 1)], 0.0, epsilon = 1e-12);
        let se = h.standard_errors().unwrap();
        assert_abs_diff_eq!(se[0], (2.0_f64 / 7.0).sqrt(), epsilon = 1e-12);
    }
}
