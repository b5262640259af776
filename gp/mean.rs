//! Mean functions for GP regression.
//!
//! The exact inference engine consumes a mean function through [`MeanFunction`]: the
//! value `μ(x)`, the first derivative `∂μ/∂φ_i` and the second derivative
//! `∂²μ/∂φ_i∂φ_j` with respect to the mean hyperparameters, each a length-`n` vector.

use ndarray::{Array1, ArrayView1, ArrayView2, s};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeanError {
    #[error("Mean function expects {expected} hyperparameters, but {found} were given.")]
    HyperparameterCount { expected: usize, found: usize },
    #[error("Hyperparameter index {index} is out of range for {count} mean hyperparameters.")]
    IndexOutOfRange { index: usize, count: usize },
}

pub trait MeanFunction {
    /// Number of hyperparameters for inputs with `input_dim` features.
    fn num_hyperparameters(&self, input_dim: usize) -> usize;

    fn evaluate(&self, hyp: ArrayView1<f64>, x: ArrayView2<f64>)
    -> Result<Array1<f64>, MeanError>;

    /// `∂μ/∂φ_i`.
    fn gradient(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        i: usize,
    ) -> Result<Array1<f64>, MeanError>;

    /// `∂²μ/∂φ_i∂φ_j`. Symmetric in `i` and `j`.
    fn hessian(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        i: usize,
        j: usize,
    ) -> Result<Array1<f64>, MeanError>;
}

fn check_count(hyp: ArrayView1<f64>, expected: usize) -> Result<(), MeanError> {
    if hyp.len() != expected {
        return Err(MeanError::HyperparameterCount {
            expected,
            found: hyp.len(),
        });
    }
    Ok(())
}

fn check_index(index: usize, count: usize) -> Result<(), MeanError> {
    if index >= count {
        return Err(MeanError::IndexOutOfRange { index, count });
    }
    Ok(())
}

/// `μ(x) = 0`, no hyperparameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroMean;

impl MeanFunction for ZeroMean {
    fn num_hyperparameters(&self, _: usize) -> usize {
        0
    }

    fn evaluate(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, 0)?;
        Ok(Array1::zeros(x.nrows()))
    }

    fn gradient(
        &self,
        hyp: ArrayView1<f64>,
        _: ArrayView2<f64>,
        i: usize,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, 0)?;
        Err(MeanError::IndexOutOfRange { index: i, count: 0 })
    }

    fn hessian(
        &self,
        hyp: ArrayView1<f64>,
        _: ArrayView2<f64>,
        i: usize,
        j: usize,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, 0)?;
        Err(MeanError::IndexOutOfRange {
            index: i.max(j),
            count: 0,
        })
    }
}

/// `μ(x) = c`, hyperparameter `[c]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstMean;

impl MeanFunction for ConstMean {
    fn num_hyperparameters(&self, _: usize) -> usize {
        1
    }

    fn evaluate(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, 1)?;
        Ok(Array1::from_elem(x.nrows(), hyp[0]))
    }

    fn gradient(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        i: usize,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, 1)?;
        check_index(i, 1)?;
        Ok(Array1::ones(x.nrows()))
    }

    fn hessian(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        i: usize,
        j: usize,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, 1)?;
        check_index(i.max(j), 1)?;
        Ok(Array1::zeros(x.nrows()))
    }
}

/// `μ(x) = x a`, one coefficient per input feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearMean;

impl MeanFunction for LinearMean {
    fn num_hyperparameters(&self, input_dim: usize) -> usize {
        input_dim
    }

    fn evaluate(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, x.ncols())?;
        Ok(x.dot(&hyp))
    }

    fn gradient(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        i: usize,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, x.ncols())?;
        check_index(i, x.ncols())?;
        Ok(x.column(i).to_owned())
    }

    fn hessian(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        i: usize,
        j: usize,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, x.ncols())?;
        check_index(i.max(j), x.ncols())?;
        Ok(Array1::zeros(x.nrows()))
    }
}

/// `μ(x) = a · m(x)`, hyperparameters `[a, inner...]`.
pub struct ScaledMean {
    inner: Box<dyn MeanFunction>,
}

impl ScaledMean {
    pub fn new(inner: Box<dyn MeanFunction>) -> Self {
        Self { inner }
    }
}

impl MeanFunction for ScaledMean {
    fn num_hyperparameters(&self, input_dim: usize) -> usize {
        1 + self.inner.num_hyperparameters(input_dim)
    }

    fn evaluate(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, self.num_hyperparameters(x.ncols()))?;
        Ok(self.inner.evaluate(hyp.slice(s![1..]), x)? * hyp[0])
    }

    fn gradient(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        i: usize,
    ) -> Result<Array1<f64>, MeanError> {
        let count = self.num_hyperparameters(x.ncols());
        check_count(hyp, count)?;
        check_index(i, count)?;
        let inner_hyp = hyp.slice(s![1..]);
        if i == 0 {
            self.inner.evaluate(inner_hyp, x)
        } else {
            Ok(self.inner.gradient(inner_hyp, x, i - 1)? * hyp[0])
        }
    }

    fn hessian(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        i: usize,
        j: usize,
    ) -> Result<Array1<f64>, MeanError> {
        let count = self.num_hyperparameters(x.ncols());
        check_count(hyp, count)?;
        check_index(i.max(j), count)?;
        let inner_hyp = hyp.slice(s![1..]);
        match (i.min(j), i.max(j)) {
            (0, 0) => Ok(Array1::zeros(x.nrows())),
            (0, k) => self.inner.gradient(inner_hyp, x, k - 1),
            (a, b) => Ok(self.inner.hessian(inner_hyp, x, a - 1, b - 1)? * hyp[0]),
        }
    }
}

/// `μ(x) = Σ_t m_t(x)`, hyperparameters concatenated in term order.
pub struct SumMean {
    terms: Vec<Box<dyn MeanFunction>>,
}

impl SumMean {
    pub fn new(terms: Vec<Box<dyn MeanFunction>>) -> Self {
        Self { terms }
    }

    /// Maps a global hyperparameter index to `(term, offset, local index)`.
    fn locate(&self, input_dim: usize, index: usize) -> Option<(usize, usize, usize)> {
        let mut offset = 0;
        for (t, term) in self.terms.iter().enumerate() {
            let count = term.num_hyperparameters(input_dim);
            if index < offset + count {
                return Some((t, offset, index - offset));
            }
            offset += count;
        }
        None
    }

    fn term_hyp<'a>(
        &self,
        hyp: ArrayView1<'a, f64>,
        input_dim: usize,
        term: usize,
        offset: usize,
    ) -> ArrayView1<'a, f64> {
        let count = self.terms[term].num_hyperparameters(input_dim);
        hyp.slice_move(s![offset..offset + count])
    }
}

impl MeanFunction for SumMean {
    fn num_hyperparameters(&self, input_dim: usize) -> usize {
        self.terms
            .iter()
            .map(|t| t.num_hyperparameters(input_dim))
            .sum()
    }

    fn evaluate(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
    ) -> Result<Array1<f64>, MeanError> {
        check_count(hyp, self.num_hyperparameters(x.ncols()))?;
        let mut total = Array1::zeros(x.nrows());
        let mut offset = 0;
        for (t, term) in self.terms.iter().enumerate() {
            let local = self.term_hyp(hyp, x.ncols(), t, offset);
            offset += local.len();
            total += &term.evaluate(local, x)?;
        }
        Ok(total)
    }

    fn gradient(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        i: usize,
    ) -> Result<Array1<f64>, MeanError> {
        let count = self.num_hyperparameters(x.ncols());
        check_count(hyp, count)?;
        let (t, offset, local) = self
            .locate(x.ncols(), i)
            .ok_or(MeanError::IndexOutOfRange { index: i, count })?;
        self.terms[t].gradient(self.term_hyp(hyp, x.ncols(), t, offset), x, local)
    }

    fn hessian(
        &self,
        hyp: ArrayView1<f64>,
        x: ArrayView2<f64>,
        i: usize,
        j: usize,
    ) -> Result<Array1<f64>, MeanError> {
        let count = self.num_hyperparameters(x.ncols());
        check_count(hyp, count)?;
        let (ti, offset, li) = self
            .locate(x.ncols(), i)
            .ok_or(MeanError::IndexOutOfRange { index: i, count })?;
        let (tj, _, lj) = self
            .locate(x.ncols(), j)
            .ok_or(MeanError::IndexOutOfRange { index: j, count })?;
        if ti != tj {
            return Ok(Array1::zeros(x.nrows()));
        }
        self.terms[ti].hessian(self.term_hyp(hyp, x.ncols(), ti, offset), x, li, lj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn inputs() -> Array2<f64> {
        array![[1.0, 2.0], [-0.5, 0.3], [0.0, 1.5]]
    }

    fn affine() -> SumMean {
        SumMean::new(vec![Box::new(ConstMean), Box::new(LinearMean)])
    }

    #[test]
    fn sum_of_const_and_linear() {
        let mean = affine();
        let x = inputs();
        assert_eq!(mean.num_hyperparameters(2), 3);
        let hyp = array![0.5, 2.0, -1.0];
        let mu = mean.evaluate(hyp.view(), x.view()).unwrap();
        assert_abs_diff_eq!(mu[0], 0.5 + 2.0 - 2.0, epsilon = 1e-12);
        assert_eq!(mean.gradient(hyp.view(), x.view(), 0).unwrap(), array![1.0, 1.0, 1.0]);
        assert_eq!(mean.gradient(hyp.view(), x.view(), 2).unwrap(), array![2.0, 0.3, 1.5]);
        assert_eq!(
            mean.hessian(hyp.view(), x.view(), 0, 2).unwrap(),
            array![0.0, 0.0, 0.0]
        );
        assert!(matches!(
            mean.gradient(hyp.view(), x.view(), 3),
            Err(MeanError::IndexOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn scaled_mean_derivatives_match_finite_differences() {
        let mean = ScaledMean::new(Box::new(affine()));
        let x = inputs();
        let hyp = array![1.3, 0.5, 2.0, -1.0];
        let h = 1e-6;
        for i in 0..4 {
            let mut up = hyp.clone();
            up[i] += h;
            let mut down = hyp.clone();
            down[i] -= h;
            let fd = (mean.evaluate(up.view(), x.view()).unwrap()
                - mean.evaluate(down.view(), x.view()).unwrap())
                / (2.0 * h);
            let analytic = mean.gradient(hyp.view(), x.view(), i).unwrap();
            for (a, b) in analytic.iter().zip(fd.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-7);
            }
            for j in 0..4 {
                let fd = (mean.gradient(up.view(), x.view(), j).unwrap()
                    - mean.gradient(down.view(), x.view(), j).unwrap())
                    / (2.0 * h);
                let analytic = mean.hessian(hyp.view(), x.view(), i, j).unwrap();
                for (a, b) in analytic.iter().zip(fd.iter()) {
                    assert_abs_diff_eq!(a, b, epsilon = 1e-7);
                }
            }
        }
    }

    #[test]
    fn zero_mean_has_no_hyperparameters() {
        let x = inputs();
        let hyp = Array1::<f64>::zeros(0);
        assert_eq!(ZeroMean.evaluate(hyp.view(), x.view()).unwrap(), array![0.0, 0.0, 0.0]);
        assert!(ZeroMean.gradient(hyp.view(), x.view(), 0).is_err());
        assert!(matches!(
            ConstMean.evaluate(hyp.view(), x.view()),
            Err(MeanError::HyperparameterCount {
                expected: 1,
                found: 0
            })
        ));
    }
}
