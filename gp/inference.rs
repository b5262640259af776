//! # Exact Inference with Hyperparameter Hessians
//!
//! This module evaluates a GP regression model with Gaussian noise at one of four
//! escalating levels:
//!
//! 1.  **Posterior:** `alpha`, `sw` and the factorization of `V = K + σ²I`.
//! 2.  **NLML:** the negative log marginal likelihood
//!     `nlZ = ½ rᵀV⁻¹r + ½ log|V| + (n/2) log 2π`, with `r = y − μ(x)`.
//! 3.  **Gradient:** `∂nlZ/∂θ` for every covariance, noise and mean hyperparameter.
//! 4.  **Hessian:** the full symmetric `∂²nlZ/∂θ∂θᵀ`.
//!
//! The Hessian level forms `V⁻¹` once and `A_i = V⁻¹ ∂K/∂θ_i` once per covariance
//! hyperparameter. Every trace of a product of two such matrices is then evaluated as
//! an elementwise sum in O(n²) rather than by forming the product:
//!
//! - `tr(A_i A_j) = Σ A_i ⊙ A_jᵀ`
//! - `tr(V⁻¹ ∂²K_ij) = Σ V⁻¹ ⊙ ∂²K_ij`
//! - `tr(A_i V⁻¹) = Σ A_i ⊙ V⁻¹`
//!
//! Quadratic forms reuse `K_i α`, `A_i α` and `V⁻¹α`, which are each computed once.
//! Only the lower triangle of the Hessian is filled; it is mirrored at the end.

use crate::covariance::{CovarianceError, CovarianceFunction, CrossInput};
use crate::faer_ndarray::FaerLinalgError;
use crate::hyper::{HyperGradient, HyperHessian, Hyperparameters};
use crate::likelihood::{Likelihood, noise_variance};
use crate::mean::{MeanError, MeanFunction};
use crate::posterior::{FittedSystem, Posterior};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("The training set is empty; at least one input row is required.")]
    EmptyTrainingSet,
    #[error("Target vector has {found} entries, but the input matrix has {expected} rows.")]
    TargetLengthMismatch { expected: usize, found: usize },
    #[error(
        "Covariance function expects {expected} hyperparameters for {input_dim} input features, but hyp.cov has {found}."
    )]
    CovarianceDimensionMismatch {
        expected: usize,
        found: usize,
        input_dim: usize,
    },
    #[error(
        "Mean function expects {expected} hyperparameters for {input_dim} input features, but hyp.mean has {found}."
    )]
    MeanDimensionMismatch {
        expected: usize,
        found: usize,
        input_dim: usize,
    },
    #[error("Supplied posterior has {found} weights, but the input matrix has {expected} rows.")]
    PosteriorLengthMismatch { expected: usize, found: usize },
    #[error("Supplied posterior factor is {rows}x{cols}, expected {expected}x{expected}.")]
    PosteriorFactorShape {
        rows: usize,
        cols: usize,
        expected: usize,
    },
    #[error("Covariance evaluation failed: {0}")]
    Covariance(#[from] CovarianceError),
    #[error("Mean evaluation failed: {0}")]
    Mean(#[from] MeanError),
    #[error("Factorization of K + σ²I failed; the matrix is not positive definite. {0}")]
    Linalg(#[from] FaerLinalgError),
}

/// How far the evaluation proceeds. Each level includes everything below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceLevel {
    Posterior,
    NegLogMarginal,
    Gradient,
    Hessian,
}

/// What the model is conditioned on.
#[derive(Debug, Clone, Copy)]
pub enum Observations<'a> {
    /// Training targets `y`; the posterior is computed from scratch.
    Targets(ArrayView1<'a, f64>),
    /// A posterior from an earlier call on the same inputs and hyperparameters.
    Posterior(&'a Posterior),
}

#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub posterior: Posterior,
    pub nlz: Option<f64>,
    pub dnlz: Option<HyperGradient>,
    pub hessian: Option<HyperHessian>,
}

/// First derivatives of the kernel matrix and mean vector, one per hyperparameter.
struct Derivatives {
    dk: Vec<Array2<f64>>,
    dm: Vec<Array1<f64>>,
}

impl Derivatives {
    fn compute<M, C>(
        hyp: &Hyperparameters,
        mean: &M,
        cov: &C,
        x: ArrayView2<f64>,
    ) -> Result<Self, InferenceError>
    where
        M: MeanFunction + ?Sized,
        C: CovarianceFunction + ?Sized,
    {
        let dk = (0..hyp.num_cov())
            .map(|i| cov.gradient(hyp.cov.view(), x, CrossInput::Training, i))
            .collect::<Result<Vec<_>, _>>()?;
        let dm = (0..hyp.num_mean())
            .map(|i| mean.gradient(hyp.mean.view(), x, i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { dk, dm })
    }
}

/// `tr(A B) = Σ_uv A_uv B_vu`.
fn trace_of_product(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    (a * &b.t()).sum()
}

fn validate<M, C>(
    hyp: &Hyperparameters,
    mean: &M,
    cov: &C,
    x: ArrayView2<f64>,
    observations: &Observations<'_>,
) -> Result<(), InferenceError>
where
    M: MeanFunction + ?Sized,
    C: CovarianceFunction + ?Sized,
{
    let (n, p) = x.dim();
    if n == 0 {
        return Err(InferenceError::EmptyTrainingSet);
    }
    let expected = cov.num_hyperparameters(p);
    if hyp.num_cov() != expected {
        return Err(InferenceError::CovarianceDimensionMismatch {
            expected,
            found: hyp.num_cov(),
            input_dim: p,
        });
    }
    let expected = mean.num_hyperparameters(p);
    if hyp.num_mean() != expected {
        return Err(InferenceError::MeanDimensionMismatch {
            expected,
            found: hyp.num_mean(),
            input_dim: p,
        });
    }
    match observations {
        Observations::Targets(y) => {
            if y.len() != n {
                return Err(InferenceError::TargetLengthMismatch {
                    expected: n,
                    found: y.len(),
                });
            }
        }
        Observations::Posterior(post) => {
            if post.alpha.len() != n {
                return Err(InferenceError::PosteriorLengthMismatch {
                    expected: n,
                    found: post.alpha.len(),
                });
            }
            let (rows, cols) = post.factor.dim();
            if rows != n || cols != n {
                return Err(InferenceError::PosteriorFactorShape {
                    rows,
                    cols,
                    expected: n,
                });
            }
        }
    }
    Ok(())
}

/// Evaluates the training kernel and factorizes `K + σ²I` for the given observations.
fn fit_system<M, C>(
    hyp: &Hyperparameters,
    mean: &M,
    cov: &C,
    x: ArrayView2<f64>,
    observations: Observations<'_>,
) -> Result<(Array2<f64>, FittedSystem), InferenceError>
where
    M: MeanFunction + ?Sized,
    C: CovarianceFunction + ?Sized,
{
    let sn2 = noise_variance(hyp.lik);
    let kernel = cov.evaluate(hyp.cov.view(), x, CrossInput::Training)?;
    let system = match observations {
        Observations::Targets(y) => {
            let m = mean.evaluate(hyp.mean.view(), x)?;
            FittedSystem::fit(&kernel, &y - &m, sn2)?
        }
        Observations::Posterior(post) => {
            log::debug!("Rebuilding the training system from a supplied posterior");
            FittedSystem::from_posterior(&kernel, post.clone(), sn2)?
        }
    };
    Ok((kernel, system))
}

/// Evaluates exact GP inference with Gaussian noise up to the requested `level`.
///
/// The likelihood specifier is accepted for interface compatibility only; any value is
/// evaluated as Gaussian noise with variance `exp(2·hyp.lik)`.
///
/// All dimension checks run before the covariance matrix is factorized. A failed
/// factorization aborts the call with [`InferenceError::Linalg`].
pub fn infer_exact<M, C>(
    hyp: &Hyperparameters,
    mean: &M,
    cov: &mut C,
    likelihood: &Likelihood,
    x: ArrayView2<f64>,
    observations: Observations<'_>,
    level: InferenceLevel,
) -> Result<InferenceOutput, InferenceError>
where
    M: MeanFunction + ?Sized,
    C: CovarianceFunction + ?Sized,
{
    likelihood.warn_if_ignored();
    validate(hyp, mean, &*cov, x, &observations)?;
    log::debug!(
        "Exact inference at {:?} level: n = {}, p = {}, d = {}",
        level,
        x.nrows(),
        x.ncols(),
        hyp.dimension()
    );

    let (kernel, mut system) = fit_system(hyp, mean, &*cov, x, observations)?;

    if level == InferenceLevel::Posterior {
        return Ok(InferenceOutput {
            posterior: system.into_posterior(),
            nlz: None,
            dnlz: None,
            hessian: None,
        });
    }

    let nlz = system.negative_log_marginal(&kernel)?;
    if level == InferenceLevel::NegLogMarginal {
        return Ok(InferenceOutput {
            posterior: system.into_posterior(),
            nlz: Some(nlz),
            dnlz: None,
            hessian: None,
        });
    }

    let v_inv = system.inverse();
    let derivatives = Derivatives::compute(hyp, mean, &*cov, x)?;
    let dnlz = gradient(hyp, &system, &v_inv, &derivatives);
    let hessian = if level == InferenceLevel::Hessian {
        Some(hessian(
            hyp,
            mean,
            cov,
            x,
            &system,
            &v_inv,
            &derivatives,
            dnlz.lik,
        )?)
    } else {
        None
    };

    Ok(InferenceOutput {
        posterior: system.into_posterior(),
        nlz: Some(nlz),
        dnlz: Some(dnlz),
        hessian,
    })
}

/// Convenience wrapper returning only `nlZ` for targets `y`.
pub fn negative_log_marginal_likelihood<M, C>(
    hyp: &Hyperparameters,
    mean: &M,
    cov: &C,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
) -> Result<f64, InferenceError>
where
    M: MeanFunction + ?Sized,
    C: CovarianceFunction + ?Sized,
{
    let observations = Observations::Targets(y);
    validate(hyp, mean, cov, x, &observations)?;
    let (kernel, mut system) = fit_system(hyp, mean, cov, x, observations)?;
    Ok(system.negative_log_marginal(&kernel)?)
}

/// First derivatives of `nlZ`:
///
/// - covariance: `½(tr(V⁻¹K_i) − αᵀK_iα)`
/// - noise: `σ²(tr V⁻¹ − αᵀα)`
/// - mean: `−m_iᵀα`
fn gradient(
    hyp: &Hyperparameters,
    system: &FittedSystem,
    v_inv: &Array2<f64>,
    derivatives: &Derivatives,
) -> HyperGradient {
    let alpha = &system.posterior.alpha;
    let sn2 = system.noise_variance();
    let mut grad = HyperGradient::zeros(hyp.num_cov(), hyp.num_mean());
    for (i, dk) in derivatives.dk.iter().enumerate() {
        grad.cov[i] = 0.5 * ((v_inv * dk).sum() - alpha.dot(&dk.dot(alpha)));
    }
    grad.lik = sn2 * (v_inv.diag().sum() - alpha.dot(alpha));
    for (i, dm) in derivatives.dm.iter().enumerate() {
        grad.mean[i] = -dm.dot(alpha);
    }
    grad
}

#[allow(clippy::too_many_arguments)]
fn hessian<M, C>(
    hyp: &Hyperparameters,
    mean: &M,
    cov: &mut C,
    x: ArrayView2<f64>,
    system: &FittedSystem,
    v_inv: &Array2<f64>,
    derivatives: &Derivatives,
    grad_lik: f64,
) -> Result<HyperHessian, InferenceError>
where
    M: MeanFunction + ?Sized,
    C: CovarianceFunction + ?Sized,
{
    let alpha = &system.posterior.alpha;
    let sn2 = system.noise_variance();
    let (nc, nm) = (hyp.num_cov(), hyp.num_mean());
    let Derivatives { dk, dm } = derivatives;

    let mut hess = HyperHessian::zeros(nc, nm);
    let li = hess.likelihood_ind;
    let mi = hess.mean_ind.start;
    let v_inv_alpha = v_inv.dot(alpha);

    // Noise/noise.
    let tr_v_inv_sq = (v_inv * v_inv).sum();
    hess.matrix[(li, li)] =
        2.0 * sn2 * sn2 * (2.0 * alpha.dot(&v_inv_alpha) - tr_v_inv_sq) + 2.0 * grad_lik;

    // Mean/mean and mean/noise.
    let v_inv_dm: Vec<Array1<f64>> = dm.iter().map(|d| v_inv.dot(d)).collect();
    for i in 0..nm {
        for j in 0..=i {
            let d2m = mean.hessian(hyp.mean.view(), x, i, j)?;
            hess.matrix[(mi + i, mi + j)] = dm[i].dot(&v_inv_dm[j]) - d2m.dot(alpha);
        }
        hess.matrix[(mi + i, li)] = 2.0 * sn2 * dm[i].dot(&v_inv_alpha);
    }

    // Covariance rows. A_i = V⁻¹K_i is kept for every i; the cross terms reuse it.
    let a: Vec<Array2<f64>> = dk.iter().map(|d| v_inv.dot(d)).collect();
    let k_alpha: Vec<Array1<f64>> = dk.iter().map(|d| d.dot(alpha)).collect();
    let a_alpha: Vec<Array1<f64>> = a.iter().map(|ai| ai.dot(alpha)).collect();

    // The first request is (0, 0), which primes the kernel cache for the whole sweep.
    for i in 0..nc {
        for j in 0..=i {
            let d2k = cov.hessian(hyp.cov.view(), x, CrossInput::Training, i, j)?;
            // rᵀA_iA_jα = (K_iα)ᵀ(A_jα) since rᵀV⁻¹ = αᵀ.
            let quad = k_alpha[i].dot(&a_alpha[j]);
            let tr_v_inv_d2k = (v_inv * &d2k).sum();
            let tr_ai_aj = trace_of_product(&a[i], &a[j]);
            let alpha_d2k_alpha = alpha.dot(&d2k.dot(alpha));
            hess.matrix[(i, j)] = quad + 0.5 * (tr_v_inv_d2k - tr_ai_aj - alpha_d2k_alpha);
        }
        for (j, dm_j) in dm.iter().enumerate() {
            hess.matrix[(mi + j, i)] = dm_j.dot(&a_alpha[i]);
        }
        let tr_ai_v_inv = (&a[i] * v_inv).sum();
        hess.matrix[(li, i)] = sn2 * (2.0 * k_alpha[i].dot(&v_inv_alpha) - tr_ai_v_inv);
    }

    hess.mirror_lower();
    Ok(hess)
}
