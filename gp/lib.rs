#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Exact Gaussian-process regression with analytic hyperparameter Hessians.
//!
//! [`infer_exact`] evaluates the posterior, the negative log marginal likelihood, its
//! gradient and its full Hessian with respect to the covariance, noise and mean
//! hyperparameters. The ARD squared-exponential covariance supplies the second
//! derivatives of its kernel matrix through [`CovarianceFunction::hessian`].

pub mod config;
pub mod covariance;
pub mod data;
pub mod diagnostics;
pub mod faer_ndarray;
pub mod hyper;
pub mod inference;
pub mod likelihood;
pub mod mean;
pub mod posterior;

pub use covariance::{ArdSquaredExponential, CovarianceError, CovarianceFunction, CrossInput};
pub use hyper::{HyperGradient, HyperHessian, Hyperparameters};
pub use inference::{
    InferenceError, InferenceLevel, InferenceOutput, Observations, infer_exact,
    negative_log_marginal_likelihood,
};
pub use likelihood::{Likelihood, NoiseRegime};
pub use mean::{ConstMean, LinearMean, MeanError, MeanFunction, ScaledMean, SumMean, ZeroMean};
pub use posterior::{Posterior, PosteriorFactor};
