//! # Model Files and Evaluation Reports
//!
//! A model file is a small TOML document naming the covariance function, the likelihood,
//! a (possibly nested) mean function and the hyperparameter values:
//!
//! ```toml
//! covariance = "ard_squared_exponential"
//! likelihood = "gaussian"
//!
//! [mean]
//! kind = "sum"
//! [[mean.terms]]
//! kind = "const"
//! [[mean.terms]]
//! kind = "linear"
//!
//! [hyperparameters]
//! cov = [0.0, 0.0]
//! lik = -2.3
//! mean = [0.5, 1.0]
//! ```
//!
//! Evaluation results are written back as an [`InferenceReport`], also TOML.

use crate::covariance::{ArdSquaredExponential, CovarianceFunction};
use crate::hyper::Hyperparameters;
use crate::inference::{InferenceLevel, InferenceOutput};
use crate::likelihood::Likelihood;
use crate::mean::{ConstMean, LinearMean, MeanFunction, ScaledMean, SumMean, ZeroMean};
use crate::posterior::Posterior;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "Unknown covariance function '{0}'. The only supported covariance is 'ard_squared_exponential'."
    )]
    UnknownCovariance(String),
}

fn write_toml<T: Serialize>(value: &T, path: &str) -> Result<(), ConfigError> {
    let toml_string = toml::to_string_pretty(value)?;
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(toml_string.as_bytes())?;
    Ok(())
}

// --- Model description ---

/// Mean function tree, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeanSpec {
    #[default]
    Zero,
    Const,
    Linear,
    Scaled { inner: Box<MeanSpec> },
    Sum { terms: Vec<MeanSpec> },
}

impl MeanSpec {
    pub fn build(&self) -> Box<dyn MeanFunction> {
        match self {
            MeanSpec::Zero => Box::new(ZeroMean),
            MeanSpec::Const => Box::new(ConstMean),
            MeanSpec::Linear => Box::new(LinearMean),
            MeanSpec::Scaled { inner } => Box::new(ScaledMean::new(inner.build())),
            MeanSpec::Sum { terms } => {
                Box::new(SumMean::new(terms.iter().map(MeanSpec::build).collect()))
            }
        }
    }
}

/// Hyperparameter values as they appear in a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterConfig {
    pub cov: Vec<f64>,
    pub lik: f64,
    #[serde(default)]
    pub mean: Vec<f64>,
}

impl HyperparameterConfig {
    pub fn to_hyperparameters(&self) -> Hyperparameters {
        Hyperparameters::new(
            Array1::from(self.cov.clone()),
            self.lik,
            Array1::from(self.mean.clone()),
        )
    }
}

impl From<&Hyperparameters> for HyperparameterConfig {
    fn from(hyp: &Hyperparameters) -> Self {
        Self {
            cov: hyp.cov.to_vec(),
            lik: hyp.lik,
            mean: hyp.mean.to_vec(),
        }
    }
}

fn default_covariance() -> String {
    "ard_squared_exponential".to_string()
}

fn default_likelihood() -> String {
    "gaussian".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_covariance")]
    pub covariance: String,
    #[serde(default = "default_likelihood")]
    pub likelihood: String,
    #[serde(default)]
    pub mean: MeanSpec,
    pub hyperparameters: HyperparameterConfig,
}

impl ModelConfig {
    pub fn build_covariance(&self) -> Result<Box<dyn CovarianceFunction>, ConfigError> {
        match self.covariance.trim().to_ascii_lowercase().as_str() {
            "ard_squared_exponential" | "se_ard" | "covseard" => {
                Ok(Box::new(ArdSquaredExponential::new()))
            }
            _ => Err(ConfigError::UnknownCovariance(self.covariance.clone())),
        }
    }

    pub fn build_mean(&self) -> Box<dyn MeanFunction> {
        self.mean.build()
    }

    pub fn likelihood(&self) -> Likelihood {
        Likelihood::from_name(&self.likelihood)
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        self.hyperparameters.to_hyperparameters()
    }

    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        write_toml(self, path)
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }
}

// --- Posterior persistence ---

pub fn save_posterior(posterior: &Posterior, path: &str) -> Result<(), ConfigError> {
    write_toml(posterior, path)
}

pub fn load_posterior(path: &str) -> Result<Posterior, ConfigError> {
    let toml_string = fs::read_to_string(path)?;
    Ok(toml::from_str(&toml_string)?)
}

// --- Evaluation report ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientReport {
    pub cov: Vec<f64>,
    pub lik: f64,
    pub mean: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HessianReport {
    pub likelihood_ind: usize,
    /// Row-major Hessian in the flat order `[cov..., lik, mean...]`.
    pub rows: Vec<Vec<f64>>,
    /// Square roots of the diagonal of `H⁻¹`; absent when `H` is not positive definite.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub standard_errors: Option<Vec<f64>>,
    pub covariance_ind: Range<usize>,
    pub mean_ind: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceReport {
    pub level: InferenceLevel,
    pub regime: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nlz: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gradient: Option<GradientReport>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hessian: Option<HessianReport>,
}

impl InferenceReport {
    pub fn from_output(level: InferenceLevel, output: &InferenceOutput) -> Self {
        let gradient = output.dnlz.as_ref().map(|g| GradientReport {
            cov: g.cov.to_vec(),
            lik: g.lik,
            mean: g.mean.to_vec(),
        });
        let hessian = output.hessian.as_ref().map(|h| {
            let standard_errors = match h.standard_errors() {
                Ok(se) => Some(se.to_vec()),
                Err(e) => {
                    log::info!("Hessian is not positive definite; skipping standard errors ({e})");
                    None
                }
            };
            HessianReport {
                likelihood_ind: h.likelihood_ind,
                rows: h.matrix.rows().into_iter().map(|r| r.to_vec()).collect(),
                standard_errors,
                covariance_ind: h.covariance_ind.clone(),
                mean_ind: h.mean_ind.clone(),
            }
        });
        Self {
            level,
            regime: format!("{:?}", output.posterior.regime()),
            nlz: output.nlz,
            gradient,
            hessian,
        }
    }

    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        write_toml(self, path)
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}
