//! Gaussian observation noise.
//!
//! Exact inference supports exactly one likelihood. [`Likelihood`] still accepts any
//! name so callers can pass through whatever their model description carries, but every
//! value is evaluated as Gaussian noise with variance `σ² = exp(2·lik)`.

use std::fmt;

/// Noise variances strictly below this use the low-noise parameterization.
pub const LOW_NOISE_THRESHOLD: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Likelihood {
    #[default]
    Gaussian,
    /// Any other name. Accepted and treated as Gaussian.
    Other(String),
}

impl Likelihood {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "gaussian" | "gauss" | "likgauss" | "normal" => Likelihood::Gaussian,
            _ => Likelihood::Other(name.to_string()),
        }
    }

    /// Logs once per call when a non-Gaussian name is about to be ignored.
    pub(crate) fn warn_if_ignored(&self) {
        if let Likelihood::Other(name) = self {
            log::warn!(
                "Likelihood '{}' is not supported by exact inference; using Gaussian noise.",
                name
            );
        }
    }
}

impl fmt::Display for Likelihood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Likelihood::Gaussian => write!(f, "gaussian"),
            Likelihood::Other(name) => write!(f, "{name}"),
        }
    }
}

/// `σ² = exp(2·lik)` for the log noise standard deviation `lik`.
pub fn noise_variance(lik: f64) -> f64 {
    (2.0 * lik).exp()
}

/// Which representation of `(K + σ²I)^{-1}` a posterior carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseRegime {
    /// Cholesky factor of `K/σ² + I`.
    HighNoise,
    /// `−(K + σ²I)^{-1}` held directly.
    LowNoise,
}

impl NoiseRegime {
    pub fn select(sn2: f64) -> Self {
        if sn2 < LOW_NOISE_THRESHOLD {
            NoiseRegime::LowNoise
        } else {
            NoiseRegime::HighNoise
        }
    }
}
