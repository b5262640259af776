#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::process;

use gphess::config::{InferenceReport, ModelConfig, load_posterior, save_posterior};
use gphess::data::load_training_data;
use gphess::diagnostics::check_derivatives;
use gphess::{InferenceLevel, Observations, infer_exact};

#[derive(Clone, Copy, ValueEnum)]
pub enum LevelCli {
    Posterior,
    Nlml,
    Gradient,
    Hessian,
}

impl From<LevelCli> for InferenceLevel {
    fn from(level: LevelCli) -> Self {
        match level {
            LevelCli::Posterior => InferenceLevel::Posterior,
            LevelCli::Nlml => InferenceLevel::NegLogMarginal,
            LevelCli::Gradient => InferenceLevel::Gradient,
            LevelCli::Hessian => InferenceLevel::Hessian,
        }
    }
}

#[derive(Args)]
pub struct EvaluateArgs {
    /// Path to training CSV file with a `y` column and one column per feature
    pub training_data: String,

    /// Path to model description file (.toml)
    #[arg(long)]
    pub model: String,

    /// How far to evaluate
    #[arg(long, value_enum, default_value_t = LevelCli::Hessian)]
    pub level: LevelCli,

    /// Condition on a previously saved posterior instead of the targets
    #[arg(long)]
    pub posterior: Option<String>,

    /// Write the resulting posterior to this path (.toml)
    #[arg(long)]
    pub save_posterior: Option<String>,

    /// Write the evaluation report to this path (.toml)
    #[arg(long, default_value = "report.toml")]
    pub output: String,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Path to training CSV file with a `y` column and one column per feature
    pub training_data: String,

    /// Path to model description file (.toml)
    #[arg(long)]
    pub model: String,

    /// Central-difference step in log-hyperparameter space
    #[arg(long, default_value = "1e-5")]
    pub step: f64,

    /// Largest acceptable mixed relative error
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,
}

#[derive(Parser)]
#[command(
    name = "gphess",
    about = "Exact Gaussian-process inference with hyperparameter Hessians",
    long_about = "Evaluates the posterior, negative log marginal likelihood, gradient and full \
                 Hessian of a GP regression model with an ARD squared-exponential covariance."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a model on training data and write a TOML report
    Evaluate(EvaluateArgs),
    /// Compare analytic derivatives against central finite differences
    Check(CheckArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = match Cli::parse().command {
        Commands::Evaluate(args) => evaluate(args),
        Commands::Check(args) => check(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

pub fn evaluate(args: EvaluateArgs) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Loading model from: {}", args.model);
    let model = ModelConfig::load(&args.model)?;
    let hyp = model.hyperparameters();
    let mean = model.build_mean();
    let mut cov = model.build_covariance()?;

    log::info!("Loading training data from: {}", args.training_data);
    let data = load_training_data(&args.training_data)?;
    log::info!(
        "Loaded {} samples with {} features ({})",
        data.n_samples(),
        data.n_features(),
        data.feature_names.join(", ")
    );

    let supplied = args.posterior.as_deref().map(load_posterior).transpose()?;
    let observations = match &supplied {
        Some(post) => {
            log::info!("Conditioning on the supplied posterior");
            Observations::Posterior(post)
        }
        None => Observations::Targets(data.y.view()),
    };

    let level = InferenceLevel::from(args.level);
    let output = infer_exact(
        &hyp,
        &*mean,
        &mut *cov,
        &model.likelihood(),
        data.x.view(),
        observations,
        level,
    )?;

    if let Some(nlz) = output.nlz {
        println!("nlZ = {nlz:.6}");
    }
    if let Some(hessian) = &output.hessian {
        println!(
            "Hessian: {0}x{0}, symmetric = {1}",
            hessian.dimension(),
            hessian.is_symmetric()
        );
    }

    if let Some(path) = &args.save_posterior {
        save_posterior(&output.posterior, path)?;
        log::info!("Posterior saved to: {path}");
    }

    InferenceReport::from_output(level, &output).save(&args.output)?;
    println!("Report saved to: {}", args.output);
    Ok(())
}

pub fn check(args: CheckArgs) -> Result<(), Box<dyn std::error::Error>> {
    let model = ModelConfig::load(&args.model)?;
    let data = load_training_data(&args.training_data)?;
    let mut cov = model.build_covariance()?;

    let report = check_derivatives(
        &model.hyperparameters(),
        &*model.build_mean(),
        &mut *cov,
        &model.likelihood(),
        data.x.view(),
        data.y.view(),
        args.step,
    )?;

    println!("nlZ = {:.6}", report.nlz);
    println!(
        "max gradient error = {:.3e} (hyperparameter {})",
        report.max_gradient_error, report.worst_gradient_index
    );
    println!(
        "max Hessian error  = {:.3e} (entry {:?})",
        report.max_hessian_error, report.worst_hessian_index
    );

    if report.passes(args.tolerance) {
        println!("Derivatives agree with finite differences (tolerance {:.1e}).", args.tolerance);
        Ok(())
    } else {
        Err(format!(
            "analytic derivatives disagree with finite differences beyond tolerance {:.1e}",
            args.tolerance
        )
        .into())
    }
}
