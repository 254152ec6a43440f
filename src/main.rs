//! Figure Authenticity CLI
//!
//! Entry point for training the scoring backends, scoring single figures
//! and inspecting saved artifacts.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use figure_authenticity::backend::backend_name;
use figure_authenticity::model::artifact::ArtifactStore;
use figure_authenticity::utils::logging::{init_logging, LogConfig};
use figure_authenticity::utils::metrics::CLASS_NAMES;
use figure_authenticity::{ModelKind, PipelineConfig, Predictor, TrainingOrchestrator};

/// Collectible figure authenticity scoring
///
/// Trains either a deep image + feature fusion network (Burn) or a
/// class-balanced random forest over engineered features, and scores new
/// figures with the saved artifact.
#[derive(Parser, Debug)]
#[command(name = "figure_authenticity")]
#[command(version)]
#[command(about = "Authenticity scoring for collectible figures", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, default_value = "false")]
    quiet: bool,

    /// TOML configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a scoring backend on the dataset manifest
    Train {
        /// Backend to train: tree or deep
        #[arg(short, long)]
        backend: Option<ModelKind>,

        /// Dataset root containing metadata.json and images/
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Directory for artifacts, reports and charts
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Number of training epochs (deep backend)
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size (deep backend)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Seed for the split, the forest and the training loop
        #[arg(long)]
        seed: Option<u64>,

        /// Skip SVG chart output
        #[arg(long, default_value = "false")]
        no_charts: bool,
    },

    /// Score one figure with a trained artifact
    Predict {
        /// Backend the artifact belongs to; read from the artifact when omitted
        #[arg(short, long)]
        backend: Option<ModelKind>,

        /// Raw feature vector, comma separated (10 values for tree, 7 for deep)
        #[arg(short, long, value_delimiter = ',', num_args = 1.., allow_hyphen_values = true)]
        features: Vec<f32>,

        /// Figure photograph (required by the deep backend)
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Artifact path; defaults to <model_dir>/<backend>
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Print the prediction as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Print the manifest of a saved artifact
    Inspect {
        /// Artifact path (base path or either artifact file)
        #[arg(short, long)]
        model: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config).map_err(anyhow::Error::msg)?;

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Train {
            backend,
            data_dir,
            model_dir,
            epochs,
            batch_size,
            seed,
            no_charts,
        } => {
            let mut config = config;
            if let Some(backend) = backend {
                config.backend = backend;
            }
            if let Some(dir) = data_dir {
                config.data.data_dir = dir;
            }
            if let Some(dir) = model_dir {
                config.output.model_dir = dir;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(seed) = seed {
                config.split.seed = seed;
                config.forest.seed = seed;
                config.training.seed = seed;
            }
            if no_charts {
                config.output.charts = false;
            }
            cmd_train(config)
        }

        Commands::Predict {
            backend,
            features,
            image,
            model,
            json,
        } => cmd_predict(config, backend, &features, image.as_deref(), model.as_deref(), json),

        Commands::Inspect { model } => cmd_inspect(&model),
    }
}

fn cmd_train(config: PipelineConfig) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Backend:    {}", config.backend);
    println!("  Data:       {}", config.data.data_dir.display());
    println!("  Models:     {}", config.output.model_dir.display());
    if config.backend == ModelKind::DeepFusion {
        println!("  Device:     {}", backend_name());
        println!("  Epochs:     {}", config.training.epochs);
        println!("  Batch size: {}", config.training.batch_size);
    } else {
        println!("  Trees:      {}", config.forest.n_estimators);
    }
    println!();

    let model_dir = config.output.model_dir.clone();
    let outcome = TrainingOrchestrator::new(config.clone())
        .run()
        .context("training failed")?;

    std::fs::create_dir_all(&model_dir)?;
    config.save(&model_dir.join("config.json"))?;

    println!();
    println!("{}", "Training Report".green().bold());
    println!("{}", outcome.report);
    println!(
        "{} {}",
        "Artifact saved to".green(),
        ArtifactStore::manifest_path(&outcome.artifact_base).display()
    );
    Ok(())
}

fn cmd_predict(
    config: PipelineConfig,
    backend: Option<ModelKind>,
    features: &[f32],
    image: Option<&Path>,
    model: Option<&Path>,
    json: bool,
) -> Result<()> {
    if features.is_empty() {
        bail!("--features is required");
    }

    let mut predictor = match model {
        Some(path) => Predictor::from_artifact(ArtifactStore::load(path, backend, &config)?, config),
        None => Predictor::new(backend.unwrap_or(config.backend), config),
    };
    info!("Scoring with {} backend", predictor.kind());

    let result = predictor.predict_file(features, image)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let label = if result.prediction.is_authentic() {
        CLASS_NAMES[1].green().bold()
    } else {
        CLASS_NAMES[0].red().bold()
    };
    println!("{} {}", "Prediction:".cyan().bold(), label);
    println!("{}", result);
    Ok(())
}

fn cmd_inspect(model: &Path) -> Result<()> {
    let base = ArtifactStore::base_path(model);
    let manifest = ArtifactStore::read_manifest(&base)?;

    println!("{}", "Artifact".cyan().bold());
    println!("  Base path:      {}", base.display());
    println!("  Schema version: {}", manifest.schema_version);
    println!("  Kind:           {}", manifest.kind);
    println!("  Variant:        {}", manifest.variant);
    println!("  Created:        {}", manifest.created_at);
    println!("  Crate version:  {}", manifest.crate_version);
    println!("  Parameters:     {}", ArtifactStore::params_path(&base, &manifest).display());
    println!("  SHA-256:        {}", manifest.params_sha256);
    println!();
    println!("{}", "Scaler".cyan().bold());
    println!("  {:<22} {:>10} {:>10}", "Feature", "Mean", "Std");
    for (i, name) in manifest.feature_names.iter().enumerate() {
        println!(
            "  {:<22} {:>10.4} {:>10.4}",
            name,
            manifest.scaler.mean.get(i).copied().unwrap_or_default(),
            manifest.scaler.scale.get(i).copied().unwrap_or_default()
        );
    }
    Ok(())
}
