//! cxr CLI: classify chest X-rays and write Grad-CAM overlays.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cxr::prelude::*;
use cxr::models::checkpoint::checkpoint_paths;

/// Backend type for analysis; attribution needs gradients.
type AnalysisBackend = Autodiff<NdArray>;

#[derive(Parser)]
#[command(name = "cxr")]
#[command(author, version)]
#[command(about = "Chest X-ray classification with Grad-CAM saliency overlays")]
#[command(long_about = "cxr: classify a chest radiograph and show which regions drove the prediction.

EXAMPLES:
  # Write a freshly initialized checkpoint (weights/cxr.mpk + weights/cxr.json)
  cxr init --output weights/cxr

  # Analyze an image, explaining the predicted class
  cxr analyze --checkpoint weights/cxr --image scan.png --output scan_overlay.png

  # Explain class 2 at an earlier layer and also save the bare heatmap
  cxr analyze --checkpoint weights/cxr --image scan.png --target-class 2 --layer layer3 \\
      --heatmap scan_heatmap.png

  # List layers that can anchor an attribution
  cxr layers --checkpoint weights/cxr")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify an image and composite its saliency map
    Analyze {
        /// Checkpoint path without extension
        #[arg(long, value_name = "STEM")]
        checkpoint: PathBuf,

        /// Image to analyze (PNG, JPEG or DICOM)
        #[arg(long, value_name = "PATH")]
        image: PathBuf,

        /// Where to write the overlay
        #[arg(long, default_value = "overlay.png", value_name = "PATH")]
        output: PathBuf,

        /// Also write the bare colored heatmap
        #[arg(long, value_name = "PATH")]
        heatmap: Option<PathBuf>,

        /// Analysis config (JSON); labels default to the checkpoint's
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Class to explain instead of the predicted one
        #[arg(long, value_name = "INDEX")]
        target_class: Option<usize>,

        /// Target layer override
        #[arg(long, value_name = "NAME")]
        layer: Option<String>,

        /// Heatmap weight in blended pixels
        #[arg(long, value_name = "ALPHA")]
        alpha: Option<f32>,

        /// Saliency at or below this is not blended
        #[arg(long, value_name = "VALUE")]
        threshold: Option<f32>,

        /// Print the prediction as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
    /// Write a freshly initialized checkpoint
    Init {
        /// Checkpoint path without extension
        #[arg(long, value_name = "STEM")]
        output: PathBuf,

        /// Class labels in logit order
        #[arg(long, value_delimiter = ',', value_name = "LABELS")]
        labels: Option<Vec<String>>,

        /// Stem width (64 for ResNet-18)
        #[arg(long, default_value = "64", value_name = "WIDTH")]
        base_width: usize,

        /// Overwrite an existing checkpoint
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// List the classifier's layers
    Layers {
        /// Checkpoint path without extension; the default architecture if omitted
        #[arg(long, value_name = "STEM")]
        checkpoint: Option<PathBuf>,
    },
    /// List class labels
    Labels {
        /// Checkpoint path without extension; the default labels if omitted
        #[arg(long, value_name = "STEM")]
        checkpoint: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Analyze {
            checkpoint,
            image,
            output,
            heatmap,
            config,
            target_class,
            layer,
            alpha,
            threshold,
            json,
        } => {
            let overrides = Overrides {
                layer,
                alpha,
                threshold,
            };
            let outputs = Outputs {
                overlay: output,
                heatmap,
                json,
            };
            handle_analyze(&checkpoint, &image, config.as_deref(), target_class, overrides, outputs)
        }
        Commands::Init {
            output,
            labels,
            base_width,
            force,
        } => handle_init(&output, labels, base_width, force),
        Commands::Layers { checkpoint } => handle_layers(checkpoint.as_deref()),
        Commands::Labels { checkpoint } => handle_labels(checkpoint.as_deref()),
    }
}

struct Overrides {
    layer: Option<String>,
    alpha: Option<f32>,
    threshold: Option<f32>,
}

struct Outputs {
    overlay: PathBuf,
    heatmap: Option<PathBuf>,
    json: bool,
}

fn load_model(stem: &Path) -> Result<(ChestXRayNet<AnalysisBackend>, CheckpointMetadata)> {
    let device = Default::default();
    load_classifier::<AnalysisBackend>(stem, &device)
        .with_context(|| format!("Failed to load checkpoint {}", stem.display()))
}

fn handle_analyze(
    checkpoint: &Path,
    image_path: &Path,
    config_path: Option<&Path>,
    target_class: Option<usize>,
    overrides: Overrides,
    outputs: Outputs,
) -> Result<()> {
    let (model, metadata) = load_model(checkpoint)?;

    let mut config = match config_path {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => AnalysisConfig::default().with_labels(metadata.labels.clone()),
    };
    if let Some(layer) = overrides.layer {
        config = config.with_target_layer(layer);
    }
    if let Some(alpha) = overrides.alpha {
        config = config.with_alpha(alpha);
    }
    if let Some(threshold) = overrides.threshold {
        config = config.with_threshold(threshold);
    }

    let analyzer = Analyzer::new(model, config).context("Invalid analysis settings")?;
    let (image, dicom) = if is_dicom_path(image_path) {
        let (image, metadata) = RawImage::open_dicom(image_path)
            .with_context(|| format!("Failed to read DICOM {}", image_path.display()))?;
        (image, Some(metadata))
    } else {
        let image = RawImage::open(image_path)
            .with_context(|| format!("Failed to read image {}", image_path.display()))?;
        (image, None)
    };
    tracing::info!(
        image = %image_path.display(),
        shape = %image.shape(),
        "Loaded image"
    );

    let report = match analyzer.analyze(&image, target_class) {
        Ok(report) => report,
        Err(err) if err.is_input_error() => {
            bail!("Analysis could not run on {}: {err}", image_path.display())
        }
        Err(err) => {
            return Err(anyhow::Error::new(err)
                .context(format!("Analysis of {} failed", image_path.display())))
        }
    };

    report
        .save_overlay(&outputs.overlay)
        .with_context(|| format!("Failed to write {}", outputs.overlay.display()))?;
    if let Some(path) = &outputs.heatmap {
        report
            .save_heatmap(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let prediction = &report.prediction;
    if outputs.json {
        println!("{}", serde_json::to_string_pretty(prediction)?);
        return Ok(());
    }

    if let Some(metadata) = &dicom {
        for (name, value) in metadata.entries() {
            println!("{name:<12} {value}");
        }
    }
    println!(
        "Prediction: {} ({:.1}% confidence)",
        prediction.label,
        prediction.confidence * 100.0
    );
    for (label, probability) in prediction.ranked(&analyzer.config().labels) {
        println!("  {:<12} {:>6.2}%", label, probability * 100.0);
    }
    println!(
        "Explained class {} at {}; overlay written to {}",
        report.saliency.target_class(),
        report.saliency.layer(),
        outputs.overlay.display()
    );
    if report.saliency.is_degenerate() {
        println!("Note: the saliency map is empty; no region supports this class.");
    }
    Ok(())
}

fn handle_init(
    stem: &Path,
    labels: Option<Vec<String>>,
    base_width: usize,
    force: bool,
) -> Result<()> {
    let labels = labels.unwrap_or_else(default_labels);
    if labels.is_empty() {
        bail!("At least one label is required");
    }

    let (weights, meta) = checkpoint_paths(stem);
    if !force && (weights.exists() || meta.exists()) {
        bail!(
            "Checkpoint {} already exists; pass --force to overwrite",
            stem.display()
        );
    }
    if let Some(parent) = stem.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let config = ClassifierConfig::new(labels.len()).with_base_width(base_width);
    config.validate()?;

    let device = Default::default();
    let model = config.init::<NdArray>(&device);
    let metadata = CheckpointMetadata::new(config, labels).with_extra("weights", "untrained");
    save_classifier(&model, &metadata, stem)
        .with_context(|| format!("Failed to write checkpoint {}", stem.display()))?;

    println!("Initialized untrained checkpoint:");
    println!("  weights:  {}", weights.display());
    println!("  metadata: {}", meta.display());
    println!("Predictions from untrained weights are not meaningful.");
    Ok(())
}

fn handle_layers(checkpoint: Option<&Path>) -> Result<()> {
    let model = match checkpoint {
        Some(stem) => load_model(stem)?.0,
        None => ClassifierConfig::default().init::<AnalysisBackend>(&Default::default()),
    };

    println!("{:<10} {:<6} attributable", "layer", "rank");
    for layer in model.layers() {
        let marker = if layer.is_spatial() { "yes" } else { "no" };
        let default = if layer.name == model.default_target_layer() {
            " (default)"
        } else {
            ""
        };
        println!(
            "{:<10} {:<6} {}{}",
            layer.name, layer.output_rank, marker, default
        );
    }
    Ok(())
}

fn handle_labels(checkpoint: Option<&Path>) -> Result<()> {
    let labels = match checkpoint {
        Some(stem) => {
            let (_, meta) = checkpoint_paths(stem);
            CheckpointMetadata::load(&meta)
                .with_context(|| format!("Failed to read {}", meta.display()))?
                .labels
        }
        None => default_labels(),
    };

    for (index, label) in labels.iter().enumerate() {
        println!("{index}: {label}");
    }
    Ok(())
}
