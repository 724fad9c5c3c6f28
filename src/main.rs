//! emosense CLI - emotion and sentiment recognition for video utterances
//!
//! - `predict`: one utterance of a video
//! - `batch`: a JSON list of utterances of the same video
//! - `params`: parameter counts per component, frozen vs trainable

use anyhow::{Context, Result};
use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use emosense::inference::{Utterance, UtterancePipeline};
use emosense::models::Component;
use emosense::{ArchitectureConfig, ModelLoader, MultimodalSentimentModel, PipelineConfig, VERSION};

/// emosense - multimodal emotion and sentiment recognition
#[derive(Parser, Debug)]
#[command(name = "emosense")]
#[command(author, version, about, long_about = None)]
#[command(long_about = "
Classifies utterances of a video into 7 emotions and 3 sentiments using the
transcript, 30 sampled frames and the log-mel spectrogram of the soundtrack.

Examples:
  # One utterance
  emosense predict --video ep01.mp4 --start 12.0 --end 14.5 --text \"Oh my god!\" \\
      --model-dir checkpoints --tokenizer tokenizer.json

  # Every utterance listed in a JSON file ([{\"start\":..,\"end\":..,\"text\":..}])
  emosense batch --video ep01.mp4 --utterances ep01.json --model-dir checkpoints \\
      --tokenizer tokenizer.json

  # Parameter counts of the architecture
  emosense params
")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pipeline config (YAML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run on the GPU when available
    #[arg(long, global = true)]
    gpu: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify one utterance
    Predict {
        /// Source video
        #[arg(long)]
        video: PathBuf,

        /// Utterance start in seconds
        #[arg(long)]
        start: f64,

        /// Utterance end in seconds
        #[arg(long)]
        end: f64,

        /// Transcript of the utterance
        #[arg(short, long)]
        text: String,

        /// Directory holding model.pth (or model/model.pth)
        #[arg(long, default_value = "checkpoints")]
        model_dir: PathBuf,

        /// HuggingFace tokenizer.json of the text backbone
        #[arg(long, default_value = "tokenizer.json")]
        tokenizer: PathBuf,
    },

    /// Classify every utterance of a JSON list
    Batch {
        /// Source video
        #[arg(long)]
        video: PathBuf,

        /// JSON array of {start, end, text}
        #[arg(short, long)]
        utterances: PathBuf,

        /// Directory holding model.pth (or model/model.pth)
        #[arg(long, default_value = "checkpoints")]
        model_dir: PathBuf,

        /// HuggingFace tokenizer.json of the text backbone
        #[arg(long, default_value = "tokenizer.json")]
        tokenizer: PathBuf,
    },

    /// Report parameter counts per component
    Params {
        /// Count the tensors of trained weights instead of a fresh model
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn create_progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} utterances ({eta})")
            .context("Invalid progress template")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => PipelineConfig::default(),
    };
    if cli.gpu {
        config.device.use_gpu = true;
    }
    Ok(config)
}

fn load_pipeline(config: &PipelineConfig, model_dir: &Path, tokenizer: &Path) -> Result<UtterancePipeline> {
    let start = Instant::now();
    let pipeline = UtterancePipeline::load(config, model_dir, tokenizer)
        .context("Failed to load model")?;
    info!(
        "Model ready in {:.2}s ({:?})",
        start.elapsed().as_secs_f32(),
        pipeline.model().weights_path()
    );
    Ok(pipeline)
}

fn run_predict(
    config: &PipelineConfig,
    video: &Path,
    utterance: Utterance,
    model_dir: &Path,
    tokenizer: &Path,
) -> Result<()> {
    let pipeline = load_pipeline(config, model_dir, tokenizer)?;

    let start = Instant::now();
    let result = pipeline
        .process(video, &utterance)
        .with_context(|| format!("Failed to process {:.2}s-{:.2}s of {:?}", utterance.start, utterance.end, video))?;
    info!("Processed in {:.2}s", start.elapsed().as_secs_f32());

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_batch(
    config: &PipelineConfig,
    video: &Path,
    utterances_path: &Path,
    model_dir: &Path,
    tokenizer: &Path,
) -> Result<()> {
    let content = std::fs::read_to_string(utterances_path)
        .with_context(|| format!("Failed to read {:?}", utterances_path))?;
    let utterances: Vec<Utterance> =
        serde_json::from_str(&content).context("Utterance list must be a JSON array of {start, end, text}")?;
    info!("{} utterances from {:?}", utterances.len(), utterances_path);

    let pipeline = load_pipeline(config, model_dir, tokenizer)?;

    let pb = create_progress_bar(utterances.len())?;
    let start = Instant::now();
    let results = pipeline.process_batch_with(video, &utterances, |_| pb.inc(1));
    pb.finish_and_clear();

    let entries: Vec<serde_json::Value> = utterances
        .iter()
        .zip(&results)
        .map(|(utterance, result)| match result {
            Ok(prediction) => json!({ "ok": prediction }),
            Err(e) => {
                warn!("{:.2}s-{:.2}s failed at {}: {}", utterance.start, utterance.end, e.stage(), e);
                json!({
                    "error": {
                        "start": utterance.start,
                        "end": utterance.end,
                        "stage": e.stage().to_string(),
                        "message": e.to_string(),
                    }
                })
            }
        })
        .collect();

    let failed = results.iter().filter(|r| r.is_err()).count();
    info!(
        "{} of {} utterances classified in {:.2}s",
        results.len() - failed,
        results.len(),
        start.elapsed().as_secs_f32()
    );

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn run_params(config: &PipelineConfig, model_dir: Option<&Path>) -> Result<()> {
    let device = config.device.device()?;

    let report = match model_dir {
        Some(dir) => ModelLoader::new(&device)
            .load(dir)
            .context("Failed to load model")?
            .parameter_report()
            .clone(),
        None => {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let model = MultimodalSentimentModel::new(&ArchitectureConfig::default(), vb)
                .context("Failed to build model")?;
            model.parameters().report_varmap(&varmap)
        }
    };

    println!("{}", report);
    println!();
    println!("{:<22} {:>12}", "component", "lr");
    for component in Component::ALL {
        println!("{:<22} {:>12.0e}", component.prefix(), component.learning_rate());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!("emosense v{}", VERSION);
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Predict {
            video,
            start,
            end,
            text,
            model_dir,
            tokenizer,
        } => run_predict(
            &config,
            video,
            Utterance::new(*start, *end, text.as_str()),
            model_dir,
            tokenizer,
        ),

        Commands::Batch {
            video,
            utterances,
            model_dir,
            tokenizer,
        } => run_batch(&config, video, utterances, model_dir, tokenizer),

        Commands::Params { model_dir } => run_params(&config, model_dir.as_deref()),
    }
}
