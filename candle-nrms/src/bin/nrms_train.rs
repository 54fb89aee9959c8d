use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_nrms::core::{HfTitleTokenizer, TitleTokenizer, TokenizerSource, UnifiedConfigLoader};
use candle_nrms::data::{BatchAssembler, NewsIndex, Sample, SampleBuilder};
use candle_nrms::model_architectures::{DevicePreference, NrmsModel};
use candle_nrms::training::{CheckpointManager, ResumePoint, Trainer};
use candle_nrms::RunConfig;
use candle_core::Device;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nrms-train", about = "Train the NRMS news recommender on MIND-style data")]
struct TrainCli {
    /// Run configuration (model, training, data, device sections)
    #[arg(long, env = "NRMS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Override the checkpoint directory
    #[arg(long, env = "NRMS_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Override the compute device
    #[arg(long, value_enum)]
    device: Option<DeviceArg>,

    /// Start from the latest checkpoint in the checkpoint directory
    #[arg(long, default_value_t = false)]
    resume: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeviceArg {
    Cpu,
    Cuda,
    Auto,
}

impl From<DeviceArg> for DevicePreference {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Cpu => DevicePreference::Cpu,
            DeviceArg::Cuda => DevicePreference::Cuda,
            DeviceArg::Auto => DevicePreference::Auto,
        }
    }
}

fn load_tokenizer(source: &TokenizerSource) -> Result<HfTitleTokenizer> {
    let tokenizer = match source {
        TokenizerSource::File { path } => HfTitleTokenizer::from_file(path)?,
        TokenizerSource::Hub { repo_id } => HfTitleTokenizer::from_pretrained(repo_id)?,
    };
    Ok(tokenizer)
}

fn load_split(
    news: &std::path::Path,
    behaviors: &std::path::Path,
    tokenizer: &dyn TitleTokenizer,
    config: &RunConfig,
) -> Result<Vec<Sample>> {
    let index = NewsIndex::load(
        news,
        tokenizer,
        config.data.max_title_len,
        config.data.include_topics,
    )?;
    let (samples, _stats) = SampleBuilder::new(&index, config.data.max_history).load_samples(behaviors)?;
    Ok(samples)
}

fn initial_model(config: &RunConfig, resume: bool, device: &Device) -> Result<(NrmsModel, Option<ResumePoint>)> {
    if resume {
        let checkpoints = CheckpointManager::new(config.training.checkpoint_dir.clone());
        if let Some(id) = checkpoints.latest()? {
            let metadata = checkpoints.read_metadata(id)?;
            let model = checkpoints
                .load(id, device)
                .with_context(|| format!("loading checkpoint {}", id))?;
            info!("Resuming from checkpoint {} ({} steps done)", id, metadata.global_step);
            return Ok((model, Some(ResumePoint::from(&metadata))));
        }
        info!("No checkpoint in {}, starting fresh", checkpoints.dir().display());
    }
    Ok((NrmsModel::new(config.model.clone(), device)?, None))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = TrainCli::parse();

    let mut config = match &cli.config {
        Some(path) => UnifiedConfigLoader::load_run_config(path)
            .with_context(|| format!("loading run configuration {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(epochs) = cli.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(dir) = cli.checkpoint_dir {
        config.training.checkpoint_dir = dir;
    }
    if let Some(device) = cli.device {
        config.device = device.into();
    }
    config.validate()?;

    let device = config.device.resolve()?;
    let tokenizer = load_tokenizer(&config.data.tokenizer).context("loading title tokenizer")?;
    if tokenizer.vocab_size() > config.model.vocab_size {
        config.model.vocab_size = tokenizer.vocab_size();
        info!("Model vocabulary raised to tokenizer size {}", config.model.vocab_size);
    }

    let train = load_split(&config.data.train_news, &config.data.train_behaviors, &tokenizer, &config)
        .context("building training samples")?;
    let validation = match (&config.data.valid_news, &config.data.valid_behaviors) {
        (Some(news), Some(behaviors)) => {
            Some(load_split(news, behaviors, &tokenizer, &config).context("building validation samples")?)
        }
        _ => None,
    };

    let (model, resume_point) = initial_model(&config, cli.resume, &device)?;
    let assembler = BatchAssembler::new(config.data.max_history, config.data.max_title_len, tokenizer.pad_id());
    let mut trainer = Trainer::new(model, config.training.clone(), assembler)?;
    if let Some(point) = resume_point {
        trainer = trainer.resume_from(point);
    }

    let report = trainer.fit(&train, validation.as_deref())?;
    if report.cancelled {
        info!("Training cancelled");
    }

    info!(
        "Finished {} steps ({} applied, {} skipped), {} failed checkpoint writes",
        report.global_step, report.applied_steps, report.skipped_steps, report.failed_checkpoints
    );
    if let Some(last) = report.epochs.last() {
        if let Some(path) = &last.checkpoint {
            info!("Final checkpoint: {}", path.display());
        }
    }
    Ok(())
}
