use std::path::PathBuf;

use candle_core::{DType, Device};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use implicit_tokens::aligner::{AlignerWeights, SpanLocator};
use implicit_tokens::config::{
    AlignerConfig, GenerationConfig, PromptConfig, RunConfig, SamplingConfig, TrainingConfig,
};
use implicit_tokens::data::{
    build_labels, download_problems, label_records, load_problems, prepare_example, CotRecord,
    Dataset, DatasetDict, PromptTemplate, TrajectoryCollector,
};
use implicit_tokens::engine::Qwen3Generator;
use implicit_tokens::model::{load_config, load_safetensors, resolve_model, Qwen3ForCausalLM};
use implicit_tokens::tokenizer::{HfTokenizer, TextTokenizer};
use implicit_tokens::train::{load_base_model, AlignmentModel, ParameterStore, Trainer};
use implicit_tokens::{Error, Result};

const DEFAULT_MODEL: &str = "Qwen/Qwen3-0.6B";

#[derive(Parser, Debug)]
#[command(name = "implicit-tokens", version)]
#[command(about = "Compress chain-of-thought into learned implicit tokens")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect reasoning trajectories for a problem set
    Generate(GenerateArgs),
    /// Concatenate datasets and split them into train/test
    Merge(MergeArgs),
    /// Train the aligner (and optionally the base model)
    Train(TrainArgs),
    /// Show the reasoning region located in one prepared example
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Model directory or HuggingFace model ID
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Hub revision
    #[arg(long, default_value = "main")]
    revision: String,

    /// Run on CPU even if an accelerator is available
    #[arg(long)]
    cpu: bool,

    /// Weight dtype (f32, bf16, f16)
    #[arg(long, default_value = "f32", value_parser = parse_dtype)]
    dtype: DType,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Local problems (JSONL file or saved dataset directory)
    #[arg(long, conflicts_with = "dataset_repo")]
    problems: Option<PathBuf>,

    /// Hub dataset repository holding the problems
    #[arg(long, requires = "dataset_file")]
    dataset_repo: Option<String>,

    /// JSONL file inside the Hub dataset repository
    #[arg(long)]
    dataset_file: Option<String>,

    /// Output dataset directory
    #[arg(short, long)]
    output: PathBuf,

    /// Accepted samples per problem
    #[arg(short = 'k', long, default_value = "1")]
    samples_per_problem: usize,

    /// Generation rounds per problem
    #[arg(long, default_value = "3")]
    max_retries: usize,

    #[arg(long, default_value = "0")]
    split_start: usize,

    #[arg(long)]
    split_end: Option<usize>,

    #[arg(long, default_value = "0.6")]
    temperature: f32,

    #[arg(long, default_value = "8192")]
    max_tokens: usize,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Saved dataset directories to concatenate
    #[arg(short, long, num_args = 2.., required = true)]
    inputs: Vec<PathBuf>,

    /// Output dataset-dict directory
    #[arg(short, long)]
    output: PathBuf,

    /// Fraction of rows held out for the test split
    #[arg(long, default_value = "0.1")]
    test_size: f64,

    #[arg(long, default_value = "42")]
    seed: u64,
}

#[derive(Args, Debug)]
struct AlignerArgs {
    /// Number of implicit tokens (k)
    #[arg(long, default_value = "4")]
    num_implicit_tokens: usize,

    /// Cross-attention heads
    #[arg(long, default_value = "8")]
    num_heads: usize,

    /// Occurrence of the open tag that starts the reasoning region (0-based)
    #[arg(long, default_value = "2")]
    open_tag_occurrence: usize,
}

impl AlignerArgs {
    fn to_config(&self) -> AlignerConfig {
        AlignerConfig {
            num_implicit_tokens: self.num_implicit_tokens,
            num_heads: self.num_heads,
            open_tag_occurrence_index: self.open_tag_occurrence,
        }
    }
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    aligner: AlignerArgs,

    /// Dataset-dict directory with `train` and `test` splits
    #[arg(short, long)]
    dataset: PathBuf,

    /// Checkpoint and metrics directory
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value = "3")]
    epochs: usize,

    #[arg(long, default_value = "4")]
    batch_size: usize,

    #[arg(long, default_value = "5e-5")]
    learning_rate: f64,

    #[arg(long, default_value = "0.01")]
    weight_decay: f64,

    #[arg(long, default_value = "10")]
    logging_steps: usize,

    /// Keep the base model frozen and train only the aligner
    #[arg(long)]
    freeze_base: bool,

    #[arg(long, default_value = "42")]
    seed: u64,
}

#[derive(Args, Debug)]
struct InspectArgs {
    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    aligner: AlignerArgs,

    /// Dataset-dict directory
    #[arg(short, long)]
    dataset: PathBuf,

    #[arg(long, default_value = "test")]
    split: String,

    #[arg(long, default_value = "0")]
    index: usize,
}

fn parse_dtype(s: &str) -> std::result::Result<DType, String> {
    match s {
        "f32" => Ok(DType::F32),
        "bf16" => Ok(DType::BF16),
        "f16" => Ok(DType::F16),
        other => Err(format!("unsupported dtype '{other}'")),
    }
}

fn select_device(cpu: bool) -> Result<Device> {
    if cpu {
        return Ok(Device::Cpu);
    }
    if candle_core::utils::cuda_is_available() {
        return Ok(Device::new_cuda(0)?);
    }
    if candle_core::utils::metal_is_available() {
        return Ok(Device::new_metal(0)?);
    }
    Ok(Device::Cpu)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Generate(args) => generate(args),
        Command::Merge(args) => merge(args),
        Command::Train(args) => train(args),
        Command::Inspect(args) => inspect(args),
    }
}

fn generate(args: GenerateArgs) -> Result<()> {
    let problems_path = match (&args.problems, &args.dataset_repo, &args.dataset_file) {
        (Some(path), _, _) => path.clone(),
        (None, Some(repo), Some(file)) => download_problems(repo, file)?,
        _ => {
            return Err(Error::Config(
                "pass --problems or --dataset-repo with --dataset-file".to_string(),
            ))
        }
    };
    let problems = load_problems(&problems_path)?;

    let device = select_device(args.model.cpu)?;
    let files = resolve_model(&args.model.model, &args.model.revision)?;
    let config = load_config(&files.config)?;
    let tokenizer = HfTokenizer::from_file(&files.tokenizer, None)?;
    let vb = load_safetensors(&files.weights, args.model.dtype, &device)?;
    let model = Qwen3ForCausalLM::new(&config, vb)?;
    info!("loaded {} on {device:?}", args.model.model);

    let generation = GenerationConfig {
        samples_per_problem: args.samples_per_problem,
        max_retries: args.max_retries,
        split_start: args.split_start,
        split_end: args.split_end,
        sampling: SamplingConfig {
            temperature: args.temperature,
            max_tokens: args.max_tokens,
            ..SamplingConfig::default()
        },
        seed: args.seed,
    };
    let generator = Qwen3Generator::new(model, tokenizer, args.seed);
    let mut collector =
        TrajectoryCollector::new(generator, PromptTemplate::default(), generation);
    let (records, stats) = collector.collect(&problems)?;

    Dataset::from_records_with_features(&records, &CotRecord::FIELDS)?.save_to_disk(&args.output)?;
    println!(
        "Saved {} records to {} ({} completions, {} rejected, {} failed rounds, {} problems incomplete)",
        records.len(),
        args.output.display(),
        stats.completions,
        stats.rejected,
        stats.failed_rounds,
        stats.incomplete_problems
    );
    Ok(())
}

fn merge(args: MergeArgs) -> Result<()> {
    let datasets = args
        .inputs
        .iter()
        .map(|dir| Dataset::load_from_disk(dir))
        .collect::<Result<Vec<_>>>()?;
    let merged = Dataset::concatenate(&datasets)?;
    let dict = merged.train_test_split(args.test_size, args.seed)?;
    dict.save_to_disk(&args.output)?;

    println!(
        "Merged {} rows into {} (train {}, test {})",
        merged.len(),
        args.output.display(),
        dict.split("train")?.len(),
        dict.split("test")?.len()
    );
    Ok(())
}

fn check_ordinal(template: &PromptTemplate, aligner: &AlignerConfig) {
    let prefix_tags = template.open_tags_in_prefix();
    if prefix_tags != aligner.open_tag_occurrence_index {
        warn!(
            "prompt prefix contains {prefix_tags} open tags but the aligner starts at occurrence {}",
            aligner.open_tag_occurrence_index
        );
    }
}

fn load_split(dict: &DatasetDict, name: &str) -> Result<Vec<CotRecord>> {
    dict.split(name)?.records()
}

fn train(args: TrainArgs) -> Result<()> {
    let device = select_device(args.model.cpu)?;
    let dtype = args.model.dtype;
    let prompt = PromptConfig::default();
    let template = PromptTemplate::new(prompt.clone());
    let aligner_config = args.aligner.to_config();
    check_ordinal(&template, &aligner_config);

    let files = resolve_model(&args.model.model, &args.model.revision)?;
    let model_config = load_config(&files.config)?;
    let tokenizer = HfTokenizer::from_file(&files.tokenizer, None)?;

    let dict = DatasetDict::load_from_disk(&args.dataset)?;
    let train_examples = label_records(&load_split(&dict, "train")?, &template, &tokenizer);
    let eval_examples = label_records(&load_split(&dict, "test")?, &template, &tokenizer);

    let training = TrainingConfig {
        epochs: args.epochs,
        batch_size: args.batch_size,
        learning_rate: args.learning_rate,
        weight_decay: args.weight_decay,
        logging_steps: args.logging_steps,
        train_base_model: !args.freeze_base,
        seed: args.seed,
    };
    let (base, base_vars) =
        load_base_model(&files, &model_config, training.train_base_model, dtype, &device)?;
    let aligner_weights = AlignerWeights::new();
    let model = AlignmentModel::new(
        base,
        tokenizer,
        &aligner_config,
        &prompt,
        aligner_weights.var_builder(dtype, &device),
    )?;
    let mut params = ParameterStore::new(aligner_weights, base_vars);

    std::fs::create_dir_all(&args.output)?;
    RunConfig {
        model: args.model.model.clone(),
        aligner: aligner_config,
        prompt,
        training: training.clone(),
    }
    .save(&args.output.join("run_config.json"))?;

    let trainer = Trainer::new(training, &args.output);
    let summary = trainer.train(&model, &mut params, &train_examples, &eval_examples)?;
    println!(
        "Best eval loss {:.4} at epoch {} ({} steps); checkpoint in {}",
        summary.best_eval_loss,
        summary.best_epoch,
        summary.steps,
        args.output.join(implicit_tokens::train::BEST_DIR).display()
    );
    Ok(())
}

fn inspect(args: InspectArgs) -> Result<()> {
    let prompt = PromptConfig::default();
    let template = PromptTemplate::new(prompt.clone());
    let aligner_config = args.aligner.to_config();
    check_ordinal(&template, &aligner_config);

    let files = resolve_model(&args.model.model, &args.model.revision)?;
    let tokenizer = HfTokenizer::from_file(&files.tokenizer, None)?;
    let records = load_split(&DatasetDict::load_from_disk(&args.dataset)?, &args.split)?;
    let record = records.get(args.index).ok_or_else(|| {
        Error::Config(format!(
            "index {} out of range for {} records",
            args.index,
            records.len()
        ))
    })?;

    let prepared = prepare_example(record, &template, &tokenizer)?;
    let labeled = build_labels(&prepared, &tokenizer)?;
    let locator = SpanLocator::new(
        tokenizer.convert_tokens_to_ids(&prompt.think_open)?,
        tokenizer.convert_tokens_to_ids(&prompt.think_close)?,
        aligner_config.open_tag_occurrence_index,
    );

    println!("Tokens: {} (prompt {})", labeled.len(), prepared.prompt_length);
    match locator.locate(&labeled.input_ids)? {
        Some(span) => {
            println!("Region: start {} end {} ({} inner tokens)", span.start, span.end, span.inner_len());
            let region = tokenizer.decode(&labeled.input_ids[span.start + 1..span.end])?;
            println!("Decoded region:\n{region}");
        }
        None => println!("No region found; the example passes through unchanged"),
    }
    Ok(())
}
