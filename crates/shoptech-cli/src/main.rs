//! Shoptech CLI - shop platform detection over URL lists
//!
//! ## Commands
//!
//! - `run`: evaluate a CSV or TXT list and write JSONL + CSV results
//! - `evaluate`: evaluate a single URL and print the record as JSON

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use shoptech_core::{EvaluationInput, ServiceTier};
use shoptech_runtime::sink::RecordContext;
use shoptech_runtime::{
    BatchRunner, EvaluationOrchestrator, OutputPaths, OutputRecord, ProviderRegistry,
    RubricTemplate, RunConfig, RuntimeConfig,
};

mod input;

use input::{load_inputs, CsvColumns, InputFormat};

#[derive(Parser)]
#[command(name = "shoptech")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Detect the shop platform behind website URLs", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML runtime configuration; flags override its values
    #[arg(long, global = true, env = "SHOPTECH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a list of URLs and write JSONL + CSV results
    Run(RunArgs),

    /// Evaluate one URL and print the record
    Evaluate {
        /// Website URL or domain
        url: String,

        #[command(flatten)]
        service: ServiceArgs,
    },
}

/// Reasoning-service settings shared by both commands.
#[derive(Args, Debug)]
struct ServiceArgs {
    /// Reasoning provider: openai or gemini
    #[arg(long, env = "SHOPTECH_PROVIDER")]
    provider: Option<String>,

    /// Model name
    #[arg(long, env = "SHOPTECH_MODEL")]
    model: Option<String>,

    /// Rubric file appended to the system prompt
    #[arg(long, env = "SHOPTECH_RUBRIC_FILE")]
    rubric_file: Option<PathBuf>,

    /// Tool-call ceiling for the primary attempt
    #[arg(long, env = "SHOPTECH_MAX_TOOL_CALLS")]
    max_tool_calls: Option<u32>,

    /// Tool-call ceiling for the disambiguation retry
    #[arg(long, env = "SHOPTECH_RETRY_MAX_TOOL_CALLS")]
    retry_max_tool_calls: Option<u32>,

    /// Retry once with disambiguation when confidence is low
    #[arg(long)]
    retry_on_low_confidence: bool,

    /// Allow a second query inside the primary attempt when evidence is unclear
    #[arg(long)]
    second_query_on_uncertainty: bool,

    /// Service tier: auto or flex
    #[arg(long, env = "SHOPTECH_SERVICE_TIER")]
    service_tier: Option<ServiceTier>,

    /// Retries after a flex "resource unavailable" rejection
    #[arg(long, env = "SHOPTECH_FLEX_MAX_RETRIES")]
    flex_max_retries: Option<u32>,

    /// Fall back to the standard tier once flex retries are exhausted
    #[arg(long)]
    flex_fallback_to_auto: bool,

    /// Per-attempt timeout in seconds
    #[arg(long, env = "SHOPTECH_TIMEOUT_SECONDS")]
    timeout: Option<u64>,

    /// Send a prompt cache key for the static prefix
    #[arg(long)]
    prompt_cache: bool,

    /// Prompt cache retention: in-memory or 24h
    #[arg(long, env = "SHOPTECH_PROMPT_CACHE_RETENTION")]
    prompt_cache_retention: Option<String>,

    /// Reasoning effort: none, minimal, low, medium, high, xhigh
    #[arg(long, env = "SHOPTECH_REASONING_EFFORT")]
    reasoning_effort: Option<String>,

    /// Ask for a `sources` list in each payload
    #[arg(long)]
    include_sources: bool,

    /// Custom API base URL of the provider
    #[arg(long, env = "SHOPTECH_BASE_URL")]
    base_url: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Input file (CSV or TXT)
    #[arg(long, env = "SHOPTECH_INPUT")]
    input: PathBuf,

    #[arg(long, value_enum, default_value_t = InputFormat::Auto, env = "SHOPTECH_INPUT_FORMAT")]
    format: InputFormat,

    /// CSV delimiter override (auto-detected from the header by default)
    #[arg(long, env = "SHOPTECH_CSV_DELIMITER")]
    csv_delimiter: Option<char>,

    /// CSV column holding the URL
    #[arg(long, default_value = "Website", env = "SHOPTECH_URL_COLUMN")]
    url_column: String,

    /// CSV column holding the display name ('-' disables)
    #[arg(long, default_value = "Firma", env = "SHOPTECH_NAME_COLUMN")]
    name_column: String,

    /// CSV column holding a bucket label ('-' disables)
    #[arg(long, default_value = "bucket", env = "SHOPTECH_BUCKET_COLUMN")]
    bucket_column: String,

    /// Evaluate a random subset of N inputs
    #[arg(long, env = "SHOPTECH_RANDOM_SAMPLE")]
    random_sample: Option<usize>,

    /// Seed for --random-sample
    #[arg(long, default_value_t = 42, env = "SHOPTECH_SAMPLE_SEED")]
    seed: u64,

    /// Write the selected URLs to this file
    #[arg(long)]
    sample_list: Option<PathBuf>,

    /// Keep repeated inputs instead of dropping them
    #[arg(long)]
    no_dedupe: bool,

    /// Evaluate at most N inputs
    #[arg(long, env = "SHOPTECH_LIMIT")]
    limit: Option<usize>,

    /// Append to --out and skip inputs already present in it
    #[arg(long)]
    resume: bool,

    /// JSONL output path
    #[arg(long)]
    out: Option<PathBuf>,

    /// CSV output path (defaults to --out with a .csv extension)
    #[arg(long)]
    out_csv: Option<PathBuf>,

    /// Directory for timestamped output files
    #[arg(long, default_value = "outputs", env = "SHOPTECH_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Suffix for timestamped output file names
    #[arg(short, long)]
    suffix: Option<String>,

    /// Seconds to wait between evaluations
    #[arg(long, default_value = "0.5", env = "SHOPTECH_SLEEP_SECONDS", value_parser = parse_seconds)]
    sleep: Duration,

    /// Log progress every N evaluated inputs
    #[arg(long, default_value_t = 25)]
    progress_every: usize,

    /// Abort on the first failed evaluation instead of writing a degraded row
    #[arg(long)]
    stop_on_error: bool,

    /// Include attempt details and citations in JSONL
    #[arg(long)]
    debug: bool,

    #[command(flatten)]
    service: ServiceArgs,
}

fn init_tracing(level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

fn optional_column(name: &str) -> Option<String> {
    let name = name.trim();
    (!name.is_empty() && name != "-").then(|| name.to_string())
}

/// Load the YAML config (if any) and apply flag overrides.
fn runtime_config(path: Option<&PathBuf>, args: &ServiceArgs) -> Result<RuntimeConfig> {
    let mut config = match path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    if let Some(provider) = &args.provider {
        config.set_provider(provider.trim().to_lowercase());
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if args.max_tool_calls.is_some() {
        config.max_tool_calls = args.max_tool_calls;
    }
    if let Some(n) = args.retry_max_tool_calls {
        config.retry.max_tool_calls = n;
    }
    if args.retry_on_low_confidence {
        config.retry.disambiguation_on_low_confidence = true;
    }
    if args.second_query_on_uncertainty {
        config.second_query_on_uncertainty = true;
    }
    if let Some(tier) = args.service_tier {
        config.service_tier = tier;
    }
    if let Some(n) = args.flex_max_retries {
        config.flex.max_retries = n;
    }
    if args.flex_fallback_to_auto {
        config.flex.fallback_to_auto = true;
    }
    if let Some(secs) = args.timeout {
        config.timeout = Some(Duration::from_secs(secs));
    }
    if args.prompt_cache {
        config.prompt_cache.enabled = true;
    }
    if args.prompt_cache_retention.is_some() {
        config.prompt_cache.retention = args.prompt_cache_retention.clone();
    }
    if args.reasoning_effort.is_some() {
        config.reasoning_effort = args.reasoning_effort.clone();
    }
    if args.include_sources {
        config.include_sources = true;
    }

    config.validate()?;
    Ok(config)
}

fn build_orchestrator(config: RuntimeConfig, args: &ServiceArgs) -> Result<EvaluationOrchestrator> {
    let mut provider_config = serde_json::json!({});
    if let Some(url) = &args.base_url {
        provider_config["base_url"] = serde_json::Value::String(url.clone());
    }

    let registry = ProviderRegistry::with_defaults();
    registry.validate(&config.provider, &provider_config)?;
    let provider = registry.create(&config.provider, &provider_config)?;

    let rubric = match &args.rubric_file {
        Some(path) => RubricTemplate::from_file(path)
            .with_context(|| format!("Failed to read rubric {}", path.display()))?,
        None => RubricTemplate::default(),
    };

    tracing::info!(
        provider = provider.name(),
        model = %config.model,
        tier = %config.service_tier,
        rubric = %rubric.label,
        "Configured evaluation"
    );

    Ok(EvaluationOrchestrator::builder()
        .provider(provider)
        .config(config)
        .rubric(rubric)
        .build()?)
}

/// Parse a non-negative, finite number of seconds.
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration '{value}': {e}"))
}

fn output_paths(args: &RunArgs) -> Result<OutputPaths> {
    let paths = match (&args.out, &args.out_csv) {
        (Some(jsonl), Some(csv)) => OutputPaths::new(jsonl, csv),
        (Some(jsonl), None) => OutputPaths::new(jsonl, jsonl.with_extension("csv")),
        (None, Some(csv)) => OutputPaths::new(csv.with_extension("jsonl"), csv),
        (None, None) => {
            if args.resume {
                bail!("--resume needs --out (or --out-csv) pointing at the run to continue");
            }
            OutputPaths::timestamped(&args.output_dir, args.suffix.as_deref(), chrono::Local::now())
        }
    };
    Ok(paths)
}

async fn cmd_run(args: RunArgs, config_path: Option<&PathBuf>) -> Result<()> {
    let config = runtime_config(config_path, &args.service)?;
    let paths = output_paths(&args)?;

    let delimiter = match args.csv_delimiter {
        Some(c) if c.is_ascii() => Some(c as u8),
        Some(c) => bail!("CSV delimiter must be a single ASCII character, got '{}'", c),
        None => None,
    };
    let columns = CsvColumns {
        url: args.url_column.clone(),
        name: optional_column(&args.name_column),
        bucket: optional_column(&args.bucket_column),
    };
    let inputs = load_inputs(&args.input, args.format, delimiter, &columns)?;
    tracing::info!(path = %args.input.display(), rows = inputs.len(), "Loaded inputs");

    let run_config = RunConfig {
        dedupe: !args.no_dedupe,
        resume: args.resume,
        random_sample: args.random_sample,
        seed: args.seed,
        limit: args.limit,
        continue_on_error: !args.stop_on_error,
        delay: args.sleep,
        progress_every: args.progress_every,
        debug: args.debug,
        sample_list: args.sample_list.clone(),
        ..RunConfig::new(paths.clone())
    };

    let runner = BatchRunner::new(build_orchestrator(config, &args.service)?);
    let stop = runner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current input");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let summary = runner.run(inputs, &run_config).await?;

    println!("JSONL: {}", paths.jsonl.display());
    println!("CSV:   {}", paths.csv.display());
    println!(
        "Evaluated {} ({} errors), skipped {} resumed / {} duplicate / {} invalid, cost ${:.4}{}",
        summary.written(),
        summary.errored,
        summary.skipped_resumed,
        summary.skipped_duplicate,
        summary.skipped_invalid,
        summary.cost.total_usd(),
        if summary.interrupted { " (interrupted)" } else { "" }
    );
    Ok(())
}

async fn cmd_evaluate(url: &str, args: &ServiceArgs, config_path: Option<&PathBuf>) -> Result<()> {
    let config = runtime_config(config_path, args)?;
    let model = config.model.clone();
    let orchestrator = build_orchestrator(config, args)?;

    let input = EvaluationInput::new(url);
    let result = orchestrator.evaluate(&input).await?;
    let ctx = RecordContext {
        run_id: "adhoc".to_string(),
        model,
        debug: true,
    };
    let record = OutputRecord::from_result(&result, &ctx);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(level);

    match cli.command {
        Commands::Run(args) => cmd_run(args, cli.config.as_ref()).await,
        Commands::Evaluate { url, service } => {
            cmd_evaluate(&url, &service, cli.config.as_ref()).await
        }
    }
}
