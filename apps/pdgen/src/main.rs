mod batch;
mod config;
mod errors;
mod generation;
mod llm_client;
mod seo;

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::batch::backoff::{Pacer, RetryPolicy};
use crate::batch::output::ProductDocument;
use crate::batch::row::{generate_document, GenerateOptions};
use crate::batch::state::RowTracker;
use crate::batch::{run_batch, BatchOptions};
use crate::config::Config;
use crate::errors::AppError;
use crate::generation::features::ProductInput;
use crate::llm_client::LlmClient;
use crate::seo::SeoMode;

#[derive(Debug, Parser)]
#[command(name = "pdgen", version, about = "Generate SEO product descriptions with an LLM")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate descriptions for every row of a CSV file
    Batch(BatchArgs),
    /// Generate a description for a single product and print it
    Generate(GenerateArgs),
}

/// Options shared by both subcommands.
#[derive(Debug, Args)]
struct ModelArgs {
    /// Overrides OPENAI_MODEL
    #[arg(long)]
    model: Option<String>,
    /// Overrides OPENAI_MAX_TOKENS
    #[arg(long)]
    max_tokens: Option<u32>,
    /// Request timeout in seconds; overrides OPENAI_TIMEOUT_SECS
    #[arg(long)]
    timeout: Option<u64>,
    /// Only compute title/meta lengths, skip keyword analysis
    #[arg(long)]
    fast: bool,
    /// Trim title/meta to their limits and add the primary keyword to the title
    #[arg(long)]
    auto_fix: bool,
    /// Retries per row after the first attempt
    #[arg(long, default_value_t = 5)]
    max_retries: u32,
    /// Base backoff in seconds, doubled per failed attempt
    #[arg(long, default_value_t = 2.0)]
    backoff_base: f64,
    /// Upper bound for any single backoff or cooldown, in seconds
    #[arg(long, default_value_t = 60.0)]
    max_backoff: f64,
}

#[derive(Debug, Args)]
struct BatchArgs {
    /// Input CSV with `name` and `features` columns
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "outputs")]
    out: PathBuf,
    /// Seconds to wait between rows
    #[arg(long, default_value_t = 1.0)]
    delay: f64,
    #[arg(long, default_value_t = 0)]
    start: usize,
    /// Maximum rows to process (0 = all)
    #[arg(long, default_value_t = 0)]
    max: usize,
    /// Multiplier applied to the row delay after each rate-limit error
    #[arg(long, default_value_t = 1.5)]
    delay_increase_factor: f64,
    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    name: String,
    /// Features separated by `;`, `|`, newlines or commas
    #[arg(long)]
    features: String,
    #[arg(long, default_value = "")]
    category: String,
    #[arg(long, default_value = "")]
    audience: String,
    /// Comma-separated target keywords
    #[arg(long, default_value = "")]
    keywords: String,
    #[command(flatten)]
    model: ModelArgs,
}

impl ModelArgs {
    fn generate_options(&self) -> Result<GenerateOptions, AppError> {
        Ok(GenerateOptions {
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base: seconds("--backoff-base", self.backoff_base)?,
                cap: seconds("--max-backoff", self.max_backoff)?,
                ..RetryPolicy::default()
            },
            seo_mode: if self.fast { SeoMode::Fast } else { SeoMode::Full },
            auto_fix: self.auto_fix,
        })
    }
}

fn seconds(flag: &str, value: f64) -> Result<Duration, AppError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| AppError::Config(format!("{flag} must be a non-negative number, got {value}")))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("{err}");
        eprintln!("pdgen: {err}");
        std::process::exit(err.exit_code());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let model_args = match &cli.command {
        Command::Batch(args) => &args.model,
        Command::Generate(args) => &args.model,
    };

    // Configuration first: a missing credential aborts before any row.
    let config = Config::from_env()
        .map_err(|e| AppError::Config(format!("{e:#}")))?
        .with_overrides(
            model_args.model.clone(),
            model_args.max_tokens,
            model_args.timeout,
        );

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting pdgen v{}", env!("CARGO_PKG_VERSION"));

    let llm = LlmClient::new(config.model.clone())
        .map_err(|e| AppError::Config(format!("cannot build HTTP client: {e}")))?;
    info!("LLM client initialized (model: {})", llm.model());

    match cli.command {
        Command::Batch(args) => {
            let options = BatchOptions {
                input: args.input,
                out_dir: args.out,
                start: args.start,
                max: args.max,
                delay: seconds("--delay", args.delay)?,
                delay_increase_factor: args.delay_increase_factor,
                generate: args.model.generate_options()?,
            };

            let started = Utc::now();
            let report = run_batch(&llm, &options).await?;
            let elapsed = Utc::now() - started;

            println!(
                "{} rows in input: {} processed ({} ok, {} failed), {} skipped in {}s",
                report.total_rows,
                report.processed,
                report.succeeded,
                report.failed,
                report.skipped,
                elapsed.num_seconds()
            );
        }
        Command::Generate(args) => {
            let product = ProductInput::from_raw(
                0,
                &args.name,
                &args.features,
                &args.category,
                &args.audience,
                &args.keywords,
            );
            let options = args.model.generate_options()?;
            options.validate()?;
            let mut pacer = Pacer::new(Duration::ZERO, 1.0, options.retry.cap);
            let mut tracker = RowTracker::new(product.index);

            let (result, seo_report) =
                generate_document(&llm, &product, &options, &mut pacer, &mut tracker)
                    .await
                    .map_err(|e| anyhow::anyhow!("generation failed for '{}': {e}", product.name))?;

            let document = ProductDocument {
                result: &result,
                seo_report: &seo_report,
            };
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
    }

    Ok(())
}
