use anyhow::Context;
use clap::Parser;
use prompt_docs::{CollisionPolicy, Config, Pipeline, Settings};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "prompt-docs",
    version,
    author,
    about = "Answer a batch of prompts with an LLM and save each answer as a .docx",
    long_about = "Answer a batch of prompts with an LLM and save each answer as a .docx.\n\n\
    Every row of the input CSV contributes its first column as a prompt. Each prompt is \
    sent together with the system instruction to an OpenAI-compatible chat completions \
    API, and the answer is written to <out>/<prompt>.docx.\n\n\
    USAGE EXAMPLES:\n  \
      # Use input.csv, system_prompt.txt and config.toml from the current directory\n  \
      prompt-docs\n\n  \
      # Four concurrent requests, custom output directory\n  \
      prompt-docs --workers 4 --out ./docs\n\n  \
      # Check what would be generated without calling the API\n  \
      prompt-docs --input topics.csv --dry-run"
)]
struct Cli {
    /// CSV file whose first column holds the prompts
    #[arg(short, long, default_value = "input.csv", value_name = "FILE")]
    input: PathBuf,

    /// Text file holding the system instruction
    #[arg(short, long, default_value = "system_prompt.txt", value_name = "FILE")]
    system_prompt: PathBuf,

    /// Settings file with an [openai] section (api_key, model)
    #[arg(short, long, default_value = "config.toml", value_name = "FILE")]
    config: PathBuf,

    /// Output directory for generated documents
    #[arg(short, long, default_value = "articles", value_name = "PATH")]
    out: PathBuf,

    /// Number of concurrent requests
    #[arg(short, long, default_value_t = 2)]
    workers: usize,

    /// Model identifier (overrides the settings file)
    #[arg(short, long)]
    model: Option<String>,

    /// API key (overrides the settings file)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// What to do when two prompts map to the same file name
    #[arg(long, value_enum, default_value = "overwrite")]
    on_collision: CliCollision,

    /// Write summary.json into the output directory
    #[arg(long)]
    summary: bool,

    /// Dry run (no requests, no file writes)
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliCollision {
    /// Later answers replace earlier ones
    Overwrite,
    /// Later answers get a " (2)", " (3)", ... suffix
    Suffix,
}

impl From<CliCollision> for CollisionPolicy {
    fn from(c: CliCollision) -> Self {
        match c {
            CliCollision::Overwrite => Self::Overwrite,
            CliCollision::Suffix => Self::Suffix,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_tracing(cli.verbose)?;

    let mut builder = Config::builder();

    // Model and key may come from flags and the environment instead;
    // validation reports whatever is still missing.
    match Settings::load(&cli.config) {
        Ok(settings) => builder = builder.settings(settings),
        Err(e) if e.is_not_found() => {
            tracing::debug!("No settings file at {}", cli.config.display());
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to load settings from {}", cli.config.display())
            });
        }
    }

    builder = builder
        .input_path(cli.input)
        .instruction_path(cli.system_prompt)
        .output_dir(cli.out)
        .workers(cli.workers)
        .collision_policy(cli.on_collision.into())
        .write_summary(cli.summary)
        .dry_run(cli.dry_run);

    if let Some(model) = cli.model {
        builder = builder.model(model);
    }

    if let Some(key) = cli.api_key {
        builder = builder.api_key(key);
    }

    let config = builder.build().context("Failed to build configuration")?;

    let stats = Pipeline::new(config)
        .context("Failed to create pipeline")?
        .run()
        .context("Batch execution failed")?;

    stats.print_summary();

    Ok(())
}

fn setup_tracing(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => EnvFilter::new("prompt_docs=info"),
        1 => EnvFilter::new("prompt_docs=debug"),
        _ => EnvFilter::new("prompt_docs=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .init();

    Ok(())
}
