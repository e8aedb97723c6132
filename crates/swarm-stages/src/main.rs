use std::path::PathBuf;

use aggregation::Stage;
use anyhow::Result;
use clap::{Parser, Subcommand};
use swarm_stages::config::{ConfigOverrides, StagesConfig};
use swarm_stages::runner::{report_responses, run_stage};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "swarm-stages", version, about = "Build debate stage prompts from JSONL batches")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stage 1: question prompts (built-in questions without --input)
    Stage1 {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Stage 2: critique prompts from stage-1 answers
    Stage2 {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Stage 3: synthesis prompts from stage-2 opinions
    Stage3 {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Record final stage-3 responses in the transcript
    Responses {
        #[arg(long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = StagesConfig::load(&cli.overrides)?;
    info!(
        k = config.top_k,
        method = %config.method,
        persona = config.persona.as_deref().unwrap_or("none"),
        "Stage builder starting"
    );

    match cli.command {
        Command::Stage1 { input, output } => {
            let n = run_stage(&config, Stage::Answer, input.as_deref(), &output).await?;
            info!(records = n, output = %output.display(), "Stage 1 complete");
        }
        Command::Stage2 { input, output } => {
            let n = run_stage(&config, Stage::Critique, Some(&input), &output).await?;
            info!(records = n, output = %output.display(), "Stage 2 complete");
        }
        Command::Stage3 { input, output } => {
            let n = run_stage(&config, Stage::Synthesis, Some(&input), &output).await?;
            info!(records = n, output = %output.display(), "Stage 3 complete");
        }
        Command::Responses { input } => {
            if config.transcript_path.is_none() {
                tracing::warn!("No --transcript given, responses will not be recorded");
            }
            let n = report_responses(&config, &input)?;
            info!(responses = n, "Responses recorded");
        }
    }

    Ok(())
}
