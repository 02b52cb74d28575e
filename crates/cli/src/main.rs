//! Affiant CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `.affiant/config.toml`, apply command-line
//!    and environment overrides, and validate the result.
//! 2. **Wire observability**: configure `tracing-subscriber` with a text or
//!    JSON layer and an optional OpenTelemetry OTLP exporter. All `tracing`
//!    spans and structured events emitted by every crate in the workspace flow
//!    through this layer.
//! 3. **Construct infrastructure**: create the `AnthropicProvider` and the
//!    `FilePromptLoader` and inject them into the step implementations.
//! 4. **Run the job**: spawn the run on a background task, log its progress
//!    events, and write the draft and report files when it completes.

mod config;
mod observability;
mod output;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use llm::{AnthropicProvider, FilePromptLoader};
use nodes::{IterationController, PipelineRunner, PipelineSteps, RunEvent, StepContext};
use pipeline::{JobInput, JobName, PipelineState};
use tracing::{error, info};

use crate::config::{FileConfig, DEFAULT_KEY_PATH, DEFAULT_PROMPTS_DIR};
use crate::observability::LoggingArgs;

/// Drafts an affidavit from interview notes with a write, evaluate and revise
/// loop over a language model.
#[derive(Debug, Parser)]
#[command(name = "affiant", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the drafting pipeline for one case.
    Run(RunArgs),
    /// Store the Anthropic API key in the key file.
    SaveKey(SaveKeyArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Interview notes (plain text).
    #[arg(long)]
    notes: PathBuf,

    /// Directory that receives `<case>/<case>_draft.md` and the report.
    #[arg(long, default_value = "output")]
    output: PathBuf,

    /// Case name, used in messages and output file names.
    #[arg(long)]
    case_name: String,

    /// File with case-specific instructions for evaluation and revision.
    #[arg(long)]
    specifics: Option<PathBuf>,

    /// Prompt template directory.
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Maximum number of revisions.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Model identifier.
    #[arg(long)]
    model: Option<String>,

    /// Configuration file (default: .affiant/config.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Anthropic API key.
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Debug, Args)]
struct SaveKeyArgs {
    /// The API key to store.
    key: String,

    /// Key file location.
    #[arg(long, default_value = DEFAULT_KEY_PATH)]
    key_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let _telemetry = observability::init(&cli.logging)?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::SaveKey(args) => {
            config::save_api_key(&args.key, &args.key_file)?;
            info!(path = %args.key_file.display(), "API key saved");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let file = FileConfig::load(args.config.as_deref())?;

    let mut pipeline_config = file.pipeline;
    if let Some(max_iterations) = args.max_iterations {
        pipeline_config.max_iterations = max_iterations;
    }
    let mut anthropic = file.anthropic;
    if let Some(model) = args.model {
        anthropic.model = model;
    }
    let prompts_dir = args
        .prompts
        .or(file.prompts_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROMPTS_DIR));

    let notes = fs::read_to_string(&args.notes)
        .with_context(|| format!("failed to read notes from {}", args.notes.display()))?;
    anyhow::ensure!(!notes.trim().is_empty(), "notes file {} is empty", args.notes.display());
    let case_specifics = args
        .specifics
        .as_ref()
        .map(|path| {
            fs::read_to_string(path)
                .with_context(|| format!("failed to read case specifics from {}", path.display()))
        })
        .transpose()?;
    let job = JobName::new(args.case_name).context("case name must not be blank")?;

    let api_key = config::resolve_api_key(args.api_key, &PathBuf::from(DEFAULT_KEY_PATH))?;
    let generator = Arc::new(AnthropicProvider::new(api_key, anthropic)?);
    info!(model = generator.model(), prompts = %prompts_dir.display(), "Generation provider ready");
    let templates = Arc::new(FilePromptLoader::new(prompts_dir));
    let context = StepContext::new(generator, templates, pipeline_config.generation.clone());
    let controller = IterationController::new(PipelineSteps::standard(context), &pipeline_config)
        .context("invalid pipeline configuration")?;

    let state = PipelineState::new(JobInput {
        notes,
        output_dir: args.output,
        job,
        case_specifics,
    });
    info!(run_id = %state.run_id(), job = %state.input().job, "Starting run");

    let mut handle = PipelineRunner::new(controller).spawn(state);
    let mut success = false;
    while let Some(event) = handle.next_event().await {
        match event {
            RunEvent::Progress(update) => info!(progress = %update.progress, "{}", update.message),
            RunEvent::Completed(completion) => {
                if completion.success {
                    info!("{}", completion.message);
                } else {
                    error!("{}", completion.message);
                }
                success = completion.success;
            }
        }
    }
    let state = handle.wait().await?;

    let paths = output::write_outputs(&state)?;
    if let Some(draft) = &paths.draft {
        info!(path = %draft.display(), "Draft written");
    }
    info!(path = %paths.report.display(), "Report written");

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "affiant",
            "run",
            "--notes",
            "notes.txt",
            "--case-name",
            "Doe",
            "--max-iterations",
            "5",
            "--log-format",
            "json",
        ])
        .expect("parses");

        assert_eq!(cli.logging.log_format, observability::LogFormat::Json);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.notes, PathBuf::from("notes.txt"));
                assert_eq!(args.case_name, "Doe");
                assert_eq!(args.max_iterations, Some(5));
                assert_eq!(args.output, PathBuf::from("output"));
                assert_eq!(args.prompts, None);
            }
            Command::SaveKey(_) => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_case_name() {
        assert!(Cli::try_parse_from(["affiant", "run", "--notes", "notes.txt"]).is_err());
    }

    #[test]
    fn test_save_key_arguments() {
        let cli = Cli::try_parse_from(["affiant", "save-key", "sk-ant-1"]).expect("parses");
        match cli.command {
            Command::SaveKey(args) => {
                assert_eq!(args.key, "sk-ant-1");
                assert_eq!(args.key_file, PathBuf::from(DEFAULT_KEY_PATH));
            }
            Command::Run(_) => panic!("expected save-key"),
        }
    }
}
