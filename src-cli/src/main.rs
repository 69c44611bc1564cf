use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use fqa_core::config::FqaConfig;
use fqa_core::error::AppError;
use tracing_subscriber::EnvFilter;

use findocqa_lib::{EvaluateOptions, SetupSummary};

const LOG_ENV: &str = "FINDOCQA_LOG";
const DEFAULT_LOG_FILTER: &str = "findocqa=info,fqa_ai=info,fqa_core=info";

#[derive(Parser, Debug)]
#[command(name = "findocqa")]
#[command(about = "Question answering over financial documents with cited sources")]
struct Cli {
    /// path to findocqa.toml (defaults to ./findocqa.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the local Ollama server answers
    Health,
    /// Chunk and embed the document directory into an index snapshot
    Setup {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        index: Option<PathBuf>,
    },
    /// Answer one question
    Query {
        text: String,
        /// zero_shot | few_shot | chain_of_thought | structured
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// print the full response record as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Ask questions from stdin until `exit`
    Interactive,
    /// Run every test case against every method and write the reports
    Evaluate {
        /// JSON array of test cases; the built-in set is used when omitted
        #[arg(long)]
        test_set: Option<PathBuf>,
        /// comma-separated methods; all when omitted
        #[arg(long, value_delimiter = ',')]
        methods: Vec<String>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn to_json<T: serde::Serialize>(v: &T) -> Result<String, AppError> {
    serde_json::to_string_pretty(v)
        .map_err(|e| AppError::new("CLI_OUTPUT_FAILED", "Failed to encode output").with_details(e.to_string()))
}

fn print_setup(s: &SetupSummary) {
    println!(
        "Indexed {} chunk(s) from {} document(s) into {} (model {}, dims {}).",
        s.chunks,
        s.documents,
        s.index_path.display(),
        s.embedding_model,
        s.dims
    );
}

fn run(cli: Cli) -> Result<ExitCode, AppError> {
    let cfg = FqaConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Health => {
            let status = findocqa_lib::ai_health_check(&cfg)?;
            println!("{}", status.message);
        }
        Command::Setup { data_dir, index } => {
            let summary = findocqa_lib::setup(&cfg, data_dir.as_deref(), index.as_deref())?;
            print_setup(&summary);
        }
        Command::Query {
            text,
            method,
            timeout_ms,
            json,
        } => {
            let (pipeline, _) = findocqa_lib::open_pipeline(&cfg, findocqa_lib::session_hook())?;
            let req = findocqa_lib::request(&cfg, &text, method.as_deref(), timeout_ms);
            let record = pipeline.handle(&req)?;
            if json {
                println!("{}", to_json(&record)?);
            } else {
                print!("{}", findocqa_lib::render_response(&record));
            }
            // Answered and classified-failure outcomes are told apart by exit code.
            if !record.is_ok() {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Interactive => {
            let (pipeline, _) = findocqa_lib::open_pipeline(&cfg, findocqa_lib::session_hook())?;
            let stdin = io::stdin();
            let answered = findocqa_lib::run_interactive(&pipeline, &cfg, stdin.lock(), io::stdout())?;
            tracing::info!(answered, "interactive session ended");
        }
        Command::Evaluate {
            test_set,
            methods,
            workers,
            output_dir,
        } => {
            let opts = EvaluateOptions {
                test_set,
                methods,
                workers,
                output_dir,
            };
            let summary = findocqa_lib::evaluate(&cfg, &opts)?;
            println!("{}", to_json(&summary)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            match to_json(&e) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{e}"),
            }
            ExitCode::FAILURE
        }
    }
}
