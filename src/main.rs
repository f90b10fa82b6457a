use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{prelude::*, EnvFilter};
use ytdlpllm::config::Settings;
use ytdlpllm::exec::{self, ExecutionResult};
use ytdlpllm::llm::openai::OpenAiProvider;
use ytdlpllm::pipeline::Pipeline;
use ytdlpllm::profile::YTDLP;

/// Exit code for failures that happen before any yt-dlp command ran, so
/// callers can tell "the tool failed" from "we never got a valid command".
const PIPELINE_FAILURE_CODE: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "ytdlpllm",
    about = "Convert your instructions into a yt-dlp command.",
    after_help = "Examples:\n  ytdlpllm download the audio of this video: https://youtube.com/watch?v=abc\n  ytdlpllm --yes grab the first five videos of https://youtube.com/playlist?list=xyz"
)]
struct Cli {
    /// A string containing instructions about the desired yt-dlp use
    #[arg(required = true, num_args = 1..)]
    instructions: Vec<String>,

    /// Model identifier (falls back to YTDLPLLM_MODEL, then the default)
    #[arg(long)]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible API (falls back to YTDLPLLM_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Execute the synthesized command without asking for confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Kill the yt-dlp process after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file before settings are read
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("pipeline failed: {err:#}");
            eprintln!("error: {err:#}");
            ExitCode::from(PIPELINE_FAILURE_CODE)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut settings = Settings::new().context("failed to load configuration")?;
    if let Some(model) = cli.model {
        settings.model = model;
    }
    if let Some(base_url) = cli.base_url {
        settings.base_url = base_url;
    }
    if let Some(secs) = cli.timeout {
        settings.execution_timeout_secs = secs;
    }

    let api_key = settings.resolved_api_key()?;

    let program_path = exec::locate_program(YTDLP.program).with_context(|| {
        format!(
            "missing {} executable. Is it added to your system's PATH?",
            YTDLP.program
        )
    })?;
    debug!(path = %program_path.display(), "target tool located");
    let tool_version = exec::probe_version(YTDLP.program).await;

    let provider = OpenAiProvider::new(
        &settings.base_url,
        &api_key,
        &settings.model,
        settings.request_timeout(),
    );
    let pipeline = Pipeline::new(
        &provider,
        &YTDLP,
        settings.synthesis_max_attempts,
        settings.execution_timeout(),
        tool_version,
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut instruction = cli.instructions.join(" ");
    loop {
        let command = pipeline.synthesize(&instruction, &cancel).await?;
        println!("\n\t{}\n", command.display());

        if !cli.yes {
            match ask_confirmation().await? {
                Confirmation::Execute => {}
                Confirmation::Abort => {
                    info!("aborted by user, nothing executed");
                    return Ok(ExitCode::SUCCESS);
                }
                Confirmation::Refine(text) => {
                    instruction = format!("{instruction}. {text}");
                    continue;
                }
            }
        }

        let result = pipeline.execute(&command, &cancel).await?;
        return Ok(exit_code_from(&result));
    }
}

enum Confirmation {
    Execute,
    Abort,
    Refine(String),
}

async fn ask_confirmation() -> anyhow::Result<Confirmation> {
    let line = tokio::task::spawn_blocking(|| {
        use std::io::Write as _;
        print!("Execute? (Y/enter OR N/no OR clarify instructions): ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        Ok::<_, std::io::Error>(input)
    })
    .await??;

    let trimmed = line.trim();
    Ok(match trimmed.to_uppercase().as_str() {
        "" | "Y" | "YES" => Confirmation::Execute,
        "N" | "NO" | "Q" | "QUIT" => Confirmation::Abort,
        _ => Confirmation::Refine(trimmed.to_string()),
    })
}

fn exit_code_from(result: &ExecutionResult) -> ExitCode {
    if result.success() {
        return ExitCode::SUCCESS;
    }
    eprintln!("{} exited with status {}", YTDLP.program, result.exit_code);
    ExitCode::from(u8::try_from(result.exit_code).unwrap_or(1))
}
