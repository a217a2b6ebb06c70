use briefsmith_cli::commands::{cli, handlers};
use briefsmith_core::error::{self, LlmErrorKind};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, error::CliError> {
    let args = cli::Args::parse();
    let cfg = briefsmith_core::config::load_default().map_err(handlers::config_or_anyhow)?;
    init_tracing(&cfg.logging).map_err(error::CliError::Command)?;

    let model = args.model.clone();
    match args.command {
        cli::Commands::Chat(chat_args) => handlers::chat(&cfg, model.as_deref(), chat_args).await,
        cli::Commands::Stream(chat_args) => {
            handlers::stream(&cfg, model.as_deref(), chat_args).await
        }
        cli::Commands::Step(step_args) => handlers::step(&cfg, model, step_args).await,
        cli::Commands::Run(run_args) => handlers::run(&cfg, model, run_args).await,
        cli::Commands::Autocomplete(brief_args) => {
            handlers::autocomplete(&cfg, model, brief_args).await
        }
        cli::Commands::Tags(tags_args) => handlers::tags(&cfg, model, tags_args).await,
    }
}

fn exit_code_for_error(e: &error::CliError) -> i32 {
    // 0: success
    // 11: config error
    // 20: IO / command input error
    // 30: model invocation failed (fatal or cascade exhausted)
    // 31: rate limited on every candidate
    // 40: workflow step failed
    // 50: internal/uncategorized
    match e {
        error::CliError::Config(_) => 11,
        error::CliError::Io(_) => 20,
        error::CliError::Command(_) => 20,
        error::CliError::Llm(le) => llm_exit_code(le),
        error::CliError::Workflow(we) => match we {
            error::WorkflowError::Llm(le) => llm_exit_code(le),
            error::WorkflowError::Response { .. } => 40,
            error::WorkflowError::Image(_) => 40,
            error::WorkflowError::InvalidBrief(_) => 20,
            error::WorkflowError::TaskFailed { .. } => 40,
            error::WorkflowError::TaskStillRunning { .. } => 40,
            error::WorkflowError::TaskEvicted(_) => 50,
            error::WorkflowError::ResultDecode(_) => 50,
        },
        error::CliError::Anyhow(_) => 50,
    }
}

fn llm_exit_code(e: &error::LlmError) -> i32 {
    match e.kind() {
        LlmErrorKind::RateLimit => 31,
        _ => 30,
    }
}

fn init_tracing(logging: &briefsmith_core::config::LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("briefsmith"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("briefsmith.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    // stdout carries command output; logs go to stderr
    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .with_target(true)
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
