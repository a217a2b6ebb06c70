use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use briefsmith_core::config::AppConfig;
use briefsmith_core::error::{CliError, ConfigError};
use briefsmith_core::llm::{ChatMessage, ChunkStream};
use briefsmith_core::workflow::{
    validate_brief, DesignOptions, DesignStep, DesignWorkflow, StepOutput,
};
use briefsmith_plugins::factory;

use super::cli::{BriefArgs, ChatArgs, DesignArgs, RunArgs, StepArgs, StepKind, TagsArgs};

/// Keeps configuration problems distinguishable after passing through the
/// factory's `anyhow` boundary.
pub fn config_or_anyhow(err: anyhow::Error) -> CliError {
    match err.downcast::<ConfigError>() {
        Ok(cfg) => CliError::Config(cfg),
        Err(other) => CliError::Anyhow(other),
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path)
        .map_err(|e| CliError::Command(format!("failed to read {}: {e}", path.display())))
}

pub fn resolve_brief(args: &BriefArgs) -> Result<String, CliError> {
    let brief = match (&args.brief, &args.brief_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => read_file(path)?,
        (None, None) => {
            return Err(CliError::Command(
                "a brief is required (--brief or --brief-file)".to_string(),
            ))
        }
    };
    Ok(validate_brief(&brief)?)
}

/// `@path` reads the file; anything else is taken literally.
pub fn resolve_text(value: Option<&str>) -> Result<String, CliError> {
    match value {
        Some(v) => match v.strip_prefix('@') {
            Some(path) => read_file(Path::new(path)),
            None => Ok(v.to_string()),
        },
        None => Ok(String::new()),
    }
}

pub fn chat_messages(args: &ChatArgs) -> Result<Vec<ChatMessage>, CliError> {
    let prompt = match &args.prompt_file {
        Some(path) => read_file(path)?,
        None => args.prompt.join(" "),
    };
    if prompt.trim().is_empty() {
        return Err(CliError::Command("prompt is empty".to_string()));
    }

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = args.system.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));
    Ok(messages)
}

fn design_options(args: &DesignArgs) -> DesignOptions {
    DesignOptions {
        image_count: args.image_count,
        persona: args.persona.clone(),
    }
}

async fn write_stdout(text: &str) -> Result<(), CliError> {
    let mut out = tokio::io::stdout();
    out.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        out.write_all(b"\n").await?;
    }
    out.flush().await?;
    Ok(())
}

/// Copies chunks to stdout as they arrive and returns the full text.
async fn pump_stream(mut stream: ChunkStream) -> Result<String, CliError> {
    let mut out = tokio::io::stdout();
    let mut collected = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        out.write_all(chunk.as_bytes()).await?;
        out.flush().await?;
        collected.push_str(&chunk);
    }
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(collected)
}

fn render_step(output: &StepOutput, json: bool) -> Result<String, CliError> {
    if json {
        return serde_json::to_string_pretty(output).map_err(|e| CliError::Command(e.to_string()));
    }
    Ok(output.to_markdown())
}

pub async fn chat(cfg: &AppConfig, model: Option<&str>, args: ChatArgs) -> Result<i32, CliError> {
    let invoker = factory::build_invoker(cfg).map_err(config_or_anyhow)?;
    let messages = chat_messages(&args)?;
    let text = invoker.chat_completion(&messages, model).await?;
    write_stdout(&text).await?;
    Ok(0)
}

pub async fn stream(
    cfg: &AppConfig,
    model: Option<&str>,
    args: ChatArgs,
) -> Result<i32, CliError> {
    let invoker = factory::build_invoker(cfg).map_err(config_or_anyhow)?;
    let messages = chat_messages(&args)?;
    let stream = invoker.chat_completion_stream(&messages, model).await?;
    pump_stream(stream).await?;
    Ok(0)
}

pub async fn step(
    cfg: &AppConfig,
    model: Option<String>,
    args: StepArgs,
) -> Result<i32, CliError> {
    let workflow = factory::build_workflow(cfg, model).map_err(config_or_anyhow)?;
    let brief = resolve_brief(&args.brief)?;
    let market = resolve_text(args.market.as_deref())?;
    let visual = resolve_text(args.visual.as_deref())?;
    let options = design_options(&args.design);

    if args.stream {
        let stream = open_step_stream(&workflow, args.step, &brief, &market, &visual, &options)
            .await?;
        let raw = pump_stream(stream).await?;
        if args.json {
            let parsed = step_of(args.step).parse(&raw)?;
            write_stdout(&render_step(&parsed, true)?).await?;
        }
        return Ok(0);
    }

    let output = match args.step {
        StepKind::Market => workflow.market_analysis(&brief).await?,
        StepKind::Visual => workflow.visual_research(&brief, &market).await?,
        StepKind::Design => {
            let mut output = workflow
                .design_generation(&brief, &market, &visual, &options)
                .await?;
            output.prompts = workflow.generate_images(output.prompts).await;
            output
        }
    };
    write_stdout(&render_step(&output, args.json)?).await?;
    Ok(0)
}

pub async fn autocomplete(
    cfg: &AppConfig,
    model: Option<String>,
    args: BriefArgs,
) -> Result<i32, CliError> {
    let workflow = factory::build_workflow(cfg, model).map_err(config_or_anyhow)?;
    let brief = resolve_brief(&args)?;
    let expanded = workflow.autocomplete(&brief).await?;
    write_stdout(&expanded).await?;
    Ok(0)
}

pub async fn tags(cfg: &AppConfig, model: Option<String>, args: TagsArgs) -> Result<i32, CliError> {
    let workflow = factory::build_workflow(cfg, model).map_err(config_or_anyhow)?;
    let brief = resolve_brief(&args.brief)?;
    let tags = workflow.tags(&brief).await?;
    let rendered = if args.json {
        serde_json::to_string(&tags).map_err(|e| CliError::Command(e.to_string()))?
    } else {
        tags.join("\n")
    };
    write_stdout(&rendered).await?;
    Ok(0)
}

fn step_of(kind: StepKind) -> DesignStep {
    match kind {
        StepKind::Market => DesignStep::MarketAnalysis,
        StepKind::Visual => DesignStep::VisualResearch,
        StepKind::Design => DesignStep::DesignGeneration,
    }
}

async fn open_step_stream(
    workflow: &DesignWorkflow,
    kind: StepKind,
    brief: &str,
    market: &str,
    visual: &str,
    options: &DesignOptions,
) -> Result<ChunkStream, CliError> {
    let stream = match kind {
        StepKind::Market => workflow.market_analysis_stream(brief).await?,
        StepKind::Visual => workflow.visual_research_stream(brief, market).await?,
        StepKind::Design => {
            workflow
                .design_generation_stream(brief, market, visual, options)
                .await?
        }
    };
    Ok(stream)
}

pub async fn run(cfg: &AppConfig, model: Option<String>, args: RunArgs) -> Result<i32, CliError> {
    let workflow = factory::build_workflow(cfg, model).map_err(config_or_anyhow)?;
    let brief = resolve_brief(&args.brief)?;
    let report = workflow
        .run_with(&brief, &design_options(&args.design))
        .await?;

    let rendered = if args.json {
        serde_json::to_string_pretty(&report).map_err(|e| CliError::Command(e.to_string()))?
    } else {
        report.to_markdown()
    };

    match &args.output {
        Some(path) => {
            tokio::fs::write(path, rendered.as_bytes()).await?;
            tracing::info!(
                target: "briefsmith.workflow",
                stage = "report.written",
                path = %path.display()
            );
        }
        None => write_stdout(&rendered).await?,
    }
    Ok(0)
}
