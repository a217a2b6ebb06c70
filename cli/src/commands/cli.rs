use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "briefsmith", version, about = "AI product design workflow")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Model tried first; the configured fallback list follows.
    #[arg(long, global = true)]
    pub model: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// One chat completion across the model cascade.
    Chat(ChatArgs),
    /// Streamed chat completion, printed as it arrives.
    Stream(ChatArgs),
    /// Run a single workflow step.
    Step(StepArgs),
    /// Run the whole workflow: analysis, research, design, images.
    Run(RunArgs),
    /// Expand a short brief into a fuller requirement document.
    Autocomplete(BriefArgs),
    /// Extract style or category tags from a brief.
    Tags(TagsArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ChatArgs {
    /// Optional system message.
    #[arg(long)]
    pub system: Option<String>,

    #[arg(long, conflicts_with = "prompt")]
    pub prompt_file: Option<PathBuf>,

    #[arg(trailing_var_arg = true)]
    pub prompt: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BriefArgs {
    #[arg(long, group = "brief_input")]
    pub brief: Option<String>,

    #[arg(long, group = "brief_input")]
    pub brief_file: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Market,
    Visual,
    Design,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StepArgs {
    #[arg(value_enum)]
    pub step: StepKind,

    #[command(flatten)]
    pub brief: BriefArgs,

    /// Market analysis text (or `@path`) fed to the visual and design steps.
    #[arg(long)]
    pub market: Option<String>,

    /// Visual research text (or `@path`) fed to the design step.
    #[arg(long)]
    pub visual: Option<String>,

    #[command(flatten)]
    pub design: DesignArgs,

    /// Print the raw model stream instead of the normalized result.
    #[arg(long)]
    pub stream: bool,

    /// Print normalized JSON instead of markdown.
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct DesignArgs {
    #[arg(long)]
    pub image_count: Option<usize>,

    #[arg(long, default_value = "")]
    pub persona: String,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TagsArgs {
    #[command(flatten)]
    pub brief: BriefArgs,

    /// Print a JSON array instead of one tag per line.
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub brief: BriefArgs,

    #[command(flatten)]
    pub design: DesignArgs,

    /// Write the markdown report here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}
