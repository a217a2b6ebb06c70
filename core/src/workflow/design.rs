use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use super::brief::validate_brief;
use super::image::{generate_batch, jobs_for, ImageGenerator};
use super::prompts::PromptSet;
use super::types::{DesignReport, StepOutput};
use crate::config::AppConfig;
use crate::error::{LlmError, ResponseError, WorkflowError};
use crate::llm::{ChatMessage, ChunkStream, ModelInvoker};
use crate::response::{parse_tags, ResponseProcessor};
use crate::task::{compute_fingerprint, new_task_id, run_deduplicated, TaskRegistry};

pub const AUTOCOMPLETE_TASK_KIND: &str = "autocomplete";
pub const TAGS_TASK_KIND: &str = "tags";

/// The three LLM-backed steps of a design run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesignStep {
    MarketAnalysis,
    VisualResearch,
    DesignGeneration,
}

impl DesignStep {
    pub fn as_str(self) -> &'static str {
        match self {
            DesignStep::MarketAnalysis => "market_analysis",
            DesignStep::VisualResearch => "visual_research",
            DesignStep::DesignGeneration => "design_generation",
        }
    }

    /// Task kind used for fingerprinting and registry entries.
    pub fn task_kind(self) -> &'static str {
        match self {
            DesignStep::MarketAnalysis => "step:market_analysis",
            DesignStep::VisualResearch => "step:visual_research",
            DesignStep::DesignGeneration => "step:design_generation",
        }
    }

    fn normalize(self, raw: &str) -> Result<Map<String, Value>, ResponseError> {
        match self {
            DesignStep::MarketAnalysis => ResponseProcessor::process_market_analysis(raw),
            DesignStep::VisualResearch => ResponseProcessor::process_visual_research(raw),
            DesignStep::DesignGeneration => ResponseProcessor::process_design_generation(raw),
        }
    }

    /// Parses a complete model response (e.g. a collected stream) into the
    /// step's normalized output.
    pub fn parse(self, raw: &str) -> Result<StepOutput, WorkflowError> {
        let data = self
            .normalize(raw)
            .map_err(|source| WorkflowError::response(self.as_str(), source))?;
        Ok(StepOutput::from_map(&data))
    }

    /// Same as [`parse`](Self::parse), reported as an invalid model response
    /// so the invoker can move on to the next candidate.
    fn accept(self, raw: &str) -> Result<StepOutput, LlmError> {
        match self.normalize(raw) {
            Ok(data) => Ok(StepOutput::from_map(&data)),
            Err(source) => Err(LlmError::invalid_response(format!(
                "step '{}' produced an unusable response: {}",
                self.as_str(),
                source
            ))
            .with_source(source)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub max_concurrent_images: usize,
    pub image_count: usize,
    pub image_output_dir: String,
    /// How long a duplicate step call waits for the executing one.
    pub wait_timeout: Duration,
    /// Model requested for every step; `None` uses the invoker's default.
    pub model: Option<String>,
    /// Finished-entry bound for the brief-helper registries.
    pub registry_capacity: Option<usize>,
    pub prompts: PromptSet,
}

impl WorkflowSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_concurrent_images: cfg.workflow.max_concurrent_images,
            image_count: cfg.workflow.image_count,
            image_output_dir: cfg.workflow.image_output_dir.clone(),
            wait_timeout: Duration::from_secs(cfg.registry.wait_timeout_secs),
            model: None,
            registry_capacity: cfg.registry.completed_capacity,
            prompts: PromptSet::default(),
        }
    }
}

/// Extra knobs for the design step.
#[derive(Debug, Clone, Default)]
pub struct DesignOptions {
    /// Falls back to the configured count when `None`.
    pub image_count: Option<usize>,
    pub persona: String,
}

/// Market analysis → visual research → design schemes → images.
///
/// Every step is deduplicated by a fingerprint over its normalized inputs, so
/// concurrent identical requests share one model invocation. The brief
/// helpers (`autocomplete`, `tags`) are deduplicated the same way in their
/// own registries.
#[derive(Clone)]
pub struct DesignWorkflow {
    invoker: ModelInvoker,
    images: Arc<dyn ImageGenerator>,
    registry: TaskRegistry<StepOutput>,
    expansions: TaskRegistry<String>,
    tag_lists: TaskRegistry<Vec<String>>,
    settings: WorkflowSettings,
}

impl DesignWorkflow {
    pub fn new(
        invoker: ModelInvoker,
        images: Arc<dyn ImageGenerator>,
        registry: TaskRegistry<StepOutput>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            invoker,
            images,
            registry,
            expansions: TaskRegistry::with_finished_capacity(settings.registry_capacity),
            tag_lists: TaskRegistry::with_finished_capacity(settings.registry_capacity),
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn registry(&self) -> &TaskRegistry<StepOutput> {
        &self.registry
    }

    pub async fn market_analysis(&self, brief: &str) -> Result<StepOutput, WorkflowError> {
        let brief = validate_brief(brief)?;
        let payload = json!({ "brief": brief, "model": self.settings.model });
        let prompt = self.settings.prompts.market_analysis(&brief);
        self.run_step(DesignStep::MarketAnalysis, &payload, prompt)
            .await
    }

    pub async fn visual_research(
        &self,
        brief: &str,
        market_analysis: &str,
    ) -> Result<StepOutput, WorkflowError> {
        let brief = validate_brief(brief)?;
        let payload = json!({
            "brief": brief,
            "market_analysis": market_analysis,
            "model": self.settings.model,
        });
        let prompt = self
            .settings
            .prompts
            .visual_research(&brief, market_analysis);
        self.run_step(DesignStep::VisualResearch, &payload, prompt)
            .await
    }

    pub async fn design_generation(
        &self,
        brief: &str,
        market_analysis: &str,
        visual_research: &str,
        options: &DesignOptions,
    ) -> Result<StepOutput, WorkflowError> {
        let brief = validate_brief(brief)?;
        let image_count = self.image_count(options);
        let payload = json!({
            "brief": brief,
            "market_analysis": market_analysis,
            "visual_research": visual_research,
            "image_count": image_count,
            "persona": options.persona,
            "model": self.settings.model,
        });
        let prompt = self.settings.prompts.design_generation(
            &brief,
            market_analysis,
            visual_research,
            image_count,
            &options.persona,
        );
        self.run_step(DesignStep::DesignGeneration, &payload, prompt)
            .await
    }

    /// Expands a short brief into a fuller requirement document.
    pub async fn autocomplete(&self, brief: &str) -> Result<String, WorkflowError> {
        let brief = validate_brief(brief)?;
        let payload = json!({ "brief": brief, "model": self.settings.model });
        let fingerprint = compute_fingerprint(AUTOCOMPLETE_TASK_KIND, &payload)?;
        let prompt = self.settings.prompts.autocomplete(&brief);

        run_deduplicated(
            &self.expansions,
            AUTOCOMPLETE_TASK_KIND,
            &fingerprint,
            self.settings.wait_timeout,
            || async move {
                let messages = [ChatMessage::user(prompt)];
                let expanded = self
                    .invoker
                    .chat_completion_with(&messages, self.settings.model.as_deref(), |text| {
                        Ok(text.trim().to_string())
                    })
                    .await?;
                Ok(expanded)
            },
        )
        .await
    }

    /// Extracts style or category tags from a brief.
    pub async fn tags(&self, brief: &str) -> Result<Vec<String>, WorkflowError> {
        let brief = validate_brief(brief)?;
        let payload = json!({ "brief": brief, "model": self.settings.model });
        let fingerprint = compute_fingerprint(TAGS_TASK_KIND, &payload)?;
        let prompt = self.settings.prompts.tags(&brief);

        run_deduplicated(
            &self.tag_lists,
            TAGS_TASK_KIND,
            &fingerprint,
            self.settings.wait_timeout,
            || async move {
                let messages = [ChatMessage::user(prompt)];
                let tags = self
                    .invoker
                    .chat_completion_with(&messages, self.settings.model.as_deref(), |text| {
                        let tags = parse_tags(text);
                        if tags.is_empty() {
                            return Err(LlmError::invalid_response("no tags in response"));
                        }
                        Ok(tags)
                    })
                    .await?;
                Ok(tags)
            },
        )
        .await
    }

    pub async fn market_analysis_stream(&self, brief: &str) -> Result<ChunkStream, LlmError> {
        self.stream_prompt(self.settings.prompts.market_analysis(brief))
            .await
    }

    pub async fn visual_research_stream(
        &self,
        brief: &str,
        market_analysis: &str,
    ) -> Result<ChunkStream, LlmError> {
        self.stream_prompt(self.settings.prompts.visual_research(brief, market_analysis))
            .await
    }

    pub async fn design_generation_stream(
        &self,
        brief: &str,
        market_analysis: &str,
        visual_research: &str,
        options: &DesignOptions,
    ) -> Result<ChunkStream, LlmError> {
        let prompt = self.settings.prompts.design_generation(
            brief,
            market_analysis,
            visual_research,
            self.image_count(options),
            &options.persona,
        );
        self.stream_prompt(prompt).await
    }

    /// Generates an image for every item with a non-empty `prompt` and
    /// writes the resulting path into its `image_path`. Items whose image
    /// failed keep an empty `image_path`.
    pub async fn generate_images(&self, mut items: Vec<Value>) -> Vec<Value> {
        let prefix = format!("design_{}", &new_task_id()[..8]);
        let jobs = jobs_for(&items, &prefix);
        if jobs.is_empty() {
            return items;
        }

        let requested = jobs.len();
        let done = generate_batch(
            self.images.clone(),
            jobs,
            self.settings.max_concurrent_images,
            &self.settings.image_output_dir,
        )
        .await;

        tracing::info!(
            target: "briefsmith.workflow",
            stage = "images.done",
            requested = requested,
            generated = done.len()
        );

        for (index, path) in done {
            if let Some(Value::Object(obj)) = items.get_mut(index) {
                obj.insert("image_path".to_string(), Value::String(path));
            }
        }
        items
    }

    pub async fn run(&self, brief: &str) -> Result<DesignReport, WorkflowError> {
        self.run_with(brief, &DesignOptions::default()).await
    }

    pub async fn run_with(
        &self,
        brief: &str,
        options: &DesignOptions,
    ) -> Result<DesignReport, WorkflowError> {
        let brief = validate_brief(brief)?;
        tracing::info!(
            target: "briefsmith.workflow",
            stage = "run.start",
            brief_chars = brief.chars().count()
        );

        let market_analysis = self.market_analysis(&brief).await?;
        let ma_md = market_analysis.to_markdown();

        let visual_research = self.visual_research(&brief, &ma_md).await?;
        let vr_md = visual_research.to_markdown();

        let mut design = self
            .design_generation(&brief, &ma_md, &vr_md, options)
            .await?;
        design.prompts = self.generate_images(design.prompts).await;

        let report = DesignReport {
            brief,
            market_analysis,
            visual_research,
            design,
        };
        tracing::info!(
            target: "briefsmith.workflow",
            stage = "run.done",
            schemes = report.design.prompts.len(),
            images = report.generated_images().len()
        );
        Ok(report)
    }

    fn image_count(&self, options: &DesignOptions) -> usize {
        options.image_count.unwrap_or(self.settings.image_count)
    }

    async fn run_step(
        &self,
        step: DesignStep,
        payload: &Value,
        prompt: String,
    ) -> Result<StepOutput, WorkflowError> {
        let kind = step.task_kind();
        let fingerprint = compute_fingerprint(kind, payload)?;

        run_deduplicated(
            &self.registry,
            kind,
            &fingerprint,
            self.settings.wait_timeout,
            || async move {
                let messages = [ChatMessage::user(prompt)];
                let output = self
                    .invoker
                    .chat_completion_with(&messages, self.settings.model.as_deref(), |raw| {
                        step.accept(raw)
                    })
                    .await?;
                Ok(output)
            },
        )
        .await
    }

    async fn stream_prompt(&self, prompt: String) -> Result<ChunkStream, LlmError> {
        let messages = [ChatMessage::user(prompt)];
        self.invoker
            .chat_completion_stream(&messages, self.settings.model.as_deref())
            .await
    }
}
