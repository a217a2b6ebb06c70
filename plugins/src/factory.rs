use std::sync::Arc;

use anyhow::Result;

use briefsmith_core::config::AppConfig;
use briefsmith_core::llm::{ChatTransport, InvokerSettings, ModelInvoker};
use briefsmith_core::task::TaskRegistry;
use briefsmith_core::workflow::{DesignWorkflow, ImageGenerator, PromptSet, WorkflowSettings};

use crate::image::HttpImageGenerator;
use crate::llm::OpenAiChatClient;

pub fn build_transport(cfg: &AppConfig) -> Result<Arc<dyn ChatTransport>> {
    Ok(Arc::new(OpenAiChatClient::new(
        &cfg.llm.base_url,
        cfg.llm.api_key.clone(),
        cfg.llm.timeout_ms,
    )?))
}

pub fn build_invoker(cfg: &AppConfig) -> Result<ModelInvoker> {
    let settings = InvokerSettings::from_config(&cfg.llm)?;
    Ok(ModelInvoker::new(build_transport(cfg)?, settings))
}

pub fn build_image_generator(cfg: &AppConfig) -> Result<Arc<dyn ImageGenerator>> {
    Ok(Arc::new(HttpImageGenerator::new(
        &cfg.image.base_url,
        cfg.image.timeout_ms,
    )?))
}

/// Wires the workflow from configuration. `model` overrides the invoker's
/// default for every step.
pub fn build_workflow(cfg: &AppConfig, model: Option<String>) -> Result<DesignWorkflow> {
    let mut settings = WorkflowSettings::from_config(cfg);
    settings.model = model;
    settings.prompts = PromptSet::load(&cfg.prompts)?;
    Ok(DesignWorkflow::new(
        build_invoker(cfg)?,
        build_image_generator(cfg)?,
        TaskRegistry::from_config(&cfg.registry),
        settings,
    ))
}
