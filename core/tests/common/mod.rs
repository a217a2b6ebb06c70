#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use briefsmith_core::error::{LlmError, WorkflowError};
use briefsmith_core::llm::{
    ChatRequest, ChatTransport, ChunkStream, FailoverBackoff, InvokerSettings, ModelInvoker,
    ThinkingPolicy,
};
use briefsmith_core::workflow::{DesignWorkflow, ImageGenerator, PromptSet, WorkflowSettings};
use briefsmith_core::task::TaskRegistry;

pub const MARKET_JSON: &str = r###"```json
{"核心摘要": "Quiet premium niche", "report": "## Users\nRemote workers", "visual_concepts": []}
```"###;

pub const VISUAL_JSON: &str =
    r###"Here it is: {"summary": "Soft walnut tones", "content": "## Materials\nWalnut, linen"}"###;

pub const DESIGN_JSON: &str = r###"{"设计思路": "Calm desk companions", "schemes": [
  {"title": "Arc", "prompt": "arc lamp in walnut"},
  {"title": "Cube", "prompt": "cube lamp, fail this one"},
  {"title": "Note", "prompt": ""}
]}"###;

pub const EXPANDED_BRIEF: &str = "A walnut bedside lamp for remote workers with warm dimming.";

pub const TAGS_JSON: &str = "```json\n[\"#Minimalist\", \"#Walnut\", \"#Calm\"]\n```";

pub const PROSE: &str = "I'm sorry, I can't put that into JSON right now.";

/// Answers by recognizing which step a prompt belongs to. Counts requests and
/// optionally delays each one.
pub struct StepTransport {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<ChatRequest>>,
    delay: Duration,
    /// Model that answers every prompt with prose instead of JSON.
    prose_model: Option<String>,
}

impl StepTransport {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay,
            prose_model: None,
        })
    }

    pub fn with_prose_from(model: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            prose_model: Some(model.to_string()),
        })
    }

    pub fn seen_models(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.model.clone())
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(request: &ChatRequest) -> Result<String, LlmError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if prompt.contains("expand the following short user brief") {
            Ok(EXPANDED_BRIEF.to_string())
        } else if prompt.contains("extract 3-6 relevant style") {
            Ok(TAGS_JSON.to_string())
        } else if prompt.contains("产品设计师") {
            Ok(DESIGN_JSON.to_string())
        } else if prompt.contains("视觉设计研究员") {
            Ok(VISUAL_JSON.to_string())
        } else if prompt.contains("市场分析师") {
            Ok(MARKET_JSON.to_string())
        } else {
            Err(LlmError::fatal("unexpected prompt"))
        }
    }
}

#[async_trait]
impl ChatTransport for StepTransport {
    fn name(&self) -> &str {
        "step-fake"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.prose_model.as_deref() == Some(request.model.as_str()) {
            return Ok(PROSE.to_string());
        }
        Self::answer(request)
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = Self::answer(request)?;
        let chunks: Vec<Result<String, LlmError>> = text
            .split_inclusive('\n')
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Writes nothing; fails any prompt containing "fail".
#[derive(Default)]
pub struct FakeImages {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ImageGenerator for FakeImages {
    fn name(&self) -> &str {
        "fake-images"
    }

    async fn generate(
        &self,
        prompt: &str,
        file_name: &str,
        save_folder: &str,
    ) -> Result<String, WorkflowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("fail") {
            return Err(WorkflowError::Image("quota exhausted".into()));
        }
        Ok(format!("{save_folder}/{file_name}.png"))
    }
}

pub fn invoker(transport: Arc<dyn ChatTransport>) -> ModelInvoker {
    let settings = InvokerSettings {
        default_model: "model-a".to_string(),
        fallback_models: vec!["model-b".to_string()],
        timeout: Duration::from_secs(5),
        stream_timeout: Duration::from_secs(5),
        min_response_chars: 10,
        thinking: ThinkingPolicy::new(&[]).unwrap(),
        temperature: Some(0.7),
        backoff: FailoverBackoff::none(),
    };
    ModelInvoker::new(transport, settings)
}

pub fn workflow(transport: Arc<dyn ChatTransport>, images: Arc<FakeImages>) -> DesignWorkflow {
    let settings = WorkflowSettings {
        max_concurrent_images: 2,
        image_count: 3,
        image_output_dir: "out".to_string(),
        wait_timeout: Duration::from_secs(5),
        model: None,
        registry_capacity: Some(64),
        prompts: PromptSet::default(),
    };
    DesignWorkflow::new(invoker(transport), images, TaskRegistry::new(), settings)
}
