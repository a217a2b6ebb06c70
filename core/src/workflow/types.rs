use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalized output of one design step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub summary: String,
    pub content: String,
    /// Illustration concepts attached to the research steps.
    #[serde(default)]
    pub visuals: Vec<Value>,
    /// Design schemes; each carries `prompt` and `image_path`.
    #[serde(default)]
    pub prompts: Vec<Value>,
}

impl StepOutput {
    pub fn from_map(data: &Map<String, Value>) -> Self {
        Self {
            summary: text_field(data, "summary"),
            content: text_field(data, "content"),
            visuals: list_field(data, "visuals"),
            prompts: list_field(data, "prompts"),
        }
    }

    /// `> 💡 **核心摘要**: ...` followed by concept images and the body.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if !self.summary.is_empty() {
            out.push_str(&format!("> 💡 **核心摘要**: {}\n\n", self.summary));
        }
        for path in image_paths(&self.visuals) {
            out.push_str(&format!("\n![Concept]({path})\n"));
        }
        out.push_str(&self.content);
        out
    }

    pub fn image_paths(&self) -> Vec<&str> {
        let mut paths = image_paths(&self.visuals);
        paths.extend(image_paths(&self.prompts));
        paths
    }
}

fn text_field(data: &Map<String, Value>, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn list_field(data: &Map<String, Value>, key: &str) -> Vec<Value> {
    match data.get(key) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn image_paths(items: &[Value]) -> Vec<&str> {
    items
        .iter()
        .filter_map(|item| item.get("image_path").and_then(Value::as_str))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Full result of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignReport {
    pub brief: String,
    pub market_analysis: StepOutput,
    pub visual_research: StepOutput,
    pub design: StepOutput,
}

impl DesignReport {
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# 设计报告\n\n");
        out.push_str(&format!("**Brief**: {}\n\n", self.brief.trim()));

        out.push_str("## 1. 市场分析\n\n");
        out.push_str(&self.market_analysis.to_markdown());
        out.push_str("\n\n## 2. 视觉调研\n\n");
        out.push_str(&self.visual_research.to_markdown());
        out.push_str("\n\n## 3. 设计方案\n\n");
        if !self.design.summary.is_empty() {
            out.push_str(&format!("> 💡 **核心摘要**: {}\n\n", self.design.summary));
        }

        for (idx, item) in self.design.prompts.iter().enumerate() {
            let title = item
                .get("title")
                .or_else(|| item.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("");
            out.push_str(&format!("### 方案 {}", idx + 1));
            if !title.is_empty() {
                out.push_str(&format!(": {title}"));
            }
            out.push_str("\n\n");
            if let Some(prompt) = item.get("prompt").and_then(Value::as_str) {
                out.push_str(prompt);
                out.push_str("\n\n");
            }
            if let Some(path) = item
                .get("image_path")
                .and_then(Value::as_str)
                .filter(|p| !p.is_empty())
            {
                out.push_str(&format!("![方案 {}]({path})\n\n", idx + 1));
            }
        }
        out
    }

    pub fn generated_images(&self) -> Vec<&str> {
        let mut paths = self.market_analysis.image_paths();
        paths.extend(self.visual_research.image_paths());
        paths.extend(self.design.image_paths());
        paths
    }
}
