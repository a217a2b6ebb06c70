//! Prompt templates for the design steps and the brief helpers.
//!
//! Built-in templates can be replaced per agent from the `[prompts]` config
//! section. Overrides use `{name}` placeholders; `{knowledge}` pulls in the
//! knowledge-base file. An override referencing a placeholder the call does
//! not provide is ignored in favour of the built-in template.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::config::PromptsConfig;
use crate::error::ConfigError;

pub const MARKET_ANALYST: &str = "market_analyst";
pub const VISUAL_RESEARCHER: &str = "visual_researcher";
pub const PRODUCT_DESIGNER: &str = "product_designer";
pub const AUTOCOMPLETE: &str = "autocomplete";
pub const TAGS: &str = "tags";

/// Used for `{knowledge}` when no knowledge file is available.
pub const NO_KNOWLEDGE: &str = "暂无外部知识库。";

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX
        .get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"))
}

const JSON_ONLY: &str = "\n\n⚠️ IMPORTANT: You must output ONLY valid JSON. No conversational text. \
No markdown blocks. No thinking process. Start with '{' and end with '}'.";

pub fn market_analysis(brief: &str) -> String {
    format!(
        "你是一名资深市场分析师。请针对以下产品需求进行市场分析，覆盖目标用户、竞品格局、价格带与机会点。\n\n\
产品需求：\n{brief}\n\n\
输出 JSON 对象，字段：\n\
- summary: 一句话核心结论\n\
- content: Markdown 格式的完整分析\n\
- visuals: 可选的插图概念数组，每项包含 prompt 字段{JSON_ONLY}"
    )
}

pub fn visual_research(brief: &str, market_analysis: &str) -> String {
    format!(
        "你是一名视觉设计研究员。请结合产品需求与市场分析，调研适合的造型语言、材质、色彩与参考风格。\n\n\
产品需求：\n{brief}\n\n\
市场分析：\n{market_analysis}\n\n\
输出 JSON 对象，字段：\n\
- summary: 一句话核心结论\n\
- content: Markdown 格式的视觉调研报告\n\
- visuals: 可选的风格参考数组，每项包含 prompt 字段{JSON_ONLY}"
    )
}

fn persona_suffix(prompt: &mut String, persona: &str) {
    let persona = persona.trim();
    if !persona.is_empty() {
        prompt.push_str(&format!("\n视角：{persona}\n"));
    }
}

pub fn design_generation(
    brief: &str,
    market_analysis: &str,
    visual_research: &str,
    image_count: usize,
    persona: &str,
) -> String {
    let mut prompt = format!(
        "你是一名产品设计师。请基于以下材料输出 {image_count} 个差异化的设计方案。\n\n\
产品需求：\n{brief}\n\n\
市场分析：\n{market_analysis}\n\n\
视觉调研：\n{visual_research}\n\n\
输出 JSON 对象，字段：\n\
- summary: 整体设计思路\n\
- prompts: 长度为 {image_count} 的数组，每项包含 title（方案名）、description（方案说明）、\
prompt（用于图像生成的英文描述）{JSON_ONLY}"
    );
    persona_suffix(&mut prompt, persona);
    prompt
}

pub fn autocomplete(brief: &str) -> String {
    format!(
        "You are an expert product manager and industrial design strategist.\n\
Please expand the following short user brief into a detailed, professional design requirement document.\n\
Include target audience, aesthetic preferences (CMF), functional requirements, and market positioning.\n\
Keep it concise but comprehensive (around 200-300 words).\n\n\
User Brief: \"{brief}\"\n\n\
Expanded Requirements:\n"
    )
}

pub fn tags(brief: &str) -> String {
    format!(
        "Analyze the following design brief and extract 3-6 relevant style or category tags.\n\
Return ONLY a JSON array of strings, e.g. [\"#Minimalist\", \"#SmartHome\", \"#EcoFriendly\"].\n\n\
Brief: \"{brief}\"\n"
    )
}

/// Substitutes `{name}` placeholders. `None` if the template references a
/// name missing from `vars`.
pub fn render_template(template: &str, vars: &HashMap<&str, String>) -> Option<String> {
    let mut missing = false;
    let rendered = placeholder_regex().replace_all(template, |caps: &Captures<'_>| {
        match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                missing = true;
                caps[0].to_string()
            }
        }
    });
    (!missing).then(|| rendered.into_owned())
}

/// Per-agent template overrides plus the knowledge-base text.
#[derive(Debug, Clone)]
pub struct PromptSet {
    overrides: HashMap<String, String>,
    knowledge: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            knowledge: NO_KNOWLEDGE.to_string(),
        }
    }
}

impl PromptSet {
    pub fn new(overrides: HashMap<String, String>, knowledge: impl Into<String>) -> Self {
        Self {
            overrides,
            knowledge: knowledge.into(),
        }
    }

    /// Reads the knowledge file, if configured and present.
    pub fn load(cfg: &PromptsConfig) -> Result<Self, ConfigError> {
        let knowledge = match cfg
            .knowledge_file
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(path) if Path::new(path).exists() => {
                std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_string(),
                    source,
                })?
            }
            Some(path) => {
                tracing::debug!(
                    target: "briefsmith.workflow",
                    stage = "prompts.no_knowledge",
                    path = %path
                );
                NO_KNOWLEDGE.to_string()
            }
            None => NO_KNOWLEDGE.to_string(),
        };
        Ok(Self::new(cfg.templates.clone(), knowledge))
    }

    pub fn knowledge(&self) -> &str {
        &self.knowledge
    }

    fn render(&self, agent: &str, vars: &[(&str, String)]) -> Option<String> {
        let template = self.overrides.get(agent)?;
        let mut map: HashMap<&str, String> = vars.iter().cloned().collect();
        map.entry("knowledge").or_insert_with(|| self.knowledge.clone());
        let rendered = render_template(template, &map);
        if rendered.is_none() {
            tracing::warn!(
                target: "briefsmith.workflow",
                stage = "prompts.override_ignored",
                agent = %agent
            );
        }
        rendered
    }

    pub fn market_analysis(&self, brief: &str) -> String {
        match self.render(MARKET_ANALYST, &[("brief", brief.to_string())]) {
            Some(prompt) => prompt + JSON_ONLY,
            None => market_analysis(brief),
        }
    }

    pub fn visual_research(&self, brief: &str, market: &str) -> String {
        let vars = [
            ("brief", brief.to_string()),
            ("market_analysis", market.to_string()),
        ];
        match self.render(VISUAL_RESEARCHER, &vars) {
            Some(prompt) => prompt + JSON_ONLY,
            None => visual_research(brief, market),
        }
    }

    pub fn design_generation(
        &self,
        brief: &str,
        market: &str,
        visual: &str,
        image_count: usize,
        persona: &str,
    ) -> String {
        let vars = [
            ("brief", brief.to_string()),
            ("market_analysis", market.to_string()),
            ("visual_research", visual.to_string()),
            ("image_count", image_count.to_string()),
        ];
        match self.render(PRODUCT_DESIGNER, &vars) {
            Some(prompt) => {
                let mut prompt = prompt + JSON_ONLY;
                persona_suffix(&mut prompt, persona);
                prompt
            }
            None => design_generation(brief, market, visual, image_count, persona),
        }
    }

    pub fn autocomplete(&self, brief: &str) -> String {
        self.render(AUTOCOMPLETE, &[("brief", brief.to_string())])
            .unwrap_or_else(|| autocomplete(brief))
    }

    pub fn tags(&self, brief: &str) -> String {
        self.render(TAGS, &[("brief", brief.to_string())])
            .unwrap_or_else(|| tags(brief))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_prompt_demands_json() {
        for prompt in [
            market_analysis("lamp"),
            visual_research("lamp", "ma"),
            design_generation("lamp", "ma", "vr", 4, ""),
            PromptSet::default().market_analysis("lamp"),
        ] {
            assert!(prompt.contains("output ONLY valid JSON"));
        }
    }

    #[test]
    fn overrides_fill_placeholders_and_knowledge() {
        let overrides = HashMap::from([(
            MARKET_ANALYST.to_string(),
            "Analyse {brief}. Context: {knowledge}".to_string(),
        )]);
        let set = PromptSet::new(overrides, "lamps sell in autumn");
        let prompt = set.market_analysis("a desk lamp");
        assert!(prompt.starts_with("Analyse a desk lamp. Context: lamps sell in autumn"));
        assert!(prompt.contains("output ONLY valid JSON"));
        assert_eq!(set.visual_research("lamp", "ma"), visual_research("lamp", "ma"));
    }

    #[test]
    fn override_with_unknown_placeholder_falls_back() {
        let overrides = HashMap::from([(
            PRODUCT_DESIGNER.to_string(),
            "Design for {audience}".to_string(),
        )]);
        let set = PromptSet::new(overrides, NO_KNOWLEDGE);
        assert_eq!(
            set.design_generation("lamp", "ma", "vr", 3, "critic"),
            design_generation("lamp", "ma", "vr", 3, "critic")
        );
    }

    #[test]
    fn json_braces_in_overrides_are_left_alone() {
        let vars = HashMap::from([("brief", "lamp".to_string())]);
        let out = render_template(r#"{brief} -> {"summary": "..."}"#, &vars).unwrap();
        assert_eq!(out, r#"lamp -> {"summary": "..."}"#);
    }

    #[test]
    fn knowledge_file_is_loaded_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("KNOWLEDGE.md");
        std::fs::write(&path, "walnut is trending").unwrap();

        let cfg = PromptsConfig {
            knowledge_file: Some(path.display().to_string()),
            templates: HashMap::new(),
        };
        assert_eq!(PromptSet::load(&cfg).unwrap().knowledge(), "walnut is trending");

        let missing = PromptsConfig {
            knowledge_file: Some(dir.path().join("nope.md").display().to_string()),
            templates: HashMap::new(),
        };
        assert_eq!(PromptSet::load(&missing).unwrap().knowledge(), NO_KNOWLEDGE);
    }

    #[test]
    fn persona_is_appended_only_when_present() {
        let with = design_generation("lamp", "ma", "vr", 2, "  年轻妈妈 ");
        assert!(with.ends_with("\n视角：年轻妈妈\n"));
        let without = design_generation("lamp", "ma", "vr", 2, "   ");
        assert!(!without.contains("视角"));
        assert!(without.contains("长度为 2 的数组"));
    }
}
