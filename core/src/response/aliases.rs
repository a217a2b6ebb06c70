//! Historical field names models have used for the same concept.
//!
//! Tables are consulted once per parse, in order. The canonical name wins
//! when it already carries a value.

/// One canonical field and the alternate names merged into it.
#[derive(Debug, Clone, Copy)]
pub struct FieldAlias {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    /// Missing list-valued fields default to `[]`, the rest to `""`.
    pub list_valued: bool,
}

impl FieldAlias {
    pub const fn text(canonical: &'static str, aliases: &'static [&'static str]) -> Self {
        Self {
            canonical,
            aliases,
            list_valued: false,
        }
    }

    pub const fn list(canonical: &'static str, aliases: &'static [&'static str]) -> Self {
        Self {
            canonical,
            aliases,
            list_valued: true,
        }
    }
}

pub const MARKET_ANALYSIS_FIELDS: &[FieldAlias] = &[
    FieldAlias::text("summary", &["摘要", "核心摘要", "summary_text", "conclusion"]),
    FieldAlias::text(
        "content",
        &["内容", "报告", "report", "analysis", "market_analysis"],
    ),
    FieldAlias::list("visuals", &["prompts", "images", "pictures", "visual_concepts"]),
];

pub const VISUAL_RESEARCH_FIELDS: &[FieldAlias] = &[
    FieldAlias::text("summary", &["摘要", "核心摘要", "summary_text"]),
    FieldAlias::text(
        "content",
        &["内容", "报告", "report", "research", "visual_research"],
    ),
    FieldAlias::list("visuals", &["prompts", "images", "pictures", "style_concepts"]),
];

pub const DESIGN_GENERATION_FIELDS: &[FieldAlias] = &[
    FieldAlias::text("summary", &["摘要", "核心摘要", "设计思路", "design_concept"]),
    FieldAlias::list("prompts", &["schemes", "designs", "proposals", "方案", "设计方案"]),
];

/// Sub-keys searched when a list field holds an object instead of a list.
pub const NESTED_LIST_KEYS: &[&str] = &["list", "items", "data", "values", "details"];

/// Root keys searched when the requested list key holds nothing usable.
pub const COMMON_LIST_KEYS: &[&str] = &["prompts", "visuals", "images", "schemes", "items", "list"];
