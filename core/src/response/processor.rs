use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::aliases::{
    FieldAlias, COMMON_LIST_KEYS, DESIGN_GENERATION_FIELDS, MARKET_ANALYSIS_FIELDS,
    NESTED_LIST_KEYS, VISUAL_RESEARCH_FIELDS,
};
use crate::error::ResponseError;

const PREVIEW_LIMIT: usize = 500;

static FENCE_REGEX: OnceLock<Regex> = OnceLock::new();
static CONTROL_REGEX: OnceLock<Regex> = OnceLock::new();

fn fence_regex() -> &'static Regex {
    FENCE_REGEX.get_or_init(|| Regex::new(r"(?is)```(?:json)?\s*(.*?)```").expect("static regex"))
}

fn control_regex() -> &'static Regex {
    CONTROL_REGEX
        .get_or_init(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]").expect("static regex"))
}

/// Removes control characters except `\t`, `\n` and `\r`.
pub fn strip_control_chars(s: &str) -> String {
    control_regex().replace_all(s, "").into_owned()
}

/// Contents of the first fenced code block, if any.
pub fn fenced_block(raw: &str) -> Option<&str> {
    fence_regex()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Slice from the first `{` to the last `}` inclusive.
pub fn outermost_braces(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Single-shot cleanup: fenced block, else outermost braces, then
/// control-character stripping.
pub fn clean_json_string(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let slice = fenced_block(trimmed)
        .or_else(|| outermost_braces(trimmed))
        .unwrap_or(trimmed);
    strip_control_chars(slice)
}

/// Recovers a JSON object from free-form model output.
///
/// Strategies, in order: fenced code block, outermost brace pair, the whole
/// text. Control characters are stripped before every attempt. The first
/// strategy that yields an object wins.
pub fn parse_json_object(raw: &str) -> Result<Map<String, Value>, ResponseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ResponseError::Empty);
    }

    let mut candidates: Vec<&str> = Vec::with_capacity(4);
    if let Some(block) = fenced_block(trimmed) {
        candidates.push(block);
        if let Some(inner) = outermost_braces(block) {
            candidates.push(inner);
        }
    }
    if let Some(slice) = outermost_braces(trimmed) {
        candidates.push(slice);
    }
    candidates.push(trimmed);

    let mut first_error: Option<ResponseError> = None;
    for candidate in candidates {
        let cleaned = strip_control_chars(candidate);
        match serde_json::from_str::<Value>(&cleaned) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(_) => {
                first_error.get_or_insert_with(|| ResponseError::NotAnObject {
                    preview: preview(&cleaned),
                });
            }
            Err(source) => {
                first_error.get_or_insert_with(|| ResponseError::Parse {
                    preview: preview(&cleaned),
                    source,
                });
            }
        }
    }

    let err = first_error.unwrap_or(ResponseError::Empty);
    tracing::warn!(
        target: "briefsmith.response",
        stage = "response.parse.failed",
        raw_chars = raw.chars().count(),
        error = %err
    );
    Err(err)
}

/// Python-style truthiness, used to decide whether a field "has a value".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Merges alias fields into their canonical names.
///
/// A canonical field that already has a value is left alone. Otherwise the
/// first alias with a value is copied in. Canonical fields still missing
/// afterwards get an empty default.
pub fn normalize_keys(mut data: Map<String, Value>, fields: &[FieldAlias]) -> Map<String, Value> {
    for field in fields {
        if data.get(field.canonical).map(is_truthy).unwrap_or(false) {
            continue;
        }

        let found = field
            .aliases
            .iter()
            .filter_map(|alias| data.get(*alias))
            .find(|v| is_truthy(v))
            .cloned();
        if let Some(value) = found {
            data.insert(field.canonical.to_string(), value);
        }

        if !data.contains_key(field.canonical) {
            let default = if field.list_valued {
                Value::Array(Vec::new())
            } else {
                Value::String(String::new())
            };
            data.insert(field.canonical.to_string(), default);
        }
    }
    data
}

/// Finds a list under `list_key`, nested one level under a common container
/// key, or under one of the common root list keys.
pub fn extract_list(data: &Map<String, Value>, list_key: &str) -> Vec<Value> {
    match data.get(list_key) {
        Some(Value::Array(items)) => return items.clone(),
        Some(Value::Object(inner)) => {
            for sub_key in NESTED_LIST_KEYS {
                if let Some(Value::Array(items)) = inner.get(*sub_key) {
                    return items.clone();
                }
            }
        }
        _ => {}
    }

    for key in COMMON_LIST_KEYS {
        if let Some(Value::Array(items)) = data.get(*key) {
            return items.clone();
        }
    }

    Vec::new()
}

/// Per-step response post-processing.
pub struct ResponseProcessor;

impl ResponseProcessor {
    pub fn process(
        raw: &str,
        fields: &[FieldAlias],
        list_key: &str,
    ) -> Result<Map<String, Value>, ResponseError> {
        let data = parse_json_object(raw)?;
        let mut normalized = normalize_keys(data, fields);
        let items = extract_list(&normalized, list_key);
        normalized.insert(list_key.to_string(), Value::Array(items));
        Ok(normalized)
    }

    pub fn process_market_analysis(raw: &str) -> Result<Map<String, Value>, ResponseError> {
        Self::process(raw, MARKET_ANALYSIS_FIELDS, "visuals")
    }

    pub fn process_visual_research(raw: &str) -> Result<Map<String, Value>, ResponseError> {
        Self::process(raw, VISUAL_RESEARCH_FIELDS, "visuals")
    }

    /// Every prompt object additionally gets an `image_path` key.
    pub fn process_design_generation(raw: &str) -> Result<Map<String, Value>, ResponseError> {
        let mut normalized = Self::process(raw, DESIGN_GENERATION_FIELDS, "prompts")?;
        if let Some(Value::Array(items)) = normalized.get_mut("prompts") {
            for item in items.iter_mut() {
                if let Value::Object(obj) = item {
                    obj.entry("image_path")
                        .or_insert_with(|| Value::String(String::new()));
                }
            }
        }
        Ok(normalized)
    }
}

/// Reads a tag list. A JSON array of strings is preferred; anything else is
/// split on commas.
pub fn parse_tags(raw: &str) -> Vec<String> {
    let cleaned = clean_json_string(raw);
    let split = |text: &str| -> Vec<String> {
        text.split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    };

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|t| !t.is_empty())
            .collect(),
        Ok(Value::String(s)) => split(&s),
        _ => split(&cleaned),
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() <= PREVIEW_LIMIT {
        return s.to_string();
    }
    let mut out: String = s.chars().take(PREVIEW_LIMIT).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn fenced_and_bare_forms_parse_identically() {
        let fenced = parse_json_object("```json\n{\"a\":1}\n```").unwrap();
        let bare = parse_json_object("noise{\"a\":1}noise").unwrap();
        assert_eq!(fenced, bare);
        assert_eq!(Value::Object(fenced), json!({"a": 1}));
    }

    #[test]
    fn fence_without_language_tag() {
        let map = parse_json_object("Here you go:\n```\n{\"k\": \"v\"}\n```\nThanks").unwrap();
        assert_eq!(Value::Object(map), json!({"k": "v"}));
    }

    #[test]
    fn broken_fence_falls_back_to_braces() {
        let raw = "```json\nnot json at all\n```\n{\"ok\": true}";
        let map = parse_json_object(raw).unwrap();
        assert_eq!(Value::Object(map), json!({"ok": true}));
    }

    #[test]
    fn control_characters_are_stripped() {
        let raw = "{\"a\":\u{0001}\"b\u{0007}\"}";
        let map = parse_json_object(raw).unwrap();
        assert_eq!(Value::Object(map), json!({"a": "b"}));
        assert_eq!(strip_control_chars("a\tb\nc\u{001f}"), "a\tb\nc");
    }

    #[test]
    fn errors_are_reported() {
        assert!(matches!(parse_json_object("   "), Err(ResponseError::Empty)));
        assert!(matches!(
            parse_json_object("just prose"),
            Err(ResponseError::Parse { .. })
        ));
        assert!(matches!(
            parse_json_object("[1, 2]"),
            Err(ResponseError::NotAnObject { .. })
        ));
    }

    #[test]
    fn clean_json_string_prefers_fence_then_braces() {
        assert_eq!(clean_json_string(""), "");
        assert_eq!(clean_json_string("x {\"a\": 1} y"), "{\"a\": 1}");
        assert_eq!(clean_json_string("```json\n{}\n```"), "{}");
    }

    #[test]
    fn tags_from_json_array_or_comma_list() {
        assert_eq!(
            parse_tags("```json\n[\"#Minimalist\", \" #SmartHome \"]\n```"),
            vec!["#Minimalist", "#SmartHome"]
        );
        assert_eq!(
            parse_tags("#Minimalist, #Walnut,, #Calm"),
            vec!["#Minimalist", "#Walnut", "#Calm"]
        );
        assert!(parse_tags("   ").is_empty());
    }

    #[test]
    fn canonical_name_wins_over_alias() {
        let data = obj(json!({"summary": "kept", "摘要": "ignored"}));
        let out = normalize_keys(data, MARKET_ANALYSIS_FIELDS);
        assert_eq!(out["summary"], json!("kept"));
    }

    #[test]
    fn alias_fills_empty_canonical_and_defaults_are_added() {
        let data = obj(json!({"summary": "", "核心摘要": "from alias", "report": "body"}));
        let out = normalize_keys(data, MARKET_ANALYSIS_FIELDS);
        assert_eq!(out["summary"], json!("from alias"));
        assert_eq!(out["content"], json!("body"));
        assert_eq!(out["visuals"], json!([]));
    }

    #[test]
    fn extract_list_handles_nesting_and_root_fallback() {
        let nested = obj(json!({"prompts": {"items": [{"prompt": "a"}]}}));
        assert_eq!(extract_list(&nested, "prompts"), vec![json!({"prompt": "a"})]);

        let root = obj(json!({"visuals": "none", "images": [1, 2]}));
        assert_eq!(extract_list(&root, "visuals"), vec![json!(1), json!(2)]);

        let nothing = obj(json!({"visuals": null}));
        assert!(extract_list(&nothing, "visuals").is_empty());
    }

    #[test]
    fn design_generation_adds_image_path() {
        let raw = r#"```json
{"设计思路": "warm minimalism", "schemes": [{"title": "A", "prompt": "walnut frame"}, {"title": "B", "prompt": "e-ink", "image_path": "x.png"}]}
```"#;
        let out = ResponseProcessor::process_design_generation(raw).unwrap();
        assert_eq!(out["summary"], json!("warm minimalism"));
        assert_eq!(
            out["prompts"],
            json!([
                {"title": "A", "prompt": "walnut frame", "image_path": ""},
                {"title": "B", "prompt": "e-ink", "image_path": "x.png"}
            ])
        );
    }

    #[test]
    fn market_analysis_merges_visual_aliases() {
        let raw = r#"Sure! {"conclusion": "c", "analysis": "text", "visual_concepts": [{"prompt": "p"}]}"#;
        let out = ResponseProcessor::process_market_analysis(raw).unwrap();
        assert_eq!(out["summary"], json!("c"));
        assert_eq!(out["content"], json!("text"));
        assert_eq!(out["visuals"], json!([{"prompt": "p"}]));
    }
}
