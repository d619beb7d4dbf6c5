//! Prompts for shop platform detection.
//!
//! Prompts are laid out for maximum cache efficiency:
//! 1. Base instructions + rubric (identical for every input) - cached
//! 2. Dynamic content (tool budget, extra blocks, URL) - last, not cached

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Base system prompt shared by every attempt.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are a specialized e-commerce technology analyst.

You will be given:
- a shop or company website URL
- a rubric (below)

Your job:
- determine which shop platform the website runs on, using the web search tool
- apply the rubric's evidence tiers
- return ONLY valid JSON matching the provided schema (no extra keys, no markdown)

Evidence discipline:
- Do not hallucinate. If evidence is missing, say so and lower confidence.
- Prefer first-party evidence (assets, headers, checkout flow) over third-party claims.
- Confidence must match the evidence tier: tier A is high, tier B is medium or high, tier C is low or medium.

Entity disambiguation:
- Be mindful of same-name or lookalike shops. Check that a source is actually about the
  website behind the provided URL (domain consistency, imprint, branding).
"#;

/// Added to primary attempts when a second query is allowed on uncertainty.
pub const SECOND_QUERY_BLOCK: &str = r#"
Extra instructions:
- Default to ONE web search query.
- If (and only if) the first query does NOT yield trustworthy evidence about the shop behind the provided domain
  (domain parked or inactive, results about different entities, several similarly named shops), run exactly ONE
  additional disambiguation query.
- Do not use more than two queries total.
"#;

/// Added to retry attempts after a low-confidence primary result.
pub const DISAMBIGUATION_BLOCK: &str = r#"
Extra instructions (retry):
- A previous attempt could not establish the platform with confidence.
- First verify you are looking at the right shop: confirm the domain, imprint or legal entity, and storefront.
- Then look for direct platform evidence: asset hosts, theme paths, cookies, checkout domains, generator tags.
- Only raise confidence if the new evidence actually supports it; otherwise keep it low.
"#;

const SOURCES_INSTRUCTION: &str = "  - include a short list of consulted sources under `sources` (max 8 entries); \
URLs are allowed ONLY inside `sources`, not in `reasoning`.\n";

/// The opaque rubric text appended to the base instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RubricTemplate {
    /// Label shown to the model (usually the file path)
    pub label: String,
    pub text: String,
}

impl RubricTemplate {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }

    /// Load a rubric from a file.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Ok(Self::new(path.display().to_string(), text))
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.label)
    }
}

impl Default for RubricTemplate {
    fn default() -> Self {
        Self::new(
            "builtin",
            "Evidence tiers:\n\
             - A: direct first-party proof served by the shop itself.\n\
             - B: strong indirect signals (job ads, agency case studies, tech profilers agreeing).\n\
             - C: weak or circumstantial signals only.\n\
             Use `unknown` when no tier-C evidence exists and `other` for platforms outside the enum.",
        )
    }
}

/// Which instruction block an attempt carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    Primary {
        second_query_on_uncertainty: bool,
    },
    Retry,
}

/// Build the static system prompt: base instructions plus rubric.
pub fn build_system_prompt(rubric: &RubricTemplate) -> String {
    format!(
        "{}\n\nRubric: {}\n\n{}\n",
        BASE_SYSTEM_PROMPT.trim(),
        rubric.label,
        rubric.text.trim()
    )
}

/// Build the per-input user prompt. The URL is always the last line.
pub fn build_user_prompt(
    canonical_url: &str,
    max_tool_calls: Option<u32>,
    variant: PromptVariant,
    include_sources: bool,
) -> String {
    let budget_line = max_tool_calls
        .map(|n| {
            format!(
                "- Tool-call budget: you can make at most {} web search tool call(s). Use them wisely.\n",
                n
            )
        })
        .unwrap_or_default();

    let extra_block = match variant {
        PromptVariant::Primary {
            second_query_on_uncertainty: true,
        } => SECOND_QUERY_BLOCK,
        PromptVariant::Primary { .. } => "",
        PromptVariant::Retry => DISAMBIGUATION_BLOCK,
    };

    let sources = if include_sources { SOURCES_INSTRUCTION } else { "" };

    format!(
        "Determine the shop platform of this website.\n\n\
         Instructions:\n\
         - Use the web search tool to inspect the website itself and corroborating sources.\n\
         {budget_line}\
         - Be conservative when evidence is missing.\n\
         {extra_block}\
         - In the JSON output:\n  \
         - set input_url exactly to the website URL below\n  \
         - keep reasoning SHORT (max 600 characters, 2-4 sentences)\n\
         {sources}  \
         - do NOT include URLs in `reasoning`\n\n\
         Website URL: {canonical_url}\n"
    )
}

/// Cache key for the static prompt prefix: `shoptech:<model>:<hash>`.
pub fn prompt_cache_key(model: &str, system_prompt: &str) -> String {
    let mut hasher = DefaultHasher::new();
    system_prompt.hash(&mut hasher);
    let hash = format!("{:016x}", hasher.finish());
    format!("shoptech:{}:{}", model, &hash[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_contains_rubric() {
        let rubric = RubricTemplate::new("rubrics/v1.md", "Tier rules here.");
        let prompt = build_system_prompt(&rubric);
        assert!(prompt.starts_with("You are a specialized"));
        assert!(prompt.contains("Rubric: rubrics/v1.md"));
        assert!(prompt.contains("Tier rules here."));
    }

    #[test]
    fn test_url_is_last() {
        let prompt = build_user_prompt(
            "https://shop.example.com",
            Some(2),
            PromptVariant::Primary {
                second_query_on_uncertainty: false,
            },
            false,
        );
        assert!(prompt.trim_end().ends_with("Website URL: https://shop.example.com"));
        assert!(prompt.contains("at most 2 web search tool call(s)"));
        assert!(!prompt.contains("Extra instructions"));
        assert!(!prompt.contains("`sources`"));
    }

    #[test]
    fn test_variant_blocks() {
        let second = build_user_prompt(
            "https://a.de",
            None,
            PromptVariant::Primary {
                second_query_on_uncertainty: true,
            },
            false,
        );
        assert!(second.contains("Default to ONE web search query"));
        assert!(!second.contains("Tool-call budget"));

        let retry = build_user_prompt("https://a.de", Some(3), PromptVariant::Retry, true);
        assert!(retry.contains("Extra instructions (retry)"));
        assert!(retry.contains("`sources`"));
    }

    #[test]
    fn test_cache_key_shape() {
        let key = prompt_cache_key("gpt-5.2", "system");
        assert!(key.starts_with("shoptech:gpt-5.2:"));
        assert_eq!(key.rsplit(':').next().unwrap().len(), 12);
        assert_eq!(key, prompt_cache_key("gpt-5.2", "system"));
        assert_ne!(key, prompt_cache_key("gpt-5.2", "system v2"));
    }

    #[test]
    fn test_rubric_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rubric.md");
        std::fs::write(&path, "Custom rubric").unwrap();

        let rubric = RubricTemplate::from_file(&path).unwrap();
        assert_eq!(rubric.text, "Custom rubric");
        assert_eq!(rubric.path(), path);
    }
}
