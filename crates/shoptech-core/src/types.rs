//! Core types for shop platform evaluation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

/// One unit of work read from the input list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationInput {
    /// Normalized identifier used for dedupe and resume
    pub key: String,

    /// The URL as it appeared in the input
    pub url: String,

    /// Optional display name (company or shop name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Optional bucket/group label carried through to the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

impl EvaluationInput {
    /// Create an input from a raw URL. The key is derived with [`normalize_key`].
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into().trim().to_string();
        Self {
            key: normalize_key(&url),
            url,
            name: None,
            bucket: None,
        }
    }

    /// Attach a display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.trim().is_empty()).then(|| name.trim().to_string());
        self
    }

    /// Attach a bucket label.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        self.bucket = (!bucket.trim().is_empty()).then(|| bucket.trim().to_string());
        self
    }

    /// The URL in the form sent to the reasoning service.
    pub fn canonical_url(&self) -> String {
        canonical_url(&self.url)
    }

    /// Whether the key is usable.
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty()
    }
}

/// Normalize a URL into a dedupe/resume key.
///
/// Strips the scheme and trailing slashes, keeps host, path and query, and
/// lowercases the result. `https://Shop.example.com/` and `shop.example.com`
/// map to the same key; `shop.example.com/de` stays distinct.
pub fn normalize_key(url: &str) -> String {
    let trimmed = url.trim();
    let lower = trimmed.to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);

    // Fragments never identify a different shop.
    let without_fragment = without_scheme
        .split_once('#')
        .map(|(head, _)| head)
        .unwrap_or(without_scheme);

    without_fragment.trim().trim_end_matches('/').to_string()
}

/// Prefix `https://` when the URL has no scheme.
pub fn canonical_url(url: &str) -> String {
    let trimmed = url.trim();
    let lower = trimmed.to_lowercase();
    if trimmed.is_empty() || lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Detected e-commerce platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Magento,
    Shopware,
    Woocommerce,
    Shopify,
    Other,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Magento => "magento",
            Platform::Shopware => "shopware",
            Platform::Woocommerce => "woocommerce",
            Platform::Shopify => "shopify",
            Platform::Other => "other",
            Platform::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence of a classification. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    /// Whether this is the lowest tier.
    pub fn is_lowest(&self) -> bool {
        *self == Confidence::Low
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength of the evidence behind a classification.
///
/// - `A`: direct first-party proof (e.g. platform assets served by the shop)
/// - `B`: strong indirect signals
/// - `C`: weak or circumstantial signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceTier {
    A,
    B,
    C,
}

impl EvidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceTier::A => "A",
            EvidenceTier::B => "B",
            EvidenceTier::C => "C",
        }
    }

    /// Confidence values that are consistent with this tier.
    pub fn allowed_confidence(&self) -> &'static [Confidence] {
        match self {
            EvidenceTier::A => &[Confidence::High],
            EvidenceTier::B => &[Confidence::Medium, Confidence::High],
            EvidenceTier::C => &[Confidence::Low, Confidence::Medium],
        }
    }
}

impl fmt::Display for EvidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing tier of the reasoning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTier {
    /// Standard processing
    #[default]
    Auto,

    /// Discounted, slower processing that may reject requests under load
    Flex,
}

impl ServiceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceTier::Auto => "auto",
            ServiceTier::Flex => "flex",
        }
    }

    pub fn is_discounted(&self) -> bool {
        matches!(self, ServiceTier::Flex)
    }
}

impl fmt::Display for ServiceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" | "default" | "standard" => Ok(ServiceTier::Auto),
            "flex" => Ok(ServiceTier::Flex),
            other => Err(format!("unknown service tier '{}': use auto or flex", other)),
        }
    }
}

/// Kind of a web search tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// A search query
    Query,

    /// Opening or visiting a specific page
    Open,

    /// Could not be classified
    Unknown,
}

/// Completed tool invocations partitioned by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallCounts {
    pub query: u32,
    pub open: u32,
    pub unknown: u32,
}

impl ToolCallCounts {
    pub fn new(query: u32, open: u32, unknown: u32) -> Self {
        Self {
            query,
            open,
            unknown,
        }
    }

    /// Count one invocation of the given kind.
    pub fn record(&mut self, kind: ToolKind) {
        match kind {
            ToolKind::Query => self.query += 1,
            ToolKind::Open => self.open += 1,
            ToolKind::Unknown => self.unknown += 1,
        }
    }

    pub fn get(&self, kind: ToolKind) -> u32 {
        match kind {
            ToolKind::Query => self.query,
            ToolKind::Open => self.open,
            ToolKind::Unknown => self.unknown,
        }
    }

    pub fn total(&self) -> u32 {
        self.query + self.open + self.unknown
    }
}

impl Add for ToolCallCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            query: self.query + rhs.query,
            open: self.open + rhs.open,
            unknown: self.unknown + rhs.unknown,
        }
    }
}

impl AddAssign for ToolCallCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Raw usage counters of one or more reasoning-service calls.
///
/// `input_tokens` excludes cache hits; cached tokens are counted only in
/// `cached_input_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,

    /// Reasoning tokens, already included in `output_tokens`
    #[serde(default)]
    pub reasoning_tokens: u64,

    pub tool_calls: ToolCallCounts,
}

impl UsageCounters {
    /// All billed tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.cached_input_tokens + self.output_tokens
    }
}

impl Add for UsageCounters {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            cached_input_tokens: self.cached_input_tokens + rhs.cached_input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            reasoning_tokens: self.reasoning_tokens + rhs.reasoning_tokens,
            tool_calls: self.tool_calls + rhs.tool_calls,
        }
    }
}

impl AddAssign for UsageCounters {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for UsageCounters {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, u| acc + u)
    }
}

impl<'a> Sum<&'a UsageCounters> for UsageCounters {
    fn sum<I: Iterator<Item = &'a UsageCounters>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key_strips_scheme_and_slash() {
        assert_eq!(normalize_key("https://Shop.Example.com/"), "shop.example.com");
        assert_eq!(normalize_key("http://shop.example.com"), "shop.example.com");
        assert_eq!(normalize_key("  shop.example.com//  "), "shop.example.com");
    }

    #[test]
    fn test_normalize_key_keeps_path_and_query() {
        assert_eq!(normalize_key("https://example.com/de/?a=1"), "example.com/de/?a=1");
        assert_ne!(normalize_key("example.com/de"), normalize_key("example.com/at"));
        assert_eq!(normalize_key("example.com/#top"), "example.com");
    }

    #[test]
    fn test_canonical_url() {
        assert_eq!(canonical_url("example.com"), "https://example.com");
        assert_eq!(canonical_url("http://example.com"), "http://example.com");
        assert_eq!(canonical_url(""), "");
    }

    #[test]
    fn test_input_builder() {
        let input = EvaluationInput::new(" https://a.com/ ")
            .with_name("A GmbH")
            .with_bucket("  ");
        assert_eq!(input.key, "a.com");
        assert_eq!(input.url, "https://a.com/");
        assert_eq!(input.name.as_deref(), Some("A GmbH"));
        assert!(input.bucket.is_none());
        assert!(input.is_valid());
        assert!(!EvaluationInput::new("   ").is_valid());
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
        assert!(Confidence::Low.is_lowest());
    }

    #[test]
    fn test_usage_addition() {
        let a = UsageCounters {
            input_tokens: 10,
            cached_input_tokens: 5,
            output_tokens: 3,
            reasoning_tokens: 1,
            tool_calls: ToolCallCounts::new(1, 2, 0),
        };
        let b = UsageCounters {
            input_tokens: 20,
            cached_input_tokens: 0,
            output_tokens: 7,
            reasoning_tokens: 0,
            tool_calls: ToolCallCounts::new(2, 0, 1),
        };
        let sum: UsageCounters = [a, b].iter().sum();
        assert_eq!(sum.input_tokens, 30);
        assert_eq!(sum.cached_input_tokens, 5);
        assert_eq!(sum.output_tokens, 10);
        assert_eq!(sum.tool_calls, ToolCallCounts::new(3, 2, 1));
        assert_eq!(sum.total_tokens(), 45);
    }

    #[test]
    fn test_service_tier_parse() {
        assert_eq!("flex".parse::<ServiceTier>().unwrap(), ServiceTier::Flex);
        assert_eq!("AUTO".parse::<ServiceTier>().unwrap(), ServiceTier::Auto);
        assert!("priority".parse::<ServiceTier>().is_err());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&Platform::Woocommerce).unwrap(), "\"woocommerce\"");
        assert_eq!(serde_json::to_string(&EvidenceTier::B).unwrap(), "\"B\"");
        assert_eq!(serde_json::to_string(&Confidence::Medium).unwrap(), "\"medium\"");
    }
}
