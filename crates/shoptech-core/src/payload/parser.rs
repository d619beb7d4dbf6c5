//! Typed platform payload and its boundary validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::schema::validate_payload_schema;
use crate::patterns::{contains_raw_url, sentence_count};
use crate::types::{Confidence, EvidenceTier, Platform};

/// Maximum characters in `reasoning`.
pub const MAX_REASONING_CHARS: usize = 600;

/// Maximum entries in `signals` and `sources`.
pub const MAX_LIST_ENTRIES: usize = 8;

/// Maximum characters of a single signal.
pub const MAX_SIGNAL_CHARS: usize = 120;

/// Recommended sentence range for `reasoning`.
pub const REASONING_SENTENCES: std::ops::RangeInclusive<usize> = 2..=4;

/// Reasons a payload from the reasoning service is rejected.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Payload is not valid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Payload violates schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Reasoning has {0} characters (max {MAX_REASONING_CHARS})")]
    ReasoningTooLong(usize),

    #[error("Reasoning contains a raw URL")]
    ReasoningContainsUrl,

    #[error("Too many {field}: {count} (max {MAX_LIST_ENTRIES})")]
    TooManyEntries { field: &'static str, count: usize },

    #[error("Signal {index} has {chars} characters (max {MAX_SIGNAL_CHARS})")]
    SignalTooLong { index: usize, chars: usize },

    #[error("Confidence '{confidence}' is inconsistent with evidence tier {tier}")]
    InconsistentConfidence {
        tier: EvidenceTier,
        confidence: Confidence,
    },

    #[error("Missing input_url")]
    MissingInputUrl,
}

/// The structured classification returned for one shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformPayload {
    pub input_url: String,
    pub final_platform: Platform,
    pub confidence: Confidence,
    pub evidence_tier: EvidenceTier,

    /// Short evidence snippets (max 8)
    pub signals: Vec<String>,

    /// 2-4 sentences, no raw URLs
    pub reasoning: String,

    /// Debug-only list of consulted sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

impl PlatformPayload {
    /// Parse and fully validate a payload from raw service text.
    pub fn from_json(text: &str) -> Result<Self, PayloadError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;
        Self::from_value(value)
    }

    /// Validate a JSON value against the schema, then the semantic rules.
    pub fn from_value(value: serde_json::Value) -> Result<Self, PayloadError> {
        validate_payload_schema(&value).map_err(PayloadError::SchemaError)?;
        let payload: PlatformPayload = serde_json::from_value(value)?;
        payload.validate()?;
        Ok(payload)
    }

    /// Check the rules the JSON Schema cannot express.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.input_url.trim().is_empty() {
            return Err(PayloadError::MissingInputUrl);
        }

        let chars = self.reasoning.chars().count();
        if chars > MAX_REASONING_CHARS {
            return Err(PayloadError::ReasoningTooLong(chars));
        }
        if contains_raw_url(&self.reasoning) {
            return Err(PayloadError::ReasoningContainsUrl);
        }

        if self.signals.len() > MAX_LIST_ENTRIES {
            return Err(PayloadError::TooManyEntries {
                field: "signals",
                count: self.signals.len(),
            });
        }
        for (index, signal) in self.signals.iter().enumerate() {
            let chars = signal.chars().count();
            if chars > MAX_SIGNAL_CHARS {
                return Err(PayloadError::SignalTooLong { index, chars });
            }
        }
        if let Some(sources) = &self.sources {
            if sources.len() > MAX_LIST_ENTRIES {
                return Err(PayloadError::TooManyEntries {
                    field: "sources",
                    count: sources.len(),
                });
            }
        }

        if !self.evidence_tier.allowed_confidence().contains(&self.confidence) {
            return Err(PayloadError::InconsistentConfidence {
                tier: self.evidence_tier,
                confidence: self.confidence,
            });
        }

        let sentences = sentence_count(&self.reasoning);
        if !REASONING_SENTENCES.contains(&sentences) {
            tracing::debug!(
                input_url = %self.input_url,
                sentences,
                "Reasoning outside the recommended sentence range"
            );
        }

        Ok(())
    }

    /// The downgraded result used when no valid evidence could be obtained.
    pub fn unobtainable(input_url: impl Into<String>) -> Self {
        Self {
            input_url: input_url.into(),
            final_platform: Platform::Unknown,
            confidence: Confidence::Low,
            evidence_tier: EvidenceTier::C,
            signals: Vec::new(),
            reasoning: "Evidence about the shop platform was unobtainable. \
                        The classification defaults to unknown."
                .to_string(),
            sources: None,
        }
    }

    /// Whether this payload is the downgraded default.
    pub fn is_unknown(&self) -> bool {
        self.final_platform == Platform::Unknown
    }
}
