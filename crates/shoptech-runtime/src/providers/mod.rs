//! Reasoning-service abstractions for shoptech-runtime.
//!
//! This module defines the trait for reasoning providers (a language model
//! with a web search tool and structured output) and includes
//! implementations for the OpenAI Responses API and Google Gemini.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for secure credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use shoptech_core::{ServiceTier, ToolCallCounts, ToolKind, UsageCounters};

mod factory;
pub mod secrets;

#[cfg(feature = "gemini")]
mod gemini;
#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiProvider, GeminiProviderFactory, GEMINI_API_KEY_ENV};
#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory, OPENAI_API_KEY_ENV};

/// Errors from reasoning providers.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// The discounted tier rejected the request under load (not billed)
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Authentication failed")]
    Auth,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether a flex request may succeed if repeated later.
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(self, ProviderError::ResourceUnavailable(_))
    }
}

/// One call to the reasoning service.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    /// Model to use
    pub model: String,

    /// Static instructions and rubric (cacheable prefix)
    pub system_prompt: String,

    /// Per-input instructions, dynamic content last
    pub user_prompt: String,

    /// Ceiling on web search tool calls
    pub max_tool_calls: Option<u32>,

    /// Requested processing tier
    pub service_tier: ServiceTier,

    /// Cache-control hint for the static prefix
    pub prompt_cache_key: Option<String>,

    /// Cache retention hint (e.g. "24h")
    pub prompt_cache_retention: Option<String>,

    /// Reasoning effort ("low", "medium", "high")
    pub reasoning_effort: Option<String>,

    /// Ask for the debug-only `sources` list
    pub include_sources: bool,

    /// Request timeout
    pub timeout: Duration,
}

impl ReasoningRequest {
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_tool_calls: None,
            service_tier: ServiceTier::Auto,
            prompt_cache_key: None,
            prompt_cache_retention: None,
            reasoning_effort: None,
            include_sources: false,
            timeout: Duration::from_secs(120),
        }
    }
}

/// A web search tool invocation reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub kind: ToolKind,

    /// Service-reported status; only "completed" calls count
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ToolInvocation {
    /// Build an invocation, classifying it from whatever the service exposed.
    ///
    /// A non-empty query makes it a search; otherwise a URL makes it a page
    /// open. Failing both, the action name is used as a hint.
    pub fn classify(
        status: Option<&str>,
        query: Option<&str>,
        url: Option<&str>,
        action_hint: Option<&str>,
    ) -> Self {
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        let hint = action_hint.unwrap_or_default().trim().to_lowercase();

        let kind = if query.is_some() {
            ToolKind::Query
        } else if url.is_some() {
            ToolKind::Open
        } else if ["search", "query"].iter().any(|t| hint.contains(t)) {
            ToolKind::Query
        } else if ["open", "visit", "fetch", "browse"].iter().any(|t| hint.contains(t)) {
            ToolKind::Open
        } else {
            ToolKind::Unknown
        };

        Self {
            kind,
            status: status.unwrap_or("unknown").to_string(),
            query: query.map(String::from),
            url: url.map(String::from),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

/// A URL citation attached to the service's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Response from the reasoning service.
#[derive(Debug, Clone, Default)]
pub struct ReasoningResponse {
    /// Structured output text (expected to be JSON)
    pub text: String,

    /// Token counters; `input_tokens` excludes cached tokens
    pub tokens: UsageCounters,

    /// Web search tool invocations in the order reported
    pub tool_calls: Vec<ToolInvocation>,

    /// Tier the service actually processed the request on
    pub service_tier_used: ServiceTier,

    /// De-duplicated URL citations
    pub citations: Vec<Citation>,
}

impl ReasoningResponse {
    /// Completed tool invocations partitioned by kind.
    pub fn tool_call_counts(&self) -> ToolCallCounts {
        let mut counts = ToolCallCounts::default();
        for call in self.tool_calls.iter().filter(|c| c.is_completed()) {
            counts.record(call.kind);
        }
        counts
    }

    /// Token counters plus completed tool calls.
    pub fn usage(&self) -> UsageCounters {
        UsageCounters {
            tool_calls: self.tool_call_counts(),
            ..self.tokens
        }
    }
}

/// Provider abstraction allows swapping reasoning backends.
///
/// This is the ONLY place where remote calls are made.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Execute one structured-output call with the web search tool enabled.
    async fn respond(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ProviderError>;

    /// Check if provider is healthy.
    async fn health_check(&self) -> bool;

    /// Get provider name for logs.
    fn name(&self) -> &str;
}
