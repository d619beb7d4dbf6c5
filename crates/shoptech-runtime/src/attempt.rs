//! Attempt executor: exactly one logical call to the reasoning service.
//!
//! An attempt knows nothing about the orchestration retry. It builds the
//! request, applies the per-call timeout and the flex-tier retry/fallback,
//! and re-validates the structured payload locally.

use backon::Retryable;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use shoptech_core::{EvaluationInput, PlatformPayload, ServiceTier, ToolCallCounts, UsageCounters};

use crate::config::RuntimeConfig;
use crate::prompts::{
    build_system_prompt, build_user_prompt, prompt_cache_key, PromptVariant, RubricTemplate,
};
use crate::providers::{
    Citation, ProviderError, ReasoningProvider, ReasoningRequest, ReasoningResponse,
    ToolInvocation,
};

/// Position of an attempt within one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptKind {
    Primary,
    Retry,
}

impl AttemptKind {
    /// 0 for the primary, 1 for the retry.
    pub fn index(&self) -> u8 {
        match self {
            AttemptKind::Primary => 0,
            AttemptKind::Retry => 1,
        }
    }
}

/// Tagged result of one attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// A payload that passed schema and semantic validation
    Success(PlatformPayload),

    /// The service answered, but the payload was rejected
    SchemaViolation(String),

    /// Network failure, timeout or remote unavailability
    TransportError(ProviderError),
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success(_) => "success",
            AttemptOutcome::SchemaViolation(_) => "schema_violation",
            AttemptOutcome::TransportError(_) => "transport_error",
        }
    }

    pub fn payload(&self) -> Option<&PlatformPayload> {
        match self {
            AttemptOutcome::Success(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Record of one call to the reasoning service.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub kind: AttemptKind,
    pub outcome: AttemptOutcome,

    /// Raw counters; zero when no response was received
    pub usage: UsageCounters,

    /// Wall-clock time including flex backoff
    pub duration: Duration,

    pub service_tier_requested: ServiceTier,
    pub service_tier_used: ServiceTier,

    pub tool_calls: Vec<ToolInvocation>,
    pub citations: Vec<Citation>,

    /// Flex rejections that were retried
    pub tier_retries: u32,

    /// Whether the attempt fell back to the standard tier
    pub fallback_used: bool,
}

impl Attempt {
    pub fn index(&self) -> u8 {
        self.kind.index()
    }

    /// Compact summary for debug output.
    pub fn summary(&self) -> AttemptSummary {
        AttemptSummary {
            index: self.index(),
            kind: self.kind,
            outcome: self.outcome.label(),
            error: match &self.outcome {
                AttemptOutcome::Success(_) => None,
                AttemptOutcome::SchemaViolation(reason) => Some(reason.clone()),
                AttemptOutcome::TransportError(e) => Some(e.to_string()),
            },
            confidence: self.outcome.payload().map(|p| p.confidence.as_str()),
            tool_calls: self.usage.tool_calls,
            service_tier_used: self.service_tier_used,
            duration_seconds: self.duration.as_secs_f64(),
            tier_retries: self.tier_retries,
            fallback_used: self.fallback_used,
        }
    }
}

/// Serializable view of an [`Attempt`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptSummary {
    pub index: u8,
    pub kind: AttemptKind,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<&'static str>,
    pub tool_calls: ToolCallCounts,
    pub service_tier_used: ServiceTier,
    pub duration_seconds: f64,
    pub tier_retries: u32,
    pub fallback_used: bool,
}

/// Executes single attempts against a reasoning provider.
pub struct AttemptExecutor {
    provider: Arc<dyn ReasoningProvider>,
    config: RuntimeConfig,
    system_prompt: String,
    cache_key: Option<String>,
}

impl AttemptExecutor {
    pub fn new(
        provider: Arc<dyn ReasoningProvider>,
        config: RuntimeConfig,
        rubric: &RubricTemplate,
    ) -> Self {
        let system_prompt = build_system_prompt(rubric);
        let cache_key = config
            .prompt_cache
            .enabled
            .then(|| prompt_cache_key(&config.model, &system_prompt));
        Self {
            provider,
            config,
            system_prompt,
            cache_key,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn build_request(
        &self,
        input: &EvaluationInput,
        max_tool_calls: Option<u32>,
        kind: AttemptKind,
    ) -> ReasoningRequest {
        let variant = match kind {
            AttemptKind::Primary => PromptVariant::Primary {
                second_query_on_uncertainty: self.config.second_query_on_uncertainty,
            },
            AttemptKind::Retry => PromptVariant::Retry,
        };
        let user_prompt = build_user_prompt(
            &input.canonical_url(),
            max_tool_calls,
            variant,
            self.config.include_sources,
        );

        let mut request =
            ReasoningRequest::new(&self.config.model, &self.system_prompt, user_prompt);
        request.max_tool_calls = max_tool_calls;
        request.service_tier = self.config.service_tier;
        request.prompt_cache_key = self.cache_key.clone();
        request.prompt_cache_retention = self
            .cache_key
            .as_ref()
            .and(self.config.prompt_cache.retention.clone());
        request.reasoning_effort = self.config.reasoning_effort.clone();
        request.include_sources = self.config.include_sources;
        request.timeout = self.config.effective_timeout();
        request
    }

    async fn call_once(
        &self,
        request: &ReasoningRequest,
    ) -> Result<ReasoningResponse, ProviderError> {
        match tokio::time::timeout(request.timeout, self.provider.respond(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(request.timeout)),
        }
    }

    /// Run one attempt. Never panics and never returns early with an error:
    /// every failure is captured in [`Attempt::outcome`].
    pub async fn run_attempt(
        &self,
        input: &EvaluationInput,
        max_tool_calls: Option<u32>,
        kind: AttemptKind,
    ) -> Attempt {
        let mut request = self.build_request(input, max_tool_calls, kind);
        let requested = request.service_tier;
        let started = Instant::now();
        let mut tier_retries = 0u32;
        let mut fallback_used = false;

        let first = if requested.is_discounted() {
            let req = &request;
            (|| async move { self.call_once(req).await })
                .retry(self.config.flex.backoff())
                .when(|e: &ProviderError| e.is_resource_unavailable())
                .notify(|e: &ProviderError, delay: Duration| {
                    tier_retries += 1;
                    tracing::warn!(
                        key = %input.key,
                        error = %e,
                        delay = ?delay,
                        "Flex tier unavailable, backing off"
                    );
                })
                .await
        } else {
            self.call_once(&request).await
        };

        let response = match first {
            Err(e)
                if e.is_resource_unavailable()
                    && requested.is_discounted()
                    && self.config.flex.fallback_to_auto =>
            {
                tracing::warn!(key = %input.key, "Flex retries exhausted, falling back to auto tier");
                request.service_tier = ServiceTier::Auto;
                fallback_used = true;
                self.call_once(&request).await
            }
            other => other,
        };

        let mut attempt = Attempt {
            kind,
            outcome: AttemptOutcome::SchemaViolation(String::new()),
            usage: UsageCounters::default(),
            duration: Duration::ZERO,
            service_tier_requested: requested,
            service_tier_used: request.service_tier,
            tool_calls: Vec::new(),
            citations: Vec::new(),
            tier_retries,
            fallback_used,
        };

        attempt.outcome = match response {
            Err(e) => {
                tracing::warn!(key = %input.key, attempt = kind.index(), error = %e, "Attempt failed");
                AttemptOutcome::TransportError(e)
            }
            Ok(response) => {
                attempt.usage = response.usage();
                if !fallback_used {
                    attempt.service_tier_used = response.service_tier_used;
                }
                attempt.tool_calls = response.tool_calls;
                attempt.citations = response.citations;

                match PlatformPayload::from_json(&response.text) {
                    Ok(payload) => AttemptOutcome::Success(payload),
                    Err(e) => {
                        tracing::warn!(
                            key = %input.key,
                            attempt = kind.index(),
                            error = %e,
                            "Payload rejected"
                        );
                        AttemptOutcome::SchemaViolation(e.to_string())
                    }
                }
            }
        };
        attempt.duration = started.elapsed();

        tracing::debug!(
            key = %input.key,
            attempt = kind.index(),
            outcome = attempt.outcome.label(),
            tier = %attempt.service_tier_used,
            tool_calls = attempt.usage.tool_calls.total(),
            "Attempt finished"
        );
        attempt
    }
}
