//! Evaluation orchestrator.
//!
//! Runs the primary attempt, decides whether the gated disambiguation retry
//! runs, selects the final payload and aggregates usage and cost over every
//! attempt that was made.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use shoptech_core::{
    estimate_cost, CostEstimate, EvaluationInput, PlatformPayload, ServiceTier, UsageCounters,
};

use crate::attempt::{Attempt, AttemptExecutor, AttemptKind, AttemptOutcome, AttemptSummary};
use crate::config::RuntimeConfig;
use crate::prompts::RubricTemplate;
use crate::providers::{Citation, ProviderError, ReasoningProvider};
use crate::RuntimeError;

/// Errors from evaluating a single input.
#[derive(Error, Debug, Clone)]
pub enum EvaluationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The primary attempt never produced a response
    #[error("Primary attempt failed: {0}")]
    Transport(#[from] ProviderError),
}

/// Outcome of evaluating one input.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub input: EvaluationInput,

    /// Selected payload (primary, retry, or the downgraded default)
    pub payload: PlatformPayload,

    /// Whether the disambiguation retry ran
    pub retry_used: bool,

    /// Whether the retry's payload was selected
    pub retry_selected: bool,

    /// Sum over every attempt made, including discarded ones
    pub usage: UsageCounters,

    pub cost: CostEstimate,

    /// Tier the token cost was priced at: flex only if every attempt ran on flex
    pub service_tier: ServiceTier,

    pub elapsed: Duration,

    /// Citations of the selected attempt
    pub citations: Vec<Citation>,

    pub attempts: Vec<AttemptSummary>,

    /// Why the primary payload was rejected, when the result was downgraded
    pub validation_error: Option<String>,
}

impl EvaluationResult {
    /// Flex rejections retried across all attempts.
    pub fn tier_retries(&self) -> u32 {
        self.attempts.iter().map(|a| a.tier_retries).sum()
    }

    /// Whether any attempt fell back to the standard tier.
    pub fn fallback_used(&self) -> bool {
        self.attempts.iter().any(|a| a.fallback_used)
    }

    /// Whether the payload is the downgraded default.
    pub fn is_downgraded(&self) -> bool {
        self.validation_error.is_some()
    }
}

/// Orchestrates the primary attempt and the gated retry for one input.
pub struct EvaluationOrchestrator {
    executor: AttemptExecutor,
}

impl EvaluationOrchestrator {
    pub fn new(
        provider: Arc<dyn ReasoningProvider>,
        config: RuntimeConfig,
        rubric: &RubricTemplate,
    ) -> Self {
        Self {
            executor: AttemptExecutor::new(provider, config, rubric),
        }
    }

    pub fn builder() -> EvaluationOrchestratorBuilder {
        EvaluationOrchestratorBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.executor.config()
    }

    fn should_retry(&self, primary: &Attempt) -> bool {
        self.config().retry.disambiguation_on_low_confidence
            && primary
                .outcome
                .payload()
                .is_some_and(|p| p.confidence.is_lowest())
    }

    /// Evaluate one input.
    ///
    /// Fails only when the input is unusable or the primary attempt produced
    /// no response at all. A primary payload that fails validation yields the
    /// downgraded default with `validation_error` set.
    pub async fn evaluate(
        &self,
        input: &EvaluationInput,
    ) -> Result<EvaluationResult, EvaluationError> {
        if !input.is_valid() {
            return Err(EvaluationError::InvalidInput(format!(
                "empty key for url '{}'",
                input.url
            )));
        }

        let budget = self.config().tool_budget();
        let primary = self
            .executor
            .run_attempt(input, budget.max_tool_calls, AttemptKind::Primary)
            .await;

        if let AttemptOutcome::TransportError(e) = &primary.outcome {
            return Err(EvaluationError::Transport(e.clone()));
        }

        let retry = if self.should_retry(&primary) {
            tracing::info!(key = %input.key, "Low confidence, running disambiguation retry");
            Some(
                self.executor
                    .run_attempt(input, Some(budget.effective_retry()), AttemptKind::Retry)
                    .await,
            )
        } else {
            None
        };

        Ok(self.finish(input, primary, retry))
    }

    fn finish(
        &self,
        input: &EvaluationInput,
        primary: Attempt,
        retry: Option<Attempt>,
    ) -> EvaluationResult {
        let retry_used = retry.is_some();

        let retry_wins = match (primary.outcome.payload(), retry.as_ref()) {
            (Some(first), Some(second)) => match &second.outcome {
                AttemptOutcome::Success(p) => p.confidence > first.confidence,
                AttemptOutcome::SchemaViolation(reason) => {
                    tracing::warn!(key = %input.key, reason = %reason, "Retry payload rejected, keeping primary");
                    false
                }
                AttemptOutcome::TransportError(e) => {
                    tracing::warn!(key = %input.key, error = %e, "Retry failed, keeping primary");
                    false
                }
            },
            _ => false,
        };

        let attempts: Vec<&Attempt> = std::iter::once(&primary).chain(retry.as_ref()).collect();
        let usage: UsageCounters = attempts.iter().map(|a| &a.usage).sum();
        let elapsed: Duration = attempts.iter().map(|a| a.duration).sum();
        let service_tier = if attempts
            .iter()
            .all(|a| a.service_tier_used == ServiceTier::Flex)
        {
            ServiceTier::Flex
        } else {
            ServiceTier::Auto
        };
        let cost = estimate_cost(&usage, &self.config().pricing, service_tier);
        let summaries = attempts.iter().map(|a| a.summary()).collect();

        let selected = match (&retry, retry_wins) {
            (Some(second), true) => second,
            _ => &primary,
        };

        let (payload, validation_error) = match &selected.outcome {
            AttemptOutcome::Success(payload) => (payload.clone(), None),
            AttemptOutcome::SchemaViolation(reason) => {
                tracing::warn!(key = %input.key, reason = %reason, "No valid payload, downgrading to unknown");
                (
                    PlatformPayload::unobtainable(input.canonical_url()),
                    Some(reason.clone()),
                )
            }
            AttemptOutcome::TransportError(e) => (
                PlatformPayload::unobtainable(input.canonical_url()),
                Some(e.to_string()),
            ),
        };

        tracing::debug!(
            key = %input.key,
            platform = %payload.final_platform,
            confidence = %payload.confidence,
            retry_used,
            retry_selected = retry_wins,
            cost_usd = cost.total_usd(),
            "Evaluation finished"
        );

        EvaluationResult {
            input: input.clone(),
            payload,
            retry_used,
            retry_selected: retry_wins,
            usage,
            cost,
            service_tier,
            elapsed,
            citations: selected.citations.clone(),
            attempts: summaries,
            validation_error,
        }
    }
}

/// Builder for EvaluationOrchestrator.
pub struct EvaluationOrchestratorBuilder {
    provider: Option<Arc<dyn ReasoningProvider>>,
    config: RuntimeConfig,
    rubric: RubricTemplate,
}

impl EvaluationOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            config: RuntimeConfig::default(),
            rubric: RubricTemplate::default(),
        }
    }

    /// Set the reasoning provider.
    pub fn provider(mut self, provider: Arc<dyn ReasoningProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the rubric appended to the system prompt.
    pub fn rubric(mut self, rubric: RubricTemplate) -> Self {
        self.rubric = rubric;
        self
    }

    /// Validate the configuration and build the orchestrator.
    pub fn build(self) -> Result<EvaluationOrchestrator, RuntimeError> {
        let provider = self
            .provider
            .ok_or_else(|| RuntimeError::ProviderNotConfigured("No provider set".to_string()))?;
        self.config.validate()?;

        Ok(EvaluationOrchestrator::new(provider, self.config, &self.rubric))
    }
}

impl Default for EvaluationOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::FlexRetryPolicy;
    use crate::test_support::{payload_json, ScriptedProvider};
    use shoptech_core::{Confidence, Platform, ToolCallCounts};

    fn orchestrator(provider: &Arc<ScriptedProvider>, gate: bool) -> EvaluationOrchestrator {
        let mut config = RuntimeConfig::default();
        config.retry.disambiguation_on_low_confidence = gate;
        config.max_tool_calls = Some(1);
        EvaluationOrchestrator::builder()
            .provider(provider.clone())
            .config(config)
            .build()
            .unwrap()
    }

    fn input() -> EvaluationInput {
        EvaluationInput::new("shop.example.com")
    }

    #[tokio::test]
    async fn test_confident_primary_skips_retry() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok(payload_json("shopify", "medium", "B"), ToolCallCounts::new(1, 0, 0));

        let result = orchestrator(&provider, true).evaluate(&input()).await.unwrap();

        assert_eq!(result.payload.final_platform, Platform::Shopify);
        assert!(!result.retry_used);
        assert!(!result.retry_selected);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_gate_off_never_retries() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok(payload_json("unknown", "low", "C"), ToolCallCounts::default());

        let result = orchestrator(&provider, false).evaluate(&input()).await.unwrap();
        assert_eq!(result.payload.confidence, Confidence::Low);
        assert!(!result.retry_used);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_better_retry_is_selected_and_usage_summed() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok(payload_json("unknown", "low", "C"), ToolCallCounts::new(1, 0, 0));
        provider.push_ok(payload_json("shopware", "high", "A"), ToolCallCounts::new(2, 1, 0));

        let result = orchestrator(&provider, true).evaluate(&input()).await.unwrap();

        assert!(result.retry_used);
        assert!(result.retry_selected);
        assert_eq!(result.payload.final_platform, Platform::Shopware);
        assert_eq!(result.usage.input_tokens, 2000);
        assert_eq!(result.usage.output_tokens, 400);
        assert_eq!(result.usage.tool_calls, ToolCallCounts::new(3, 1, 0));
        assert_eq!(result.attempts.len(), 2);

        let expected = estimate_cost(&result.usage, &Default::default(), ServiceTier::Auto);
        assert_eq!(result.cost, expected);
        // three billed queries at $0.01
        assert_eq!(result.cost.web_search_cost_nanos, 30_000_000);
    }

    #[tokio::test]
    async fn test_equal_confidence_keeps_primary() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok(payload_json("woocommerce", "low", "C"), ToolCallCounts::new(1, 0, 0));
        provider.push_ok(payload_json("magento", "low", "C"), ToolCallCounts::new(1, 0, 0));

        let result = orchestrator(&provider, true).evaluate(&input()).await.unwrap();

        assert!(result.retry_used);
        assert!(!result.retry_selected);
        assert_eq!(result.payload.final_platform, Platform::Woocommerce);
        assert_eq!(result.usage.tool_calls.query, 2);
    }

    fn finished_attempt(
        kind: AttemptKind,
        platform: &str,
        confidence: &str,
        tier: &str,
    ) -> Attempt {
        let payload =
            PlatformPayload::from_json(&payload_json(platform, confidence, tier)).unwrap();
        Attempt {
            kind,
            outcome: AttemptOutcome::Success(payload),
            usage: UsageCounters {
                input_tokens: 1000,
                tool_calls: ToolCallCounts::new(1, 0, 0),
                ..Default::default()
            },
            duration: Duration::from_secs(2),
            service_tier_requested: ServiceTier::Auto,
            service_tier_used: ServiceTier::Auto,
            tool_calls: vec![],
            citations: vec![],
            tier_retries: 0,
            fallback_used: false,
        }
    }

    #[test]
    fn test_medium_retry_does_not_replace_medium_primary() {
        let provider = Arc::new(ScriptedProvider::new());
        let orchestrator = orchestrator(&provider, true);
        let primary = finished_attempt(AttemptKind::Primary, "shopify", "medium", "B");
        let retry = finished_attempt(AttemptKind::Retry, "shopware", "medium", "B");

        let result = orchestrator.finish(&input(), primary, Some(retry));

        assert!(result.retry_used);
        assert!(!result.retry_selected);
        assert_eq!(result.payload.final_platform, Platform::Shopify);
        assert_eq!(result.payload.confidence, Confidence::Medium);
        assert_eq!(result.usage.input_tokens, 2000);
        assert_eq!(result.usage.tool_calls.query, 2);
        assert_eq!(result.elapsed, Duration::from_secs(4));
    }

    #[test]
    fn test_high_retry_replaces_medium_primary() {
        let provider = Arc::new(ScriptedProvider::new());
        let orchestrator = orchestrator(&provider, true);
        let primary = finished_attempt(AttemptKind::Primary, "shopify", "medium", "B");
        let retry = finished_attempt(AttemptKind::Retry, "shopware", "high", "A");

        let result = orchestrator.finish(&input(), primary, Some(retry));
        assert!(result.retry_selected);
        assert_eq!(result.payload.final_platform, Platform::Shopware);
    }

    #[tokio::test]
    async fn test_retry_uses_larger_budget() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok(payload_json("unknown", "low", "C"), ToolCallCounts::default());
        provider.push_ok(payload_json("unknown", "low", "C"), ToolCallCounts::default());

        orchestrator(&provider, true).evaluate(&input()).await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests[0].max_tool_calls, Some(1));
        assert_eq!(requests[1].max_tool_calls, Some(3));
        assert!(requests[1].user_prompt.contains("Extra instructions (retry)"));
    }

    #[tokio::test]
    async fn test_retry_transport_error_keeps_primary() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok(payload_json("shopify", "low", "C"), ToolCallCounts::new(1, 0, 0));
        provider.push_err(ProviderError::Timeout(Duration::from_secs(120)));

        let result = orchestrator(&provider, true).evaluate(&input()).await.unwrap();

        assert!(result.retry_used);
        assert!(!result.retry_selected);
        assert_eq!(result.payload.final_platform, Platform::Shopify);
        assert_eq!(result.attempts[1].outcome, "transport_error");
        assert_eq!(result.usage.tool_calls.query, 1);
    }

    #[tokio::test]
    async fn test_raw_url_in_reasoning_downgrades() {
        let provider = Arc::new(ScriptedProvider::new());
        let text = serde_json::json!({
            "input_url": "https://shop.example.com",
            "final_platform": "shopify",
            "confidence": "high",
            "evidence_tier": "A",
            "signals": ["cdn.shopify.com assets"],
            "reasoning": "Assets load from https://cdn.shopify.com. The checkout is hosted."
        })
        .to_string();
        provider.push_ok(text, ToolCallCounts::new(1, 0, 0));

        let result = orchestrator(&provider, true).evaluate(&input()).await.unwrap();

        assert!(result.is_downgraded());
        assert_eq!(result.payload.final_platform, Platform::Unknown);
        assert_eq!(result.payload.confidence, Confidence::Low);
        assert_eq!(result.payload.input_url, "https://shop.example.com");
        assert!(!result.retry_used);
        // the rejected call is still billed
        assert_eq!(result.usage.tool_calls.query, 1);
        assert!(result.cost.total_nanos() > 0);
    }

    #[tokio::test]
    async fn test_primary_transport_error_fails() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_err(ProviderError::Http("connection refused".into()));

        let err = orchestrator(&provider, true)
            .evaluate(&input())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Transport(ProviderError::Http(_))));
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new());
        let err = orchestrator(&provider, false)
            .evaluate(&EvaluationInput::new("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidInput(_)));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_tiers_price_at_standard_rate() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok(payload_json("unknown", "low", "C"), ToolCallCounts::default());
        provider.push_err(ProviderError::ResourceUnavailable("busy".into()));
        provider.push_ok(payload_json("unknown", "low", "C"), ToolCallCounts::default());

        let mut config = RuntimeConfig {
            service_tier: ServiceTier::Flex,
            flex: FlexRetryPolicy {
                max_retries: 0,
                fallback_to_auto: true,
                ..Default::default()
            },
            ..Default::default()
        };
        config.retry.disambiguation_on_low_confidence = true;
        let orchestrator = EvaluationOrchestrator::builder()
            .provider(provider.clone())
            .config(config)
            .build()
            .unwrap();

        let result = orchestrator.evaluate(&input()).await.unwrap();
        assert!(result.fallback_used());
        assert_eq!(result.service_tier, ServiceTier::Auto);
        assert_eq!(result.cost.token_cost_nanos, result.cost.raw_token_cost_nanos);
    }

    #[tokio::test]
    async fn test_all_flex_attempts_are_discounted() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok(payload_json("magento", "high", "A"), ToolCallCounts::new(1, 0, 0));

        let config = RuntimeConfig {
            service_tier: ServiceTier::Flex,
            ..Default::default()
        };
        let orchestrator = EvaluationOrchestrator::builder()
            .provider(provider.clone())
            .config(config)
            .build()
            .unwrap();

        let result = orchestrator.evaluate(&input()).await.unwrap();
        assert_eq!(result.service_tier, ServiceTier::Flex);
        assert_eq!(result.cost.token_cost_nanos * 2, result.cost.raw_token_cost_nanos);
        assert_eq!(result.cost.web_search_cost_nanos, 10_000_000);
    }

    #[test]
    fn test_builder_requires_provider() {
        let result = EvaluationOrchestrator::builder().build();
        assert!(matches!(result, Err(RuntimeError::ProviderNotConfigured(_))));
    }
}
