//! Runtime configuration.
//!
//! Loaded from YAML (durations as humantime strings such as `"90s"` or
//! `"15m"`) and validated once before any input is processed.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use shoptech_core::{PricingConfig, PricingError, ServiceTier};

use crate::resilience::FlexRetryPolicy;

/// Per-attempt timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-attempt timeout on the flex tier when none is configured.
pub const FLEX_DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

/// Model used with the Gemini provider when none is configured.
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// Invalid configuration. Always fatal before the first item.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid pricing: {0}")]
    Pricing(#[from] PricingError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Gated retry after a low-confidence primary result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Run a disambiguation retry when the primary confidence is `low`
    pub disambiguation_on_low_confidence: bool,

    /// Tool-call ceiling for the retry attempt
    pub max_tool_calls: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            disambiguation_on_low_confidence: false,
            max_tool_calls: 3,
        }
    }
}

/// Prompt caching of the static prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptCacheConfig {
    pub enabled: bool,

    /// Retention hint, e.g. "in-memory" or "24h"
    pub retention: Option<String>,
}

/// Tool-call ceilings for the primary and the retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolBudget {
    pub max_tool_calls: Option<u32>,
    pub retry_max_tool_calls: u32,
}

impl ToolBudget {
    /// The ceiling actually used by a retry: never below the primary's.
    pub fn effective_retry(&self) -> u32 {
        self.max_tool_calls
            .map_or(self.retry_max_tool_calls, |primary| {
                primary.max(self.retry_max_tool_calls)
            })
    }
}

/// Configuration of the evaluation runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Provider type registered in the provider registry
    pub provider: String,

    pub model: String,

    /// Tool-call ceiling for the primary attempt (unbounded when unset)
    pub max_tool_calls: Option<u32>,

    pub retry: RetryPolicy,

    /// Allow one extra disambiguation query inside the primary attempt
    pub second_query_on_uncertainty: bool,

    pub service_tier: ServiceTier,

    pub flex: FlexRetryPolicy,

    /// Per-attempt timeout
    #[serde(with = "option_duration_human", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    pub prompt_cache: PromptCacheConfig,

    pub reasoning_effort: Option<String>,

    /// Ask for the debug-only `sources` list
    pub include_sources: bool,

    pub pricing: PricingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4.1-mini".to_string(),
            max_tool_calls: None,
            retry: RetryPolicy::default(),
            second_query_on_uncertainty: false,
            service_tier: ServiceTier::Auto,
            flex: FlexRetryPolicy::default(),
            timeout: None,
            prompt_cache: PromptCacheConfig::default(),
            reasoning_effort: None,
            include_sources: false,
            pricing: PricingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.apply_provider_defaults();
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Switch provider. Model and pricing that still hold a built-in
    /// default are replaced by the new provider's defaults.
    pub fn set_provider(&mut self, provider: impl Into<String>) {
        self.provider = provider.into();
        self.apply_provider_defaults();
    }

    fn apply_provider_defaults(&mut self) {
        let openai = Self::default();
        let (model, pricing) = match self.provider.as_str() {
            "gemini" => (GEMINI_DEFAULT_MODEL, PricingConfig::gemini()),
            _ => (openai.model.as_str(), openai.pricing),
        };
        if self.model == openai.model || self.model == GEMINI_DEFAULT_MODEL {
            self.model = model.to_string();
        }
        if self.pricing == openai.pricing || self.pricing == PricingConfig::gemini() {
            self.pricing = pricing;
        }
    }

    /// Fail fast on values that would make every evaluation wrong.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.provider.trim().is_empty() {
            return Err(ConfigError::Invalid("provider must not be empty".to_string()));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Invalid("timeout must be greater than zero".to_string()));
        }
        if self.flex.base_delay > self.flex.max_delay {
            return Err(ConfigError::Invalid(
                "flex.base_delay must not exceed flex.max_delay".to_string(),
            ));
        }
        if let Some(effort) = &self.reasoning_effort {
            const EFFORTS: [&str; 6] = ["none", "minimal", "low", "medium", "high", "xhigh"];
            if !EFFORTS.contains(&effort.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "unknown reasoning_effort '{}': use one of {:?}",
                    effort, EFFORTS
                )));
            }
        }
        self.pricing.validate()?;

        if self.provider == "gemini" && self.service_tier.is_discounted() {
            tracing::warn!("Gemini has no flex tier; requests run on the standard tier");
        }

        let budget = self.tool_budget();
        if budget
            .max_tool_calls
            .is_some_and(|primary| budget.retry_max_tool_calls < primary)
        {
            tracing::warn!(
                max_tool_calls = ?budget.max_tool_calls,
                retry_max_tool_calls = budget.retry_max_tool_calls,
                "Retry tool budget is below the primary budget; the primary budget will be used"
            );
        }
        Ok(())
    }

    pub fn tool_budget(&self) -> ToolBudget {
        ToolBudget {
            max_tool_calls: self.max_tool_calls,
            retry_max_tool_calls: self.retry.max_tool_calls,
        }
    }

    /// Timeout for one service call; flex gets a larger default.
    pub fn effective_timeout(&self) -> Duration {
        match (self.timeout, self.service_tier) {
            (Some(t), _) => t,
            (None, ServiceTier::Flex) => FLEX_DEFAULT_TIMEOUT,
            (None, ServiceTier::Auto) => DEFAULT_TIMEOUT,
        }
    }
}

/// Serde adapter for `Duration` as a humantime string (`"90s"`).
///
/// Plain integers are accepted as seconds.
pub(crate) mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(crate) enum Raw {
        Secs(u64),
        Text(String),
    }

    impl Raw {
        pub(crate) fn into_duration<E: serde::de::Error>(self) -> Result<Duration, E> {
            match self {
                Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
                Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(E::custom),
            }
        }
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Raw::deserialize(deserializer)?.into_duration()
    }
}

mod option_duration_human {
    use super::duration_human::Raw;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => super::duration_human::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Raw>::deserialize(deserializer)?
            .map(Raw::into_duration)
            .transpose()
    }
}
