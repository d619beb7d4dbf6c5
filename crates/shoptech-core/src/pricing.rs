//! Usage cost model.
//!
//! Converts raw usage counters into a cost breakdown. Prices are configured
//! in USD (per 1M tokens, per tool call) and evaluated in nanodollars
//! (1e-9 USD) so totals are exact and summable.
//!
//! The discounted-tier multiplier applies to the token term only. Web search
//! calls are billed at list price on every tier.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ServiceTier, ToolKind, UsageCounters};

/// Nanodollars per US dollar.
pub const NANOS_PER_USD: i64 = 1_000_000_000;

/// Errors in pricing configuration.
#[derive(Error, Debug, PartialEq)]
pub enum PricingError {
    #[error("Price '{field}' must be a finite, non-negative number (got {value})")]
    InvalidPrice { field: &'static str, value: f64 },

    #[error("Flex token multiplier must be within [0, 1] (got {0})")]
    InvalidMultiplier(f64),
}

/// Per-kind web search tool prices in USD per completed call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPrices {
    pub query: f64,

    /// Page opens are unbilled today but kept configurable
    pub open: f64,

    pub unknown: f64,
}

impl Default for ToolPrices {
    fn default() -> Self {
        Self {
            query: 0.01,
            open: 0.0,
            unknown: 0.0,
        }
    }
}

impl ToolPrices {
    pub fn get(&self, kind: ToolKind) -> f64 {
        match kind {
            ToolKind::Query => self.query,
            ToolKind::Open => self.open,
            ToolKind::Unknown => self.unknown,
        }
    }
}

/// Pricing configuration, USD denominated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// USD per 1M uncached input tokens
    pub input_per_million: f64,

    /// USD per 1M cached input tokens
    pub cached_input_per_million: f64,

    /// USD per 1M output tokens (reasoning tokens included)
    pub output_per_million: f64,

    /// USD per completed tool call, by kind
    pub tool_calls: ToolPrices,

    /// Multiplier on token cost when the flex tier was used
    pub flex_token_multiplier: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            input_per_million: 1.75,
            cached_input_per_million: 0.175,
            output_per_million: 14.0,
            tool_calls: ToolPrices::default(),
            flex_token_multiplier: 0.5,
        }
    }
}

impl PricingConfig {
    /// List prices for Gemini with Google Search grounding.
    ///
    /// Cached prompt tokens are billed like regular input and there is no
    /// discounted tier.
    pub fn gemini() -> Self {
        Self {
            input_per_million: 0.50,
            cached_input_per_million: 0.50,
            output_per_million: 3.00,
            tool_calls: ToolPrices {
                query: 0.035,
                open: 0.0,
                unknown: 0.0,
            },
            flex_token_multiplier: 1.0,
        }
    }

    /// Reject prices that would make estimates meaningless.
    pub fn validate(&self) -> Result<(), PricingError> {
        let prices = [
            ("input_per_million", self.input_per_million),
            ("cached_input_per_million", self.cached_input_per_million),
            ("output_per_million", self.output_per_million),
            ("tool_calls.query", self.tool_calls.query),
            ("tool_calls.open", self.tool_calls.open),
            ("tool_calls.unknown", self.tool_calls.unknown),
        ];
        for (field, value) in prices {
            if !value.is_finite() || value < 0.0 {
                return Err(PricingError::InvalidPrice { field, value });
            }
        }

        let m = self.flex_token_multiplier;
        if !m.is_finite() || !(0.0..=1.0).contains(&m) {
            return Err(PricingError::InvalidMultiplier(m));
        }
        Ok(())
    }

    fn nanos_per_call(&self, kind: ToolKind) -> i64 {
        usd_to_nanos(self.tool_calls.get(kind))
    }
}

/// Cost breakdown for one evaluation, in nanodollars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Token cost after any tier discount
    pub token_cost_nanos: i64,

    /// Token cost at list price
    pub raw_token_cost_nanos: i64,

    /// Tool call cost (never discounted)
    pub web_search_cost_nanos: i64,

    /// Tier the token term was priced at
    pub service_tier: ServiceTier,
}

impl CostEstimate {
    pub fn total_nanos(&self) -> i64 {
        self.token_cost_nanos + self.web_search_cost_nanos
    }

    pub fn token_cost_usd(&self) -> f64 {
        nanos_to_usd(self.token_cost_nanos)
    }

    pub fn raw_token_cost_usd(&self) -> f64 {
        nanos_to_usd(self.raw_token_cost_nanos)
    }

    pub fn web_search_cost_usd(&self) -> f64 {
        nanos_to_usd(self.web_search_cost_nanos)
    }

    pub fn total_usd(&self) -> f64 {
        nanos_to_usd(self.total_nanos())
    }

    /// Amount saved by the tier discount.
    pub fn discount_nanos(&self) -> i64 {
        self.raw_token_cost_nanos - self.token_cost_nanos
    }
}

impl std::ops::Add for CostEstimate {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let service_tier = if self.service_tier == rhs.service_tier {
            self.service_tier
        } else {
            ServiceTier::Auto
        };
        Self {
            token_cost_nanos: self.token_cost_nanos + rhs.token_cost_nanos,
            raw_token_cost_nanos: self.raw_token_cost_nanos + rhs.raw_token_cost_nanos,
            web_search_cost_nanos: self.web_search_cost_nanos + rhs.web_search_cost_nanos,
            service_tier,
        }
    }
}

impl std::ops::AddAssign for CostEstimate {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Estimate the cost of aggregated usage.
///
/// Only completed tool calls are present in `usage`; each kind is priced from
/// its own table entry. The flex multiplier is applied to the token term only.
pub fn estimate_cost(
    usage: &UsageCounters,
    pricing: &PricingConfig,
    tier: ServiceTier,
) -> CostEstimate {
    let raw_token_cost_nanos = tokens_cost(usage.input_tokens, pricing.input_per_million)
        + tokens_cost(usage.cached_input_tokens, pricing.cached_input_per_million)
        + tokens_cost(usage.output_tokens, pricing.output_per_million);

    let token_cost_nanos = if tier.is_discounted() {
        (raw_token_cost_nanos as f64 * pricing.flex_token_multiplier).round() as i64
    } else {
        raw_token_cost_nanos
    };

    let web_search_cost_nanos = [ToolKind::Query, ToolKind::Open, ToolKind::Unknown]
        .into_iter()
        .map(|kind| usage.tool_calls.get(kind) as i64 * pricing.nanos_per_call(kind))
        .sum();

    CostEstimate {
        token_cost_nanos,
        raw_token_cost_nanos,
        web_search_cost_nanos,
        service_tier: tier,
    }
}

/// Cost of `tokens` at a per-million rate, rounded once to the nearest nanodollar.
fn tokens_cost(tokens: u64, usd_per_million: f64) -> i64 {
    let nanos_per_million = i128::from(usd_to_nanos(usd_per_million));
    let nanos = (i128::from(tokens) * nanos_per_million + 500_000) / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

/// Convert USD to nanodollars, rounding to the nearest nanodollar.
pub fn usd_to_nanos(usd: f64) -> i64 {
    (usd * NANOS_PER_USD as f64).round() as i64
}

/// Convert nanodollars to USD.
pub fn nanos_to_usd(nanos: i64) -> f64 {
    nanos as f64 / NANOS_PER_USD as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCallCounts;
    use proptest::prelude::*;

    fn usage(input: u64, cached: u64, output: u64, tools: ToolCallCounts) -> UsageCounters {
        UsageCounters {
            input_tokens: input,
            cached_input_tokens: cached,
            output_tokens: output,
            reasoning_tokens: 0,
            tool_calls: tools,
        }
    }

    #[test]
    fn test_web_search_cost_counts_queries_only() {
        // 3 queries + 2 opens at $0.01/query = $0.03
        let pricing = PricingConfig::default();
        let u = usage(0, 0, 0, ToolCallCounts::new(3, 2, 0));
        let cost = estimate_cost(&u, &pricing, ServiceTier::Auto);
        assert_eq!(cost.web_search_cost_nanos, 30_000_000);

        let more_opens = usage(0, 0, 0, ToolCallCounts::new(3, 40, 0));
        let cost2 = estimate_cost(&more_opens, &pricing, ServiceTier::Auto);
        assert_eq!(cost2.web_search_cost_nanos, 30_000_000);
    }

    #[test]
    fn test_flex_discount_applies_to_tokens_only() {
        // 1000 input tokens at $2/1M, one query at $0.01, flex 0.5
        let pricing = PricingConfig {
            input_per_million: 2.0,
            ..PricingConfig::default()
        };
        let u = usage(1_000, 0, 0, ToolCallCounts::new(1, 0, 0));
        let cost = estimate_cost(&u, &pricing, ServiceTier::Flex);

        assert_eq!(cost.token_cost_nanos, 1_000_000); // $0.001
        assert_eq!(cost.raw_token_cost_nanos, 2_000_000);
        assert_eq!(cost.web_search_cost_nanos, 10_000_000); // $0.01
        assert_eq!(cost.total_nanos(), 11_000_000); // $0.011
        assert!((cost.total_usd() - 0.011).abs() < 1e-12);
        assert_eq!(cost.discount_nanos(), 1_000_000);
    }

    #[test]
    fn test_flex_discount_without_billed_search() {
        let pricing = PricingConfig {
            input_per_million: 2.0,
            ..PricingConfig::default()
        };
        let u = usage(1_000, 0, 0, ToolCallCounts::new(0, 5, 0));
        let cost = estimate_cost(&u, &pricing, ServiceTier::Flex);
        assert_eq!(cost.web_search_cost_nanos, 0);
        assert_eq!(cost.token_cost_nanos, 1_000_000);
        assert_eq!(cost.total_nanos(), 1_000_000);
    }

    #[test]
    fn test_auto_tier_is_undiscounted() {
        let pricing = PricingConfig {
            input_per_million: 2.0,
            ..PricingConfig::default()
        };
        let u = usage(1_000, 0, 0, ToolCallCounts::new(1, 0, 0));
        let cost = estimate_cost(&u, &pricing, ServiceTier::Auto);
        assert_eq!(cost.token_cost_nanos, 2_000_000);
        assert_eq!(cost.total_nanos(), 12_000_000);
    }

    #[test]
    fn test_cached_tokens_priced_separately() {
        // Default: $1.75 input, $0.175 cached, $14 output per 1M
        let pricing = PricingConfig::default();
        let u = usage(1_000_000, 1_000_000, 1_000_000, ToolCallCounts::default());
        let cost = estimate_cost(&u, &pricing, ServiceTier::Auto);
        assert_eq!(cost.token_cost_nanos, 1_750_000_000 + 175_000_000 + 14_000_000_000);
    }

    #[test]
    fn test_fractional_rates_are_not_rounded_per_token() {
        // $0.0375/1M is 37.5 nanodollars per token
        let pricing = PricingConfig {
            cached_input_per_million: 0.0375,
            ..PricingConfig::default()
        };
        let u = usage(0, 1_000_000, 0, ToolCallCounts::default());
        let cost = estimate_cost(&u, &pricing, ServiceTier::Auto);
        assert_eq!(cost.token_cost_nanos, 37_500_000);

        let two = usage(0, 2, 0, ToolCallCounts::default());
        assert_eq!(estimate_cost(&two, &pricing, ServiceTier::Auto).token_cost_nanos, 75);
    }

    #[test]
    fn test_gemini_prices() {
        // 1M prompt tokens (half cached), 100k output, 4 grounded queries
        let pricing = PricingConfig::gemini();
        assert!(pricing.validate().is_ok());
        let u = usage(500_000, 500_000, 100_000, ToolCallCounts::new(4, 0, 0));
        let cost = estimate_cost(&u, &pricing, ServiceTier::Auto);
        assert_eq!(cost.token_cost_nanos, 500_000_000 + 300_000_000);
        assert_eq!(cost.web_search_cost_nanos, 140_000_000);
    }

    #[test]
    fn test_open_calls_priced_when_configured() {
        let mut pricing = PricingConfig::default();
        pricing.tool_calls.open = 0.002;
        let u = usage(0, 0, 0, ToolCallCounts::new(1, 2, 1));
        let cost = estimate_cost(&u, &pricing, ServiceTier::Flex);
        assert_eq!(cost.web_search_cost_nanos, 10_000_000 + 4_000_000);
    }

    #[test]
    fn test_validate() {
        assert!(PricingConfig::default().validate().is_ok());

        let negative = PricingConfig {
            output_per_million: -1.0,
            ..PricingConfig::default()
        };
        assert!(matches!(
            negative.validate(),
            Err(PricingError::InvalidPrice {
                field: "output_per_million",
                ..
            })
        ));

        let multiplier = PricingConfig {
            flex_token_multiplier: 1.5,
            ..PricingConfig::default()
        };
        assert_eq!(
            multiplier.validate(),
            Err(PricingError::InvalidMultiplier(1.5))
        );

        let mut nan_tool = PricingConfig::default();
        nan_tool.tool_calls.unknown = f64::NAN;
        assert!(nan_tool.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let pricing: PricingConfig =
            serde_json::from_str(r#"{"input_per_million": 2.0, "tool_calls": {"open": 0.001}}"#)
                .unwrap();
        assert_eq!(pricing.input_per_million, 2.0);
        assert_eq!(pricing.output_per_million, 14.0);
        assert_eq!(pricing.tool_calls.query, 0.01);
        assert_eq!(pricing.tool_calls.open, 0.001);
    }

    #[test]
    fn test_estimate_addition_tier() {
        let a = CostEstimate {
            token_cost_nanos: 1,
            raw_token_cost_nanos: 2,
            web_search_cost_nanos: 3,
            service_tier: ServiceTier::Flex,
        };
        let sum = a + CostEstimate::default();
        assert_eq!(sum.total_nanos(), 4);
        assert_eq!(sum.service_tier, ServiceTier::Auto);
    }

    proptest! {
        #[test]
        fn prop_web_search_cost_independent_of_tier(
            input in 0u64..5_000_000,
            cached in 0u64..5_000_000,
            output in 0u64..1_000_000,
            query in 0u32..50,
            open in 0u32..50,
        ) {
            let pricing = PricingConfig::default();
            let u = usage(input, cached, output, ToolCallCounts::new(query, open, 0));
            let auto = estimate_cost(&u, &pricing, ServiceTier::Auto);
            let flex = estimate_cost(&u, &pricing, ServiceTier::Flex);

            prop_assert_eq!(auto.web_search_cost_nanos, flex.web_search_cost_nanos);
            prop_assert_eq!(auto.web_search_cost_nanos, query as i64 * 10_000_000);
            prop_assert_eq!(auto.raw_token_cost_nanos, flex.raw_token_cost_nanos);
            prop_assert!(flex.token_cost_nanos <= auto.token_cost_nanos);
            prop_assert_eq!(flex.total_nanos(), flex.token_cost_nanos + flex.web_search_cost_nanos);
        }

        #[test]
        fn prop_cost_is_additive_on_auto(
            a_in in 0u64..1_000_000, b_in in 0u64..1_000_000,
            a_q in 0u32..20, b_q in 0u32..20,
        ) {
            let pricing = PricingConfig::default();
            let a = usage(a_in, 0, 0, ToolCallCounts::new(a_q, 0, 0));
            let b = usage(b_in, 0, 0, ToolCallCounts::new(b_q, 0, 0));
            let whole = estimate_cost(&(a + b), &pricing, ServiceTier::Auto);
            let parts = estimate_cost(&a, &pricing, ServiceTier::Auto)
                + estimate_cost(&b, &pricing, ServiceTier::Auto);
            prop_assert_eq!(whole.total_nanos(), parts.total_nanos());
        }
    }
}
