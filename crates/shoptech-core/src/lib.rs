//! # shoptech-core
//!
//! Deterministic building blocks for shop platform evaluation.
//!
//! This crate performs no I/O. It provides:
//! - the domain types (inputs, platforms, confidence, evidence tiers, usage counters)
//! - the structured payload contract and its boundary validation
//! - the usage cost model
//!
//! ## Key Guarantees
//!
//! 1. **Strict boundary**: a payload is only accepted after JSON Schema and semantic validation
//! 2. **Exact costs**: money is computed in integer nanodollars
//! 3. **Separated discounts**: tier discounts touch token cost, never tool cost
//!
//! ## Example
//!
//! ```rust,ignore
//! use shoptech_core::{estimate_cost, PlatformPayload, PricingConfig, ServiceTier};
//!
//! let payload = PlatformPayload::from_json(&service_text)?;
//! let cost = estimate_cost(&usage, &PricingConfig::default(), ServiceTier::Flex);
//! println!("{} at ${:.4}", payload.final_platform, cost.total_usd());
//! ```

pub mod patterns;
pub mod payload;
pub mod pricing;
pub mod types;

pub use payload::{PayloadError, PlatformPayload};
pub use pricing::{estimate_cost, CostEstimate, PricingConfig, PricingError, ToolPrices};
pub use types::{
    canonical_url, normalize_key, Confidence, EvaluationInput, EvidenceTier, Platform,
    ServiceTier, ToolCallCounts, ToolKind, UsageCounters,
};
