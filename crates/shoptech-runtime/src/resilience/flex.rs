//! Flex tier retry policy.
//!
//! The discounted tier may reject requests with "resource unavailable"
//! (not billed). Such rejections are retried with exponential backoff, and
//! optionally sent once more on the standard tier when retries run out.

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_human;

/// Retry policy for flex-tier rejections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlexRetryPolicy {
    /// Retries after the first rejected call
    pub max_retries: u32,

    /// Delay before the first retry, doubled each time
    #[serde(with = "duration_human")]
    pub base_delay: Duration,

    /// Upper bound for a single backoff delay
    #[serde(with = "duration_human")]
    pub max_delay: Duration,

    /// Send the attempt once on the standard tier when retries are exhausted
    pub fallback_to_auto: bool,
}

impl Default for FlexRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            fallback_to_auto: false,
        }
    }
}

impl FlexRetryPolicy {
    /// A policy that never retries or falls back.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            fallback_to_auto: false,
            ..Self::default()
        }
    }

    /// Backoff schedule for [`backon`].
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_retries as usize)
            .with_jitter()
    }
}
