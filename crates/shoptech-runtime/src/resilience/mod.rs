//! Resilience patterns for shoptech-runtime.
//!
//! This module provides:
//! - Flex-tier retry with exponential backoff and jitter
//! - Fallback from the flex tier to the standard tier

mod flex;

pub use flex::FlexRetryPolicy;
