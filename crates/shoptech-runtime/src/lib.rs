//! # shoptech-runtime
//!
//! Evaluation orchestration and resumable batch processing for shop
//! platform detection.
//!
//! This crate owns everything that touches the outside world: the
//! reasoning service, the clock and the output files. The payload contract
//! and the cost model live in `shoptech-core`.
//!
//! ## Flow
//!
//! - [`AttemptExecutor`] makes one call (timeout, flex backoff, fallback)
//! - [`EvaluationOrchestrator`] runs the primary attempt and the gated retry
//! - [`BatchRunner`] selects inputs, skips finished keys and writes JSONL and CSV
//!
//! ## Example
//!
//! ```rust,ignore
//! use shoptech_runtime::{BatchRunner, EvaluationOrchestrator, OutputPaths, RunConfig};
//!
//! let orchestrator = EvaluationOrchestrator::builder()
//!     .provider(registry.create("openai", &serde_json::json!({}))?)
//!     .config(config)
//!     .build()?;
//!
//! let runner = BatchRunner::new(orchestrator);
//! let summary = runner.run(inputs, &RunConfig::new(OutputPaths::from_stem("outputs/run"))).await?;
//! println!("{} written, ${:.4}", summary.written(), summary.cost.total_usd());
//! ```

use thiserror::Error;

pub mod attempt;
pub mod batch;
pub mod config;
pub mod ledger;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod sink;

#[cfg(test)]
mod test_support;

pub use attempt::{Attempt, AttemptExecutor, AttemptKind, AttemptOutcome, AttemptSummary};
pub use batch::{BatchRunner, RunConfig, RunSummary};
pub use config::{ConfigError, RuntimeConfig};
pub use ledger::{LedgerError, RunLedger};
pub use orchestrator::{
    EvaluationError, EvaluationOrchestrator, EvaluationOrchestratorBuilder, EvaluationResult,
};
pub use prompts::RubricTemplate;
pub use providers::{ProviderError, ProviderRegistry, ReasoningProvider};
pub use sink::{OutputPaths, OutputRecord, OutputSinks, SinkError};

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Evaluation of '{key}' failed: {source}")]
    Evaluation {
        key: String,
        #[source]
        source: EvaluationError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
