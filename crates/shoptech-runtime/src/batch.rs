//! Resumable batch runner.
//!
//! Skips keys already present in prior output, selects from the rest
//! (dedupe, seeded sample, limit), evaluates sequentially and writes each
//! result durably before moving on.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shoptech_core::{CostEstimate, EvaluationInput, UsageCounters};

use crate::ledger::RunLedger;
use crate::orchestrator::EvaluationOrchestrator;
use crate::sink::{OutputPaths, OutputRecord, OutputSinks, RecordContext};
use crate::RuntimeError;

/// Options of one batch run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output: OutputPaths,

    /// Drop inputs whose key was already seen in this input list
    pub dedupe: bool,

    /// Append to existing output and skip keys already present in it
    pub resume: bool,

    /// Evaluate a random subset of this size
    pub random_sample: Option<usize>,

    /// Seed for the random subset
    pub seed: u64,

    /// Evaluate at most this many inputs (after sampling)
    pub limit: Option<usize>,

    /// Write a degraded record and continue when an evaluation fails
    pub continue_on_error: bool,

    /// Pause between evaluations
    pub delay: Duration,

    /// Log progress every N evaluated inputs (0 disables)
    pub progress_every: usize,

    /// Include attempt summaries and citations in JSONL
    pub debug: bool,

    /// Write the selected URLs to this file, one per line
    pub sample_list: Option<PathBuf>,
}

impl RunConfig {
    pub fn new(output: OutputPaths) -> Self {
        Self {
            output,
            dedupe: true,
            resume: false,
            random_sample: None,
            seed: 42,
            limit: None,
            continue_on_error: true,
            delay: Duration::from_millis(500),
            progress_every: 25,
            debug: false,
            sample_list: None,
        }
    }
}

/// Counters of a finished (or interrupted) run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Inputs left after the resume skip, dedupe, sampling and limit
    pub total_selected: usize,
    pub succeeded: usize,
    pub errored: usize,
    pub skipped_duplicate: usize,
    pub skipped_resumed: usize,
    pub skipped_invalid: usize,
    pub usage: UsageCounters,
    pub cost: CostEstimate,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl RunSummary {
    /// Inputs that produced an output record in this run.
    pub fn written(&self) -> usize {
        self.succeeded + self.errored
    }
}

#[derive(Debug, Default)]
struct Selection {
    items: Vec<EvaluationInput>,
    skipped_duplicate: usize,
    skipped_invalid: usize,
    skipped_resumed: usize,
}

/// Drop invalid and already finalized inputs, then dedupe, sample and limit.
///
/// Sampling and the limit see only unprocessed inputs, so a resumed run
/// picks up new work instead of reselecting what is already done.
fn select_inputs(
    inputs: Vec<EvaluationInput>,
    config: &RunConfig,
    ledger: &RunLedger,
) -> Selection {
    let mut selection = Selection::default();
    let mut seen = HashSet::new();

    for input in inputs {
        if !input.is_valid() {
            selection.skipped_invalid += 1;
            continue;
        }
        if config.resume && ledger.contains(&input.key) {
            selection.skipped_resumed += 1;
            continue;
        }
        if config.dedupe && !seen.insert(input.key.clone()) {
            selection.skipped_duplicate += 1;
            continue;
        }
        selection.items.push(input);
    }

    if let Some(n) = config.random_sample {
        if n < selection.items.len() {
            let mut rng = StdRng::seed_from_u64(config.seed);
            let mut picked = rand::seq::index::sample(&mut rng, selection.items.len(), n).into_vec();
            picked.sort_unstable();
            let mut keep = vec![false; selection.items.len()];
            for index in picked {
                keep[index] = true;
            }
            let mut flags = keep.into_iter();
            selection.items.retain(|_| flags.next().unwrap_or(false));
        }
    }

    if let Some(limit) = config.limit {
        selection.items.truncate(limit);
    }
    selection
}

/// Runs an evaluation over a list of inputs.
pub struct BatchRunner {
    orchestrator: EvaluationOrchestrator,
    stop: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(orchestrator: EvaluationOrchestrator) -> Self {
        Self {
            orchestrator,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run after the current input is written.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub async fn run(
        &self,
        inputs: Vec<EvaluationInput>,
        config: &RunConfig,
    ) -> Result<RunSummary, RuntimeError> {
        let started = Instant::now();
        let mut ledger = if config.resume {
            RunLedger::load(&[&config.output.jsonl, &config.output.csv])?
        } else {
            RunLedger::new()
        };

        let selection = select_inputs(inputs, config, &ledger);
        let mut summary = RunSummary {
            total_selected: selection.items.len(),
            skipped_duplicate: selection.skipped_duplicate,
            skipped_invalid: selection.skipped_invalid,
            skipped_resumed: selection.skipped_resumed,
            ..Default::default()
        };

        if let Some(path) = &config.sample_list {
            let mut list: String = selection
                .items
                .iter()
                .map(|input| input.url.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            list.push('\n');
            std::fs::write(path, list)?;
            tracing::info!(path = %path.display(), count = selection.items.len(), "Wrote sample list");
        }

        tracing::info!(
            selected = summary.total_selected,
            resumed = summary.skipped_resumed,
            duplicates = summary.skipped_duplicate,
            invalid = summary.skipped_invalid,
            output = %config.output.jsonl.display(),
            "Starting batch run"
        );

        let mut sinks = OutputSinks::open(&config.output, config.resume)?;
        let ctx = RecordContext {
            run_id: config.output.run_id(),
            model: self.orchestrator.config().model.clone(),
            debug: config.debug,
        };

        let total = selection.items.len();
        let mut evaluated = 0;
        for (index, input) in selection.items.iter().enumerate() {
            // Repeats within this run when dedupe is off
            if config.resume && ledger.contains(&input.key) {
                tracing::debug!(key = %input.key, "Already finalized, skipping");
                summary.skipped_resumed += 1;
                continue;
            }

            if evaluated > 0 && !config.delay.is_zero() {
                tokio::time::sleep(config.delay).await;
            }
            if self.stop_requested() {
                tracing::warn!(done = index, total, "Stop requested, ending run");
                summary.interrupted = true;
                break;
            }

            let record = match self.orchestrator.evaluate(input).await {
                Ok(result) => {
                    summary.succeeded += 1;
                    summary.usage += result.usage;
                    summary.cost += result.cost;
                    OutputRecord::from_result(&result, &ctx)
                }
                Err(e) if config.continue_on_error => {
                    tracing::warn!(key = %input.key, error = %e, "Evaluation failed, writing degraded record");
                    summary.errored += 1;
                    OutputRecord::from_error(input, &e, &ctx)
                }
                Err(e) => {
                    tracing::error!(key = %input.key, error = %e, "Evaluation failed, aborting run");
                    return Err(RuntimeError::Evaluation {
                        key: input.key.clone(),
                        source: e,
                    });
                }
            };

            sinks.write(&record)?;
            ledger.mark_done(input.key.clone());
            evaluated += 1;

            let position = index + 1;
            if config.progress_every > 0
                && (evaluated % config.progress_every == 0 || position == total)
            {
                log_progress(position, total, &summary, started.elapsed());
            }
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            succeeded = summary.succeeded,
            errored = summary.errored,
            skipped_resumed = summary.skipped_resumed,
            interrupted = summary.interrupted,
            cost_usd = summary.cost.total_usd(),
            elapsed = ?summary.elapsed,
            "Batch run finished"
        );
        Ok(summary)
    }
}

fn log_progress(done: usize, total: usize, summary: &RunSummary, elapsed: Duration) {
    let per_item = elapsed.as_secs_f64() / done as f64;
    let eta = Duration::from_secs_f64(per_item * (total - done) as f64);
    tracing::info!(
        done,
        total,
        ok = summary.succeeded,
        errors = summary.errored,
        cost_usd = summary.cost.total_usd(),
        elapsed = ?elapsed,
        eta = ?eta,
        "Progress"
    );
}
