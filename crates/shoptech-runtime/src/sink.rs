//! Output sinks: one JSONL line and one CSV row per finalized input.
//!
//! Every write is flushed and synced before the key is marked done, so an
//! interrupted run never leaves a key in the ledger without its output.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use shoptech_core::{
    CostEstimate, EvaluationInput, PlatformPayload, ServiceTier, UsageCounters,
};

use crate::attempt::AttemptSummary;
use crate::orchestrator::{EvaluationError, EvaluationResult};
use crate::providers::Citation;

/// Version of the output record layout.
pub const SCHEMA_VERSION: u32 = 2;

/// Errors writing output.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write CSV row: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to serialize record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a run writes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub jsonl: PathBuf,
    pub csv: PathBuf,
}

impl OutputPaths {
    pub fn new(jsonl: impl Into<PathBuf>, csv: impl Into<PathBuf>) -> Self {
        Self {
            jsonl: jsonl.into(),
            csv: csv.into(),
        }
    }

    /// Both files from one stem: `<stem>.jsonl` and `<stem>.csv`.
    pub fn from_stem(stem: impl AsRef<Path>) -> Self {
        let stem = stem.as_ref();
        Self::new(stem.with_extension("jsonl"), stem.with_extension("csv"))
    }

    /// `<dir>/<YYYYmmdd_HHMMSS>[_suffix].{jsonl,csv}` using local time.
    pub fn timestamped(dir: impl AsRef<Path>, suffix: Option<&str>, now: DateTime<Local>) -> Self {
        let mut name = now.format("%Y%m%d_%H%M%S").to_string();
        if let Some(slug) = suffix.map(slugify).filter(|s| !s.is_empty()) {
            name.push('_');
            name.push_str(&slug);
        }
        Self::from_stem(dir.as_ref().join(name))
    }

    /// Identifier of the run: the JSONL file stem.
    pub fn run_id(&self) -> String {
        self.jsonl
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Keep alphanumerics, `-` and `_`; spaces become `_`.
fn slugify(text: &str) -> String {
    text.trim()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => Some(c),
            _ => None,
        })
        .collect()
}

/// Per-run values stamped on every record.
#[derive(Debug, Clone)]
pub struct RecordContext {
    pub run_id: String,
    pub model: String,

    /// Include attempt summaries and citations
    pub debug: bool,
}

/// Cost columns in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostSummary {
    pub token_cost_usd: f64,
    pub raw_token_cost_usd: f64,
    pub web_search_cost_usd: f64,
    pub total_cost_usd: f64,
}

impl From<&CostEstimate> for CostSummary {
    fn from(cost: &CostEstimate) -> Self {
        Self {
            token_cost_usd: cost.token_cost_usd(),
            raw_token_cost_usd: cost.raw_token_cost_usd(),
            web_search_cost_usd: cost.web_search_cost_usd(),
            total_cost_usd: cost.total_usd(),
        }
    }
}

/// One JSONL line.
#[derive(Debug, Clone, Serialize)]
pub struct OutputRecord {
    pub schema_version: u32,
    pub run_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub input_key: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    pub model: String,

    #[serde(flatten)]
    pub payload: PlatformPayload,

    pub retry_used: bool,
    pub retry_selected: bool,
    pub usage: UsageCounters,
    pub total_tokens: u64,

    /// Billed web search queries
    pub web_search_calls: u32,

    pub cost: CostSummary,
    pub service_tier: ServiceTier,
    pub tier_retries: u32,
    pub fallback_used: bool,
    pub duration_seconds: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<Vec<AttemptSummary>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

impl OutputRecord {
    pub fn from_result(result: &EvaluationResult, ctx: &RecordContext) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: ctx.run_id.clone(),
            evaluated_at: Utc::now(),
            input_key: result.input.key.clone(),
            name: result.input.name.clone(),
            bucket: result.input.bucket.clone(),
            model: ctx.model.clone(),
            payload: result.payload.clone(),
            retry_used: result.retry_used,
            retry_selected: result.retry_selected,
            usage: result.usage,
            total_tokens: result.usage.total_tokens(),
            web_search_calls: result.usage.tool_calls.query,
            cost: CostSummary::from(&result.cost),
            service_tier: result.service_tier,
            tier_retries: result.tier_retries(),
            fallback_used: result.fallback_used(),
            duration_seconds: result.elapsed.as_secs_f64(),
            validation_error: result.validation_error.clone(),
            error: None,
            attempts: ctx.debug.then(|| result.attempts.clone()),
            citations: ctx.debug.then(|| result.citations.clone()),
        }
    }

    /// A degraded record for an input whose evaluation failed.
    pub fn from_error(
        input: &EvaluationInput,
        error: &EvaluationError,
        ctx: &RecordContext,
    ) -> Self {
        let cost = CostEstimate::default();
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: ctx.run_id.clone(),
            evaluated_at: Utc::now(),
            input_key: input.key.clone(),
            name: input.name.clone(),
            bucket: input.bucket.clone(),
            model: ctx.model.clone(),
            payload: PlatformPayload::unobtainable(input.canonical_url()),
            retry_used: false,
            retry_selected: false,
            usage: UsageCounters::default(),
            total_tokens: 0,
            web_search_calls: 0,
            cost: CostSummary::from(&cost),
            service_tier: cost.service_tier,
            tier_retries: 0,
            fallback_used: false,
            duration_seconds: 0.0,
            validation_error: None,
            error: Some(error.to_string()),
            attempts: None,
            citations: None,
        }
    }
}

/// One CSV row. Column order follows field order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsvRow {
    pub schema_version: u32,
    pub run_id: String,
    pub evaluated_at: String,
    pub input_key: String,
    pub input_url: String,
    pub name: Option<String>,
    pub bucket: Option<String>,
    pub model: String,
    pub final_platform: String,
    pub confidence: String,
    pub evidence_tier: String,
    pub signals: String,
    pub reasoning: String,
    pub retry_used: bool,
    pub retry_selected: bool,
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
    pub web_search_calls_query: u32,
    pub web_search_calls_open: u32,
    pub web_search_calls_unknown: u32,
    pub token_cost_usd: f64,
    pub raw_token_cost_usd: f64,
    pub web_search_cost_usd: f64,
    pub total_cost_usd: f64,
    pub service_tier: String,
    pub tier_retries: u32,
    pub fallback_used: bool,
    pub duration_seconds: f64,
    pub error: String,
    pub validation_error: String,
}

impl From<&OutputRecord> for CsvRow {
    fn from(record: &OutputRecord) -> Self {
        let usage = &record.usage;
        Self {
            schema_version: record.schema_version,
            run_id: record.run_id.clone(),
            evaluated_at: record.evaluated_at.to_rfc3339(),
            input_key: record.input_key.clone(),
            input_url: record.payload.input_url.clone(),
            name: record.name.clone(),
            bucket: record.bucket.clone(),
            model: record.model.clone(),
            final_platform: record.payload.final_platform.to_string(),
            confidence: record.payload.confidence.to_string(),
            evidence_tier: record.payload.evidence_tier.to_string(),
            signals: record.payload.signals.join(" | "),
            reasoning: record.payload.reasoning.clone(),
            retry_used: record.retry_used,
            retry_selected: record.retry_selected,
            input_tokens: usage.input_tokens,
            cached_input_tokens: usage.cached_input_tokens,
            output_tokens: usage.output_tokens,
            reasoning_tokens: usage.reasoning_tokens,
            total_tokens: record.total_tokens,
            web_search_calls_query: usage.tool_calls.query,
            web_search_calls_open: usage.tool_calls.open,
            web_search_calls_unknown: usage.tool_calls.unknown,
            token_cost_usd: record.cost.token_cost_usd,
            raw_token_cost_usd: record.cost.raw_token_cost_usd,
            web_search_cost_usd: record.cost.web_search_cost_usd,
            total_cost_usd: record.cost.total_cost_usd,
            service_tier: record.service_tier.to_string(),
            tier_retries: record.tier_retries,
            fallback_used: record.fallback_used,
            duration_seconds: record.duration_seconds,
            error: record.error.clone().unwrap_or_default(),
            validation_error: record.validation_error.clone().unwrap_or_default(),
        }
    }
}

/// Open JSONL and CSV files of one run.
pub struct OutputSinks {
    jsonl: File,
    csv: csv::Writer<File>,
    paths: OutputPaths,
    written: usize,
}

impl OutputSinks {
    /// Open both files. With `append`, existing content is kept and the CSV
    /// header is written only if the file is new or empty.
    pub fn open(paths: &OutputPaths, append: bool) -> Result<Self, SinkError> {
        let jsonl = open_file(&paths.jsonl, append)?;
        let csv_file = open_file(&paths.csv, append)?;
        let write_header = csv_file.metadata()?.len() == 0;
        let csv = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(csv_file);

        Ok(Self {
            jsonl,
            csv,
            paths: paths.clone(),
            written: 0,
        })
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    /// Records written through this handle.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Append one record to both files and make it durable.
    pub fn write(&mut self, record: &OutputRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.jsonl.write_all(line.as_bytes())?;
        self.jsonl.flush()?;
        self.jsonl.sync_data()?;

        self.csv.serialize(CsvRow::from(record))?;
        self.csv.flush()?;
        self.csv.get_ref().sync_data()?;

        self.written += 1;
        Ok(())
    }
}

fn open_file(path: &Path, append: bool) -> Result<File, SinkError> {
    let open_err = |source| SinkError::Open {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(open_err)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(open_err)?;

    // A run killed mid-write leaves a partial last line; start on a fresh one.
    if append && !ends_with_newline(path).map_err(open_err)? {
        file.write_all(b"\n")?;
    }
    Ok(file)
}

fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
