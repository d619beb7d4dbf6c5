//! Input list loading: plain URL lists and CSV exports.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::Path;

use shoptech_core::EvaluationInput;

/// Delimiters considered when sniffing a CSV header.
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// `.txt`, `.list` and `.urls` are URL lists, anything else is CSV
    Auto,
    Csv,
    Txt,
}

impl InputFormat {
    fn resolve(self, path: &Path) -> Self {
        match self {
            InputFormat::Auto => {
                let ext = path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if matches!(ext.as_str(), "txt" | "list" | "urls") {
                    InputFormat::Txt
                } else {
                    InputFormat::Csv
                }
            }
            other => other,
        }
    }
}

/// CSV column names. `None` disables an optional column.
#[derive(Debug, Clone)]
pub struct CsvColumns {
    pub url: String,
    pub name: Option<String>,
    pub bucket: Option<String>,
}

pub fn load_inputs(
    path: &Path,
    format: InputFormat,
    delimiter: Option<u8>,
    columns: &CsvColumns,
) -> Result<Vec<EvaluationInput>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file {}", path.display()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    match format.resolve(path) {
        InputFormat::Txt => Ok(parse_url_list(text)),
        _ => parse_csv(text, delimiter, columns)
            .with_context(|| format!("Failed to parse CSV {}", path.display())),
    }
}

/// One URL per line; blank lines and `#` comments are skipped.
pub fn parse_url_list(text: &str) -> Vec<EvaluationInput> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(EvaluationInput::new)
        .collect()
}

/// The candidate delimiter occurring most often in the header line.
pub fn detect_delimiter(header: &str) -> u8 {
    CANDIDATE_DELIMITERS
        .iter()
        .copied()
        .map(|d| (d, header.bytes().filter(|b| *b == d).count()))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

fn find_column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
}

pub fn parse_csv(
    text: &str,
    delimiter: Option<u8>,
    columns: &CsvColumns,
) -> Result<Vec<EvaluationInput>> {
    let delimiter =
        delimiter.unwrap_or_else(|| detect_delimiter(text.lines().next().unwrap_or_default()));
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let Some(url_col) = find_column(&headers, &columns.url) else {
        bail!(
            "URL column '{}' not found; available columns: {:?}",
            columns.url,
            headers.iter().collect::<Vec<_>>()
        );
    };
    let name_col = columns.name.as_deref().and_then(|n| find_column(&headers, n));
    let bucket_col = columns.bucket.as_deref().and_then(|b| find_column(&headers, b));

    let mut inputs = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |col: Option<usize>| col.and_then(|i| record.get(i)).unwrap_or_default();

        let mut input = EvaluationInput::new(field(Some(url_col)));
        if let Some(name) = name_col.map(|_| field(name_col)) {
            input = input.with_name(name);
        }
        if let Some(bucket) = bucket_col.map(|_| field(bucket_col)) {
            input = input.with_bucket(bucket);
        }
        inputs.push(input);
    }
    Ok(inputs)
}
