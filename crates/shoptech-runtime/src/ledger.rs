//! Run ledger: the set of input keys already finalized in prior output.
//!
//! Rebuilt from existing JSONL and CSV files on resume. A key is done only
//! when every existing output file holds it, so a crash between the two
//! writes repeats the item. Malformed lines are skipped so a run interrupted
//! mid-write can still be resumed.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

use shoptech_core::normalize_key;

/// Errors reading prior output.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read CSV {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Keys of inputs already written to the output.
#[derive(Debug, Clone, Default)]
pub struct RunLedger {
    done: HashSet<String>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load keys from prior output files. Missing files are ignored.
    ///
    /// Files ending in `.csv` are read as CSV, anything else as JSONL. When
    /// several files exist the ledger holds the keys present in all of them.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, LedgerError> {
        let mut ledger: Option<Self> = None;
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let mut file_keys = Self::new();
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if is_csv {
                file_keys.load_csv(path)?;
            } else {
                file_keys.load_jsonl(path)?;
            }
            tracing::info!(
                path = %path.display(),
                keys = file_keys.len(),
                "Loaded prior results"
            );

            ledger = Some(match ledger {
                None => file_keys,
                Some(mut ledger) => {
                    let before = ledger.len();
                    ledger.done.retain(|key| file_keys.contains(key));
                    if ledger.len() < before {
                        tracing::warn!(
                            path = %path.display(),
                            missing = before - ledger.len(),
                            "Output files disagree, repeating keys not present in every file"
                        );
                    }
                    ledger
                }
            });
        }
        Ok(ledger.unwrap_or_default())
    }

    fn load_jsonl(&mut self, path: &Path) -> Result<(), LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: path.display().to_string(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);

        for (number, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
                tracing::debug!(path = %path.display(), line = number + 1, "Skipping malformed line");
                continue;
            };
            if let Some(key) = record_key(
                value.get("input_key").and_then(|v| v.as_str()),
                value.get("input_url").and_then(|v| v.as_str()),
            ) {
                self.done.insert(key);
            }
        }
        Ok(())
    }

    fn load_csv(&mut self, path: &Path) -> Result<(), LedgerError> {
        let csv_err = |source| LedgerError::Csv {
            path: path.display().to_string(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;

        let headers = reader.headers().map_err(csv_err)?.clone();
        let key_col = headers.iter().position(|h| h.trim_start_matches('\u{feff}') == "input_key");
        let url_col = headers.iter().position(|h| h == "input_url");
        if key_col.is_none() && url_col.is_none() {
            tracing::warn!(path = %path.display(), "No input_key or input_url column, ignoring file");
            return Ok(());
        }

        for record in reader.records() {
            let Ok(record) = record else {
                continue;
            };
            let key = key_col.and_then(|i| record.get(i));
            let url = url_col.and_then(|i| record.get(i));
            if let Some(key) = record_key(key, url) {
                self.done.insert(key);
            }
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.done.contains(key)
    }

    /// Record a key as finalized. Returns false if it was already present.
    pub fn mark_done(&mut self, key: impl Into<String>) -> bool {
        self.done.insert(key.into())
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

fn record_key(key: Option<&str>, url: Option<&str>) -> Option<String> {
    key.map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .or_else(|| url.map(normalize_key))
        .filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_files_give_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::load(&[dir.path().join("nope.jsonl")]).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_load_jsonl_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"input_key":"a.de","final_platform":"shopify"}}"#).unwrap();
        writeln!(file, r#"{{"input_url":"https://B.de/"}}"#).unwrap();
        writeln!(file).unwrap();
        write!(file, r#"{{"input_key":"c.de","final_pl"#).unwrap();

        let ledger = RunLedger::load(&[&path]).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains("a.de"));
        assert!(ledger.contains("b.de"));
        assert!(!ledger.contains("c.de"));
    }

    #[test]
    fn test_load_csv_by_key_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        std::fs::write(
            &path,
            "schema_version,input_key,input_url\n1,a.de,https://a.de\n1,,https://x.de/\n1,b.de\n",
        )
        .unwrap();

        let ledger = RunLedger::load(&[&path]).unwrap();
        assert!(ledger.contains("a.de"));
        assert!(ledger.contains("x.de"));
        assert!(ledger.contains("b.de"));
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_key_must_be_in_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("run.jsonl");
        let csv = dir.path().join("run.csv");
        // b.de reached the JSONL but not the CSV before the crash
        std::fs::write(&jsonl, "{\"input_key\":\"a.de\"}\n{\"input_key\":\"b.de\"}\n").unwrap();
        std::fs::write(&csv, "input_key\na.de\nc.de\n").unwrap();

        let ledger = RunLedger::load(&[&jsonl, &csv]).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains("a.de"));
        assert!(!ledger.contains("b.de"));
        assert!(!ledger.contains("c.de"));
    }

    #[test]
    fn test_single_existing_file_is_enough() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("run.jsonl");
        std::fs::write(&jsonl, "{\"input_key\":\"a.de\"}\n").unwrap();

        let ledger = RunLedger::load(&[jsonl, dir.path().join("run.csv")]).unwrap();
        assert!(ledger.contains("a.de"));
    }

    #[test]
    fn test_mark_done() {
        let mut ledger = RunLedger::new();
        assert!(ledger.mark_done("a.de"));
        assert!(!ledger.mark_done("a.de"));
        assert!(ledger.contains("a.de"));
    }
}
