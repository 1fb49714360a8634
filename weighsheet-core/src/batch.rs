//! Input discovery and run summaries for multi-document runs

use crate::report::{DocumentReport, DocumentStatus};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Extensions picked up when scanning a directory
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["xlsx", "xlsm", "xls"];

/// Prefix of the lock files office suites leave next to open documents
const LOCK_FILE_PREFIX: &str = "~$";

/// Expand inputs into the list of documents to process.
///
/// Files are taken as given. Directories contribute their supported
/// spreadsheets, sorted by name, without descending into subdirectories and
/// skipping lock files and hidden files.
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(scan_directory(input)?);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
            .path();
        if !path.is_file() || !has_supported_extension(&path) {
            continue;
        }
        if is_lock_file(&path) {
            debug!("Skipping lock file: {}", path.display());
            continue;
        }
        if is_hidden(&path) {
            debug!("Skipping hidden file: {}", path.display());
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

pub fn is_lock_file(path: &Path) -> bool {
    file_name(path).starts_with(LOCK_FILE_PREFIX)
}

#[cfg(windows)]
pub fn is_hidden(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;

    file_name(path).starts_with('.')
        || fs::metadata(path).is_ok_and(|meta| meta.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
}

#[cfg(not(windows))]
pub fn is_hidden(path: &Path) -> bool {
    file_name(path).starts_with('.')
}

/// Per-status counts and wall time of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub attention: usize,
    pub failed: usize,
    pub elapsed_seconds: f64,
}

impl BatchSummary {
    pub fn from_reports(reports: &[DocumentReport], elapsed: Duration) -> Self {
        let count = |status| reports.iter().filter(|r| r.status == status).count();
        Self {
            total: reports.len(),
            success: count(DocumentStatus::Success),
            attention: count(DocumentStatus::Attention),
            failed: count(DocumentStatus::Failed),
            elapsed_seconds: elapsed.as_secs_f64(),
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Every document report of a run plus its summary
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub documents: Vec<DocumentReport>,
    pub summary: BatchSummary,
}
