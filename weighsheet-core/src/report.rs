//! Soft findings and per-document outcome

use crate::allocate::Allocation;
use crate::error::ProcessingError;
use crate::extract::InvoiceLine;
use crate::totals::PackingTotals;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::PathBuf;

/// Total packet count not found near the total row
pub const ATT_PACKETS_NOT_FOUND: &str = "ATT_002";

/// Severity level of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Where a finding applies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FindingScope {
    Document,
    Sheet(String),
    Cell(String, CellReference),
}

impl FindingScope {
    pub fn sheet_name(&self) -> Option<&str> {
        match self {
            FindingScope::Document => None,
            FindingScope::Sheet(name) | FindingScope::Cell(name, _) => Some(name),
        }
    }
}

/// 1-based cell position, rendered A1-style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellReference {
    pub row: u32,
    pub col: u32,
}

impl CellReference {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    pub fn to_excel_ref(&self) -> String {
        format!("{}{}", col_to_letter(self.col), self.row)
    }
}

/// Column number to letters (1 -> A, 27 -> AA)
pub fn col_to_letter(col: u32) -> String {
    let mut result = String::new();
    let mut n = col;
    while n > 0 {
        let rem = (n - 1) % 26;
        result.insert(0, (b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    result
}

impl PartialOrd for CellReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row.cmp(&other.row).then_with(|| self.col.cmp(&other.col))
    }
}

impl std::fmt::Display for CellReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_excel_ref())
    }
}

/// A condition that does not stop processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub code: String,
    pub severity: Severity,
    pub scope: FindingScope,
    pub message: String,
}

impl Finding {
    pub fn new(
        code: impl Into<String>,
        severity: Severity,
        scope: FindingScope,
        message: impl Into<String>,
    ) -> Self {
        let finding = Self {
            code: code.into(),
            severity,
            scope,
            message: message.into(),
        };
        if finding.severity >= Severity::Warning {
            tracing::warn!(code = %finding.code, "{}", finding.message);
        }
        finding
    }

    /// `ATT_002` for a total row without a packet count
    pub fn packets_not_found(sheet: &str, total_row: u32) -> Self {
        Self::new(
            ATT_PACKETS_NOT_FOUND,
            Severity::Warning,
            FindingScope::Sheet(sheet.to_string()),
            format!("Total packet count not found near total row {}", total_row),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Success,
    Attention,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Success => "success",
            DocumentStatus::Attention => "attention",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything learned about one document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub file: PathBuf,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_sheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packing_sheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<PackingTotals>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation: Option<Allocation>,
    pub lines: Vec<InvoiceLine>,
    pub errors: Vec<ProcessingError>,
    pub findings: Vec<Finding>,
}

impl DocumentReport {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            status: DocumentStatus::Success,
            invoice_sheet: None,
            packing_sheet: None,
            invoice_number: None,
            totals: None,
            allocation: None,
            lines: Vec::new(),
            errors: Vec::new(),
            findings: Vec::new(),
        }
    }

    /// Derive the status from the recorded errors and findings
    pub fn finish(mut self) -> Self {
        self.status = if !self.errors.is_empty() {
            DocumentStatus::Failed
        } else if self
            .findings
            .iter()
            .any(|f| f.severity >= Severity::Warning)
        {
            DocumentStatus::Attention
        } else {
            DocumentStatus::Success
        };
        self
    }
}
