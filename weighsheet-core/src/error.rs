//! Typed failures raised while processing a single document

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Stable identifiers for every hard failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// ERR_010
    LockedWorkbook,
    /// ERR_011
    UnreadableWorkbook,
    /// ERR_012
    InvoiceSheetMissing,
    /// ERR_013
    PackingSheetMissing,
    /// ERR_014
    HeaderNotFound,
    /// ERR_020
    ColumnsMissing,
    /// ERR_021
    InvoiceNumberMissing,
    /// ERR_030
    EmptyField,
    /// ERR_031
    InvalidNumber,
    /// ERR_032
    TotalRowNotFound,
    /// ERR_033
    InvalidTotalNetWeight,
    /// ERR_034
    InvalidTotalGrossWeight,
    /// ERR_040
    PartMissingFromPacking,
    /// ERR_041
    RemainderMismatch,
    /// ERR_042
    ZeroPartWeight,
    /// ERR_043
    PartMissingFromInvoice,
    /// ERR_044
    WeightRoundsToZero,
    /// ERR_045
    ZeroPartQuantity,
    /// ERR_046
    SharedMergedWeight,
    /// ERR_047
    PackingTotalMismatch,
    /// ERR_048
    AllocationSumMismatch,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LockedWorkbook => "ERR_010",
            ErrorCode::UnreadableWorkbook => "ERR_011",
            ErrorCode::InvoiceSheetMissing => "ERR_012",
            ErrorCode::PackingSheetMissing => "ERR_013",
            ErrorCode::HeaderNotFound => "ERR_014",
            ErrorCode::ColumnsMissing => "ERR_020",
            ErrorCode::InvoiceNumberMissing => "ERR_021",
            ErrorCode::EmptyField => "ERR_030",
            ErrorCode::InvalidNumber => "ERR_031",
            ErrorCode::TotalRowNotFound => "ERR_032",
            ErrorCode::InvalidTotalNetWeight => "ERR_033",
            ErrorCode::InvalidTotalGrossWeight => "ERR_034",
            ErrorCode::PartMissingFromPacking => "ERR_040",
            ErrorCode::RemainderMismatch => "ERR_041",
            ErrorCode::ZeroPartWeight => "ERR_042",
            ErrorCode::PartMissingFromInvoice => "ERR_043",
            ErrorCode::WeightRoundsToZero => "ERR_044",
            ErrorCode::ZeroPartQuantity => "ERR_045",
            ErrorCode::SharedMergedWeight => "ERR_046",
            ErrorCode::PackingTotalMismatch => "ERR_047",
            ErrorCode::AllocationSumMismatch => "ERR_048",
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the document a failure was detected
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub part_numbers: Vec<String>,
    /// Inclusive row range that was searched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub searched_rows: Option<(u32, u32)>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn at(row: u32, column: u32) -> Self {
        Self {
            row: Some(row),
            column: Some(column),
            ..Default::default()
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn part(mut self, part_number: impl Into<String>) -> Self {
        self.part_numbers.push(part_number.into());
        self
    }

    pub fn parts<I, S>(mut self, part_numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.part_numbers
            .extend(part_numbers.into_iter().map(Into::into));
        self
    }

    pub fn searched(mut self, first_row: u32, last_row: u32) -> Self {
        self.searched_rows = Some((first_row, last_row));
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

/// A hard failure: terminal for the current document, never for the process
#[derive(Debug, Clone, Error, Serialize)]
#[error("[{code}] {message}")]
pub struct ProcessingError {
    pub code: ErrorCode,
    pub message: String,
    pub context: ErrorContext,
}

impl ProcessingError {
    pub fn new(code: ErrorCode, message: impl Into<String>, context: ErrorContext) -> Self {
        let err = Self {
            code,
            message: message.into(),
            context,
        };
        tracing::error!(code = %err.code, "{}", err.message);
        err
    }
}

pub type ProcessingResult<T> = std::result::Result<T, ProcessingError>;

/// Configuration problems, reported before any document is touched
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid regex in {section}.{field}: {source}")]
    Regex {
        section: String,
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("{section} must define the '{field}' field")]
    MissingField { section: String, field: String },
    #[error("duplicate key '{key}' in {section} (normalized: '{normalized}')")]
    DuplicateLookupKey {
        section: String,
        key: String,
        normalized: String,
    },
}
