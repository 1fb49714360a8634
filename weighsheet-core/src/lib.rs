//! weighsheet-core: merge-aware invoice/packing extraction and net weight allocation
//!
//! A document is a workbook holding an invoice sheet and a packing sheet for
//! the same shipment. The [`Reconciler`] locates both tables, reads their
//! line items and the packing totals, and spreads the total net weight over
//! the invoice lines so the allocated weights sum exactly to the total.

pub mod allocate;
pub mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod header;
pub mod merge;
pub mod numeric;
pub mod reader;
pub mod report;
pub mod totals;
pub mod transform;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

pub use allocate::{Allocation, allocate_weights};
pub use batch::{BatchReport, BatchSummary, collect_inputs};
pub use config::{CompiledConfig, ReconcileConfig, TableKind};
pub use error::{ConfigError, ErrorCode, ErrorContext, ProcessingError, ProcessingResult};
pub use extract::{InvoiceLine, PackingLine};
pub use header::ColumnMapping;
pub use merge::{FlatSheet, MergeRange, MergeTracker};
pub use reader::{Sheet, Workbook};
pub use report::{DocumentReport, DocumentStatus, Finding, FindingScope, Severity};
pub use totals::PackingTotals;

/// Find the invoice and packing sheets by name.
///
/// Names are trimmed before matching and the first matching sheet wins for
/// each kind. Returns the untrimmed names.
pub fn detect_sheets(workbook: &Workbook, config: &CompiledConfig) -> ProcessingResult<(String, String)> {
    let find = |kind: TableKind| {
        workbook.sheets.iter().find_map(|sheet| {
            let name = sheet.name.trim();
            let pattern = config
                .sheet_patterns(kind)
                .iter()
                .find(|re| re.is_match(name))?;
            info!("Detected {} sheet: '{}' matched pattern {}", kind, sheet.name, pattern.as_str());
            Some(sheet.name.clone())
        })
    };
    let sheet_list = || workbook.sheet_names().join(", ");

    let invoice = find(TableKind::Invoice).ok_or_else(|| {
        ProcessingError::new(
            ErrorCode::InvoiceSheetMissing,
            "Invoice sheet not found in workbook",
            ErrorContext::default().detail("sheet_names", sheet_list()),
        )
    })?;
    let packing = find(TableKind::Packing).ok_or_else(|| {
        ProcessingError::new(
            ErrorCode::PackingSheetMissing,
            "Packing sheet not found in workbook",
            ErrorContext::default().detail("sheet_names", sheet_list()),
        )
    })?;
    Ok((invoice, packing))
}

/// Map a workbook read failure to ERR_010 (locked or no access) or ERR_011
fn read_failure(path: &Path, err: &anyhow::Error) -> ProcessingError {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let locked = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(is_lock_error);
    if locked {
        ProcessingError::new(
            ErrorCode::LockedWorkbook,
            format!("File is locked or inaccessible: {}", name),
            ErrorContext::default().detail("filename", name),
        )
    } else {
        ProcessingError::new(
            ErrorCode::UnreadableWorkbook,
            format!("File is corrupted or unreadable: {} ({:#})", name, err),
            ErrorContext::default().detail("filename", name),
        )
    }
}

fn is_lock_error(err: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION and ERROR_LOCK_VIOLATION
    err.kind() == io::ErrorKind::PermissionDenied || (cfg!(windows) && matches!(err.raw_os_error(), Some(32 | 33)))
}

fn sheet_unavailable(kind: TableKind, name: &str) -> ProcessingError {
    let code = match kind {
        TableKind::Invoice => ErrorCode::InvoiceSheetMissing,
        TableKind::Packing => ErrorCode::PackingSheetMissing,
    };
    ProcessingError::new(
        code,
        format!("Detected {} sheet '{}' is not in the workbook", kind, name),
        ErrorContext::default().detail("sheet", name),
    )
}

/// Main reconciliation interface
pub struct Reconciler {
    config: CompiledConfig,
}

impl Reconciler {
    pub fn new(config: CompiledConfig) -> Self {
        Self { config }
    }

    /// Compile `config` and build a reconciler from it
    pub fn from_config(config: &ReconcileConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.compile()?))
    }

    pub fn config(&self) -> &CompiledConfig {
        &self.config
    }

    /// Process one spreadsheet file.
    ///
    /// Never fails: every problem ends up in the returned report.
    pub fn process_file<P: AsRef<Path>>(&self, path: P) -> DocumentReport {
        let path = path.as_ref();
        info!("Processing: {}", path.display());
        match reader::read_workbook(path) {
            Ok(workbook) => self.process_workbook(workbook),
            Err(err) => {
                let mut report = DocumentReport::new(path);
                report.errors.push(read_failure(path, &err));
                report.finish()
            }
        }
    }

    /// Expand `inputs` (files and directories) and process every document
    /// in order.
    ///
    /// Fails only when a directory cannot be listed.
    pub fn process_batch(&self, inputs: &[PathBuf]) -> anyhow::Result<BatchReport> {
        let files = collect_inputs(inputs)?;
        let started = Instant::now();
        let total = files.len();
        let documents: Vec<DocumentReport> = files
            .iter()
            .enumerate()
            .map(|(idx, file)| {
                info!("[{}/{}] {}", idx + 1, total, file.display());
                self.process_file(file)
            })
            .collect();
        let summary = BatchSummary::from_reports(&documents, started.elapsed());
        info!(
            "Processed {} files in {:.2}s: {} success, {} attention, {} failed",
            summary.total,
            summary.elapsed_seconds,
            summary.success,
            summary.attention,
            summary.failed
        );
        Ok(BatchReport { documents, summary })
    }

    /// Process an already loaded workbook
    pub fn process_workbook(&self, workbook: Workbook) -> DocumentReport {
        let mut report = DocumentReport::new(workbook.path.clone());
        if let Err(err) = self.run(workbook, &mut report) {
            report.errors.push(err);
        }
        let report = report.finish();
        info!("{}: {}", report.file.display(), report.status);
        report
    }

    fn run(&self, mut workbook: Workbook, report: &mut DocumentReport) -> ProcessingResult<()> {
        let (invoice_name, packing_name) = detect_sheets(&workbook, &self.config)?;
        report.invoice_sheet = Some(invoice_name.clone());
        report.packing_sheet = Some(packing_name.clone());

        // One sheet may match both kinds
        let invoice_sheet = if invoice_name == packing_name {
            workbook.get_sheet(&invoice_name).cloned()
        } else {
            workbook.take_sheet(&invoice_name)
        };
        let invoice_sheet = invoice_sheet.ok_or_else(|| sheet_unavailable(TableKind::Invoice, &invoice_name))?;
        let packing_sheet = workbook
            .take_sheet(&packing_name)
            .ok_or_else(|| sheet_unavailable(TableKind::Packing, &packing_name))?;

        let invoice = FlatSheet::flatten(invoice_sheet);
        let packing = FlatSheet::flatten(packing_sheet);

        let invoice_header = header::detect_header_row(&invoice, TableKind::Invoice)?;
        let invoice_map = header::map_columns(
            &invoice,
            invoice_header,
            TableKind::Invoice,
            self.config.columns(TableKind::Invoice),
        )?;
        let packing_header = header::detect_header_row(&packing, TableKind::Packing)?;
        let packing_map = header::map_columns(
            &packing,
            packing_header,
            TableKind::Packing,
            self.config.columns(TableKind::Packing),
        )?;

        let has_number_column = invoice_map.column(config::INV_NO).is_some();
        let header_number = if has_number_column {
            None
        } else {
            header::extract_invoice_number(&invoice, &self.config.invoice_number)
        };

        let lines = extract::extract_invoice_lines(&invoice, &invoice_map, header_number.as_deref())?;
        let invoice_number = if has_number_column {
            lines.first().map(|line| line.invoice_number.clone())
        } else {
            header_number
        }
        .filter(|number| !number.is_empty())
        .ok_or_else(|| {
            ProcessingError::new(
                ErrorCode::InvoiceNumberMissing,
                "Invoice number not found: neither column extraction nor header fallback produced a value",
                ErrorContext::default().detail("sheet", invoice.name()),
            )
        })?;
        report.invoice_number = Some(invoice_number);
        report.lines = lines;

        let (packing_lines, last_data_row) = extract::extract_packing_lines(&packing, &packing_map)?;
        extract::validate_merged_weights(&packing, &packing_map)?;

        let total_row = totals::detect_total_row(&packing, last_data_row, &packing_map)?;
        let packing_totals = totals::extract_totals(&packing, total_row, &packing_map)?;
        if packing_totals.total_packets.is_none() {
            report
                .findings
                .push(Finding::packets_not_found(packing.name(), total_row));
        }
        report.totals = Some(packing_totals.clone());

        let site = transform::InvoiceSite {
            sheet: invoice.name(),
            mapping: &invoice_map,
        };
        let findings = transform::normalize_lines(
            &mut report.lines,
            &self.config.currency_lookup,
            &self.config.country_lookup,
            &site,
        );
        report.findings.extend(findings);

        let allocation = allocate_weights(&mut report.lines, &packing_lines, &packing_totals)?;
        report.allocation = Some(allocation);
        Ok(())
    }
}
