//! Output formatters for document reports

use anyhow::Result;
use colored::*;
use std::collections::BTreeMap;
use weighsheet_core::{BatchReport, DocumentReport, DocumentStatus, Finding, FindingScope, Severity};

/// Print reports in human-readable format with colors
pub fn print_human(batch: &BatchReport) {
    if batch.documents.is_empty() {
        println!("{}", "No spreadsheets found".yellow());
    }
    for report in &batch.documents {
        print_report(report);
        println!();
    }

    let summary = &batch.summary;
    println!("{}", "Summary:".bold().underline());
    println!("  {} {}", "Files:".bold(), summary.total);
    println!("  {} {}", "Success:".green().bold(), summary.success);
    if summary.attention > 0 {
        println!("  {} {}", "Attention:".yellow().bold(), summary.attention);
    }
    if summary.failed > 0 {
        println!("  {} {}", "Failed:".red().bold(), summary.failed);
    }
    println!("  {} {:.2}s", "Time:".bold(), summary.elapsed_seconds);
}

fn status_label(status: DocumentStatus) -> ColoredString {
    match status {
        DocumentStatus::Success => "SUCCESS".green().bold(),
        DocumentStatus::Attention => "ATTENTION".yellow().bold(),
        DocumentStatus::Failed => "FAILED".red().bold(),
    }
}

fn print_report(report: &DocumentReport) {
    println!(
        "{} {}",
        status_label(report.status),
        report.file.display().to_string().bold()
    );

    if let Some(number) = &report.invoice_number {
        println!("  {} {}", "Invoice:".bold(), number.cyan());
    }
    if let Some(totals) = &report.totals {
        let packets = totals
            .total_packets
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        println!(
            "  {} NW {}  GW {}  packets {}",
            "Totals:".bold(),
            totals.total_net_weight,
            totals.total_gross_weight,
            packets
        );
    }

    if report.allocation.is_some() {
        for line in &report.lines {
            let weight = line
                .allocated_weight
                .map_or_else(|| "-".to_string(), |w| w.to_string());
            println!(
                "    {} {:<24} qty {:>10}  nw {:>12}",
                format!("row {:>4}", line.source_row).bright_black(),
                line.part_number,
                line.quantity,
                weight
            );
        }
    }

    for err in &report.errors {
        println!("  {} [{}] {}", "ERROR".red().bold(), err.code.as_str().bright_black(), err.message);
    }

    // Findings grouped by sheet, document-level ones first
    let mut by_sheet: BTreeMap<Option<&str>, Vec<&Finding>> = BTreeMap::new();
    for finding in &report.findings {
        by_sheet.entry(finding.scope.sheet_name()).or_default().push(finding);
    }
    for (sheet, findings) in by_sheet {
        let indent = match sheet {
            Some(name) => {
                println!("  {} {}", "Sheet:".bold(), name.cyan().bold());
                2
            }
            None => 1,
        };
        for finding in findings {
            print_finding(finding, indent);
        }
    }
}

fn print_finding(finding: &Finding, indent: usize) {
    let indent_str = "  ".repeat(indent);
    let severity_str = match finding.severity {
        Severity::Error => "ERROR".red().bold(),
        Severity::Warning => "WARN".yellow().bold(),
        Severity::Info => "INFO".blue().bold(),
    };
    let location = match &finding.scope {
        FindingScope::Cell(_, cell) => format!(" {}", cell.to_string().yellow()),
        _ => String::new(),
    };

    println!(
        "{}{}{} [{}] {}",
        indent_str,
        severity_str,
        location,
        finding.code.bright_black(),
        finding.message
    );
}

/// Print reports in JSON format
pub fn print_json(batch: &BatchReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(batch)?);
    Ok(())
}
