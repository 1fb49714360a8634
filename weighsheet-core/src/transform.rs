//! Normalization of extracted invoice lines
//!
//! Currency and origin country are rewritten to target codes through the
//! configured lookup tables. A value missing from its table is left as
//! written and reported as a finding. PO numbers lose their suffix.

use crate::config::{COO, CURRENCY, LookupTable, normalize_lookup_key};
use crate::extract::InvoiceLine;
use crate::header::ColumnMapping;
use crate::report::{CellReference, Finding, FindingScope, Severity};
use tracing::debug;

/// Currency value not found in the currency table
pub const ATT_UNKNOWN_CURRENCY: &str = "ATT_003";
/// Origin country not found in the country table
pub const ATT_UNKNOWN_COUNTRY: &str = "ATT_004";

const PO_DELIMITERS: [char; 3] = ['-', '.', '/'];

/// Where findings about invoice cells point
pub struct InvoiceSite<'a> {
    pub sheet: &'a str,
    pub mapping: &'a ColumnMapping,
}

impl InvoiceSite<'_> {
    fn scope(&self, row: u32, field: &str) -> FindingScope {
        match self.mapping.column(field) {
            Some(col) => FindingScope::Cell(self.sheet.to_string(), CellReference::new(row, col)),
            None => FindingScope::Sheet(self.sheet.to_string()),
        }
    }
}

/// Replace each line's currency with its code; one `ATT_003` per miss
pub fn convert_currency(lines: &mut [InvoiceLine], table: &LookupTable, site: &InvoiceSite) -> Vec<Finding> {
    let mut findings = Vec::new();
    for line in lines.iter_mut() {
        match table.get(&line.currency) {
            Some(code) => {
                debug!("Row {}: currency {:?} -> {}", line.source_row, line.currency, code);
                line.currency = code.to_string();
            }
            None => findings.push(Finding::new(
                ATT_UNKNOWN_CURRENCY,
                Severity::Warning,
                site.scope(line.source_row, CURRENCY),
                format!(
                    "Currency value '{}' (normalized: '{}') not found in currency_lookup",
                    line.currency,
                    normalize_lookup_key(&line.currency)
                ),
            )),
        }
    }
    findings
}

/// Replace each line's origin country with its code; one `ATT_004` per miss
pub fn convert_country(lines: &mut [InvoiceLine], table: &LookupTable, site: &InvoiceSite) -> Vec<Finding> {
    let mut findings = Vec::new();
    for line in lines.iter_mut() {
        match table.get(&line.country_of_origin) {
            Some(code) => {
                debug!("Row {}: COO {:?} -> {}", line.source_row, line.country_of_origin, code);
                line.country_of_origin = code.to_string();
            }
            None => findings.push(Finding::new(
                ATT_UNKNOWN_COUNTRY,
                Severity::Warning,
                site.scope(line.source_row, COO),
                format!(
                    "COO value '{}' (normalized: '{}') not found in country_lookup",
                    line.country_of_origin,
                    normalize_lookup_key(&line.country_of_origin)
                ),
            )),
        }
    }
    findings
}

/// Cut a PO number at its first '-', '.' or '/'.
///
/// A delimiter in first position leaves the value unchanged, so the result
/// is never empty unless the input was.
pub fn clean_po_number(po_number: &str) -> &str {
    match po_number.find(PO_DELIMITERS) {
        Some(idx) if idx > 0 => &po_number[..idx],
        _ => po_number,
    }
}

/// Run every line normalization and collect the findings.
///
/// An empty lookup table disables that conversion.
pub fn normalize_lines(
    lines: &mut [InvoiceLine],
    currency_table: &LookupTable,
    country_table: &LookupTable,
    site: &InvoiceSite,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    if !currency_table.is_empty() {
        findings.extend(convert_currency(lines, currency_table, site));
    }
    if !country_table.is_empty() {
        findings.extend(convert_country(lines, country_table, site));
    }
    for line in lines.iter_mut() {
        let cleaned = clean_po_number(&line.po_number).to_string();
        if cleaned != line.po_number {
            debug!("Row {}: PO {:?} -> {:?}", line.source_row, line.po_number, cleaned);
            line.po_number = cleaned;
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PART_NO, ReconcileConfig, TableKind};
    use indexmap::IndexMap;
    use rust_decimal::Decimal;

    fn mapping() -> ColumnMapping {
        let field_map: IndexMap<String, u32> = [(PART_NO, 1), (CURRENCY, 6), (COO, 7)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        ColumnMapping {
            table: TableKind::Invoice,
            field_map,
            header_row: 8,
            effective_header_row: 8,
        }
    }

    fn line(row: u32, currency: &str, coo: &str, po: &str) -> InvoiceLine {
        InvoiceLine {
            currency: currency.to_string(),
            country_of_origin: coo.to_string(),
            po_number: po.to_string(),
            source_row: row,
            ..InvoiceLine::new("A-1", Decimal::ONE)
        }
    }

    #[test]
    fn test_clean_po_number() {
        assert_eq!(clean_po_number("PO123-01"), "PO123");
        assert_eq!(clean_po_number("4500012345.10"), "4500012345");
        assert_eq!(clean_po_number("PO9/2-1"), "PO9");
        assert_eq!(clean_po_number("-PO77"), "-PO77");
        assert_eq!(clean_po_number("PO555"), "PO555");
        assert_eq!(clean_po_number(""), "");
    }

    #[test]
    fn test_known_values_are_converted() {
        let config = ReconcileConfig::default().compile().unwrap();
        let mapping = mapping();
        let site = InvoiceSite { sheet: "Invoice", mapping: &mapping };
        let mut lines = vec![line(9, "usd", " China ", "PO1-2"), line(10, "RMB", "Korea, Republic of", "PO3")];

        let findings = normalize_lines(&mut lines, &config.currency_lookup, &config.country_lookup, &site);
        assert!(findings.is_empty());
        assert_eq!(lines[0].currency, "502");
        assert_eq!(lines[0].country_of_origin, "142");
        assert_eq!(lines[0].po_number, "PO1");
        assert_eq!(lines[1].currency, "142");
        assert_eq!(lines[1].country_of_origin, "133");
        assert_eq!(lines[1].po_number, "PO3");
    }

    #[test]
    fn test_unknown_values_are_kept_and_reported() {
        let config = ReconcileConfig::default().compile().unwrap();
        let mapping = mapping();
        let site = InvoiceSite { sheet: "Invoice", mapping: &mapping };
        let mut lines = vec![line(9, "Doubloons", "Atlantis", "PO1"), line(10, "USD", "CN", "PO1")];

        let findings = normalize_lines(&mut lines, &config.currency_lookup, &config.country_lookup, &site);
        let codes: Vec<&str> = findings.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, vec![ATT_UNKNOWN_CURRENCY, ATT_UNKNOWN_COUNTRY]);
        assert_eq!(lines[0].currency, "Doubloons");
        assert_eq!(lines[0].country_of_origin, "Atlantis");
        assert_eq!(
            findings[0].scope,
            FindingScope::Cell("Invoice".to_string(), CellReference::new(9, 6))
        );
        assert!(findings[1].message.contains("'ATLANTIS'"));
        assert!(findings.iter().all(|f| f.severity == Severity::Warning));
    }

    #[test]
    fn test_empty_tables_skip_conversion() {
        let mapping = mapping();
        let site = InvoiceSite { sheet: "Invoice", mapping: &mapping };
        let empty = LookupTable::default();
        let mut lines = vec![line(9, "Doubloons", "Atlantis", "PO1.5")];
        let findings = normalize_lines(&mut lines, &empty, &empty, &site);
        assert!(findings.is_empty());
        assert_eq!(lines[0].currency, "Doubloons");
        assert_eq!(lines[0].po_number, "PO1");
    }
}
