//! Line-item extraction from flattened invoice and packing sheets

use crate::config::{
    AMOUNT, BRAND, BRAND_TYPE, COD, COO, CURRENCY, GW, INV_NO, MODEL, NW, PART_NO, PO_NO, PRICE,
    QTY, SERIAL,
};
use crate::error::{ErrorCode, ErrorContext, ProcessingError, ProcessingResult};
use crate::header::ColumnMapping;
use crate::merge::FlatSheet;
use crate::numeric::{
    STOP_KEYWORD_COL_COUNT, detect_cell_precision, is_ditto_mark, is_stop_keyword,
    parse_number_text, safe_decimal, try_float,
};
use crate::reader::CellValue;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::debug;

/// Packing net weights are kept at this many decimals
pub const NET_WEIGHT_DECIMALS: u32 = 5;
pub const PRICE_DECIMALS: u32 = 5;
pub const AMOUNT_DECIMALS: u32 = 2;

/// Invoice text fields that must be non-empty on every line, after the
/// destination-country fallback for the origin
const REQUIRED_INVOICE_TEXT: [&str; 6] = [PO_NO, CURRENCY, COO, BRAND, BRAND_TYPE, MODEL];

const HEADER_CONTINUATION: &str = "part no";
const PALLET_KEYWORDS: [&str; 2] = ["plt.", "pallet"];
/// Part-number text that marks the end of the invoice table
pub const FOOTER_KEYWORDS: [&str; 4] = ["报关行", "有限公司", "口岸关别", "进境口岸"];

/// One row of the packing table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackingLine {
    pub part_number: String,
    pub quantity: Decimal,
    pub net_weight: Decimal,
    /// False for rows whose weight is carried by an earlier row
    pub is_first_row_of_merge: bool,
    pub source_row: u32,
}

/// One row of the invoice table, with the weight assigned by allocation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvoiceLine {
    pub part_number: String,
    pub po_number: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub currency: String,
    pub country_of_origin: String,
    /// Destination country; optional column
    pub country_of_destination: String,
    pub brand: String,
    pub brand_type: String,
    pub model: String,
    /// Optional item serial
    pub serial: String,
    pub invoice_number: String,
    pub source_row: u32,
    pub allocated_weight: Option<Decimal>,
}

impl InvoiceLine {
    pub fn new(part_number: impl Into<String>, quantity: Decimal) -> Self {
        Self {
            part_number: part_number.into(),
            quantity,
            ..Default::default()
        }
    }

    /// Text value of a named invoice field
    pub fn text_field(&self, field: &str) -> Option<&str> {
        let value = match field {
            PART_NO => &self.part_number,
            PO_NO => &self.po_number,
            CURRENCY => &self.currency,
            COO => &self.country_of_origin,
            COD => &self.country_of_destination,
            BRAND => &self.brand,
            BRAND_TYPE => &self.brand_type,
            MODEL => &self.model,
            SERIAL => &self.serial,
            INV_NO => &self.invoice_number,
            _ => return None,
        };
        Some(value)
    }
}

fn line_invoice_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(INV#|NO\.)\s*").unwrap())
}

/// Whether any of columns A..J holds a total keyword
fn has_stop_keyword(flat: &FlatSheet, row: u32) -> bool {
    (1..=STOP_KEYWORD_COL_COUNT).any(|col| {
        flat.value(row, col)
            .display()
            .is_some_and(|text| is_stop_keyword(&text))
    })
}

fn zero_weight() -> Decimal {
    Decimal::new(0, NET_WEIGHT_DECIMALS)
}

fn empty_field(row: u32, col: u32, field: &str) -> ProcessingError {
    ProcessingError::new(
        ErrorCode::EmptyField,
        format!("Empty required field '{}' at row {}", field, row),
        ErrorContext::at(row, col).field(field),
    )
}

fn invalid_number(row: u32, col: u32, field: &str, raw: &CellValue) -> ProcessingError {
    let raw = raw.display().unwrap_or_default();
    ProcessingError::new(
        ErrorCode::InvalidNumber,
        format!("Invalid numeric value '{}' for {} at row {}", raw, field, row),
        ErrorContext::at(row, col).field(field).detail("raw_value", raw),
    )
}

/// Parse a numeric cell at the given precision, unit suffixes allowed
fn parse_decimal(value: &CellValue, decimals: u32) -> Option<Decimal> {
    try_float(value).and_then(|n| safe_decimal(n, decimals))
}

/// Part number of a packing row; empty non-anchor cells of a data-area
/// merge take the anchor's text
fn resolve_part_number(flat: &FlatSheet, row: u32, col: u32, header_row: u32) -> String {
    let raw = flat.value(row, col);
    if !raw.is_blank() {
        return raw.display_trimmed();
    }
    let tracker = flat.tracker();
    if tracker.is_in_merge(row, col) && !tracker.is_merge_anchor(row, col) {
        let propagated = flat.string_value(row, col, header_row).display_trimmed();
        debug!("Row {}: part number propagated from merge anchor: {:?}", row, propagated);
        return propagated;
    }
    String::new()
}

/// Extract packing lines and the row of the last one.
///
/// Extraction starts below the effective header row and stops at a total
/// keyword, a blank row after data, or an implicit totals row. When no line
/// is extracted the returned row is the first data row.
pub fn extract_packing_lines(
    flat: &FlatSheet,
    mapping: &ColumnMapping,
) -> ProcessingResult<(Vec<PackingLine>, u32)> {
    let part_col = mapping.require(PART_NO)?;
    let qty_col = mapping.require(QTY)?;
    let nw_col = mapping.require(NW)?;
    let gw_col = mapping.column(GW);
    let header_row = mapping.header_row;
    let start_row = mapping.data_start_row();

    let mut lines: Vec<PackingLine> = Vec::new();
    let mut last_data_row = start_row;
    let mut found_first_data = false;

    for row in start_row..=flat.max_row() {
        if has_stop_keyword(flat, row) {
            debug!("Row {}: total keyword, packing extraction stops", row);
            break;
        }

        let part_number = resolve_part_number(flat, row, part_col, header_row);
        let raw_nw = flat.weight_value(row, nw_col, header_row);
        let raw_qty = flat.value(row, qty_col);

        if found_first_data && part_number.is_empty() && raw_qty.is_blank() && raw_nw.is_blank() {
            debug!("Row {}: blank row after data, packing extraction stops", row);
            break;
        }

        if found_first_data
            && part_number.is_empty()
            && !flat.tracker().is_in_merge(row, part_col)
            && try_float(raw_nw).is_some_and(|v| v > 0.0)
            && gw_col
                .and_then(|col| try_float(flat.value(row, col)))
                .is_some_and(|v| v > 0.0)
        {
            debug!("Row {}: implicit total row, packing extraction stops", row);
            break;
        }

        if part_number.is_empty() {
            continue;
        }
        let lower = part_number.to_lowercase();
        if lower.contains(HEADER_CONTINUATION) {
            continue;
        }
        if PALLET_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            debug!("Row {}: pallet summary row skipped", row);
            continue;
        }

        found_first_data = true;
        let previous = lines.last().map(|l| l.part_number.as_str());

        let (net_weight, is_first) = parse_net_weight(flat, row, nw_col, raw_nw, &part_number, previous)?;
        let quantity = parse_packing_quantity(flat, row, qty_col, &part_number, previous)?;

        if quantity.is_zero() && net_weight.is_zero() {
            debug!("Row {}: zero quantity and weight, skipped", row);
            continue;
        }

        debug!(
            "Row {}: packing line {} qty={} nw={} first={}",
            row, part_number, quantity, net_weight, is_first
        );
        lines.push(PackingLine {
            part_number,
            quantity,
            net_weight,
            is_first_row_of_merge: is_first,
            source_row: row,
        });
        last_data_row = row;
    }

    debug!("Packing extraction: {} lines, last data row {}", lines.len(), last_data_row);
    Ok((lines, last_data_row))
}

fn parse_net_weight(
    flat: &FlatSheet,
    row: u32,
    col: u32,
    raw: &CellValue,
    part_number: &str,
    previous_part: Option<&str>,
) -> ProcessingResult<(Decimal, bool)> {
    if is_ditto_mark(&raw.display_trimmed()) {
        debug!("Row {}: ditto mark in NW", row);
        return Ok((zero_weight(), false));
    }

    let tracker = flat.tracker();
    if tracker.is_in_merge(row, col) && !tracker.is_merge_anchor(row, col) {
        return Ok((zero_weight(), false));
    }

    if raw.is_blank() {
        if previous_part == Some(part_number) {
            debug!("Row {}: NW continues part {}", row, part_number);
            return Ok((zero_weight(), false));
        }
        return Err(empty_field(row, col, NW));
    }

    let value = parse_decimal(raw, NET_WEIGHT_DECIMALS).ok_or_else(|| invalid_number(row, col, NW, raw))?;
    Ok((value, true))
}

fn parse_packing_quantity(
    flat: &FlatSheet,
    row: u32,
    col: u32,
    part_number: &str,
    previous_part: Option<&str>,
) -> ProcessingResult<Decimal> {
    let tracker = flat.tracker();
    if tracker.is_in_merge(row, col) && !tracker.is_merge_anchor(row, col) {
        return Ok(Decimal::ZERO);
    }

    let raw = flat.value(row, col);
    if raw.is_blank() {
        if previous_part == Some(part_number) {
            return Ok(Decimal::ZERO);
        }
        return Err(empty_field(row, col, QTY));
    }

    let precision = detect_cell_precision(raw, flat.number_format(row, col));
    parse_decimal(raw, precision).ok_or_else(|| invalid_number(row, col, QTY, raw))
}

/// Reject a data-area merged NW cell that spans rows of different parts
pub fn validate_merged_weights(flat: &FlatSheet, mapping: &ColumnMapping) -> ProcessingResult<()> {
    let nw_col = mapping.require(NW)?;
    let part_col = mapping.require(PART_NO)?;
    let header_row = mapping.header_row;

    for range in flat.tracker().ranges() {
        if !(range.min_col..=range.max_col).contains(&nw_col) || range.min_row <= header_row {
            continue;
        }

        let parts: BTreeSet<String> = (range.min_row..=range.max_row)
            .map(|row| flat.string_value(row, part_col, header_row).display_trimmed())
            .filter(|part| !part.is_empty())
            .collect();

        if parts.len() > 1 {
            let names: Vec<&str> = parts.iter().map(String::as_str).collect();
            return Err(ProcessingError::new(
                ErrorCode::SharedMergedWeight,
                format!(
                    "Different part numbers [{}] share a merged NW cell (rows {}-{})",
                    names.join(", "),
                    range.min_row,
                    range.max_row
                ),
                ErrorContext::at(range.min_row, nw_col)
                    .field(NW)
                    .parts(parts.iter().cloned())
                    .detail("merge_rows", format!("{}-{}", range.min_row, range.max_row)),
            ));
        }
    }
    Ok(())
}

/// Extract invoice lines.
///
/// `header_invoice_number` fills every line's invoice number when the sheet
/// has no invoice-number column.
pub fn extract_invoice_lines(
    flat: &FlatSheet,
    mapping: &ColumnMapping,
    header_invoice_number: Option<&str>,
) -> ProcessingResult<Vec<InvoiceLine>> {
    let part_col = mapping.require(PART_NO)?;
    let qty_col = mapping.require(QTY)?;
    let header_row = mapping.header_row;

    let mut lines = Vec::new();
    let mut found_first_data = false;

    for row in mapping.data_start_row()..=flat.max_row() {
        let part_number = flat.string_value(row, part_col, header_row).display_trimmed();
        let qty_text = flat.value(row, qty_col).display_trimmed();

        if part_number.is_empty() && qty_text.is_empty() {
            if !found_first_data {
                continue;
            }
            // Blank-looking rows can still carry TOTAL in another column
            if has_stop_keyword(flat, row) {
                debug!("Row {}: total keyword in blank row, invoice extraction stops", row);
                break;
            }
            continue;
        }

        if part_number.to_lowercase().contains(HEADER_CONTINUATION) {
            continue;
        }

        if should_stop_invoice(flat, row, &part_number, &qty_text, found_first_data) {
            debug!("Row {}: invoice extraction stops", row);
            break;
        }

        found_first_data = true;

        if part_number.is_empty() {
            return Err(empty_field(row, part_col, PART_NO));
        }

        let line = extract_invoice_row(flat, mapping, row, part_number, header_invoice_number)?;
        debug!(
            "Row {}: invoice line {} qty={} price={} amount={}",
            row, line.part_number, line.quantity, line.unit_price, line.amount
        );
        lines.push(line);
    }

    debug!("Invoice extraction: {} lines", lines.len());
    Ok(lines)
}

fn extract_invoice_row(
    flat: &FlatSheet,
    mapping: &ColumnMapping,
    row: u32,
    part_number: String,
    header_invoice_number: Option<&str>,
) -> ProcessingResult<InvoiceLine> {
    let text = |field: &str| {
        mapping
            .column(field)
            .map(|col| flat.string_value(row, col, mapping.header_row).display_trimmed())
            .unwrap_or_default()
    };

    let quantity = invoice_number_field(flat, mapping, row, QTY, None)?;
    let unit_price = invoice_number_field(flat, mapping, row, PRICE, Some(PRICE_DECIMALS))?;
    let amount = invoice_number_field(flat, mapping, row, AMOUNT, Some(AMOUNT_DECIMALS))?;

    let country_of_destination = text(COD);
    let mut country_of_origin = text(COO);
    if country_of_origin.is_empty() && !country_of_destination.is_empty() {
        debug!("Row {}: origin taken from destination column", row);
        country_of_origin = country_of_destination.clone();
    }

    let invoice_number = match mapping.column(INV_NO) {
        Some(_) => clean_line_invoice_number(&text(INV_NO)),
        None => header_invoice_number.unwrap_or_default().to_string(),
    };

    let line = InvoiceLine {
        part_number,
        po_number: text(PO_NO),
        quantity,
        unit_price,
        amount,
        currency: text(CURRENCY),
        country_of_origin,
        country_of_destination,
        brand: text(BRAND),
        brand_type: text(BRAND_TYPE),
        model: text(MODEL),
        serial: text(SERIAL),
        invoice_number,
        source_row: row,
        allocated_weight: None,
    };

    if let Some(field) = REQUIRED_INVOICE_TEXT
        .into_iter()
        .find(|field| line.text_field(field).is_some_and(str::is_empty))
    {
        let mut context = ErrorContext::default().field(field);
        context.row = Some(row);
        context.column = mapping.column(field);
        return Err(ProcessingError::new(
            ErrorCode::EmptyField,
            format!("Empty required field '{}' at row {}", field, row),
            context,
        ));
    }
    Ok(line)
}

/// Parse a numeric invoice cell; `decimals` of `None` takes the cell's
/// display precision
fn invoice_number_field(
    flat: &FlatSheet,
    mapping: &ColumnMapping,
    row: u32,
    field: &str,
    decimals: Option<u32>,
) -> ProcessingResult<Decimal> {
    let col = mapping.column(field).ok_or_else(|| {
        let mut context = ErrorContext::default().field(field);
        context.row = Some(row);
        ProcessingError::new(
            ErrorCode::InvalidNumber,
            format!("Numeric field '{}' column not mapped at row {}", field, row),
            context,
        )
    })?;

    let raw = flat.value(row, col);
    if raw.is_empty() {
        return Err(ProcessingError::new(
            ErrorCode::InvalidNumber,
            format!("Numeric field '{}' is empty at row {}, column {}", field, row, col),
            ErrorContext::at(row, col).field(field),
        ));
    }
    let decimals = decimals.unwrap_or_else(|| detect_cell_precision(raw, flat.number_format(row, col)));
    parse_decimal(raw, decimals).ok_or_else(|| invalid_number(row, col, field, raw))
}

fn should_stop_invoice(
    flat: &FlatSheet,
    row: u32,
    part_number: &str,
    qty_text: &str,
    found_first_data: bool,
) -> bool {
    if found_first_data && part_number.is_empty() {
        let zero_qty = parse_number_text(qty_text).is_some_and(|q| q == 0.0);
        if zero_qty {
            return true;
        }
    }
    let lower = part_number.to_lowercase();
    if lower.contains("total") || FOOTER_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return true;
    }
    has_stop_keyword(flat, row)
}

/// Strip "INV#" / "NO." prefixes, stacked ones included
fn clean_line_invoice_number(value: &str) -> String {
    let once = line_invoice_prefix_re().replace(value, "");
    line_invoice_prefix_re()
        .replace(once.trim(), "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableKind;
    use crate::reader::Sheet;
    use indexmap::IndexMap;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn packing_mapping() -> ColumnMapping {
        let field_map: IndexMap<String, u32> = [(PART_NO, 1), (QTY, 2), (NW, 3), (GW, 4)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        ColumnMapping {
            table: TableKind::Packing,
            field_map,
            header_row: 5,
            effective_header_row: 5,
        }
    }

    /// Part, qty, PO, price, amount, currency, COO, brand, brand type,
    /// model in A..J; invoice number in K and destination in L
    fn invoice_mapping(with_inv_col: bool) -> ColumnMapping {
        let mut field_map: IndexMap<String, u32> = [
            (PART_NO, 1),
            (QTY, 2),
            (PO_NO, 3),
            (PRICE, 4),
            (AMOUNT, 5),
            (CURRENCY, 6),
            (COO, 7),
            (BRAND, 8),
            (BRAND_TYPE, 9),
            (MODEL, 10),
            (COD, 12),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        if with_inv_col {
            field_map.insert(INV_NO.to_string(), 11);
        }
        ColumnMapping {
            table: TableKind::Invoice,
            field_map,
            header_row: 5,
            effective_header_row: 5,
        }
    }

    fn row(sheet: &mut Sheet, r: u32, values: &[CellValue]) {
        for (i, v) in values.iter().enumerate() {
            if !v.is_empty() {
                sheet.set_value(r, i as u32 + 1, v.clone());
            }
        }
    }

    fn e() -> CellValue {
        CellValue::Empty
    }

    /// A complete invoice row
    fn item(sheet: &mut Sheet, r: u32, part: CellValue, qty: CellValue) {
        row(
            sheet,
            r,
            &[
                part,
                qty,
                "PO-7".into(),
                2.5.into(),
                7.5.into(),
                "USD".into(),
                "China".into(),
                "Acme".into(),
                "OEM".into(),
                "M-1".into(),
            ],
        );
    }

    #[test]
    fn test_packing_lines_basic() {
        let mut sheet = Sheet::new("Packing");
        row(&mut sheet, 5, &["Part No.".into(), "Qty".into(), "N.W.".into(), "G.W.".into()]);
        row(&mut sheet, 7, &["A-1".into(), 10.0.into(), 1.25.into(), 1.5.into()]);
        row(&mut sheet, 8, &["B-2".into(), "5 PCS".into(), "2.5 KG".into(), 3.0.into()]);
        row(&mut sheet, 9, &["TOTAL".into(), 15.0.into(), 3.75.into(), 4.5.into()]);
        let flat = FlatSheet::flatten(sheet);

        let (lines, last) = extract_packing_lines(&flat, &packing_mapping()).unwrap();
        assert_eq!(last, 8);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].part_number, "A-1");
        assert_eq!(lines[0].net_weight, dec("1.25"));
        assert_eq!(lines[1].quantity, dec("5"));
        assert_eq!(lines[1].net_weight, dec("2.5"));
        assert_eq!(lines[1].source_row, 8);
    }

    #[test]
    fn test_packing_merged_rows() {
        let mut sheet = Sheet::new("Packing");
        row(&mut sheet, 6, &["A-1".into(), 10.0.into(), 6.0.into(), 7.0.into()]);
        row(&mut sheet, 7, &[e(), 5.0.into(), e(), e()]);
        sheet.merge(6, 1, 7, 1);
        sheet.merge(6, 3, 7, 3);
        row(&mut sheet, 8, &["B-2".into(), 1.0.into(), "\"".into(), e()]);
        let flat = FlatSheet::flatten(sheet);

        let (lines, last) = extract_packing_lines(&flat, &packing_mapping()).unwrap();
        assert_eq!(last, 8);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].part_number, "A-1");
        assert_eq!(lines[1].quantity, dec("5"));
        assert!(lines[1].net_weight.is_zero());
        assert!(!lines[1].is_first_row_of_merge);
        // Ditto mark contributes nothing
        assert!(lines[2].net_weight.is_zero());
    }

    #[test]
    fn test_packing_continuation_and_skips() {
        let mut sheet = Sheet::new("Packing");
        row(&mut sheet, 6, &["part no".into(), e(), e(), e()]);
        row(&mut sheet, 7, &["A-1".into(), 10.0.into(), 2.0.into(), e()]);
        row(&mut sheet, 8, &["A-1".into(), 4.0.into(), e(), e()]);
        row(&mut sheet, 9, &["PLT. 1-2".into(), e(), 9.0.into(), e()]);
        row(&mut sheet, 10, &["PO-REF".into(), 0.0.into(), 0.0.into(), e()]);
        row(&mut sheet, 12, &["C-3".into(), 1.0.into(), 1.0.into(), e()]);
        let flat = FlatSheet::flatten(sheet);

        let (lines, last) = extract_packing_lines(&flat, &packing_mapping()).unwrap();
        // Row 11 is blank, so extraction stops before C-3
        assert_eq!(last, 8);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].net_weight.is_zero());
        assert_eq!(lines[1].quantity, dec("4"));
    }

    #[test]
    fn test_packing_implicit_total_stops() {
        let mut sheet = Sheet::new("Packing");
        row(&mut sheet, 6, &["A-1".into(), 10.0.into(), 2.0.into(), 2.5.into()]);
        row(&mut sheet, 7, &[e(), 10.0.into(), 2.0.into(), 2.5.into()]);
        let flat = FlatSheet::flatten(sheet);
        let (lines, last) = extract_packing_lines(&flat, &packing_mapping()).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(last, 6);
    }

    #[test]
    fn test_packing_empty_and_invalid_values() {
        let mut sheet = Sheet::new("Packing");
        row(&mut sheet, 6, &["A-1".into(), 10.0.into(), e(), e()]);
        let flat = FlatSheet::flatten(sheet);
        let err = extract_packing_lines(&flat, &packing_mapping()).unwrap_err();
        assert_eq!(err.code, ErrorCode::EmptyField);
        assert_eq!(err.context.field.as_deref(), Some(NW));

        let mut sheet = Sheet::new("Packing");
        row(&mut sheet, 6, &["A-1".into(), "ten".into(), 1.0.into(), e()]);
        let flat = FlatSheet::flatten(sheet);
        let err = extract_packing_lines(&flat, &packing_mapping()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNumber);
        assert_eq!(err.context.details["raw_value"], "ten");
    }

    #[test]
    fn test_shared_merged_weight_rejected() {
        let mut sheet = Sheet::new("Packing");
        row(&mut sheet, 6, &["A-1".into(), 1.0.into(), 5.0.into(), e()]);
        row(&mut sheet, 7, &["B-2".into(), 1.0.into(), e(), e()]);
        sheet.merge(6, 3, 7, 3);
        let flat = FlatSheet::flatten(sheet);
        let err = validate_merged_weights(&flat, &packing_mapping()).unwrap_err();
        assert_eq!(err.code, ErrorCode::SharedMergedWeight);
        assert_eq!(err.context.part_numbers, vec!["A-1", "B-2"]);
    }

    #[test]
    fn test_same_part_merged_weight_accepted() {
        let mut sheet = Sheet::new("Packing");
        row(&mut sheet, 6, &["A-1".into(), 1.0.into(), 5.0.into(), e()]);
        row(&mut sheet, 7, &[e(), 1.0.into(), e(), e()]);
        sheet.merge(6, 1, 7, 1);
        sheet.merge(6, 3, 7, 3);
        let flat = FlatSheet::flatten(sheet);
        assert!(validate_merged_weights(&flat, &packing_mapping()).is_ok());
    }

    #[test]
    fn test_invoice_lines_with_header_number() {
        let mut sheet = Sheet::new("Invoice");
        item(&mut sheet, 7, "A-1".into(), 3.0.into());
        item(&mut sheet, 8, "A-1".into(), 7.0.into());
        item(&mut sheet, 9, "B-2".into(), 2.0.into());
        row(&mut sheet, 10, &[e(), e(), e(), "Total".into()]);
        item(&mut sheet, 11, "C-3".into(), 2.0.into());
        let flat = FlatSheet::flatten(sheet);

        let lines = extract_invoice_lines(&flat, &invoice_mapping(false), Some("INV-9")).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.invoice_number == "INV-9"));
        assert_eq!(lines[1].quantity, dec("7"));
        assert_eq!(lines[2].source_row, 9);
        assert!(lines.iter().all(|l| l.allocated_weight.is_none()));
    }

    #[test]
    fn test_invoice_line_carries_every_field() {
        let mut sheet = Sheet::new("Invoice");
        row(
            &mut sheet,
            6,
            &[
                "A-1".into(),
                "12 PCS".into(),
                "PO-100/2".into(),
                1.2345678.into(),
                14.815.into(),
                " USD ".into(),
                e(),
                "Acme".into(),
                "OEM".into(),
                "M-9".into(),
                e(),
                "Japan".into(),
            ],
        );
        let flat = FlatSheet::flatten(sheet);

        let lines = extract_invoice_lines(&flat, &invoice_mapping(false), Some("INV-1")).unwrap();
        let line = &lines[0];
        assert_eq!(line.po_number, "PO-100/2");
        assert_eq!(line.quantity, dec("12"));
        assert_eq!(line.unit_price, dec("1.23457"));
        assert_eq!(line.amount, dec("14.82"));
        assert_eq!(line.currency, "USD");
        // Empty origin falls back to the destination column
        assert_eq!(line.country_of_origin, "Japan");
        assert_eq!(line.country_of_destination, "Japan");
        assert_eq!(line.brand, "Acme");
        assert_eq!(line.brand_type, "OEM");
        assert_eq!(line.model, "M-9");
        assert_eq!(line.serial, "");
    }

    #[test]
    fn test_invoice_empty_required_text_field() {
        let mut sheet = Sheet::new("Invoice");
        item(&mut sheet, 6, "A-1".into(), 3.0.into());
        sheet.set_value(6, 8, "  ");
        let flat = FlatSheet::flatten(sheet);
        let err = extract_invoice_lines(&flat, &invoice_mapping(false), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::EmptyField);
        assert_eq!(err.context.field.as_deref(), Some(BRAND));
        assert_eq!(err.context.row, Some(6));
        assert_eq!(err.context.column, Some(8));
    }

    #[test]
    fn test_invoice_invalid_or_missing_price() {
        let mut sheet = Sheet::new("Invoice");
        item(&mut sheet, 6, "A-1".into(), 3.0.into());
        sheet.set_value(6, 4, "n/a");
        let flat = FlatSheet::flatten(sheet);
        let err = extract_invoice_lines(&flat, &invoice_mapping(false), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNumber);
        assert_eq!(err.context.field.as_deref(), Some(PRICE));

        let mut sheet = Sheet::new("Invoice");
        item(&mut sheet, 6, "A-1".into(), 3.0.into());
        let flat = FlatSheet::flatten(sheet);
        let mut mapping = invoice_mapping(false);
        mapping.field_map.shift_remove(AMOUNT);
        let err = extract_invoice_lines(&flat, &mapping, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNumber);
        assert!(err.message.contains("not mapped"));
    }

    #[test]
    fn test_invoice_lines_column_number_and_footer() {
        let mut sheet = Sheet::new("Invoice");
        row(&mut sheet, 6, &["Part No".into(), "Qty".into()]);
        item(&mut sheet, 7, "A-1".into(), 3.0.into());
        sheet.set_value(7, 11, "INV# NO. 2025-1");
        row(&mut sheet, 8, &["某某报关行".into()]);
        item(&mut sheet, 9, "B-2".into(), 2.0.into());
        let flat = FlatSheet::flatten(sheet);

        let lines = extract_invoice_lines(&flat, &invoice_mapping(true), None).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].invoice_number, "2025-1");
    }

    #[test]
    fn test_invoice_zero_quantity_row_stops() {
        let mut sheet = Sheet::new("Invoice");
        item(&mut sheet, 6, "A-1".into(), 3.0.into());
        row(&mut sheet, 7, &[e(), 0.0.into()]);
        item(&mut sheet, 8, "B-2".into(), 2.0.into());
        let flat = FlatSheet::flatten(sheet);
        let lines = extract_invoice_lines(&flat, &invoice_mapping(false), None).unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_invoice_merged_part_number_propagates() {
        let mut sheet = Sheet::new("Invoice");
        item(&mut sheet, 6, "A-1".into(), 3.0.into());
        item(&mut sheet, 7, e(), 4.0.into());
        sheet.merge(6, 1, 7, 1);
        let flat = FlatSheet::flatten(sheet);
        let lines = extract_invoice_lines(&flat, &invoice_mapping(false), None).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].part_number, "A-1");
    }

    #[test]
    fn test_invoice_missing_part_number() {
        let mut sheet = Sheet::new("Invoice");
        item(&mut sheet, 6, "A-1".into(), 3.0.into());
        item(&mut sheet, 7, e(), 4.0.into());
        let flat = FlatSheet::flatten(sheet);
        let err = extract_invoice_lines(&flat, &invoice_mapping(false), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::EmptyField);
        assert_eq!(err.context.row, Some(7));
    }
}
