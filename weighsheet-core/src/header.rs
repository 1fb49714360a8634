//! Header row detection, column mapping and invoice-number lookup

use crate::config::{AMOUNT, CURRENCY, FieldPatterns, InvoiceNumberMatchers, PRICE, TableKind};
use crate::error::{ErrorCode, ErrorContext, ProcessingError, ProcessingResult};
use crate::merge::FlatSheet;
use crate::numeric::normalize_header;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, info};

/// First row of the header scan window
pub const SCAN_ROW_START: u32 = 7;
/// Last row of the header scan window
pub const SCAN_ROW_END: u32 = 30;
/// Columns considered when counting header cells
pub const SCAN_COL_END: u32 = 13;
/// Upper bound on columns scanned for field names
pub const MAP_COL_LIMIT: u32 = 50;

const INVOICE_THRESHOLD: usize = 7;
const PACKING_THRESHOLD: usize = 4;

const METADATA_MARKERS: [&str; 5] = ["tel:", "fax:", "cust id:", "contact:", "address:"];

const PLACEHOLDER_PREFIX: &str = "Unnamed:";

/// Words that mark a true header row, English and Chinese
pub const HEADER_KEYWORDS: [&str; 24] = [
    "qty",
    "n.w.",
    "g.w.",
    "part no",
    "amount",
    "price",
    "quantity",
    "weight",
    "品牌",
    "料号",
    "数量",
    "单价",
    "金额",
    "净重",
    "毛重",
    "原产",
    "country",
    "origin",
    "brand",
    "model",
    "description",
    "unit",
    "currency",
    "coo",
];

const INVOICE_NUMBER_ROWS: u32 = 15;
const INVOICE_NUMBER_COLS: u32 = 20;
/// Data rows after the header searched for an embedded currency code
const CURRENCY_FALLBACK_ROWS: u32 = 4;

fn plain_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.?\d*$").unwrap())
}

fn currency_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(USD|CNY|EUR|RMB|JPY|GBP|TWD|HKD|SGD|KRW)$").unwrap())
}

fn invoice_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:INV[#.]\s*|NO\.?\s*)").unwrap())
}

/// Pure numbers, or 4+ character alphanumeric codes mixing letters and digits
pub fn is_numeric_or_code(text: &str) -> bool {
    if plain_number_re().is_match(text) {
        return true;
    }
    text.chars().count() >= 4
        && text.chars().all(|c| c.is_ascii_alphanumeric())
        && text.chars().any(|c| c.is_ascii_alphabetic())
        && text.chars().any(|c| c.is_ascii_digit())
}

/// Canonical field name to 1-based column index for one sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub table: TableKind,
    pub field_map: IndexMap<String, u32>,
    pub header_row: u32,
    /// Header row, or the sub-header row below it when one was used
    pub effective_header_row: u32,
}

impl ColumnMapping {
    pub fn column(&self, field: &str) -> Option<u32> {
        self.field_map.get(field).copied()
    }

    /// Column of a field the caller cannot do without
    pub fn require(&self, field: &str) -> ProcessingResult<u32> {
        self.column(field).ok_or_else(|| {
            ProcessingError::new(
                ErrorCode::ColumnsMissing,
                format!("Required columns missing for {}: {}", self.table, field),
                ErrorContext::default()
                    .field(field)
                    .detail("sheet_type", self.table),
            )
        })
    }

    /// First row of table data
    pub fn data_start_row(&self) -> u32 {
        self.effective_header_row + 1
    }
}

/// Non-empty header-window texts of one row
struct RowProfile {
    lower: Vec<String>,
    numeric_count: usize,
}

impl RowProfile {
    fn new(texts: &[String]) -> Self {
        Self {
            lower: texts.iter().map(|t| t.to_lowercase()).collect(),
            numeric_count: texts.iter().filter(|t| is_numeric_or_code(t)).count(),
        }
    }

    fn has_metadata_marker(&self) -> bool {
        self.lower
            .iter()
            .any(|v| METADATA_MARKERS.iter().any(|m| v.contains(m)))
    }

    fn has_header_keyword(&self) -> bool {
        self.lower
            .iter()
            .any(|v| HEADER_KEYWORDS.iter().any(|k| v.contains(k)))
    }
}

type TierRule = (u8, fn(&RowProfile) -> bool);

fn is_contact_block(profile: &RowProfile) -> bool {
    profile.has_metadata_marker()
}

fn is_data_row(profile: &RowProfile) -> bool {
    profile.numeric_count >= 3
}

fn is_keyword_header(profile: &RowProfile) -> bool {
    profile.has_header_keyword() && profile.numeric_count < 2
}

/// Evaluated in order; the first rule that holds assigns the tier
const TIER_RULES: [TierRule; 3] = [
    (2, is_contact_block),
    (2, is_data_row),
    (0, is_keyword_header),
];
const DEFAULT_TIER: u8 = 1;

fn classify_tier(profile: &RowProfile) -> u8 {
    TIER_RULES
        .iter()
        .find(|(_, rule)| rule(profile))
        .map_or(DEFAULT_TIER, |(tier, _)| *tier)
}

fn threshold(kind: TableKind) -> usize {
    match kind {
        TableKind::Invoice => INVOICE_THRESHOLD,
        TableKind::Packing => PACKING_THRESHOLD,
    }
}

fn header_window_texts(flat: &FlatSheet, row: u32) -> Vec<String> {
    (1..=SCAN_COL_END)
        .map(|col| flat.value(row, col).display_trimmed())
        .filter(|text| !text.is_empty() && !text.starts_with(PLACEHOLDER_PREFIX))
        .collect()
}

/// Find the header row within rows 7..=30.
///
/// Rows with fewer non-empty cells than the table's threshold are ignored.
/// The lowest tier wins and ties go to the earliest row.
pub fn detect_header_row(flat: &FlatSheet, kind: TableKind) -> ProcessingResult<u32> {
    let min_cells = threshold(kind);
    let mut best: Option<(u8, u32)> = None;

    for row in SCAN_ROW_START..=SCAN_ROW_END {
        let texts = header_window_texts(flat, row);
        if texts.len() < min_cells {
            continue;
        }
        let tier = classify_tier(&RowProfile::new(&texts));
        debug!("Row {} has {} cells, tier {}", row, texts.len(), tier);

        if best.is_none_or(|(best_tier, _)| tier < best_tier) {
            best = Some((tier, row));
        }
    }

    match best {
        Some((tier, row)) => {
            info!(sheet = %flat.name(), "Header row {} (tier {}) for {} sheet", row, tier, kind);
            Ok(row)
        }
        None => Err(ProcessingError::new(
            ErrorCode::HeaderNotFound,
            format!(
                "No header row found for {} sheet (rows {}-{})",
                kind, SCAN_ROW_START, SCAN_ROW_END
            ),
            ErrorContext::default()
                .searched(SCAN_ROW_START, SCAN_ROW_END)
                .detail("sheet_type", kind),
        )),
    }
}

fn scan_col_limit(flat: &FlatSheet) -> u32 {
    match flat.max_column() {
        0 => SCAN_COL_END,
        max => max.min(MAP_COL_LIMIT),
    }
}

/// Match one row's header texts against the given fields.
///
/// Columns are visited left to right; a field keeps its first matching column.
fn scan_row_for_fields<'a, I>(flat: &FlatSheet, row: u32, fields: I) -> IndexMap<String, u32>
where
    I: Iterator<Item = (&'a str, &'a crate::config::CompiledField)> + Clone,
{
    let mut found = IndexMap::new();
    for col in 1..=scan_col_limit(flat) {
        let Some(raw) = flat.value(row, col).display() else {
            continue;
        };
        let text = normalize_header(&raw);
        if text.is_empty() {
            continue;
        }
        for (name, field) in fields.clone() {
            if found.contains_key(name) {
                continue;
            }
            if field.matches(&text) {
                debug!("Matched field {} at row {}, col {}: {:?}", name, row, col, text);
                found.insert(name.to_string(), col);
            }
        }
    }
    found
}

fn is_data_like_row(flat: &FlatSheet, row: u32) -> bool {
    (1..=scan_col_limit(flat))
        .map(|col| flat.value(row, col).display_trimmed())
        .filter(|text| !text.is_empty() && is_numeric_or_code(text))
        .nth(2)
        .is_some()
}

/// Map canonical fields to columns of the header row.
///
/// Unmapped required fields are looked for one row below when that row is
/// not data. On invoice sheets a currency code found in the first data rows
/// moves a price/amount mapping one column right. All still-missing required
/// fields are reported together.
pub fn map_columns(
    flat: &FlatSheet,
    header_row: u32,
    kind: TableKind,
    fields: &FieldPatterns,
) -> ProcessingResult<ColumnMapping> {
    let mut field_map = scan_row_for_fields(flat, header_row, fields.iter());
    let mut effective_header_row = header_row;

    let unmapped: Vec<&str> = fields
        .required_fields()
        .filter(|name| !field_map.contains_key(*name))
        .collect();

    if !unmapped.is_empty() {
        let sub_row = header_row + 1;
        if is_data_like_row(flat, sub_row) {
            debug!("Sub-header row {} rejected as data", sub_row);
        } else {
            let sub_fields = fields.iter().filter(|(name, _)| unmapped.contains(name));
            let sub_map = scan_row_for_fields(flat, sub_row, sub_fields);
            if !sub_map.is_empty() {
                debug!("Sub-header row {} matched {:?}", sub_row, sub_map.keys());
                field_map.extend(sub_map);
                effective_header_row = sub_row;
            }
        }
    }

    if kind == TableKind::Invoice && !field_map.contains_key(CURRENCY) {
        currency_data_row_fallback(flat, header_row, &mut field_map);
    }

    let mut missing: Vec<&str> = fields
        .required_fields()
        .filter(|name| !field_map.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(ProcessingError::new(
            ErrorCode::ColumnsMissing,
            format!("Required columns missing for {}: {}", kind, missing.join(", ")),
            ErrorContext::default()
                .detail("sheet_type", kind)
                .detail("missing_fields", missing.join(",")),
        ));
    }

    Ok(ColumnMapping {
        table: kind,
        field_map,
        header_row,
        effective_header_row,
    })
}

/// Currency codes sitting in a price/amount column push that field right
fn currency_data_row_fallback(flat: &FlatSheet, header_row: u32, field_map: &mut IndexMap<String, u32>) {
    let mut currency_col = None;

    for row in header_row + 1..=header_row + CURRENCY_FALLBACK_ROWS {
        for col in 1..=scan_col_limit(flat) {
            let text = flat.value(row, col).display_trimmed();
            if !currency_code_re().is_match(&text) {
                continue;
            }
            let mut shifted = false;
            for field in [PRICE, AMOUNT] {
                if let Some(mapped) = field_map.get_mut(field) {
                    if *mapped == col {
                        *mapped = col + 1;
                        shifted = true;
                        debug!("Currency {} at ({}, {}): {} moved to col {}", text, row, col, field, col + 1);
                    }
                }
            }
            if shifted && currency_col.is_none() {
                currency_col = Some(col);
            }
        }
    }

    if let Some(col) = currency_col {
        debug!("Currency column set to {} from data rows", col);
        field_map.insert(CURRENCY.to_string(), col);
    }
}

/// Look for the invoice number in rows 1..=15 of the invoice sheet.
///
/// Returns `None` when nothing survives cleanup and exclusion; the caller
/// decides whether that is an error.
pub fn extract_invoice_number(flat: &FlatSheet, matchers: &InvoiceNumberMatchers) -> Option<String> {
    let max_col = match flat.max_column() {
        0 => INVOICE_NUMBER_COLS,
        max => max.min(INVOICE_NUMBER_COLS),
    };

    for row in 1..=INVOICE_NUMBER_ROWS {
        for col in 1..=max_col {
            let text = flat.value(row, col).display_trimmed();
            if text.is_empty() {
                continue;
            }

            for pattern in &matchers.capture {
                let Some(caps) = pattern.captures(&text) else {
                    continue;
                };
                let Some(value) = caps.get(1).or_else(|| caps.get(0)) else {
                    continue;
                };
                if let Some(found) = accept_candidate(value.as_str(), matchers) {
                    debug!("Invoice number at ({}, {}) from {:?}", row, col, text);
                    return Some(found);
                }
            }

            if matchers.label.iter().any(|re| re.is_match(&text)) {
                debug!("Invoice number label at ({}, {}): {:?}", row, col, text);
                let right = (1..=3)
                    .map(|offset| col + offset)
                    .take_while(|c| *c <= max_col)
                    .map(|c| (row, c));
                let below = (1..=2).map(|offset| (row + offset, col));
                for (r, c) in right.chain(below) {
                    let candidate = flat.value(r, c).display_trimmed();
                    if candidate.is_empty() {
                        continue;
                    }
                    if let Some(found) = accept_candidate(&candidate, matchers) {
                        debug!("Invoice number at ({}, {}) next to label", r, c);
                        return Some(found);
                    }
                }
            }
        }
    }

    debug!("No invoice number in rows 1-{}", INVOICE_NUMBER_ROWS);
    None
}

fn accept_candidate(raw: &str, matchers: &InvoiceNumberMatchers) -> Option<String> {
    let cleaned = clean_invoice_number(raw);
    if cleaned.is_empty() {
        return None;
    }
    if let Some(re) = matchers.exclude.iter().find(|re| re.is_match(&cleaned)) {
        debug!("Invoice number {:?} excluded by {}", cleaned, re.as_str());
        return None;
    }
    Some(cleaned)
}

/// Strip "INV#", "INV.", "NO." and a bare "INV" directly before a digit
pub fn clean_invoice_number(value: &str) -> String {
    if let Some(m) = invoice_prefix_re().find(value) {
        return value[m.end()..].trim().to_string();
    }
    let bare_inv = value
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("inv"))
        && value[3..].starts_with(|c: char| c.is_ascii_digit());
    if bare_inv {
        return value[3..].trim().to_string();
    }
    value.trim().to_string()
}
