//! Totals row detection and total weight / packet extraction

use crate::config::{GW, NW, PART_NO};
use crate::error::{ErrorCode, ErrorContext, ProcessingError, ProcessingResult};
use crate::header::ColumnMapping;
use crate::merge::FlatSheet;
use crate::numeric::{
    STOP_KEYWORD_COL_COUNT, clamp_weight_precision, detect_cell_precision, is_stop_keyword,
    parse_number_text, safe_decimal, strip_unit_suffix, try_float,
};
use crate::reader::CellValue;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::ops::RangeInclusive;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Rows below the last data row searched for the totals row
pub const TOTAL_SEARCH_OFFSET: u32 = 15;

const PACKETS_MIN: u64 = 1;
const PACKETS_MAX: u64 = 1000;
/// Packet search never stops before column K
const PACKET_MIN_COL: u32 = 11;

/// Totals read from the packing sheet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackingTotals {
    pub total_net_weight: Decimal,
    pub total_net_weight_precision: u32,
    pub total_gross_weight: Decimal,
    pub total_gross_weight_precision: u32,
    /// `None` when no packet count could be found
    pub total_packets: Option<u32>,
}

type RowFinder = fn(&FlatSheet, &ColumnMapping, RangeInclusive<u32>) -> ProcessingResult<Option<u32>>;

/// Tried in order; later strategies only run when earlier ones find nothing
const TOTAL_ROW_STRATEGIES: [(&str, RowFinder); 2] =
    [("keyword", find_keyword_row), ("implicit", find_implicit_row)];

/// Locate the totals row in the 15 rows after `last_data_row`
pub fn detect_total_row(
    flat: &FlatSheet,
    last_data_row: u32,
    mapping: &ColumnMapping,
) -> ProcessingResult<u32> {
    let start = last_data_row + 1;
    let end = last_data_row + TOTAL_SEARCH_OFFSET;

    for (name, strategy) in TOTAL_ROW_STRATEGIES {
        if let Some(row) = strategy(flat, mapping, start..=end)? {
            info!(sheet = %flat.name(), "Total row {} detected by {} strategy", row, name);
            return Ok(row);
        }
    }

    Err(ProcessingError::new(
        ErrorCode::TotalRowNotFound,
        format!(
            "Total row not found: searched rows {}-{} using keyword and implicit strategies",
            start, end
        ),
        ErrorContext::default()
            .searched(start, end)
            .detail("last_data_row", last_data_row),
    ))
}

/// First row with a total keyword in columns A..J
fn find_keyword_row(
    flat: &FlatSheet,
    _mapping: &ColumnMapping,
    rows: RangeInclusive<u32>,
) -> ProcessingResult<Option<u32>> {
    Ok(rows.into_iter().find(|&row| {
        (1..=STOP_KEYWORD_COL_COUNT).any(|col| {
            flat.value(row, col)
                .display()
                .is_some_and(|text| is_stop_keyword(&text))
        })
    }))
}

/// First row with an empty, unmerged part number and positive NW and GW
fn find_implicit_row(
    flat: &FlatSheet,
    mapping: &ColumnMapping,
    rows: RangeInclusive<u32>,
) -> ProcessingResult<Option<u32>> {
    let part_col = mapping.require(PART_NO)?;
    let nw_col = mapping.require(NW)?;
    let gw_col = mapping.require(GW)?;
    let positive = |row, col| try_float(flat.value(row, col)).is_some_and(|v| v > 0.0);

    Ok(rows.into_iter().find(|&row| {
        flat.value(row, part_col).is_blank()
            && !flat.tracker().is_in_merge(row, part_col)
            && positive(row, nw_col)
            && positive(row, gw_col)
    }))
}

/// Read total net weight, gross weight and packet count from the totals row
pub fn extract_totals(
    flat: &FlatSheet,
    total_row: u32,
    mapping: &ColumnMapping,
) -> ProcessingResult<PackingTotals> {
    let nw_col = mapping.require(NW)?;
    let gw_col = mapping.require(GW)?;

    let (total_net_weight, total_net_weight_precision) =
        extract_weight(flat, total_row, nw_col, "total_nw", ErrorCode::InvalidTotalNetWeight)?;
    let (total_gross_weight, total_gross_weight_precision) =
        extract_gross_weight(flat, total_row, gw_col)?;
    let total_packets = extract_total_packets(flat, total_row, nw_col);

    info!(
        sheet = %flat.name(),
        "Packing total row at row {}, NW={}, GW={}, packets={:?}",
        total_row, total_net_weight, total_gross_weight, total_packets
    );

    Ok(PackingTotals {
        total_net_weight,
        total_net_weight_precision,
        total_gross_weight,
        total_gross_weight_precision,
        total_packets,
    })
}

/// Weight value and its displayed precision clamped to 2..=5
fn extract_weight(
    flat: &FlatSheet,
    row: u32,
    col: u32,
    field: &str,
    code: ErrorCode,
) -> ProcessingResult<(Decimal, u32)> {
    let value = flat.value(row, col);
    let number = match value {
        CellValue::Empty => {
            return Err(ProcessingError::new(
                code,
                format!("{} is missing at row {}, column {}", field, row, col),
                ErrorContext::at(row, col).field(field),
            ));
        }
        CellValue::Number(n) => Some(*n),
        CellValue::Text(text) => Some(strip_unit_suffix(text))
            .filter(|stripped| !stripped.is_empty())
            .and_then(|stripped| parse_number_text(&stripped)),
        _ => None,
    };

    let precision = clamp_weight_precision(detect_cell_precision(value, flat.number_format(row, col)));

    match number.and_then(|n| safe_decimal(n, precision)) {
        Some(decimal) => Ok((decimal, precision)),
        None => {
            let raw = value.display().unwrap_or_default();
            Err(ProcessingError::new(
                code,
                format!("{} is non-numeric at row {}, column {}: {:?}", field, row, col, raw),
                ErrorContext::at(row, col)
                    .field(field)
                    .detail("raw_value", raw),
            ))
        }
    }
}

/// Gross weight, replaced by row+2 when rows +1 and +2 are both numeric
/// (packaging weight added under the stated total)
fn extract_gross_weight(flat: &FlatSheet, total_row: u32, gw_col: u32) -> ProcessingResult<(Decimal, u32)> {
    let stated = extract_weight(flat, total_row, gw_col, "total_gw", ErrorCode::InvalidTotalGrossWeight)?;

    let numeric = |row| try_float(flat.value(row, gw_col)).is_some();
    if !(numeric(total_row + 1) && numeric(total_row + 2)) {
        return Ok(stated);
    }

    let corrected = extract_weight(
        flat,
        total_row + 2,
        gw_col,
        "total_gw",
        ErrorCode::InvalidTotalGrossWeight,
    )?;
    info!(
        "Packaging weight addition: using row {} GW={} instead of row {}",
        total_row + 2,
        corrected.0,
        total_row
    );
    Ok(corrected)
}

fn valid_packets(value: u64) -> Option<u32> {
    (PACKETS_MIN..=PACKETS_MAX)
        .contains(&value)
        .then_some(value as u32)
}

fn captured_packets(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .and_then(valid_packets)
}

/// Integer reading of a cell text, accepting "55", "55.0" and "55 CTNS"-like units
fn parse_packet_count(text: &str) -> Option<u32> {
    let float_val = strip_unit_suffix(text.trim()).parse::<f64>().ok()?;
    let truncated = float_val.trunc();
    if !float_val.is_finite() || (float_val - truncated).abs() >= 0.01 || truncated < 0.0 {
        return None;
    }
    valid_packets(truncated as u64)
}

fn jian_shu_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"件[数數]").unwrap())
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)").unwrap())
}

fn plt_number_before_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+)\s*PLT").unwrap())
}

fn plt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)PLT").unwrap())
}

/// Below-total packet patterns, in the order they are tried on each cell.
///
/// "共N托" goes first so a pallet count wins over a box breakdown in the
/// same cell.
fn below_total_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"共(\d+)托",
            r"^(\d+)\s*[（(]",
            r"(?i)(\d+)\s*(托|箱|件|CTNS)\b",
            r"共(\d+)(托|箱)",
            r"(?i)PLT#\d+\(\d+~(\d+)\)",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

type PacketFinder = fn(&FlatSheet, u32, u32) -> Option<u32>;

const PACKET_PRIORITIES: [(&str, PacketFinder); 3] = [
    ("件数 label", packets_from_label),
    ("PLT indicator", packets_from_plt),
    ("below-total pattern", packets_below_total),
];

/// Packet count next to the totals row, or `None` when nothing valid is found
pub fn extract_total_packets(flat: &FlatSheet, total_row: u32, nw_col: u32) -> Option<u32> {
    let max_col = (nw_col + 2).max(PACKET_MIN_COL);
    for (name, finder) in PACKET_PRIORITIES {
        if let Some(packets) = finder(flat, total_row, max_col) {
            info!("Total packets {} found via {}", packets, name);
            return Some(packets);
        }
    }
    debug!("Total packets not found around total row {}", total_row);
    None
}

fn cell_text(flat: &FlatSheet, row: u32, col: u32) -> Option<String> {
    flat.value(row, col).display().map(|s| s.trim().to_string())
}

/// "件数" label within three rows below; value to its right, else in the label
fn packets_from_label(flat: &FlatSheet, total_row: u32, max_col: u32) -> Option<u32> {
    for row in total_row + 1..=total_row + 3 {
        for col in 1..=max_col {
            let Some(text) = cell_text(flat, row, col) else {
                continue;
            };
            if !jian_shu_re().is_match(&text) {
                continue;
            }
            let right = (col + 1..=(col + 3).min(max_col))
                .filter_map(|c| cell_text(flat, row, c))
                .find_map(|adjacent| parse_packet_count(&adjacent));
            if let Some(packets) = right.or_else(|| captured_packets(digits_re(), &text)) {
                return Some(packets);
            }
        }
    }
    None
}

/// "7PLT" one or two rows above, or "PLT" with the count in the next cell
fn packets_from_plt(flat: &FlatSheet, total_row: u32, max_col: u32) -> Option<u32> {
    for row in [total_row.checked_sub(1), total_row.checked_sub(2)]
        .into_iter()
        .flatten()
        .filter(|r| *r >= 1)
    {
        for col in 1..=max_col {
            let Some(text) = cell_text(flat, row, col) else {
                continue;
            };
            if plt_number_before_re().is_match(&text) {
                if let Some(packets) = captured_packets(plt_number_before_re(), &text) {
                    return Some(packets);
                }
            } else if plt_re().is_match(&text) && col < max_col {
                if let Some(packets) =
                    cell_text(flat, row, col + 1).and_then(|right| parse_packet_count(&right))
                {
                    return Some(packets);
                }
            }
        }
    }
    None
}

/// Packet patterns in the three rows under the totals row
fn packets_below_total(flat: &FlatSheet, total_row: u32, max_col: u32) -> Option<u32> {
    for row in total_row + 1..=total_row + 3 {
        for col in 1..=max_col {
            let Some(text) = cell_text(flat, row, col).filter(|t| !t.is_empty()) else {
                continue;
            };
            if let Some(packets) = below_total_patterns()
                .iter()
                .find_map(|re| captured_packets(re, &text))
            {
                return Some(packets);
            }
        }
    }
    None
}
