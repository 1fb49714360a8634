//! Decimal rounding, display-precision detection and cell text helpers

use crate::reader::CellValue;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use std::sync::OnceLock;

/// Lowest decimal precision used for weights
pub const WEIGHT_PRECISION_MIN: u32 = 2;
/// Highest decimal precision used for weights
pub const WEIGHT_PRECISION_MAX: u32 = 5;
/// Columns A..J are scanned for total/summary keywords
pub const STOP_KEYWORD_COL_COUNT: u32 = 10;

/// Pushed away from zero on the scaled value before rounding so that
/// 2.2799999999999998 rounds like the 2.28 it was meant to be.
const ROUNDING_EPSILON: f64 = 1e-9;

/// Ditto marks meaning "same as above"
pub const DITTO_MARKS: [&str; 4] = ["\"", "\u{3003}", "\u{201c}", "\u{201d}"];

fn unit_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*(KGS?|LBS?|G|PCS|EA|件|个)\s*$").unwrap())
}

fn stop_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(total|合计|总计|小计)").unwrap())
}

fn format_decimals_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.([0#]+)").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Round half away from zero at `decimals` places, after the epsilon nudge.
///
/// The scaled value goes through `f64` and is re-read from its shortest
/// decimal rendering, so binary noise never reaches the result.
pub fn round_half_up(value: Decimal, decimals: u32) -> Decimal {
    match value.to_f64() {
        Some(float_val) => round_f64(float_val, decimals).unwrap_or(value),
        None => value,
    }
}

/// Convert a float to a decimal rounded at `decimals` places
pub fn safe_decimal(value: f64, decimals: u32) -> Option<Decimal> {
    round_f64(value, decimals)
}

fn round_f64(value: f64, decimals: u32) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    let scaled = value * 10f64.powi(decimals as i32) + ROUNDING_EPSILON * value.signum();
    let integral = Decimal::from_str(&format!("{}", scaled))
        .ok()?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let mantissa = integral.mantissa();
    match Decimal::try_from_i128_with_scale(mantissa, decimals) {
        Ok(d) => Some(d),
        Err(_) => Some(integral / Decimal::from(10u64.pow(decimals))),
    }
}

/// Strip a trailing unit suffix (KG, KGS, LBS, PCS, 件 ...) from a numeric string
pub fn strip_unit_suffix(value: &str) -> String {
    unit_suffix_re().replace(value.trim(), "").into_owned()
}

/// Whether the text contains a total/summary keyword
pub fn is_stop_keyword(value: &str) -> bool {
    stop_keyword_re().is_match(value)
}

/// Collapse all whitespace runs to a single space and trim
pub fn normalize_header(value: &str) -> String {
    whitespace_re().replace_all(value.trim(), " ").into_owned()
}

/// Numeric reading of a cell: numbers as-is, text parsed after unit stripping
pub fn try_float(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) => Some(*n),
        CellValue::Text(s) => parse_number_text(s),
        _ => None,
    }
}

/// Parse numeric text, tolerating thousands separators and a unit suffix
pub fn parse_number_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<f64>() {
        return Some(n).filter(|n| n.is_finite());
    }
    let stripped = strip_unit_suffix(trimmed).replace(',', "");
    stripped.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Number of decimal places a cell displays.
///
/// Explicit formats are parsed ("0.000" -> 3). General and text formats
/// infer the precision from the value rounded to 5 places.
pub fn detect_cell_precision(value: &CellValue, num_fmt: Option<&str>) -> u32 {
    match num_fmt {
        None | Some("General") | Some("@") => precision_from_value(value),
        Some(fmt) => format_decimals_re()
            .captures(fmt)
            .map(|c| c[1].len() as u32)
            .unwrap_or(0),
    }
}

fn precision_from_value(value: &CellValue) -> u32 {
    let Some(float_val) = try_float(value) else {
        return 0;
    };
    let rounded = format!("{:.5}", float_val);
    match rounded.split_once('.') {
        Some((_, fraction)) => fraction.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

/// Clamp a precision into the weight range
pub fn clamp_weight_precision(precision: u32) -> u32 {
    precision.clamp(WEIGHT_PRECISION_MIN, WEIGHT_PRECISION_MAX)
}

/// Whether the trimmed text is one of the ditto marks
pub fn is_ditto_mark(text: &str) -> bool {
    DITTO_MARKS.contains(&text.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_half_up_float_artifact() {
        assert_eq!(safe_decimal(2.2799999999999998, 2), Some(dec("2.28")));
        assert_eq!(round_half_up(dec("2.285"), 2), dec("2.29"));
        assert_eq!(round_half_up(dec("2.284"), 2), dec("2.28"));
    }

    #[test]
    fn test_round_keeps_requested_scale() {
        let rounded = round_half_up(dec("3.1"), 3);
        assert_eq!(rounded.to_string(), "3.100");
    }

    #[test]
    fn test_round_small_values() {
        assert_eq!(round_half_up(dec("0.001"), 2), Decimal::ZERO);
        assert_eq!(round_half_up(dec("0.001"), 3), dec("0.001"));
        assert_eq!(round_half_up(dec("0.005"), 2), dec("0.01"));
    }

    #[test]
    fn test_strip_unit_suffix() {
        assert_eq!(strip_unit_suffix("12.5 KGS"), "12.5");
        assert_eq!(strip_unit_suffix("12.5kg"), "12.5");
        assert_eq!(strip_unit_suffix("30件"), "30");
        assert_eq!(strip_unit_suffix("abc"), "abc");
    }

    #[test]
    fn test_rounding_is_symmetric_around_zero() {
        let positive = round_half_up(dec("2.275"), 2);
        let negative = round_half_up(dec("-2.275"), 2);
        assert_eq!(positive, dec("2.28"));
        assert_eq!(negative, -positive);
        assert!(round_half_up(Decimal::ZERO, 3).is_zero());
    }

    #[test]
    fn test_stop_keywords() {
        assert!(is_stop_keyword("TOTAL:"));
        assert!(is_stop_keyword("Sub Total"));
        assert!(is_stop_keyword("合计"));
        assert!(!is_stop_keyword("Part No."));
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  N.W.\n(KGS)\t "), "N.W. (KGS)");
        assert_eq!(normalize_header("Part   No"), "Part No");
    }

    #[test]
    fn test_detect_precision_from_format() {
        let v = CellValue::Number(10.5);
        assert_eq!(detect_cell_precision(&v, Some("0.000")), 3);
        assert_eq!(detect_cell_precision(&v, Some("#,##0.00_);(#,##0.00)")), 2);
        assert_eq!(detect_cell_precision(&v, Some("0")), 0);
    }

    #[test]
    fn test_detect_precision_from_value() {
        assert_eq!(detect_cell_precision(&CellValue::Number(10.125), None), 3);
        assert_eq!(detect_cell_precision(&CellValue::Number(10.0), Some("General")), 0);
        assert_eq!(detect_cell_precision(&CellValue::from("10.1234567"), Some("@")), 5);
        assert_eq!(detect_cell_precision(&CellValue::from("n/a"), None), 0);
    }

    #[test]
    fn test_try_float() {
        assert_eq!(try_float(&CellValue::Number(1.5)), Some(1.5));
        assert_eq!(try_float(&CellValue::from(" 12.5 KGS ")), Some(12.5));
        assert_eq!(try_float(&CellValue::from("1,234.5")), Some(1234.5));
        assert_eq!(try_float(&CellValue::from("abc")), None);
        assert_eq!(try_float(&CellValue::Empty), None);
    }

    #[test]
    fn test_ditto_marks() {
        assert!(is_ditto_mark("\""));
        assert!(is_ditto_mark(" 〃 "));
        assert!(!is_ditto_mark("1.0"));
    }
}
