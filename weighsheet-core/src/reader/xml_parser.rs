//! XML parsing utilities for extracting merge and format metadata from XLSX files

use anyhow::Result;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::io::BufReader;
use zip::ZipArchive;

use super::workbook::MergedRegion;

/// Resolve the archive path of every worksheet, in workbook order.
///
/// Follows `xl/workbook.xml` relationships; falls back to the
/// conventional `xl/worksheets/sheetN.xml` naming when they are absent.
pub fn resolve_sheet_paths(
    archive: &mut ZipArchive<impl std::io::Read + std::io::Seek>,
    sheet_count: usize,
) -> Result<Vec<String>> {
    let fallback: Vec<String> = (1..=sheet_count)
        .map(|i| format!("xl/worksheets/sheet{}.xml", i))
        .collect();

    // Mapping relationships. Link rId with paths
    let mut rels: HashMap<String, String> = HashMap::new();
    if let Ok(file) = archive.by_name("xl/_rels/workbook.xml.rels") {
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    if e.name().as_ref() == b"Relationship" {
                        let id = attribute(&e, b"Id");
                        let target = attribute(&e, b"Target");
                        if let (Some(id), Some(target)) = (id, target) {
                            rels.insert(id, target);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(anyhow::anyhow!("XML parsing error: {}", e)),
                _ => {}
            }
            buf.clear();
        }
    }

    if rels.is_empty() {
        return Ok(fallback);
    }

    let mut paths = Vec::new();
    if let Ok(file) = archive.by_name("xl/workbook.xml") {
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    if e.name().as_ref() == b"sheet" {
                        let target = attribute(&e, b"r:id").and_then(|id| rels.get(&id));
                        match target {
                            Some(target) => paths.push(normalize_target(target)),
                            None => paths.push(String::new()),
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(anyhow::anyhow!("XML parsing error: {}", e)),
                _ => {}
            }
            buf.clear();
        }
    }

    if paths.len() != sheet_count {
        return Ok(fallback);
    }

    Ok(paths
        .into_iter()
        .zip(fallback)
        .map(|(path, fallback)| if path.is_empty() { fallback } else { path })
        .collect())
}

/// Targets are relative to `xl/` unless absolute
fn normalize_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

/// Extract merged cell regions from a worksheet part (1-based bounds)
pub fn extract_merged_cells_from_xlsx(
    archive: &mut ZipArchive<impl std::io::Read + std::io::Seek>,
    sheet_path: &str,
) -> Result<Vec<MergedRegion>> {
    let mut merged_cells = Vec::new();

    let sheet_xml = match archive.by_name(sheet_path) {
        Ok(file) => file,
        Err(_) => return Ok(merged_cells),
    };

    let buf_reader = BufReader::new(sheet_xml);
    let mut reader = Reader::from_reader(buf_reader);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"mergeCell" {
                    if let Some(region) = attribute(&e, b"ref").and_then(|r| parse_cell_range(&r))
                    {
                        merged_cells.push(region);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("XML parsing error: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(merged_cells)
}

/// Parse a cell range like "A1:B2" into (min_row, min_col, max_row, max_col)
fn parse_cell_range(range: &str) -> Option<MergedRegion> {
    let (start, end) = range.split_once(':')?;
    let (start_row, start_col) = parse_cell_ref(start)?;
    let (end_row, end_col) = parse_cell_ref(end)?;

    Some((
        start_row.min(end_row),
        start_col.min(end_col),
        start_row.max(end_row),
        start_col.max(end_col),
    ))
}

/// Parse a cell reference like "A1" into 1-based (row, col)
pub(crate) fn parse_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let mut col = 0u32;
    let mut row_str = String::new();

    for ch in cell_ref.chars() {
        if ch.is_ascii_alphabetic() {
            let digit = ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
            col = col.checked_mul(26)?.checked_add(digit)?;
        } else if ch.is_ascii_digit() {
            row_str.push(ch);
        }
    }

    if row_str.is_empty() || col == 0 {
        return None;
    }

    let row = row_str.parse::<u32>().ok()?;
    if row == 0 {
        return None;
    }
    Some((row, col))
}

/// Built-in number formats that carry decimal places or mark text
fn builtin_num_fmts() -> HashMap<u32, String> {
    let mut num_fmts = HashMap::new();
    num_fmts.insert(0, "General".to_string());
    num_fmts.insert(1, "0".to_string());
    num_fmts.insert(2, "0.00".to_string());
    num_fmts.insert(3, "#,##0".to_string());
    num_fmts.insert(4, "#,##0.00".to_string());
    num_fmts.insert(9, "0%".to_string());
    num_fmts.insert(10, "0.00%".to_string());
    num_fmts.insert(11, "0.00E+00".to_string());
    num_fmts.insert(37, "#,##0 ;(#,##0)".to_string());
    num_fmts.insert(38, "#,##0 ;[Red](#,##0)".to_string());
    num_fmts.insert(39, "#,##0.00;(#,##0.00)".to_string());
    num_fmts.insert(40, "#,##0.00;[Red](#,##0.00)".to_string());
    num_fmts.insert(48, "##0.0E+0".to_string());
    num_fmts.insert(49, "@".to_string());
    num_fmts
}

/// Parse `xl/styles.xml` into a list of format codes indexed by cell xf index
pub fn parse_styles(
    archive: &mut ZipArchive<impl std::io::Read + std::io::Seek>,
) -> Result<Vec<String>> {
    let mut num_fmts = builtin_num_fmts();

    let styles_xml = match archive.by_name("xl/styles.xml") {
        Ok(file) => file,
        Err(_) => return Ok(Vec::new()),
    };

    let buf_reader = BufReader::new(styles_xml);
    let mut reader = Reader::from_reader(buf_reader);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    // numFmtId per cellXfs entry; resolved once every custom format is known
    let mut xf_fmt_ids = Vec::new();
    let mut in_cell_xfs = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"numFmt" => {
                    let id = attribute(&e, b"numFmtId").and_then(|v| v.parse::<u32>().ok());
                    let code = attribute(&e, b"formatCode");
                    if let (Some(id), Some(code)) = (id, code) {
                        if !code.is_empty() {
                            num_fmts.insert(id, code);
                        }
                    }
                }
                b"cellXfs" => in_cell_xfs = true,
                b"xf" if in_cell_xfs => {
                    let id = attribute(&e, b"numFmtId")
                        .and_then(|v| v.parse::<u32>().ok())
                        .unwrap_or(0);
                    xf_fmt_ids.push(id);
                }
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"cellXfs" {
                    in_cell_xfs = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("XML parsing error: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(xf_fmt_ids
        .into_iter()
        .map(|id| {
            num_fmts
                .get(&id)
                .cloned()
                .unwrap_or_else(|| "General".to_string())
        })
        .collect())
}

/// Extract cell style indices from a worksheet part, keyed by 1-based (row, col)
pub fn extract_cell_style_indices_from_xlsx(
    archive: &mut ZipArchive<impl std::io::Read + std::io::Seek>,
    sheet_path: &str,
) -> Result<HashMap<(u32, u32), usize>> {
    let mut cell_styles = HashMap::new();

    let sheet_xml = match archive.by_name(sheet_path) {
        Ok(file) => file,
        Err(_) => return Ok(cell_styles),
    };

    let buf_reader = BufReader::new(sheet_xml);
    let mut reader = Reader::from_reader(buf_reader);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"c" {
                    let position = attribute(&e, b"r").and_then(|r| parse_cell_ref(&r));
                    let style = attribute(&e, b"s").and_then(|s| s.parse::<usize>().ok());
                    if let (Some(position), Some(style)) = (position, style) {
                        cell_styles.insert(position, style);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("XML parsing error: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(cell_styles)
}
