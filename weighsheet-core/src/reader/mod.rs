//! Excel/ODS file reader using calamine

use anyhow::{Context, Result};
use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};
use std::collections::HashMap;
use std::path::Path;

pub mod workbook;
pub mod xml_parser;

pub use workbook::{Cell, CellValue, MergedRegion, Sheet, Workbook};

/// Read a workbook from a file path.
///
/// Values come from calamine; for XLSX files merged regions and number
/// formats are read from the package parts. Other formats load without
/// merge or format metadata.
pub fn read_workbook<P: AsRef<Path>>(path: P) -> Result<Workbook> {
    let path = path.as_ref();
    // Access failures keep their io::Error in the chain
    std::fs::File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;

    // Open workbook with calamine
    let mut excel: Sheets<_> = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook: {}", path.display()))?;

    let sheet_names = excel.sheet_names();
    let mut sheets = Vec::new();

    for sheet_name in &sheet_names {
        let range = excel
            .worksheet_range(sheet_name)
            .with_context(|| format!("Failed to read sheet '{}'", sheet_name))?;
        sheets.push(parse_sheet(sheet_name, &range));
    }

    let is_xlsx = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xlsm"));

    if is_xlsx {
        apply_xlsx_metadata(path, &mut sheets)
            .with_context(|| format!("Failed to read sheet metadata: {}", path.display()))?;
    }

    Ok(Workbook {
        path: path.to_path_buf(),
        sheets,
    })
}

/// Attach merged regions and number formats from the XLSX package
fn apply_xlsx_metadata(path: &Path, sheets: &mut [Sheet]) -> Result<()> {
    use std::fs::File;
    use std::io::BufReader;

    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    let sheet_paths = xml_parser::resolve_sheet_paths(&mut archive, sheets.len())?;
    let styles = xml_parser::parse_styles(&mut archive).unwrap_or_default();

    for (sheet, sheet_path) in sheets.iter_mut().zip(sheet_paths.iter()) {
        sheet.merged_cells = xml_parser::extract_merged_cells_from_xlsx(&mut archive, sheet_path)?;

        if styles.is_empty() {
            continue;
        }
        let cell_styles = xml_parser::extract_cell_style_indices_from_xlsx(&mut archive, sheet_path)?;
        for ((row, col), style_idx) in cell_styles {
            if let Some(fmt) = styles.get(style_idx) {
                if let Some(cell) = sheet.cells.get_mut(&(row, col)) {
                    cell.num_fmt = Some(fmt.clone());
                }
            }
        }
    }

    Ok(())
}

fn parse_sheet(name: &str, range: &Range<Data>) -> Sheet {
    let mut cells = HashMap::new();
    let (start_row, start_col) = range.start().unwrap_or((0, 0));

    for (rel_row, rel_col, data) in range.cells() {
        if matches!(data, Data::Empty) {
            continue;
        }
        // calamine positions are 0-based
        let row = start_row + rel_row as u32 + 1;
        let col = start_col + rel_col as u32 + 1;
        cells.insert(
            (row, col),
            Cell {
                row,
                col,
                value: parse_cell_value(data),
                num_fmt: None,
            },
        );
    }

    Sheet {
        name: name.to_string(),
        cells,
        merged_cells: Vec::new(),
    }
}

fn parse_cell_value(data: &Data) -> CellValue {
    match data {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Boolean(*b),
        Data::Error(e) => CellValue::Error(format!("{:?}", e)),
        Data::Empty => CellValue::Empty,
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) => CellValue::Text(s.clone()),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}
