//! Workbook data structures

use std::collections::HashMap;
use std::path::PathBuf;

/// Represents a complete workbook
#[derive(Debug, Clone)]
pub struct Workbook {
    pub path: PathBuf,
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Get a sheet by name
    pub fn get_sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Get all sheet names
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Remove a sheet from the workbook and take ownership of it
    pub fn take_sheet(&mut self, name: &str) -> Option<Sheet> {
        let index = self.sheets.iter().position(|s| s.name == name)?;
        Some(self.sheets.remove(index))
    }
}

/// A merged region, 1-based inclusive bounds: (min_row, min_col, max_row, max_col)
pub type MergedRegion = (u32, u32, u32, u32);

/// Represents a worksheet.
///
/// Rows and columns are 1-based everywhere in this crate.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    /// Cells keyed by (row, col)
    pub cells: HashMap<(u32, u32), Cell>,
    /// Merged cell regions as stored in the file
    pub merged_cells: Vec<MergedRegion>,
}

static EMPTY: CellValue = CellValue::Empty;

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Value at the given position; missing cells read as empty
    pub fn value(&self, row: u32, col: u32) -> &CellValue {
        self.cells.get(&(row, col)).map_or(&EMPTY, |c| &c.value)
    }

    /// Number format code of a cell, if one was recorded
    pub fn number_format(&self, row: u32, col: u32) -> Option<&str> {
        self.cells.get(&(row, col)).and_then(|c| c.num_fmt.as_deref())
    }

    /// Set a cell value, keeping any existing number format
    pub fn set_value(&mut self, row: u32, col: u32, value: impl Into<CellValue>) {
        let value = value.into();
        match self.cells.get_mut(&(row, col)) {
            Some(cell) => cell.value = value,
            None => {
                self.cells.insert(
                    (row, col),
                    Cell {
                        row,
                        col,
                        value,
                        num_fmt: None,
                    },
                );
            }
        }
    }

    /// Set a cell value together with its number format code
    pub fn set_formatted(
        &mut self,
        row: u32,
        col: u32,
        value: impl Into<CellValue>,
        num_fmt: impl Into<String>,
    ) {
        self.cells.insert(
            (row, col),
            Cell {
                row,
                col,
                value: value.into(),
                num_fmt: Some(num_fmt.into()),
            },
        );
    }

    /// Declare a merged region; bounds are 1-based inclusive
    pub fn merge(&mut self, min_row: u32, min_col: u32, max_row: u32, max_col: u32) {
        self.merged_cells.push((min_row, min_col, max_row, max_col));
    }

    /// Remove a merged region, leaving only its top-left cell populated
    pub fn unmerge(&mut self, region: MergedRegion) {
        let (min_row, min_col, max_row, max_col) = region;
        self.merged_cells.retain(|r| *r != region);
        for row in min_row..=max_row {
            for col in min_col..=max_col {
                if (row, col) == (min_row, min_col) {
                    continue;
                }
                if let Some(cell) = self.cells.get_mut(&(row, col)) {
                    cell.value = CellValue::Empty;
                }
            }
        }
    }

    /// Largest row index holding a non-empty value (0 for an empty sheet)
    pub fn max_row(&self) -> u32 {
        self.cells
            .values()
            .filter(|c| !c.value.is_empty())
            .map(|c| c.row)
            .max()
            .unwrap_or(0)
    }

    /// Largest column index holding a non-empty value (0 for an empty sheet)
    pub fn max_column(&self) -> u32 {
        self.cells
            .values()
            .filter(|c| !c.value.is_empty())
            .map(|c| c.col)
            .max()
            .unwrap_or(0)
    }
}

/// Represents a single cell
#[derive(Debug, Clone)]
pub struct Cell {
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
    pub num_fmt: Option<String>,
}

/// Cell value types
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(String),
}

impl CellValue {
    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Empty, or text made only of whitespace
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text rendering of the value, `None` for empty cells.
    ///
    /// Whole numbers render without a fractional part ("12", not "12.0").
    pub fn display(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Number(n) => Some(format_number(*n)),
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Boolean(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
            CellValue::Error(e) => Some(e.clone()),
        }
    }

    /// Trimmed text rendering; empty string for empty cells
    pub fn display_trimmed(&self) -> String {
        self.display()
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}
