//! Merged-region capture and value propagation.
//!
//! A sheet is flattened exactly once through [`FlatSheet::flatten`], which
//! takes ownership of it. Anchor values are captured before any region is
//! unmerged, so every later query sees the pre-merge content.

use crate::reader::{CellValue, MergedRegion, Sheet};
use tracing::{debug, warn};

/// A merged region captured before flattening. Bounds are 1-based inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRange {
    pub min_row: u32,
    pub max_row: u32,
    pub min_col: u32,
    pub max_col: u32,
    /// Value of the top-left cell at capture time
    pub anchor_value: CellValue,
}

impl MergeRange {
    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.min_row..=self.max_row).contains(&row) && (self.min_col..=self.max_col).contains(&col)
    }

    pub fn is_anchor(&self, row: u32, col: u32) -> bool {
        self.min_row == row && self.min_col == col
    }

    fn overlaps(&self, other: &MergeRange) -> bool {
        self.min_row <= other.max_row
            && other.min_row <= self.max_row
            && self.min_col <= other.max_col
            && other.min_col <= self.max_col
    }
}

/// Read-only record of the merged regions a sheet had before flattening
#[derive(Debug, Clone, Default)]
pub struct MergeTracker {
    ranges: Vec<MergeRange>,
}

impl MergeTracker {
    fn capture(sheet: &Sheet) -> (Self, Vec<MergedRegion>) {
        let mut ranges: Vec<MergeRange> = Vec::with_capacity(sheet.merged_cells.len());
        let mut captured = Vec::with_capacity(sheet.merged_cells.len());

        for &region in &sheet.merged_cells {
            let (min_row, min_col, max_row, max_col) = region;
            let range = MergeRange {
                min_row,
                max_row,
                min_col,
                max_col,
                anchor_value: sheet.value(min_row, min_col).clone(),
            };

            if let Some(existing) = ranges.iter().find(|r| r.overlaps(&range)) {
                warn!(
                    sheet = %sheet.name,
                    "Skipping merged region rows {}-{} cols {}-{}: overlaps rows {}-{} cols {}-{}",
                    min_row, max_row, min_col, max_col,
                    existing.min_row, existing.max_row, existing.min_col, existing.max_col
                );
                continue;
            }

            debug!(
                "Captured merge range: rows {}-{}, cols {}-{}, anchor={:?}",
                min_row, max_row, min_col, max_col, range.anchor_value
            );
            ranges.push(range);
            captured.push(region);
        }

        (Self { ranges }, captured)
    }

    pub fn ranges(&self) -> &[MergeRange] {
        &self.ranges
    }

    pub fn is_merge_anchor(&self, row: u32, col: u32) -> bool {
        self.ranges.iter().any(|r| r.is_anchor(row, col))
    }

    pub fn is_in_merge(&self, row: u32, col: u32) -> bool {
        self.get_merge_range(row, col).is_some()
    }

    pub fn get_merge_range(&self, row: u32, col: u32) -> Option<&MergeRange> {
        self.ranges.iter().find(|r| r.contains(row, col))
    }

    /// Captured anchor value for any cell inside a merged region
    pub fn anchor_value(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.get_merge_range(row, col).map(|r| &r.anchor_value)
    }

    /// Whether the containing region starts strictly below the header row
    pub fn is_data_area_merge(&self, row: u32, col: u32, header_row: u32) -> bool {
        self.get_merge_range(row, col)
            .is_some_and(|r| r.min_row > header_row)
    }
}

/// A sheet whose merged regions have been captured and then removed
#[derive(Debug, Clone)]
pub struct FlatSheet {
    sheet: Sheet,
    tracker: MergeTracker,
}

static ZERO: CellValue = CellValue::Number(0.0);

impl FlatSheet {
    /// Capture every merged region with its anchor value, then unmerge them all.
    ///
    /// Overlapping regions in a malformed file are reported and dropped so
    /// the captured ranges stay disjoint.
    pub fn flatten(mut sheet: Sheet) -> Self {
        let (tracker, captured) = MergeTracker::capture(&sheet);

        for region in captured {
            sheet.unmerge(region);
        }
        // Anything left was skipped as overlapping
        sheet.merged_cells.clear();

        debug!(
            sheet = %sheet.name,
            "Flattened sheet: {} merge range(s) captured",
            tracker.ranges.len()
        );
        Self { sheet, tracker }
    }

    pub fn sheet(&self) -> &Sheet {
        &self.sheet
    }

    pub fn name(&self) -> &str {
        &self.sheet.name
    }

    pub fn tracker(&self) -> &MergeTracker {
        &self.tracker
    }

    /// Current (post-flatten) cell value
    pub fn value(&self, row: u32, col: u32) -> &CellValue {
        self.sheet.value(row, col)
    }

    pub fn number_format(&self, row: u32, col: u32) -> Option<&str> {
        self.sheet.number_format(row, col)
    }

    pub fn max_row(&self) -> u32 {
        self.sheet.max_row()
    }

    pub fn max_column(&self) -> u32 {
        self.sheet.max_column()
    }

    /// Text propagation: every cell of a data-area merge reads the anchor value
    pub fn string_value(&self, row: u32, col: u32, header_row: u32) -> &CellValue {
        match self.tracker.get_merge_range(row, col) {
            Some(range) if range.min_row > header_row => &range.anchor_value,
            _ => self.sheet.value(row, col),
        }
    }

    /// Weight reading without propagation.
    ///
    /// Header-area merges read as zero. In a data-area merge only the anchor
    /// keeps its value and every other cell reads as zero. Cells outside any
    /// merge return the raw value unconverted.
    pub fn weight_value(&self, row: u32, col: u32, header_row: u32) -> &CellValue {
        match self.tracker.get_merge_range(row, col) {
            None => self.sheet.value(row, col),
            Some(range) if range.min_row <= header_row => &ZERO,
            Some(range) if range.is_anchor(row, col) => &range.anchor_value,
            Some(_) => &ZERO,
        }
    }
}
