//! Worksheet type

use std::collections::BTreeMap;

use crate::cell::{CellAddress, CellRange, CellValue};
use crate::error::{Error, Result};
use crate::{MAX_COLS, MAX_ROWS};

/// A named, sparse grid of cells.
///
/// Cells are kept in a `BTreeMap` keyed by `(row, col)` so iteration is
/// row-major, which is the order the xlsx writer emits them in.
#[derive(Debug, Clone, PartialEq)]
pub struct Worksheet {
    name: String,
    cells: BTreeMap<(u32, u16), CellValue>,
    merged_regions: Vec<CellRange>,
    column_widths: BTreeMap<u16, f64>,
}

impl Worksheet {
    /// Create a new empty worksheet
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
            merged_regions: Vec::new(),
            column_widths: BTreeMap::new(),
        }
    }

    /// Get the worksheet name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the worksheet name. Name rules are enforced by [`crate::Workbook`].
    pub(crate) fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    /// Get a cell value by A1 address; missing cells read as `Empty`.
    pub fn get_value(&self, address: &str) -> Result<CellValue> {
        let addr = CellAddress::parse(address)?;
        Ok(self.get_value_at(addr.row, addr.col))
    }

    /// Get a cell value by 0-based row/column
    pub fn get_value_at(&self, row: u32, col: u16) -> CellValue {
        self.cells.get(&(row, col)).cloned().unwrap_or_default()
    }

    /// Set a cell value by A1 address
    pub fn set_cell_value<V: Into<CellValue>>(&mut self, address: &str, value: V) -> Result<()> {
        let addr = CellAddress::parse(address)?;
        self.set_cell_value_at(addr.row, addr.col, value)
    }

    /// Set a cell value by 0-based row/column. Setting `Empty` clears the cell.
    pub fn set_cell_value_at<V: Into<CellValue>>(
        &mut self,
        row: u32,
        col: u16,
        value: V,
    ) -> Result<()> {
        if row >= MAX_ROWS {
            return Err(Error::RowOutOfBounds(row, MAX_ROWS - 1));
        }
        if col >= MAX_COLS {
            return Err(Error::ColumnOutOfBounds(col as u32, MAX_COLS - 1));
        }

        match value.into() {
            CellValue::Empty => {
                self.cells.remove(&(row, col));
            }
            value => {
                self.cells.insert((row, col), value);
            }
        }
        Ok(())
    }

    /// Set a formula by A1 address (with or without the leading `=`)
    pub fn set_cell_formula(&mut self, address: &str, formula: &str) -> Result<()> {
        self.set_cell_value(address, CellValue::formula(formula))
    }

    /// Iterate over non-empty cells in row-major order
    pub fn iter_cells(&self) -> impl Iterator<Item = (u32, u16, &CellValue)> {
        self.cells.iter().map(|(&(row, col), value)| (row, col, value))
    }

    /// Number of non-empty cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// The smallest range covering every non-empty cell
    pub fn used_range(&self) -> Option<CellRange> {
        let mut keys = self.cells.keys();
        let &(first_row, first_col) = keys.next()?;
        let (mut max_row, mut min_col, mut max_col) = (first_row, first_col, first_col);
        for &(row, col) in keys {
            max_row = max_row.max(row);
            min_col = min_col.min(col);
            max_col = max_col.max(col);
        }
        Some(CellRange::new(
            CellAddress::new(first_row, min_col),
            CellAddress::new(max_row, max_col),
        ))
    }

    // === Merged cells ===

    /// Get all merged regions
    pub fn merged_regions(&self) -> &[CellRange] {
        &self.merged_regions
    }

    /// Merge a range of cells
    pub fn merge_cells(&mut self, range: &CellRange) -> Result<()> {
        if self.merged_regions.iter().any(|r| r.overlaps(range)) {
            return Err(Error::MergedCellConflict(range.to_string()));
        }
        self.merged_regions.push(*range);
        Ok(())
    }

    // === Columns ===

    /// Custom width of a column, if one was set
    pub fn column_width(&self, col: u16) -> Option<f64> {
        self.column_widths.get(&col).copied()
    }

    /// Set a custom column width (in characters, as Excel stores it)
    pub fn set_column_width(&mut self, col: u16, width: f64) {
        self.column_widths.insert(col, width);
    }

    /// All custom column widths, ordered by column
    pub fn column_widths(&self) -> &BTreeMap<u16, f64> {
        &self.column_widths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut ws = Worksheet::new("Data");
        ws.set_cell_value("B2", "hello").unwrap();
        ws.set_cell_value("A1", 1.5).unwrap();

        assert_eq!(ws.get_value("B2").unwrap().as_string(), Some("hello"));
        assert_eq!(ws.get_value_at(0, 0).as_number(), Some(1.5));
        assert!(ws.get_value("Z9").unwrap().is_empty());
        assert_eq!(ws.cell_count(), 2);
    }

    #[test]
    fn test_empty_clears_cell() {
        let mut ws = Worksheet::new("Data");
        ws.set_cell_value("A1", true).unwrap();
        ws.set_cell_value("A1", CellValue::Empty).unwrap();
        assert_eq!(ws.cell_count(), 0);
        assert!(ws.used_range().is_none());
    }

    #[test]
    fn test_iter_cells_is_row_major() {
        let mut ws = Worksheet::new("Data");
        ws.set_cell_value("B2", 4.0).unwrap();
        ws.set_cell_value("A2", 3.0).unwrap();
        ws.set_cell_value("C1", 2.0).unwrap();

        let order: Vec<(u32, u16)> = ws.iter_cells().map(|(r, c, _)| (r, c)).collect();
        assert_eq!(order, vec![(0, 2), (1, 0), (1, 1)]);
        assert_eq!(ws.used_range().unwrap().to_string(), "A1:C2");
    }

    #[test]
    fn test_merge_conflict() {
        let mut ws = Worksheet::new("Data");
        ws.merge_cells(&CellRange::parse("A1:B2").unwrap()).unwrap();
        assert!(ws.merge_cells(&CellRange::parse("B2:C3").unwrap()).is_err());
        assert_eq!(ws.merged_regions().len(), 1);
    }
}
