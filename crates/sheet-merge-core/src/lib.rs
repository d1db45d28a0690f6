//! # sheet-merge-core
//!
//! The in-memory workbook model behind the native merge backend.
//!
//! - [`CellValue`] - values a cell can hold (numbers, strings, booleans, errors, formulas)
//! - [`CellAddress`] and [`CellRange`] - A1-style addressing
//! - [`Worksheet`] - a named, sparse grid of cells plus merged ranges and column widths
//! - [`Workbook`] - an ordered list of worksheets with Excel's sheet-name rules
//!
//! ## Example
//!
//! ```rust
//! use sheet_merge_core::{Workbook, Worksheet};
//!
//! let mut target = Workbook::new();
//! let mut extra = Worksheet::new("Data");
//! extra.set_cell_value("A1", 42.0).unwrap();
//!
//! let index = target.copy_worksheet_after(&extra, 0).unwrap();
//! assert_eq!(index, 1);
//! assert_eq!(target.worksheet(1).unwrap().name(), "Data");
//! ```

pub mod cell;
pub mod error;
pub mod workbook;
pub mod worksheet;

pub use cell::{CellAddress, CellError, CellRange, CellValue};
pub use error::{Error, Result};
pub use workbook::{unique_sheet_name, validate_sheet_name, Workbook};
pub use worksheet::Worksheet;

/// Maximum number of rows in a worksheet (Excel limit)
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns in a worksheet (Excel limit)
pub const MAX_COLS: u16 = 16_384;

/// Maximum length of a sheet name
pub const MAX_SHEET_NAME_LEN: usize = 31;
