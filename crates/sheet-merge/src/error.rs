//! Error types for sheet-merge

use std::path::PathBuf;

use thiserror::Error;

use crate::session::BookId;

/// Result type alias using [`MergeError`]
pub type Result<T> = std::result::Result<T, MergeError>;

/// Which workbook a plan step refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The workbook receiving the copies
    Target,
    /// The workbook the sheets are copied from
    Source,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Target => write!(f, "target"),
            Side::Source => write!(f, "source"),
        }
    }
}

/// A merge plan that cannot be applied to the given workbooks.
///
/// Step numbers are 1-based, like sheet positions.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Merge plan has no steps")]
    Empty,

    #[error("Step {step}: {side} sheet position {position} out of range ({side} has {count} sheets at this point)")]
    PositionOutOfRange {
        step: usize,
        side: Side,
        position: usize,
        count: usize,
    },

    #[error("Step {step}: no sheet named '{name}' in the {side} workbook")]
    SheetNotFound {
        step: usize,
        side: Side,
        name: String,
    },

    #[error("Step {step}: a sheet named '{name}' already exists in the target workbook")]
    DuplicateName { step: usize, name: String },

    #[error("Step {step}: {error}")]
    InvalidName {
        step: usize,
        #[source]
        error: sheet_merge_core::Error,
    },
}

/// Errors that can occur while merging workbooks
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Invalid merge plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Cannot read plan file {}: {source}", path.display())]
    PlanFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Core(#[from] sheet_merge_core::Error),

    #[error(transparent)]
    Xlsx(#[from] sheet_merge_xlsx::XlsxError),

    #[cfg(feature = "excel")]
    #[error(transparent)]
    Excel(#[from] sheet_merge_excel::BridgeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported file format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Unknown workbook handle: {0}")]
    UnknownBook(BookId),

    #[error("Sheet order after merge is {actual:?}, expected {expected:?}")]
    UnexpectedSheetOrder {
        expected: Vec<String>,
        actual: Vec<String>,
    },
}
