//! # sheet-merge-xlsx
//!
//! XLSX (Office Open XML) support for sheet-merge.
//!
//! [`XlsxPackage`] edits a workbook part by part: a copied worksheet brings
//! its formats, shared strings, drawings and images along, and every other
//! part of the target is written back untouched. [`XlsxReader`] and
//! [`XlsxWriter`] map between packages and the values-only
//! [`sheet_merge_core::Workbook`] model used for checks and fixtures.

pub mod error;
pub mod package;
pub mod reader;
pub mod writer;

mod escape;

pub use error::{XlsxError, XlsxResult};
pub use package::XlsxPackage;
pub use reader::XlsxReader;
pub use writer::XlsxWriter;
