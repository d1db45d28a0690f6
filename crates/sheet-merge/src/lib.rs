//! # sheet-merge
//!
//! Copies worksheets from one workbook into another and saves the result
//! under a new name.
//!
//! A [`MergePlan`] lists the sheet copies. Each step names a source sheet, the
//! target sheet it goes after, and the copy's new name. The default plan copies
//! source sheets 1, 2 and 3 after target sheets 3, 4 and 5 and names them
//! `Sheet4`, `Sheet5` and `Sheet6`.
//!
//! Two [`Backend`]s do the work:
//!
//! - [`NativeBackend`] edits the `.xlsx` packages in-process, keeping every
//!   part of the target it does not need to touch
//! - `ExcelBackend` (feature `excel`, on by default) drives a hidden Excel
//!   instance through the `excel-com-bridge` process
//!
//! ## Example
//!
//! ```rust,no_run
//! use sheet_merge::{merge, MergeRequest, NativeBackend};
//!
//! let report = merge(NativeBackend::new(), &MergeRequest::default()).unwrap();
//! for name in &report.sheets {
//!     println!("{name}");
//! }
//! ```

pub mod error;
#[cfg(feature = "excel")]
pub mod excel;
pub mod merge;
pub mod native;
pub mod plan;
pub mod session;

pub use error::{MergeError, PlanError, Result, Side};
#[cfg(feature = "excel")]
pub use excel::ExcelBackend;
pub use merge::{list_sheets, merge, preview, MergeReport, MergeRequest};
pub use native::NativeBackend;
pub use plan::{MergePlan, MergeStep, Resolution, ResolvedStep, SheetSelector};
pub use session::{Backend, BookId, Session};

#[cfg(feature = "excel")]
pub use sheet_merge_excel::{ExcelBridgeConfig, Launcher};
