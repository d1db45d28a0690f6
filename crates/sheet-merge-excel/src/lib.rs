//! Excel COM automation through the `excel-com-bridge` process.
//!
//! This crate spawns a Windows `.exe` (directly on Windows, under WINE
//! elsewhere) that automates Excel through COM, communicating over
//! JSON-over-stdio. It exposes the workbook operations a sheet merge needs:
//! opening workbooks, listing sheets, copying a sheet between workbooks,
//! renaming sheets, and saving.
//!
//! # Architecture
//!
//! ```text
//! Your Rust code
//!     └── ExcelBridge (this crate)
//!           └── spawns: [wine] excel-com-bridge.exe
//!                 └── COM: Excel.Application
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use sheet_merge_excel::{ExcelBridge, ExcelBridgeConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bridge = ExcelBridge::start(ExcelBridgeConfig::default())?;
//!     let a = bridge.open_workbook(Path::new("result/basic-1.xlsx"))?;
//!     let b = bridge.open_workbook(Path::new("result/basic-2.xlsx"))?;
//!     b.copy_sheet_after(0u32, &a, 2u32)?;
//!     a.rename_sheet(3u32, "Sheet4")?;
//!     a.save(Path::new("result/basic-merge.xlsx"))?;
//!     bridge.shutdown()?;
//!     Ok(())
//! }
//! ```

mod bridge;
mod workbook;

pub use bridge::{linux_to_wine_path, BridgeError, ExcelBridge, ExcelBridgeConfig, Launcher};
pub use excel_com_protocol::SheetRef;
pub use workbook::Workbook;
