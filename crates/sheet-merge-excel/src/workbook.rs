//! Workbook handle: operations on one open workbook, forwarded to the bridge.

use std::path::Path;

use excel_com_protocol::{Command as BridgeCommand, ResponseData, SheetRef};

use crate::bridge::{BridgeError, ExcelBridge};

/// A handle to an open workbook in the Excel COM bridge.
///
/// The handle borrows the bridge, so it cannot outlive the Excel session.
/// Sheet indices are 0-based.
#[derive(Clone, Copy)]
pub struct Workbook<'a> {
    bridge: &'a ExcelBridge,
    handle: u64,
}

impl<'a> Workbook<'a> {
    pub(crate) fn new(bridge: &'a ExcelBridge, handle: u64) -> Self {
        Self { bridge, handle }
    }

    /// Get the internal handle ID.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Worksheet names in tab order.
    pub fn sheet_names(&self) -> Result<Vec<String>, BridgeError> {
        let data = self.bridge.send_command(BridgeCommand::SheetNames {
            workbook: self.handle,
        })?;
        match data {
            Some(ResponseData::SheetNames { sheets }) => Ok(sheets),
            _ => Err(BridgeError::UnexpectedResponse),
        }
    }

    /// Copy `sheet` of this workbook into `target`, immediately after `after`.
    ///
    /// Excel names the copy after the original, adding `" (2)"` on collision.
    pub fn copy_sheet_after(
        &self,
        sheet: impl Into<SheetRef>,
        target: &Workbook<'_>,
        after: impl Into<SheetRef>,
    ) -> Result<(), BridgeError> {
        self.bridge.send_command(BridgeCommand::CopySheet {
            source_workbook: self.handle,
            sheet: sheet.into(),
            target_workbook: target.handle,
            after: after.into(),
        })?;
        Ok(())
    }

    /// Rename a worksheet.
    pub fn rename_sheet(&self, sheet: impl Into<SheetRef>, name: &str) -> Result<(), BridgeError> {
        self.bridge.send_command(BridgeCommand::RenameSheet {
            workbook: self.handle,
            sheet: sheet.into(),
            name: name.to_string(),
        })?;
        Ok(())
    }

    /// Save the workbook to a file path.
    ///
    /// The path is converted for the bridge (absolute, and `Z:` under WINE).
    /// Format is inferred from the extension.
    pub fn save(&self, path: &Path) -> Result<(), BridgeError> {
        let bridge_path = self.bridge.bridge_path(path)?;
        self.bridge.send_command(BridgeCommand::SaveWorkbook {
            workbook: self.handle,
            path: bridge_path,
        })?;
        tracing::info!("Saved workbook {} to {}", self.handle, path.display());
        Ok(())
    }

    /// Close the workbook without saving.
    pub fn close(self) -> Result<(), BridgeError> {
        self.bridge.send_command(BridgeCommand::CloseWorkbook {
            workbook: self.handle,
        })?;
        Ok(())
    }
}
