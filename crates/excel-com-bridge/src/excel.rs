//! Excel-specific COM automation layer built on top of the generic IDispatch wrapper.

#![cfg(windows)]

use std::collections::HashMap;

use excel_com_protocol::SheetRef;

use crate::dispatch::{
    variant_bool, variant_dispatch, variant_get_i32, variant_get_string, variant_i32, variant_str,
    DispatchObject,
};

/// Manages an Excel.Application COM instance and its open workbooks.
pub struct ExcelApp {
    app: DispatchObject,
    workbooks_collection: DispatchObject,
    /// Map from our handle IDs to workbook dispatch objects.
    workbooks: HashMap<u64, DispatchObject>,
    next_handle: u64,
}

impl ExcelApp {
    /// Create a new, hidden Excel.Application instance via COM.
    pub fn new() -> Result<Self, String> {
        let app = DispatchObject::create_from_progid("Excel.Application")?;

        // Disable UI elements for automation
        app.set_property("Visible", variant_bool(false))?;
        app.set_property("DisplayAlerts", variant_bool(false))?;
        app.set_property("ScreenUpdating", variant_bool(false))?;

        let workbooks_collection = app.get_child("Workbooks")?;

        Ok(Self {
            app,
            workbooks_collection,
            workbooks: HashMap::new(),
            next_handle: 1,
        })
    }

    /// Open a workbook from a file path. Returns the handle ID.
    pub fn open_workbook(&mut self, path: &str) -> Result<u64, String> {
        let wb = self
            .workbooks_collection
            .invoke_child("Open", &[variant_str(path)])?;
        let handle = self.next_handle;
        self.next_handle += 1;
        self.workbooks.insert(handle, wb);
        Ok(handle)
    }

    fn workbook(&self, wb_handle: u64) -> Result<&DispatchObject, String> {
        self.workbooks
            .get(&wb_handle)
            .ok_or_else(|| format!("Unknown workbook handle: {wb_handle}"))
    }

    /// Get a worksheet from a workbook.
    fn get_sheet(&self, wb_handle: u64, sheet: &SheetRef) -> Result<DispatchObject, String> {
        let sheets = self.workbook(wb_handle)?.get_child("Worksheets")?;
        match sheet {
            SheetRef::Index(idx) => {
                // Excel worksheets are 1-based, our protocol uses 0-based
                let excel_index = i32::try_from(*idx)
                    .ok()
                    .and_then(|i| i.checked_add(1))
                    .ok_or_else(|| format!("Sheet index out of range: {idx}"))?;
                sheets.get_indexed("Item", &variant_i32(excel_index))
            }
            SheetRef::Name(name) => sheets.get_indexed("Item", &variant_str(name)),
        }
    }

    /// Worksheet names in tab order.
    pub fn sheet_names(&self, wb_handle: u64) -> Result<Vec<String>, String> {
        let sheets = self.workbook(wb_handle)?.get_child("Worksheets")?;
        let count = variant_get_i32(&sheets.get_property("Count")?)
            .ok_or_else(|| "Worksheets.Count is not an integer".to_string())?;

        (1..=count)
            .map(|i| {
                let ws = sheets.get_indexed("Item", &variant_i32(i))?;
                variant_get_string(&ws.get_property("Name")?)
                    .ok_or_else(|| format!("Worksheet {i} has no name"))
            })
            .collect()
    }

    /// Copy a sheet so it lands immediately after `after` in the target workbook.
    pub fn copy_sheet(
        &self,
        source_handle: u64,
        sheet: &SheetRef,
        target_handle: u64,
        after: &SheetRef,
    ) -> Result<(), String> {
        let source = self.get_sheet(source_handle, sheet)?;
        let anchor = self.get_sheet(target_handle, after)?;
        source.invoke_named("Copy", &[("After", variant_dispatch(&anchor))])?;
        Ok(())
    }

    /// Rename a worksheet.
    pub fn rename_sheet(&self, wb_handle: u64, sheet: &SheetRef, name: &str) -> Result<(), String> {
        let ws = self.get_sheet(wb_handle, sheet)?;
        ws.set_property("Name", variant_str(name))
    }

    /// Save a workbook to a file path.
    pub fn save_workbook(&self, wb_handle: u64, path: &str) -> Result<(), String> {
        let wb = self.workbook(wb_handle)?;

        // Determine file format from extension
        // xlOpenXMLWorkbook = 51, xlOpenXMLWorkbookMacroEnabled = 52,
        // xlWorkbookNormal (xls) = -4143, xlCSV = 6
        let lower = path.to_ascii_lowercase();
        let format: i32 = if lower.ends_with(".xlsm") {
            52
        } else if lower.ends_with(".xls") {
            -4143
        } else if lower.ends_with(".csv") {
            6
        } else {
            51
        };

        wb.invoke_method("SaveAs", &[variant_str(path), variant_i32(format)])?;
        Ok(())
    }

    /// Close a workbook without saving.
    pub fn close_workbook(&mut self, wb_handle: u64) -> Result<(), String> {
        let wb = self
            .workbooks
            .remove(&wb_handle)
            .ok_or_else(|| format!("Unknown workbook handle: {wb_handle}"))?;
        wb.invoke_method("Close", &[variant_bool(false)])?;
        Ok(())
    }

    /// Shut down: close all workbooks and quit Excel.
    pub fn shutdown(mut self) -> Result<(), String> {
        let handles: Vec<u64> = self.workbooks.keys().copied().collect();
        for h in handles {
            if let Err(e) = self.close_workbook(h) {
                eprintln!("[excel-com-bridge] closing workbook {h} failed: {e}");
            }
        }
        self.app.invoke_method("Quit", &[])?;
        Ok(())
    }
}
