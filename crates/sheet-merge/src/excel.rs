//! Backend that drives Excel through the COM bridge process.

use std::path::Path;

use sheet_merge_excel::{BridgeError, ExcelBridge, ExcelBridgeConfig, SheetRef};

use crate::error::Result;
use crate::session::{Backend, BookId};

/// Runs every operation in a hidden Excel instance.
///
/// Excel performs the copy itself, so copied sheets keep everything Excel
/// preserves (styles, charts, defined names).
pub struct ExcelBackend {
    bridge: Option<ExcelBridge>,
}

impl ExcelBackend {
    /// Launch the bridge process and Excel.
    pub fn start(config: ExcelBridgeConfig) -> Result<Self> {
        let bridge = ExcelBridge::start(config)?;
        Ok(Self {
            bridge: Some(bridge),
        })
    }

    fn bridge(&self) -> std::result::Result<&ExcelBridge, BridgeError> {
        self.bridge.as_ref().ok_or(BridgeError::NotRunning)
    }
}

fn sheet_ref(index: usize) -> Result<SheetRef> {
    let index = u32::try_from(index)
        .map_err(|_| sheet_merge_core::Error::SheetOutOfBounds(index, u32::MAX as usize))?;
    Ok(SheetRef::Index(index))
}

impl Backend for ExcelBackend {
    fn open(&mut self, path: &Path) -> Result<BookId> {
        let workbook = self.bridge()?.open_workbook(path)?;
        Ok(BookId(workbook.handle()))
    }

    fn sheet_names(&self, book: BookId) -> Result<Vec<String>> {
        Ok(self.bridge()?.workbook(book.0).sheet_names()?)
    }

    fn copy_sheet_after(
        &mut self,
        source: BookId,
        sheet_index: usize,
        target: BookId,
        after_index: usize,
    ) -> Result<()> {
        let bridge = self.bridge()?;
        bridge.workbook(source.0).copy_sheet_after(
            sheet_ref(sheet_index)?,
            &bridge.workbook(target.0),
            sheet_ref(after_index)?,
        )?;
        Ok(())
    }

    fn rename_sheet(&mut self, book: BookId, sheet_index: usize, name: &str) -> Result<()> {
        self.bridge()?
            .workbook(book.0)
            .rename_sheet(sheet_ref(sheet_index)?, name)?;
        Ok(())
    }

    fn save_as(&mut self, book: BookId, path: &Path) -> Result<()> {
        self.bridge()?.workbook(book.0).save(path)?;
        Ok(())
    }

    fn close_book(&mut self, book: BookId) -> Result<()> {
        self.bridge()?.workbook(book.0).close()?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(bridge) = self.bridge.take() {
            bridge.shutdown()?;
        }
        Ok(())
    }
}
