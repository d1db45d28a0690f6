//! In-process backend over [`XlsxPackage`].

use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use sheet_merge_xlsx::XlsxPackage;

use crate::error::{MergeError, Result};
use crate::session::{Backend, BookId};

/// Merges `.xlsx` files without a spreadsheet application.
///
/// Each workbook is held in memory part by part. A copied sheet brings its
/// cell formats, row heights, column widths, merged ranges, drawings and
/// images. Everything else in the target package is saved as it was read.
/// Sheets with tables, pivot tables, slicers or timelines cannot be copied
/// this way and fail with [`sheet_merge_xlsx::XlsxError::Unsupported`].
#[derive(Debug, Default)]
pub struct NativeBackend {
    books: HashMap<BookId, OpenBook>,
    next_id: u64,
}

#[derive(Debug)]
struct OpenBook {
    path: PathBuf,
    package: XlsxPackage,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, id: BookId) -> Result<&OpenBook> {
        self.books.get(&id).ok_or(MergeError::UnknownBook(id))
    }

    fn book_mut(&mut self, id: BookId) -> Result<&mut OpenBook> {
        self.books.get_mut(&id).ok_or(MergeError::UnknownBook(id))
    }
}

fn ensure_xlsx(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("xlsx") | Some("xlsm") => Ok(()),
        _ => Err(MergeError::UnsupportedFormat(path.to_path_buf())),
    }
}

impl Backend for NativeBackend {
    fn open(&mut self, path: &Path) -> Result<BookId> {
        ensure_xlsx(path)?;
        let package = XlsxPackage::read_file(path)?;
        let sheets = package.worksheet_names()?;
        if sheets.is_empty() {
            return Err(sheet_merge_xlsx::XlsxError::InvalidFormat(format!(
                "{} has no worksheets",
                path.display()
            ))
            .into());
        }

        self.next_id += 1;
        let id = BookId(self.next_id);
        tracing::debug!(
            "Opened {} as book {id} ({} sheets)",
            path.display(),
            sheets.len()
        );
        self.books.insert(
            id,
            OpenBook {
                path: path.to_path_buf(),
                package,
            },
        );
        Ok(id)
    }

    fn sheet_names(&self, book: BookId) -> Result<Vec<String>> {
        Ok(self.book(book)?.package.worksheet_names()?)
    }

    fn copy_sheet_after(
        &mut self,
        source: BookId,
        sheet_index: usize,
        target: BookId,
        after_index: usize,
    ) -> Result<()> {
        let mut target_book = self
            .books
            .remove(&target)
            .ok_or(MergeError::UnknownBook(target))?;

        let copied = match self.books.get(&source) {
            Some(source_book) => {
                target_book
                    .package
                    .copy_worksheet_from(&source_book.package, sheet_index, after_index)
            }
            None if source == target => {
                let snapshot = target_book.package.clone();
                target_book
                    .package
                    .copy_worksheet_from(&snapshot, sheet_index, after_index)
            }
            None => {
                self.books.insert(target, target_book);
                return Err(MergeError::UnknownBook(source));
            }
        };
        self.books.insert(target, target_book);

        let name = copied?;
        tracing::debug!("Copied sheet {sheet_index} of book {source} into book {target} as '{name}'");
        Ok(())
    }

    fn rename_sheet(&mut self, book: BookId, sheet_index: usize, name: &str) -> Result<()> {
        self.book_mut(book)?.package.rename_worksheet(sheet_index, name)?;
        Ok(())
    }

    /// Writes to a temporary file next to `path`, reads it back, and only
    /// then renames it into place, so a failed save never leaves a partial
    /// file behind.
    fn save_as(&mut self, book: BookId, path: &Path) -> Result<()> {
        if !matches!(
            path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
            Some("xlsx")
        ) {
            return Err(MergeError::UnsupportedFormat(path.to_path_buf()));
        }
        let package = &self.book(book)?.package;
        let expected = package.worksheet_names()?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".sheet-merge-")
            .suffix(".xlsx")
            .tempfile_in(dir)?;
        {
            let mut out = BufWriter::new(tmp.as_file_mut());
            package.write(&mut out)?;
            out.flush()?;
        }
        tmp.as_file().sync_all()?;

        let actual = XlsxPackage::read_file(tmp.path())?.worksheet_names()?;
        if actual != expected {
            return Err(MergeError::UnexpectedSheetOrder { expected, actual });
        }
        tmp.persist(path).map_err(|e| MergeError::Io(e.error))?;

        tracing::info!("Saved {} sheets to {}", expected.len(), path.display());
        Ok(())
    }

    fn close_book(&mut self, book: BookId) -> Result<()> {
        let closed = self.books.remove(&book).ok_or(MergeError::UnknownBook(book))?;
        tracing::debug!("Closed book {book} ({})", closed.path.display());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.books.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sheet_merge_core::{Workbook, Worksheet};
    use sheet_merge_xlsx::{XlsxReader, XlsxWriter};

    fn write_book(dir: &Path, file: &str, sheets: &[&str]) -> PathBuf {
        let mut wb = Workbook::empty();
        for name in sheets {
            let mut ws = Worksheet::new(*name);
            ws.set_cell_value("A1", *name).unwrap();
            wb.add_existing_worksheet(ws).unwrap();
        }
        let path = dir.join(file);
        XlsxWriter::write_file(&wb, &path).unwrap();
        path
    }

    #[test]
    fn test_copy_and_rename_between_books() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_book(dir.path(), "a.xlsx", &["S1", "S2"]);
        let b = write_book(dir.path(), "b.xlsx", &["X"]);

        let mut backend = NativeBackend::new();
        let ta = backend.open(&a).unwrap();
        let tb = backend.open(&b).unwrap();
        backend.copy_sheet_after(tb, 0, ta, 0).unwrap();
        backend.rename_sheet(ta, 1, "Copied").unwrap();

        assert_eq!(backend.sheet_names(ta).unwrap(), vec!["S1", "Copied", "S2"]);
        assert_eq!(backend.sheet_names(tb).unwrap(), vec!["X"]);
        assert!(backend.copy_sheet_after(tb, 1, ta, 0).is_err());
    }

    #[test]
    fn test_save_as_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_book(dir.path(), "a.xlsx", &["S1"]);

        let mut backend = NativeBackend::new();
        let book = backend.open(&a).unwrap();
        let out = dir.path().join("out.xlsx");
        backend.save_as(book, &out).unwrap();

        let mut entries: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["a.xlsx", "out.xlsx"]);
        assert_eq!(XlsxReader::read_file(&out).unwrap().sheet_names(), vec!["S1"]);
    }

    /// A one-sheet book with a bold, tall first row and a picture.
    fn write_styled_book(dir: &Path, file: &str) -> PathBuf {
        const REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
        fn rels(entries: &[(&str, &str)]) -> String {
            let mut xml = String::from(
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
            );
            for (i, (kind, target)) in entries.iter().enumerate() {
                xml.push_str(&format!(
                    r#"<Relationship Id="rId{}" Type="{REL}/{kind}" Target="{target}"/>"#,
                    i + 1
                ));
            }
            xml + "</Relationships>"
        }
        let parts: Vec<(&str, String)> = vec![
            (
                "[Content_Types].xml",
                r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="png" ContentType="image/png"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/xl/drawings/drawing1.xml" ContentType="application/vnd.openxmlformats-officedocument.drawing+xml"/></Types>"#.to_string(),
            ),
            ("_rels/.rels", rels(&[("officeDocument", "xl/workbook.xml")])),
            (
                "xl/workbook.xml",
                format!(r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="{REL}"><sheets><sheet name="Styled" sheetId="1" r:id="rId1"/></sheets></workbook>"#),
            ),
            (
                "xl/_rels/workbook.xml.rels",
                rels(&[("worksheet", "worksheets/sheet1.xml"), ("styles", "styles.xml")]),
            ),
            (
                "xl/styles.xml",
                r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/></font><font><b/><sz val="11"/></font></fonts><fills count="1"><fill><patternFill patternType="none"/></fill></fills><borders count="1"><border/></borders><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs></styleSheet>"#.to_string(),
            ),
            (
                "xl/worksheets/sheet1.xml",
                format!(r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="{REL}"><sheetData><row r="1" ht="64" customHeight="1"><c r="A1" s="1" t="inlineStr"><is><t>title</t></is></c></row></sheetData><drawing r:id="rId1"/></worksheet>"#),
            ),
            ("xl/worksheets/_rels/sheet1.xml.rels", rels(&[("drawing", "../drawings/drawing1.xml")])),
            (
                "xl/drawings/drawing1.xml",
                r#"<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing"/>"#.to_string(),
            ),
            ("xl/drawings/_rels/drawing1.xml.rels", rels(&[("image", "../media/image1.png")])),
            ("xl/media/image1.png", "logo".to_string()),
        ];

        let path = dir.join(file);
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        for (name, content) in &parts {
            zip.start_file(*name, zip::write::SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    #[test]
    fn test_saved_target_keeps_formatting_and_pictures() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_styled_book(dir.path(), "a.xlsx");
        let b = write_book(dir.path(), "b.xlsx", &["X"]);

        let mut backend = NativeBackend::new();
        let ta = backend.open(&a).unwrap();
        let tb = backend.open(&b).unwrap();
        backend.copy_sheet_after(tb, 0, ta, 0).unwrap();
        backend.rename_sheet(ta, 1, "Sheet2").unwrap();
        let out = dir.path().join("out.xlsx");
        backend.save_as(ta, &out).unwrap();

        let before = XlsxPackage::read_file(&a).unwrap();
        let after = XlsxPackage::read_file(&out).unwrap();
        assert_eq!(after.worksheet_names().unwrap(), vec!["Styled", "Sheet2"]);
        for part in [
            "xl/styles.xml",
            "xl/worksheets/sheet1.xml",
            "xl/worksheets/_rels/sheet1.xml.rels",
            "xl/drawings/drawing1.xml",
            "xl/drawings/_rels/drawing1.xml.rels",
            "xl/media/image1.png",
        ] {
            assert!(after.part(part).is_some(), "{part} missing");
            assert_eq!(after.part(part), before.part(part), "{part} changed");
        }

        let values = XlsxReader::read_file(&out).unwrap();
        assert_eq!(
            values.worksheet(1).unwrap().get_value("A1").unwrap().as_string(),
            Some("X")
        );
    }

    #[test]
    fn test_copy_within_one_book() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_book(dir.path(), "a.xlsx", &["S1", "S2"]);

        let mut backend = NativeBackend::new();
        let book = backend.open(&a).unwrap();
        backend.copy_sheet_after(book, 0, book, 1).unwrap();
        assert_eq!(backend.sheet_names(book).unwrap(), vec!["S1", "S2", "S1 (2)"]);

        assert!(matches!(
            backend.copy_sheet_after(BookId(9), 0, book, 0),
            Err(MergeError::UnknownBook(BookId(9)))
        ));
        // The target is still open after a failed copy
        assert_eq!(backend.sheet_names(book).unwrap().len(), 3);
    }

    #[test]
    fn test_rejects_other_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = NativeBackend::new();
        assert!(matches!(
            backend.open(&dir.path().join("book.xls")),
            Err(MergeError::UnsupportedFormat(_))
        ));

        let a = write_book(dir.path(), "a.xlsx", &["S1"]);
        let book = backend.open(&a).unwrap();
        assert!(matches!(
            backend.save_as(book, &dir.path().join("out.csv")),
            Err(MergeError::UnsupportedFormat(_))
        ));
        assert!(!dir.path().join("out.csv").exists());
    }

    #[test]
    fn test_unknown_book() {
        let mut backend = NativeBackend::new();
        assert!(matches!(
            backend.close_book(BookId(42)),
            Err(MergeError::UnknownBook(BookId(42)))
        ));
    }
}
