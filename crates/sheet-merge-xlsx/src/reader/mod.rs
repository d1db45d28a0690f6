//! XLSX reader

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use zip::ZipArchive;

use crate::error::{XlsxError, XlsxResult};
use crate::escape::decode_excel_escapes;
use crate::package::rels::{rels_for_part, resolve_target};
use sheet_merge_core::{
    CellAddress, CellError, CellRange, CellValue, Workbook, Worksheet, MAX_COLS,
};

mod shared;

use shared::SharedFormulas;

const REL_OFFICE_DOCUMENT: &str = "/officeDocument";
const REL_WORKSHEET: &str = "/worksheet";
const REL_SHARED_STRINGS: &str = "/sharedStrings";

/// Widest `<col min max>` span expanded into per-column widths. Wider spans
/// are whole-sheet formatting records, not real widths.
const MAX_COLUMN_SPAN: u32 = 1024;

/// A relationship from a `.rels` part, with its target resolved to a package path.
#[derive(Debug, Clone)]
struct Relationship {
    rel_type: String,
    target: String,
}

/// XLSX file reader
pub struct XlsxReader;

impl XlsxReader {
    /// Read a workbook from a file path
    pub fn read_file<P: AsRef<Path>>(path: P) -> XlsxResult<Workbook> {
        let file = File::open(path)?;
        Self::read(BufReader::new(file))
    }

    /// Read a workbook from a reader
    pub fn read<R: Read + Seek>(reader: R) -> XlsxResult<Workbook> {
        let mut archive = ZipArchive::new(reader)?;

        if archive.by_name("[Content_Types].xml").is_err() {
            return Err(XlsxError::InvalidFormat(
                "Missing [Content_Types].xml".into(),
            ));
        }

        let workbook_path = Self::find_workbook_part(&mut archive)?;
        let workbook_rels = Self::read_rels(&mut archive, &workbook_path)?;

        let shared_strings_path = workbook_rels
            .values()
            .find(|rel| rel.rel_type.ends_with(REL_SHARED_STRINGS))
            .map(|rel| rel.target.clone())
            .unwrap_or_else(|| "xl/sharedStrings.xml".to_string());
        let shared_strings = Self::read_shared_strings(&mut archive, &shared_strings_path)?;

        let sheet_info = Self::read_workbook_xml(&mut archive, &workbook_path)?;

        let mut workbook = Workbook::empty();
        for (name, r_id) in sheet_info {
            let Some(rel) = workbook_rels.get(&r_id) else {
                log::warn!("sheet '{name}' references unknown relationship {r_id}; skipped");
                continue;
            };
            if !rel.rel_type.ends_with(REL_WORKSHEET) {
                log::warn!("sheet '{name}' is not a worksheet ({}); skipped", rel.rel_type);
                continue;
            }

            let mut sheet = Worksheet::new(name);
            Self::read_worksheet(&mut archive, &rel.target, &mut sheet, &shared_strings)?;
            log::debug!(
                "read sheet '{}' from {} ({} cells)",
                sheet.name(),
                rel.target,
                sheet.cell_count()
            );
            workbook.add_existing_worksheet(sheet)?;
        }

        if workbook.is_empty() {
            return Err(XlsxError::InvalidFormat("workbook has no worksheets".into()));
        }

        Ok(workbook)
    }

    /// Locate the main workbook part through the package relationships.
    fn find_workbook_part<R: Read + Seek>(archive: &mut ZipArchive<R>) -> XlsxResult<String> {
        let root_rels = Self::read_rels(archive, "")?;
        Ok(root_rels
            .into_values()
            .find(|rel| rel.rel_type.ends_with(REL_OFFICE_DOCUMENT))
            .map(|rel| rel.target)
            .unwrap_or_else(|| "xl/workbook.xml".to_string()))
    }

    /// Read the relationships of `part` (`""` for the package root).
    ///
    /// A missing `.rels` part is not an error; it simply has no relationships.
    fn read_rels<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        part: &str,
    ) -> XlsxResult<HashMap<String, Relationship>> {
        let rels_path = rels_for_part(part);

        let mut rels = HashMap::new();
        let file = match archive.by_name(&rels_path) {
            Ok(f) => f,
            Err(_) => return Ok(rels),
        };

        let mut xml_reader = Reader::from_reader(BufReader::new(file));
        let mut buf = Vec::new();

        loop {
            match xml_reader.read_event_into(&mut buf) {
                Ok(Event::Empty(e)) | Ok(Event::Start(e))
                    if e.local_name().as_ref() == b"Relationship" =>
                {
                    let id = attr_value(&e, b"Id");
                    let rel_type = attr_value(&e, b"Type");
                    let target = attr_value(&e, b"Target");
                    let external = attr_value(&e, b"TargetMode").as_deref() == Some("External");

                    if let (Some(id), Some(rel_type), Some(target)) = (id, rel_type, target) {
                        if !external {
                            let target = resolve_target(part, &target);
                            rels.insert(id, Relationship { rel_type, target });
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(XlsxError::Xml(e)),
                _ => {}
            }
            buf.clear();
        }

        Ok(rels)
    }

    /// Read the shared strings table; rich-text runs are concatenated and
    /// phonetic runs (`<rPh>`) dropped.
    fn read_shared_strings<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        path: &str,
    ) -> XlsxResult<Vec<String>> {
        let mut strings = Vec::new();

        let file = match archive.by_name(path) {
            Ok(f) => f,
            Err(_) => return Ok(strings),
        };

        let mut xml_reader = Reader::from_reader(BufReader::new(file));
        let mut buf = Vec::new();
        let mut current = String::new();
        let mut in_si = false;
        let mut in_t = false;
        let mut in_phonetic = false;

        loop {
            match xml_reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"si" => {
                        in_si = true;
                        current.clear();
                    }
                    b"rPh" => in_phonetic = true,
                    b"t" if in_si && !in_phonetic => in_t = true,
                    _ => {}
                },
                Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                    strings.push(String::new());
                }
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"si" => {
                        strings.push(decode_excel_escapes(&current));
                        in_si = false;
                    }
                    b"rPh" => in_phonetic = false,
                    b"t" => in_t = false,
                    _ => {}
                },
                Ok(Event::Text(e)) if in_t => current.push_str(&e.unescape()?),
                Ok(Event::CData(e)) if in_t => {
                    current.push_str(&String::from_utf8_lossy(&e.into_inner()))
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(XlsxError::Xml(e)),
                _ => {}
            }
            buf.clear();
        }

        Ok(strings)
    }

    /// Read workbook.xml to get sheet names and relationship ids, in tab order
    fn read_workbook_xml<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        path: &str,
    ) -> XlsxResult<Vec<(String, String)>> {
        let file = archive
            .by_name(path)
            .map_err(|_| XlsxError::MissingPart(path.to_string()))?;

        let mut xml_reader = Reader::from_reader(BufReader::new(file));
        let mut buf = Vec::new();
        let mut sheets = Vec::new();

        loop {
            match xml_reader.read_event_into(&mut buf) {
                Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.local_name().as_ref() == b"sheet" => {
                    match (attr_value(&e, b"name"), attr_value(&e, b"id")) {
                        (Some(name), Some(r_id)) => sheets.push((name, r_id)),
                        _ => {
                            return Err(XlsxError::Parse(
                                "<sheet> element without name or r:id".into(),
                            ))
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(XlsxError::Xml(e)),
                _ => {}
            }
            buf.clear();
        }

        Ok(sheets)
    }

    /// Read one worksheet part into `sheet`
    fn read_worksheet<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        path: &str,
        sheet: &mut Worksheet,
        shared_strings: &[String],
    ) -> XlsxResult<()> {
        let file = archive
            .by_name(path)
            .map_err(|_| XlsxError::MissingPart(path.to_string()))?;

        let mut xml_reader = Reader::from_reader(BufReader::new(file));
        let mut buf = Vec::new();

        let mut row: u32 = 0;
        let mut next_col: u16 = 0;
        let mut cell: Option<PendingCell> = None;
        let mut capture: Option<Capture> = None;
        let mut shared = SharedFormulas::default();

        loop {
            match xml_reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"row" => {
                        row = row_number(&e, row)?;
                        next_col = 0;
                    }
                    b"c" => {
                        let pending = PendingCell::start(&e, row, next_col)?;
                        next_col = pending.col.saturating_add(1);
                        cell = Some(pending);
                    }
                    b"v" if cell.is_some() => capture = Some(Capture::Value),
                    b"f" => {
                        if let Some(pending) = cell.as_mut() {
                            pending.shared_index = shared_index(&e);
                            capture = Some(Capture::Formula);
                        }
                    }
                    b"t" if cell.is_some() => capture = Some(Capture::Inline),
                    b"col" => read_column_widths(&e, sheet),
                    _ => {}
                },
                Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"row" => row = row_number(&e, row)?.saturating_add(1),
                    // Style-only cell: nothing to copy, but it still occupies a column
                    b"c" => {
                        let pending = PendingCell::start(&e, row, next_col)?;
                        next_col = pending.col.saturating_add(1);
                    }
                    // Shared-formula dependent
                    b"f" => {
                        if let Some(pending) = cell.as_mut() {
                            pending.shared_index = shared_index(&e);
                        }
                    }
                    b"col" => read_column_widths(&e, sheet),
                    b"mergeCell" => {
                        if let Some(r) = attr_value(&e, b"ref") {
                            sheet.merge_cells(&CellRange::parse(&r)?)?;
                        }
                    }
                    _ => {}
                },
                Ok(Event::Text(e)) => {
                    if let (Some(target), Some(pending)) = (capture, cell.as_mut()) {
                        pending.push_text(target, &e.unescape()?);
                    }
                }
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"v" | b"f" | b"t" => capture = None,
                    b"c" => {
                        if let Some(mut pending) = cell.take() {
                            shared.resolve(&mut pending);
                            let (r, c) = (pending.row, pending.col);
                            if let Some(value) = pending.finish(shared_strings)? {
                                sheet.set_cell_value_at(r, c, value)?;
                            }
                        }
                    }
                    b"row" => row = row.saturating_add(1),
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => return Err(XlsxError::Xml(e)),
                _ => {}
            }
            buf.clear();
        }

        Ok(())
    }
}

/// Which text node inside `<c>` is being collected
#[derive(Debug, Clone, Copy)]
enum Capture {
    Value,
    Formula,
    Inline,
}

/// A `<c>` element being assembled from its children
#[derive(Debug)]
struct PendingCell {
    row: u32,
    col: u16,
    cell_type: Option<String>,
    value: String,
    formula: String,
    inline: String,
    /// `si` of a `<f t="shared">`
    shared_index: Option<u32>,
}

impl PendingCell {
    fn start(e: &BytesStart<'_>, row: u32, next_col: u16) -> XlsxResult<Self> {
        let (row, col) = match attr_value(e, b"r") {
            Some(r) => {
                let addr = CellAddress::parse(&r)?;
                (addr.row, addr.col)
            }
            None => (row, next_col),
        };
        Ok(Self {
            row,
            col,
            cell_type: attr_value(e, b"t"),
            value: String::new(),
            formula: String::new(),
            inline: String::new(),
            shared_index: None,
        })
    }

    fn push_text(&mut self, target: Capture, text: &str) {
        match target {
            Capture::Value => self.value.push_str(text),
            Capture::Formula => self.formula.push_str(text),
            Capture::Inline => self.inline.push_str(text),
        }
    }

    /// Turn the collected text into a value; `None` for cells with nothing to keep.
    fn finish(self, shared_strings: &[String]) -> XlsxResult<Option<CellValue>> {
        let value = match self.cell_type.as_deref() {
            Some("s") => {
                let index: usize = self.value.trim().parse().map_err(|_| {
                    XlsxError::Parse(format!("invalid shared string index '{}'", self.value))
                })?;
                let s = shared_strings.get(index).ok_or_else(|| {
                    XlsxError::Parse(format!("shared string index {index} out of range"))
                })?;
                Some(CellValue::String(s.clone()))
            }
            Some("inlineStr") => Some(CellValue::String(decode_excel_escapes(&self.inline))),
            Some("str") => Some(CellValue::String(decode_excel_escapes(&self.value))),
            Some("b") => Some(CellValue::Boolean(self.value.trim() == "1")),
            Some("e") => Some(CellValue::Error(
                CellError::parse(&self.value).unwrap_or(CellError::Value),
            )),
            Some("d") => Some(CellValue::Date(self.value.trim().to_string())),
            _ if self.value.trim().is_empty() => None,
            _ => {
                let n: f64 = self.value.trim().parse().map_err(|_| {
                    XlsxError::Parse(format!("invalid number '{}'", self.value))
                })?;
                Some(CellValue::Number(n))
            }
        };

        // A shared-formula dependent whose master was never seen keeps its cached value
        if self.formula.is_empty() {
            return Ok(value);
        }

        Ok(Some(CellValue::Formula {
            text: self.formula,
            cached_value: value.map(Box::new),
        }))
    }
}

/// Attribute lookup by local name (`r:id` matches `id`)
fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn shared_index(e: &BytesStart<'_>) -> Option<u32> {
    if attr_value(e, b"t").as_deref() != Some("shared") {
        return None;
    }
    attr_value(e, b"si").and_then(|si| si.trim().parse().ok())
}

/// The 0-based row of a `<row>` element, defaulting to the running row.
fn row_number(e: &BytesStart<'_>, current: u32) -> XlsxResult<u32> {
    match attr_value(e, b"r") {
        Some(r) => {
            let n: u32 = r
                .trim()
                .parse()
                .map_err(|_| XlsxError::Parse(format!("invalid row number '{r}'")))?;
            n.checked_sub(1)
                .ok_or_else(|| XlsxError::Parse("row number 0".into()))
        }
        None => Ok(current),
    }
}

fn read_column_widths(e: &BytesStart<'_>, sheet: &mut Worksheet) {
    let column = |key: &[u8]| attr_value(e, key).and_then(|v| v.trim().parse::<u16>().ok());
    let width = attr_value(e, b"width").and_then(|v| v.trim().parse::<f64>().ok());

    let (Some(min), Some(max), Some(width)) = (column(b"min"), column(b"max"), width) else {
        return;
    };
    if min == 0 || max < min || max > MAX_COLS || u32::from(max - min) >= MAX_COLUMN_SPAN {
        log::debug!("ignoring column width record for columns {min}..={max}");
        return;
    }

    for col in min..=max {
        sheet.set_column_width(col - 1, width);
    }
}
