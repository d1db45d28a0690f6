//! Stylesheet (`styles.xml`) merging.
//!
//! A copied sheet refers to formats by index into its own workbook's
//! stylesheet. Bringing it into another workbook means importing every format
//! it uses into the target stylesheet and renumbering the references:
//!
//! - `cellXfs` entries (`s` on cells and rows, `style` on columns), together
//!   with the number format, font, fill and border each one points at
//! - `dxfs` entries (differential formats used by conditional formatting)
//!
//! Entries already present byte-for-byte in the target are reused. Custom
//! number formats are matched by format code and renumbered when new.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use super::xml::{attr, attr_u32, capture_element, edit_first_tag, first_tag, with_attr, AttrEdit, Prolog};
use crate::error::XlsxResult;
use crate::escape::escape_xml;

/// Number format ids below this are built into Excel.
const FIRST_CUSTOM_NUM_FMT: u32 = 164;

/// Child elements of `<styleSheet>` in schema order.
const SCHEMA_ORDER: &[&str] = &[
    "numFmts",
    "fonts",
    "fills",
    "borders",
    "cellStyleXfs",
    "cellXfs",
    "cellStyles",
    "dxfs",
    "tableStyles",
    "colors",
    "extLst",
];

/// The children whose entries are addressed by index.
const LISTS: &[&str] = &[
    "numFmts",
    "fonts",
    "fills",
    "borders",
    "cellStyleXfs",
    "cellXfs",
    "cellStyles",
    "dxfs",
];

/// A parsed stylesheet. Indexed lists are split into their entries; every
/// other child is kept as serialized XML.
#[derive(Debug)]
pub(crate) struct StyleSheet {
    prolog: Prolog,
    root: BytesStart<'static>,
    children: Vec<Child>,
    lists: Vec<List>,
}

#[derive(Debug)]
enum Child {
    List(usize),
    Other { name: String, xml: Vec<u8> },
}

#[derive(Debug)]
struct List {
    name: String,
    start: BytesStart<'static>,
    items: Vec<Vec<u8>>,
}

impl StyleSheet {
    pub fn parse(xml: &[u8]) -> XlsxResult<Self> {
        let mut reader = Reader::from_reader(xml);
        let (prolog, root, empty) = Prolog::read(&mut reader)?;
        let mut sheet = Self {
            prolog,
            root: root.into_owned(),
            children: Vec::new(),
            lists: Vec::new(),
        };
        if empty {
            return Ok(sheet);
        }

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if LISTS.contains(&name.as_str()) {
                        let start = e.into_owned();
                        let items = read_items(&mut reader)?;
                        sheet.push_list(name, start, items);
                    } else {
                        let xml = capture_element(&mut reader, e)?;
                        sheet.children.push(Child::Other { name, xml });
                    }
                }
                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if LISTS.contains(&name.as_str()) {
                        sheet.push_list(name, e.into_owned(), Vec::new());
                    } else {
                        let mut writer = Writer::new(Vec::new());
                        writer.write_event(Event::Empty(e))?;
                        let xml = writer.into_inner();
                        sheet.children.push(Child::Other { name, xml });
                    }
                }
                Event::End(_) | Event::Eof => break,
                _ => {}
            }
        }

        Ok(sheet)
    }

    fn push_list(&mut self, name: String, start: BytesStart<'static>, items: Vec<Vec<u8>>) {
        self.children.push(Child::List(self.lists.len()));
        self.lists.push(List { name, start, items });
    }

    fn items(&self, list: &str) -> &[Vec<u8>] {
        self.lists
            .iter()
            .find(|l| l.name == list)
            .map(|l| l.items.as_slice())
            .unwrap_or(&[])
    }

    fn item(&self, list: &str, index: u32) -> Option<&[u8]> {
        self.items(list).get(index as usize).map(Vec::as_slice)
    }

    /// The entries of `list`, creating the list in schema order if missing.
    fn items_mut(&mut self, list: &str) -> &mut Vec<Vec<u8>> {
        let index = match self.lists.iter().position(|l| l.name == list) {
            Some(index) => index,
            None => {
                let rank = schema_rank(list);
                let at = self
                    .children
                    .iter()
                    .position(|child| schema_rank(self.child_name(child)) > rank)
                    .unwrap_or(self.children.len());
                self.children.insert(at, Child::List(self.lists.len()));
                self.lists.push(List {
                    name: list.to_string(),
                    start: BytesStart::new(list.to_string()),
                    items: Vec::new(),
                });
                self.lists.len() - 1
            }
        };
        &mut self.lists[index].items
    }

    fn child_name<'s>(&'s self, child: &'s Child) -> &'s str {
        match child {
            Child::List(i) => &self.lists[*i].name,
            Child::Other { name, .. } => name,
        }
    }

    /// Index of `item` in `list`, appending it when not already there.
    /// The flag tells whether it was appended.
    fn find_or_push(&mut self, list: &str, item: &[u8]) -> (u32, bool) {
        let items = self.items_mut(list);
        match items.iter().position(|existing| existing == item) {
            Some(index) => (index as u32, false),
            None => {
                items.push(item.to_vec());
                ((items.len() - 1) as u32, true)
            }
        }
    }

    fn num_fmt_code(&self, id: u32) -> XlsxResult<Option<String>> {
        for item in self.items("numFmts") {
            let tag = first_tag(item)?;
            if attr_u32(&tag, b"numFmtId")? == Some(id) {
                return attr(&tag, b"formatCode");
            }
        }
        Ok(None)
    }

    fn num_fmt_id(&self, code: &str) -> XlsxResult<Option<u32>> {
        for item in self.items("numFmts") {
            let tag = first_tag(item)?;
            if attr(&tag, b"formatCode")?.as_deref() == Some(code) {
                return attr_u32(&tag, b"numFmtId");
            }
        }
        Ok(None)
    }

    fn max_num_fmt_id(&self) -> XlsxResult<u32> {
        let mut max = FIRST_CUSTOM_NUM_FMT - 1;
        for item in self.items("numFmts") {
            if let Some(id) = attr_u32(&first_tag(item)?, b"numFmtId")? {
                max = max.max(id);
            }
        }
        Ok(max)
    }

    /// Serialize, with every list's `count` brought up to date.
    pub fn to_xml(&self) -> XlsxResult<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        writer.get_mut().extend_from_slice(self.prolog.bytes());
        writer.write_event(Event::Start(self.root.borrow()))?;

        for child in &self.children {
            match child {
                Child::Other { xml, .. } => writer.get_mut().extend_from_slice(xml),
                Child::List(i) => {
                    let list = &self.lists[*i];
                    let start = with_attr(&list.start, "count", &list.items.len().to_string())?;
                    writer.write_event(Event::Start(start.borrow()))?;
                    for item in &list.items {
                        writer.get_mut().extend_from_slice(item);
                    }
                    writer.write_event(Event::End(start.to_end()))?;
                }
            }
        }

        writer.write_event(Event::End(self.root.to_end()))?;
        Ok(writer.into_inner())
    }
}

fn schema_rank(name: &str) -> usize {
    SCHEMA_ORDER
        .iter()
        .position(|n| *n == name)
        .unwrap_or(SCHEMA_ORDER.len())
}

/// Serialized child elements up to the end of the current element.
fn read_items(reader: &mut Reader<&[u8]>) -> XlsxResult<Vec<Vec<u8>>> {
    let mut items = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) => items.push(capture_element(reader, e)?),
            Event::Empty(e) => {
                let mut writer = Writer::new(Vec::new());
                writer.write_event(Event::Empty(e))?;
                items.push(writer.into_inner());
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    Ok(items)
}

/// Imports formats from one stylesheet into another, remembering what was
/// already brought over.
pub(crate) struct StyleImport<'a> {
    source: Option<&'a StyleSheet>,
    target: StyleSheet,
    mapped: HashMap<(&'static str, u32), u32>,
    changed: bool,
}

impl<'a> StyleImport<'a> {
    /// `source` is `None` when the source workbook has no stylesheet; every
    /// reference then maps to the default format.
    pub fn new(source: Option<&'a StyleSheet>, target: StyleSheet) -> Self {
        Self {
            source,
            target,
            mapped: HashMap::new(),
            changed: false,
        }
    }

    /// The target `cellXfs` index for source cell format `index`.
    pub fn cell_xf(&mut self, index: u32) -> XlsxResult<u32> {
        if let Some(&mapped) = self.mapped.get(&("cellXfs", index)) {
            return Ok(mapped);
        }
        let Some(xf) = self.source.and_then(|s| s.item("cellXfs", index)) else {
            log::debug!("cell format {index} not in the source stylesheet; using the default");
            return Ok(0);
        };

        let tag = first_tag(xf)?;
        let num_fmt = match attr_u32(&tag, b"numFmtId")? {
            Some(id) => Some(self.num_fmt(id)?),
            None => None,
        };
        let font = attr_u32(&tag, b"fontId")?.map(|i| self.import_item("fonts", i));
        let fill = attr_u32(&tag, b"fillId")?.map(|i| self.import_item("fills", i));
        let border = attr_u32(&tag, b"borderId")?.map(|i| self.import_item("borders", i));

        let set = |id: Option<u32>| id.map_or(AttrEdit::Keep, |id| AttrEdit::Set(id.to_string()));
        let rewritten = edit_first_tag(xf, |key, _| match key {
            b"numFmtId" => set(num_fmt),
            b"fontId" => set(font),
            b"fillId" => set(fill),
            b"borderId" => set(border),
            // Cell styles are not carried over; formats fall back to Normal
            b"xfId" => AttrEdit::Set("0".into()),
            _ => AttrEdit::Keep,
        })?;

        let (mapped, added) = self.target.find_or_push("cellXfs", &rewritten);
        self.changed |= added;
        self.mapped.insert(("cellXfs", index), mapped);
        Ok(mapped)
    }

    /// The target `dxfs` index for source differential format `index`.
    pub fn dxf(&mut self, index: u32) -> u32 {
        self.import_item("dxfs", index)
    }

    fn import_item(&mut self, list: &'static str, index: u32) -> u32 {
        if let Some(&mapped) = self.mapped.get(&(list, index)) {
            return mapped;
        }
        let Some(item) = self.source.and_then(|s| s.item(list, index)) else {
            log::debug!("{list} entry {index} not in the source stylesheet; using the default");
            return 0;
        };

        let (mapped, added) = self.target.find_or_push(list, item);
        self.changed |= added;
        self.mapped.insert((list, index), mapped);
        mapped
    }

    fn num_fmt(&mut self, id: u32) -> XlsxResult<u32> {
        if id < FIRST_CUSTOM_NUM_FMT {
            return Ok(id);
        }
        if let Some(&mapped) = self.mapped.get(&("numFmts", id)) {
            return Ok(mapped);
        }
        let code = match self.source {
            Some(source) => source.num_fmt_code(id)?,
            None => None,
        };
        let Some(code) = code else {
            log::debug!("number format {id} not defined in the source stylesheet; using General");
            return Ok(0);
        };

        let mapped = match self.target.num_fmt_id(&code)? {
            Some(existing) => existing,
            None => {
                let new_id = self.target.max_num_fmt_id()? + 1;
                let item = format!(
                    r#"<numFmt numFmtId="{new_id}" formatCode="{}"/>"#,
                    escape_xml(&code)
                );
                self.target.items_mut("numFmts").push(item.into_bytes());
                self.changed = true;
                new_id
            }
        };
        self.mapped.insert(("numFmts", id), mapped);
        Ok(mapped)
    }

    /// The merged stylesheet, or `None` when nothing had to be added.
    pub fn finish(self) -> Option<StyleSheet> {
        self.changed.then_some(self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TARGET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts>
<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>
<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>
<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
<cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs>
<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>
</styleSheet>"#;

    const SOURCE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<numFmts count="1"><numFmt numFmtId="170" formatCode="0.000&quot;kg&quot;"/></numFmts>
<fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="14"/><name val="Calibri"/></font></fonts>
<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>
<borders count="2"><border><left/><right/><top/><bottom/><diagonal/></border><border><left style="thick"/><right style="thick"/><top style="thick"/><bottom style="thick"/><diagonal/></border></borders>
<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
<cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="170" fontId="1" fillId="0" borderId="1" xfId="0" applyFont="1" applyBorder="1"><alignment horizontal="center"/></xf></cellXfs>
<dxfs count="1"><dxf><font><color rgb="FF9C0006"/></font></dxf></dxfs>
</styleSheet>"#;

    #[test]
    fn test_import_cell_format() {
        let source = StyleSheet::parse(SOURCE.as_bytes()).unwrap();
        let target = StyleSheet::parse(TARGET.as_bytes()).unwrap();
        let mut import = StyleImport::new(Some(&source), target);

        // The default format is already present
        assert_eq!(import.cell_xf(0).unwrap(), 0);
        assert_eq!(import.cell_xf(1).unwrap(), 1);
        assert_eq!(import.cell_xf(1).unwrap(), 1);
        assert_eq!(import.dxf(0), 0);
        // Unknown indices fall back to the default
        assert_eq!(import.cell_xf(9).unwrap(), 0);

        let merged = import.finish().unwrap();
        assert_eq!(merged.items("fonts").len(), 2);
        assert_eq!(merged.items("borders").len(), 2);
        assert_eq!(merged.num_fmt_code(164).unwrap().as_deref(), Some("0.000\"kg\""));
        assert_eq!(
            String::from_utf8_lossy(merged.item("cellXfs", 1).unwrap()),
            r#"<xf numFmtId="164" fontId="1" fillId="0" borderId="1" xfId="0" applyFont="1" applyBorder="1"><alignment horizontal="center"/></xf>"#
        );

        // Missing lists are created in schema order and counts are rewritten
        let xml = String::from_utf8(merged.to_xml().unwrap()).unwrap();
        let order: Vec<usize> = ["<numFmts", "<fonts", "<cellXfs", "<cellStyles", "<dxfs"]
            .iter()
            .map(|tag| xml.find(tag).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{xml}");
        assert!(xml.contains(r#"<fonts count="2">"#), "{xml}");
        assert!(xml.contains(r#"<numFmts count="1">"#), "{xml}");

        let reparsed = StyleSheet::parse(xml.as_bytes()).unwrap();
        assert_eq!(reparsed.items("cellXfs").len(), 2);
        assert_eq!(reparsed.items("dxfs").len(), 1);
    }

    #[test]
    fn test_nothing_to_import() {
        let source = StyleSheet::parse(TARGET.as_bytes()).unwrap();
        let target = StyleSheet::parse(TARGET.as_bytes()).unwrap();
        let mut import = StyleImport::new(Some(&source), target);
        assert_eq!(import.cell_xf(0).unwrap(), 0);
        assert!(import.finish().is_none());

        let mut import = StyleImport::new(None, StyleSheet::parse(TARGET.as_bytes()).unwrap());
        assert_eq!(import.cell_xf(3).unwrap(), 0);
        assert!(import.finish().is_none());
    }
}
