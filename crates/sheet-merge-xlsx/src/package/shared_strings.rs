//! Shared string table (`sharedStrings.xml`) merging.
//!
//! Entries are moved as serialized `<si>` elements so rich-text runs and
//! phonetic hints survive the copy.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use super::xml::{attr_u32, capture_element, edit_attributes, AttrEdit, Prolog};
use crate::error::{XlsxError, XlsxResult};

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

#[derive(Debug)]
pub(crate) struct SharedStrings {
    prolog: Prolog,
    root: BytesStart<'static>,
    items: Vec<Vec<u8>>,
    /// Number of `t="s"` cells referring to the table
    references: u64,
    index: HashMap<Vec<u8>, u32>,
}

impl SharedStrings {
    pub fn parse(xml: &[u8]) -> XlsxResult<Self> {
        let mut reader = Reader::from_reader(xml);
        let (prolog, root, empty) = Prolog::read(&mut reader)?;
        let references = attr_u32(&root, b"count")?.map(u64::from);
        let mut items = Vec::new();

        if !empty {
            loop {
                match reader.read_event()? {
                    Event::Start(e) if e.local_name().as_ref() == b"si" => {
                        items.push(capture_element(&mut reader, e)?);
                    }
                    Event::Empty(e) if e.local_name().as_ref() == b"si" => {
                        let mut writer = Writer::new(Vec::new());
                        writer.write_event(Event::Empty(e))?;
                        items.push(writer.into_inner());
                    }
                    Event::Start(e) => {
                        // extLst and other extensions are not string entries
                        capture_element(&mut reader, e)?;
                    }
                    Event::End(_) | Event::Eof => break,
                    _ => {}
                }
            }
        }

        let index = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.clone(), i as u32))
            .collect();
        Ok(Self {
            prolog,
            root: root.into_owned(),
            references: references.unwrap_or(items.len() as u64),
            items,
            index,
        })
    }

    /// An empty table for a workbook that has none yet.
    pub fn new() -> Self {
        let mut root = BytesStart::new("sst");
        root.push_attribute(("xmlns", NS_MAIN));
        Self {
            prolog: Prolog::standard(),
            root,
            items: Vec::new(),
            references: 0,
            index: HashMap::new(),
        }
    }

    fn item(&self, index: u32) -> Option<&[u8]> {
        self.items.get(index as usize).map(Vec::as_slice)
    }

    /// Index of `item`, appending it when not already there.
    fn find_or_push(&mut self, item: &[u8]) -> u32 {
        if let Some(&existing) = self.index.get(item) {
            return existing;
        }
        let index = self.items.len() as u32;
        self.items.push(item.to_vec());
        self.index.insert(item.to_vec(), index);
        index
    }

    pub fn to_xml(&self) -> XlsxResult<Vec<u8>> {
        let references = self.references.to_string();
        let unique = self.items.len().to_string();
        let root = edit_attributes(
            &self.root,
            |key, _| match key {
                b"count" | b"uniqueCount" => AttrEdit::Drop,
                _ => AttrEdit::Keep,
            },
            &[("count", references.as_str()), ("uniqueCount", unique.as_str())],
        )?;

        let mut writer = Writer::new(Vec::new());
        writer.get_mut().extend_from_slice(self.prolog.bytes());
        writer.write_event(Event::Start(root.borrow()))?;
        for item in &self.items {
            writer.get_mut().extend_from_slice(item);
        }
        writer.write_event(Event::End(root.to_end()))?;
        Ok(writer.into_inner())
    }
}

/// Imports the strings a copied sheet refers to.
pub(crate) struct StringImport<'a> {
    source: Option<&'a SharedStrings>,
    /// `None` until the first string is imported into a workbook without a table
    target: Option<SharedStrings>,
    mapped: HashMap<u32, u32>,
    changed: bool,
}

impl<'a> StringImport<'a> {
    pub fn new(source: Option<&'a SharedStrings>, target: Option<SharedStrings>) -> Self {
        Self {
            source,
            target,
            mapped: HashMap::new(),
            changed: false,
        }
    }

    /// The target index for one `t="s"` cell holding source index `index`.
    pub fn string(&mut self, index: u32) -> XlsxResult<u32> {
        let item = self
            .source
            .and_then(|s| s.item(index))
            .ok_or_else(|| XlsxError::Parse(format!("shared string index {index} out of range")))?;

        let target = self.target.get_or_insert_with(SharedStrings::new);
        target.references += 1;
        self.changed = true;

        if let Some(&mapped) = self.mapped.get(&index) {
            return Ok(mapped);
        }
        let mapped = target.find_or_push(item);
        self.mapped.insert(index, mapped);
        Ok(mapped)
    }

    /// The merged table, or `None` when the sheet had no shared strings.
    pub fn finish(self) -> Option<SharedStrings> {
        if self.changed {
            self.target
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_import_strings() {
        let source = SharedStrings::parse(
            br#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="3" uniqueCount="2"><si><t>shared</t></si><si><r><rPr><b/></rPr><t>bold</t></r></si></sst>"#,
        )
        .unwrap();
        let target = SharedStrings::parse(
            br#"<?xml version="1.0"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="1" uniqueCount="1"><si><t>shared</t></si></sst>"#,
        )
        .unwrap();

        let mut import = StringImport::new(Some(&source), Some(target));
        assert_eq!(import.string(1).unwrap(), 1);
        assert_eq!(import.string(0).unwrap(), 0);
        assert_eq!(import.string(1).unwrap(), 1);
        assert!(import.string(5).is_err());

        let merged = import.finish().unwrap();
        let xml = String::from_utf8(merged.to_xml().unwrap()).unwrap();
        assert!(xml.contains(r#"count="4" uniqueCount="2""#), "{xml}");
        assert!(xml.ends_with("<si><r><rPr><b/></rPr><t>bold</t></r></si></sst>"), "{xml}");
    }

    #[test]
    fn test_import_into_workbook_without_table() {
        let source = SharedStrings::parse(br#"<sst><si><t>only</t></si></sst>"#).unwrap();
        let mut import = StringImport::new(Some(&source), None);
        assert_eq!(import.string(0).unwrap(), 0);

        let xml = String::from_utf8(import.finish().unwrap().to_xml().unwrap()).unwrap();
        assert!(xml.starts_with("<?xml"), "{xml}");
        assert!(xml.contains("<si><t>only</t></si>"), "{xml}");

        assert!(StringImport::new(Some(&source), None).finish().is_none());
    }
}
