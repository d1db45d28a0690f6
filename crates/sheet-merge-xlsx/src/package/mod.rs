//! Package-level editing of `.xlsx` files.
//!
//! [`XlsxPackage`] holds every part of a workbook as bytes. Copying a
//! worksheet in adds the sheet part and everything it links to (drawings,
//! images, comments, printer settings), imports the formats and shared
//! strings it refers to, and registers the new sheet in the workbook. All
//! other parts are written back exactly as they were read.

mod content_types;
pub(crate) mod rels;
mod shared_strings;
mod sheet_xml;
mod styles;
mod workbook_xml;
mod xml;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{XlsxError, XlsxResult};
use crate::writer::STYLES_XML;
use content_types::{ContentTypes, CONTENT_TYPES_PART, CT_SHARED_STRINGS, CT_STYLES};
use rels::{rels_for_part, relative_target, resolve_target, Relationship};
use shared_strings::{SharedStrings, StringImport};
use sheet_merge_core::{unique_sheet_name, validate_sheet_name, Error as CoreError};
use styles::{StyleImport, StyleSheet};

const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Sheet relationships whose parts are named or indexed workbook-wide and
/// cannot simply be duplicated.
const WORKBOOK_SCOPED: &[&str] = &["table", "pivotTable", "slicer", "timeline"];

/// An `.xlsx` package held in memory part by part.
#[derive(Debug, Clone)]
pub struct XlsxPackage {
    /// Part names in archive order
    order: Vec<String>,
    parts: HashMap<String, Vec<u8>>,
    workbook_part: String,
}

/// A `<sheet>` entry resolved through the workbook relationships.
#[derive(Debug, Clone)]
struct SheetInfo {
    name: String,
    /// Position among all sheets, worksheets or not
    position: usize,
    sheet_id: u32,
    rel: Option<Relationship>,
    part: Option<String>,
}

impl SheetInfo {
    fn is_worksheet(&self) -> bool {
        self.rel.as_ref().is_some_and(|rel| rel.is("worksheet"))
    }
}

impl XlsxPackage {
    /// Read a package from a file path
    pub fn read_file<P: AsRef<Path>>(path: P) -> XlsxResult<Self> {
        let file = File::open(path)?;
        Self::read(BufReader::new(file))
    }

    /// Read every part of a package
    pub fn read<R: Read + Seek>(reader: R) -> XlsxResult<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut order = Vec::with_capacity(archive.len());
        let mut parts = HashMap::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut bytes = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut bytes)?;
            order.push(name.clone());
            parts.insert(name, bytes);
        }

        if !parts.contains_key(CONTENT_TYPES_PART) {
            return Err(XlsxError::InvalidFormat(
                "Missing [Content_Types].xml".into(),
            ));
        }

        let mut package = Self {
            order,
            parts,
            workbook_part: String::new(),
        };
        package.workbook_part = package
            .rels_of("")?
            .into_iter()
            .find(|rel| rel.is("officeDocument") && !rel.external)
            .map(|rel| resolve_target("", &rel.target))
            .unwrap_or_else(|| "xl/workbook.xml".to_string());
        package.required(&package.workbook_part)?;

        log::debug!(
            "read xlsx package with {} parts (workbook at {})",
            package.order.len(),
            package.workbook_part
        );
        Ok(package)
    }

    /// Write the package to a file path
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> XlsxResult<()> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        self.write(&mut out)?;
        out.flush()?;
        Ok(())
    }

    /// Write every part, in the order they were read, new parts last.
    pub fn write<W: Write + Seek>(&self, writer: W) -> XlsxResult<()> {
        let mut zip = ZipWriter::new(writer);
        for name in &self.order {
            if let Some(bytes) = self.parts.get(name) {
                zip.start_file(name.as_str(), SimpleFileOptions::default())?;
                zip.write_all(bytes)?;
            }
        }
        zip.finish()?;
        Ok(())
    }

    /// Part names in archive order.
    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// The bytes of one part.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts.get(name).map(Vec::as_slice)
    }

    /// Worksheet names in tab order. Chart sheets and other non-worksheet
    /// sheets are not listed.
    pub fn worksheet_names(&self) -> XlsxResult<Vec<String>> {
        Ok(self
            .sheets()?
            .into_iter()
            .filter(SheetInfo::is_worksheet)
            .map(|s| s.name)
            .collect())
    }

    /// Copy worksheet `sheet_index` of `source` to just after worksheet
    /// `after_index` of this package. Returns the copy's name, which is the
    /// source name made unique the way Excel does it.
    ///
    /// Nothing is changed when an error is returned.
    pub fn copy_worksheet_from(
        &mut self,
        source: &XlsxPackage,
        sheet_index: usize,
        after_index: usize,
    ) -> XlsxResult<String> {
        let source_sheets: Vec<SheetInfo> = source
            .sheets()?
            .into_iter()
            .filter(SheetInfo::is_worksheet)
            .collect();
        let sheet = source_sheets
            .get(sheet_index)
            .ok_or(CoreError::SheetOutOfBounds(sheet_index, source_sheets.len()))?;
        let sheet_part = sheet
            .part
            .clone()
            .ok_or_else(|| XlsxError::MissingPart(format!("worksheet '{}'", sheet.name)))?;
        source.required(&sheet_part)?;

        let sheets = self.sheets()?;
        let worksheets: Vec<&SheetInfo> = sheets.iter().filter(|s| s.is_worksheet()).collect();
        let after = worksheets
            .get(after_index)
            .ok_or(CoreError::SheetOutOfBounds(after_index, worksheets.len()))?;
        let position = after.position + 1;

        // New names for the sheet part and everything it links to
        let copied = source.sheet_parts(&sheet.name, &sheet_part)?;
        let mut taken: HashSet<String> = self.parts.keys().map(|n| n.to_ascii_lowercase()).collect();
        let renamed: HashMap<String, String> = copied
            .iter()
            .map(|part| (part.clone(), free_part_name(part, &mut taken)))
            .collect();
        let new_sheet_part = renamed
            .get(&sheet_part)
            .cloned()
            .ok_or_else(|| XlsxError::MissingPart(sheet_part.clone()))?;

        let source_styles = source.style_sheet()?;
        let styles_part = self.related_part(&self.workbook_part, "styles")?;
        let target_styles = match &styles_part {
            Some(part) => StyleSheet::parse(self.required(part)?)?,
            None => StyleSheet::parse(STYLES_XML.as_bytes())?,
        };
        let mut styles = StyleImport::new(source_styles.as_ref(), target_styles);

        let source_strings = source.shared_strings()?;
        let strings_part = self.related_part(&self.workbook_part, "sharedStrings")?;
        let target_strings = match &strings_part {
            Some(part) => Some(SharedStrings::parse(self.required(part)?)?),
            None => None,
        };
        let mut strings = StringImport::new(source_strings.as_ref(), target_strings);

        let source_types = ContentTypes::parse(source.required(CONTENT_TYPES_PART)?)?;
        let mut types = ContentTypes::parse(self.required(CONTENT_TYPES_PART)?)?;
        let mut workbook_rels = self.rels_of(&self.workbook_part)?;
        let mut staged: Vec<(String, Vec<u8>)> = Vec::new();

        for old in &copied {
            let Some(new) = renamed.get(old) else {
                continue;
            };
            let bytes = source.required(old)?;
            let bytes = if *old == sheet_part {
                sheet_xml::rewrite_worksheet(bytes, &mut styles, &mut strings)?
            } else {
                bytes.to_vec()
            };
            staged.push((new.clone(), bytes));

            let part_rels: Vec<Relationship> = source
                .rels_of(old)?
                .into_iter()
                .map(|mut rel| {
                    if !rel.external {
                        if let Some(target) = renamed.get(&resolve_target(old, &rel.target)) {
                            rel.target = relative_target(new, target);
                        }
                    }
                    rel
                })
                .collect();
            if !part_rels.is_empty() {
                staged.push((rels_for_part(new), rels::to_xml(&part_rels)));
            }

            types.copy_type(&source_types, old, new);
        }

        let name = unique_sheet_name(sheets.iter().map(|s| s.name.as_str()), &sheet.name);
        let r_id = rels::next_id(&workbook_rels);
        workbook_rels.push(Relationship {
            id: r_id.clone(),
            rel_type: sheet
                .rel
                .as_ref()
                .map(|rel| rel.rel_type.clone())
                .unwrap_or_else(|| format!("{NS_REL}/worksheet")),
            target: relative_target(&self.workbook_part, &new_sheet_part),
            external: false,
        });
        let sheet_id = sheets.iter().map(|s| s.sheet_id).max().unwrap_or(0) + 1;
        let workbook = workbook_xml::insert_sheet(
            self.required(&self.workbook_part)?,
            position,
            &name,
            sheet_id,
            &r_id,
        )?;
        staged.push((self.workbook_part.clone(), workbook));

        if let Some(merged) = styles.finish() {
            let part = match styles_part {
                Some(part) => part,
                None => self.add_workbook_part(
                    "styles.xml",
                    "styles",
                    CT_STYLES,
                    &mut taken,
                    &mut workbook_rels,
                    &mut types,
                ),
            };
            staged.push((part, merged.to_xml()?));
        }
        if let Some(merged) = strings.finish() {
            let part = match strings_part {
                Some(part) => part,
                None => self.add_workbook_part(
                    "sharedStrings.xml",
                    "sharedStrings",
                    CT_SHARED_STRINGS,
                    &mut taken,
                    &mut workbook_rels,
                    &mut types,
                ),
            };
            staged.push((part, merged.to_xml()?));
        }

        staged.push((rels_for_part(&self.workbook_part), rels::to_xml(&workbook_rels)));
        staged.push((CONTENT_TYPES_PART.to_string(), types.to_xml()));

        for (part, bytes) in staged {
            self.set_part(part, bytes);
        }
        log::debug!(
            "copied worksheet '{}' as '{name}' ({new_sheet_part}, {} linked parts)",
            sheet.name,
            copied.len() - 1
        );
        Ok(name)
    }

    /// Rename worksheet `index`. The name must follow Excel's rules and be
    /// unused by any other sheet, chart sheets included.
    pub fn rename_worksheet(&mut self, index: usize, name: &str) -> XlsxResult<()> {
        let sheets = self.sheets()?;
        let worksheets: Vec<&SheetInfo> = sheets.iter().filter(|s| s.is_worksheet()).collect();
        let sheet = worksheets
            .get(index)
            .ok_or(CoreError::SheetOutOfBounds(index, worksheets.len()))?;

        validate_sheet_name(
            sheets
                .iter()
                .filter(|s| s.position != sheet.position)
                .map(|s| s.name.as_str()),
            name,
        )?;

        let workbook =
            workbook_xml::rename_sheet(self.required(&self.workbook_part)?, sheet.position, name)?;
        self.set_part(self.workbook_part.clone(), workbook);
        Ok(())
    }

    fn sheets(&self) -> XlsxResult<Vec<SheetInfo>> {
        let workbook_rels = self.rels_of(&self.workbook_part)?;
        let entries = workbook_xml::parse_sheets(self.required(&self.workbook_part)?)?;

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(position, entry)| {
                let rel = workbook_rels.iter().find(|r| r.id == entry.r_id).cloned();
                let part = rel
                    .as_ref()
                    .filter(|r| !r.external)
                    .map(|r| resolve_target(&self.workbook_part, &r.target));
                SheetInfo {
                    name: entry.name,
                    position,
                    sheet_id: entry.sheet_id,
                    rel,
                    part,
                }
            })
            .collect())
    }

    /// The sheet part followed by every part reachable from it, breadth first.
    fn sheet_parts(&self, sheet_name: &str, sheet_part: &str) -> XlsxResult<Vec<String>> {
        let workbook_level: HashSet<String> = self
            .rels_of(&self.workbook_part)?
            .into_iter()
            .filter(|rel| !rel.external)
            .map(|rel| resolve_target(&self.workbook_part, &rel.target))
            .chain([self.workbook_part.clone()])
            .collect();

        let mut parts = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([sheet_part.to_string()]);

        while let Some(part) = queue.pop_front() {
            if !seen.insert(part.clone()) {
                continue;
            }
            if !self.parts.contains_key(&part) {
                log::warn!("sheet '{sheet_name}' links to missing part {part}; link kept as-is");
                continue;
            }

            for rel in self.rels_of(&part)? {
                if rel.external {
                    continue;
                }
                if let Some(kind) = WORKBOOK_SCOPED.iter().find(|kind| rel.is(kind)) {
                    return Err(XlsxError::Unsupported(format!(
                        "sheet '{sheet_name}' has a {kind} part, which only Excel can copy"
                    )));
                }
                let target = resolve_target(&part, &rel.target);
                if target != part && workbook_level.contains(&target) {
                    return Err(XlsxError::Unsupported(format!(
                        "sheet '{sheet_name}' links to the workbook-level part {target}"
                    )));
                }
                queue.push_back(target);
            }
            parts.push(part);
        }

        Ok(parts)
    }

    fn style_sheet(&self) -> XlsxResult<Option<StyleSheet>> {
        match self.related_part(&self.workbook_part, "styles")? {
            Some(part) => Ok(Some(StyleSheet::parse(self.required(&part)?)?)),
            None => Ok(None),
        }
    }

    fn shared_strings(&self) -> XlsxResult<Option<SharedStrings>> {
        match self.related_part(&self.workbook_part, "sharedStrings")? {
            Some(part) => Ok(Some(SharedStrings::parse(self.required(&part)?)?)),
            None => Ok(None),
        }
    }

    /// The existing part `part` links to with a relationship of `kind`.
    fn related_part(&self, part: &str, kind: &str) -> XlsxResult<Option<String>> {
        Ok(self
            .rels_of(part)?
            .into_iter()
            .filter(|rel| rel.is(kind) && !rel.external)
            .map(|rel| resolve_target(part, &rel.target))
            .find(|target| self.parts.contains_key(target)))
    }

    /// Name a new workbook-level part and register it; the caller stages its content.
    fn add_workbook_part(
        &self,
        file_name: &str,
        kind: &str,
        content_type: &str,
        taken: &mut HashSet<String>,
        workbook_rels: &mut Vec<Relationship>,
        types: &mut ContentTypes,
    ) -> String {
        let wanted = match self.workbook_part.rsplit_once('/') {
            Some((dir, _)) => format!("{dir}/{file_name}"),
            None => file_name.to_string(),
        };
        let part = if taken.insert(wanted.to_ascii_lowercase()) {
            wanted
        } else {
            free_part_name(&wanted, taken)
        };

        let id = rels::next_id(workbook_rels);
        workbook_rels.push(Relationship {
            id,
            rel_type: format!("{NS_REL}/{kind}"),
            target: relative_target(&self.workbook_part, &part),
            external: false,
        });
        types.add_override(&part, content_type);
        part
    }

    fn rels_of(&self, part: &str) -> XlsxResult<Vec<Relationship>> {
        match self.parts.get(&rels_for_part(part)) {
            Some(xml) => rels::parse(xml),
            None => Ok(Vec::new()),
        }
    }

    fn required(&self, part: &str) -> XlsxResult<&[u8]> {
        self.part(part)
            .ok_or_else(|| XlsxError::MissingPart(part.to_string()))
    }

    fn set_part(&mut self, name: String, bytes: Vec<u8>) {
        if !self.parts.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.parts.insert(name, bytes);
    }
}

/// `dir/stemN.ext` with the smallest `N >= 1` not in `taken` (compared
/// case-insensitively, as part names are). The name is added to `taken`.
fn free_part_name(part: &str, taken: &mut HashSet<String>) -> String {
    let (dir, file) = match part.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, part),
    };
    let (stem, ext) = match file.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (file, None),
    };
    let base = stem.trim_end_matches(|c: char| c.is_ascii_digit());

    let mut n = 1u32;
    loop {
        let file = match ext {
            Some(ext) => format!("{base}{n}.{ext}"),
            None => format!("{base}{n}"),
        };
        let candidate = match dir {
            Some(dir) => format!("{dir}/{file}"),
            None => file,
        };
        if taken.insert(candidate.to_ascii_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_part_name() {
        let mut taken: HashSet<String> = ["xl/worksheets/sheet1.xml", "xl/worksheets/Sheet2.xml", "xl/media/image1.png"]
            .into_iter()
            .map(str::to_ascii_lowercase)
            .collect();

        assert_eq!(free_part_name("xl/worksheets/sheet1.xml", &mut taken), "xl/worksheets/sheet3.xml");
        assert_eq!(free_part_name("xl/worksheets/sheet2.xml", &mut taken), "xl/worksheets/sheet4.xml");
        assert_eq!(free_part_name("xl/media/image1.png", &mut taken), "xl/media/image2.png");
        assert_eq!(free_part_name("xl/drawings/drawing7.xml", &mut taken), "xl/drawings/drawing1.xml");
    }
}
