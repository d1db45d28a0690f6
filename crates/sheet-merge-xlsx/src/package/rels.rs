//! Relationship parts (`*.rels`) and part-name arithmetic.

use quick_xml::events::Event;
use quick_xml::Reader;

use super::xml::attr;
use crate::error::XlsxResult;
use crate::escape::escape_xml;

pub(crate) const NS_PACKAGE_REL: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships";

/// One `<Relationship>` entry, with its target as written in the part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

impl Relationship {
    /// Whether the relationship type ends with `/{kind}` (`worksheet`, `styles`...).
    pub fn is(&self, kind: &str) -> bool {
        self.rel_type
            .rsplit_once('/')
            .is_some_and(|(_, last)| last == kind)
    }
}

pub(crate) fn parse(xml: &[u8]) -> XlsxResult<Vec<Relationship>> {
    let mut reader = Reader::from_reader(xml);
    let mut rels = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attr(&e, b"Id")?;
                let rel_type = attr(&e, b"Type")?;
                let target = attr(&e, b"Target")?;
                if let (Some(id), Some(rel_type), Some(target)) = (id, rel_type, target) {
                    let external = attr(&e, b"TargetMode")?.as_deref() == Some("External");
                    rels.push(Relationship {
                        id,
                        rel_type,
                        target,
                        external,
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(rels)
}

pub(crate) fn to_xml(rels: &[Relationship]) -> Vec<u8> {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{NS_PACKAGE_REL}">"#
    );
    for rel in rels {
        xml.push_str(&format!(
            r#"<Relationship Id="{}" Type="{}" Target="{}"{}/>"#,
            escape_xml(&rel.id),
            escape_xml(&rel.rel_type),
            escape_xml(&rel.target),
            if rel.external { r#" TargetMode="External""# } else { "" }
        ));
    }
    xml.push_str("</Relationships>");
    xml.into_bytes()
}

/// The first `rIdN` not used by `rels`.
pub(crate) fn next_id(rels: &[Relationship]) -> String {
    let max = rels
        .iter()
        .filter_map(|r| r.id.strip_prefix("rId")?.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("rId{}", max + 1)
}

/// The `.rels` part holding the relationships of `part` (`""` for the package root).
pub(crate) fn rels_for_part(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file_name)) => format!("{dir}/_rels/{file_name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target against the part that owns the relationship.
pub(crate) fn resolve_target(source_part: &str, target: &str) -> String {
    let target = target.split('#').next().unwrap_or(target);
    if let Some(absolute) = target.strip_prefix('/') {
        return normalize(absolute);
    }
    let base_dir = source_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    normalize(&format!("{base_dir}/{target}"))
}

/// The target to write in `from_part`'s relationships to reach `to_part`.
pub(crate) fn relative_target(from_part: &str, to_part: &str) -> String {
    let from_dir: Vec<&str> = match from_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    let to: Vec<&str> = to_part.split('/').collect();
    let (to_dir, file) = to.split_at(to.len() - 1);

    let common = from_dir
        .iter()
        .zip(to_dir)
        .take_while(|(a, b)| a == b)
        .count();

    let mut segments: Vec<&str> = vec![".."; from_dir.len() - common];
    segments.extend(&to_dir[common..]);
    segments.extend(file);
    segments.join("/")
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target("xl/workbook.xml", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("xl/workbook.xml", "/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(resolve_target("xl/worksheets/sheet1.xml", "../sharedStrings.xml"), "xl/sharedStrings.xml");
        assert_eq!(resolve_target("", "xl/workbook.xml"), "xl/workbook.xml");
        assert_eq!(resolve_target("xl/drawings/drawing1.xml", "../media/image1.png#frag"), "xl/media/image1.png");
    }

    #[test]
    fn test_relative_target() {
        assert_eq!(relative_target("xl/workbook.xml", "xl/worksheets/sheet7.xml"), "worksheets/sheet7.xml");
        assert_eq!(relative_target("xl/worksheets/sheet7.xml", "xl/drawings/drawing3.xml"), "../drawings/drawing3.xml");
        assert_eq!(relative_target("xl/drawings/drawing3.xml", "xl/media/image2.png"), "../media/image2.png");
        assert_eq!(relative_target("", "xl/workbook.xml"), "xl/workbook.xml");
    }

    #[test]
    fn test_parse_and_write() {
        let xml = br#"<?xml version="1.0"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/>
  <Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com/?a=1&amp;b=2" TargetMode="External"/>
</Relationships>"#;
        let rels = parse(xml).unwrap();
        assert_eq!(rels.len(), 2);
        assert!(rels[0].is("drawing"));
        assert!(rels[1].external);
        assert_eq!(rels[1].target, "https://example.com/?a=1&b=2");
        assert_eq!(next_id(&rels), "rId4");

        assert_eq!(parse(&to_xml(&rels)).unwrap(), rels);
    }
}
