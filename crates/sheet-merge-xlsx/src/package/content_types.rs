//! `[Content_Types].xml`

use quick_xml::events::Event;
use quick_xml::Reader;

use super::xml::attr;
use crate::error::XlsxResult;
use crate::escape::escape_xml;

pub(crate) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

pub(crate) const CT_STYLES: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";
pub(crate) const CT_SHARED_STRINGS: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml";

#[derive(Debug, Clone, Default)]
pub(crate) struct ContentTypes {
    /// `(extension, content type)`
    defaults: Vec<(String, String)>,
    /// `(part name without the leading '/', content type)`
    overrides: Vec<(String, String)>,
}

impl ContentTypes {
    pub fn parse(xml: &[u8]) -> XlsxResult<Self> {
        let mut reader = Reader::from_reader(xml);
        let mut types = Self::default();

        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                    b"Default" => {
                        if let (Some(ext), Some(ct)) = (attr(&e, b"Extension")?, attr(&e, b"ContentType")?) {
                            types.defaults.push((ext, ct));
                        }
                    }
                    b"Override" => {
                        if let (Some(part), Some(ct)) = (attr(&e, b"PartName")?, attr(&e, b"ContentType")?) {
                            types.overrides.push((part.trim_start_matches('/').to_string(), ct));
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(types)
    }

    /// The content type of `part`: its override, else the default for its extension.
    pub fn content_type(&self, part: &str) -> Option<&str> {
        self.overrides
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(part))
            .or_else(|| {
                let ext = part.rsplit_once('.')?.1;
                self.defaults.iter().find(|(e, _)| e.eq_ignore_ascii_case(ext))
            })
            .map(|(_, ct)| ct.as_str())
    }

    /// Whether `part` gets its type from an `<Override>`.
    pub fn has_override(&self, part: &str) -> bool {
        self.overrides.iter().any(|(name, _)| name.eq_ignore_ascii_case(part))
    }

    pub fn add_override(&mut self, part: &str, content_type: &str) {
        self.overrides.retain(|(name, _)| !name.eq_ignore_ascii_case(part));
        self.overrides.push((part.to_string(), content_type.to_string()));
    }

    /// Give `part` the same content type it had in `source`, under whichever
    /// mechanism `source` used for it.
    pub fn copy_type(&mut self, source: &ContentTypes, source_part: &str, part: &str) {
        let Some(content_type) = source.content_type(source_part) else {
            log::warn!("no content type for {source_part}; the copy may not open");
            return;
        };

        let ext = part.rsplit_once('.').map(|(_, ext)| ext);
        let default_matches = ext
            .and_then(|ext| self.defaults.iter().find(|(e, _)| e.eq_ignore_ascii_case(ext)))
            .map(|(_, ct)| ct == content_type);

        match (source.has_override(source_part), default_matches, ext) {
            (false, Some(true), _) => {}
            (false, None, Some(ext)) => {
                self.defaults.push((ext.to_string(), content_type.to_string()));
            }
            _ => self.add_override(part, content_type),
        }
    }

    pub fn to_xml(&self) -> Vec<u8> {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        );
        for (ext, ct) in &self.defaults {
            xml.push_str(&format!(
                r#"<Default Extension="{}" ContentType="{}"/>"#,
                escape_xml(ext),
                escape_xml(ct)
            ));
        }
        for (part, ct) in &self.overrides {
            xml.push_str(&format!(
                r#"<Override PartName="/{}" ContentType="{}"/>"#,
                escape_xml(part),
                escape_xml(ct)
            ));
        }
        xml.push_str("</Types>");
        xml.into_bytes()
    }
}
