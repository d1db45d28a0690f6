//! Event-level XML helpers for editing parts without a DOM.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use quick_xml::Writer;

use crate::error::{XlsxError, XlsxResult};

/// What to do with one attribute when rebuilding a start tag.
pub(super) enum AttrEdit {
    Keep,
    Set(String),
    Drop,
}

/// Rebuild `e` with its attributes passed through `edit`, keeping their order.
///
/// `edit` sees the attribute's local name and unescaped value. `extra` is
/// appended after the existing attributes.
pub(super) fn edit_attributes(
    e: &BytesStart<'_>,
    mut edit: impl FnMut(&[u8], &str) -> AttrEdit,
    extra: &[(&str, &str)],
) -> XlsxResult<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);

    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let action = {
            let value = attr.unescape_value()?;
            edit(attr.key.local_name().as_ref(), &value)
        };
        match action {
            AttrEdit::Keep => out.push_attribute(attr),
            AttrEdit::Set(new) => {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                out.push_attribute((key.as_str(), new.as_str()));
            }
            AttrEdit::Drop => {}
        }
    }
    for (key, value) in extra {
        out.push_attribute((*key, *value));
    }

    Ok(out)
}

/// Attribute lookup by local name.
pub(super) fn attr(e: &BytesStart<'_>, key: &[u8]) -> XlsxResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

pub(super) fn attr_u32(e: &BytesStart<'_>, key: &[u8]) -> XlsxResult<Option<u32>> {
    match attr(e, key)? {
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| XlsxError::Parse(format!("invalid number '{v}' in attribute"))),
        None => Ok(None),
    }
}

/// Serialize the element opened by `start` and everything up to its end tag.
pub(super) fn capture_element<'a>(
    reader: &mut Reader<&'a [u8]>,
    start: BytesStart<'a>,
) -> XlsxResult<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Start(start))?;

    let mut depth = 1usize;
    while depth > 0 {
        let event = reader.read_event()?;
        match &event {
            Event::Start(_) => depth += 1,
            Event::End(_) => depth -= 1,
            Event::Eof => return Err(XlsxError::Parse("unexpected end of XML".into())),
            _ => {}
        }
        writer.write_event(event)?;
    }

    Ok(writer.into_inner())
}

/// The first start tag of a serialized element.
pub(super) fn first_tag(xml: &[u8]) -> XlsxResult<BytesStart<'_>> {
    let mut reader = Reader::from_reader(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => return Ok(e),
            Event::Eof => return Err(XlsxError::Parse("empty XML element".into())),
            _ => {}
        }
    }
}

/// Rewrite the attributes of the outermost tag of a serialized element.
pub(super) fn edit_first_tag(
    xml: &[u8],
    edit: impl FnMut(&[u8], &str) -> AttrEdit,
) -> XlsxResult<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut edit = Some(edit);

    loop {
        match reader.read_event()? {
            Event::Start(e) if edit.is_some() => {
                if let Some(f) = edit.take() {
                    writer.write_event(Event::Start(edit_attributes(&e, f, &[])?))?;
                }
            }
            Event::Empty(e) if edit.is_some() => {
                if let Some(f) = edit.take() {
                    writer.write_event(Event::Empty(edit_attributes(&e, f, &[])?))?;
                }
            }
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
    }

    Ok(writer.into_inner())
}

/// Events before the root element (declaration, comments), re-serialized.
#[derive(Debug)]
pub(super) struct Prolog(Vec<u8>);

impl Prolog {
    /// Read up to the root element and return it with whether it is empty.
    pub(super) fn read<'a>(
        reader: &mut Reader<&'a [u8]>,
    ) -> XlsxResult<(Self, BytesStart<'a>, bool)> {
        let mut writer = Writer::new(Vec::new());
        loop {
            match reader.read_event()? {
                Event::Start(e) => return Ok((Self(writer.into_inner()), e, false)),
                Event::Empty(e) => return Ok((Self(writer.into_inner()), e, true)),
                Event::Eof => return Err(XlsxError::Parse("XML part has no root element".into())),
                event => writer.write_event(event)?,
            }
        }
    }

    pub(super) fn standard() -> Self {
        Self(br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#.to_vec())
    }

    pub(super) fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Whether `start` carries the attribute `key` (by local name).
pub(super) fn has_attr(e: &BytesStart<'_>, key: &[u8]) -> bool {
    e.attributes()
        .flatten()
        .any(|a| a.key.local_name().as_ref() == key)
}

/// Set (or add) one attribute on a start tag.
pub(super) fn with_attr(e: &BytesStart<'_>, key: &str, value: &str) -> XlsxResult<BytesStart<'static>> {
    let added = [(key, value)];
    let extra: &[(&str, &str)] = if has_attr(e, key.as_bytes()) { &[] } else { &added };
    edit_attributes(
        e,
        |k, _| {
            if k == key.as_bytes() {
                AttrEdit::Set(value.to_string())
            } else {
                AttrEdit::Keep
            }
        },
        extra,
    )
}
