//! Sheet list edits on `workbook.xml`.
//!
//! Positions here count every `<sheet>` in tab order, whatever its kind.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use super::xml::{attr, attr_u32, edit_attributes, with_attr, AttrEdit};
use crate::error::{XlsxError, XlsxResult};

/// One `<sheet>` entry.
#[derive(Debug, Clone)]
pub(crate) struct SheetEntry {
    pub name: String,
    pub sheet_id: u32,
    pub r_id: String,
}

pub(crate) fn parse_sheets(xml: &[u8]) -> XlsxResult<Vec<SheetEntry>> {
    let mut reader = Reader::from_reader(xml);
    let mut sheets = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                match (attr(&e, b"name")?, attr(&e, b"id")?) {
                    (Some(name), Some(r_id)) => sheets.push(SheetEntry {
                        name,
                        sheet_id: attr_u32(&e, b"sheetId")?.unwrap_or(0),
                        r_id,
                    }),
                    _ => {
                        return Err(XlsxError::Parse(
                            "<sheet> element without name or r:id".into(),
                        ))
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(sheets)
}

/// Insert a `<sheet>` so that it ends up at `position`.
///
/// Sheet-scoped defined names and the active and first visible tab are
/// shifted so they keep pointing at the same sheets.
pub(crate) fn insert_sheet(
    xml: &[u8],
    position: usize,
    name: &str,
    sheet_id: u32,
    r_id: &str,
) -> XlsxResult<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 128));

    let mut seen = 0usize;
    let mut inserted = false;
    // The qualified names the existing entries use (`sheet`, `r:id`)
    let mut element = String::from("sheet");
    let mut r_id_key = String::from("r:id");

    let shift = |value: &str| match value.trim().parse::<usize>() {
        Ok(index) if index >= position => AttrEdit::Set((index + 1).to_string()),
        _ => AttrEdit::Keep,
    };

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"sheet" => {
                element = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if let Some(key) = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
                {
                    r_id_key = String::from_utf8_lossy(key.key.as_ref()).into_owned();
                }
                if seen == position && !inserted {
                    write_sheet(&mut writer, &element, name, sheet_id, &r_id_key, r_id)?;
                    inserted = true;
                }
                seen += 1;
                writer.write_event(event)?;
            }
            Event::End(ref e) if e.local_name().as_ref() == b"sheets" => {
                if !inserted {
                    write_sheet(&mut writer, &element, name, sheet_id, &r_id_key, r_id)?;
                    inserted = true;
                }
                writer.write_event(event)?;
            }
            Event::Start(ref e) | Event::Empty(ref e)
                if matches!(e.local_name().as_ref(), b"definedName" | b"workbookView") =>
            {
                let edited = edit_attributes(
                    e,
                    |key, value| match key {
                        b"localSheetId" | b"activeTab" | b"firstSheet" => shift(value),
                        _ => AttrEdit::Keep,
                    },
                    &[],
                )?;
                match event {
                    Event::Start(_) => writer.write_event(Event::Start(edited))?,
                    _ => writer.write_event(Event::Empty(edited))?,
                }
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    if !inserted {
        return Err(XlsxError::InvalidFormat("workbook.xml has no <sheets> element".into()));
    }
    Ok(writer.into_inner())
}

fn write_sheet(
    writer: &mut Writer<Vec<u8>>,
    element: &str,
    name: &str,
    sheet_id: u32,
    r_id_key: &str,
    r_id: &str,
) -> XlsxResult<()> {
    let mut sheet = BytesStart::new(element);
    sheet.push_attribute(("name", name));
    sheet.push_attribute(("sheetId", sheet_id.to_string().as_str()));
    sheet.push_attribute((r_id_key, r_id));
    writer.write_event(Event::Empty(sheet))?;
    Ok(())
}

/// Set the `name` of the `<sheet>` at `position`.
pub(crate) fn rename_sheet(xml: &[u8], position: usize, name: &str) -> XlsxResult<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 32));
    let mut seen = 0usize;

    loop {
        match reader.read_event()? {
            Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let e = if seen == position { with_attr(&e, "name", name)? } else { e.into_owned() };
                seen += 1;
                writer.write_event(Event::Empty(e))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"sheet" => {
                let e = if seen == position { with_attr(&e, "name", name)? } else { e.into_owned() };
                seen += 1;
                writer.write_event(Event::Start(e))?;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    Ok(writer.into_inner())
}
