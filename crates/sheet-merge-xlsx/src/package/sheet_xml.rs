//! Renumbering a copied worksheet part for its new workbook.

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::shared_strings::StringImport;
use super::styles::StyleImport;
use super::xml::{edit_attributes, AttrEdit};
use crate::error::{XlsxError, XlsxResult};

/// Rewrite the style and shared-string references of a worksheet part.
///
/// `s` on cells and rows and `style` on columns are cell format indices,
/// `dxfId` on conditional-format rules is a differential format index, and
/// the `<v>` of a `t="s"` cell is a shared string index. The copy is never
/// the selected tab.
pub(crate) fn rewrite_worksheet(
    xml: &[u8],
    styles: &mut StyleImport<'_>,
    strings: &mut StringImport<'_>,
) -> XlsxResult<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));

    // Inside a `t="s"` cell, and inside its `<v>`
    let mut shared_cell = false;
    let mut in_value = false;

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = is_shared_string_cell(&e);
                    writer.write_event(Event::Start(remap_cell(&e, styles)?))?;
                }
                b"v" => {
                    in_value = shared_cell;
                    writer.write_event(Event::Start(e.borrow()))?;
                }
                _ => writer.write_event(Event::Start(remap(&e, styles)?))?,
            },
            Event::Empty(e) => {
                let remapped = match e.local_name().as_ref() {
                    b"c" => remap_cell(&e, styles)?,
                    _ => remap(&e, styles)?,
                };
                writer.write_event(Event::Empty(remapped))?;
            }
            Event::Text(t) if in_value => {
                let text = t.unescape()?;
                let index: u32 = text.trim().parse().map_err(|_| {
                    XlsxError::Parse(format!("invalid shared string index '{text}'"))
                })?;
                let mapped = strings.string(index)?.to_string();
                writer.write_event(Event::Text(BytesText::new(&mapped)))?;
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"v" => in_value = false,
                    b"c" => shared_cell = false,
                    _ => {}
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    Ok(writer.into_inner())
}

fn is_shared_string_cell(e: &BytesStart<'_>) -> bool {
    e.attributes()
        .flatten()
        .any(|a| a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s")
}

fn remap_cell(
    e: &BytesStart<'_>,
    styles: &mut StyleImport<'_>,
) -> XlsxResult<BytesStart<'static>> {
    let mut failure = None;
    let out = edit_attributes(
        e,
        |key, value| match key {
            b"s" => import_index(value, |i| styles.cell_xf(i), &mut failure),
            _ => AttrEdit::Keep,
        },
        &[],
    )?;
    failure.map_or(Ok(out), Err)
}

/// Every element other than `<c>`: rows, columns, conditional formats and
/// sheet views carry references too.
fn remap(
    e: &BytesStart<'_>,
    styles: &mut StyleImport<'_>,
) -> XlsxResult<BytesStart<'static>> {
    let element = e.local_name();
    let mut failure = None;
    let out = match element.as_ref() {
        b"row" => edit_attributes(
            e,
            |key, value| match key {
                b"s" => import_index(value, |i| styles.cell_xf(i), &mut failure),
                _ => AttrEdit::Keep,
            },
            &[],
        )?,
        b"col" => edit_attributes(
            e,
            |key, value| match key {
                b"style" => import_index(value, |i| styles.cell_xf(i), &mut failure),
                _ => AttrEdit::Keep,
            },
            &[],
        )?,
        b"cfRule" => edit_attributes(
            e,
            |key, value| match key {
                b"dxfId" => import_index(value, |i| Ok(styles.dxf(i)), &mut failure),
                _ => AttrEdit::Keep,
            },
            &[],
        )?,
        b"sheetView" => edit_attributes(
            e,
            |key, _| match key {
                b"tabSelected" => AttrEdit::Drop,
                _ => AttrEdit::Keep,
            },
            &[],
        )?,
        _ => e.clone().into_owned(),
    };
    failure.map_or(Ok(out), Err)
}

/// Map a numeric attribute through `import`; the first error is parked in `failure`.
fn import_index(
    value: &str,
    mut import: impl FnMut(u32) -> XlsxResult<u32>,
    failure: &mut Option<XlsxError>,
) -> AttrEdit {
    let Ok(index) = value.trim().parse::<u32>() else {
        return AttrEdit::Keep;
    };
    match import(index) {
        Ok(mapped) => AttrEdit::Set(mapped.to_string()),
        Err(e) => {
            failure.get_or_insert(e);
            AttrEdit::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::shared_strings::SharedStrings;
    use crate::package::styles::StyleSheet;

    const STYLES: &str = r#"<styleSheet>
<fonts count="2"><font><sz val="11"/></font><font><b/></font></fonts>
<fills count="1"><fill><patternFill patternType="none"/></fill></fills>
<borders count="1"><border/></borders>
<cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs>
<dxfs count="1"><dxf><font><i/></font></dxf></dxfs>
</styleSheet>"#;

    #[test]
    fn test_rewrite_references() {
        let source_styles = StyleSheet::parse(STYLES.as_bytes()).unwrap();
        // The target only knows the default format
        let target_styles = StyleSheet::parse(
            br#"<styleSheet><fonts count="1"><font><sz val="11"/></font></fonts><fills count="1"><fill><patternFill patternType="none"/></fill></fills><borders count="1"><border/></borders><cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs></styleSheet>"#,
        )
        .unwrap();
        let source_strings =
            SharedStrings::parse(br#"<sst><si><t>a</t></si><si><t>b</t></si></sst>"#).unwrap();
        let target_strings = SharedStrings::parse(br#"<sst><si><t>b</t></si></sst>"#).unwrap();

        let mut styles = StyleImport::new(Some(&source_styles), target_styles);
        let mut strings = StringImport::new(Some(&source_strings), Some(target_strings));

        let sheet = r#"<worksheet><sheetViews><sheetView tabSelected="1" workbookViewId="0"/></sheetViews><cols><col min="1" max="1" width="12" style="1" customWidth="1"/></cols><sheetData><row r="1" ht="64" customHeight="1" s="1" customFormat="1"><c r="A1" s="1" t="s"><v>1</v></c><c r="B1" t="s"><v>0</v></c><c r="C1"><v>1</v></c></row></sheetData><conditionalFormatting sqref="A1"><cfRule type="expression" dxfId="0" priority="1"><formula>A1&gt;0</formula></cfRule></conditionalFormatting></worksheet>"#;
        let out = rewrite_worksheet(sheet.as_bytes(), &mut styles, &mut strings).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(
            out,
            r#"<worksheet><sheetViews><sheetView workbookViewId="0"/></sheetViews><cols><col min="1" max="1" width="12" style="1" customWidth="1"/></cols><sheetData><row r="1" ht="64" customHeight="1" s="1" customFormat="1"><c r="A1" s="1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1"><v>1</v></c></row></sheetData><conditionalFormatting sqref="A1"><cfRule type="expression" dxfId="0" priority="1"><formula>A1&gt;0</formula></cfRule></conditionalFormatting></worksheet>"#
        );
    }
}
