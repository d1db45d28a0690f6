//! XLSX writer

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::XlsxResult;
use crate::escape::{encode_excel_escapes, escape_xml};
use sheet_merge_core::{CellAddress, CellValue, Workbook, Worksheet};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Smallest stylesheet Excel opens without a repair prompt.
pub(crate) const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
    <fonts count="1"><font><sz val="11"/><name val="Calibri"/><family val="2"/></font></fonts>
    <fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>
    <borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>
    <cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
    <cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs>
    <cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>
</styleSheet>"#;

/// XLSX file writer
pub struct XlsxWriter;

impl XlsxWriter {
    /// Write a workbook to a file path
    pub fn write_file<P: AsRef<Path>>(workbook: &Workbook, path: P) -> XlsxResult<()> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        Self::write(workbook, &mut out)?;
        out.flush()?;
        Ok(())
    }

    /// Write a workbook to a writer
    pub fn write<W: Write + Seek>(workbook: &Workbook, writer: W) -> XlsxResult<()> {
        let mut zip = ZipWriter::new(writer);

        zip.start_file("[Content_Types].xml", SimpleFileOptions::default())?;
        zip.write_all(Self::content_types_xml(workbook).as_bytes())?;

        zip.start_file("_rels/.rels", SimpleFileOptions::default())?;
        zip.write_all(Self::root_rels_xml().as_bytes())?;

        zip.start_file("xl/workbook.xml", SimpleFileOptions::default())?;
        zip.write_all(Self::workbook_xml(workbook).as_bytes())?;

        zip.start_file("xl/_rels/workbook.xml.rels", SimpleFileOptions::default())?;
        zip.write_all(Self::workbook_rels_xml(workbook).as_bytes())?;

        zip.start_file("xl/styles.xml", SimpleFileOptions::default())?;
        zip.write_all(STYLES_XML.as_bytes())?;

        for (i, sheet) in workbook.worksheets().enumerate() {
            zip.start_file(
                format!("xl/worksheets/sheet{}.xml", i + 1),
                SimpleFileOptions::default(),
            )?;
            zip.write_all(Self::worksheet_xml(sheet).as_bytes())?;
        }

        zip.finish()?;
        log::debug!("wrote xlsx package with {} sheets", workbook.sheet_count());
        Ok(())
    }

    fn content_types_xml(workbook: &Workbook) -> String {
        let mut content = format!(
            r#"{XML_DECLARATION}
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
    <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
    <Default Extension="xml" ContentType="application/xml"/>
    <Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
    <Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#
        );

        for i in 0..workbook.sheet_count() {
            content.push_str(&format!(
                r#"
    <Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                i + 1
            ));
        }

        content.push_str("\n</Types>");
        content
    }

    fn root_rels_xml() -> String {
        format!(
            r#"{XML_DECLARATION}
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
    <Relationship Id="rId1" Type="{NS_REL}/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#
        )
    }

    fn workbook_xml(workbook: &Workbook) -> String {
        let mut content = format!(
            r#"{XML_DECLARATION}
<workbook xmlns="{NS_MAIN}" xmlns:r="{NS_REL}">
    <sheets>"#
        );

        for (i, sheet) in workbook.worksheets().enumerate() {
            content.push_str(&format!(
                r#"
        <sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape_xml(sheet.name()),
                i + 1,
                i + 1
            ));
        }

        content.push_str("\n    </sheets>\n</workbook>");
        content
    }

    fn workbook_rels_xml(workbook: &Workbook) -> String {
        let mut content = format!(
            r#"{XML_DECLARATION}
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#
        );

        for i in 0..workbook.sheet_count() {
            content.push_str(&format!(
                r#"
    <Relationship Id="rId{}" Type="{NS_REL}/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                i + 1,
                i + 1
            ));
        }

        content.push_str(&format!(
            r#"
    <Relationship Id="rId{}" Type="{NS_REL}/styles" Target="styles.xml"/>
</Relationships>"#,
            workbook.sheet_count() + 1
        ));
        content
    }

    fn worksheet_xml(sheet: &Worksheet) -> String {
        let mut content = format!(
            r#"{XML_DECLARATION}
<worksheet xmlns="{NS_MAIN}">"#
        );

        if let Some(range) = sheet.used_range() {
            content.push_str(&format!("\n    <dimension ref=\"{range}\"/>"));
        }

        // Element order is fixed by the schema: cols, sheetData, mergeCells
        let widths = sheet.column_widths();
        if !widths.is_empty() {
            content.push_str("\n    <cols>");
            for (col, width) in widths {
                content.push_str(&format!(
                    "\n        <col min=\"{0}\" max=\"{0}\" width=\"{1}\" customWidth=\"1\"/>",
                    col + 1,
                    width
                ));
            }
            content.push_str("\n    </cols>");
        }

        content.push_str("\n    <sheetData>");
        let mut current_row: Option<u32> = None;
        for (row, col, value) in sheet.iter_cells() {
            if current_row != Some(row) {
                if current_row.is_some() {
                    content.push_str("\n        </row>");
                }
                content.push_str(&format!("\n        <row r=\"{}\">", row + 1));
                current_row = Some(row);
            }

            let cell_ref = CellAddress::new(row, col).to_a1_string();
            content.push_str("\n            ");
            content.push_str(&Self::cell_xml(&cell_ref, value));
        }
        if current_row.is_some() {
            content.push_str("\n        </row>");
        }
        content.push_str("\n    </sheetData>");

        let merged = sheet.merged_regions();
        if !merged.is_empty() {
            content.push_str(&format!("\n    <mergeCells count=\"{}\">", merged.len()));
            for range in merged {
                content.push_str(&format!("\n        <mergeCell ref=\"{range}\"/>"));
            }
            content.push_str("\n    </mergeCells>");
        }

        content.push_str("\n</worksheet>");
        content
    }

    fn cell_xml(cell_ref: &str, value: &CellValue) -> String {
        match value {
            CellValue::Formula { text, cached_value } => {
                let formula = format!("<f>{}</f>", escape_xml(text));
                match cached_value.as_deref().map(Self::typed_value) {
                    Some((t, v)) => format!(r#"<c r="{cell_ref}"{t}>{formula}<v>{v}</v></c>"#),
                    None => format!(r#"<c r="{cell_ref}">{formula}</c>"#),
                }
            }
            CellValue::String(s) => format!(
                r#"<c r="{cell_ref}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                escape_xml(&encode_excel_escapes(s))
            ),
            other => {
                let (t, v) = Self::typed_value(other);
                format!(r#"<c r="{cell_ref}"{t}><v>{v}</v></c>"#)
            }
        }
    }

    /// The `t` attribute and `<v>` text for a plain (non-formula) value.
    fn typed_value(value: &CellValue) -> (&'static str, String) {
        match value {
            CellValue::Number(n) if n.is_finite() => ("", n.to_string()),
            CellValue::Number(_) => (r#" t="e""#, "#NUM!".to_string()),
            CellValue::Boolean(b) => (r#" t="b""#, if *b { "1" } else { "0" }.to_string()),
            CellValue::Error(e) => (r#" t="e""#, escape_xml(e.as_str())),
            CellValue::Date(d) => (r#" t="d""#, escape_xml(d)),
            CellValue::String(s) => (r#" t="str""#, escape_xml(&encode_excel_escapes(s))),
            CellValue::Empty => (r#" t="str""#, String::new()),
            CellValue::Formula { cached_value, .. } => match cached_value.as_deref() {
                Some(inner) => Self::typed_value(inner),
                None => (r#" t="str""#, String::new()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheet_merge_core::CellError;

    #[test]
    fn test_cell_xml_variants() {
        assert_eq!(
            XlsxWriter::cell_xml("A1", &CellValue::Number(1.5)),
            r#"<c r="A1"><v>1.5</v></c>"#
        );
        assert_eq!(
            XlsxWriter::cell_xml("B1", &CellValue::Boolean(true)),
            r#"<c r="B1" t="b"><v>1</v></c>"#
        );
        assert_eq!(
            XlsxWriter::cell_xml("C1", &CellValue::Error(CellError::Div0)),
            r#"<c r="C1" t="e"><v>#DIV/0!</v></c>"#
        );
        assert_eq!(
            XlsxWriter::cell_xml("D1", &CellValue::String("a<b".into())),
            r#"<c r="D1" t="inlineStr"><is><t xml:space="preserve">a&lt;b</t></is></c>"#
        );
    }

    #[test]
    fn test_formula_with_string_cache() {
        let value = CellValue::Formula {
            text: "A1&\"x\"".into(),
            cached_value: Some(Box::new(CellValue::String("1x".into()))),
        };
        assert_eq!(
            XlsxWriter::cell_xml("E1", &value),
            r#"<c r="E1" t="str"><f>A1&amp;&quot;x&quot;</f><v>1x</v></c>"#
        );
    }

    #[test]
    fn test_sheet_names_are_escaped() {
        let mut wb = Workbook::empty();
        wb.add_worksheet_with_name("P&L").unwrap();
        assert!(XlsxWriter::workbook_xml(&wb).contains(r#"name="P&amp;L""#));
    }
}
