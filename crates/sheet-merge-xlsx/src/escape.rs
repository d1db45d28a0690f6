//! Text escaping shared by the reader and writer.
//!
//! Besides XML entities, SpreadsheetML encodes characters XML cannot carry
//! (control characters) as `_xHHHH_`. A literal `_x` sequence that would look
//! like an escape is itself protected as `_x005F_`.

/// Decode Excel's `_xHHHH_` escape sequences.
pub(crate) fn decode_excel_escapes(s: &str) -> String {
    if !s.contains("_x") {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find("_x") {
        result.push_str(&rest[..pos]);
        let candidate = &rest[pos..];
        match parse_escape(candidate) {
            Some(c) => {
                result.push(c);
                rest = &candidate[7..];
            }
            None => {
                result.push_str("_x");
                rest = &candidate[2..];
            }
        }
    }

    result.push_str(rest);
    result
}

/// `_xHHHH_` at the start of `s`, if well formed.
fn parse_escape(s: &str) -> Option<char> {
    let bytes = s.as_bytes();
    if bytes.len() < 7 || bytes[6] != b'_' {
        return None;
    }
    let hex = s.get(2..6)?;
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}

/// Encode characters that cannot appear in XML text as `_xHHHH_`.
pub(crate) fn encode_excel_escapes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(c) = rest.chars().next() {
        if c == '_' && parse_escape(rest).is_some() {
            result.push_str("_x005F_");
        } else if c.is_control() && !matches!(c, '\t' | '\n' | '\r') {
            result.push_str(&format!("_x{:04X}_", c as u32));
        } else {
            result.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }

    result
}

/// Escape the five XML special characters.
pub(crate) fn escape_xml(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}
