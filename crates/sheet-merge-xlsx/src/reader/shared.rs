//! Shared formulas (`<f t="shared" si="N">`).
//!
//! Excel stores a filled-down formula once, on the first cell of the block
//! (the master, which carries the text and a `ref`), and leaves the other
//! cells with an empty `<f t="shared" si="N"/>`. Each dependent's formula is
//! the master's with its relative references moved by the cell offset.

use std::collections::HashMap;

use sheet_merge_core::{CellAddress, MAX_COLS, MAX_ROWS};

use super::PendingCell;

#[derive(Debug, Default)]
pub(super) struct SharedFormulas {
    masters: HashMap<u32, Master>,
}

#[derive(Debug)]
struct Master {
    row: u32,
    col: u16,
    text: String,
}

impl SharedFormulas {
    /// Record a master, or fill in the formula text of a dependent.
    pub(super) fn resolve(&mut self, cell: &mut PendingCell) {
        let Some(si) = cell.shared_index else {
            return;
        };

        if !cell.formula.is_empty() {
            self.masters.insert(
                si,
                Master {
                    row: cell.row,
                    col: cell.col,
                    text: cell.formula.clone(),
                },
            );
            return;
        }

        match self.masters.get(&si) {
            Some(master) => {
                let rows = i64::from(cell.row) - i64::from(master.row);
                let cols = i64::from(cell.col) - i64::from(master.col);
                cell.formula = shift_formula(&master.text, rows, cols);
            }
            None => log::warn!(
                "shared formula {si} used at {} before its master; keeping the cached value",
                CellAddress::new(cell.row, cell.col)
            ),
        }
    }
}

/// Move the relative references of `formula` by `rows` and `cols`.
///
/// `$`-anchored parts stay put. String literals, quoted sheet names and
/// structured references are left alone. A reference pushed off the sheet
/// becomes `#REF!`.
pub(crate) fn shift_formula(formula: &str, rows: i64, cols: i64) -> String {
    if rows == 0 && cols == 0 {
        return formula.to_string();
    }

    let chars: Vec<char> = formula.chars().collect();
    let mut out = String::with_capacity(formula.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            quote @ ('"' | '\'') => {
                let start = i;
                i += 1;
                while i < chars.len() {
                    if chars[i] == quote {
                        // A doubled quote is an escaped quote
                        if chars.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                out.extend(&chars[start..i]);
            }
            '[' => {
                let start = i;
                let mut depth = 0;
                while i < chars.len() {
                    match chars[i] {
                        '[' => depth += 1,
                        ']' => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                    if depth == 0 {
                        break;
                    }
                }
                out.extend(&chars[start..i]);
            }
            c if is_token_char(c) => {
                let start = i;
                while i < chars.len() && is_token_char(chars[i]) {
                    i += 1;
                }
                let token: String = chars[start..i].iter().collect();
                let prev = start.checked_sub(1).map(|p| chars[p]);
                let next = chars.get(i).copied();
                out.push_str(&shift_token(&token, prev, next, rows, cols));
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '$' | '_' | '.')
}

/// One axis of a reference: `$`-anchored or relative, 0-based index.
#[derive(Debug, Clone, Copy)]
struct Axis {
    absolute: bool,
    index: i64,
}

impl Axis {
    fn shifted(self, by: i64, max: i64) -> Option<Self> {
        if self.absolute {
            return Some(self);
        }
        let index = self.index + by;
        (0..max).contains(&index).then_some(Self { index, ..self })
    }
}

fn shift_token(token: &str, prev: Option<char>, next: Option<char>, rows: i64, cols: i64) -> String {
    // Function names and sheet prefixes
    if matches!(next, Some('(') | Some('!')) {
        return token.to_string();
    }
    let in_range = prev == Some(':') || next == Some(':');

    let (col, rest) = split_column(token);
    let (row, rest) = split_row(rest);
    if !rest.is_empty() {
        return token.to_string();
    }

    let shifted = match (col, row) {
        (Some(col), Some(row)) => col
            .shifted(cols, i64::from(MAX_COLS))
            .zip(row.shifted(rows, i64::from(MAX_ROWS)))
            .map(|(c, r)| format!("{}{}", format_column(c), format_row(r))),
        (Some(col), None) if in_range => col
            .shifted(cols, i64::from(MAX_COLS))
            .map(format_column),
        (None, Some(row)) if in_range => row
            .shifted(rows, i64::from(MAX_ROWS))
            .map(format_row),
        _ => return token.to_string(),
    };

    shifted.unwrap_or_else(|| "#REF!".to_string())
}

/// Leading `$?[A-Z]{1,3}` of a token.
fn split_column(token: &str) -> (Option<Axis>, &str) {
    let (absolute, body) = match token.strip_prefix('$') {
        Some(body) => (true, body),
        None => (false, token),
    };
    let letters = body.chars().take_while(char::is_ascii_alphabetic).count();
    if letters == 0 || letters > 3 {
        return (None, token);
    }
    match CellAddress::letters_to_column(&body[..letters]) {
        Ok(col) => (
            Some(Axis {
                absolute,
                index: i64::from(col),
            }),
            &body[letters..],
        ),
        Err(_) => (None, token),
    }
}

/// Leading `$?[0-9]+` of what is left after the column.
fn split_row(rest: &str) -> (Option<Axis>, &str) {
    let (absolute, body) = match rest.strip_prefix('$') {
        Some(body) => (true, body),
        None => (false, rest),
    };
    let digits = body.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return (None, rest);
    }
    match body[..digits].parse::<i64>() {
        Ok(n) if n >= 1 => (
            Some(Axis {
                absolute,
                index: n - 1,
            }),
            &body[digits..],
        ),
        _ => (None, rest),
    }
}

fn format_column(axis: Axis) -> String {
    let letters = CellAddress::column_to_letters(axis.index as u16);
    if axis.absolute {
        format!("${letters}")
    } else {
        letters
    }
}

fn format_row(axis: Axis) -> String {
    let prefix = if axis.absolute { "$" } else { "" };
    format!("{prefix}{}", axis.index + 1)
}
