//! Cell address and range types

use crate::error::{Error, Result};
use crate::{MAX_COLS, MAX_ROWS};
use std::fmt;
use std::str::FromStr;

/// A cell location, 0-based internally.
///
/// Parsing accepts `$` markers (`$B$2`) but drops them: a copied sheet keeps
/// its cells at the same coordinates, so absoluteness never matters here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    /// Row index (0-based internally, 1-based in display)
    pub row: u32,
    /// Column index (0-based, A=0, B=1, ..., XFD=16383)
    pub col: u16,
}

impl CellAddress {
    /// Create a new cell address
    pub fn new(row: u32, col: u16) -> Self {
        Self { row, col }
    }

    /// Parse a cell address from A1-style notation
    ///
    /// # Examples
    /// ```
    /// use sheet_merge_core::CellAddress;
    ///
    /// let addr = CellAddress::parse("$B$2").unwrap();
    /// assert_eq!((addr.row, addr.col), (1, 1));
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let letters_end = s
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_alphabetic() || (i == 0 && c == '$')))
            .map(|(i, _)| i)
            .unwrap_or(s.len());

        let letters = s[..letters_end].trim_start_matches('$');
        if letters.is_empty() {
            return Err(Error::InvalidAddress(format!("no column letters in '{s}'")));
        }
        let col = Self::letters_to_column(letters)?;

        let digits = s[letters_end..].trim_start_matches('$');
        if digits.is_empty() {
            return Err(Error::InvalidAddress(format!("no row number in '{s}'")));
        }
        let row: u32 = digits
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("invalid row number in '{s}'")))?;

        if row == 0 {
            return Err(Error::InvalidAddress(format!(
                "row number must be >= 1 in '{s}'"
            )));
        }
        if row > MAX_ROWS {
            return Err(Error::RowOutOfBounds(row - 1, MAX_ROWS - 1));
        }

        Ok(Self { row: row - 1, col })
    }

    /// Convert column index to letters (0 = A, 25 = Z, 26 = AA, etc.)
    pub fn column_to_letters(col: u16) -> String {
        let mut letters = Vec::new();
        let mut n = col as u32 + 1;

        while n > 0 {
            n -= 1;
            letters.push(b'A' + (n % 26) as u8);
            n /= 26;
        }

        letters.iter().rev().map(|&b| b as char).collect()
    }

    /// Convert column letters to index (A = 0, Z = 25, AA = 26, etc.)
    pub fn letters_to_column(letters: &str) -> Result<u16> {
        if letters.is_empty() {
            return Err(Error::InvalidAddress("empty column letters".into()));
        }

        let mut col: u32 = 0;
        for c in letters.chars() {
            if !c.is_ascii_alphabetic() {
                return Err(Error::InvalidAddress(format!("invalid column letter '{c}'")));
            }
            col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
            if col > MAX_COLS as u32 {
                return Err(Error::ColumnOutOfBounds(col - 1, MAX_COLS - 1));
            }
        }

        Ok((col - 1) as u16)
    }

    /// Format as A1-style string
    pub fn to_a1_string(&self) -> String {
        format!("{}{}", Self::column_to_letters(self.col), self.row + 1)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1_string())
    }
}

impl FromStr for CellAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A range of cells (e.g., "A1:B10"), normalized so `start` is top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    /// Start address (top-left)
    pub start: CellAddress,
    /// End address (bottom-right)
    pub end: CellAddress,
}

impl CellRange {
    /// Create a new cell range
    pub fn new(a: CellAddress, b: CellAddress) -> Self {
        Self {
            start: CellAddress::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellAddress::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// Parse "A1:B2"; a lone "A1" is a single-cell range.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once(':') {
            Some((a, b)) => Ok(Self::new(
                CellAddress::parse(a).map_err(|_| Error::InvalidRange(s.into()))?,
                CellAddress::parse(b).map_err(|_| Error::InvalidRange(s.into()))?,
            )),
            None => {
                let addr = CellAddress::parse(s).map_err(|_| Error::InvalidRange(s.into()))?;
                Ok(Self::new(addr, addr))
            }
        }
    }

    /// Check if an address lies inside the range
    pub fn contains(&self, addr: &CellAddress) -> bool {
        (self.start.row..=self.end.row).contains(&addr.row)
            && (self.start.col..=self.end.col).contains(&addr.col)
    }

    /// Check if two ranges share at least one cell
    pub fn overlaps(&self, other: &CellRange) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    /// Format as "A1:B2" (or "A1" for a single cell)
    pub fn to_a1_string(&self) -> String {
        if self.start == self.end {
            self.start.to_a1_string()
        } else {
            format!("{}:{}", self.start, self.end)
        }
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1_string())
    }
}

impl FromStr for CellRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_to_letters() {
        assert_eq!(CellAddress::column_to_letters(0), "A");
        assert_eq!(CellAddress::column_to_letters(25), "Z");
        assert_eq!(CellAddress::column_to_letters(26), "AA");
        assert_eq!(CellAddress::column_to_letters(701), "ZZ");
        assert_eq!(CellAddress::column_to_letters(16383), "XFD");
    }

    #[test]
    fn test_letters_to_column() {
        assert_eq!(CellAddress::letters_to_column("A").unwrap(), 0);
        assert_eq!(CellAddress::letters_to_column("aa").unwrap(), 26);
        assert_eq!(CellAddress::letters_to_column("XFD").unwrap(), 16383);
        assert!(CellAddress::letters_to_column("XFE").is_err());
    }

    #[test]
    fn test_cell_address_parse() {
        let addr = CellAddress::parse("C7").unwrap();
        assert_eq!((addr.row, addr.col), (6, 2));

        let addr = CellAddress::parse("$AB$10").unwrap();
        assert_eq!((addr.row, addr.col), (9, 27));

        assert!(CellAddress::parse("").is_err());
        assert!(CellAddress::parse("A0").is_err());
        assert!(CellAddress::parse("12").is_err());
        assert!(CellAddress::parse("A").is_err());
        assert!(CellAddress::parse("A1B").is_err());
    }

    #[test]
    fn test_cell_range_parse_normalizes() {
        let range = CellRange::parse("C3:A1").unwrap();
        assert_eq!(range.start, CellAddress::new(0, 0));
        assert_eq!(range.end, CellAddress::new(2, 2));
        assert_eq!(range.to_string(), "A1:C3");

        let single = CellRange::parse("B2").unwrap();
        assert_eq!(single.to_string(), "B2");
    }

    #[test]
    fn test_cell_range_overlaps() {
        let a = CellRange::parse("A1:B2").unwrap();
        assert!(a.overlaps(&CellRange::parse("B2:C3").unwrap()));
        assert!(!a.overlaps(&CellRange::parse("C1:D2").unwrap()));
        assert!(a.contains(&CellAddress::new(1, 1)));
    }
}
