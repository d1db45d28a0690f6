//! Workbook type - the ordered list of worksheets

use crate::error::{Error, Result};
use crate::worksheet::Worksheet;
use crate::MAX_SHEET_NAME_LEN;

/// A workbook (spreadsheet document)
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    worksheets: Vec<Worksheet>,
}

impl Workbook {
    /// Create a new workbook with one worksheet named "Sheet1"
    pub fn new() -> Self {
        Self {
            worksheets: vec![Worksheet::new("Sheet1")],
        }
    }

    /// Create an empty workbook with no worksheets
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the number of worksheets
    pub fn sheet_count(&self) -> usize {
        self.worksheets.len()
    }

    /// Check if the workbook has no worksheets
    pub fn is_empty(&self) -> bool {
        self.worksheets.is_empty()
    }

    /// Get a worksheet by index
    pub fn worksheet(&self, index: usize) -> Option<&Worksheet> {
        self.worksheets.get(index)
    }

    /// Get a mutable worksheet by index
    pub fn worksheet_mut(&mut self, index: usize) -> Option<&mut Worksheet> {
        self.worksheets.get_mut(index)
    }

    /// Get a worksheet by name (case-insensitive, as Excel matches names)
    pub fn worksheet_by_name(&self, name: &str) -> Option<&Worksheet> {
        self.sheet_index(name).map(|i| &self.worksheets[i])
    }

    /// Get the index of a worksheet by name (case-insensitive)
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        let needle = name.to_lowercase();
        self.worksheets
            .iter()
            .position(|ws| ws.name().to_lowercase() == needle)
    }

    /// Sheet names in workbook order
    pub fn sheet_names(&self) -> Vec<String> {
        self.worksheets.iter().map(|ws| ws.name().to_string()).collect()
    }

    /// Iterate over all worksheets
    pub fn worksheets(&self) -> impl Iterator<Item = &Worksheet> {
        self.worksheets.iter()
    }

    /// Add a new empty worksheet with the given name
    pub fn add_worksheet_with_name(&mut self, name: &str) -> Result<usize> {
        self.add_existing_worksheet(Worksheet::new(name))
    }

    /// Append an existing worksheet, keeping its name
    pub fn add_existing_worksheet(&mut self, worksheet: Worksheet) -> Result<usize> {
        self.check_name(worksheet.name(), None)?;
        self.worksheets.push(worksheet);
        Ok(self.worksheets.len() - 1)
    }

    /// Insert a copy of `source` immediately after the sheet at `after`.
    ///
    /// The copy keeps the source name unless it collides, in which case it is
    /// named the way Excel names copies (`"Data (2)"`, `"Data (3)"`, ...).
    /// Returns the index of the new sheet, which is always `after + 1`.
    pub fn copy_worksheet_after(&mut self, source: &Worksheet, after: usize) -> Result<usize> {
        if after >= self.worksheets.len() {
            return Err(Error::SheetOutOfBounds(after, self.worksheets.len()));
        }

        let name = unique_sheet_name(self.worksheets.iter().map(|ws| ws.name()), source.name());
        let mut copy = source.clone();
        copy.set_name(name);

        self.worksheets.insert(after + 1, copy);
        Ok(after + 1)
    }

    /// Rename a worksheet
    pub fn rename_worksheet(&mut self, index: usize, new_name: &str) -> Result<()> {
        if index >= self.worksheets.len() {
            return Err(Error::SheetOutOfBounds(index, self.worksheets.len()));
        }

        self.check_name(new_name, Some(index))?;
        self.worksheets[index].set_name(new_name);
        Ok(())
    }

    fn check_name(&self, name: &str, exclude_index: Option<usize>) -> Result<()> {
        let others = self
            .worksheets
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != exclude_index)
            .map(|(_, ws)| ws.name());
        validate_sheet_name(others, name)
    }
}

/// Check a sheet name against Excel's rules and the names already in use.
///
/// Names must be non-empty, at most 31 characters, free of `: \ / ? * [ ]`,
/// must not start or end with an apostrophe, and must be unique ignoring case.
pub fn validate_sheet_name<'a>(existing: impl IntoIterator<Item = &'a str>, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidSheetName("Sheet name cannot be empty".into()));
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return Err(Error::InvalidSheetName(format!(
            "Sheet name too long (max {MAX_SHEET_NAME_LEN} characters): {name}"
        )));
    }

    const INVALID_CHARS: &[char] = &[':', '\\', '/', '?', '*', '[', ']'];
    if let Some(c) = name.chars().find(|c| INVALID_CHARS.contains(c)) {
        return Err(Error::InvalidSheetName(format!(
            "Sheet name cannot contain '{c}': {name}"
        )));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(Error::InvalidSheetName(format!(
            "Sheet name cannot start or end with an apostrophe: {name}"
        )));
    }

    let lower = name.to_lowercase();
    if existing.into_iter().any(|n| n.to_lowercase() == lower) {
        return Err(Error::DuplicateSheetName(name.into()));
    }

    Ok(())
}

/// The name a copied sheet receives given the names already in use.
///
/// Mirrors Excel: an unused name is kept as-is, otherwise a `" (n)"` suffix is
/// added (replacing an existing one) with the smallest free `n >= 2`. The stem
/// is shortened when needed so the result stays within 31 characters.
pub fn unique_sheet_name<'a>(existing: impl IntoIterator<Item = &'a str>, base: &str) -> String {
    let taken: Vec<String> = existing.into_iter().map(str::to_lowercase).collect();
    let is_free = |candidate: &str| !taken.contains(&candidate.to_lowercase());

    if is_free(base) {
        return base.to_string();
    }

    let stem = strip_copy_suffix(base);
    (2usize..)
        .map(|n| {
            let suffix = format!(" ({n})");
            let room = MAX_SHEET_NAME_LEN.saturating_sub(suffix.chars().count());
            let head: String = stem.chars().take(room).collect();
            format!("{head}{suffix}")
        })
        .find(|candidate| is_free(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn strip_copy_suffix(name: &str) -> &str {
    if let Some(open) = name.rfind(" (") {
        let inner = &name[open + 2..];
        if let Some(digits) = inner.strip_suffix(')') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return &name[..open];
            }
        }
    }
    name
}
