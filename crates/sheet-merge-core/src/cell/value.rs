//! Cell value types

use std::fmt;

/// Represents the value stored in a cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Empty cell (no value)
    Empty,

    /// Boolean value (TRUE/FALSE)
    Boolean(bool),

    /// Numeric value (all numbers stored as f64, including dates)
    Number(f64),

    /// String value
    String(String),

    /// Error value (#VALUE!, #REF!, etc.)
    Error(CellError),

    /// ISO 8601 date-time stored as text (`t="d"` cells)
    Date(String),

    /// Formula with the value Excel last computed for it
    Formula {
        /// Formula text without the leading `=`
        text: String,
        /// Last calculated value (if the file carried one)
        cached_value: Option<Box<CellValue>>,
    },
}

impl CellValue {
    /// Create a formula value; a leading `=` is stripped.
    pub fn formula<S: Into<String>>(text: S) -> Self {
        let text = text.into();
        let text = match text.strip_prefix('=') {
            Some(rest) => rest.to_string(),
            None => text,
        };
        CellValue::Formula {
            text,
            cached_value: None,
        }
    }

    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Try to get the value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Formula {
                cached_value: Some(v),
                ..
            } => v.as_number(),
            _ => None,
        }
    }

    /// Try to get the value as a string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s),
            CellValue::Formula {
                cached_value: Some(v),
                ..
            } => v.as_string(),
            _ => None,
        }
    }

    /// Try to get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Boolean(b) => Some(*b),
            CellValue::Formula {
                cached_value: Some(v),
                ..
            } => v.as_bool(),
            _ => None,
        }
    }

    /// The formula text, if this is a formula cell
    pub fn formula_text(&self) -> Option<&str> {
        match self {
            CellValue::Formula { text, .. } => Some(text),
            _ => None,
        }
    }
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Boolean(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::String(s)
    }
}

impl From<CellError> for CellValue {
    fn from(e: CellError) -> Self {
        CellValue::Error(e)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::String(s) => f.write_str(s),
            CellValue::Error(e) => f.write_str(e.as_str()),
            CellValue::Date(d) => f.write_str(d),
            CellValue::Formula { text, .. } => write!(f, "={text}"),
        }
    }
}

/// Excel error values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellError {
    /// #NULL! - Incorrect range operator
    Null,
    /// #DIV/0! - Division by zero
    Div0,
    /// #VALUE! - Wrong type of argument or operand
    Value,
    /// #REF! - Invalid cell reference
    Ref,
    /// #NAME? - Unrecognized formula name
    Name,
    /// #NUM! - Invalid numeric value
    Num,
    /// #N/A - Value not available
    Na,
    /// #GETTING_DATA - External data is loading
    GettingData,
    /// #SPILL! - Dynamic array cannot spill
    Spill,
    /// #CALC! - Calculation error
    Calc,
}

impl CellError {
    const ALL: [CellError; 10] = [
        CellError::Null,
        CellError::Div0,
        CellError::Value,
        CellError::Ref,
        CellError::Name,
        CellError::Num,
        CellError::Na,
        CellError::GettingData,
        CellError::Spill,
        CellError::Calc,
    ];

    /// Get the display string for this error
    pub fn as_str(&self) -> &'static str {
        match self {
            CellError::Null => "#NULL!",
            CellError::Div0 => "#DIV/0!",
            CellError::Value => "#VALUE!",
            CellError::Ref => "#REF!",
            CellError::Name => "#NAME?",
            CellError::Num => "#NUM!",
            CellError::Na => "#N/A",
            CellError::GettingData => "#GETTING_DATA",
            CellError::Spill => "#SPILL!",
            CellError::Calc => "#CALC!",
        }
    }

    /// Parse an error literal as it appears in a cell (`#REF!`)
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_strips_equals() {
        let value = CellValue::formula("=SUM(A1:A3)");
        assert_eq!(value.formula_text(), Some("SUM(A1:A3)"));
        assert_eq!(value.to_string(), "=SUM(A1:A3)");
    }

    #[test]
    fn test_cached_value_accessors() {
        let value = CellValue::Formula {
            text: "A1*2".into(),
            cached_value: Some(Box::new(CellValue::Number(8.0))),
        };
        assert_eq!(value.as_number(), Some(8.0));
        assert_eq!(value.as_string(), None);
    }

    #[test]
    fn test_error_parse() {
        assert_eq!(CellError::parse("#DIV/0!"), Some(CellError::Div0));
        assert_eq!(CellError::parse("#n/a"), Some(CellError::Na));
        assert_eq!(CellError::parse("#BOGUS"), None);
    }
}
