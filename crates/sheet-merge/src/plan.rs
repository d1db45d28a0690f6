//! Merge plans: which sheets to copy, where to put them, and what to call them.
//!
//! A plan is resolved against the sheet names of both workbooks before any
//! workbook is touched. Resolution replays every step on a simulated copy of
//! the target's sheet list, so a position in step N refers to the target as it
//! looks after steps 1..N-1 have inserted their sheets.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sheet_merge_core::{unique_sheet_name, validate_sheet_name};

use crate::error::{MergeError, PlanError, Result, Side};

/// Selects a sheet by 1-based position or by name (case-insensitive).
///
/// In JSON a number is a position and a string is a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetSelector {
    Position(usize),
    Name(String),
}

impl fmt::Display for SheetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetSelector::Position(p) => write!(f, "#{p}"),
            SheetSelector::Name(name) => write!(f, "'{name}'"),
        }
    }
}

impl From<usize> for SheetSelector {
    fn from(position: usize) -> Self {
        SheetSelector::Position(position)
    }
}

impl From<&str> for SheetSelector {
    fn from(name: &str) -> Self {
        SheetSelector::Name(name.to_string())
    }
}

/// One sheet copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStep {
    /// Sheet of the source workbook to copy
    pub source: SheetSelector,
    /// Target sheet the copy is inserted after; `None` appends at the end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<SheetSelector>,
    /// New name for the copy; `None` keeps the name Excel gives it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
}

impl MergeStep {
    /// Copy source sheet `source` after target sheet `after` (both 1-based) and rename it.
    pub fn at(source: usize, after: usize, rename: &str) -> Self {
        Self {
            source: SheetSelector::Position(source),
            after: Some(SheetSelector::Position(after)),
            rename: Some(rename.to_string()),
        }
    }
}

/// An ordered list of sheet copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    pub steps: Vec<MergeStep>,
}

impl Default for MergePlan {
    /// Source sheets 1, 2 and 3 after target sheets 3, 4 and 5, renamed
    /// `Sheet4`, `Sheet5` and `Sheet6`.
    fn default() -> Self {
        Self {
            steps: vec![
                MergeStep::at(1, 3, "Sheet4"),
                MergeStep::at(2, 4, "Sheet5"),
                MergeStep::at(3, 5, "Sheet6"),
            ],
        }
    }
}

/// A plan step with every selector turned into a 0-based index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
    /// Index of the sheet in the source workbook
    pub source_index: usize,
    /// Index of the target sheet the copy goes after; the copy lands at `insert_after + 1`
    pub insert_after: usize,
    /// Name the copy receives when it is inserted
    pub copy_name: String,
    /// Name the copy is renamed to, if any
    pub rename: Option<String>,
}

impl ResolvedStep {
    /// Name of the copied sheet once the step is complete.
    pub fn final_name(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.copy_name)
    }
}

/// A plan resolved against two concrete workbooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub steps: Vec<ResolvedStep>,
    /// The target's sheet names after every step has run
    pub final_order: Vec<String>,
}

impl MergePlan {
    /// Parse a plan from JSON, e.g. `{"steps":[{"source":1,"after":3,"rename":"Sheet4"}]}`.
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Load a plan from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text).map_err(|source| MergeError::PlanFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the plan against the two workbooks and work out every index.
    ///
    /// Fails without side effects if any selector is out of range or unknown,
    /// or if a new name is invalid or already taken at that point.
    pub fn resolve(
        &self,
        target: &[String],
        source: &[String],
    ) -> std::result::Result<Resolution, PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut sheets = target.to_vec();
        let mut steps = Vec::with_capacity(self.steps.len());

        for (i, step) in self.steps.iter().enumerate() {
            let number = i + 1;

            let source_index = select(&step.source, source, number, Side::Source)?;
            let insert_after = match &step.after {
                Some(selector) => select(selector, &sheets, number, Side::Target)?,
                None => sheets
                    .len()
                    .checked_sub(1)
                    .ok_or(PlanError::PositionOutOfRange {
                        step: number,
                        side: Side::Target,
                        position: 0,
                        count: 0,
                    })?,
            };
            let slot = insert_after + 1;

            let copy_name = unique_sheet_name(sheets.iter().map(String::as_str), &source[source_index]);
            sheets.insert(slot, copy_name.clone());

            if let Some(new_name) = &step.rename {
                let others = sheets
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != slot)
                    .map(|(_, name)| name.as_str());
                validate_sheet_name(others, new_name).map_err(|error| match error {
                    sheet_merge_core::Error::DuplicateSheetName(name) => {
                        PlanError::DuplicateName { step: number, name }
                    }
                    error => PlanError::InvalidName {
                        step: number,
                        error,
                    },
                })?;
                sheets[slot] = new_name.clone();
            }

            steps.push(ResolvedStep {
                source_index,
                insert_after,
                copy_name,
                rename: step.rename.clone(),
            });
        }

        Ok(Resolution {
            steps,
            final_order: sheets,
        })
    }
}

fn select(
    selector: &SheetSelector,
    names: &[String],
    step: usize,
    side: Side,
) -> std::result::Result<usize, PlanError> {
    match selector {
        SheetSelector::Position(position) => {
            if *position == 0 || *position > names.len() {
                return Err(PlanError::PositionOutOfRange {
                    step,
                    side,
                    position: *position,
                    count: names.len(),
                });
            }
            Ok(position - 1)
        }
        SheetSelector::Name(name) => {
            let needle = name.to_lowercase();
            names
                .iter()
                .position(|n| n.to_lowercase() == needle)
                .ok_or_else(|| PlanError::SheetNotFound {
                    step,
                    side,
                    name: name.clone(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_plan_accounts_for_shift() {
        let resolution = MergePlan::default()
            .resolve(&names(&["S1", "S2", "S3"]), &names(&["X", "Y", "Z"]))
            .unwrap();

        let indices: Vec<(usize, usize)> = resolution
            .steps
            .iter()
            .map(|s| (s.source_index, s.insert_after))
            .collect();
        assert_eq!(indices, vec![(0, 2), (1, 3), (2, 4)]);
        assert_eq!(
            resolution.final_order,
            names(&["S1", "S2", "S3", "Sheet4", "Sheet5", "Sheet6"])
        );
    }

    #[test]
    fn test_longer_target_keeps_trailing_sheets() {
        let resolution = MergePlan::default()
            .resolve(&names(&["S1", "S2", "S3", "S4", "S5"]), &names(&["X", "Y", "Z"]))
            .unwrap();
        assert_eq!(
            resolution.final_order,
            names(&["S1", "S2", "S3", "Sheet4", "Sheet5", "Sheet6", "S4", "S5"])
        );
    }

    #[test]
    fn test_short_source_fails_before_anything_runs() {
        let err = MergePlan::default()
            .resolve(&names(&["S1", "S2", "S3"]), &names(&["X", "Y"]))
            .unwrap_err();
        assert!(matches!(
            err,
            PlanError::PositionOutOfRange {
                step: 3,
                side: Side::Source,
                position: 3,
                count: 2
            }
        ));
    }

    #[test]
    fn test_short_target_fails() {
        let err = MergePlan::default()
            .resolve(&names(&["S1", "S2"]), &names(&["X", "Y", "Z"]))
            .unwrap_err();
        assert!(matches!(
            err,
            PlanError::PositionOutOfRange {
                step: 1,
                side: Side::Target,
                ..
            }
        ));
    }

    #[test]
    fn test_rename_collision_is_rejected() {
        // The target already has a "Sheet5"
        let err = MergePlan::default()
            .resolve(&names(&["S1", "S2", "sheet5"]), &names(&["X", "Y", "Z"]))
            .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateName { step: 2, .. }));

        let plan = MergePlan {
            steps: vec![MergeStep::at(1, 1, "bad/name")],
        };
        let err = plan.resolve(&names(&["S1"]), &names(&["X"])).unwrap_err();
        assert!(matches!(err, PlanError::InvalidName { step: 1, .. }));
    }

    #[test]
    fn test_copy_names_follow_excel_without_rename() {
        let plan = MergePlan {
            steps: vec![
                MergeStep {
                    source: SheetSelector::Name("data".into()),
                    after: None,
                    rename: None,
                },
                MergeStep {
                    source: SheetSelector::Position(1),
                    after: Some("Data".into()),
                    rename: None,
                },
            ],
        };
        let resolution = plan.resolve(&names(&["Data"]), &names(&["Data"])).unwrap();
        assert_eq!(resolution.steps[0].final_name(), "Data (2)");
        assert_eq!(resolution.final_order, names(&["Data", "Data (3)", "Data (2)"]));
    }

    #[test]
    fn test_position_zero_and_unknown_name() {
        let plan = MergePlan {
            steps: vec![MergeStep::at(0, 1, "New")],
        };
        assert!(plan.resolve(&names(&["A"]), &names(&["B"])).is_err());

        let plan = MergePlan {
            steps: vec![MergeStep {
                source: "Missing".into(),
                ..MergeStep::at(1, 1, "New")
            }],
        };
        let err = plan.resolve(&names(&["A"]), &names(&["B"])).unwrap_err();
        assert!(matches!(err, PlanError::SheetNotFound { side: Side::Source, .. }));
    }

    #[test]
    fn test_empty_plan() {
        let plan = MergePlan { steps: vec![] };
        assert!(matches!(plan.resolve(&names(&["A"]), &names(&["B"])), Err(PlanError::Empty)));
    }

    #[test]
    fn test_plan_json() {
        let plan = MergePlan::from_json_str(
            r#"{"steps":[{"source":1,"after":"Summary","rename":"Sheet4"},{"source":"Notes"}]}"#,
        )
        .unwrap();
        assert_eq!(
            plan.steps,
            vec![
                MergeStep {
                    source: SheetSelector::Position(1),
                    after: Some("Summary".into()),
                    rename: Some("Sheet4".into()),
                },
                MergeStep {
                    source: "Notes".into(),
                    after: None,
                    rename: None,
                },
            ]
        );

        let json = serde_json::to_string(&MergePlan::default()).unwrap();
        assert_eq!(MergePlan::from_json_str(&json).unwrap(), MergePlan::default());
    }
}
