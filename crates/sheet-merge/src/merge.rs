//! The merge operation.

use std::path::{Path, PathBuf};

use crate::error::{MergeError, Result};
use crate::plan::{MergePlan, Resolution};
use crate::session::{Backend, BookId, Session};

/// What to merge and where to write it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    /// Workbook receiving the copies
    pub target: PathBuf,
    /// Workbook the sheets are copied from
    pub source: PathBuf,
    /// Where the merged workbook is saved; the target file itself is not modified
    pub output: PathBuf,
    pub plan: MergePlan,
}

impl Default for MergeRequest {
    fn default() -> Self {
        Self {
            target: PathBuf::from("./result/basic-1.xlsx"),
            source: PathBuf::from("./result/basic-2.xlsx"),
            output: PathBuf::from("./result/basic-merge.xlsx"),
            plan: MergePlan::default(),
        }
    }
}

/// Outcome of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub output: PathBuf,
    /// Sheet names of the saved workbook, in tab order
    pub sheets: Vec<String>,
}

/// Copy the planned sheets from `request.source` into `request.target` and
/// save the result to `request.output`.
///
/// The plan is checked against both workbooks before anything is copied, and
/// the sheet order is checked again before saving. The backend is shut down
/// whether the merge succeeds or fails.
pub fn merge<B: Backend>(backend: B, request: &MergeRequest) -> Result<MergeReport> {
    let mut session = Session::new(backend);
    let report = run_merge(&mut session, request)?;
    session.close()?;
    Ok(report)
}

fn run_merge<B: Backend>(session: &mut Session<B>, request: &MergeRequest) -> Result<MergeReport> {
    tracing::info!(
        "Merging {} into {}",
        request.source.display(),
        request.target.display()
    );
    let (target, source, resolution) = open_and_resolve(session, request)?;

    for step in &resolution.steps {
        tracing::debug!(
            "Copying source sheet {} after target sheet {} as '{}'",
            step.source_index + 1,
            step.insert_after + 1,
            step.final_name()
        );
        session.copy_sheet_after(source, step.source_index, target, step.insert_after)?;
        if let Some(name) = &step.rename {
            session.rename_sheet(target, step.insert_after + 1, name)?;
        }
    }

    let actual = session.sheet_names(target)?;
    if actual != resolution.final_order {
        return Err(MergeError::UnexpectedSheetOrder {
            expected: resolution.final_order,
            actual,
        });
    }

    session.save_as(target, &request.output)?;
    session.close_book(source)?;
    session.close_book(target)?;

    tracing::info!(
        "Wrote {} ({} sheets)",
        request.output.display(),
        actual.len()
    );
    Ok(MergeReport {
        output: request.output.clone(),
        sheets: actual,
    })
}

/// The sheet order `merge` would produce, without copying or saving anything.
pub fn preview<B: Backend>(backend: B, request: &MergeRequest) -> Result<Vec<String>> {
    let mut session = Session::new(backend);
    let (target, source, resolution) = open_and_resolve(&mut session, request)?;
    session.close_book(source)?;
    session.close_book(target)?;
    session.close()?;
    Ok(resolution.final_order)
}

/// Sheet names of one workbook, in tab order.
pub fn list_sheets<B: Backend>(backend: B, path: &Path) -> Result<Vec<String>> {
    let mut session = Session::new(backend);
    let book = session.open(path)?;
    let names = session.sheet_names(book)?;
    session.close_book(book)?;
    session.close()?;
    Ok(names)
}

fn open_and_resolve<B: Backend>(
    session: &mut Session<B>,
    request: &MergeRequest,
) -> Result<(BookId, BookId, Resolution)> {
    let target = session.open(&request.target)?;
    let source = session.open(&request.source)?;

    let target_names = session.sheet_names(target)?;
    let source_names = session.sheet_names(source)?;
    tracing::debug!("Target sheets: {target_names:?}");
    tracing::debug!("Source sheets: {source_names:?}");

    let resolution = request.plan.resolve(&target_names, &source_names)?;
    Ok((target, source, resolution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::MergeStep;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Tracks sheet names only. `misplace` makes copies land at the end,
    /// as a misbehaving application would.
    struct NamesOnly {
        books: Vec<Vec<String>>,
        log: Rc<RefCell<Vec<String>>>,
        misplace: bool,
    }

    impl NamesOnly {
        fn new(target: &[&str], source: &[&str]) -> (Self, Rc<RefCell<Vec<String>>>) {
            let log = Rc::new(RefCell::new(Vec::new()));
            let backend = Self {
                books: vec![
                    target.iter().map(|s| s.to_string()).collect(),
                    source.iter().map(|s| s.to_string()).collect(),
                ],
                log: Rc::clone(&log),
                misplace: false,
            };
            (backend, log)
        }

        fn record(&self, entry: impl Into<String>) {
            self.log.borrow_mut().push(entry.into());
        }
    }

    impl Backend for NamesOnly {
        fn open(&mut self, path: &Path) -> Result<BookId> {
            self.record(format!("open {}", path.display()));
            let index = if path.ends_with("target.xlsx") { 0 } else { 1 };
            Ok(BookId(index))
        }
        fn sheet_names(&self, book: BookId) -> Result<Vec<String>> {
            Ok(self.books[book.0 as usize].clone())
        }
        fn copy_sheet_after(&mut self, s: BookId, i: usize, t: BookId, after: usize) -> Result<()> {
            self.record("copy");
            let name = self.books[s.0 as usize][i].clone();
            let target = &mut self.books[t.0 as usize];
            let at = if self.misplace { target.len() } else { after + 1 };
            target.insert(at, name);
            Ok(())
        }
        fn rename_sheet(&mut self, book: BookId, i: usize, name: &str) -> Result<()> {
            self.record("rename");
            self.books[book.0 as usize][i] = name.to_string();
            Ok(())
        }
        fn save_as(&mut self, _: BookId, path: &Path) -> Result<()> {
            self.record(format!("save {}", path.display()));
            Ok(())
        }
        fn close_book(&mut self, _: BookId) -> Result<()> {
            self.record("close");
            Ok(())
        }
        fn shutdown(&mut self) -> Result<()> {
            self.record("shutdown");
            Ok(())
        }
    }

    fn request() -> MergeRequest {
        MergeRequest {
            target: PathBuf::from("target.xlsx"),
            source: PathBuf::from("source.xlsx"),
            output: PathBuf::from("out.xlsx"),
            plan: MergePlan::default(),
        }
    }

    #[test]
    fn test_default_request_paths() {
        let request = MergeRequest::default();
        assert_eq!(request.target, PathBuf::from("./result/basic-1.xlsx"));
        assert_eq!(request.source, PathBuf::from("./result/basic-2.xlsx"));
        assert_eq!(request.output, PathBuf::from("./result/basic-merge.xlsx"));
    }

    #[test]
    fn test_merge_call_sequence() {
        let (backend, log) = NamesOnly::new(&["S1", "S2", "S3"], &["X", "Y", "Z"]);
        let report = merge(backend, &request()).unwrap();

        assert_eq!(
            report.sheets,
            vec!["S1", "S2", "S3", "Sheet4", "Sheet5", "Sheet6"]
        );
        assert_eq!(
            *log.borrow(),
            vec![
                "open target.xlsx",
                "open source.xlsx",
                "copy",
                "rename",
                "copy",
                "rename",
                "copy",
                "rename",
                "save out.xlsx",
                "close",
                "close",
                "shutdown",
            ]
        );
    }

    #[test]
    fn test_plan_error_touches_nothing() {
        let (backend, log) = NamesOnly::new(&["S1", "S2", "S3"], &["X", "Y"]);
        let err = merge(backend, &request()).unwrap_err();

        assert!(matches!(err, MergeError::Plan(_)));
        assert_eq!(
            *log.borrow(),
            vec!["open target.xlsx", "open source.xlsx", "shutdown"]
        );
    }

    #[test]
    fn test_unexpected_order_is_not_saved() {
        let (mut backend, log) = NamesOnly::new(&["S1", "S2", "S3", "S4"], &["X"]);
        backend.misplace = true;
        let mut request = request();
        request.plan = MergePlan {
            steps: vec![MergeStep::at(1, 1, "New")],
        };

        let err = merge(backend, &request).unwrap_err();
        match err {
            MergeError::UnexpectedSheetOrder { expected, actual } => {
                assert_eq!(expected, vec!["S1", "New", "S2", "S3", "S4"]);
                assert_eq!(actual, vec!["S1", "New", "S3", "S4", "X"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!log.borrow().iter().any(|entry| entry.starts_with("save")));
        assert_eq!(log.borrow().last().map(String::as_str), Some("shutdown"));
    }

    #[test]
    fn test_preview_and_list_do_not_mutate() {
        let (backend, log) = NamesOnly::new(&["S1", "S2", "S3"], &["X", "Y", "Z"]);
        let order = preview(backend, &request()).unwrap();
        assert_eq!(order, vec!["S1", "S2", "S3", "Sheet4", "Sheet5", "Sheet6"]);
        assert!(!log.borrow().iter().any(|e| e == "copy" || e.starts_with("save")));

        let (backend, _) = NamesOnly::new(&["S1", "S2"], &[]);
        assert_eq!(
            list_sheets(backend, Path::new("target.xlsx")).unwrap(),
            vec!["S1", "S2"]
        );
    }
}
