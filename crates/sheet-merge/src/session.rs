//! The backend seam and the session guard that owns it.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::error::Result;

/// Opaque handle for a workbook opened in a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BookId(pub u64);

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The workbook operations a merge needs.
///
/// Sheet indices are 0-based. A backend may own an external process; it must
/// release it in [`Backend::shutdown`], which may be called more than once.
pub trait Backend {
    /// Open a workbook from a file path.
    fn open(&mut self, path: &Path) -> Result<BookId>;

    /// Sheet names of an open workbook, in tab order.
    fn sheet_names(&self, book: BookId) -> Result<Vec<String>>;

    /// Copy sheet `sheet_index` of `source` into `target`, directly after
    /// sheet `after_index`. The copy takes the source sheet's name, suffixed
    /// `" (2)"`, `" (3)"`, ... if that name is taken.
    fn copy_sheet_after(
        &mut self,
        source: BookId,
        sheet_index: usize,
        target: BookId,
        after_index: usize,
    ) -> Result<()>;

    /// Rename a sheet.
    fn rename_sheet(&mut self, book: BookId, sheet_index: usize, name: &str) -> Result<()>;

    /// Save a workbook under a new path.
    fn save_as(&mut self, book: BookId, path: &Path) -> Result<()>;

    /// Close a workbook without saving.
    fn close_book(&mut self, book: BookId) -> Result<()>;

    /// Close everything and release the application.
    fn shutdown(&mut self) -> Result<()>;
}

/// Scoped ownership of a backend.
///
/// [`Session::close`] shuts the backend down and reports failures. A session
/// dropped without `close` (an early return or a panic) shuts the backend down
/// as well and logs any failure.
pub struct Session<B: Backend> {
    backend: B,
    closed: bool,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            closed: false,
        }
    }

    /// Shut the backend down.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.backend.shutdown()
    }
}

impl<B: Backend> Deref for Session<B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend> DerefMut for Session<B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::debug!("Session dropped without close; shutting backend down");
        if let Err(e) = self.backend.shutdown() {
            tracing::warn!("Backend shutdown failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MergeError;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Recorder {
        shutdowns: Rc<Cell<usize>>,
        fail_shutdown: bool,
    }

    impl Backend for Recorder {
        fn open(&mut self, _path: &Path) -> Result<BookId> {
            Ok(BookId(1))
        }
        fn sheet_names(&self, _book: BookId) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn copy_sheet_after(&mut self, _: BookId, _: usize, _: BookId, _: usize) -> Result<()> {
            Ok(())
        }
        fn rename_sheet(&mut self, _: BookId, _: usize, _: &str) -> Result<()> {
            Ok(())
        }
        fn save_as(&mut self, _: BookId, _: &Path) -> Result<()> {
            Ok(())
        }
        fn close_book(&mut self, book: BookId) -> Result<()> {
            Err(MergeError::UnknownBook(book))
        }
        fn shutdown(&mut self) -> Result<()> {
            self.shutdowns.set(self.shutdowns.get() + 1);
            if self.fail_shutdown {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "application hung").into())
            } else {
                Ok(())
            }
        }
    }

    fn recorder(fail_shutdown: bool) -> (Recorder, Rc<Cell<usize>>) {
        let shutdowns = Rc::new(Cell::new(0));
        let backend = Recorder {
            shutdowns: Rc::clone(&shutdowns),
            fail_shutdown,
        };
        (backend, shutdowns)
    }

    #[test]
    fn test_close_shuts_down_once() {
        let (backend, shutdowns) = recorder(false);
        let mut session = Session::new(backend);
        assert_eq!(session.open(Path::new("a.xlsx")).unwrap(), BookId(1));
        session.close().unwrap();
        assert_eq!(shutdowns.get(), 1);
    }

    #[test]
    fn test_close_reports_failure() {
        let (backend, shutdowns) = recorder(true);
        assert!(Session::new(backend).close().is_err());
        assert_eq!(shutdowns.get(), 1);
    }

    #[test]
    fn test_drop_on_error_path_shuts_down() {
        let (backend, shutdowns) = recorder(false);
        let run = || -> Result<()> {
            let mut session = Session::new(backend);
            let book = session.open(Path::new("a.xlsx"))?;
            session.close_book(book)?;
            session.close()
        };
        assert!(matches!(run(), Err(MergeError::UnknownBook(BookId(1)))));
        assert_eq!(shutdowns.get(), 1);
    }

    #[test]
    fn test_drop_swallows_shutdown_failure() {
        let (backend, shutdowns) = recorder(true);
        drop(Session::new(backend));
        assert_eq!(shutdowns.get(), 1);
    }
}
