//! Page-layout oracle client.
//!
//! A layout oracle is an external engine that opens a persisted document and
//! reports how it paginates. The engine is slow and stateful, so the client
//! wraps every measurement in the same discipline:
//!
//! 1. the fully qualified path is checked against a length ceiling before
//!    the engine sees it;
//! 2. measurements of the same path are serialized;
//! 3. each measurement opens a fresh handle that is closed on every exit
//!    path, including errors.
//!
//! Implementations:
//!
//! - [`FlowOracle`]: paginates the JSON snapshot itself (single column flow)
//! - [`CommandOracle`]: runs an external engine that prints JSON
//! - [`ScriptedOracle`]: replays queued measurements, for tests

mod command;
mod flow;
mod scripted;

pub use command::CommandOracle;
pub use flow::{FlowOptions, FlowOracle};
pub use scripted::{ScriptStep, ScriptedOracle};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default ceiling on the fully qualified document path, in characters.
pub const DEFAULT_MAX_PATH_LEN: usize = 260;

/// Paragraphs per page assumed by [`PageMeasurement::estimate`].
pub const ESTIMATED_PARAGRAPHS_PER_PAGE: usize = 20;

/// An external page-layout engine.
pub trait LayoutOracle: Send + Sync {
    /// Open the persisted document at `path`.
    ///
    /// Fails with [`Error::OracleUnavailable`] when the engine cannot open it.
    fn open(&self, path: &Path) -> Result<Box<dyn LayoutHandle>>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "oracle"
    }
}

/// An open document inside a layout engine.
pub trait LayoutHandle {
    /// Total number of pages.
    fn total_pages(&self) -> Result<u32>;

    /// Number of body paragraphs the engine sees.
    fn paragraph_count(&self) -> Result<usize>;

    /// 1-indexed page on which the paragraph at `index` starts.
    fn page_of(&self, index: usize) -> Result<u32>;

    /// Release the document. Called exactly once by the client.
    fn close(&mut self) -> Result<()>;
}

/// Snapshot of a document's pagination.
///
/// Only valid for the document state it was taken from; any mutation makes
/// it stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeasurement {
    /// Total number of pages
    pub total_pages: u32,
    /// Page (1-indexed) of each paragraph, in body order
    pub paragraph_pages: Vec<u32>,
}

impl PageMeasurement {
    /// Create a measurement.
    pub fn new(total_pages: u32, paragraph_pages: Vec<u32>) -> Self {
        Self {
            total_pages,
            paragraph_pages,
        }
    }

    /// Coarse pagination assuming `per_page` paragraphs per page.
    ///
    /// Only used when no engine can measure the document.
    pub fn estimate(paragraph_count: usize, per_page: usize) -> Self {
        let per_page = per_page.max(1);
        let paragraph_pages: Vec<u32> = (0..paragraph_count)
            .map(|i| (i / per_page) as u32 + 1)
            .collect();
        let total_pages = paragraph_pages.last().copied().unwrap_or(1);
        Self::new(total_pages, paragraph_pages)
    }

    /// Page of the paragraph at `index`.
    pub fn page_of(&self, index: usize) -> Option<u32> {
        self.paragraph_pages.get(index).copied()
    }

    /// Number of paragraphs measured.
    pub fn paragraph_count(&self) -> usize {
        self.paragraph_pages.len()
    }

    /// Indices of the paragraphs starting on `page`, in body order.
    pub fn paragraphs_on(&self, page: u32) -> Vec<usize> {
        self.paragraph_pages
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p == page)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Closes the handle when dropped.
struct HandleGuard {
    handle: Box<dyn LayoutHandle>,
    path: PathBuf,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if let Err(e) = self.handle.close() {
            log::warn!("Failed to close layout handle for {}: {}", self.path.display(), e);
        }
    }
}

/// Client enforcing the oracle call discipline.
pub struct OracleClient {
    oracle: Arc<dyn LayoutOracle>,
    max_path_len: usize,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl OracleClient {
    /// Create a client for an oracle.
    pub fn new<O: LayoutOracle + 'static>(oracle: O) -> Self {
        Self::from_arc(Arc::new(oracle))
    }

    /// Create a client for a shared oracle.
    pub fn from_arc(oracle: Arc<dyn LayoutOracle>) -> Self {
        Self {
            oracle,
            max_path_len: DEFAULT_MAX_PATH_LEN,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Set the path-length ceiling.
    pub fn with_max_path_len(mut self, max_path_len: usize) -> Self {
        self.max_path_len = max_path_len;
        self
    }

    /// The path-length ceiling.
    pub fn max_path_len(&self) -> usize {
        self.max_path_len
    }

    /// Name of the wrapped oracle.
    pub fn oracle_name(&self) -> &str {
        self.oracle.name()
    }

    /// Resolve `path` to a fully qualified path within the ceiling.
    pub fn check_path(&self, path: &Path) -> Result<PathBuf> {
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let len = full.to_string_lossy().chars().count();
        if len > self.max_path_len {
            return Err(Error::PathTooLong {
                path: full,
                len,
                limit: self.max_path_len,
            });
        }
        Ok(full)
    }

    /// Measure the document persisted at `path`.
    pub fn measure(&self, path: &Path) -> Result<PageMeasurement> {
        let full = self.check_path(path)?;
        let lock = self.path_lock(&full);
        let _serialized = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let handle = self.oracle.open(&full).map_err(|e| match e {
            Error::OracleUnavailable { .. } => e,
            other => Error::oracle_unavailable(&full, other.to_string()),
        })?;
        let guard = HandleGuard {
            handle,
            path: full.clone(),
        };

        let total_pages = guard.handle.total_pages()?;
        let count = guard.handle.paragraph_count()?;
        let paragraph_pages = (0..count)
            .map(|i| guard.handle.page_of(i))
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "{} measured {}: {} pages, {} paragraphs",
            self.oracle.name(),
            full.display(),
            total_pages,
            count
        );

        Ok(PageMeasurement::new(total_pages, paragraph_pages))
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("oracle", &self.oracle.name())
            .field("max_path_len", &self.max_path_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_estimate() {
        let m = PageMeasurement::estimate(45, 20);
        assert_eq!(m.total_pages, 3);
        assert_eq!(m.page_of(0), Some(1));
        assert_eq!(m.page_of(20), Some(2));
        assert_eq!(m.page_of(44), Some(3));
        assert_eq!(m.paragraphs_on(3), (40..45).collect::<Vec<_>>());

        let empty = PageMeasurement::estimate(0, 20);
        assert_eq!(empty.total_pages, 1);
    }

    #[test]
    fn test_measure_closes_handle() {
        let oracle = ScriptedOracle::new(vec![ScriptStep::Measure(PageMeasurement::new(
            2,
            vec![1, 1, 2],
        ))]);
        let client = OracleClient::new(oracle.clone());

        let m = client.measure(Path::new("/tmp/letter.json")).unwrap();
        assert_eq!(m.total_pages, 2);
        assert_eq!(m.paragraph_pages, vec![1, 1, 2]);
        assert_eq!(oracle.opens(), 1);
        assert_eq!(oracle.closes(), 1);
    }

    #[test]
    fn test_unavailable_is_reported() {
        let oracle = ScriptedOracle::new(vec![ScriptStep::Unavailable("engine crashed".into())]);
        let client = OracleClient::new(oracle.clone());

        let err = client.measure(Path::new("/tmp/letter.json")).unwrap_err();
        assert!(matches!(err, Error::OracleUnavailable { .. }));
        assert_eq!(oracle.closes(), 0);
    }

    #[test]
    fn test_path_ceiling_checked_before_open() {
        let oracle = ScriptedOracle::new(vec![ScriptStep::Measure(PageMeasurement::new(1, vec![]))]);
        let client = OracleClient::new(oracle.clone()).with_max_path_len(20);

        let long = PathBuf::from("/").join("a".repeat(40)).join("letter.json");
        let err = client.measure(&long).unwrap_err();
        assert!(matches!(err, Error::PathTooLong { limit: 20, .. }));
        assert_eq!(oracle.opens(), 0);
    }

    struct FailingHandle {
        closed: Arc<AtomicUsize>,
    }

    impl LayoutHandle for FailingHandle {
        fn total_pages(&self) -> Result<u32> {
            Ok(3)
        }

        fn paragraph_count(&self) -> Result<usize> {
            Ok(2)
        }

        fn page_of(&self, index: usize) -> Result<u32> {
            Err(Error::Oracle(format!("paragraph {} is not laid out", index)))
        }

        fn close(&mut self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingOracle {
        closed: Arc<AtomicUsize>,
    }

    impl LayoutOracle for FailingOracle {
        fn open(&self, _path: &Path) -> Result<Box<dyn LayoutHandle>> {
            Ok(Box::new(FailingHandle {
                closed: self.closed.clone(),
            }))
        }
    }

    #[test]
    fn test_handle_closed_on_error() {
        let closed = Arc::new(AtomicUsize::new(0));
        let client = OracleClient::new(FailingOracle {
            closed: closed.clone(),
        });

        let err = client.measure(Path::new("/tmp/letter.json")).unwrap_err();
        assert!(matches!(err, Error::Oracle(_)));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_path_measurements_do_not_overlap() {
        let oracle = ScriptedOracle::new(vec![ScriptStep::Measure(PageMeasurement::new(
            1,
            vec![1],
        ))])
        .with_delay(std::time::Duration::from_millis(20));
        let client = Arc::new(OracleClient::new(oracle.clone()));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                std::thread::spawn(move || client.measure(Path::new("/tmp/same.json")).unwrap())
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(oracle.opens(), 4);
        assert_eq!(oracle.max_concurrent(), 1);
    }
}
