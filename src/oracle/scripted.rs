//! Scripted oracle replaying queued measurements.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{LayoutHandle, LayoutOracle, PageMeasurement};
use crate::error::{Error, Result};

/// One scripted response.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Open succeeds and reports this measurement
    Measure(PageMeasurement),
    /// Open fails with the given reason
    Unavailable(String),
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: Mutex<VecDeque<ScriptStep>>,
    last: Mutex<Option<ScriptStep>>,
    opened: Mutex<Vec<PathBuf>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// A deterministic oracle for tests.
///
/// Each `open` consumes the next step; once the script runs out the final
/// step repeats. Clones share the script and the counters, so a test can
/// keep a clone to inspect what the code under test did.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    state: Arc<ScriptState>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    /// Create an oracle replaying `steps`.
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        let oracle = Self::default();
        oracle.push_all(steps);
        oracle
    }

    /// Hold every open for `delay`, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Append a step.
    pub fn push(&self, step: ScriptStep) {
        self.lock_steps().push_back(step);
    }

    /// Append several steps.
    pub fn push_all(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        self.lock_steps().extend(steps);
    }

    /// Number of `open` calls so far.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of handles closed so far.
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open handles.
    pub fn max_concurrent(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    /// Paths passed to `open`, in call order.
    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.state
            .opened
            .lock()
            .map(|paths| paths.clone())
            .unwrap_or_default()
    }

    /// Steps not consumed yet.
    pub fn remaining(&self) -> usize {
        self.lock_steps().len()
    }

    fn lock_steps(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptStep>> {
        self.state
            .steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_step(&self) -> Option<ScriptStep> {
        let mut last = self
            .state
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(step) = self.lock_steps().pop_front() {
            *last = Some(step);
        }
        last.clone()
    }
}

impl LayoutOracle for ScriptedOracle {
    fn open(&self, path: &Path) -> Result<Box<dyn LayoutHandle>> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut opened) = self.state.opened.lock() {
            opened.push(path.to_path_buf());
        }

        let measurement = match self.next_step() {
            Some(ScriptStep::Measure(m)) => m,
            Some(ScriptStep::Unavailable(reason)) => {
                return Err(Error::oracle_unavailable(path, reason))
            }
            None => return Err(Error::oracle_unavailable(path, "script is empty")),
        };

        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        Ok(Box::new(ScriptedHandle {
            measurement,
            state: self.state.clone(),
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedHandle {
    measurement: PageMeasurement,
    state: Arc<ScriptState>,
}

impl LayoutHandle for ScriptedHandle {
    fn total_pages(&self) -> Result<u32> {
        Ok(self.measurement.total_pages)
    }

    fn paragraph_count(&self) -> Result<usize> {
        Ok(self.measurement.paragraph_count())
    }

    fn page_of(&self, index: usize) -> Result<u32> {
        self.measurement
            .page_of(index)
            .ok_or_else(|| Error::Oracle(format!("no paragraph {}", index)))
    }

    fn close(&mut self) -> Result<()> {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
