//! Waiting for exclusive write access.
//!
//! A layout engine may hold the document open for a moment after a
//! measurement. Before writing, the engine probes the file and backs off
//! until the probe succeeds or the wait bound is reached.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Probes whether a file can be opened for exclusive writing.
pub trait AccessGate: Send + Sync {
    /// `true` when the file is free.
    fn try_acquire(&self, path: &Path) -> bool;
}

/// Probes the real file by opening it read/write.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileAccessGate;

impl AccessGate for FileAccessGate {
    fn try_acquire(&self, path: &Path) -> bool {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                log::debug!("{} is busy: {}", path.display(), e);
                false
            }
        }
    }
}

/// Gate with a scripted free/busy pattern, for tests.
#[derive(Debug, Clone)]
pub struct ScriptedGate {
    mode: GateScript,
    probes: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Copy)]
enum GateScript {
    BusyFor(usize),
    FreeFor(usize),
    AlwaysBusy,
}

impl ScriptedGate {
    fn scripted(mode: GateScript) -> Self {
        Self {
            mode,
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Busy for the first `probes` probes, free afterwards.
    pub fn busy_for(probes: usize) -> Self {
        Self::scripted(GateScript::BusyFor(probes))
    }

    /// Free for the first `probes` probes, busy afterwards.
    pub fn free_for(probes: usize) -> Self {
        Self::scripted(GateScript::FreeFor(probes))
    }

    /// Never free.
    pub fn always_busy() -> Self {
        Self::scripted(GateScript::AlwaysBusy)
    }

    /// Probes made so far.
    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl AccessGate for ScriptedGate {
    fn try_acquire(&self, _path: &Path) -> bool {
        let seen = self.probes.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            GateScript::BusyFor(busy) => seen >= busy,
            GateScript::FreeFor(free) => seen < free,
            GateScript::AlwaysBusy => false,
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPolicy {
    /// Total time to wait before giving up
    pub max_wait: Duration,
    /// First sleep between probes
    pub initial_interval: Duration,
    /// Growth factor of the sleep
    pub backoff: u32,
    /// Upper bound of a single sleep
    pub max_interval: Duration,
}

impl WaitPolicy {
    /// Set the total wait bound.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set the first sleep interval.
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// A policy that never sleeps, for tests.
    pub fn immediate() -> Self {
        Self {
            max_wait: Duration::ZERO,
            initial_interval: Duration::ZERO,
            backoff: 1,
            max_interval: Duration::ZERO,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(15),
            initial_interval: Duration::from_millis(500),
            backoff: 2,
            max_interval: Duration::from_secs(2),
        }
    }
}

/// Block until `gate` reports `path` free.
///
/// Fails with [`Error::ResourceContention`] once `policy.max_wait` has been
/// spent sleeping.
pub fn wait_for_exclusive(gate: &dyn AccessGate, path: &Path, policy: &WaitPolicy) -> Result<()> {
    let mut waited = Duration::ZERO;
    let mut interval = policy.initial_interval;

    loop {
        if gate.try_acquire(path) {
            if !waited.is_zero() {
                log::debug!("{} free after {}ms", path.display(), waited.as_millis());
            }
            return Ok(());
        }
        if waited >= policy.max_wait {
            log::warn!(
                "{} still busy after {}ms",
                path.display(),
                waited.as_millis()
            );
            return Err(Error::ResourceContention {
                path: path.to_path_buf(),
                waited_ms: waited.as_millis() as u64,
            });
        }

        let sleep = interval.min(policy.max_wait - waited);
        std::thread::sleep(sleep);
        waited += sleep;
        interval = interval.saturating_mul(policy.backoff).min(policy.max_interval);
    }
}
