//! Persisted issue counters.
//!
//! Counters live in one section of a JSON configuration file that other
//! features also write to. Every write re-reads the file and deep-merges a
//! sparse overlay into it (see [`deep_merge`]), so a writer only ever
//! changes the keys it names. Counters are written back immediately after
//! each advance; a crash loses at most one increment.
//!
//! # Example
//!
//! ```no_run
//! use docstamp::counter::{CounterStore, Sequence};
//!
//! fn main() -> docstamp::Result<()> {
//!     let store = CounterStore::open("config.json");
//!     let number = store.advance(Sequence::A)?;
//!     println!("stamp issue {}", number);
//!     Ok(())
//! }
//! ```

mod merge;

pub use merge::{deep_merge, merged};

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{Datelike, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// Section of the shared store holding the counters.
pub const COUNTER_SECTION: &str = "report_counters";

/// Timestamp format of `last_updated`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which counter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    /// Notification letters
    A,
    /// Rectification orders
    B,
}

impl Sequence {
    /// Key of this sequence inside the counter section.
    pub fn key(&self) -> &'static str {
        match self {
            Sequence::A => "sequence_a",
            Sequence::B => "sequence_b",
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Sequence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "sequence_a" | "notification" => Ok(Sequence::A),
            "b" | "sequence_b" | "rectification" => Ok(Sequence::B),
            other => Err(Error::Other(format!("Unknown sequence: {}", other))),
        }
    }
}

/// A counter section as read from disk.
struct StoredSection {
    counters: Counters,
    period_key: Option<i32>,
}

/// Counter values as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Next notification number
    pub sequence_a: u64,
    /// Next rectification number
    pub sequence_b: u64,
    /// Period (year) the sequences belong to
    pub period_key: i32,
    /// Last write time, `%Y-%m-%d %H:%M:%S`
    #[serde(default)]
    pub last_updated: String,
}

impl Counters {
    /// Current value of a sequence.
    pub fn get(&self, which: Sequence) -> u64 {
        match which {
            Sequence::A => self.sequence_a,
            Sequence::B => self.sequence_b,
        }
    }
}

/// Source of the current time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    /// Local wall clock
    #[default]
    System,
    /// Frozen time, for tests and replays
    Fixed(NaiveDateTime),
}

impl Clock {
    /// Current local time.
    pub fn now(&self) -> NaiveDateTime {
        match self {
            Clock::System => Local::now().naive_local(),
            Clock::Fixed(t) => *t,
        }
    }

    /// Current period key (the calendar year).
    pub fn period_key(&self) -> i32 {
        self.now().year()
    }

    /// Current time as a `last_updated` string.
    pub fn timestamp(&self) -> String {
        self.now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Options for a [`CounterStore`].
#[derive(Debug, Clone)]
pub struct CounterOptions {
    /// Section name inside the store
    pub section: String,
    /// Initial value of sequence A when the section is created
    pub default_a: u64,
    /// Initial value of sequence B when the section is created
    pub default_b: u64,
    /// Time source
    pub clock: Clock,
}

impl CounterOptions {
    /// Create new counter options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the section name.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    /// Set initial values used when no counters exist yet.
    pub fn with_defaults(mut self, sequence_a: u64, sequence_b: u64) -> Self {
        self.default_a = sequence_a;
        self.default_b = sequence_b;
        self
    }

    /// Set the time source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for CounterOptions {
    fn default() -> Self {
        Self {
            section: COUNTER_SECTION.to_string(),
            default_a: 104,
            default_b: 235,
            clock: Clock::System,
        }
    }
}

/// Handle to the persisted counters.
///
/// The handle holds no cached state: every call reads the file. Pass the
/// handle explicitly to whatever needs numbering.
#[derive(Debug)]
pub struct CounterStore {
    path: PathBuf,
    options: CounterOptions,
    write_lock: Mutex<()>,
}

impl CounterStore {
    /// Open a store at `path` with default options. The file is created on
    /// first load if missing.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, CounterOptions::default())
    }

    /// Open a store with custom options.
    pub fn with_options(path: impl Into<PathBuf>, options: CounterOptions) -> Self {
        Self {
            path: path.into(),
            options,
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store options.
    pub fn options(&self) -> &CounterOptions {
        &self.options
    }

    /// Load the counters, applying period rollover.
    ///
    /// When the persisted period differs from the current one, both
    /// sequences restart at 1 and the reset is written back before
    /// returning. Within one period, repeated loads return identical values
    /// and do not write.
    pub fn load(&self) -> Result<Counters> {
        let _guard = self.lock();
        self.load_unlocked()
    }

    /// Value the next [`CounterStore::advance`] of `which` would return.
    pub fn peek(&self, which: Sequence) -> Result<u64> {
        Ok(self.load()?.get(which))
    }

    /// Merge a sparse overlay into the latest on-disk state and write it.
    pub fn save(&self, overlay: Value) -> Result<()> {
        let _guard = self.lock();
        self.save_unlocked(overlay)
    }

    /// Return the current value of `which` and persist `value + 1`.
    pub fn advance(&self, which: Sequence) -> Result<u64> {
        let _guard = self.lock();
        let counters = self.load_unlocked()?;
        let value = counters.get(which);
        let next = value + 1;

        let mut section = Map::new();
        section.insert(which.key().to_string(), json!(next));
        section.insert(
            "last_updated".to_string(),
            json!(self.options.clock.timestamp()),
        );
        let mut overlay = Map::new();
        overlay.insert(self.options.section.clone(), Value::Object(section));
        self.save_unlocked(Value::Object(overlay))?;

        let persisted = self
            .parse_section(&self.read_store()?)?
            .map(|stored| stored.counters.get(which));
        if persisted != Some(next) {
            return Err(Error::ConfigCorrupt(format!(
                "{} verification failed: expected {}, found {:?}",
                which, next, persisted
            )));
        }

        log::info!("Counter {} advanced: {} -> {}", which, value, next);
        Ok(value)
    }

    /// Copy the store file next to itself with a `.backup_<suffix>` name.
    ///
    /// The suffix defaults to the current timestamp.
    pub fn backup(&self, suffix: Option<&str>) -> Result<PathBuf> {
        let _guard = self.lock();
        let suffix = suffix
            .map(str::to_string)
            .unwrap_or_else(|| self.options.clock.now().format("%Y%m%d_%H%M%S").to_string());
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config.json".to_string());
        let backup = self
            .path
            .with_file_name(format!("{}.backup_{}", file_name, suffix));
        std::fs::copy(&self.path, &backup)?;
        log::info!("Counter store backed up to {}", backup.display());
        Ok(backup)
    }

    /// Replace the store with a previously made backup.
    ///
    /// The backup must itself be a readable store.
    pub fn restore(&self, backup: &Path) -> Result<()> {
        let _guard = self.lock();
        let text = std::fs::read_to_string(backup)?;
        let value = parse_store(&text)?;
        self.parse_section(&value)?;
        self.write_store(&value)?;
        log::info!("Counter store restored from {}", backup.display());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned lock only means another writer panicked; the file on
        // disk is still the source of truth.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_unlocked(&self) -> Result<Counters> {
        let store = self.read_store()?;
        let existing = self.parse_section(&store)?;
        let period = self.options.clock.period_key();

        let (counters, write) = match existing {
            None => {
                log::info!(
                    "No counters in {}, starting from defaults",
                    self.path.display()
                );
                (self.initial(period), true)
            }
            Some(stored) if stored.period_key != Some(period) => {
                match stored.period_key {
                    Some(old) => log::info!("New period {} (was {}), counters reset", period, old),
                    None => log::info!("No period recorded, counters reset for {}", period),
                }
                (
                    Counters {
                        sequence_a: 1,
                        sequence_b: 1,
                        period_key: period,
                        last_updated: self.options.clock.timestamp(),
                    },
                    true,
                )
            }
            Some(stored) => (stored.counters, false),
        };

        if write {
            let mut overlay = Map::new();
            overlay.insert(self.options.section.clone(), serde_json::to_value(&counters)?);
            self.save_unlocked(Value::Object(overlay))?;
        }

        Ok(counters)
    }

    fn save_unlocked(&self, overlay: Value) -> Result<()> {
        if !overlay.is_object() {
            return Err(Error::Other("Store overlay must be a JSON object".into()));
        }
        let mut latest = self.read_store()?;
        deep_merge(&mut latest, overlay);
        self.write_store(&latest)
    }

    fn initial(&self, period: i32) -> Counters {
        Counters {
            sequence_a: self.options.default_a,
            sequence_b: self.options.default_b,
            period_key: period,
            last_updated: self.options.clock.timestamp(),
        }
    }

    /// Read the whole store; a missing file reads as `{}`.
    fn read_store(&self) -> Result<Value> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => parse_store(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Object(Map::new())),
            Err(e) => Err(e.into()),
        }
    }

    /// Extract the counter section. Missing sequences take their defaults;
    /// a missing period stays unknown. Present fields of the wrong type are
    /// corruption.
    fn parse_section(&self, store: &Value) -> Result<Option<StoredSection>> {
        let Some(section) = store.get(&self.options.section) else {
            return Ok(None);
        };
        if !section.is_object() {
            return Err(Error::ConfigCorrupt(format!(
                "section `{}` is not an object",
                self.options.section
            )));
        }
        let period_key = match section.get("period_key") {
            None | Some(Value::Null) => None,
            Some(value) => Some(serde_json::from_value::<i32>(value.clone()).map_err(|e| {
                Error::ConfigCorrupt(format!("section `{}`: period_key: {}", self.options.section, e))
            })?),
        };
        // The placeholder period is never read when the stored one is unknown.
        let defaults = serde_json::to_value(self.initial(period_key.unwrap_or_default()))?;
        let full = merged(&defaults, section.clone());
        let counters: Counters = serde_json::from_value(full)
            .map_err(|e| Error::ConfigCorrupt(format!("section `{}`: {}", self.options.section, e)))?;
        Ok(Some(StoredSection { counters, period_key }))
    }

    fn write_store(&self, value: &Value) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

fn parse_store(text: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::ConfigCorrupt(e.to_string()))?;
    if !value.is_object() {
        return Err(Error::ConfigCorrupt("store root is not an object".into()));
    }
    Ok(value)
}
