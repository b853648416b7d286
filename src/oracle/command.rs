//! Oracle backed by an external layout engine command.
//!
//! The command is invoked as `<program> <args...> <document path>` and must
//! print a single JSON object on stdout:
//!
//! ```json
//! {"total_pages": 3, "paragraph_pages": [1, 1, 2, 3]}
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{LayoutHandle, LayoutOracle, PageMeasurement};
use crate::error::{Error, Result};

/// Runs an external engine once per measurement.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandOracle {
    /// Create an oracle running `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Parse a command line such as `"layout-engine --json"`.
    ///
    /// Arguments are split on whitespace; quoting is not supported.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Other("Empty oracle command".into()))?;
        Ok(Self::new(program).args(parts))
    }

    /// Add arguments placed before the document path.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn run(&self, path: &Path) -> Result<PageMeasurement> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                Error::oracle_unavailable(
                    path,
                    format!("cannot start {}: {}", self.program.display(), e),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::oracle_unavailable(
                path,
                format!("{} exited with {}: {}", self.program.display(), output.status, stderr.trim()),
            ));
        }

        let measurement: PageMeasurement = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Oracle(format!("malformed engine output: {}", e)))?;
        if measurement
            .paragraph_pages
            .iter()
            .any(|&p| p == 0 || p > measurement.total_pages)
        {
            return Err(Error::Oracle(format!(
                "paragraph page out of range 1..={}",
                measurement.total_pages
            )));
        }
        Ok(measurement)
    }
}

impl LayoutOracle for CommandOracle {
    fn open(&self, path: &Path) -> Result<Box<dyn LayoutHandle>> {
        let measurement = self.run(path)?;
        Ok(Box::new(CommandHandle { measurement }))
    }

    fn name(&self) -> &str {
        "command"
    }
}

/// The engine exits after printing, so the handle only holds its answer.
struct CommandHandle {
    measurement: PageMeasurement,
}

impl LayoutHandle for CommandHandle {
    fn total_pages(&self) -> Result<u32> {
        Ok(self.measurement.total_pages)
    }

    fn paragraph_count(&self) -> Result<usize> {
        Ok(self.measurement.paragraph_count())
    }

    fn page_of(&self, index: usize) -> Result<u32> {
        self.measurement
            .page_of(index)
            .ok_or_else(|| Error::Oracle(format!("engine reported no paragraph {}", index)))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
