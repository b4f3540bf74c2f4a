//! Data-date resolution for OSM extracts.
//!
//! A [`TimestampResolver`] holds an ordered list of [`TimestampStrategy`]
//! implementations and returns the first date any of them produces. The
//! default chain is:
//!
//! 1. [`ExternalTool`] - ask `osmium fileinfo` for the replication timestamp
//! 2. [`EmbeddedDecoder`] - decode the PBF header blob directly
//! 3. [`FileSystemFallback`] - the file's modification time
//!
//! Failing strategies are logged and skipped; the last one succeeds for any
//! readable file.

use crate::error::{Error, Result};
use crate::pbf;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Default program name of the external PBF introspection tool
pub const DEFAULT_TOOL: &str = "osmium";

/// Header option queried from the external tool
const REPLICATION_TIMESTAMP_KEY: &str = "header.option.osmosis_replication_timestamp";

/// A calendar date rendered as `YYMMDD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateStamp(NaiveDate);

impl DateStamp {
    /// Wraps a calendar date
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Date of a Unix timestamp in seconds (UTC)
    pub fn from_unix_seconds(secs: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| Self(dt.date_naive()))
    }

    /// Date of a Unix timestamp in milliseconds (UTC)
    pub fn from_unix_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| Self(dt.date_naive()))
    }

    /// Parses an ISO-8601 timestamp such as `2023-03-10T21:21:02Z`.
    ///
    /// A bare `YYYY-MM-DD` date is accepted as well.
    pub fn parse_iso8601(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(Self(dt.with_timezone(&Utc).date_naive()));
        }
        text.get(..10)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
            .map(Self)
    }

    /// The wrapped date
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for DateStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%y%m%d"))
    }
}

/// One way of finding the data date of a file
pub trait TimestampStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Attempts to resolve the date of `path`.
    ///
    /// `Ok(None)` and recoverable errors both hand over to the next strategy.
    fn resolve(&self, path: &Path) -> Result<Option<DateStamp>>;
}

/// Queries an external PBF introspection tool (`osmium fileinfo -g ...`)
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: PathBuf,
}

impl Default for ExternalTool {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL)
    }
}

impl ExternalTool {
    /// Creates a strategy invoking `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn tool_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl TimestampStrategy for ExternalTool {
    fn name(&self) -> &'static str {
        "external-tool"
    }

    fn resolve(&self, path: &Path) -> Result<Option<DateStamp>> {
        // `output()` waits on the child, so it is reaped on every path
        let output = Command::new(&self.program)
            .arg("fileinfo")
            .arg("-g")
            .arg(REPLICATION_TIMESTAMP_KEY)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::tool_unavailable(self.tool_name(), e.to_string()))?;

        if !output.status.success() {
            return Err(Error::tool_unavailable(
                self.tool_name(),
                format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        DateStamp::parse_iso8601(&stdout).map(Some).ok_or_else(|| {
            Error::tool_unavailable(
                self.tool_name(),
                format!("unparseable output '{}'", stdout.trim()),
            )
        })
    }
}

/// Decodes the replication timestamp from the PBF header blob
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedDecoder;

impl TimestampStrategy for EmbeddedDecoder {
    fn name(&self) -> &'static str {
        "embedded-decoder"
    }

    fn resolve(&self, path: &Path) -> Result<Option<DateStamp>> {
        let Some(secs) = pbf::extract_replication_timestamp(path)? else {
            return Ok(None);
        };
        let secs = i64::try_from(secs)
            .map_err(|_| Error::invalid_field(format!("replication timestamp {} out of range", secs)))?;
        Ok(DateStamp::from_unix_seconds(secs))
    }
}

/// Uses the file's last modification time
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemFallback;

impl TimestampStrategy for FileSystemFallback {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn resolve(&self, path: &Path) -> Result<Option<DateStamp>> {
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| Error::file_read(path, e))?;
        Ok(Some(DateStamp(DateTime::<Utc>::from(modified).date_naive())))
    }
}

/// A date together with the strategy that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    /// The resolved date
    pub date: DateStamp,
    /// Name of the winning strategy
    pub source: &'static str,
}

/// Ordered fallback chain of timestamp strategies
pub struct TimestampResolver {
    strategies: Vec<Box<dyn TimestampStrategy>>,
}

impl fmt::Debug for TimestampResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|s| s.name()))
            .finish()
    }
}

impl Default for TimestampResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampResolver {
    /// External tool, then embedded decoder, then filesystem time
    pub fn new() -> Self {
        Self::with_tool(Some(PathBuf::from(DEFAULT_TOOL)))
    }

    /// Default chain with a specific tool, or without one
    pub fn with_tool(tool: Option<PathBuf>) -> Self {
        let mut resolver = Self::empty();
        if let Some(program) = tool {
            resolver = resolver.push(ExternalTool::new(program));
        }
        resolver.push(EmbeddedDecoder).push(FileSystemFallback)
    }

    /// A resolver with no strategies
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Appends a strategy to the end of the chain
    pub fn push(mut self, strategy: impl TimestampStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Names of the configured strategies, in order
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Runs the chain against `path`; the first date wins
    pub fn resolve(&self, path: &Path) -> Result<ResolvedDate> {
        for strategy in &self.strategies {
            match strategy.resolve(path) {
                Ok(Some(date)) => {
                    debug!("Date of {} from {}: {}", path.display(), strategy.name(), date);
                    return Ok(ResolvedDate {
                        date,
                        source: strategy.name(),
                    });
                }
                Ok(None) => {
                    debug!("{} found no date for {}", strategy.name(), path.display());
                }
                Err(e) if e.is_recoverable() => {
                    debug!("{} skipped for {}: {}", strategy.name(), path.display(), e);
                }
                Err(e) => {
                    warn!("{} failed for {}: {}", strategy.name(), path.display(), e);
                }
            }
        }
        Err(Error::NoTimestamp {
            path: path.to_path_buf(),
        })
    }
}
