//! Rolling file sink.
//!
//! Files are named from a path template containing the `{Date}` token:
//!
//! ```text
//! logs/app-{Date}.log
//!
//! logs/
//! ├── app-20260121.log        # first file of the day
//! ├── app-20260121_001.log    # same day, after the size limit was hit
//! └── app-20260122.log        # next day
//! ```
//!
//! Before every write the sink checks, in order:
//! 1. whether the event's timestamp reached the next period checkpoint
//!    (start a new file for the new period)
//! 2. whether the line would push the current file past
//!    `file_size_limit_bytes` (start the next sequence for the same period)
//!
//! A line that lands exactly on the limit stays in the current file. A file
//! that is still empty always takes the line, however long.
//!
//! Each event is written with one `write_all` of the complete line onto a
//! file opened for append. When a write fails the file is closed and the
//! event dropped; the next write reopens it.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Sink;
use crate::error::{ConfigError, ConfigResult, SinkError};
use crate::event::LogEvent;
use crate::format::OutputFormat;

/// Token replaced by the period stamp in path templates.
pub const DATE_TOKEN: &str = "{Date}";

/// Default size limit: 1 GiB.
const DEFAULT_FILE_SIZE_LIMIT: u64 = 1024 * 1024 * 1024;

/// Default number of files kept, including the active one.
const DEFAULT_RETAINED_FILES: usize = 31;

/// How often a new file is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollingInterval {
    #[default]
    Day,
    Hour,
    /// Never roll on time
    Infinite,
}

impl RollingInterval {
    /// Start of the period containing `ts`, in `ts`'s own offset.
    fn period_start(&self, ts: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let naive = ts.naive_local();
        let start = match self {
            RollingInterval::Day => naive.date().and_hms_opt(0, 0, 0)?,
            RollingInterval::Hour => naive.date().and_hms_opt(naive.hour(), 0, 0)?,
            RollingInterval::Infinite => return None,
        };
        ts.timezone().from_local_datetime(&start).single()
    }

    fn period_length(&self) -> Option<Duration> {
        match self {
            RollingInterval::Day => Some(Duration::days(1)),
            RollingInterval::Hour => Some(Duration::hours(1)),
            RollingInterval::Infinite => None,
        }
    }

    /// Stamp substituted for the date token.
    fn stamp(&self, start: Option<DateTime<FixedOffset>>) -> String {
        match (self, start) {
            (RollingInterval::Day, Some(start)) => start.format("%Y%m%d").to_string(),
            (RollingInterval::Hour, Some(start)) => start.format("%Y%m%d%H").to_string(),
            _ => String::new(),
        }
    }

    fn stamp_len(&self) -> usize {
        match self {
            RollingInterval::Day => 8,
            RollingInterval::Hour => 10,
            RollingInterval::Infinite => 0,
        }
    }
}

/// Options for [`RollingFileSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingFileConfig {
    /// Path with a `{Date}` token in the file name, e.g. `logs/app-{Date}.log`
    pub path_template: String,
    #[serde(default)]
    pub rolling_interval: RollingInterval,
    /// `None` means unlimited
    #[serde(default = "default_file_size_limit")]
    pub file_size_limit_bytes: Option<u64>,
    /// Start a new sequence file when the limit is hit; otherwise further
    /// events for the period are rejected
    #[serde(default)]
    pub roll_on_size_limit: bool,
    /// Files kept including the active one; `None` keeps everything
    #[serde(default = "default_retained_file_count_limit")]
    pub retained_file_count_limit: Option<usize>,
    #[serde(default)]
    pub format: OutputFormat,
}

fn default_file_size_limit() -> Option<u64> {
    Some(DEFAULT_FILE_SIZE_LIMIT)
}

fn default_retained_file_count_limit() -> Option<usize> {
    Some(DEFAULT_RETAINED_FILES)
}

impl RollingFileConfig {
    pub fn new(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
            rolling_interval: RollingInterval::default(),
            file_size_limit_bytes: default_file_size_limit(),
            roll_on_size_limit: false,
            retained_file_count_limit: default_retained_file_count_limit(),
            format: OutputFormat::default(),
        }
    }

    pub fn rolling_interval(mut self, interval: RollingInterval) -> Self {
        self.rolling_interval = interval;
        self
    }

    pub fn file_size_limit_bytes(mut self, limit: Option<u64>) -> Self {
        self.file_size_limit_bytes = limit;
        self
    }

    pub fn roll_on_size_limit(mut self, roll: bool) -> Self {
        self.roll_on_size_limit = roll;
        self
    }

    pub fn retained_file_count_limit(mut self, limit: Option<usize>) -> Self {
        self.retained_file_count_limit = limit;
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Check the options without touching the filesystem.
    pub fn validate(&self) -> ConfigResult<()> {
        PathTemplate::parse(&self.path_template, self.rolling_interval)?;
        if self.file_size_limit_bytes == Some(0) {
            return Err(ConfigError::ZeroSizeLimit);
        }
        if self.retained_file_count_limit == Some(0) {
            return Err(ConfigError::ZeroCapacity("retained_file_count_limit"));
        }
        Ok(())
    }
}

/// Path template split around the date token.
#[derive(Debug, Clone)]
struct PathTemplate {
    dir: PathBuf,
    prefix: String,
    suffix: String,
}

impl PathTemplate {
    fn parse(template: &str, interval: RollingInterval) -> ConfigResult<Self> {
        let path = Path::new(template);
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ConfigError::InvalidPathTemplate(template.to_string()))?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        if dir.to_string_lossy().contains(DATE_TOKEN) {
            return Err(ConfigError::InvalidPathTemplate(template.to_string()));
        }

        let (prefix, suffix) = match file_name.split_once(DATE_TOKEN) {
            Some((prefix, suffix)) => (prefix.to_string(), suffix.to_string()),
            None if interval == RollingInterval::Infinite => {
                // Sequence numbers go before the extension.
                match file_name.rfind('.') {
                    Some(dot) if dot > 0 => {
                        (file_name[..dot].to_string(), file_name[dot..].to_string())
                    }
                    _ => (file_name.to_string(), String::new()),
                }
            }
            None => return Err(ConfigError::MissingDateToken(template.to_string())),
        };

        Ok(Self { dir, prefix, suffix })
    }

    fn file_name(&self, stamp: &str, sequence: u32) -> String {
        if sequence == 0 {
            format!("{}{}{}", self.prefix, stamp, self.suffix)
        } else {
            format!("{}{}_{:03}{}", self.prefix, stamp, sequence, self.suffix)
        }
    }

    /// Split a directory entry name into (stamp, sequence) if it belongs to
    /// this template.
    fn match_name<'a>(&self, name: &'a str, stamp_len: usize) -> Option<(&'a str, u32)> {
        let middle = name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        if middle.len() < stamp_len || !middle.is_char_boundary(stamp_len) {
            return None;
        }
        let (stamp, rest) = middle.split_at(stamp_len);
        if !stamp.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let sequence = match rest.strip_prefix('_') {
            None if rest.is_empty() => 0,
            Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
                digits.parse().ok()?
            }
            _ => return None,
        };
        Some((stamp, sequence))
    }

    /// Existing files for this template as (stamp, sequence, path).
    fn existing_files(&self, stamp_len: usize) -> Vec<(String, u32, PathBuf)> {
        let dir = if self.dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            self.dir.as_path()
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut files: Vec<_> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                let (stamp, sequence) = self.match_name(&name, stamp_len)?;
                Some((stamp.to_string(), sequence, entry.path()))
            })
            .collect();
        files.sort();
        files
    }
}

struct OpenFile {
    file: File,
    path: PathBuf,
    bytes_written: u64,
}

/// Appends events to date- and size-rolled files.
pub struct RollingFileSink {
    config: RollingFileConfig,
    template: PathTemplate,
    file: Option<OpenFile>,
    period_start: Option<DateTime<FixedOffset>>,
    next_checkpoint: Option<DateTime<FixedOffset>>,
    sequence: u32,
    degraded: bool,
}

impl RollingFileSink {
    /// Validate the configuration and open the file for the period that
    /// contains `now`, resuming its highest existing sequence.
    ///
    /// Fails with [`ConfigError::NotWritable`] when the directory cannot be
    /// created or the file cannot be opened for append.
    pub fn new(config: RollingFileConfig, now: DateTime<FixedOffset>) -> ConfigResult<Self> {
        config.validate()?;
        let template = PathTemplate::parse(&config.path_template, config.rolling_interval)?;

        if !template.dir.as_os_str().is_empty() {
            fs::create_dir_all(&template.dir).map_err(|source| ConfigError::NotWritable {
                path: template.dir.clone(),
                source,
            })?;
        }

        let mut sink = Self {
            config,
            template,
            file: None,
            period_start: None,
            next_checkpoint: None,
            sequence: 0,
            degraded: false,
        };
        sink.enter_period(now);
        sink.open_current().map_err(|source| ConfigError::NotWritable {
            path: sink.current_target(),
            source,
        })?;
        Ok(sink)
    }

    /// Path of the open file, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    /// Bytes written to the open file (including what it held when opened).
    pub fn bytes_written(&self) -> u64 {
        self.file.as_ref().map(|f| f.bytes_written).unwrap_or(0)
    }

    /// Whether the last write failed and the file is closed.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn stamp(&self) -> String {
        self.config.rolling_interval.stamp(self.period_start)
    }

    fn current_target(&self) -> PathBuf {
        self.template
            .dir
            .join(self.template.file_name(&self.stamp(), self.sequence))
    }

    /// Switch to the period containing `ts`, resuming the highest sequence
    /// already on disk for it.
    fn enter_period(&mut self, ts: DateTime<FixedOffset>) {
        let interval = self.config.rolling_interval;
        self.period_start = interval.period_start(ts);
        self.next_checkpoint = self
            .period_start
            .zip(interval.period_length())
            .map(|(start, len)| start + len);

        let stamp = self.stamp();
        self.sequence = self
            .template
            .existing_files(interval.stamp_len())
            .into_iter()
            .filter(|(s, _, _)| *s == stamp)
            .map(|(_, sequence, _)| sequence)
            .max()
            .unwrap_or(0);
    }

    fn open_current(&mut self) -> std::io::Result<()> {
        let path = self.current_target();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes_written = file.metadata()?.len();
        debug!(path = %path.display(), bytes_written, "Opened log file");
        self.file = Some(OpenFile {
            file,
            path,
            bytes_written,
        });
        self.apply_retention();
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut open) = self.file.take() {
            if let Err(e) = open.file.flush() {
                warn!(path = %open.path.display(), error = %e, "Failed to flush log file on close");
            }
        }
    }

    /// Delete the oldest files beyond the retained count.
    fn apply_retention(&self) {
        let Some(limit) = self.config.retained_file_count_limit else {
            return;
        };
        let current = self.current_path().map(Path::to_path_buf);
        let others: Vec<_> = self
            .template
            .existing_files(self.config.rolling_interval.stamp_len())
            .into_iter()
            .filter(|(_, _, path)| Some(path) != current.as_ref())
            .collect();
        let keep = limit.saturating_sub(1);
        if others.len() <= keep {
            return;
        }
        for (_, _, path) in &others[..others.len() - keep] {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed old log file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old log file"),
            }
        }
    }

    fn fail(&mut self, err: std::io::Error) -> SinkError {
        self.file = None;
        self.degraded = true;
        SinkError::Io(err)
    }
}

impl Sink for RollingFileSink {
    fn emit(&mut self, event: &LogEvent) -> Result<(), SinkError> {
        let mut line = self.config.format.render(event);
        line.push('\n');
        let len = line.len() as u64;

        if let Some(checkpoint) = self.next_checkpoint {
            if event.timestamp() >= checkpoint {
                self.close();
                self.enter_period(event.timestamp());
            }
        }

        if self.file.is_none() {
            if let Err(e) = self.open_current() {
                return Err(self.fail(e));
            }
        }

        if let Some(limit) = self.config.file_size_limit_bytes {
            let written = self.bytes_written();
            if written > 0 && written + len > limit {
                if !self.config.roll_on_size_limit {
                    return Err(SinkError::FileSizeLimitReached {
                        path: self.current_target(),
                        limit,
                    });
                }
                self.close();
                self.sequence += 1;
                if let Err(e) = self.open_current() {
                    return Err(self.fail(e));
                }
            }
        }

        let result = match self.file.as_mut() {
            Some(open) => open.file.write_all(line.as_bytes()).map(|()| {
                open.bytes_written += len;
            }),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                self.degraded = false;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(open) = self.file.as_mut() {
            open.file.flush()?;
            open.file.sync_data()?;
        }
        Ok(())
    }
}

impl Drop for RollingFileSink {
    fn drop(&mut self) {
        self.close();
    }
}
