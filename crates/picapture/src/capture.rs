//! Core capture types for picapture.
//!
//! A capture cycle asks a [`CaptureProvider`] to produce a JPEG at a
//! [`CaptureTarget`] chosen by the daemon. Successful captures become a
//! [`CaptureRecord`], the unit published to the shared store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Compact UTC timestamp embedded in capture file names.
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// ISO-8601 UTC timestamp stored in the capture record.
pub const RECORD_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Default capture program for the Raspberry Pi camera stack.
const DEFAULT_COMMAND: &[&str] = &["libcamera-jpeg", "-o", "{path}", "-n"];

/// Where a capture should be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    /// The moment the capture was requested.
    pub taken_at: DateTime<Utc>,
    /// File name, `capture_<timestamp>.jpg`.
    pub filename: String,
    /// Full path inside the output directory.
    pub path: PathBuf,
}

impl CaptureTarget {
    /// Build the target for a capture taken at `taken_at` in `output_dir`.
    #[must_use]
    pub fn new(output_dir: &Path, taken_at: DateTime<Utc>) -> Self {
        let filename = format!("capture_{}.jpg", taken_at.format(FILENAME_TIMESTAMP_FORMAT));
        let path = output_dir.join(&filename);
        Self {
            taken_at,
            filename,
            path,
        }
    }

    /// The compact timestamp used in the file name.
    #[must_use]
    pub fn stamp(&self) -> String {
        self.taken_at.format(FILENAME_TIMESTAMP_FORMAT).to_string()
    }
}

/// The latest capture, as seen by consumers of the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// When the capture was taken.
    pub timestamp: DateTime<Utc>,
    /// Host-visible path of the capture file.
    pub path: PathBuf,
}

impl CaptureRecord {
    /// Create a record for a capture stored at `path`.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, path: PathBuf) -> Self {
        Self { timestamp, path }
    }

    /// The record timestamp in its wire form, e.g. `2024-05-01T12:00:05.000000Z`.
    #[must_use]
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(RECORD_TIMESTAMP_FORMAT).to_string()
    }

    /// The record path in its wire form.
    #[must_use]
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// The change notification, `"<timestamp> <path>"`.
    #[must_use]
    pub fn message(&self) -> String {
        format!("{} {}", self.timestamp_string(), self.path_string())
    }

    /// Parse a wire-form timestamp back into a UTC instant.
    #[must_use]
    pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(text, RECORD_TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Argument-vector template for an external capture program.
///
/// Each argument may contain `{path}`, `{filename}` and `{timestamp}`
/// placeholders. The program is run directly, never through a shell, so
/// substituted values are passed as single arguments.
///
/// Deserializes from either a list of arguments or a single
/// whitespace-separated line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TemplateForm", into = "Vec<String>")]
pub struct CommandTemplate {
    args: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateForm {
    Line(String),
    Args(Vec<String>),
}

impl From<TemplateForm> for CommandTemplate {
    fn from(form: TemplateForm) -> Self {
        match form {
            TemplateForm::Line(line) => Self::from_line(&line),
            TemplateForm::Args(args) => Self::new(args),
        }
    }
}

impl From<CommandTemplate> for Vec<String> {
    fn from(template: CommandTemplate) -> Self {
        template.args
    }
}

impl Default for CommandTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND.iter().map(ToString::to_string).collect())
    }
}

impl CommandTemplate {
    /// Create a template from program and arguments.
    #[must_use]
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    /// Create a template by splitting a command line on whitespace.
    ///
    /// Quoting is not interpreted; use the list form for arguments that
    /// contain spaces.
    #[must_use]
    pub fn from_line(line: &str) -> Self {
        Self::new(line.split_whitespace().map(str::to_string).collect())
    }

    /// The raw template arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether the template names no program.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Substitute the target into every argument.
    #[must_use]
    pub fn render(&self, target: &CaptureTarget) -> Vec<String> {
        let path = target.path.to_string_lossy();
        let stamp = target.stamp();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{path}", &path)
                    .replace("{filename}", &target.filename)
                    .replace("{timestamp}", &stamp)
            })
            .collect()
    }
}

/// A capability that produces an image file at a requested location.
///
/// Success means the provider believes the file was written; the daemon does
/// not verify the file beyond that.
#[async_trait::async_trait]
pub trait CaptureProvider: Send + Sync {
    /// The name of this provider (for logging).
    fn name(&self) -> &str;

    /// Produce a capture at `target.path`.
    ///
    /// # Errors
    ///
    /// Returns an error if no capture could be produced.
    async fn capture(&self, target: &CaptureTarget) -> Result<()>;
}

/// Captures by running an external program such as `libcamera-jpeg`.
#[derive(Debug, Clone)]
pub struct CommandCapture {
    template: CommandTemplate,
}

impl CommandCapture {
    /// Create a provider for the given template.
    #[must_use]
    pub fn new(template: CommandTemplate) -> Self {
        Self { template }
    }
}

#[async_trait::async_trait]
impl CaptureProvider for CommandCapture {
    fn name(&self) -> &str {
        self.template.args().first().map_or("command", String::as_str)
    }

    async fn capture(&self, target: &CaptureTarget) -> Result<()> {
        let argv = self.template.render(target);
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::config_validation("capture command must not be empty"));
        };

        info!("Running capture command: {}", argv.join(" "));
        let status = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| Error::CaptureSpawn {
                program: program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(Error::CaptureFailed {
                program: program.clone(),
                status,
            });
        }
        Ok(())
    }
}
