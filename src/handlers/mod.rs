//! Archive tool wrappers.
//!
//! Each handler drives one external archiving tool, mapping the high-level
//! operations (list, extract, create, add, remove, test, repair) onto fixed
//! command-line invocations and parsing the tool's textual listing output
//! into [`ArchiveEntry`] values.
//!
//! Handlers never fabricate entries: every entry comes from a parsed output
//! line. Lines that do not match the expected shape are skipped with a debug
//! log, since tools mix banners, rulers and summaries into their listings.

mod rar;
mod sevenzip;
mod tar;
mod zip;

pub use rar::RarHandler;
pub use sevenzip::SevenZipHandler;
pub use tar::TarHandler;
pub use zip::ZipHandler;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDateTime;

use crate::format::ArchiveFormat;

/// One entry of an archive listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    /// Path within the archive, as the tool printed it.
    pub path: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Compressed size, when the tool's listing reports one.
    pub compressed_size: Option<u64>,
    pub is_dir: bool,
    /// Permission/attribute column, verbatim.
    pub permissions: Option<String>,
    pub modified: Option<NaiveDateTime>,
}

/// Options for `create`. `add` always reuses the archive's existing settings.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub password: Option<String>,
    /// Tool compression level, 0-9.
    pub compression_level: u32,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            password: None,
            compression_level: 5,
        }
    }
}

/// Failures that are about the operation itself rather than the child
/// process: the tool is missing, or the format simply cannot do it.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{tool} not found. Please install {tool} to work with {format} archives.")]
    ToolNotFound {
        tool: &'static str,
        format: &'static str,
    },

    #[error("{format} does not support {operation}")]
    Unsupported {
        format: &'static str,
        operation: &'static str,
    },
}

/// Line-progress sink threaded from the CLI down to the process layer, so a
/// spinner can show the tool's own output while it runs.
#[derive(Clone, Default)]
pub struct Progress(Option<Arc<dyn Fn(&str) + Send + Sync>>);

impl Progress {
    pub fn new(callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Some(Arc::new(callback)))
    }

    pub fn emit(&self, line: &str) {
        if let Some(callback) = &self.0 {
            callback(line);
        }
    }
}

/// The operations every archive tool wrapper offers. Operations a format
/// cannot perform return [`HandlerError::Unsupported`] instead of shelling
/// out and failing halfway.
pub trait ArchiveHandler {
    fn format_name(&self) -> &'static str;
    /// Human-readable name of the tool(s) this handler shells out to.
    fn tool_name(&self) -> &'static str;
    fn is_available(&self) -> bool;
    fn supported_extensions(&self) -> &'static [&'static str];

    fn list(&self, archive: &Path) -> Result<Vec<ArchiveEntry>>;
    /// Extract `entries` (or everything when empty) into `destination`,
    /// creating it first.
    fn extract(&self, archive: &Path, destination: &Path, entries: &[String]) -> Result<()>;
    fn create(&self, archive: &Path, inputs: &[PathBuf], options: &CreateOptions) -> Result<()>;
    fn add(&self, archive: &Path, inputs: &[PathBuf]) -> Result<()>;
    fn remove(&self, archive: &Path, entries: &[String]) -> Result<()>;
    fn test(&self, archive: &Path) -> Result<()>;
    /// Repair into a new file next to the archive; returns its path.
    fn repair(&self, archive: &Path) -> Result<PathBuf>;
}

/// Dispatch table from detected format to handler.
pub fn handler_for(format: ArchiveFormat, progress: Progress) -> Option<Box<dyn ArchiveHandler>> {
    match format {
        ArchiveFormat::Rar => Some(Box::new(RarHandler::new(progress))),
        ArchiveFormat::Zip => Some(Box::new(ZipHandler::new(progress))),
        ArchiveFormat::SevenZip => Some(Box::new(SevenZipHandler::new(progress))),
        f if f.is_tar() => Some(Box::new(TarHandler::new(f, progress))),
        _ => None,
    }
}

/// Availability of one handler's tool, for the `tools` report.
#[derive(Debug, Clone)]
pub struct ToolStatus {
    pub format: &'static str,
    pub tool: &'static str,
    pub available: bool,
    pub extensions: &'static [&'static str],
}

/// Check every handler's tool once, in dispatch order.
pub fn tool_status() -> Vec<ToolStatus> {
    let handlers: [Box<dyn ArchiveHandler>; 4] = [
        Box::new(RarHandler::new(Progress::default())),
        Box::new(ZipHandler::new(Progress::default())),
        Box::new(SevenZipHandler::new(Progress::default())),
        Box::new(TarHandler::new(ArchiveFormat::Tar, Progress::default())),
    ];
    handlers
        .iter()
        .map(|h| ToolStatus {
            format: h.format_name(),
            tool: h.tool_name(),
            available: h.is_available(),
            extensions: h.supported_extensions(),
        })
        .collect()
}

/// Listing tables are fenced by ruler lines of dashes (and spaces).
pub(crate) fn is_ruler(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 4 && trimmed.chars().all(|c| c == '-' || c == ' ')
}

/// Parse a listing timestamp. Tools disagree on date order and whether
/// seconds are present, so try the shapes we actually see.
pub(crate) fn parse_entry_datetime(date: &str, time: &str) -> Option<NaiveDateTime> {
    let combined = format!("{date} {time}");
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%m-%d-%Y %H:%M"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&combined, fmt).ok())
}
