//! 7-Zip handler driving the `7z` family of binaries.
//!
//! Listings use the technical format (`l -slt -ba`): key=value blocks are
//! far sturdier to parse than the column layout, which shifts with locale
//! and file-name width. The same binary also backs the ZIP handler when
//! Info-ZIP is not installed.
//!
//! # 7z commands reference
//!
//! - List: `7z l -slt -ba -scsUTF-8 archive`
//!   - `-slt`: technical listing (key=value format)
//!   - `-ba`: bare output (no banner)
//!   - `-scsUTF-8`: force UTF-8 file names
//! - Extract: `7z x -y -aoa -scsUTF-8 -o{dir} archive [entries…]`
//! - Create: `7z a -t7z -mx={level} [-p{password}] archive inputs…`
//!
//! 7z archives can be "solid": files compressed as one stream, so pulling a
//! single file means decompressing everything before it. `l -slt` reports
//! `Solid = +` for those.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::{
    parse_entry_datetime, ArchiveEntry, ArchiveHandler, CreateOptions, HandlerError, Progress,
};
use crate::process::ProcessRunner;

/// PATH candidates, in preference order: p7zip's `7z`, the official static
/// `7zz`, then the standalone `7za`.
const BINARY_NAMES: [&str; 3] = ["7z", "7zz", "7za"];

/// Locate a usable 7z binary. Shared with the ZIP handler's fallback path.
pub(crate) fn find_7z_binary() -> Option<PathBuf> {
    BINARY_NAMES.iter().find_map(|name| which::which(name).ok())
}

/// Parse `-slt -ba` technical listing output into entries.
///
/// Blocks are separated by blank lines; each block is `Key = Value` pairs.
pub(crate) fn parse_technical_list(output: &str) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();
    let mut block: Vec<(&str, &str)> = Vec::new();

    let mut flush = |block: &mut Vec<(&str, &str)>| {
        if let Some(entry) = entry_from_block(block) {
            entries.push(entry);
        }
        block.clear();
    };

    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            flush(&mut block);
            continue;
        }
        if let Some((key, value)) = line.split_once(" = ") {
            block.push((key.trim(), value.trim()));
        } else {
            debug!(line, "skipping unrecognized 7z listing line");
        }
    }
    // Last block when output has no trailing newline
    flush(&mut block);

    entries
}

fn entry_from_block(block: &[(&str, &str)]) -> Option<ArchiveEntry> {
    let get = |wanted: &str| {
        block
            .iter()
            .find(|(key, _)| *key == wanted)
            .map(|(_, value)| *value)
    };

    let path = get("Path")?.to_string();
    if path.is_empty() {
        return None;
    }

    let attributes = get("Attributes").unwrap_or_default();
    let is_dir = get("Folder").map(|v| v == "+").unwrap_or(false)
        || attributes.starts_with('D');

    let modified = get("Modified").and_then(|stamp| {
        let (date, time) = stamp.split_once(' ')?;
        // Recent 7z builds append fractional seconds
        let time = time.split('.').next().unwrap_or(time);
        parse_entry_datetime(date, time)
    });

    Some(ArchiveEntry {
        path,
        size: get("Size").and_then(|v| v.parse().ok()).unwrap_or(0),
        compressed_size: get("Packed Size").and_then(|v| v.parse().ok()),
        is_dir,
        permissions: (!attributes.is_empty()).then(|| attributes.to_string()),
        modified,
    })
}

pub struct SevenZipHandler {
    progress: Progress,
}

impl SevenZipHandler {
    pub fn new(progress: Progress) -> Self {
        Self { progress }
    }

    fn find_tool(&self) -> Result<PathBuf> {
        find_7z_binary().ok_or_else(|| {
            HandlerError::ToolNotFound {
                tool: "7z",
                format: "7Z",
            }
            .into()
        })
    }

    fn runner(&self) -> ProcessRunner {
        let progress = self.progress.clone();
        ProcessRunner::new().on_line(move |line| progress.emit(line))
    }

    /// Whether the archive is solid (one compressed stream). Extraction of
    /// single entries from a solid archive decompresses everything before
    /// them, so the CLI surfaces this in `detect`.
    pub fn is_solid(&self, archive: &Path) -> Result<bool> {
        let tool = self.find_tool()?;
        let args: Vec<OsString> = vec!["l".into(), "-slt".into(), archive.into()];
        let output = match self.runner().run_ok(&tool.to_string_lossy(), &args) {
            Ok(output) => output,
            // If the listing fails we cannot tell; report non-solid
            Err(_) => return Ok(false),
        };
        Ok(output
            .stdout
            .lines()
            .any(|line| line.trim() == "Solid = +"))
    }
}

impl ArchiveHandler for SevenZipHandler {
    fn format_name(&self) -> &'static str {
        "7Z"
    }

    fn tool_name(&self) -> &'static str {
        "7z"
    }

    fn is_available(&self) -> bool {
        find_7z_binary().is_some()
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["7z"]
    }

    fn list(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let tool = self.find_tool()?;
        let args: Vec<OsString> = vec![
            "l".into(),
            "-slt".into(),
            "-ba".into(),
            "-scsUTF-8".into(),
            archive.into(),
        ];
        let output = self
            .runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to list {}", archive.display()))?;
        Ok(parse_technical_list(&output.stdout))
    }

    fn extract(&self, archive: &Path, destination: &Path, entries: &[String]) -> Result<()> {
        let tool = self.find_tool()?;
        fs::create_dir_all(destination)
            .with_context(|| format!("Failed to create {}", destination.display()))?;

        let mut output_flag = OsString::from("-o");
        output_flag.push(destination.as_os_str());

        let mut args: Vec<OsString> = vec![
            "x".into(),
            "-y".into(),
            "-aoa".into(),
            "-scsUTF-8".into(),
            output_flag,
            archive.into(),
        ];
        for entry in entries {
            args.push(entry.into());
        }

        self.runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to extract {}", archive.display()))?;
        Ok(())
    }

    fn create(&self, archive: &Path, inputs: &[PathBuf], options: &CreateOptions) -> Result<()> {
        let tool = self.find_tool()?;

        let mut args: Vec<OsString> = vec![
            "a".into(),
            "-t7z".into(),
            format!("-mx={}", options.compression_level).into(),
        ];
        if let Some(password) = &options.password {
            args.push(format!("-p{password}").into());
        }
        args.push(archive.into());
        for input in inputs {
            args.push(input.into());
        }

        self.runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to create {}", archive.display()))?;
        Ok(())
    }

    fn add(&self, archive: &Path, inputs: &[PathBuf]) -> Result<()> {
        let tool = self.find_tool()?;
        let mut args: Vec<OsString> = vec!["a".into(), archive.into()];
        for input in inputs {
            args.push(input.into());
        }
        self.runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to add files to {}", archive.display()))?;
        Ok(())
    }

    fn remove(&self, archive: &Path, entries: &[String]) -> Result<()> {
        let tool = self.find_tool()?;
        let mut args: Vec<OsString> = vec!["d".into(), archive.into()];
        for entry in entries {
            args.push(entry.into());
        }
        self.runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to remove files from {}", archive.display()))?;
        Ok(())
    }

    fn test(&self, archive: &Path) -> Result<()> {
        let tool = self.find_tool()?;
        let args: Vec<OsString> = vec!["t".into(), archive.into()];
        self.runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Integrity test failed for {}", archive.display()))?;
        Ok(())
    }

    fn repair(&self, _archive: &Path) -> Result<PathBuf> {
        // 7z has no repair command; extract-and-recreate is the only option.
        Err(HandlerError::Unsupported {
            format: "7Z",
            operation: "repair",
        }
        .into())
    }
}
