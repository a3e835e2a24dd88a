//! RAR handler driving the `rar` / `unrar` binaries.
//!
//! `rar` is the full tool; `unrar` is the freely redistributable extractor
//! most distros ship. Read operations (list, extract, test) accept either,
//! write operations (create, add, remove, repair) require `rar` itself.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{
    is_ruler, parse_entry_datetime, ArchiveEntry, ArchiveHandler, CreateOptions, HandlerError,
    Progress,
};
use crate::process::ProcessRunner;

/// One row of the `unrar l` table: attributes, size, date, time, name.
/// Encrypted entries carry a `*` in the attribute column.
static LIST_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([\w.*-]+)\s+(\d+)\s+(\d{4}-\d{2}-\d{2})\s+(\d{2}:\d{2})\s+(\S.*)$").unwrap()
});

pub struct RarHandler {
    progress: Progress,
}

impl RarHandler {
    pub fn new(progress: Progress) -> Self {
        Self { progress }
    }

    /// Prefer `rar` (read/write), fall back to `unrar` (read-only).
    fn find_tool(&self) -> Result<PathBuf> {
        which::which("rar")
            .or_else(|_| which::which("unrar"))
            .map_err(|_| {
                HandlerError::ToolNotFound {
                    tool: "rar or unrar",
                    format: "RAR",
                }
                .into()
            })
    }

    /// `unrar` can only read, so anything that rewrites the archive needs
    /// the real `rar`.
    fn find_rar(&self) -> Result<PathBuf> {
        which::which("rar").map_err(|_| {
            HandlerError::ToolNotFound {
                tool: "rar",
                format: "RAR",
            }
            .into()
        })
    }

    fn runner(&self) -> ProcessRunner {
        let progress = self.progress.clone();
        ProcessRunner::new().on_line(move |line| progress.emit(line))
    }

    /// Parse the table between the two dash rulers of `unrar l -v` output.
    fn parse_list(output: &str) -> Vec<ArchiveEntry> {
        let mut entries = Vec::new();
        let mut in_table = false;

        for line in output.lines() {
            if is_ruler(line) {
                if in_table {
                    // Second ruler closes the table; the summary follows.
                    break;
                }
                in_table = true;
                continue;
            }
            if !in_table {
                continue;
            }

            let Some(caps) = LIST_ROW.captures(line) else {
                debug!(line, "skipping unrecognized rar listing line");
                continue;
            };

            let attributes = caps[1].to_string();
            let path = caps[5].trim().to_string();
            let is_dir =
                attributes.starts_with('d') || attributes.contains('D') || path.ends_with('/');

            entries.push(ArchiveEntry {
                size: caps[2].parse().unwrap_or(0),
                compressed_size: None,
                is_dir,
                permissions: Some(attributes),
                modified: parse_entry_datetime(&caps[3], &caps[4]),
                path,
            });
        }

        entries
    }
}

impl ArchiveHandler for RarHandler {
    fn format_name(&self) -> &'static str {
        "RAR"
    }

    fn tool_name(&self) -> &'static str {
        "rar/unrar"
    }

    fn is_available(&self) -> bool {
        self.find_tool().is_ok()
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["rar"]
    }

    fn list(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let tool = self.find_tool()?;
        let args: Vec<OsString> = vec!["l".into(), "-v".into(), archive.into()];
        let output = self
            .runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to list {}", archive.display()))?;
        Ok(Self::parse_list(&output.stdout))
    }

    fn extract(&self, archive: &Path, destination: &Path, entries: &[String]) -> Result<()> {
        let tool = self.find_tool()?;
        fs::create_dir_all(destination)
            .with_context(|| format!("Failed to create {}", destination.display()))?;

        let mut args: Vec<OsString> = vec!["x".into(), "-o+".into(), "-y".into(), archive.into()];
        for entry in entries {
            args.push(entry.into());
        }
        // The trailing separator tells unrar the last argument is the
        // destination directory, not an entry name.
        let mut dest = destination.as_os_str().to_os_string();
        dest.push("/");
        args.push(dest);

        self.runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to extract {}", archive.display()))?;
        Ok(())
    }

    fn create(&self, archive: &Path, inputs: &[PathBuf], options: &CreateOptions) -> Result<()> {
        let tool = self.find_rar()?;

        let mut args: Vec<OsString> = vec![
            "a".into(),
            format!("-m{}", options.compression_level).into(),
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
        let tool = self.find_rar()?;
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
        let tool = self.find_rar()?;
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

    fn repair(&self, archive: &Path) -> Result<PathBuf> {
        let tool = self.find_rar()?;
        let parent = match archive.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = archive
            .file_name()
            .context("Archive path has no file name")?
            .to_string_lossy()
            .into_owned();

        let args: Vec<OsString> = vec!["r".into(), name.clone().into()];
        self.runner()
            .working_dir(&parent)
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to repair {}", archive.display()))?;

        // rar writes fixed.<name> when the recovery record can be used and
        // rebuilt.<name> when it has to reconstruct the archive structure.
        for prefix in ["fixed.", "rebuilt."] {
            let candidate = parent.join(format!("{prefix}{name}"));
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        bail!(
            "rar reported success but left no repaired archive next to {}",
            archive.display()
        )
    }
}
