//! ZIP handler driving Info-ZIP's `zip` / `unzip`, with a 7z fallback.
//!
//! Info-ZIP splits the work across two binaries: `unzip` reads, `zip`
//! writes. Either can be missing, so every operation resolves its tool and
//! falls back to a 7z binary when one is on PATH. The two tools take
//! completely different arguments, hence the per-operation branching.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::sevenzip::{find_7z_binary, parse_technical_list};
use super::{
    is_ruler, parse_entry_datetime, ArchiveEntry, ArchiveHandler, CreateOptions, HandlerError,
    Progress,
};
use crate::process::ProcessRunner;

/// One row of the `unzip -l` table: length, date, time, name. The date is
/// ISO on modern builds and month-first on older ones.
static LIST_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\s+(\d{4}-\d{2}-\d{2}|\d{2}-\d{2}-\d{4})\s+(\d{2}:\d{2})\s+(\S.*)$")
        .unwrap()
});

/// Which binary an operation resolved to; the argument syntax differs.
enum ZipTool {
    InfoZip(PathBuf),
    SevenZip(PathBuf),
}

pub struct ZipHandler {
    progress: Progress,
}

impl ZipHandler {
    pub fn new(progress: Progress) -> Self {
        Self { progress }
    }

    /// Tool for read operations: `unzip`, else any 7z binary.
    fn find_unzip(&self) -> Result<ZipTool> {
        if let Ok(path) = which::which("unzip") {
            return Ok(ZipTool::InfoZip(path));
        }
        find_7z_binary().map(ZipTool::SevenZip).ok_or_else(|| {
            HandlerError::ToolNotFound {
                tool: "unzip (or 7z)",
                format: "ZIP",
            }
            .into()
        })
    }

    /// Tool for write operations: `zip`, else any 7z binary.
    fn find_zip(&self) -> Result<ZipTool> {
        if let Ok(path) = which::which("zip") {
            return Ok(ZipTool::InfoZip(path));
        }
        find_7z_binary().map(ZipTool::SevenZip).ok_or_else(|| {
            HandlerError::ToolNotFound {
                tool: "zip (or 7z)",
                format: "ZIP",
            }
            .into()
        })
    }

    fn runner(&self) -> ProcessRunner {
        let progress = self.progress.clone();
        ProcessRunner::new().on_line(move |line| progress.emit(line))
    }

    fn run(&self, tool: &Path, args: &[OsString]) -> Result<(), crate::process::ProcessError> {
        self.runner().run_ok(&tool.to_string_lossy(), args)?;
        Ok(())
    }

    /// Parse the table between the two dash rulers of `unzip -l` output.
    /// `unzip -l` reports no compressed sizes; those stay `None`.
    fn parse_list(output: &str) -> Vec<ArchiveEntry> {
        let mut entries = Vec::new();
        let mut in_table = false;

        for line in output.lines() {
            if is_ruler(line) {
                if in_table {
                    // Second ruler closes the table; the totals row follows.
                    break;
                }
                in_table = true;
                continue;
            }
            if !in_table {
                continue;
            }

            let Some(caps) = LIST_ROW.captures(line) else {
                debug!(line, "skipping unrecognized unzip listing line");
                continue;
            };

            let path = caps[4].trim().to_string();
            entries.push(ArchiveEntry {
                size: caps[1].parse().unwrap_or(0),
                compressed_size: None,
                is_dir: path.ends_with('/'),
                permissions: None,
                modified: parse_entry_datetime(&caps[2], &caps[3]),
                path,
            });
        }

        entries
    }
}

impl ArchiveHandler for ZipHandler {
    fn format_name(&self) -> &'static str {
        "ZIP"
    }

    fn tool_name(&self) -> &'static str {
        "zip/unzip"
    }

    fn is_available(&self) -> bool {
        self.find_zip().is_ok() && self.find_unzip().is_ok()
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["zip"]
    }

    fn list(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        match self.find_unzip()? {
            ZipTool::InfoZip(tool) => {
                let args: Vec<OsString> = vec!["-l".into(), archive.into()];
                let output = self
                    .runner()
                    .run_ok(&tool.to_string_lossy(), &args)
                    .with_context(|| format!("Failed to list {}", archive.display()))?;
                Ok(Self::parse_list(&output.stdout))
            }
            ZipTool::SevenZip(tool) => {
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
        }
    }

    fn extract(&self, archive: &Path, destination: &Path, entries: &[String]) -> Result<()> {
        fs::create_dir_all(destination)
            .with_context(|| format!("Failed to create {}", destination.display()))?;

        let (tool, args) = match self.find_unzip()? {
            ZipTool::InfoZip(tool) => {
                let mut args: Vec<OsString> = vec!["-o".into(), archive.into()];
                for entry in entries {
                    args.push(entry.into());
                }
                args.push("-d".into());
                args.push(destination.into());
                (tool, args)
            }
            ZipTool::SevenZip(tool) => {
                let mut output_flag = OsString::from("-o");
                output_flag.push(destination.as_os_str());
                let mut args: Vec<OsString> =
                    vec!["x".into(), "-y".into(), "-aoa".into(), output_flag, archive.into()];
                for entry in entries {
                    args.push(entry.into());
                }
                (tool, args)
            }
        };

        self.run(&tool, &args)
            .with_context(|| format!("Failed to extract {}", archive.display()))?;
        Ok(())
    }

    fn create(&self, archive: &Path, inputs: &[PathBuf], options: &CreateOptions) -> Result<()> {
        match self.find_zip()? {
            ZipTool::InfoZip(tool) => {
                let mut args: Vec<OsString> = vec![
                    "-r".into(),
                    format!("-{}", options.compression_level).into(),
                ];
                if let Some(password) = &options.password {
                    args.push("-P".into());
                    args.push(password.into());
                }
                args.push(archive.into());
                for input in inputs {
                    args.push(input.into());
                }
                self.run(&tool, &args)
                    .with_context(|| format!("Failed to create {}", archive.display()))?;
            }
            ZipTool::SevenZip(tool) => {
                let mut args: Vec<OsString> = vec![
                    "a".into(),
                    "-tzip".into(),
                    format!("-mx={}", options.compression_level).into(),
                ];
                if let Some(password) = &options.password {
                    args.push(format!("-p{password}").into());
                }
                args.push(archive.into());
                for input in inputs {
                    args.push(input.into());
                }
                self.run(&tool, &args)
                    .with_context(|| format!("Failed to create {}", archive.display()))?;
            }
        }
        Ok(())
    }

    fn add(&self, archive: &Path, inputs: &[PathBuf]) -> Result<()> {
        match self.find_zip()? {
            ZipTool::InfoZip(tool) => {
                let mut args: Vec<OsString> = vec!["-r".into(), archive.into()];
                for input in inputs {
                    args.push(input.into());
                }
                self.run(&tool, &args)
                    .with_context(|| format!("Failed to add files to {}", archive.display()))?;
            }
            ZipTool::SevenZip(tool) => {
                let mut args: Vec<OsString> = vec!["a".into(), "-tzip".into(), archive.into()];
                for input in inputs {
                    args.push(input.into());
                }
                self.run(&tool, &args)
                    .with_context(|| format!("Failed to add files to {}", archive.display()))?;
            }
        }
        Ok(())
    }

    fn remove(&self, archive: &Path, entries: &[String]) -> Result<()> {
        match self.find_zip()? {
            ZipTool::InfoZip(tool) => {
                let mut args: Vec<OsString> = vec!["-d".into(), archive.into()];
                for entry in entries {
                    args.push(entry.into());
                }
                self.run(&tool, &args)
                    .with_context(|| format!("Failed to remove files from {}", archive.display()))?;
            }
            ZipTool::SevenZip(tool) => {
                let mut args: Vec<OsString> = vec!["d".into(), "-tzip".into(), archive.into()];
                for entry in entries {
                    args.push(entry.into());
                }
                self.run(&tool, &args)
                    .with_context(|| format!("Failed to remove files from {}", archive.display()))?;
            }
        }
        Ok(())
    }

    fn test(&self, archive: &Path) -> Result<()> {
        let (tool, args): (PathBuf, Vec<OsString>) = match self.find_unzip()? {
            ZipTool::InfoZip(tool) => (tool, vec!["-t".into(), archive.into()]),
            ZipTool::SevenZip(tool) => (tool, vec!["t".into(), archive.into()]),
        };
        self.run(&tool, &args)
            .with_context(|| format!("Integrity test failed for {}", archive.display()))?;
        Ok(())
    }

    fn repair(&self, archive: &Path) -> Result<PathBuf> {
        // Only Info-ZIP can salvage a damaged zip; 7z has nothing comparable.
        let tool = match self.find_zip()? {
            ZipTool::InfoZip(tool) => tool,
            ZipTool::SevenZip(_) => {
                return Err(HandlerError::Unsupported {
                    format: "ZIP",
                    operation: "repair without Info-ZIP's zip binary",
                }
                .into())
            }
        };

        let mut fixed = archive.as_os_str().to_os_string();
        fixed.push(".fixed");
        let fixed = PathBuf::from(fixed);

        // -FF rebuilds the archive by scanning for entry signatures, which
        // also works when the central directory is gone.
        let args: Vec<OsString> = vec![
            "-FF".into(),
            archive.into(),
            "--out".into(),
            fixed.clone().into(),
        ];
        self.run(&tool, &args)
            .with_context(|| format!("Failed to repair {}", archive.display()))?;
        Ok(fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNZIP_LIST: &str = "\
Archive:  test.zip
  Length      Date    Time    Name
---------  ---------- -----   ----
        7  2024-05-01 12:34   file.txt
     2048  2024-05-02 09:00   docs/report.pdf
        0  2024-05-01 12:35   docs/
---------                     -------
     2055                     3 files
";

    #[test]
    fn test_parse_list() {
        let entries = ZipHandler::parse_list(UNZIP_LIST);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].path, "file.txt");
        assert_eq!(entries[0].size, 7);
        assert!(!entries[0].is_dir);
        assert!(entries[0].modified.is_some());
        // unzip -l does not report compressed sizes
        assert_eq!(entries[0].compressed_size, None);

        assert_eq!(entries[1].path, "docs/report.pdf");
        assert_eq!(entries[1].size, 2048);

        assert_eq!(entries[2].path, "docs/");
        assert!(entries[2].is_dir);
    }

    #[test]
    fn test_parse_list_excludes_totals_row() {
        let entries = ZipHandler::parse_list(UNZIP_LIST);
        assert!(!entries.iter().any(|e| e.path.contains("files")));
    }

    #[test]
    fn test_parse_list_month_first_dates() {
        let listing = "\
Archive:  old.zip
  Length      Date    Time    Name
---------  ---------- -----   ----
      100  05-01-2024 12:34   legacy.txt
---------                     -------
      100                     1 file
";
        let entries = ZipHandler::parse_list(listing);
        assert_eq!(entries.len(), 1);
        let modified = entries[0].modified.unwrap();
        use chrono::Datelike;
        assert_eq!((modified.year(), modified.month(), modified.day()), (2024, 5, 1));
    }

    #[test]
    fn test_parse_list_empty_archive() {
        let listing = "\
Archive:  empty.zip
  Length      Date    Time    Name
---------  ---------- -----   ----
---------                     -------
        0                     0 files
";
        assert!(ZipHandler::parse_list(listing).is_empty());
    }

    // Round-trip against the real tools, in the spirit of the fixture tests
    // for extraction: skipped when unzip is not installed.
    #[test]
    fn test_list_real_zip_fixture() -> Result<()> {
        use std::io::Write;

        if which::which("unzip").is_err() {
            return Ok(());
        }

        let dir = tempfile::tempdir()?;
        let zip_path = dir.path().join("fixture.zip");
        {
            let file = std::fs::File::create(&zip_path)?;
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();

            writer.start_file("hello.txt", options)?;
            writer.write_all(b"hello")?;

            writer.start_file("nested/world.txt", options)?;
            writer.write_all(b"world!!")?;

            writer.finish()?;
        }

        let handler = ZipHandler::new(Progress::default());
        let entries = handler.list(&zip_path)?;
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"hello.txt"));
        assert!(paths.contains(&"nested/world.txt"));

        let hello = entries.iter().find(|e| e.path == "hello.txt").unwrap();
        assert_eq!(hello.size, 5);

        Ok(())
    }

    #[test]
    fn test_extract_real_zip_fixture() -> Result<()> {
        use std::io::Write;

        if which::which("unzip").is_err() {
            return Ok(());
        }

        let dir = tempfile::tempdir()?;
        let zip_path = dir.path().join("fixture.zip");
        {
            let file = std::fs::File::create(&zip_path)?;
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("data/payload.txt", options)?;
            writer.write_all(b"payload")?;
            writer.finish()?;
        }

        let destination = dir.path().join("out");
        let handler = ZipHandler::new(Progress::default());
        handler.extract(&zip_path, &destination, &[])?;

        let extracted = std::fs::read_to_string(destination.join("data/payload.txt"))?;
        assert_eq!(extracted, "payload");

        Ok(())
    }
}
