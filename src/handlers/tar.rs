//! TAR handler driving the system `tar`.
//!
//! One handler serves plain and compressed tarballs; the compressor is
//! selected with the classic single-letter flags (`z`, `j`, `J`). tar has no
//! notion of passwords, in-place deletion or repair, so those operations are
//! rejected up front rather than letting the tool fail halfway through.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{
    parse_entry_datetime, ArchiveEntry, ArchiveHandler, CreateOptions, HandlerError, Progress,
};
use crate::format::ArchiveFormat;
use crate::process::ProcessRunner;

/// One row of `tar -tv` output: permissions, owner/group, size, date, time,
/// name. GNU and BSD tar agree on this shape for regular listings.
static LIST_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([dlbcps-][rwxsStT-]{9})\s+(\S+)\s+(\d+)\s+(\d{4}-\d{2}-\d{2})\s+(\d{2}:\d{2}(?::\d{2})?)\s+(\S.*)$",
    )
    .unwrap()
});

pub struct TarHandler {
    format: ArchiveFormat,
    progress: Progress,
}

impl TarHandler {
    pub fn new(format: ArchiveFormat, progress: Progress) -> Self {
        Self { format, progress }
    }

    fn find_tool(&self) -> Result<PathBuf> {
        which::which("tar").map_err(|_| {
            HandlerError::ToolNotFound {
                tool: "tar",
                format: "TAR",
            }
            .into()
        })
    }

    fn runner(&self) -> ProcessRunner {
        let progress = self.progress.clone();
        ProcessRunner::new().on_line(move |line| progress.emit(line))
    }

    /// Single-letter compressor flag bundled into the mode argument.
    fn compression_flag(&self) -> &'static str {
        match self.format {
            ArchiveFormat::TarGz => "z",
            ArchiveFormat::TarBz2 => "j",
            ArchiveFormat::TarXz => "J",
            _ => "",
        }
    }

    fn parse_list(output: &str) -> Vec<ArchiveEntry> {
        let mut entries = Vec::new();

        for line in output.lines() {
            let Some(caps) = LIST_ROW.captures(line) else {
                if !line.trim().is_empty() {
                    debug!(line, "skipping unrecognized tar listing line");
                }
                continue;
            };

            let permissions = caps[1].to_string();
            let mut path = caps[6].trim().to_string();
            // Symlink rows read "name -> target"; keep just the entry name
            if permissions.starts_with('l') {
                if let Some((name, _target)) = path.split_once(" -> ") {
                    path = name.to_string();
                }
            }
            let is_dir = permissions.starts_with('d') || path.ends_with('/');

            entries.push(ArchiveEntry {
                size: caps[3].parse().unwrap_or(0),
                // tar reports no per-entry compressed size
                compressed_size: None,
                is_dir,
                permissions: Some(permissions),
                modified: parse_entry_datetime(&caps[4], &caps[5]),
                path,
            });
        }

        entries
    }
}

impl ArchiveHandler for TarHandler {
    fn format_name(&self) -> &'static str {
        self.format.name()
    }

    fn tool_name(&self) -> &'static str {
        "tar"
    }

    fn is_available(&self) -> bool {
        self.find_tool().is_ok()
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["tar", "tar.gz", "tgz", "tar.bz2", "tbz2", "tar.xz", "txz"]
    }

    fn list(&self, archive: &Path) -> Result<Vec<ArchiveEntry>> {
        let tool = self.find_tool()?;
        let mode = format!("-t{}vf", self.compression_flag());
        let args: Vec<OsString> = vec![mode.into(), archive.into()];
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

        let mode = format!("-x{}f", self.compression_flag());
        let mut args: Vec<OsString> =
            vec![mode.into(), archive.into(), "-C".into(), destination.into()];
        for entry in entries {
            args.push(entry.into());
        }

        self.runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to extract {}", archive.display()))?;
        Ok(())
    }

    fn create(&self, archive: &Path, inputs: &[PathBuf], options: &CreateOptions) -> Result<()> {
        if options.password.is_some() {
            return Err(HandlerError::Unsupported {
                format: "TAR",
                operation: "password protection",
            }
            .into());
        }
        // The compressor flag picks the algorithm; tar exposes no per-level
        // control, so the requested level is ignored.
        if options.compression_level != CreateOptions::default().compression_level {
            debug!(
                level = options.compression_level,
                "tar has no compression levels, ignoring"
            );
        }

        let tool = self.find_tool()?;
        let mode = format!("-c{}f", self.compression_flag());
        let mut args: Vec<OsString> = vec![mode.into(), archive.into()];
        for input in inputs {
            args.push(input.into());
        }

        self.runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to create {}", archive.display()))?;
        Ok(())
    }

    fn add(&self, archive: &Path, inputs: &[PathBuf]) -> Result<()> {
        // tar -r appends in place, which only works on an uncompressed
        // archive; a compressed stream would need a full rewrite.
        if self.format != ArchiveFormat::Tar {
            return Err(HandlerError::Unsupported {
                format: self.format.name(),
                operation: "adding files (append works on plain .tar only)",
            }
            .into());
        }

        let tool = self.find_tool()?;
        let mut args: Vec<OsString> = vec!["-rf".into(), archive.into()];
        for input in inputs {
            args.push(input.into());
        }

        self.runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Failed to add files to {}", archive.display()))?;
        Ok(())
    }

    fn remove(&self, _archive: &Path, _entries: &[String]) -> Result<()> {
        Err(HandlerError::Unsupported {
            format: self.format.name(),
            operation: "removing files (extract, modify and recreate instead)",
        }
        .into())
    }

    fn test(&self, archive: &Path) -> Result<()> {
        // A quiet full listing walks every block; a truncated or corrupt
        // archive makes tar exit nonzero.
        let tool = self.find_tool()?;
        let mode = format!("-t{}f", self.compression_flag());
        let args: Vec<OsString> = vec![mode.into(), archive.into()];
        self.runner()
            .run_ok(&tool.to_string_lossy(), &args)
            .with_context(|| format!("Integrity test failed for {}", archive.display()))?;
        Ok(())
    }

    fn repair(&self, _archive: &Path) -> Result<PathBuf> {
        Err(HandlerError::Unsupported {
            format: self.format.name(),
            operation: "repair",
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAR_LIST: &str = "\
-rw-r--r-- alice/users       7 2024-05-01 12:34 file.txt
drwxr-xr-x alice/users       0 2024-05-01 12:34 docs/
-rw-r--r-- alice/users  104857 2024-05-02 08:01:59 docs/report.pdf
lrwxrwxrwx alice/users       0 2024-05-03 10:00 latest -> docs/report.pdf
";

    #[test]
    fn test_parse_list() {
        let entries = TarHandler::parse_list(TAR_LIST);
        assert_eq!(entries.len(), 4);

        assert_eq!(entries[0].path, "file.txt");
        assert_eq!(entries[0].size, 7);
        assert!(!entries[0].is_dir);
        assert_eq!(entries[0].permissions.as_deref(), Some("-rw-r--r--"));

        assert_eq!(entries[1].path, "docs/");
        assert!(entries[1].is_dir);

        // Seconds in the timestamp are accepted
        assert!(entries[2].modified.is_some());

        // Symlink arrow notation is stripped down to the entry name
        assert_eq!(entries[3].path, "latest");
        assert!(!entries[3].is_dir);
    }

    #[test]
    fn test_parse_list_skips_noise() {
        let listing = "tar: Removing leading `/' from member names\n-rw-r--r-- bob/bob 5 2024-01-01 00:00 a.txt\n";
        let entries = TarHandler::parse_list(listing);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "a.txt");
    }

    #[test]
    fn test_compression_flags() {
        let flag = |format| TarHandler::new(format, Progress::default()).compression_flag();
        assert_eq!(flag(ArchiveFormat::Tar), "");
        assert_eq!(flag(ArchiveFormat::TarGz), "z");
        assert_eq!(flag(ArchiveFormat::TarBz2), "j");
        assert_eq!(flag(ArchiveFormat::TarXz), "J");
    }

    #[test]
    fn test_unsupported_operations() {
        let handler = TarHandler::new(ArchiveFormat::TarGz, Progress::default());

        let err = handler.remove(Path::new("x.tar.gz"), &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HandlerError>(),
            Some(HandlerError::Unsupported { .. })
        ));

        let err = handler.repair(Path::new("x.tar.gz")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HandlerError>(),
            Some(HandlerError::Unsupported { .. })
        ));

        // Appending to a compressed tar is refused before any tool runs
        let err = handler
            .add(Path::new("x.tar.gz"), &[PathBuf::from("new.txt")])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HandlerError>(),
            Some(HandlerError::Unsupported { .. })
        ));

        let err = handler
            .create(
                Path::new("x.tar.gz"),
                &[PathBuf::from("a")],
                &CreateOptions {
                    password: Some("secret".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HandlerError>(),
            Some(HandlerError::Unsupported { .. })
        ));
    }

    // Round-trip against the system tar, skipped where it is missing.
    #[test]
    fn test_list_real_tar_fixture() -> Result<()> {
        if which::which("tar").is_err() {
            return Ok(());
        }

        let dir = tempfile::tempdir()?;
        let tar_path = dir.path().join("fixture.tar");
        {
            let file = std::fs::File::create(&tar_path)?;
            let mut builder = tar::Builder::new(file);

            let mut header = tar::Header::new_gnu();
            header.set_size(5);
            header.set_mode(0o644);
            header.set_mtime(1_714_567_890);
            header.set_cksum();
            builder.append_data(&mut header, "greeting.txt", &b"hello"[..])?;
            builder.finish()?;
        }

        let handler = TarHandler::new(ArchiveFormat::Tar, Progress::default());
        let entries = handler.list(&tar_path)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "greeting.txt");
        assert_eq!(entries[0].size, 5);

        Ok(())
    }

    #[test]
    fn test_extract_real_targz_fixture() -> Result<()> {
        if which::which("tar").is_err() {
            return Ok(());
        }

        let dir = tempfile::tempdir()?;
        let tar_path = dir.path().join("fixture.tar.gz");
        {
            let file = std::fs::File::create(&tar_path)?;
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let mut header = tar::Header::new_gnu();
            header.set_size(7);
            header.set_mode(0o644);
            header.set_mtime(1_714_567_890);
            header.set_cksum();
            builder.append_data(&mut header, "inner/data.txt", &b"content"[..])?;
            builder.into_inner()?.finish()?;
        }

        let destination = dir.path().join("out");
        let handler = TarHandler::new(ArchiveFormat::TarGz, Progress::default());
        handler.extract(&tar_path, &destination, &[])?;

        let extracted = std::fs::read_to_string(destination.join("inner/data.txt"))?;
        assert_eq!(extracted, "content");

        Ok(())
    }
}
