//! Small path and formatting helpers shared by the CLI and handlers.

use std::path::Path;

/// Sanitize an archive entry path for use under an extraction destination.
///
/// Strips leading slashes and drops `.`/`..` components, so a hostile entry
/// name cannot climb out of the destination directory.
pub fn sanitize_entry_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Derive a default archive name from a file or directory path:
/// `photos/` becomes `photos.zip`, `notes.txt` becomes `notes.zip`.
pub fn default_archive_name(base: &Path) -> String {
    let stem = if base.is_dir() {
        base.file_name().map(|n| n.to_string_lossy().into_owned())
    } else {
        base.file_stem().map(|n| n.to_string_lossy().into_owned())
    };

    match stem {
        Some(stem) if !stem.is_empty() => format!("{stem}.zip"),
        _ => "archive.zip".to_string(),
    }
}

/// Human-readable size with two decimals: "1.50 KB", "3.20 GB".
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_entry_path() {
        assert_eq!(sanitize_entry_path("/etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_entry_path("../../escape.txt"), "escape.txt");
        assert_eq!(sanitize_entry_path("a/./b//c"), "a/b/c");
        assert_eq!(sanitize_entry_path("plain/name.txt"), "plain/name.txt");
        assert_eq!(sanitize_entry_path("win\\style\\path"), "win/style/path");
        assert_eq!(sanitize_entry_path("...."), "....");
    }

    #[test]
    fn test_default_archive_name() {
        assert_eq!(
            default_archive_name(Path::new("/nonexistent/notes.txt")),
            "notes.zip"
        );
        assert_eq!(default_archive_name(Path::new("")), "archive.zip");

        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("photos");
        std::fs::create_dir(&sub).unwrap();
        assert_eq!(default_archive_name(&sub), "photos.zip");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3_435_973_837), "3.20 GB");
        assert_eq!(format_size(2 * 1024u64.pow(4)), "2.00 TB");
    }
}
