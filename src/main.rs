//! Crowbar - command-line archive manager
//!
//! Pries archives open with whatever tool is installed: rar/unrar,
//! zip/unzip, 7z or tar. Crowbar does no compression itself; it builds the
//! right command line, runs the tool, and parses its listing output.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use crowbar::format::{self, ArchiveFormat};
use crowbar::handlers::{self, ArchiveHandler, CreateOptions, Progress, SevenZipHandler};
use crowbar::settings::Settings;
use crowbar::util;

#[derive(Parser)]
#[command(name = "crowbar")]
#[command(version)]
#[command(about = "Archive manager driving rar, zip, 7z and tar")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the contents of an archive
    List {
        archive: PathBuf,

        /// Show permissions, sizes and timestamps
        #[arg(short, long)]
        long: bool,
    },

    /// Extract an archive, optionally only selected entries
    Extract {
        archive: PathBuf,

        /// Entries to extract (everything when omitted)
        entries: Vec<String>,

        /// Destination directory (default: a directory named after the archive)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create a new archive from files and directories
    Create {
        archive: PathBuf,

        /// Files and directories to pack; may be omitted when the archive
        /// argument is a directory, which is then packed as <dir>.zip
        inputs: Vec<PathBuf>,

        /// Compression level 0-9 (default: settings value)
        #[arg(short, long)]
        level: Option<u32>,

        /// Protect the archive with a password (RAR, ZIP and 7z only)
        #[arg(short, long, env = "CROWBAR_PASSWORD")]
        password: Option<String>,
    },

    /// Add files to an existing archive
    Add {
        archive: PathBuf,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Remove entries from an archive
    Remove {
        archive: PathBuf,

        #[arg(required = true)]
        entries: Vec<String>,
    },

    /// Test archive integrity
    Test { archive: PathBuf },

    /// Repair a damaged archive into a new file (RAR and ZIP only)
    Repair { archive: PathBuf },

    /// Show the detected format of a file and which tool would handle it
    Detect { path: PathBuf },

    /// List a directory, annotating archives with their detected format
    Browse {
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Include hidden files (also a settings default)
        #[arg(short = 'a', long)]
        hidden: bool,
    },

    /// Show which archiving tools are installed
    Tools,

    /// Show recently opened archives
    Recent {
        /// Forget all recent archives
        #[arg(long)]
        clear: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(if cli.verbose {
                "crowbar=debug".parse()?
            } else {
                "crowbar=warn".parse()?
            }))
            .init();
    }

    match cli.command {
        Commands::List { archive, long } => {
            let (format, handler) = open_handler(&archive, Progress::default())?;
            let entries = handler.list(&archive)?;
            remember(&archive, None);

            println!(
                "{} ({}, {} entries)",
                archive.display(),
                format.name(),
                entries.len()
            );
            let mut total = 0u64;
            for entry in &entries {
                total += entry.size;
                if long {
                    let modified = entry
                        .modified
                        .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    println!(
                        "{:<11} {:>12} {:<16} {}",
                        entry.permissions.as_deref().unwrap_or(""),
                        entry.size,
                        modified,
                        entry.path
                    );
                } else {
                    println!("{}", entry.path);
                }
            }
            if long {
                println!("Total: {}", util::format_size(total));
            }
        }

        Commands::Extract {
            archive,
            entries,
            output,
        } => {
            let destination = output.unwrap_or_else(|| default_extract_dir(&archive));
            // Entry names go straight onto a tool command line; strip
            // anything that could climb out of the destination.
            let entries: Vec<String> = entries
                .iter()
                .map(|e| util::sanitize_entry_path(e))
                .filter(|e| !e.is_empty())
                .collect();

            let bar = spinner(&format!("Extracting {}", archive.display()));
            let (_, handler) = open_handler(&archive, progress_for(&bar))?;
            let result = handler.extract(&archive, &destination, &entries);
            bar.finish_and_clear();
            result?;

            remember(&archive, Some(&destination));

            let extracted = count_files(&destination);
            println!(
                "Extracted {} file(s) to {}",
                extracted,
                destination.display()
            );
        }

        Commands::Create {
            archive,
            inputs,
            level,
            password,
        } => {
            let settings = Settings::load();

            // Convenience shape: `crowbar create photos/` packs the
            // directory into photos.zip next to it.
            let (archive, inputs) = if inputs.is_empty() {
                if !archive.is_dir() {
                    bail!("No inputs given; pass files to pack, or a directory as the archive argument");
                }
                let name = util::default_archive_name(&archive);
                let target = match archive.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
                    _ => PathBuf::from(name),
                };
                (target, vec![archive])
            } else {
                (archive, inputs)
            };

            // The archive does not exist yet, so detection is by name only
            let format = format::detect(&archive);

            let bar = spinner(&format!("Creating {}", archive.display()));
            let handler =
                handlers::handler_for(format, progress_for(&bar)).ok_or_else(|| {
                    anyhow!(
                        "Cannot tell the target format from '{}'; use a known extension \
                         (rar, zip, 7z, tar, tar.gz, tar.bz2, tar.xz)",
                        archive.display()
                    )
                })?;

            let options = CreateOptions {
                password,
                compression_level: level.unwrap_or(settings.default_compression_level),
            };

            let result = handler.create(&archive, &inputs, &options);
            bar.finish_and_clear();
            result?;

            remember(&archive, None);
            match std::fs::metadata(&archive) {
                Ok(meta) => println!(
                    "Created {} ({})",
                    archive.display(),
                    util::format_size(meta.len())
                ),
                Err(_) => println!("Created {}", archive.display()),
            }
        }

        Commands::Add { archive, inputs } => {
            let bar = spinner(&format!("Adding to {}", archive.display()));
            let (_, handler) = open_handler(&archive, progress_for(&bar))?;
            let result = handler.add(&archive, &inputs);
            bar.finish_and_clear();
            result?;
            println!("Added {} input(s) to {}", inputs.len(), archive.display());
        }

        Commands::Remove { archive, entries } => {
            let bar = spinner(&format!("Removing from {}", archive.display()));
            let (_, handler) = open_handler(&archive, progress_for(&bar))?;
            let result = handler.remove(&archive, &entries);
            bar.finish_and_clear();
            result?;
            println!(
                "Removed {} entr{} from {}",
                entries.len(),
                if entries.len() == 1 { "y" } else { "ies" },
                archive.display()
            );
        }

        Commands::Test { archive } => {
            let bar = spinner(&format!("Testing {}", archive.display()));
            let (_, handler) = open_handler(&archive, progress_for(&bar))?;
            let result = handler.test(&archive);
            bar.finish_and_clear();
            result?;
            println!("{}: OK", archive.display());
        }

        Commands::Repair { archive } => {
            let bar = spinner(&format!("Repairing {}", archive.display()));
            let (_, handler) = open_handler(&archive, progress_for(&bar))?;
            let result = handler.repair(&archive);
            bar.finish_and_clear();
            let repaired = result?;
            println!("Repaired archive written to {}", repaired.display());
            println!("The original file was left untouched.");
        }

        Commands::Detect { path } => {
            let format = format::detect(&path);
            println!("File:   {}", path.display());
            println!("Format: {}", format.name());

            match handlers::handler_for(format, Progress::default()) {
                Some(handler) => {
                    let available = handler.is_available();
                    println!(
                        "Tool:   {} ({})",
                        handler.tool_name(),
                        if available { "installed" } else { "not installed" }
                    );
                    if format == ArchiveFormat::SevenZip && available && path.exists() {
                        let sevenzip = SevenZipHandler::new(Progress::default());
                        if sevenzip.is_solid(&path)? {
                            println!("Solid:  yes (single-entry extraction is slow)");
                        } else {
                            println!("Solid:  no");
                        }
                    }
                }
                None => println!("Tool:   none"),
            }
        }

        Commands::Browse { dir, hidden } => {
            let settings = Settings::load();
            let show_hidden = hidden || settings.show_hidden_files;

            let mut entries: Vec<_> = std::fs::read_dir(&dir)
                .map_err(|e| anyhow!("Cannot read {}: {e}", dir.display()))?
                .filter_map(|entry| entry.ok())
                .collect();
            entries.sort_by_key(|entry| entry.file_name());

            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !show_hidden && name.starts_with('.') {
                    continue;
                }

                let path = entry.path();
                if path.is_dir() {
                    println!("{:>10}  {}/", "", name);
                    continue;
                }

                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                let format = format::detect(&path);
                if format == ArchiveFormat::Unknown {
                    println!("{:>10}  {}", util::format_size(size), name);
                } else {
                    println!("{:>10}  {}  [{}]", util::format_size(size), name, format.name());
                }
            }
        }

        Commands::Tools => {
            println!("{:<8} {:<10} {:<14} Extensions", "Format", "Tool", "Status");
            for status in handlers::tool_status() {
                println!(
                    "{:<8} {:<10} {:<14} {}",
                    status.format,
                    status.tool,
                    if status.available {
                        "installed"
                    } else {
                        "not installed"
                    },
                    status.extensions.join(", ")
                );
            }
        }

        Commands::Recent { clear } => {
            let mut settings = Settings::load();
            if clear {
                settings.clear_recent_archives();
                settings.save()?;
                println!("Recent archives cleared.");
            } else if settings.recent_archives.is_empty() {
                println!("No recent archives.");
            } else {
                for path in &settings.recent_archives {
                    println!("{path}");
                }
            }
        }
    }

    Ok(())
}

/// Resolve the handler for an existing archive, by signature then extension.
fn open_handler(
    archive: &Path,
    progress: Progress,
) -> Result<(ArchiveFormat, Box<dyn ArchiveHandler>)> {
    if !archive.exists() {
        bail!("Archive not found: {}", archive.display());
    }
    let format = format::detect(archive);
    let handler = handlers::handler_for(format, progress)
        .ok_or_else(|| anyhow!("Unrecognized archive format: {}", archive.display()))?;
    Ok((format, handler))
}

/// Record the archive in recent files and remember the directories used.
/// Failing to save settings is never fatal.
fn remember(archive: &Path, extract_dir: Option<&Path>) {
    let mut settings = Settings::load();
    settings.add_recent_archive(&archive.to_string_lossy());
    if let Some(parent) = archive.parent().filter(|p| !p.as_os_str().is_empty()) {
        settings.last_open_dir = parent.display().to_string();
    }
    if let Some(dir) = extract_dir {
        settings.last_extract_dir = dir.display().to_string();
    }
    if let Err(e) = settings.save() {
        tracing::warn!("Could not save settings: {e}");
    }
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {wide_msg}")
            .unwrap(),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_message(message.to_string());
    bar
}

/// Feed the tool's own output lines into the spinner message.
fn progress_for(bar: &ProgressBar) -> Progress {
    let bar = bar.clone();
    Progress::new(move |line| {
        let line = line.trim();
        if !line.is_empty() {
            bar.set_message(line.to_string());
        }
    })
}

/// Default extraction directory: the archive's name without its archive
/// extension, next to the archive itself.
fn default_extract_dir(archive: &Path) -> PathBuf {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "extracted".to_string());

    let stem = match strip_archive_extension(&name) {
        Some(stem) => stem.to_string(),
        None => format!("{name}.extracted"),
    };

    match archive.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(stem),
        _ => PathBuf::from(stem),
    }
}

fn strip_archive_extension(name: &str) -> Option<&str> {
    const EXTENSIONS: [&str; 10] = [
        ".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".tbz2", ".txz", ".tar", ".zip", ".rar", ".7z",
    ];
    let lower = name.to_ascii_lowercase();
    for ext in EXTENSIONS {
        if lower.ends_with(ext) && name.len() > ext.len() {
            return Some(&name[..name.len() - ext.len()]);
        }
    }
    None
}

/// Count regular files under a directory, for the post-extraction summary.
fn count_files(dir: &Path) -> usize {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_archive_extension() {
        assert_eq!(strip_archive_extension("photos.zip"), Some("photos"));
        assert_eq!(strip_archive_extension("backup.tar.gz"), Some("backup"));
        assert_eq!(strip_archive_extension("BACKUP.TAR.GZ"), Some("BACKUP"));
        assert_eq!(strip_archive_extension("release.7z"), Some("release"));
        assert_eq!(strip_archive_extension("noext"), None);
        // A bare extension would leave an empty directory name
        assert_eq!(strip_archive_extension(".zip"), None);
    }

    #[test]
    fn test_default_extract_dir() {
        assert_eq!(
            default_extract_dir(Path::new("/data/photos.zip")),
            PathBuf::from("/data/photos")
        );
        assert_eq!(
            default_extract_dir(Path::new("backup.tar.xz")),
            PathBuf::from("backup")
        );
        assert_eq!(
            default_extract_dir(Path::new("weird.dat")),
            PathBuf::from("weird.dat.extracted")
        );
    }
}
