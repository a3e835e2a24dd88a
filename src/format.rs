//! Archive format detection.
//!
//! Formats are detected by magic bytes first and file extension second, so a
//! mislabeled archive (a `.zip` that is actually RAR data) still routes to
//! the right tool. Compressed tar variants share the plain-tar handler; the
//! compressor is identified from the leading bytes plus the file name, since
//! a bare `.gz` is not necessarily a tarball.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// The closed set of formats crowbar knows how to drive a tool for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Rar,
    Zip,
    SevenZip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    Unknown,
}

impl ArchiveFormat {
    /// Display name, matching what the underlying tools call the format.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rar => "RAR",
            Self::Zip => "ZIP",
            Self::SevenZip => "7Z",
            Self::Tar => "TAR",
            Self::TarGz => "TAR.GZ",
            Self::TarBz2 => "TAR.BZ2",
            Self::TarXz => "TAR.XZ",
            Self::Unknown => "Unknown",
        }
    }

    /// Canonical file extension (no leading dot), empty for `Unknown`.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Rar => "rar",
            Self::Zip => "zip",
            Self::SevenZip => "7z",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::TarBz2 => "tar.bz2",
            Self::TarXz => "tar.xz",
            Self::Unknown => "",
        }
    }

    /// All tar variants are served by the same handler.
    pub fn is_tar(&self) -> bool {
        matches!(self, Self::Tar | Self::TarGz | Self::TarBz2 | Self::TarXz)
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Detect the archive format of a file.
///
/// Signature detection wins over the extension; the extension is only
/// consulted when the file cannot be read or its leading bytes match nothing.
pub fn detect(path: &Path) -> ArchiveFormat {
    let format = detect_by_signature(path);
    if format != ArchiveFormat::Unknown {
        return format;
    }
    detect_by_extension(path)
}

/// Classify by leading bytes. The tar check needs the `ustar` magic at byte
/// offset 257, so the header read covers the whole first tar header block.
pub fn detect_by_signature(path: &Path) -> ArchiveFormat {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return ArchiveFormat::Unknown,
    };

    let mut header = [0u8; 265];
    let n = read_up_to(&mut file, &mut header);
    if n < 4 {
        return ArchiveFormat::Unknown;
    }
    let header = &header[..n];

    // RAR: Rar!\x1a\x07\x00 (RAR4) or Rar!\x1a\x07\x01\x00 (RAR5)
    if header.starts_with(b"Rar!\x1a\x07") {
        return ArchiveFormat::Rar;
    }

    // ZIP: PK\x03\x04, PK\x05\x06 (empty) or PK\x07\x08 (spanned)
    if header.starts_with(b"PK\x03\x04")
        || header.starts_with(b"PK\x05\x06")
        || header.starts_with(b"PK\x07\x08")
    {
        return ArchiveFormat::Zip;
    }

    // 7z: 7z\xbc\xaf\x27\x1c
    if header.starts_with(&[0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c]) {
        return ArchiveFormat::SevenZip;
    }

    // Plain tar: "ustar" at offset 257 (POSIX and GNU both carry it)
    if n >= 262 && &header[257..262] == b"ustar" {
        return ArchiveFormat::Tar;
    }

    // Compressed tar: compressor magic plus a tarball-looking name. A lone
    // .gz/.bz2/.xz is not an archive crowbar can browse, so the name check
    // is what separates tar.gz from plain gz.
    match detect_by_extension(path) {
        ArchiveFormat::TarGz if header.starts_with(&[0x1f, 0x8b]) => ArchiveFormat::TarGz,
        ArchiveFormat::TarBz2 if header.starts_with(b"BZh") => ArchiveFormat::TarBz2,
        ArchiveFormat::TarXz if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) => {
            ArchiveFormat::TarXz
        }
        _ => ArchiveFormat::Unknown,
    }
}

/// Classify by file name alone. Used as the fallback when the file is
/// unreadable (or does not exist yet, as with `create`).
pub fn detect_by_extension(path: &Path) -> ArchiveFormat {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy().to_lowercase(),
        None => return ArchiveFormat::Unknown,
    };

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        ArchiveFormat::TarGz
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        ArchiveFormat::TarBz2
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        ArchiveFormat::TarXz
    } else if name.ends_with(".tar") {
        ArchiveFormat::Tar
    } else if name.ends_with(".rar") {
        ArchiveFormat::Rar
    } else if name.ends_with(".zip") {
        ArchiveFormat::Zip
    } else if name.ends_with(".7z") {
        ArchiveFormat::SevenZip
    } else {
        ArchiveFormat::Unknown
    }
}

/// Read as many bytes as available into `buf`, tolerating short files.
fn read_up_to(file: &mut File, buf: &mut [u8]) -> usize {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(_) => break,
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_detect_by_signature() {
        let dir = tempdir().unwrap();

        let rar4 = write_file(dir.path(), "a.bin", b"Rar!\x1a\x07\x00data");
        assert_eq!(detect(&rar4), ArchiveFormat::Rar);

        let rar5 = write_file(dir.path(), "b.bin", b"Rar!\x1a\x07\x01\x00data");
        assert_eq!(detect(&rar5), ArchiveFormat::Rar);

        let zip = write_file(dir.path(), "c.bin", b"PK\x03\x04rest");
        assert_eq!(detect(&zip), ArchiveFormat::Zip);

        let empty_zip = write_file(dir.path(), "d.bin", b"PK\x05\x06rest");
        assert_eq!(detect(&empty_zip), ArchiveFormat::Zip);

        let sevenz = write_file(dir.path(), "e.bin", &[0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c, 0, 0]);
        assert_eq!(detect(&sevenz), ArchiveFormat::SevenZip);
    }

    #[test]
    fn test_detect_tar_magic_at_offset() {
        let dir = tempdir().unwrap();
        let mut block = vec![0u8; 512];
        block[257..262].copy_from_slice(b"ustar");
        let tar = write_file(dir.path(), "backup.bin", &block);
        assert_eq!(detect(&tar), ArchiveFormat::Tar);
    }

    #[test]
    fn test_mislabeled_archive_uses_signature() {
        let dir = tempdir().unwrap();
        // RAR data wearing a .zip name still goes to the RAR handler
        let path = write_file(dir.path(), "actually_rar.zip", b"Rar!\x1a\x07\x00data");
        assert_eq!(detect(&path), ArchiveFormat::Rar);
    }

    #[test]
    fn test_compressed_tar_needs_name_and_magic() {
        let dir = tempdir().unwrap();

        let targz = write_file(dir.path(), "x.tar.gz", &[0x1f, 0x8b, 0x08, 0x00]);
        assert_eq!(detect(&targz), ArchiveFormat::TarGz);

        let tgz = write_file(dir.path(), "x.tgz", &[0x1f, 0x8b, 0x08, 0x00]);
        assert_eq!(detect(&tgz), ArchiveFormat::TarGz);

        let tarbz2 = write_file(dir.path(), "x.tar.bz2", b"BZh91AY");
        assert_eq!(detect(&tarbz2), ArchiveFormat::TarBz2);

        let tarxz = write_file(dir.path(), "x.tar.xz", &[0xfd, b'7', b'z', b'X', b'Z', 0x00]);
        assert_eq!(detect(&tarxz), ArchiveFormat::TarXz);

        // gzip magic without a tarball name is not something we can open
        let gz = write_file(dir.path(), "x.gz", &[0x1f, 0x8b, 0x08, 0x00]);
        assert_eq!(detect(&gz), ArchiveFormat::Unknown);
    }

    #[test]
    fn test_extension_fallback_for_missing_file() {
        // No file on disk: create-style paths resolve by extension only
        assert_eq!(detect(Path::new("/nonexistent/a.rar")), ArchiveFormat::Rar);
        assert_eq!(detect(Path::new("/nonexistent/a.zip")), ArchiveFormat::Zip);
        assert_eq!(detect(Path::new("/nonexistent/a.7z")), ArchiveFormat::SevenZip);
        assert_eq!(detect(Path::new("/nonexistent/a.tar")), ArchiveFormat::Tar);
        assert_eq!(detect(Path::new("/nonexistent/a.tbz2")), ArchiveFormat::TarBz2);
        assert_eq!(detect(Path::new("/nonexistent/a.txz")), ArchiveFormat::TarXz);
        assert_eq!(detect(Path::new("/nonexistent/a.dat")), ArchiveFormat::Unknown);
    }

    #[test]
    fn test_short_file_falls_back_to_extension() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "tiny.zip", b"PK");
        assert_eq!(detect(&path), ArchiveFormat::Zip);
    }

    #[test]
    fn test_format_accessors() {
        assert_eq!(ArchiveFormat::Rar.name(), "RAR");
        assert_eq!(ArchiveFormat::TarGz.extension(), "tar.gz");
        assert!(ArchiveFormat::TarXz.is_tar());
        assert!(!ArchiveFormat::Zip.is_tar());
        assert_eq!(ArchiveFormat::Unknown.extension(), "");
    }
}
