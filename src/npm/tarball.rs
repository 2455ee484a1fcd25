//! Tarball unpacking
//!
//! npm publishes gzipped tar archives with a single top-level `package/`
//! directory. Unpacking strips that prefix, keeps regular files only, and
//! classifies each entry as text (valid UTF-8) or opaque binary.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use tar::Archive;

/// One file lifted out of a package tarball
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path relative to the package root, `/`-separated
    pub path: String,
    pub data: FileData,
    /// Unix mode bits from the tar header
    pub mode: u32,
}

/// Decoded entry payload
#[derive(Debug, Clone)]
pub enum FileData {
    Text(String),
    Binary(Vec<u8>),
}

impl FileData {
    pub fn is_binary(&self) -> bool {
        matches!(self, FileData::Binary(_))
    }
}

/// Unpack a gzipped tarball into its file entries.
pub fn unpack(bytes: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let decoder = GzDecoder::new(Cursor::new(bytes));
    let mut archive = Archive::new(decoder);
    let mut entries = Vec::new();

    let iter = archive
        .entries()
        .map_err(|e| Error::corrupt_tarball(format!("unreadable archive: {}", e)))?;
    for entry in iter {
        let mut entry =
            entry.map_err(|e| Error::corrupt_tarball(format!("bad tar entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw_path = entry
            .path()
            .map_err(|e| Error::corrupt_tarball(format!("bad entry path: {}", e)))?
            .to_string_lossy()
            .replace('\\', "/");
        let Some(relative) = strip_root(&raw_path) else {
            continue;
        };
        let mode = entry.header().mode().unwrap_or(0o644);

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| Error::corrupt_tarball(format!("truncated entry '{}': {}", raw_path, e)))?;

        let data = match String::from_utf8(bytes) {
            Ok(text) => FileData::Text(text),
            Err(err) => FileData::Binary(err.into_bytes()),
        };
        entries.push(ArchiveEntry {
            path: relative,
            data,
            mode,
        });
    }

    if entries.is_empty() {
        return Err(Error::corrupt_tarball("archive contains no files".to_string()));
    }
    Ok(entries)
}

/// Strip the tarball's single top-level directory (normally `package/`).
fn strip_root(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches("./");
    let (_, rest) = trimmed.split_once('/')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn build_tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_unpack_strips_package_prefix() {
        let tarball = build_tarball(&[
            ("package/package.json", br#"{"name":"demo"}"#),
            ("package/lib/index.js", b"module.exports = 1;"),
        ]);
        let entries = unpack(&tarball).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"package.json"));
        assert!(paths.contains(&"lib/index.js"));
    }

    #[test]
    fn test_unpack_classifies_text_and_binary() {
        let tarball = build_tarball(&[
            ("package/readme.md", b"hello"),
            ("package/logo.png", &[0x89, 0x50, 0x4e, 0x47, 0xff, 0xfe]),
        ]);
        let entries = unpack(&tarball).unwrap();
        let readme = entries.iter().find(|e| e.path == "readme.md").unwrap();
        let logo = entries.iter().find(|e| e.path == "logo.png").unwrap();
        assert!(matches!(readme.data, FileData::Text(ref t) if t == "hello"));
        assert!(logo.data.is_binary());
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let err = unpack(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, Error::CorruptTarball(_)));
    }

    #[test]
    fn test_unpack_rejects_empty_archive() {
        let tarball = build_tarball(&[]);
        assert!(matches!(
            unpack(&tarball),
            Err(Error::CorruptTarball(_))
        ));
    }

    #[test]
    fn test_strip_root_variants() {
        assert_eq!(strip_root("package/index.js").as_deref(), Some("index.js"));
        assert_eq!(
            strip_root("./package/lib/a.js").as_deref(),
            Some("lib/a.js")
        );
        assert_eq!(strip_root("toplevel-file"), None);
    }
}
