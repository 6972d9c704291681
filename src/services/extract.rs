//! Zip archive extraction into per-job scratch directories.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use zip::ZipArchive;

/// Marker file written once an archive has been fully unpacked. A scratch
/// directory carrying the marker is never walked again; one without it is
/// resumed entry by entry.
const DONE_MARKER: &str = ".extract_done";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("archive I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive entry escapes extraction root: {0}")]
    UnsafeEntry(String),
}

impl ExtractError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// A broken container or a hostile entry path means the archive itself is
    /// bad; plain I/O failures are worth retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Archive { .. } | Self::UnsafeEntry(_))
    }
}

/// Unpack `archive_path` into `output_dir`.
///
/// Extraction is idempotent and resumable: once the completion marker exists
/// the call returns immediately, and on a resumed run entries already on disk
/// are left untouched. Bare directory entries create directories and are
/// never written as files.
pub fn extract(archive_path: &Path, output_dir: &Path) -> Result<(), ExtractError> {
    let marker = output_dir.join(DONE_MARKER);
    if marker.exists() {
        return Ok(());
    }

    fs::create_dir_all(output_dir).map_err(|e| ExtractError::io(output_dir, e))?;

    let file = File::open(archive_path).map_err(|e| ExtractError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|source| ExtractError::Archive {
        path: archive_path.to_path_buf(),
        source,
    })?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|source| ExtractError::Archive {
            path: archive_path.to_path_buf(),
            source,
        })?;

        let raw_name = entry.name().to_string();
        let relative = sanitize_entry_path(&raw_name)?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let destination = output_dir.join(&relative);

        if raw_name.ends_with('/') || raw_name.ends_with('\\') {
            fs::create_dir_all(&destination).map_err(|e| ExtractError::io(&destination, e))?;
            continue;
        }

        // Per-entry resume: a file left behind by an interrupted run is done.
        if destination.exists() {
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
        }

        let mut output = File::create(&destination).map_err(|e| ExtractError::io(&destination, e))?;
        io::copy(&mut entry, &mut output).map_err(|e| ExtractError::io(&destination, e))?;
    }

    fs::write(&marker, b"").map_err(|e| ExtractError::io(&marker, e))?;

    Ok(())
}

/// Normalize a zip entry name (forward or back slashes) to a safe relative
/// path. Absolute paths and parent-directory components are rejected.
fn sanitize_entry_path(entry: &str) -> Result<PathBuf, ExtractError> {
    let normalized = entry.replace('\\', "/");

    let mut sanitized = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            _ => return Err(ExtractError::UnsafeEntry(entry.to_string())),
        }
    }

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_paths_normalize_both_separator_styles() {
        assert_eq!(
            sanitize_entry_path("items/C/cap/img.jpg").unwrap(),
            PathBuf::from("items/C/cap/img.jpg")
        );
        assert_eq!(
            sanitize_entry_path("labels\\a.txt").unwrap(),
            PathBuf::from("labels/a.txt")
        );
        assert_eq!(
            sanitize_entry_path("./item.json").unwrap(),
            PathBuf::from("item.json")
        );
    }

    #[test]
    fn hostile_entry_paths_are_rejected() {
        assert!(sanitize_entry_path("/etc/passwd").is_err());
        assert!(sanitize_entry_path("../outside.txt").is_err());
        assert!(sanitize_entry_path("items/../../outside.txt").is_err());
    }

    #[test]
    fn directory_entries_yield_their_path() {
        assert_eq!(
            sanitize_entry_path("items/").unwrap(),
            PathBuf::from("items")
        );
    }
}
