//! Manifest reconciliation: match extracted images to labels and copy both
//! into the canonical dataset layout.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

/// Manifest file expected at the extracted archive root.
pub const MANIFEST_FILE: &str = "item.json";

const IMAGE_LIST: &str = "img.txt";
const LABEL_LIST: &str = "label.txt";
const IMAGE_VAL_LIST: &str = "img_val.txt";
const LABEL_VAL_LIST: &str = "label_val.txt";

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("manifest missing at {0}")]
    ManifestMissing(PathBuf),

    #[error("manifest {path} is not valid JSON: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("image file does not exist: {0}")]
    MissingImage(PathBuf),

    #[error("label file does not exist: {0}")]
    MissingLabel(PathBuf),

    #[error("manifest entry {key} has no usable file name: {path}")]
    BadImageName { key: String, path: PathBuf },

    #[error("I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ReconcileError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Everything but raw I/O signals a corrupt or mismatched archive and is
    /// not worth retrying.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Io { .. })
    }
}

/// Per-run counters reported back to the worker for logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileSummary {
    pub entries: usize,
    pub copied: usize,
    pub skipped: usize,
}

/// Reconcile the extracted archive under `scratch_dir` into the dataset
/// layout at `dest_dir`.
///
/// Entries whose image already exists under `dest_dir/images` are skipped
/// wholesale (no copies, no list lines), which makes re-runs of a partially
/// completed job cheap. The first missing source file aborts the run;
/// already-copied files and already-appended list lines stay on disk.
pub fn reconcile(scratch_dir: &Path, dest_dir: &Path) -> Result<ReconcileSummary, ReconcileError> {
    let manifest = read_manifest(scratch_dir)?;

    let images_dir = dest_dir.join("images");
    let labels_dir = dest_dir.join("labels");
    for dir in [dest_dir, images_dir.as_path(), labels_dir.as_path()] {
        fs::create_dir_all(dir).map_err(|e| ReconcileError::io(dir, e))?;
    }

    let image_list_path = dest_dir.join(IMAGE_LIST);
    let label_list_path = dest_dir.join(LABEL_LIST);
    let mut image_list = open_list(&image_list_path)?;
    let mut label_list = open_list(&label_list_path)?;

    let mut summary = ReconcileSummary {
        entries: manifest.len(),
        ..ReconcileSummary::default()
    };

    for (key, source) in &manifest {
        let image_src = resolve_source_image(scratch_dir, source)?;
        let image_name = image_src
            .file_name()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ReconcileError::BadImageName {
                key: key.clone(),
                path: image_src.clone(),
            })?
            .to_os_string();

        let image_dst = images_dir.join(&image_name);
        if image_dst.exists() {
            summary.skipped += 1;
            continue;
        }

        fs::copy(&image_src, &image_dst).map_err(|e| ReconcileError::io(&image_dst, e))?;
        writeln!(image_list, "{}", image_dst.display())
            .map_err(|e| ReconcileError::io(&image_list_path, e))?;

        let label_name = format!("{key}.txt");
        let label_src = scratch_dir.join("labels").join(&label_name);
        if !label_src.is_file() {
            return Err(ReconcileError::MissingLabel(label_src));
        }

        let label_dst = labels_dir.join(&label_name);
        fs::copy(&label_src, &label_dst).map_err(|e| ReconcileError::io(&label_dst, e))?;
        writeln!(label_list, "{}", label_dst.display())
            .map_err(|e| ReconcileError::io(&label_list_path, e))?;

        summary.copied += 1;
    }

    image_list
        .flush()
        .map_err(|e| ReconcileError::io(&image_list_path, e))?;
    label_list
        .flush()
        .map_err(|e| ReconcileError::io(&label_list_path, e))?;
    drop(image_list);
    drop(label_list);

    // The val lists are verbatim duplicates of the training lists.
    let image_val_path = dest_dir.join(IMAGE_VAL_LIST);
    let label_val_path = dest_dir.join(LABEL_VAL_LIST);
    fs::copy(&image_list_path, &image_val_path).map_err(|e| ReconcileError::io(&image_val_path, e))?;
    fs::copy(&label_list_path, &label_val_path).map_err(|e| ReconcileError::io(&label_val_path, e))?;

    Ok(summary)
}

/// Read `item.json`: an ordered mapping of item key to source image path.
fn read_manifest(scratch_dir: &Path) -> Result<IndexMap<String, String>, ReconcileError> {
    let path = scratch_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(ReconcileError::ManifestMissing(path));
    }

    let raw = fs::read_to_string(&path).map_err(|e| ReconcileError::io(&path, e))?;
    serde_json::from_str(&raw).map_err(|source| ReconcileError::ManifestParse { path, source })
}

fn open_list(path: &Path) -> Result<File, ReconcileError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ReconcileError::io(path, e))
}

/// Resolve a manifest image path captured on the origin machine to its
/// location under `<scratch>/items`.
///
/// Manifest paths use the capture environment's drive-letter + backslash
/// convention; the colon is stripped from the leading segment, so
/// `C:\cap\a.jpg` lands at `items/C/cap/a.jpg`.
fn resolve_source_image(scratch_dir: &Path, raw: &str) -> Result<PathBuf, ReconcileError> {
    let mut path = scratch_dir.join("items");
    for (index, segment) in raw.split('\\').enumerate() {
        if index == 0 {
            path.push(segment.replace(':', ""));
        } else {
            path.push(segment);
        }
    }

    if !path.is_file() {
        return Err(ReconcileError::MissingImage(path));
    }
    Ok(path)
}
