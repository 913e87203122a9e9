//! Dataset classification
//!
//! Recognizes the two dataset families an archive accepts and lists the
//! metadata files worth keeping for a directory dataset.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// First bytes of every single-file columnar (HDF5) dataset
pub const HDF5_SIGNATURE: [u8; 8] = [137, 72, 68, 70, 13, 10, 26, 10];

/// Metadata index that marks a directory dataset
pub const INDEX_FILE: &str = "md.idx";
/// First raw data segment of a directory dataset
pub const FIRST_DATA_FILE: &str = "data.0";
/// Per-dataset profiling report
pub const PROFILING_FILE: &str = "profiling.json";

/// What a candidate path turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// Directory with a metadata index and at least one data segment
    Structured,
    /// Single file carrying the HDF5 signature
    Columnar,
    Unrecognized,
}

impl DatasetKind {
    pub fn is_recognized(self) -> bool {
        self != Self::Unrecognized
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Structured => "ADIOS dataset",
            Self::Columnar => "HDF5 file",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Classify the filesystem entry at `path`
pub fn classify(path: &Path) -> DatasetKind {
    if is_structured(path) {
        DatasetKind::Structured
    } else if is_columnar(path) {
        DatasetKind::Columnar
    } else {
        DatasetKind::Unrecognized
    }
}

fn is_structured(path: &Path) -> bool {
    path.is_dir() && path.join(INDEX_FILE).exists() && path.join(FIRST_DATA_FILE).exists()
}

fn is_columnar(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let mut header = [0u8; HDF5_SIGNATURE.len()];
    match File::open(path).and_then(|mut f| f.read_exact(&mut header)) {
        Ok(()) => header == HDF5_SIGNATURE,
        Err(_) => false,
    }
}

/// Metadata files of a directory dataset, as names relative to it:
/// every entry whose name contains `md.`, plus the profiling report.
/// Hidden entries are skipped. Sorted by name.
pub fn metadata_files(dataset: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dataset).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Cannot list dataset {:?}", dataset))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        if name.contains("md.") || name == PROFILING_FILE {
            files.push(name.into_owned());
        }
    }
    Ok(files)
}
