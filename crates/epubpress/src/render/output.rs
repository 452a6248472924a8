//! Atomic output: write to a temp file beside the target, then rename.

use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::ConversionError;

use super::writer::PRODUCER_PREFIX;

/// What may happen to a file already present at the output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteRule {
    Always,
    /// Replace only PDFs this crate produced earlier.
    OwnOutputOnly,
    Never,
}

pub fn write_atomic(path: &Path, bytes: &[u8], rule: OverwriteRule) -> Result<(), ConversionError> {
    let write_failure = |source: io::Error| ConversionError::WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(write_failure(io::Error::new(
            io::ErrorKind::NotFound,
            format!("output directory '{}' does not exist", parent.display()),
        )));
    }

    if path.exists() {
        match rule {
            OverwriteRule::Always => {}
            OverwriteRule::OwnOutputOnly if is_own_output(path) => {}
            OverwriteRule::OwnOutputOnly | OverwriteRule::Never => {
                return Err(write_failure(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "refusing to replace an existing file",
                )));
            }
        }
    }

    let mut temp = NamedTempFile::new_in(parent).map_err(write_failure)?;
    temp.write_all(bytes).map_err(write_failure)?;
    temp.as_file().sync_all().map_err(write_failure)?;

    match rule {
        OverwriteRule::Never => temp
            .persist_noclobber(path)
            .map_err(|e| write_failure(e.error))?,
        OverwriteRule::Always | OverwriteRule::OwnOutputOnly => {
            temp.persist(path).map_err(|e| write_failure(e.error))?
        }
    };

    Ok(())
}

/// Whether `path` is a PDF whose `/Producer` names this crate.
pub fn is_own_output(path: &Path) -> bool {
    let Ok(doc) = lopdf::Document::load(path) else {
        return false;
    };
    doc.trailer
        .get(b"Info")
        .and_then(|info| info.as_reference())
        .and_then(|id| doc.get_dictionary(id))
        .and_then(|info| info.get(b"Producer"))
        .and_then(|producer| producer.as_str())
        .map(|producer| producer.starts_with(PRODUCER_PREFIX.as_bytes()))
        .unwrap_or(false)
}
