//! Output path resolution, done once when a job is enqueued.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::render::OverwriteRule;

const OUTPUT_EXTENSION: &str = "pdf";
const MAX_RENAME_ATTEMPTS: usize = 1000;

/// Where converted PDFs go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DestinationPolicy {
    /// Next to the EPUB, same stem.
    #[default]
    SameAsSource,
    Directory { path: PathBuf },
}

/// What to do when the output path already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Replace a PDF this tool wrote earlier; fail on anything else.
    #[default]
    ReplaceOwnOutput,
    Overwrite,
    /// Pick `name_2.pdf`, `name_3.pdf`, ... at enqueue time.
    Rename,
}

/// Resolves the output path and overwrite rule for `source`.
///
/// `taken` reports paths already claimed by live jobs. Only `Rename`
/// touches the filesystem.
pub fn resolve_output(
    source: &Path,
    destination: &DestinationPolicy,
    collision: CollisionPolicy,
    taken: impl Fn(&Path) -> bool,
) -> Result<(PathBuf, OverwriteRule), QueueError> {
    let invalid = |reason: &str| QueueError::InvalidSource {
        path: source.to_path_buf(),
        reason: reason.to_string(),
    };

    let stem = source
        .file_stem()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("path has no file name"))?;
    let file_name = format!("{}.{}", stem.to_string_lossy(), OUTPUT_EXTENSION);

    let directory = match destination {
        DestinationPolicy::SameAsSource => source.parent().map(Path::to_path_buf).unwrap_or_default(),
        DestinationPolicy::Directory { path } => path.clone(),
    };

    let output = directory.join(&file_name);
    if output == source {
        return Err(invalid("output would replace the source file"));
    }

    match collision {
        CollisionPolicy::ReplaceOwnOutput => Ok((output, OverwriteRule::OwnOutputOnly)),
        CollisionPolicy::Overwrite => Ok((output, OverwriteRule::Always)),
        CollisionPolicy::Rename => {
            let output = resolve_conflict(&directory, &file_name, |p| taken(p) || p == source)
                .ok_or_else(|| invalid("no free output file name"))?;
            Ok((output, OverwriteRule::Never))
        }
    }
}

/// First free `name.pdf`, `name_2.pdf`, ... in `directory`.
fn resolve_conflict(
    directory: &Path,
    filename: &str,
    taken: impl Fn(&Path) -> bool,
) -> Option<PathBuf> {
    let is_free = |path: &Path| std::fs::symlink_metadata(path).is_err() && !taken(path);

    let path = directory.join(filename);
    if is_free(&path) {
        return Some(path);
    }

    let (base, ext) = match filename.rfind('.') {
        Some(dot_pos) => (&filename[..dot_pos], Some(&filename[dot_pos..])),
        None => (filename, None),
    };

    (2..=MAX_RENAME_ATTEMPTS)
        .map(|counter| match ext {
            Some(ext) => directory.join(format!("{}_{}{}", base, counter, ext)),
            None => directory.join(format!("{}_{}", base, counter)),
        })
        .find(|candidate| is_free(candidate))
}
