//! Finds the file yt-dlp just produced.
//!
//! yt-dlp names its output after the video title, so the caller cannot know
//! the final path up front. We scan the output directory instead and take the
//! most recently modified file with the expected extension.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Returns the newest regular file in `directory` (non-recursive) whose name
/// matches `*.<extension>`.
///
/// Equal modification times resolve to the lexicographically smallest path so
/// the answer never depends on directory iteration order. Zero matches is
/// `Ok(None)`; a missing directory surfaces as the scan's `io::Error`.
/// Entries that disappear mid-scan, such as a `.part` file another yt-dlp
/// renames away, are skipped.
pub fn find_newest(directory: &Path, extension: &str) -> io::Result<Option<PathBuf>> {
    let suffix = format!(".{}", extension.trim_start_matches('.'));
    let mut candidates = Vec::new();

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !matches_glob(name, &suffix) {
            continue;
        }
        let path = entry.path();
        if let Some(modified) = skip_vanished(file_modified(&path))? {
            candidates.push((path, modified));
        }
    }

    Ok(newest_of(candidates))
}

// Follows symlinks like the glob does. `None` means "not a regular file".
fn file_modified(path: &Path) -> io::Result<Option<SystemTime>> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() {
        return Ok(None);
    }
    metadata.modified().map(Some)
}

fn skip_vanished(result: io::Result<Option<SystemTime>>) -> io::Result<Option<SystemTime>> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        other => other,
    }
}

/// Picks the entry with the greatest timestamp from an unordered set.
pub fn newest_of<I>(candidates: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = (PathBuf, SystemTime)>,
{
    candidates
        .into_iter()
        .fold(None, |best: Option<(PathBuf, SystemTime)>, (path, modified)| match best {
            Some((best_path, best_modified))
                if best_modified > modified
                    || (best_modified == modified && best_path <= path) =>
            {
                Some((best_path, best_modified))
            }
            _ => Some((path, modified)),
        })
        .map(|(path, _)| path)
}

// `*` matches any prefix, including a leading dot or nothing at all.
fn matches_glob(name: &str, suffix: &str) -> bool {
    name.ends_with(suffix)
}
