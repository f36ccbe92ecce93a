use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Filename-safe timestamp, unique to the millisecond.
pub fn timestamp_slug(at: DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Serialize `value` as pretty JSON into `dir/filename`.
///
/// The document is written to a hidden temp file first and renamed into
/// place, so readers never observe a partial artifact.
pub fn write_json<T: Serialize + ?Sized>(dir: &Path, filename: &str, value: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(filename);
    let tmp = dir.join(format!(".{filename}.tmp"));
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, &json)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("Failed to move artifact into {}", path.display()))?;
    Ok(path)
}

/// Files in `dir` accepted by `matches`, with their modification time.
/// Files that disappear while listing are skipped.
pub fn list_files(dir: &Path, matches: impl Fn(&str) -> bool) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .flatten()
    {
        let name = entry.file_name();
        if !matches(&name.to_string_lossy()[..]) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        if let Ok(modified) = meta.modified() {
            files.push((entry.path(), modified));
        }
    }
    Ok(files)
}

pub fn is_backup_file(name: &str) -> bool {
    name.starts_with("backup_") && name.ends_with(".json")
}

/// Keep the `keep` most recently modified files accepted by `matches`,
/// deleting the rest. At least one file is always kept. Returns the deleted
/// paths.
pub fn prune_to_newest(dir: &Path, keep: usize, matches: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let mut files = list_files(dir, matches)?;
    // Newest first; equal mtimes fall back to the (timestamped) name.
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = Vec::new();
    for (path, _) in files.into_iter().skip(keep.max(1)) {
        if remove_if_present(&path)? {
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Delete files accepted by `matches` whose age at `now` exceeds `max_age_days`
/// whole days. Returns the deleted paths.
pub fn remove_older_than(
    dir: &Path,
    max_age_days: u64,
    now: SystemTime,
    matches: impl Fn(&str) -> bool,
) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for (path, modified) in list_files(dir, matches)? {
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age.as_secs() / SECS_PER_DAY > max_age_days && remove_if_present(&path)? {
            removed.push(path);
        }
    }
    Ok(removed)
}

// Another writer may have deleted the file already.
fn remove_if_present(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    /// Create `dir/name` with its mtime set `age` in the past.
    pub fn touch_aged(dir: &Path, name: &str, age: Duration) {
        let path = dir.join(name);
        std::fs::write(&path, "{}").unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }
}
