//! Small helpers for path layout and lock handling

use crate::types::JobId;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked
///
/// Coordinator tables are only ever mutated by short non-panicking sections, so the data
/// behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Directory a job's transfer saves into: `download_dir/<job id>`
pub fn job_download_dir(download_dir: &Path, id: JobId) -> PathBuf {
    download_dir.join(id.to_string())
}

/// Remote destination for one file: `[folder/]job_name/file_path`
///
/// Backslashes are normalized and empty segments dropped so the result is always a
/// clean `/`-separated relative path. Returns `None` if any part climbs out with `..`.
pub fn remote_path(folder: Option<&str>, job_name: &str, file_path: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in folder
        .into_iter()
        .chain([job_name, file_path])
        .flat_map(segments_of)
    {
        match segment {
            "" | "." => {}
            ".." => return None,
            segment => segments.push(segment),
        }
    }
    Some(segments.join("/"))
}

/// Whether a torrent-supplied name climbs out of its directory
///
/// Both separators count, so `..\x` is caught on every platform.
pub fn escapes_root(name: &str) -> bool {
    !is_contained(Path::new(name)) || has_parent_segment(name)
}

/// Whether any `/` or `\` separated segment of `name` is `..`
pub(crate) fn has_parent_segment(name: &str) -> bool {
    segments_of(name).any(|segment| segment == "..")
}

fn segments_of(part: &str) -> impl Iterator<Item = &str> {
    part.split(['/', '\\']).map(str::trim)
}

/// Whether a relative path stays inside its root (no `..`, no absolute prefix)
pub fn is_contained(relative: &Path) -> bool {
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_path_joins_and_normalizes() {
        assert_eq!(
            remote_path(Some("drive/root/"), "Ubuntu ISO", "iso\\ubuntu.iso").as_deref(),
            Some("drive/root/Ubuntu ISO/iso/ubuntu.iso")
        );
        assert_eq!(
            remote_path(None, "name", "./a//b.txt").as_deref(),
            Some("name/a/b.txt")
        );
    }

    #[test]
    fn remote_path_rejects_parent_segments() {
        assert_eq!(remote_path(Some("evil"), "t", "../../secret"), None);
        assert_eq!(remote_path(Some("evil"), "t", "a\\..\\..\\b"), None);
        assert_eq!(remote_path(Some("../up"), "t", "a.txt"), None);
        assert_eq!(remote_path(None, "..", "a.txt"), None);
        assert_eq!(
            remote_path(None, "t", "a..b/c.txt").as_deref(),
            Some("t/a..b/c.txt")
        );
    }

    #[test]
    fn escapes_root_catches_both_separators() {
        assert!(escapes_root("/etc/hostname"));
        assert!(escapes_root("../../secret"));
        assert!(escapes_root("dir\\..\\..\\secret"));
        assert!(!escapes_root("disc/track01.flac"));
        assert!(!escapes_root("notes..txt"));
    }

    #[test]
    fn containment_rejects_escapes() {
        assert!(is_contained(Path::new("a/b/c.txt")));
        assert!(!is_contained(Path::new("../etc/passwd")));
        assert!(!is_contained(Path::new("/abs/path")));
        assert!(!is_contained(Path::new("a/../../b")));
    }

    #[test]
    fn job_dir_is_keyed_by_id() {
        let id = JobId::new();
        let dir = job_download_dir(Path::new("/data"), id);
        assert_eq!(dir, PathBuf::from(format!("/data/{id}")));
    }
}
