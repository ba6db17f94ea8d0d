//! Directory walk and checksum map.
//!
//! Produces `path → checksum` for every regular file under the project root,
//! plus the inverse `checksum → paths` used for move detection. Paths are
//! relative to the root and always use forward slashes.

use std::collections::HashMap;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use crate::error::{KbError, Result};
use crate::file_service::compute_checksum_bytes;

/// Directory and file names that are never part of a knowledge base.
const IGNORED_NAMES: &[&str] = &[
    "node_modules",
    "__pycache__",
    "target",
    "build",
    "dist",
    "venv",
    "Thumbs.db",
    "desktop.ini",
];

#[derive(Debug, Default, Clone)]
pub struct ScanResult {
    pub files: HashMap<String, String>,
    pub checksums: HashMap<String, Vec<String>>,
}

impl ScanResult {
    fn insert(&mut self, path: String, checksum: String) {
        self.checksums
            .entry(checksum.clone())
            .or_default()
            .push(path.clone());
        self.files.insert(path, checksum);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || IGNORED_NAMES.contains(&name.as_ref())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let invalid = |e: globset::Error| KbError::Validation(format!("invalid exclude glob: {}", e));
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(invalid)?);
    }
    builder.build().map_err(invalid)
}

/// Relative, forward-slash form of `path` under `root`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk `root` synchronously. Unreadable entries are skipped with a warning.
pub fn scan_directory(root: &Path, exclude_globs: &[String]) -> Result<ScanResult> {
    if !root.is_dir() {
        return Err(KbError::Scan(format!(
            "knowledge base root does not exist: {}",
            root.display()
        )));
    }

    let exclude_set = build_globset(exclude_globs)?;

    let mut result = ScanResult::default();
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| !is_ignored(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let rel_path = relative_path(root, entry.path());
        if exclude_set.is_match(&rel_path) {
            continue;
        }

        match std::fs::read(entry.path()) {
            Ok(bytes) => result.insert(rel_path, compute_checksum_bytes(&bytes)),
            Err(err) => {
                tracing::warn!(path = %rel_path, error = %err, "skipping unreadable file");
            }
        }
    }

    for paths in result.checksums.values_mut() {
        paths.sort();
    }

    Ok(result)
}

/// [`scan_directory`] on the blocking pool.
pub async fn scan(root: &Path, exclude_globs: &[String]) -> Result<ScanResult> {
    let root = root.to_path_buf();
    let exclude_globs = exclude_globs.to_vec();
    tokio::task::spawn_blocking(move || scan_directory(&root, &exclude_globs))
        .await
        .map_err(|e| KbError::Scan(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn scans_with_relative_forward_slash_paths() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.md", "alpha");
        write(tmp.path(), "notes/deep/b.md", "beta");

        let scan = scan_directory(tmp.path(), &[]).unwrap();
        assert_eq!(scan.len(), 2);
        assert_eq!(scan.files["a.md"], compute_checksum_bytes(b"alpha"));
        assert!(scan.files.contains_key("notes/deep/b.md"));
    }

    #[test]
    fn skips_hidden_and_build_directories() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "keep.md", "keep");
        write(tmp.path(), ".hidden.md", "x");
        write(tmp.path(), ".git/config", "x");
        write(tmp.path(), "node_modules/pkg/readme.md", "x");
        write(tmp.path(), "target/debug/out.md", "x");
        write(tmp.path(), "sub/.obsidian/workspace.json", "x");
        write(tmp.path(), "sub/Thumbs.db", "x");

        let scan = scan_directory(tmp.path(), &[]).unwrap();
        let mut paths: Vec<_> = scan.files.keys().cloned().collect();
        paths.sort();
        assert_eq!(paths, vec!["keep.md"]);
    }

    #[test]
    fn applies_exclude_globs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "keep.md", "keep");
        write(tmp.path(), "drafts/wip.md", "wip");

        let scan = scan_directory(tmp.path(), &["drafts/**".to_string()]).unwrap();
        assert_eq!(scan.len(), 1);
        assert!(scan.files.contains_key("keep.md"));
    }

    #[test]
    fn inverse_map_groups_identical_content() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b.md", "same");
        write(tmp.path(), "a.md", "same");
        write(tmp.path(), "c.md", "other");

        let scan = scan_directory(tmp.path(), &[]).unwrap();
        let same = compute_checksum_bytes(b"same");
        assert_eq!(scan.checksums[&same], vec!["a.md", "b.md"]);
        assert_eq!(scan.checksums.len(), 2);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_directory(&tmp.path().join("nope"), &[]).is_err());
    }

    #[tokio::test]
    async fn async_scan_matches_blocking_scan() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.md", "alpha");
        let scan = scan(tmp.path(), &[]).await.unwrap();
        assert_eq!(scan.len(), 1);
    }
}
