//! Archive manifests: what goes into a ZIP, in what order.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{NimbusError, Result};

/// One file scheduled for archiving.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    /// Absolute path of the source file on disk.
    pub source: PathBuf,
    /// Path inside the archive, forward slashes only.
    pub archive_path: String,
    /// Uncompressed size in bytes.
    pub size: u64,
}

/// Ordered list of files to stream into an archive.
#[derive(Debug, Clone)]
pub struct ArchiveManifest {
    pub entries: Vec<ManifestEntry>,
}

impl ArchiveManifest {
    /// Wrap an explicit entry list. Empty selections are rejected.
    pub fn new(entries: Vec<ManifestEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(NimbusError::EmptyFolder(
                "selection contains no files".to_string(),
            ));
        }
        Ok(Self { entries })
    }

    /// Walk a folder recursively and collect every regular file.
    ///
    /// Entries come out depth-first in name order, so the same tree always
    /// produces the same archive. Unreadable subdirectories are skipped
    /// with a warning rather than failing the whole archive; a folder with
    /// zero eligible files is an error.
    pub fn from_folder(folder: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        walk(folder, "", &mut entries);
        if entries.is_empty() {
            return Err(NimbusError::EmptyFolder(format!(
                "folder contains no files: {}",
                folder.display()
            )));
        }
        Ok(Self { entries })
    }

    /// Number of files in the archive.
    pub fn total_files(&self) -> usize {
        self.entries.len()
    }

    /// Total uncompressed size in bytes.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

fn walk(dir: &Path, prefix: &str, entries: &mut Vec<ManifestEntry>) {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "skipping unreadable directory");
            return;
        }
    };

    let mut children: Vec<_> = read_dir.filter_map(|e| e.ok()).collect();
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let name = child.file_name().to_string_lossy().into_owned();
        let archive_path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        let path = child.path();

        let Ok(file_type) = child.file_type() else {
            warn!(path = %path.display(), "skipping entry with unreadable type");
            continue;
        };
        if file_type.is_dir() {
            walk(&path, &archive_path, entries);
        } else if file_type.is_file() {
            match child.metadata() {
                Ok(meta) => entries.push(ManifestEntry {
                    source: path,
                    archive_path,
                    size: meta.len(),
                }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                }
            }
        }
        // Symlinks and other special files are not archived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_folder_recursive_and_ordered() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bbbb").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"aa").unwrap();
        std::fs::write(dir.path().join("sub").join("c.txt"), b"cccccc").unwrap();

        let manifest = ArchiveManifest::from_folder(dir.path()).unwrap();
        let paths: Vec<&str> = manifest
            .entries
            .iter()
            .map(|e| e.archive_path.as_str())
            .collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "sub/c.txt"]);
        assert_eq!(manifest.total_files(), 3);
        assert_eq!(manifest.total_size(), 12);
    }

    #[test]
    fn test_forward_slashes_in_nested_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("x").join("y")).unwrap();
        std::fs::write(dir.path().join("x").join("y").join("f.bin"), b"1").unwrap();

        let manifest = ArchiveManifest::from_folder(dir.path()).unwrap();
        assert_eq!(manifest.entries[0].archive_path, "x/y/f.bin");
    }

    #[test]
    fn test_empty_folder_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ArchiveManifest::from_folder(dir.path()),
            Err(NimbusError::EmptyFolder(_))
        ));
    }

    #[test]
    fn test_folder_with_only_empty_subdirs_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a").join("b")).unwrap();
        assert!(matches!(
            ArchiveManifest::from_folder(dir.path()),
            Err(NimbusError::EmptyFolder(_))
        ));
    }

    #[test]
    fn test_empty_selection_rejected() {
        assert!(matches!(
            ArchiveManifest::new(Vec::new()),
            Err(NimbusError::EmptyFolder(_))
        ));
    }
}
