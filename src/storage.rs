//! Disk-backed storage root with path containment.
//!
//! Every relative path coming in over the API is validated here before any
//! filesystem access: no absolute paths, no parent-directory components, no
//! Windows prefixes. The storage root is created on construction.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::{NimbusError, Result};

/// Validate a client-supplied relative path.
///
/// Rejects empty paths, absolute paths, and any `..` component so the
/// resolved path can never escape the root it is joined onto.
pub fn validate_relative_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(NimbusError::InvalidPath("empty path".to_string()));
    }

    let candidate = Path::new(path);
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(NimbusError::InvalidPath(format!(
                    "path contains parent directory component: {path}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(NimbusError::InvalidPath(format!(
                    "absolute paths are not allowed: {path}"
                )));
            }
        }
    }

    Ok(())
}

/// Validate a single file name (one path component, no separators).
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(NimbusError::InvalidPath("empty file name".to_string()));
    }
    if name == "." || name == ".." {
        return Err(NimbusError::InvalidPath(format!(
            "invalid file name: {name}"
        )));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(NimbusError::InvalidPath(format!(
            "file name must not contain path separators: {name}"
        )));
    }
    Ok(())
}

/// Handle to the directory tree served by the transfer API.
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    /// Open (and create if missing) a storage root at the given path.
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The root directory itself.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied relative path against the root.
    ///
    /// Purely lexical: validates containment and joins. Existence checks
    /// are up to the caller. `"."` resolves to the root itself.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        validate_relative_path(relative)?;
        if relative == "." {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_normal_paths() {
        assert!(validate_relative_path("file.txt").is_ok());
        assert!(validate_relative_path("sub/dir/file.txt").is_ok());
        assert!(validate_relative_path("./file.txt").is_ok());
        assert!(validate_relative_path(".").is_ok());
    }

    #[test]
    fn test_validate_rejects_traversal() {
        assert!(validate_relative_path("../secret").is_err());
        assert!(validate_relative_path("sub/../../secret").is_err());
        assert!(validate_relative_path("..").is_err());
    }

    #[test]
    fn test_validate_rejects_absolute() {
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("").is_err());
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("report.pdf").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("a/b").is_err());
        assert!(validate_file_name("a\\b").is_err());
    }

    #[test]
    fn test_new_creates_root() {
        let dir = TempDir::new().unwrap();
        let root_path = dir.path().join("storage");
        assert!(!root_path.exists());
        let storage = StorageRoot::new(&root_path).unwrap();
        assert!(root_path.is_dir());
        assert_eq!(storage.path(), root_path);
    }

    #[test]
    fn test_resolve_inside_root() {
        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::new(dir.path()).unwrap();
        let resolved = storage.resolve("sub/file.txt").unwrap();
        assert!(resolved.starts_with(dir.path()));
    }

    #[test]
    fn test_resolve_dot_is_root() {
        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::new(dir.path()).unwrap();
        assert_eq!(storage.resolve(".").unwrap(), dir.path());
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let storage = StorageRoot::new(dir.path()).unwrap();
        assert!(matches!(
            storage.resolve("../outside"),
            Err(NimbusError::InvalidPath(_))
        ));
    }
}
