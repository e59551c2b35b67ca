//! Dataset file scanner
//!
//! Lists the regular files of a dataset directory. Only direct children are taken
//! by default; nested directories are not descended into unless a deeper
//! `max_depth` is configured. The listing is sorted by path so that `only` and
//! `step` slices are reproducible between runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Dataset scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Dataset file scanner
pub struct FileScanner {
    ignore_patterns: Vec<String>,
    max_depth: usize,
}

impl FileScanner {
    /// Create a non-recursive scanner with default ignore patterns
    ///
    /// Ignores system files like .DS_Store and Thumbs.db, and hidden temp files.
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
                ".json.tmp".to_string(),
            ],
            max_depth: 1,
        }
    }

    /// Descend `depth` levels below the root (1 = direct children only)
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn with_ignore_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_patterns.push(pattern.into());
        self
    }

    /// Sorted regular files under `root_path`
    pub fn scan(&self, root_path: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }

        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        let mut symlink_visited = HashSet::new();
        let mut files = Vec::new();

        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .min_depth(1)
            .max_depth(self.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e, &mut symlink_visited));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                }
            }
        }

        files.sort();

        tracing::debug!(
            root = %root_path.display(),
            files = files.len(),
            "Dataset scan complete"
        );

        Ok(files)
    }

    /// Scan and keep at most `only` files
    pub fn scan_dataset(
        &self,
        root_path: &Path,
        only: Option<usize>,
    ) -> Result<Vec<PathBuf>, ScanError> {
        let mut files = self.scan(root_path)?;
        if let Some(limit) = only {
            files.truncate(limit);
        }
        Ok(files)
    }

    fn should_process_entry(&self, entry: &DirEntry, symlink_visited: &mut HashSet<PathBuf>) -> bool {
        let file_name = entry.file_name().to_string_lossy();

        for pattern in &self.ignore_patterns {
            if file_name.contains(pattern.as_str()) {
                return false;
            }
        }

        if entry.file_type().is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!("Symlink loop detected: {}", entry.path().display());
                    return false;
                }
            }
        }

        true
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_nonexistent_path() {
        let scanner = FileScanner::new();
        match scanner.scan(Path::new("/nonexistent/path")) {
            Err(ScanError::PathNotFound(_)) => {}
            other => panic!("Expected PathNotFound error, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_file_as_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.png");
        fs::write(&file, b"x").unwrap();

        match FileScanner::new().scan(&file) {
            Err(ScanError::NotADirectory(_)) => {}
            other => panic!("Expected NotADirectory error, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_is_sorted_and_flat() {
        let dir = TempDir::new().unwrap();
        for name in ["c.png", "a.png", "b.png"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/d.png"), b"x").unwrap();
        fs::write(dir.path().join(".DS_Store"), b"x").unwrap();

        let files = FileScanner::new().scan(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn test_scan_dataset_applies_only() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("{}.png", i)), b"x").unwrap();
        }

        let files = FileScanner::new().scan_dataset(dir.path(), Some(3)).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("0.png"));

        let all = FileScanner::new().scan_dataset(dir.path(), Some(50)).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_scan_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(FileScanner::new().scan(dir.path()).unwrap().is_empty());
    }
}
