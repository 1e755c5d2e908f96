//! Path relevance filtering for the normalizer.

use std::path::Path;

/// Decides which paths are worth indexing.
///
/// A path passes when its extension is on the allow-list, no component is
/// on the ignore list, and it is not hidden. The size ceiling is checked
/// separately by the debouncer (it needs a `stat`, and deleted files have
/// nothing to stat).
#[derive(Debug, Clone)]
pub struct PathFilter {
    /// Allowed file extensions, without the leading dot
    pub extensions: Vec<String>,
    /// Directory or file names to ignore anywhere in the path
    pub ignore_names: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: u64,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            extensions: ["md", "txt", "py", "rs"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            ignore_names: [
                ".git",
                "__pycache__",
                "node_modules",
                "target",
                ".venv",
                "venv",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            max_file_size: 2 * 1024 * 1024,
        }
    }
}

impl PathFilter {
    /// Whether a file path is eligible for indexing.
    pub fn allows(&self, path: &Path) -> bool {
        if self.is_ignored_dir(path) {
            return false;
        }

        if path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'))
        {
            return false;
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            }
            None => false,
        }
    }

    /// Whether any path component is on the ignore list. Used on its own
    /// by the scanner to prune whole directories.
    pub fn is_ignored_dir(&self, path: &Path) -> bool {
        path.components().any(|component| {
            let name = component.as_os_str().to_string_lossy();
            self.ignore_names.iter().any(|ignored| *ignored == name)
        })
    }

    /// Whether a file size is within the ceiling.
    pub fn allows_size(&self, size: u64) -> bool {
        size <= self.max_file_size
    }
}
