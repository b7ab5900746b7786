use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

/// Marker file name in cache directory
const MARKER_FILE: &str = "session_marker";

/// Persisted "a session was previously established" flag.
///
/// Only decides whether a silent refresh is worth attempting; it is never
/// proof of authentication.
pub trait MarkerStore: Send + Sync {
    fn is_set(&self) -> bool;
    fn set(&self) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub struct FileMarker {
    path: PathBuf,
}

impl FileMarker {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: cache_dir.join(MARKER_FILE),
        }
    }
}

impl MarkerStore for FileMarker {
    fn is_set(&self) -> bool {
        std::fs::read_to_string(&self.path)
            .map(|contents| contents.trim() == "true")
            .unwrap_or(false)
    }

    fn set(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }
        std::fs::write(&self.path, "true").context("Failed to write session marker")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove session marker")?;
        }
        Ok(())
    }
}

/// Marker kept in memory, for ephemeral sessions and tests
#[derive(Debug, Default)]
pub struct MemoryMarker(AtomicBool);

impl MemoryMarker {
    pub fn new(initially_set: bool) -> Self {
        Self(AtomicBool::new(initially_set))
    }
}

impl MarkerStore for MemoryMarker {
    fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self) -> Result<()> {
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.0.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_marker_lifecycle() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let marker = FileMarker::new(dir.path().join("nested"));

        assert!(!marker.is_set());
        marker.set().expect("set should succeed");
        assert!(marker.is_set());

        marker.clear().expect("clear should succeed");
        assert!(!marker.is_set());
        // Clearing twice is fine
        marker.clear().expect("second clear should succeed");
    }

    #[test]
    fn test_file_marker_ignores_garbage() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::write(dir.path().join(MARKER_FILE), "maybe").unwrap();
        assert!(!FileMarker::new(dir.path().to_path_buf()).is_set());
    }

    #[test]
    fn test_memory_marker() {
        let marker = MemoryMarker::new(true);
        assert!(marker.is_set());
        marker.clear().unwrap();
        assert!(!marker.is_set());
    }
}
