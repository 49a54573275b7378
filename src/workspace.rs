//! Per-operation scratch directory management.
//!
//! Every intermediate file an operation produces (extracted audio, rendered
//! ASS styling, partial VAD output) lives under its workspace directory so a
//! single cleanup call reclaims all operation-scoped disk state.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

/// Create the scratch directory for an operation.
///
/// The directory is namespaced by operation id, so concurrent operations
/// never collide. Creation is idempotent: a pre-existing directory is not
/// an error.
pub fn create_operation_temp_dir(operation_id: &str) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("subgen-{operation_id}"));
    fs::create_dir_all(&path)?;
    debug!("Created operation workspace: {}", path.display());
    Ok(path)
}

/// Best-effort recursive removal of an operation workspace.
///
/// Never raises: a missing path is a no-op, and deletion errors are logged
/// and swallowed so cleanup cannot block a caller's error path. Calling this
/// twice on the same path is safe.
pub fn cleanup_temp_dir(path: &Path, operation_id: &str) {
    if !path.exists() {
        return;
    }
    match fs::remove_dir_all(path) {
        Ok(()) => debug!(
            "Removed workspace for operation {}: {}",
            operation_id,
            path.display()
        ),
        Err(e) => warn!(
            "Failed to remove workspace {} for operation {}: {}",
            path.display(),
            operation_id,
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_idempotent() {
        let first = create_operation_temp_dir("ws-test-1").unwrap();
        let second = create_operation_temp_dir("ws-test-1").unwrap();
        assert_eq!(first, second);
        assert!(first.exists());
        cleanup_temp_dir(&first, "ws-test-1");
    }

    #[test]
    fn test_distinct_operations_get_distinct_dirs() {
        let a = create_operation_temp_dir("ws-test-a").unwrap();
        let b = create_operation_temp_dir("ws-test-b").unwrap();
        assert_ne!(a, b);
        cleanup_temp_dir(&a, "ws-test-a");
        cleanup_temp_dir(&b, "ws-test-b");
    }

    #[test]
    fn test_cleanup_removes_nested_files() {
        let dir = create_operation_temp_dir("ws-test-nested").unwrap();
        fs::write(dir.join("audio.wav"), b"data").unwrap();
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub").join("part.srt"), b"1\n").unwrap();

        cleanup_temp_dir(&dir, "ws-test-nested");
        assert!(!dir.exists());
    }

    #[test]
    fn test_cleanup_twice_is_noop() {
        let dir = create_operation_temp_dir("ws-test-twice").unwrap();
        cleanup_temp_dir(&dir, "ws-test-twice");
        // Second call must not panic or error on the missing path.
        cleanup_temp_dir(&dir, "ws-test-twice");
        assert!(!dir.exists());
    }
}
