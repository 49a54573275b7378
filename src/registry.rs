//! Process-wide registry of live external subprocesses.
//!
//! The registry is what makes an in-flight extraction or mux interruptible
//! from a caller that only knows the operation id. It is constructed once at
//! process start and shared by reference; it is not a global.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

const DEFAULT_GRACE_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared table of subprocess handles, keyed by operation id.
///
/// One active handle per key at a time. All mutation is safe under
/// concurrent operations; distinct operation ids never interfere.
#[derive(Debug)]
pub struct ProcessRegistry {
    table: Mutex<HashMap<String, Child>>,
    grace_timeout: Duration,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::with_grace_timeout(DEFAULT_GRACE_TIMEOUT)
    }

    /// Registry with a custom grace period before a kill is forced.
    pub fn with_grace_timeout(grace_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            grace_timeout,
        }
    }

    /// Register the subprocess for an operation.
    ///
    /// Re-registering while the prior handle is still live is a caller bug:
    /// the stale handle is terminated and the replacement is logged.
    pub fn register(&self, operation_id: &str, child: Child) {
        let mut table = self.table.lock().expect("registry lock poisoned");
        if let Some(mut prior) = table.insert(operation_id.to_string(), child) {
            warn!(
                "Operation {} re-registered before its prior process ended; killing stale handle",
                operation_id
            );
            let _ = prior.start_kill();
        }
        debug!("Registered subprocess for operation {}", operation_id);
    }

    /// Remove and return the handle for an operation, if present.
    pub fn take(&self, operation_id: &str) -> Option<Child> {
        self.table
            .lock()
            .expect("registry lock poisoned")
            .remove(operation_id)
    }

    /// Remove the entry for an operation. Idempotent: removing an absent key
    /// is a no-op. A still-live process is killed on removal.
    pub fn unregister(&self, operation_id: &str) {
        if let Some(mut child) = self.take(operation_id) {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.start_kill();
            }
            debug!("Unregistered subprocess for operation {}", operation_id);
        }
    }

    pub fn contains(&self, operation_id: &str) -> bool {
        self.table
            .lock()
            .expect("registry lock poisoned")
            .contains_key(operation_id)
    }

    /// Terminate the subprocess for an operation and remove its entry.
    ///
    /// Termination is requested first, then the exit is awaited up to the
    /// grace timeout; a process that does not exit in time is force-killed.
    /// Returns true if a handle was found.
    pub async fn cancel(&self, operation_id: &str) -> bool {
        let Some(mut child) = self.take(operation_id) else {
            return false;
        };

        debug!("Cancelling subprocess for operation {}", operation_id);
        let _ = child.start_kill();

        match tokio::time::timeout(self.grace_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(
                    "Subprocess for operation {} exited after cancel: {}",
                    operation_id, status
                );
            }
            Ok(Err(e)) => {
                warn!(
                    "Failed to reap subprocess for operation {}: {}",
                    operation_id, e
                );
            }
            Err(_) => {
                warn!(
                    "Subprocess for operation {} ignored termination, forcing kill",
                    operation_id
                );
                let _ = child.kill().await;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::process::Command;

    fn spawn_sleep(secs: u32) -> Child {
        Command::new("sleep")
            .arg(secs.to_string())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sleep")
    }

    #[tokio::test]
    async fn test_register_and_take() {
        let registry = ProcessRegistry::new();
        registry.register("op-1", spawn_sleep(30));
        assert!(registry.contains("op-1"));

        let mut child = registry.take("op-1").expect("handle present");
        assert!(!registry.contains("op-1"));
        let _ = child.kill().await;
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ProcessRegistry::new();
        registry.register("op-2", spawn_sleep(30));
        registry.unregister("op-2");
        // Second removal of an absent key is a no-op.
        registry.unregister("op-2");
        assert!(!registry.contains("op-2"));
    }

    #[tokio::test]
    async fn test_cancel_terminates_within_grace_timeout() {
        let registry = ProcessRegistry::with_grace_timeout(Duration::from_secs(2));
        registry.register("op-3", spawn_sleep(60));

        let started = Instant::now();
        assert!(registry.cancel("op-3").await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!registry.contains("op-3"));
    }

    #[tokio::test]
    async fn test_cancel_absent_operation_returns_false() {
        let registry = ProcessRegistry::new();
        assert!(!registry.cancel("no-such-op").await);
    }

    #[tokio::test]
    async fn test_distinct_operations_do_not_interfere() {
        let registry = ProcessRegistry::new();
        registry.register("op-a", spawn_sleep(30));
        registry.register("op-b", spawn_sleep(30));

        registry.cancel("op-a").await;
        assert!(!registry.contains("op-a"));
        assert!(registry.contains("op-b"));
        registry.unregister("op-b");
    }
}
