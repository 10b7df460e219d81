//! Cross-service liveness aggregation.
//!
//! Every service writes its own up/down verdict here once per tick; the
//! registry answers whether any service on the node is known to be down.
//! Until every registered service has reported at least once, `any_down`
//! stays `false` so a slow-starting service cannot trigger a withdrawal at
//! boot.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    up: bool,
    initialized: bool,
}

/// Thread-safe map of service name to last observed state.
#[derive(Debug, Default)]
pub struct LivenessRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl LivenessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service in the uninitialized state. Called once per service at
    /// startup, before any loop runs.
    pub fn register(&self, name: &str) {
        self.lock().entry(name.to_string()).or_default();
    }

    /// Records the service's verdict for this tick and marks it initialized.
    pub fn save(&self, name: &str, up: bool) {
        self.lock().insert(
            name.to_string(),
            Entry {
                up,
                initialized: true,
            },
        );
    }

    /// `true` iff every registered service has reported at least once and at
    /// least one of them is down.
    pub fn any_down(&self) -> bool {
        let entries = self.lock();
        entries.values().all(|entry| entry.initialized)
            && entries.values().any(|entry| !entry.up)
    }

    /// `true` once every registered service has completed a tick.
    pub fn all_initialized(&self) -> bool {
        self.lock().values().all(|entry| entry.initialized)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_reports_nothing_down() {
        let registry = LivenessRegistry::new();
        assert!(!registry.any_down());
        assert!(registry.all_initialized());
    }

    #[test]
    fn startup_grace_holds_until_all_report() {
        let registry = LivenessRegistry::new();
        registry.register("a");
        registry.register("b");
        assert!(!registry.all_initialized());

        // One service down, the other not yet initialized: still no verdict.
        registry.save("a", false);
        assert!(!registry.any_down());

        registry.save("b", true);
        assert!(registry.all_initialized());
        assert!(registry.any_down());
    }

    #[test]
    fn recovers_when_all_are_up() {
        let registry = LivenessRegistry::new();
        registry.register("a");
        registry.save("a", false);
        assert!(registry.any_down());

        registry.save("a", true);
        assert!(!registry.any_down());
    }

    #[test]
    fn register_does_not_reset_state() {
        let registry = LivenessRegistry::new();
        registry.register("a");
        registry.save("a", true);
        registry.register("a");
        assert!(registry.all_initialized());
    }
}
