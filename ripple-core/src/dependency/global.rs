//! Process-wide manager.
//!
//! Intended for the outermost application wiring only; everything else
//! should receive its manager explicitly.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::manager::DependencyManager;

static GLOBAL: OnceLock<RwLock<Arc<DependencyManager>>> = OnceLock::new();

fn slot() -> &'static RwLock<Arc<DependencyManager>> {
    GLOBAL.get_or_init(|| RwLock::new(Arc::new(DependencyManager::new())))
}

/// The shared manager, created on first access.
pub fn global_manager() -> Arc<DependencyManager> {
    Arc::clone(&slot().read())
}

/// Replace the shared manager with a fresh one and return it.
///
/// Holders of the previous instance keep it; new callers see the new one.
pub fn reset_global_manager() -> Arc<DependencyManager> {
    let fresh = Arc::new(DependencyManager::new());
    *slot().write() = Arc::clone(&fresh);
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn singleton_is_shared_and_resettable() {
        let fresh = reset_global_manager();

        let seen: Vec<Arc<DependencyManager>> = (0..8)
            .map(|_| thread::spawn(global_manager))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert!(seen.iter().all(|m| Arc::ptr_eq(m, &fresh)));

        let replaced = reset_global_manager();
        assert!(!Arc::ptr_eq(&fresh, &replaced));
        assert!(Arc::ptr_eq(&replaced, &global_manager()));
    }
}
