//! Shared handle to the active [`RuleSet`].
//!
//! Readers clone the inner `Arc` once and evaluate against that snapshot, so a
//! concurrent swap is never observed half-applied.

use std::sync::{Arc, PoisonError, RwLock};

use telederive_domain::rule::RuleSet;

/// Atomically swappable reference to the active rule set.
#[derive(Default)]
pub struct RuleSetHandle {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleSetHandle {
    #[must_use]
    pub fn new(initial: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The rule set active right now.
    #[must_use]
    pub fn current(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install `next` and return the set it replaced.
    pub fn swap(&self, next: RuleSet) -> Arc<RuleSet> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(next))
    }
}
