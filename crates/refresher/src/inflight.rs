//! At most one in-flight fetch per `(service, key)`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use intelcache_core::Indicator;

/// Shared set of indicators currently being fetched.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<Indicator>>>,
}

/// Held while an indicator is being fetched; releases the key on drop.
#[derive(Debug)]
pub struct Claim {
    set: InFlight,
    indicator: Indicator,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Indicator>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `indicator`, or `None` if another worker already holds it.
    pub fn try_claim(&self, indicator: &Indicator) -> Option<Claim> {
        if self.lock().insert(indicator.clone()) {
            Some(Claim { set: self.clone(), indicator: indicator.clone() })
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.set.lock().remove(&self.indicator);
    }
}
