use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Ids of integrations with a sync in flight.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<u64>>>,
}

impl InFlight {
    /// Claims `id`; `None` when another sync already holds it.
    pub fn try_claim(&self, id: u64) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(id) {
            return None;
        }
        Some(InFlightGuard {
            id,
            ids: Arc::clone(&self.ids),
        })
    }

    pub fn is_syncing(&self, id: u64) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }
}

/// Releases the claim on drop, including when the sync future is dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    id: u64,
    ids: Arc<Mutex<HashSet<u64>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}
