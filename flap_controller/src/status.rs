//! Status cache: the only state shared between the control loop and observers.
//!
//! The control loop owns a [`StatusPublisher`] holding its last published
//! snapshot. Each tick it compares the candidate against that private copy
//! and takes the lock only when something changed. Observers hold the
//! [`StatusCache`] and copy the whole snapshot out under the same lock, so
//! they never see entries from two different ticks.

use flap_common::state::StatusSnapshot;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct Published {
    snapshot: StatusSnapshot,
    generation: u64,
}

/// Shared, lock-protected snapshot.
#[derive(Debug)]
pub struct StatusCache {
    inner: Mutex<Published>,
}

impl StatusCache {
    /// Cache describing `num_modules` modules in their boot state.
    pub fn new(num_modules: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Published {
                snapshot: StatusSnapshot::new(num_modules),
                generation: 0,
            }),
        })
    }

    /// Copy of the latest snapshot.
    pub fn read(&self) -> StatusSnapshot {
        self.inner.lock().snapshot
    }

    /// Copy of the latest snapshot and the number of publishes so far.
    pub fn read_versioned(&self) -> (StatusSnapshot, u64) {
        let p = *self.inner.lock();
        (p.snapshot, p.generation)
    }

    fn store(&self, snapshot: &StatusSnapshot) {
        let mut p = self.inner.lock();
        p.snapshot = *snapshot;
        p.generation += 1;
    }
}

/// Writer side, owned by the control loop.
#[derive(Debug)]
pub struct StatusPublisher {
    last: StatusSnapshot,
    cache: Arc<StatusCache>,
}

impl StatusPublisher {
    /// Attach to `cache`, starting from its current content.
    pub fn new(cache: Arc<StatusCache>) -> Self {
        Self {
            last: cache.read(),
            cache,
        }
    }

    /// Publish `candidate` if it differs from the last published snapshot.
    ///
    /// Returns whether the shared copy was written.
    pub fn publish(&mut self, candidate: &StatusSnapshot) -> bool {
        if *candidate == self.last {
            return false;
        }
        self.last = *candidate;
        self.cache.store(candidate);
        true
    }

    /// Shared cache handle for observers.
    pub fn cache(&self) -> Arc<StatusCache> {
        self.cache.clone()
    }
}
