//! Exclusive per-pipeline leases.

use crate::core::PipelineId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<PipelineId, Arc<Mutex<()>>>;

/// Held while a pipeline is worked on; dropping it releases the lease.
///
/// The registry entry goes away with the last lease holder or waiter.
#[derive(Debug)]
pub struct Lease {
    pipeline_id: PipelineId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Lease {
    /// The leased pipeline.
    #[must_use]
    pub const fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the mutex, so the count is 1 only when the
        // map's own reference is left.
        self.locks
            .remove_if(&self.pipeline_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Hands out one async mutex per pipeline so work on the same pipeline
/// runs one at a time within a process.
#[derive(Debug, Default)]
pub struct LeaseRegistry {
    locks: Arc<LockMap>,
}

impl LeaseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, pipeline_id: PipelineId) -> Arc<Mutex<()>> {
        self.locks
            .entry(pipeline_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn lease(&self, pipeline_id: PipelineId, guard: Option<OwnedMutexGuard<()>>) -> Lease {
        Lease {
            pipeline_id,
            guard,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Waits for and takes the lease of `pipeline_id`.
    pub async fn acquire(&self, pipeline_id: PipelineId) -> Lease {
        let guard = self.lock_for(pipeline_id).lock_owned().await;
        self.lease(pipeline_id, Some(guard))
    }

    /// Takes the lease if it is free.
    pub fn try_acquire(&self, pipeline_id: PipelineId) -> Option<Lease> {
        match self.lock_for(pipeline_id).try_lock_owned() {
            Ok(guard) => Some(self.lease(pipeline_id, Some(guard))),
            Err(_) => {
                // Nobody got the lease; the empty one only cleans up the entry
                // if the holder released it in the meantime.
                drop(self.lease(pipeline_id, None));
                None
            }
        }
    }

    /// Number of pipelines currently leased or waited on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if no pipeline is leased.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
