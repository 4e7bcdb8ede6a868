mod alternatives;
mod availability;
mod booking;
mod catalog;
mod conflict;
mod error;
mod queries;


use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use ulid::Ulid;

use crate::store::Store;

pub use booking::BookingRequest;
pub use catalog::{ClientInput, ClientPatch, NewService, NewWorker, ServicePatch};
pub use conflict::find_conflict;
pub use error::{BookingError, Entity, SchedulingConflict, ValidationError, CONFLICT_MESSAGE};
pub use queries::AppointmentFilter;

/// Duration assumed for a stored appointment whose frozen duration is zero.
pub const DEFAULT_FALLBACK_DURATION_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy)]
pub struct SchedulingPolicy {
    /// Business time zone; calendar days are computed in it.
    pub utc_offset: FixedOffset,
    pub fallback_duration_minutes: u32,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            fallback_duration_minutes: DEFAULT_FALLBACK_DURATION_MINUTES,
        }
    }
}

/// One async mutex per worker, held across the read-check-write of a booking.
#[derive(Default)]
pub struct WorkerLocks {
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl WorkerLocks {
    /// Lock every distinct worker in `worker_ids`, always in ascending id
    /// order so two requests touching the same pair cannot deadlock.
    pub async fn lock_all(&self, worker_ids: &[Ulid]) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = worker_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let mutex = self.locks.entry(id).or_default().clone();
            guards.push(mutex.lock_owned().await);
        }
        guards
    }
}

/// The booking engine. All state lives behind the [`Store`]; the scheduler
/// only adds validation, the conflict pipeline and per-worker serialization.
pub struct Scheduler<S: Store> {
    store: Arc<S>,
    locks: WorkerLocks,
    /// Writes that reference services or workers hold this shared; deleting
    /// a service or worker holds it exclusively, so a reference check and
    /// the delete see no booking commit in between.
    catalog: RwLock<()>,
    policy: SchedulingPolicy,
}

impl<S: Store> Scheduler<S> {
    pub fn new(store: Arc<S>, policy: SchedulingPolicy) -> Self {
        Self {
            store,
            locks: WorkerLocks::default(),
            catalog: RwLock::new(()),
            policy,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }
}
