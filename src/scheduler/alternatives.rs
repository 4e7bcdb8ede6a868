use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::store::Store;
use crate::time::add_minutes;

use super::{find_conflict, Scheduler};

impl<S: Store> Scheduler<S> {
    /// Qualified workers free at `desired_start` for the service's duration.
    ///
    /// Advisory only and never fails: lookup errors are logged and shrink the
    /// answer instead of failing the caller's request.
    pub async fn find_available_workers(
        &self,
        service_id: Ulid,
        desired_start: Ms,
        exclude_id: Option<Ulid>,
    ) -> Vec<AvailableWorker> {
        let service = match self.store.get_service(service_id).await {
            Ok(Some(service)) if service.active => service,
            Ok(_) => {
                debug!("no alternatives: service {service_id} missing or inactive");
                return Vec::new();
            }
            Err(e) => {
                warn!("no alternatives: service {service_id} lookup failed: {e}");
                return Vec::new();
            }
        };
        let candidate_end = add_minutes(desired_start, i64::from(service.duration_minutes));

        let workers = match self.store.qualified_workers(service_id).await {
            Ok(workers) => workers,
            Err(e) => {
                warn!("no alternatives: worker lookup for service {service_id} failed: {e}");
                return Vec::new();
            }
        };

        let mut available = Vec::new();
        for worker in workers {
            match self
                .fetch_worker_day_appointments(worker.id, desired_start, exclude_id)
                .await
            {
                Ok(existing) => {
                    let busy = find_conflict(
                        desired_start,
                        candidate_end,
                        &existing,
                        self.policy.fallback_duration_minutes,
                    )
                    .is_some();
                    if !busy {
                        available.push(AvailableWorker {
                            worker_id: worker.id,
                            name: worker.display_name(),
                        });
                    }
                }
                Err(e) => warn!("skipping worker {} in alternatives: {e}", worker.id),
            }
        }
        available
    }
}
