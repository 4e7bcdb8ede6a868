use std::time::Instant;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_TOTAL, BOOKING_CONFLICTS_TOTAL, BOOKING_DURATION_SECONDS};
use crate::store::Store;
use crate::time::day_range;

use super::queries::details;
use super::{find_conflict, BookingError, Entity, Scheduler, SchedulingConflict, ValidationError};

/// Fields of a create or update call as the caller supplied them. The four
/// ids and `starts_at` are required; absence is reported, not defaulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingRequest {
    pub client_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub worker_id: Option<Ulid>,
    pub starts_at: Option<Ms>,
    pub notes: Option<String>,
    pub status: Option<AppointmentStatus>,
}

struct Validated {
    client_id: Ulid,
    service_id: Ulid,
    worker_id: Ulid,
    starts_at: Ms,
    notes: Option<String>,
}

fn validate(req: &BookingRequest) -> Result<Validated, BookingError> {
    let (Some(client_id), Some(service_id), Some(worker_id), Some(starts_at)) =
        (req.client_id, req.service_id, req.worker_id, req.starts_at)
    else {
        let missing = [
            ("clientId", req.client_id.is_none()),
            ("serviceId", req.service_id.is_none()),
            ("workerId", req.worker_id.is_none()),
            ("startsAt", req.starts_at.is_none()),
        ]
        .into_iter()
        .filter_map(|(field, absent)| absent.then_some(field))
        .collect();
        return Err(ValidationError::missing(missing).into());
    };

    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&starts_at) {
        return Err(BookingError::invalid("startsAt out of range"));
    }
    let notes = normalize_text(req.notes.as_deref());
    if let Some(ref n) = notes
        && n.len() > MAX_NOTES_LEN {
            return Err(BookingError::invalid("notes too long"));
        }

    Ok(Validated {
        client_id,
        service_id,
        worker_id,
        starts_at,
        notes,
    })
}

/// Trim, and treat blank as absent.
pub(super) fn normalize_text(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

fn ensure_qualified(worker: &Worker, service: &Service) -> Result<(), BookingError> {
    if worker.is_qualified_for(&service.id) {
        Ok(())
    } else {
        Err(BookingError::invalid(format!(
            "worker {} does not perform service {}",
            worker.id, service.id
        )))
    }
}

impl<S: Store> Scheduler<S> {
    pub async fn create_appointment(
        &self,
        req: BookingRequest,
    ) -> Result<AppointmentDetails, BookingError> {
        let started = Instant::now();
        let result = self.create_inner(req).await;
        record_outcome("create", &result, started);
        result
    }

    /// Replace every field of appointment `id`, re-running the conflict
    /// pipeline with the appointment itself excluded.
    pub async fn update_appointment(
        &self,
        id: Ulid,
        req: BookingRequest,
    ) -> Result<AppointmentDetails, BookingError> {
        let started = Instant::now();
        let result = self.update_inner(id, req).await;
        record_outcome("update", &result, started);
        result
    }

    /// Update where omitted fields keep their stored values.
    pub async fn patch_appointment(
        &self,
        id: Ulid,
        patch: BookingRequest,
    ) -> Result<AppointmentDetails, BookingError> {
        let existing = self.require_appointment(id).await?;
        let req = BookingRequest {
            client_id: patch.client_id.or(Some(existing.client_id)),
            service_id: patch.service_id.or(Some(existing.service_id)),
            worker_id: patch.worker_id.or(Some(existing.worker_id)),
            starts_at: patch.starts_at.or(Some(existing.starts_at)),
            notes: patch.notes.or(existing.notes),
            status: patch.status,
        };
        self.update_appointment(id, req).await
    }

    /// Remove appointment `id` for good. Serialized with bookings on its
    /// worker, so an in-flight update cannot write it back.
    pub async fn delete_appointment(&self, id: Ulid) -> Result<Appointment, BookingError> {
        let started = Instant::now();
        let result = self.delete_inner(id).await;
        record_outcome("delete", &result, started);
        if let Ok(ref a) = result {
            info!("deleted appointment {id} of worker {}", a.worker_id);
        }
        result
    }

    async fn delete_inner(&self, id: Ulid) -> Result<Appointment, BookingError> {
        let existing = self.require_appointment(id).await?;
        let _guards = self.lock_appointment(id, existing.worker_id, None).await?;
        self.store
            .delete_appointment(id)
            .await?
            .ok_or(BookingError::not_found(Entity::Appointment, id))
    }

    async fn create_inner(&self, req: BookingRequest) -> Result<AppointmentDetails, BookingError> {
        let input = validate(&req)?;
        let _catalog = self.catalog.read().await;
        let service = self.active_service(input.service_id).await?;
        let client = self.require_client(input.client_id).await?;
        let worker = self.require_worker(input.worker_id).await?;
        ensure_qualified(&worker, &service)?;

        let appointment = Appointment {
            id: Ulid::new(),
            client_id: client.id,
            service_id: service.id,
            worker_id: worker.id,
            starts_at: input.starts_at,
            duration_minutes: service.duration_minutes,
            status: req.status.unwrap_or(AppointmentStatus::Pending),
            notes: input.notes,
        };
        self.ensure_single_day(&appointment)?;

        let _guards = self.locks.lock_all(&[worker.id]).await;
        self.ensure_slot_free(&appointment, None).await?;
        self.store.save_appointment(appointment.clone()).await?;
        info!(
            "booked appointment {} with worker {} at {}",
            appointment.id, worker.id, appointment.starts_at
        );

        Ok(details(appointment, client, service, worker))
    }

    async fn update_inner(
        &self,
        id: Ulid,
        req: BookingRequest,
    ) -> Result<AppointmentDetails, BookingError> {
        let input = validate(&req)?;
        let _catalog = self.catalog.read().await;
        let existing = self.require_appointment(id).await?;

        let service_changed = input.service_id != existing.service_id;
        let service = if service_changed {
            self.active_service(input.service_id).await?
        } else {
            // Keeping a since-deactivated service is allowed.
            self.store
                .get_service(input.service_id)
                .await?
                .ok_or(BookingError::InvalidService(input.service_id))?
        };
        let client = self.require_client(input.client_id).await?;
        let worker = self.require_worker(input.worker_id).await?;
        if service_changed || input.worker_id != existing.worker_id {
            ensure_qualified(&worker, &service)?;
        }

        let updated = Appointment {
            id,
            client_id: client.id,
            service_id: service.id,
            worker_id: worker.id,
            starts_at: input.starts_at,
            duration_minutes: if service_changed {
                service.duration_minutes
            } else {
                existing.duration_minutes
            },
            status: req.status.unwrap_or(existing.status),
            notes: input.notes,
        };
        self.ensure_single_day(&updated)?;

        let _guards = self
            .lock_appointment(id, existing.worker_id, Some(updated.worker_id))
            .await?;

        self.ensure_slot_free(&updated, Some(id)).await?;
        self.store.save_appointment(updated.clone()).await?;
        info!("updated appointment {id} (worker {})", updated.worker_id);

        Ok(details(updated, client, service, worker))
    }

    /// Lock the worker that currently holds appointment `id`, plus `target`.
    /// If the appointment moved to another worker before the locks were
    /// taken, retry with that one. Fails once the appointment is gone.
    async fn lock_appointment(
        &self,
        id: Ulid,
        mut holder: Ulid,
        target: Option<Ulid>,
    ) -> Result<Vec<OwnedMutexGuard<()>>, BookingError> {
        loop {
            let guards = match target {
                Some(target) => self.locks.lock_all(&[holder, target]).await,
                None => self.locks.lock_all(&[holder]).await,
            };
            match self.store.get_appointment(id).await? {
                Some(current) if current.worker_id == holder => return Ok(guards),
                Some(current) => {
                    debug!("appointment {id} moved to {} while waiting, retrying", current.worker_id);
                    holder = current.worker_id;
                }
                None => return Err(BookingError::not_found(Entity::Appointment, id)),
            }
        }
    }

    /// Run the conflict pipeline for `appointment` on its worker's day. The
    /// caller must hold that worker's lock.
    async fn ensure_slot_free(
        &self,
        appointment: &Appointment,
        exclude_id: Option<Ulid>,
    ) -> Result<(), BookingError> {
        if !appointment.status.blocks() {
            return Ok(());
        }
        let existing = self
            .fetch_worker_day_appointments(appointment.worker_id, appointment.starts_at, exclude_id)
            .await?;
        let Some(conflict) = find_conflict(
            appointment.starts_at,
            appointment.ends_at(),
            &existing,
            self.policy.fallback_duration_minutes,
        )
        .copied() else {
            return Ok(());
        };

        let available_workers = self
            .find_available_workers(appointment.service_id, appointment.starts_at, exclude_id)
            .await;
        metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
        info!(
            "worker {} busy at {} (appointment {}), {} alternatives",
            appointment.worker_id,
            appointment.starts_at,
            conflict.id,
            available_workers.len()
        );
        Err(BookingError::Conflict(Box::new(SchedulingConflict {
            conflict,
            available_workers,
        })))
    }

    fn ensure_single_day(&self, appointment: &Appointment) -> Result<(), BookingError> {
        let day = day_range(appointment.starts_at, self.policy.utc_offset);
        if appointment.ends_at() > day.day_end + 1 {
            return Err(BookingError::invalid("appointment must end on the day it starts"));
        }
        Ok(())
    }

    async fn active_service(&self, id: Ulid) -> Result<Service, BookingError> {
        match self.store.get_service(id).await? {
            Some(service) if service.active => Ok(service),
            _ => Err(BookingError::InvalidService(id)),
        }
    }

    async fn require_client(&self, id: Ulid) -> Result<Client, BookingError> {
        self.store
            .get_client(id)
            .await?
            .ok_or(BookingError::not_found(Entity::Client, id))
    }

    async fn require_worker(&self, id: Ulid) -> Result<Worker, BookingError> {
        self.store
            .get_worker(id)
            .await?
            .ok_or(BookingError::not_found(Entity::Worker, id))
    }

    pub(super) async fn require_appointment(&self, id: Ulid) -> Result<Appointment, BookingError> {
        self.store
            .get_appointment(id)
            .await?
            .ok_or(BookingError::not_found(Entity::Appointment, id))
    }
}

fn record_outcome<T>(op: &'static str, result: &Result<T, BookingError>, started: Instant) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(BOOKINGS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(BOOKING_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
    if let Err(e) = result {
        debug!("{op} rejected: {e}");
    }
}
