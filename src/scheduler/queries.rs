use std::collections::HashMap;

use tracing::warn;
use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;
use crate::store::Store;

use super::{BookingError, Entity, Scheduler};

/// Listing filter. `from` and `to` bound `starts_at` inclusively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub from: Option<Ms>,
    pub to: Option<Ms>,
    pub worker_id: Option<Ulid>,
}

impl AppointmentFilter {
    fn matches(&self, a: &Appointment) -> bool {
        self.status.is_none_or(|s| a.status == s)
            && self.from.is_none_or(|from| a.starts_at >= from)
            && self.to.is_none_or(|to| a.starts_at <= to)
            && self.worker_id.is_none_or(|w| a.worker_id == w)
    }
}

pub(super) fn details(
    appointment: Appointment,
    client: Client,
    service: Service,
    worker: Worker,
) -> AppointmentDetails {
    AppointmentDetails {
        id: appointment.id,
        client_id: appointment.client_id,
        service_id: appointment.service_id,
        worker_id: appointment.worker_id,
        starts_at: appointment.starts_at,
        notes: appointment.notes,
        status: appointment.status,
        client,
        service,
        worker,
        duration_minutes: appointment.duration_minutes,
    }
}

impl<S: Store> Scheduler<S> {
    /// Matching appointments with client, service and worker attached,
    /// earliest first.
    pub async fn list_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<AppointmentDetails>, BookingError> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if to < from {
                return Err(BookingError::invalid("range end is before its start"));
            }
            if to.checked_sub(from).is_none_or(|width| width > MAX_QUERY_WINDOW_MS) {
                return Err(BookingError::invalid("range too wide"));
            }
        }

        let services: HashMap<Ulid, Service> =
            self.store.list_services().await?.into_iter().map(|s| (s.id, s)).collect();
        let workers: HashMap<Ulid, Worker> =
            self.store.list_workers().await?.into_iter().map(|w| (w.id, w)).collect();
        let clients: HashMap<Ulid, Client> =
            self.store.list_clients().await?.into_iter().map(|c| (c.id, c)).collect();

        let mut appointments: Vec<Appointment> = self
            .store
            .list_appointments()
            .await?
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        appointments.sort_by_key(|a| (a.starts_at, a.id));

        let mut rows = Vec::with_capacity(appointments.len());
        for a in appointments {
            let (Some(client), Some(service), Some(worker)) = (
                clients.get(&a.client_id),
                services.get(&a.service_id),
                workers.get(&a.worker_id),
            ) else {
                warn!("skipping appointment {} with a dangling reference", a.id);
                continue;
            };
            rows.push(details(a, client.clone(), service.clone(), worker.clone()));
        }
        Ok(rows)
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<AppointmentDetails, BookingError> {
        let a = self.require_appointment(id).await?;
        let client = self
            .store
            .get_client(a.client_id)
            .await?
            .ok_or(BookingError::not_found(Entity::Client, a.client_id))?;
        let service = self
            .store
            .get_service(a.service_id)
            .await?
            .ok_or(BookingError::InvalidService(a.service_id))?;
        let worker = self
            .store
            .get_worker(a.worker_id)
            .await?
            .ok_or(BookingError::not_found(Entity::Worker, a.worker_id))?;
        Ok(details(a, client, service, worker))
    }
}
