use serde::Deserialize;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::Store;
use crate::time::now_ms;

use super::booking::normalize_text;
use super::{BookingError, Entity, Scheduler};

const MINUTES_PER_DAY: u16 = 1440;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewService {
    pub name: String,
    pub duration_minutes: u32,
    pub price: u64,
    pub active: bool,
}

/// Partial service update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub duration_minutes: Option<u32>,
    pub price: Option<u64>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorker {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub service_ids: Vec<Ulid>,
    #[serde(default)]
    pub schedule: Vec<ScheduleWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInput {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

/// Partial client update; for the optional fields `Some(None)` clears.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPatch {
    pub full_name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

fn required_name(value: &str, field: &str) -> Result<String, BookingError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BookingError::invalid(format!("{field} is required")));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(BookingError::invalid(format!("{field} too long")));
    }
    Ok(trimmed.to_owned())
}

fn validate_duration(minutes: u32) -> Result<(), BookingError> {
    if minutes == 0 || minutes > MAX_SERVICE_DURATION_MINUTES {
        return Err(BookingError::invalid(format!(
            "durationMinutes must be between 1 and {MAX_SERVICE_DURATION_MINUTES}"
        )));
    }
    Ok(())
}

fn validate_schedule(schedule: &[ScheduleWindow]) -> Result<(), BookingError> {
    if schedule.len() > MAX_SCHEDULE_WINDOWS {
        return Err(BookingError::invalid("too many schedule windows"));
    }
    for w in schedule {
        if w.start_minute >= w.end_minute || w.end_minute > MINUTES_PER_DAY {
            return Err(BookingError::invalid(format!(
                "invalid schedule window on {}: {}..{}",
                w.weekday, w.start_minute, w.end_minute
            )));
        }
    }
    Ok(())
}

fn optional_field(value: Option<&str>, field: &str, max: usize) -> Result<Option<String>, BookingError> {
    let value = normalize_text(value);
    if let Some(ref v) = value
        && v.len() > max {
            return Err(BookingError::invalid(format!("{field} too long")));
        }
    Ok(value)
}

fn validate_client(input: &ClientInput, id: Ulid) -> Result<Client, BookingError> {
    let email = optional_field(input.email.as_deref(), "email", MAX_EMAIL_LEN)?;
    if let Some(ref e) = email
        && !e.contains('@') {
            return Err(BookingError::invalid("email is not an address"));
        }
    Ok(Client {
        id,
        full_name: required_name(&input.full_name, "fullName")?,
        email,
        phone: optional_field(input.phone.as_deref(), "phone", MAX_PHONE_LEN)?,
        notes: optional_field(input.notes.as_deref(), "notes", MAX_NOTES_LEN)?,
    })
}

impl<S: Store> Scheduler<S> {
    // ── Services ─────────────────────────────────────────────

    pub async fn create_service(&self, input: NewService) -> Result<Service, BookingError> {
        let name = required_name(&input.name, "name")?;
        validate_duration(input.duration_minutes)?;
        self.ensure_unique_service_name(&name, None).await?;

        let service = Service {
            id: Ulid::new(),
            name,
            duration_minutes: input.duration_minutes,
            price: input.price,
            active: input.active,
            created_at: now_ms(),
        };
        self.store.save_service(service.clone()).await?;
        info!("created service {} ({})", service.id, service.name);
        Ok(service)
    }

    /// Existing appointments keep the duration they were booked with.
    pub async fn update_service(&self, id: Ulid, patch: ServicePatch) -> Result<Service, BookingError> {
        let mut service = self
            .store
            .get_service(id)
            .await?
            .ok_or(BookingError::not_found(Entity::Service, id))?;

        if let Some(name) = patch.name {
            let name = required_name(&name, "name")?;
            self.ensure_unique_service_name(&name, Some(id)).await?;
            service.name = name;
        }
        if let Some(minutes) = patch.duration_minutes {
            validate_duration(minutes)?;
            service.duration_minutes = minutes;
        }
        if let Some(price) = patch.price {
            service.price = price;
        }
        if let Some(active) = patch.active {
            service.active = active;
        }

        self.store.save_service(service.clone()).await?;
        info!("updated service {id}");
        Ok(service)
    }

    pub async fn delete_service(&self, id: Ulid) -> Result<(), BookingError> {
        let _catalog = self.catalog.write().await;
        if self.store.get_service(id).await?.is_none() {
            return Err(BookingError::not_found(Entity::Service, id));
        }
        let referenced = self.store.count_appointments_for_service(id).await?;
        if referenced > 0 {
            return Err(BookingError::invalid(format!(
                "service {id} is used by {referenced} appointments; deactivate it instead"
            )));
        }
        if !self.store.delete_service(id).await? {
            return Err(BookingError::not_found(Entity::Service, id));
        }
        info!("deleted service {id}");
        Ok(())
    }

    /// Newest first, optionally only active or only inactive ones.
    pub async fn list_services(&self, active: Option<bool>) -> Result<Vec<Service>, BookingError> {
        let mut services: Vec<Service> = self
            .store
            .list_services()
            .await?
            .into_iter()
            .filter(|s| active.is_none_or(|a| s.active == a))
            .collect();
        services.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(services)
    }

    async fn ensure_unique_service_name(&self, name: &str, except: Option<Ulid>) -> Result<(), BookingError> {
        let taken = self
            .store
            .list_services()
            .await?
            .iter()
            .any(|s| Some(s.id) != except && s.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(BookingError::invalid(format!("a service named {name:?} already exists")));
        }
        Ok(())
    }

    // ── Workers ──────────────────────────────────────────────

    pub async fn create_worker(&self, input: NewWorker) -> Result<Worker, BookingError> {
        let first_name = required_name(&input.first_name, "firstName")?;
        let last_name = required_name(&input.last_name, "lastName")?;
        validate_schedule(&input.schedule)?;

        let mut service_ids = input.service_ids;
        service_ids.sort();
        service_ids.dedup();
        if service_ids.len() > MAX_SERVICES_PER_WORKER {
            return Err(BookingError::invalid("too many services for one worker"));
        }
        let _catalog = self.catalog.read().await;
        for &service_id in &service_ids {
            if self.store.get_service(service_id).await?.is_none() {
                return Err(BookingError::InvalidService(service_id));
            }
        }

        let worker = Worker {
            id: Ulid::new(),
            first_name,
            last_name,
            service_ids,
            schedule: input.schedule,
        };
        self.store.save_worker(worker.clone()).await?;
        info!("created worker {} ({})", worker.id, worker.display_name());
        Ok(worker)
    }

    pub async fn delete_worker(&self, id: Ulid) -> Result<(), BookingError> {
        let _catalog = self.catalog.write().await;
        if self.store.get_worker(id).await?.is_none() {
            return Err(BookingError::not_found(Entity::Worker, id));
        }
        let referenced = self.store.count_appointments_for_worker(id).await?;
        if referenced > 0 {
            return Err(BookingError::invalid(format!(
                "worker {id} still has {referenced} appointments"
            )));
        }
        if !self.store.delete_worker(id).await? {
            return Err(BookingError::not_found(Entity::Worker, id));
        }
        info!("deleted worker {id}");
        Ok(())
    }

    /// Ordered by last name, then first name.
    pub async fn list_workers(&self) -> Result<Vec<Worker>, BookingError> {
        let mut workers = self.store.list_workers().await?;
        workers.sort_by_cached_key(|w| (w.last_name.to_lowercase(), w.first_name.to_lowercase(), w.id));
        Ok(workers)
    }

    // ── Clients ──────────────────────────────────────────────

    pub async fn create_client(&self, input: ClientInput) -> Result<Client, BookingError> {
        let client = validate_client(&input, Ulid::new())?;
        self.store.save_client(client.clone()).await?;
        info!("created client {}", client.id);
        Ok(client)
    }

    pub async fn update_client(&self, id: Ulid, input: ClientInput) -> Result<Client, BookingError> {
        if self.store.get_client(id).await?.is_none() {
            return Err(BookingError::not_found(Entity::Client, id));
        }
        let client = validate_client(&input, id)?;
        self.store.save_client(client.clone()).await?;
        Ok(client)
    }

    pub async fn patch_client(&self, id: Ulid, patch: ClientPatch) -> Result<Client, BookingError> {
        let existing = self
            .store
            .get_client(id)
            .await?
            .ok_or(BookingError::not_found(Entity::Client, id))?;
        let input = ClientInput {
            full_name: patch.full_name.unwrap_or(existing.full_name),
            email: patch.email.unwrap_or(existing.email),
            phone: patch.phone.unwrap_or(existing.phone),
            notes: patch.notes.unwrap_or(existing.notes),
        };
        self.update_client(id, input).await
    }

    pub async fn list_clients(&self) -> Result<Vec<Client>, BookingError> {
        let mut clients = self.store.list_clients().await?;
        clients.sort_by_cached_key(|c| (c.full_name.to_lowercase(), c.id));
        Ok(clients)
    }
}
