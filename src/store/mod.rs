mod calendar;
mod database;

pub use calendar::WorkerCalendar;
pub use database::Database;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug)]
pub enum StoreError {
    /// The backing store cannot be reached at all.
    Unavailable(String),
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence collaborator of the scheduler.
///
/// Implementations only store and fetch; every business rule (validation,
/// qualification, overlap) lives in [`crate::scheduler`]. Writes are durable
/// when they return `Ok`.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get_service(&self, id: Ulid) -> Result<Option<Service>, StoreError>;
    async fn list_services(&self) -> Result<Vec<Service>, StoreError>;
    async fn save_service(&self, service: Service) -> Result<(), StoreError>;
    async fn delete_service(&self, id: Ulid) -> Result<bool, StoreError>;

    async fn get_worker(&self, id: Ulid) -> Result<Option<Worker>, StoreError>;
    async fn list_workers(&self) -> Result<Vec<Worker>, StoreError>;
    /// Workers whose service set contains `service_id`.
    async fn qualified_workers(&self, service_id: Ulid) -> Result<Vec<Worker>, StoreError>;
    async fn save_worker(&self, worker: Worker) -> Result<(), StoreError>;
    async fn delete_worker(&self, id: Ulid) -> Result<bool, StoreError>;

    async fn get_client(&self, id: Ulid) -> Result<Option<Client>, StoreError>;
    async fn list_clients(&self) -> Result<Vec<Client>, StoreError>;
    async fn save_client(&self, client: Client) -> Result<(), StoreError>;

    async fn get_appointment(&self, id: Ulid) -> Result<Option<Appointment>, StoreError>;
    /// Appointments of one worker starting inside `window`, minus those in
    /// `exclude_status`, ordered by start.
    async fn list_worker_appointments(
        &self,
        worker_id: Ulid,
        window: Span,
        exclude_status: AppointmentStatus,
    ) -> Result<Vec<Appointment>, StoreError>;
    async fn list_appointments(&self) -> Result<Vec<Appointment>, StoreError>;
    /// Insert, or replace the appointment with the same id (possibly moving
    /// it to another worker).
    async fn save_appointment(&self, appointment: Appointment) -> Result<(), StoreError>;
    async fn delete_appointment(&self, id: Ulid) -> Result<Option<Appointment>, StoreError>;
    async fn count_appointments_for_service(&self, service_id: Ulid) -> Result<usize, StoreError>;
    async fn count_appointments_for_worker(&self, worker_id: Ulid) -> Result<usize, StoreError>;
}
