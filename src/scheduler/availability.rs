use ulid::Ulid;

use crate::model::*;
use crate::store::Store;
use crate::time::day_range;

use super::{BookingError, Scheduler};

impl<S: Store> Scheduler<S> {
    /// Non-cancelled appointments of `worker_id` starting on the local
    /// calendar day that contains `reference`, minus `exclude_id`.
    pub async fn fetch_worker_day_appointments(
        &self,
        worker_id: Ulid,
        reference: Ms,
        exclude_id: Option<Ulid>,
    ) -> Result<Vec<BookedSlot>, BookingError> {
        let window = day_range(reference, self.policy.utc_offset).as_span();
        let appointments = self
            .store
            .list_worker_appointments(worker_id, window, AppointmentStatus::Cancelled)
            .await?;
        Ok(appointments
            .iter()
            .filter(|a| Some(a.id) != exclude_id)
            .map(Appointment::slot)
            .collect())
    }
}
