use ulid::Ulid;

use crate::model::*;

/// One worker's appointments, sorted by `starts_at`.
#[derive(Debug, Clone)]
pub struct WorkerCalendar {
    pub worker_id: Ulid,
    pub appointments: Vec<Appointment>,
}

impl WorkerCalendar {
    pub fn new(worker_id: Ulid) -> Self {
        Self {
            worker_id,
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by `starts_at`.
    pub fn insert(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.starts_at <= appointment.starts_at);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    /// Replace by id, re-sorting if the start moved.
    pub fn upsert(&mut self, appointment: Appointment) {
        self.remove(appointment.id);
        self.insert(appointment);
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Appointments whose start lies inside `window`. Binary search on both ends.
    pub fn starting_within(&self, window: &Span) -> &[Appointment] {
        let lo = self
            .appointments
            .partition_point(|a| a.starts_at < window.start);
        let hi = self
            .appointments
            .partition_point(|a| a.starts_at < window.end);
        &self.appointments[lo..hi]
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appt(worker_id: Ulid, starts_at: Ms) -> Appointment {
        Appointment {
            id: Ulid::new(),
            client_id: Ulid::new(),
            service_id: Ulid::new(),
            worker_id,
            starts_at,
            duration_minutes: 30,
            status: AppointmentStatus::Pending,
            notes: None,
        }
    }

    #[test]
    fn insert_keeps_start_order() {
        let w = Ulid::new();
        let mut cal = WorkerCalendar::new(w);
        cal.insert(appt(w, 300));
        cal.insert(appt(w, 100));
        cal.insert(appt(w, 200));
        let starts: Vec<Ms> = cal.appointments.iter().map(|a| a.starts_at).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn upsert_moves_entry() {
        let w = Ulid::new();
        let mut cal = WorkerCalendar::new(w);
        let mut first = appt(w, 100);
        cal.insert(first.clone());
        cal.insert(appt(w, 200));
        first.starts_at = 300;
        cal.upsert(first.clone());
        assert_eq!(cal.len(), 2);
        assert_eq!(cal.appointments[1].id, first.id);
        assert_eq!(cal.get(first.id).unwrap().starts_at, 300);
    }

    #[test]
    fn remove_missing_is_none() {
        let w = Ulid::new();
        let mut cal = WorkerCalendar::new(w);
        cal.insert(appt(w, 100));
        assert!(cal.remove(Ulid::new()).is_none());
        assert_eq!(cal.len(), 1);
    }

    #[test]
    fn starting_within_is_half_open() {
        let w = Ulid::new();
        let mut cal = WorkerCalendar::new(w);
        for start in [50, 100, 150, 200, 250] {
            cal.insert(appt(w, start));
        }
        let hits: Vec<Ms> = cal
            .starting_within(&Span::new(100, 200))
            .iter()
            .map(|a| a.starts_at)
            .collect();
        assert_eq!(hits, vec![100, 150]);
        assert!(cal.starting_within(&Span::new(300, 400)).is_empty());
        assert!(WorkerCalendar::new(w).is_empty());
    }
}
