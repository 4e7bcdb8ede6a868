use chrono::Weekday;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::time::{add_minutes, serialize_iso};

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        crate::time::overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Done,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Done => "DONE",
        }
    }

    /// Case-insensitive parse of the wire/JSON spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(AppointmentStatus::Pending),
            "CONFIRMED" => Some(AppointmentStatus::Confirmed),
            "CANCELLED" | "CANCELED" => Some(AppointmentStatus::Cancelled),
            "DONE" => Some(AppointmentStatus::Done),
            _ => None,
        }
    }

    /// Whether an appointment in this status occupies the worker's calendar.
    pub fn blocks(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    /// Whole currency units.
    pub price: u64,
    pub active: bool,
    pub created_at: Ms,
}

/// A weekly opening window, in minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleWindow {
    pub weekday: Weekday,
    pub start_minute: u16,
    pub end_minute: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub service_ids: Vec<Ulid>,
    pub schedule: Vec<ScheduleWindow>,
}

impl Worker {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_qualified_for(&self, service_id: &Ulid) -> bool {
        self.service_ids.contains(service_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Ulid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub worker_id: Ulid,
    pub starts_at: Ms,
    /// Service duration frozen at booking time.
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

impl Appointment {
    pub fn ends_at(&self) -> Ms {
        add_minutes(self.starts_at, i64::from(self.duration_minutes))
    }

    pub fn slot(&self) -> BookedSlot {
        BookedSlot {
            id: self.id,
            starts_at: self.starts_at,
            duration_minutes: self.duration_minutes,
        }
    }
}

/// The slice of an appointment the conflict detector looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookedSlot {
    pub id: Ulid,
    #[serde(serialize_with = "serialize_iso")]
    pub starts_at: Ms,
    pub duration_minutes: u32,
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ServiceSaved(Service),
    ServiceDeleted { id: Ulid },
    WorkerSaved(Worker),
    WorkerDeleted { id: Ulid },
    ClientSaved(Client),
    AppointmentSaved(Appointment),
    AppointmentDeleted { id: Ulid, worker_id: Ulid },
}

// ── Query result types ───────────────────────────────────────────

/// An appointment with its related entities attached, in the JSON shape the
/// dashboard consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDetails {
    pub id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub worker_id: Ulid,
    #[serde(serialize_with = "serialize_iso")]
    pub starts_at: Ms,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub client: Client,
    pub service: Service,
    pub worker: Worker,
    #[serde(skip)]
    pub duration_minutes: u32,
}

impl AppointmentDetails {
    pub fn ends_at(&self) -> Ms {
        add_minutes(self.starts_at, i64::from(self.duration_minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableWorker {
    pub worker_id: Ulid,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(starts_at: Ms, duration_minutes: u32) -> Appointment {
        Appointment {
            id: Ulid::new(),
            client_id: Ulid::new(),
            service_id: Ulid::new(),
            worker_id: Ulid::new(),
            starts_at,
            duration_minutes,
            status: AppointmentStatus::Pending,
            notes: None,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn appointment_end_is_derived_from_frozen_duration() {
        let a = appointment(0, 45);
        assert_eq!(a.ends_at(), 45 * 60_000);
        assert_eq!(a.slot().duration_minutes, 45);
    }

    #[test]
    fn status_parse_and_display() {
        assert_eq!(AppointmentStatus::parse("confirmed"), Some(AppointmentStatus::Confirmed));
        assert_eq!(AppointmentStatus::parse(" DONE "), Some(AppointmentStatus::Done));
        assert_eq!(AppointmentStatus::parse("canceled"), Some(AppointmentStatus::Cancelled));
        assert_eq!(AppointmentStatus::parse("later"), None);
        assert_eq!(AppointmentStatus::Cancelled.to_string(), "CANCELLED");
        assert!(!AppointmentStatus::Cancelled.blocks());
        assert!(AppointmentStatus::Done.blocks());
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_string(&AppointmentStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
    }

    #[test]
    fn worker_qualification() {
        let svc = Ulid::new();
        let w = Worker {
            id: Ulid::new(),
            first_name: "Ana".into(),
            last_name: "Ruiz".into(),
            service_ids: vec![svc],
            schedule: vec![],
        };
        assert!(w.is_qualified_for(&svc));
        assert!(!w.is_qualified_for(&Ulid::new()));
        assert_eq!(w.display_name(), "Ana Ruiz");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AppointmentSaved(appointment(1_000, 30));
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
