use serde::Serialize;
use ulid::Ulid;

use crate::model::{AvailableWorker, BookedSlot};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Required fields that were absent, in request order.
    pub missing: Vec<&'static str>,
    pub reason: Option<String>,
}

impl ValidationError {
    pub fn missing(fields: Vec<&'static str>) -> Self {
        Self {
            missing: fields,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            missing: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.missing.is_empty() {
            write!(f, "missing required fields: {}", self.missing.join(", "))?;
            if self.reason.is_some() {
                f.write_str("; ")?;
            }
        }
        match &self.reason {
            Some(reason) => f.write_str(reason),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Appointment,
    Client,
    Service,
    Worker,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Appointment => "appointment",
            Entity::Client => "client",
            Entity::Service => "service",
            Entity::Worker => "worker",
        }
    }
}

/// The slot a booking collided with, plus qualified workers free at the
/// requested start. Serializes to the `{error, conflict, availableWorkers}`
/// body callers re-prompt from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingConflict {
    pub conflict: BookedSlot,
    pub available_workers: Vec<AvailableWorker>,
}

pub const CONFLICT_MESSAGE: &str = "worker already has an appointment at that time";

#[derive(Serialize)]
struct ConflictBody<'a> {
    error: &'static str,
    #[serde(flatten)]
    detail: &'a SchedulingConflict,
}

impl SchedulingConflict {
    pub fn to_json(&self) -> String {
        let body = ConflictBody {
            error: CONFLICT_MESSAGE,
            detail: self,
        };
        serde_json::to_string(&body).unwrap_or_else(|_| format!("{{\"error\":\"{CONFLICT_MESSAGE}\"}}"))
    }
}

#[derive(Debug)]
pub enum BookingError {
    Validation(ValidationError),
    /// Service missing or deactivated.
    InvalidService(Ulid),
    NotFound { entity: Entity, id: Ulid },
    Conflict(Box<SchedulingConflict>),
    Dependency(StoreError),
}

impl BookingError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        BookingError::Validation(ValidationError::invalid(reason))
    }

    pub fn not_found(entity: Entity, id: Ulid) -> Self {
        BookingError::NotFound { entity, id }
    }

    /// Status an HTTP adapter should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            BookingError::Validation(_) | BookingError::InvalidService(_) => 400,
            BookingError::NotFound { .. } => 404,
            BookingError::Conflict(_) => 409,
            BookingError::Dependency(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "validation",
            BookingError::InvalidService(_) => "invalid_service",
            BookingError::NotFound { .. } => "not_found",
            BookingError::Conflict(_) => "conflict",
            BookingError::Dependency(_) => "dependency",
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        BookingError::Dependency(e)
    }
}

impl From<ValidationError> for BookingError {
    fn from(e: ValidationError) -> Self {
        BookingError::Validation(e)
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Validation(e) => write!(f, "invalid request: {e}"),
            BookingError::InvalidService(id) => write!(f, "service {id} does not exist or is inactive"),
            BookingError::NotFound { entity, id } => write!(f, "{} not found: {id}", entity.as_str()),
            BookingError::Conflict(c) => f.write_str(&c.to_json()),
            BookingError::Dependency(e) => write!(f, "lookup failed: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Dependency(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_missing_fields() {
        let e = ValidationError::missing(vec!["clientId", "startsAt"]);
        assert_eq!(e.to_string(), "missing required fields: clientId, startsAt");
        assert_eq!(BookingError::from(e).http_status(), 400);
    }

    #[test]
    fn conflict_body_shape() {
        let conflict = SchedulingConflict {
            conflict: BookedSlot {
                id: Ulid::nil(),
                starts_at: 0,
                duration_minutes: 60,
            },
            available_workers: vec![AvailableWorker {
                worker_id: Ulid::nil(),
                name: "Ana Ruiz".into(),
            }],
        };
        let json: serde_json::Value = serde_json::from_str(&conflict.to_json()).unwrap();
        assert_eq!(json["error"], CONFLICT_MESSAGE);
        assert_eq!(json["conflict"]["startsAt"], "1970-01-01T00:00:00.000Z");
        assert_eq!(json["conflict"]["durationMinutes"], 60);
        assert_eq!(json["availableWorkers"][0]["name"], "Ana Ruiz");

        let err = BookingError::Conflict(Box::new(conflict));
        assert_eq!(err.http_status(), 409);
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn store_failures_are_dependency_errors() {
        let err: BookingError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(err.http_status(), 500);
        assert!(err.to_string().starts_with("lookup failed"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
