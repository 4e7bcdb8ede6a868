use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PHONE_LEN: usize = 64;

pub const MAX_SERVICES_PER_WORKER: usize = 256;
pub const MAX_SCHEDULE_WINDOWS: usize = 64;

/// Longest bookable service. Keeps appointments inside one calendar day.
pub const MAX_SERVICE_DURATION_MINUTES: u32 = 720;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest range accepted by appointment listings (one leap year).
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
