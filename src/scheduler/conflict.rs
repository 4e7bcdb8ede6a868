use tracing::warn;

use crate::model::{BookedSlot, Ms};
use crate::time::{add_minutes, overlaps};

/// First slot in `existing` overlapping `[candidate_start, candidate_end)`.
///
/// A slot with a zero duration is stored data gone bad; it is measured with
/// `fallback_minutes` instead and logged.
pub fn find_conflict(
    candidate_start: Ms,
    candidate_end: Ms,
    existing: &[BookedSlot],
    fallback_minutes: u32,
) -> Option<&BookedSlot> {
    existing.iter().find(|slot| {
        let end = add_minutes(slot.starts_at, effective_minutes(slot, fallback_minutes));
        overlaps(candidate_start, candidate_end, slot.starts_at, end)
    })
}

fn effective_minutes(slot: &BookedSlot, fallback_minutes: u32) -> i64 {
    if slot.duration_minutes == 0 {
        warn!(
            appointment = %slot.id,
            fallback_minutes,
            "appointment has no stored duration, using fallback"
        );
        i64::from(fallback_minutes)
    } else {
        i64::from(slot.duration_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const M: Ms = 60_000;

    fn slot(start_min: Ms, duration_minutes: u32) -> BookedSlot {
        BookedSlot {
            id: Ulid::new(),
            starts_at: start_min * M,
            duration_minutes,
        }
    }

    #[test]
    fn touching_slots_do_not_conflict() {
        let existing = [slot(600, 60)];
        assert!(find_conflict(660 * M, 720 * M, &existing, 60).is_none());
        assert!(find_conflict(540 * M, 600 * M, &existing, 60).is_none());
    }

    #[test]
    fn partial_and_enclosing_overlaps_conflict() {
        let existing = [slot(600, 60)];
        assert!(find_conflict(630 * M, 690 * M, &existing, 60).is_some());
        assert!(find_conflict(570 * M, 610 * M, &existing, 60).is_some());
        assert!(find_conflict(540 * M, 720 * M, &existing, 60).is_some());
        assert!(find_conflict(610 * M, 620 * M, &existing, 60).is_some());
    }

    #[test]
    fn returns_first_match() {
        let first = slot(600, 60);
        let second = slot(660, 60);
        let existing = [first, second];
        let hit = find_conflict(630 * M, 690 * M, &existing, 60).unwrap();
        assert_eq!(hit.id, first.id);
    }

    #[test]
    fn zero_duration_uses_fallback() {
        let existing = [slot(600, 0)];
        // With the 60 minute fallback, 10:30 collides.
        assert!(find_conflict(630 * M, 640 * M, &existing, 60).is_some());
        assert!(find_conflict(660 * M, 700 * M, &existing, 60).is_none());
        // A shorter fallback frees 10:30.
        assert!(find_conflict(630 * M, 640 * M, &existing, 15).is_none());
    }

    #[test]
    fn empty_calendar_never_conflicts() {
        assert!(find_conflict(0, 60 * M, &[], 60).is_none());
    }
}
