//! Pure scheduling helpers: rounding times up to the next slot boundary
//! and finding free gaps in a day that fit a candidate duration.

use chrono::{DateTime, Duration, Local, TimeZone, Timelike};

/// Slot granularity used when proposing free-slot start times.
const SLOT_STEP_MINUTES: u32 = 15;

/// Round `time` up to the next multiple of `step_minutes`. A time already
/// exactly on a boundary is returned unchanged; rounding past :59 rolls
/// the hour forward.
pub fn round_up_to_step(time: DateTime<Local>, step_minutes: u32) -> DateTime<Local> {
    let excess = Duration::seconds((time.minute() % step_minutes) as i64 * 60)
        + Duration::seconds(time.second() as i64)
        + Duration::nanoseconds(time.nanosecond() as i64);
    if excess.is_zero() {
        return time;
    }
    time - excess + Duration::minutes(step_minutes as i64)
}

/// Gap-start times in `now`'s day that fit `candidate`.
///
/// Scans the gaps around the busy `(start, duration)` intervals and
/// returns, in order, every 15-minute-aligned gap start that is not in
/// the past and leaves room for `candidate` before the next interval (or
/// the end of the day). O(n log n) in the number of intervals.
pub fn free_slots(
    now: DateTime<Local>,
    busy: &[(DateTime<Local>, Duration)],
    candidate: Duration,
) -> Vec<DateTime<Local>> {
    let mut busy: Vec<_> = busy.to_vec();
    busy.sort_by_key(|(start, _)| *start);

    let day_end = end_of_day(now);
    let mut slots = Vec::new();
    let mut cursor = now;
    for (start, duration) in &busy {
        push_slot(&mut slots, cursor, *start, candidate, now);
        cursor = cursor.max(*start + *duration);
    }
    push_slot(&mut slots, cursor, day_end, candidate, now);
    slots
}

fn push_slot(
    slots: &mut Vec<DateTime<Local>>,
    gap_start: DateTime<Local>,
    gap_end: DateTime<Local>,
    candidate: Duration,
    now: DateTime<Local>,
) {
    let aligned = round_up_to_step(gap_start, SLOT_STEP_MINUTES);
    if aligned >= now && aligned + candidate <= gap_end {
        slots.push(aligned);
    }
}

fn end_of_day(now: DateTime<Local>) -> DateTime<Local> {
    now.date_naive()
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .unwrap_or_else(|| now + Duration::hours(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 3, 2, hour, minute, second)
            .unwrap()
    }

    #[test]
    fn rounds_up_to_five_minute_boundary() {
        assert_eq!(round_up_to_step(at(9, 7, 0), 5), at(9, 10, 0));
        assert_eq!(round_up_to_step(at(9, 10, 1), 5), at(9, 15, 0));
    }

    #[test]
    fn exact_boundary_is_unchanged() {
        assert_eq!(round_up_to_step(at(9, 15, 0), 15), at(9, 15, 0));
        assert_eq!(round_up_to_step(at(9, 0, 0), 5), at(9, 0, 0));
    }

    #[test]
    fn rounding_rolls_the_hour_forward() {
        assert_eq!(round_up_to_step(at(9, 58, 30), 15), at(10, 0, 0));
        let next_midnight = Local.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap();
        assert_eq!(round_up_to_step(at(23, 59, 59), 5), next_midnight);
    }

    #[test]
    fn finds_gaps_between_busy_intervals() {
        let now = at(9, 0, 0);
        let busy = vec![
            (at(10, 0, 0), Duration::minutes(60)),
            (at(13, 0, 0), Duration::minutes(30)),
        ];
        let slots = free_slots(now, &busy, Duration::minutes(45));
        // 09:00 fits before 10:00; 11:00 fits before 13:00; 13:30 fits the
        // rest of the day.
        assert_eq!(slots, vec![at(9, 0, 0), at(11, 0, 0), at(13, 30, 0)]);
    }

    #[test]
    fn skips_gaps_too_small_for_the_candidate() {
        let now = at(9, 0, 0);
        let busy = vec![
            (at(9, 30, 0), Duration::minutes(30)),
            (at(10, 15, 0), Duration::minutes(60)),
        ];
        let slots = free_slots(now, &busy, Duration::minutes(30));
        // 09:00-09:30 fits; 10:00-10:15 does not.
        assert_eq!(slots.first(), Some(&at(9, 0, 0)));
        assert!(!slots.contains(&at(10, 0, 0)));
    }

    #[test]
    fn unsorted_and_overlapping_input_is_handled() {
        let now = at(9, 0, 0);
        let busy = vec![
            (at(12, 0, 0), Duration::minutes(60)),
            (at(9, 0, 0), Duration::minutes(90)),
            (at(10, 0, 0), Duration::minutes(45)),
        ];
        let slots = free_slots(now, &busy, Duration::minutes(60));
        assert_eq!(slots, vec![at(10, 45, 0), at(13, 0, 0)]);
    }

    #[test]
    fn gap_starts_are_aligned_and_future_only() {
        let now = at(9, 7, 0);
        let slots = free_slots(now, &[], Duration::minutes(30));
        // The whole day is free; the first proposal is the next aligned
        // slot after now, not now itself.
        assert_eq!(slots, vec![at(9, 15, 0)]);
    }

    #[test]
    fn candidate_longer_than_remaining_day_yields_nothing() {
        let now = at(23, 50, 0);
        let slots = free_slots(now, &[], Duration::hours(2));
        assert!(slots.is_empty());
    }
}
