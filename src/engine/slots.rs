use chrono::{Datelike, NaiveDate, Weekday};

use crate::model::{Minute, ServicePeriod};

/// All bookable slot starts for a service date, ascending and deduplicated.
///
/// Each period on the date's weekday contributes starts from its opening
/// minute, stepping by `interval`. With a zero `last_seating_lead` the final
/// slot is the last grid point strictly before close; otherwise the last
/// grid point at or before `close - lead`. A weekday with no periods yields
/// an empty grid: the restaurant is closed.
pub fn slot_grid(
    periods: &[ServicePeriod],
    date: NaiveDate,
    interval: Minute,
    last_seating_lead: Minute,
) -> Vec<Minute> {
    debug_assert!(interval > 0, "slot interval must be positive");
    let weekday = date.weekday();
    let mut slots = Vec::new();
    for period in periods.iter().filter(|p| p.weekday == weekday) {
        let last = last_seating(period, last_seating_lead);
        let mut t = period.span.start;
        while t <= last {
            slots.push(t);
            t += interval;
        }
    }
    slots.sort_unstable();
    slots.dedup();
    slots
}

/// Latest admissible seating minute for a period.
fn last_seating(period: &ServicePeriod, lead: Minute) -> Minute {
    if lead > 0 {
        period.span.end - lead
    } else {
        period.span.end - 1
    }
}

/// Whether a booking may START at `minute` on this weekday. Off-grid minutes
/// are fine (a regular phoning in for 18:40 is accepted); the minute only has
/// to fall inside a service period and respect the last seating.
pub fn within_service(
    periods: &[ServicePeriod],
    weekday: Weekday,
    minute: Minute,
    last_seating_lead: Minute,
) -> bool {
    periods
        .iter()
        .filter(|p| p.weekday == weekday)
        .any(|p| p.span.start <= minute && minute <= last_seating(p, last_seating_lead))
}

/// The grid slot whose pacing bucket contains `minute`. Buckets are aligned
/// to the opening minute of the containing period, so a 18:40 booking on a
/// 30-minute grid opening at 18:00 is counted against the 18:30 slot.
/// Minutes outside every period (stale replayed data) fall back to a
/// calendar-aligned bucket.
pub fn bucket_of(
    periods: &[ServicePeriod],
    weekday: Weekday,
    interval: Minute,
    minute: Minute,
) -> Minute {
    debug_assert!(interval > 0, "slot interval must be positive");
    for p in periods.iter().filter(|p| p.weekday == weekday) {
        if p.span.contains_minute(minute) {
            return p.span.start + ((minute - p.span.start) / interval) * interval;
        }
    }
    (minute / interval) * interval
}
