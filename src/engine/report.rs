use chrono::NaiveDate;

use crate::limits::{BEST_AVAILABILITY_COUNT, MAX_ALTERNATIVES};
use crate::model::{Minute, PacingStatus, RestaurantState, SlotReport, TimeSpan};

use super::error::EngineError;
use super::{assign, pacing, slots, turn_time};

/// Build the availability report for one date and party size.
///
/// Pure read over restaurant state. Each slot is classified independently
/// (a bad slot never poisons its neighbors), then two day-wide passes fill
/// in alternatives and best-availability ranks.
pub fn day_report(
    rs: &RestaurantState,
    date: NaiveDate,
    party: u32,
    preferred: Option<Minute>,
) -> Result<Vec<SlotReport>, EngineError> {
    let grid = slots::slot_grid(&rs.periods, date, rs.slot_interval, rs.last_seating_lead);
    if grid.is_empty() {
        return Err(EngineError::RestaurantClosed { date });
    }

    let duration = turn_time::resolve_duration(&rs.rules, party);
    let mut reports: Vec<SlotReport> = Vec::with_capacity(grid.len());
    for &slot in &grid {
        let span = TimeSpan::new(slot, slot + duration);
        let resolved = assign::resolve_tables(rs, date, &span, party);
        let load = pacing::slot_load(rs, date, slot, rs.slot_interval);
        let class = pacing::classify(resolved.option_count(), &load, party, &rs.pacing);
        reports.push(SlotReport {
            minute: slot,
            tables_free: resolved.option_count(),
            status: class.status,
            utilization_pct: class.utilization_pct,
            can_override: class.can_override,
            alternatives: Vec::new(),
            best_rank: None,
        });
    }

    fill_alternatives(&mut reports, preferred);
    fill_best_ranks(&mut reports);
    Ok(reports)
}

/// A slot worth suggesting as a fallback.
fn suggestible(status: PacingStatus) -> bool {
    matches!(status, PacingStatus::Available | PacingStatus::Moderate)
}

/// For every slot the party cannot walk straight into, list the nearest
/// suggestible slots. Nearness is measured from the guest's preferred time
/// when one was given, else from the constrained slot itself; equidistant
/// candidates tip toward the earlier one. Output stays in time order.
fn fill_alternatives(reports: &mut [SlotReport], preferred: Option<Minute>) {
    let open: Vec<Minute> = reports
        .iter()
        .filter(|r| suggestible(r.status))
        .map(|r| r.minute)
        .collect();
    if open.is_empty() {
        return;
    }

    for report in reports.iter_mut().filter(|r| !suggestible(r.status)) {
        let origin = preferred.unwrap_or(report.minute);
        let mut candidates = open.clone();
        candidates.sort_by_key(|&m| ((m - origin).abs(), m));
        candidates.truncate(MAX_ALTERNATIVES);
        candidates.sort_unstable();
        report.alternatives = candidates;
    }
}

/// Rank the least-utilized bookable slots 1..=BEST_AVAILABILITY_COUNT.
/// Utilization ties break toward the earlier slot.
fn fill_best_ranks(reports: &mut [SlotReport]) {
    let mut bookable: Vec<(u32, Minute, usize)> = reports
        .iter()
        .enumerate()
        .filter(|(_, r)| r.status.bookable())
        .map(|(i, r)| (r.utilization_pct, r.minute, i))
        .collect();
    bookable.sort_unstable();

    for (rank, &(_, _, idx)) in bookable.iter().take(BEST_AVAILABILITY_COUNT).enumerate() {
        reports[idx].best_rank = Some(rank as u8 + 1);
    }
}
