use chrono::NaiveDate;

use crate::model::{Minute, PacingLimits, PacingStatus, RestaurantState};

/// Demand already committed to one pacing bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotLoad {
    pub covers: u32,
    pub bookings: u32,
}

/// Sum blocking bookings whose start falls in `[slot, slot + interval)`.
/// Off-grid bookings count against the bucket they start in; a long dinner
/// never counts against more than the one bucket it began in.
pub fn slot_load(
    rs: &RestaurantState,
    date: NaiveDate,
    slot: Minute,
    interval: Minute,
) -> SlotLoad {
    let day = rs.day(date);
    let lo = day.partition_point(|b| b.span.start < slot);
    let hi = day.partition_point(|b| b.span.start < slot + interval);

    let mut load = SlotLoad::default();
    for b in &day[lo..hi] {
        if b.blocks() {
            load.covers += b.party_size;
            load.bookings += 1;
        }
    }
    load
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: PacingStatus,
    pub utilization_pct: u32,
    pub can_override: bool,
}

/// Classify one slot for a prospective party.
///
/// Physical capacity is checked first: with no table free the slot is
/// `physically_full` and no override helps. Next the hard pacing caps, which
/// an operator may override: covers at (or pushed past) the ceiling by this
/// party, or the booking-count cap reached. Below those, the soft bands.
///
/// `tables_free` counts seating options for THIS party, so one slot can be
/// physically_full for 8 guests yet available for 2. Utilization is the
/// committed covers over the ceiling and is reported even past 100 (override
/// traffic) or on full slots; a restaurant with no ceiling reports 0.
pub fn classify(
    tables_free: u32,
    load: &SlotLoad,
    party: u32,
    limits: &PacingLimits,
) -> Classification {
    let ceiling = limits.max_covers_per_slot;
    let utilization_pct = if ceiling > 0 {
        load.covers * 100 / ceiling
    } else {
        0
    };

    if tables_free == 0 {
        return Classification {
            status: PacingStatus::PhysicallyFull,
            utilization_pct,
            can_override: false,
        };
    }

    let covers_exhausted =
        ceiling > 0 && (load.covers >= ceiling || load.covers + party > ceiling);
    let bookings_exhausted =
        limits.max_bookings_per_slot > 0 && load.bookings >= limits.max_bookings_per_slot;
    if covers_exhausted || bookings_exhausted {
        return Classification {
            status: PacingStatus::PacingFull,
            utilization_pct,
            can_override: true,
        };
    }

    let status = if ceiling > 0 && utilization_pct >= limits.busy_pct {
        PacingStatus::Busy
    } else if ceiling > 0 && utilization_pct >= limits.moderate_pct {
        PacingStatus::Moderate
    } else {
        PacingStatus::Available
    };
    Classification {
        status,
        utilization_pct,
        can_override: false,
    }
}
