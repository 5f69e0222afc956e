use std::cmp::Reverse;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{RestaurantState, Table, TimeSpan};

/// What the resolver decided to seat a party on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Single(Ulid),
    /// Two combinable tables joined for a party neither seats alone.
    Combined(Ulid, Ulid),
}

impl Assignment {
    pub fn table_ids(&self) -> Vec<Ulid> {
        match self {
            Assignment::Single(id) => vec![*id],
            Assignment::Combined(a, b) => vec![*a, *b],
        }
    }
}

/// Outcome of resolving tables for one span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAvailability {
    /// Free singles that fit the party, tightest fit first.
    pub free: Vec<Ulid>,
    /// The assignment a commit would take, if any.
    pub best: Option<Assignment>,
}

impl TableAvailability {
    /// How many distinct seating options exist. A combined pair counts as
    /// one option.
    pub fn option_count(&self) -> u32 {
        if self.free.is_empty() {
            match self.best {
                Some(Assignment::Combined(..)) => 1,
                _ => 0,
            }
        } else {
            self.free.len() as u32
        }
    }
}

/// Is `table_id` unoccupied for `span` on `date`? Cancelled bookings never
/// block; every other status holds the table for its whole interval.
pub fn is_table_free(
    rs: &RestaurantState,
    date: NaiveDate,
    span: &TimeSpan,
    table_id: Ulid,
) -> bool {
    rs.overlapping(date, span)
        .all(|b| !(b.blocks() && b.occupies(table_id)))
}

/// Resolve seating for a party over `span`.
///
/// Singles that fit are ranked by tightest fit (`max_covers - party`
/// ascending), then priority descending, then table id, so equal inputs
/// always produce the same assignment. Combinable pairs are considered only
/// when NO single can seat the party: walk-in seatings should never burn two
/// tables where one would do.
pub fn resolve_tables(
    rs: &RestaurantState,
    date: NaiveDate,
    span: &TimeSpan,
    party: u32,
) -> TableAvailability {
    let mut singles: Vec<&Table> = rs
        .tables
        .iter()
        .filter(|t| t.fits(party) && is_table_free(rs, date, span, t.id))
        .collect();
    singles.sort_by_key(|t| (t.max_covers - party, Reverse(t.priority), t.id));

    let free: Vec<Ulid> = singles.iter().map(|t| t.id).collect();
    if let Some(first) = free.first() {
        return TableAvailability {
            best: Some(Assignment::Single(*first)),
            free,
        };
    }

    TableAvailability {
        free,
        best: best_pair(rs, date, span, party),
    }
}

/// Least-waste free combinable pair that can seat the party, or None.
/// A pair is admissible when the party fits the pair's summed min and max
/// covers. Ties on waste break on the (sorted) id pair.
fn best_pair(
    rs: &RestaurantState,
    date: NaiveDate,
    span: &TimeSpan,
    party: u32,
) -> Option<Assignment> {
    let candidates: Vec<&Table> = rs
        .tables
        .iter()
        .filter(|t| t.combinable && t.active && is_table_free(rs, date, span, t.id))
        .collect();

    let mut best: Option<(u32, Ulid, Ulid)> = None;
    for (i, a) in candidates.iter().enumerate() {
        for b in &candidates[i + 1..] {
            let sum_min = a.min_covers + b.min_covers;
            let sum_max = a.max_covers + b.max_covers;
            if sum_min <= party && party <= sum_max {
                let (lo, hi) = if a.id <= b.id { (a.id, b.id) } else { (b.id, a.id) };
                let key = (sum_max - party, lo, hi);
                if best.is_none_or(|current| key < current) {
                    best = Some(key);
                }
            }
        }
    }
    best.map(|(_, lo, hi)| Assignment::Combined(lo, hi))
}
