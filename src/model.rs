use std::collections::BTreeMap;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minute of the service day, the only time-of-day type.
/// Spans may run past 1440 (a dinner seating that spills past midnight
/// still belongs to its service date).
pub type Minute = i64;

pub const DAY_MINUTES: Minute = 24 * 60;

/// Render a minute-of-day as `HH:MM`. Values past midnight render as
/// `24:30`, `25:00` and so on, which staff read as "next morning".
pub fn fmt_minute(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Parse `HH:MM` or a plain minute count. Returns None for anything
/// negative or with an out-of-range minute component.
pub fn parse_minute(s: &str) -> Option<Minute> {
    if let Some((h, m)) = s.split_once(':') {
        let h: Minute = h.trim().parse().ok()?;
        let m: Minute = m.trim().parse().ok()?;
        if h < 0 || !(0..60).contains(&m) {
            return None;
        }
        Some(h * 60 + m)
    } else {
        s.trim().parse().ok().filter(|v: &Minute| *v >= 0)
    }
}

/// Half-open minute interval `[start, end)` within one service date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: Minute,
    pub end: Minute,
}

impl TimeSpan {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "TimeSpan start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_minute(&self, m: Minute) -> bool {
        self.start <= m && m < self.end
    }
}

// ── Restaurant configuration ─────────────────────────────────────

/// A physical table. Retired tables stay in the inventory (bookings may
/// still reference them) but never receive new assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: Ulid,
    pub label: String,
    pub min_covers: u32,
    pub max_covers: u32,
    /// Tie-break weight: higher wins among equally tight fits.
    pub priority: i32,
    pub combinable: bool,
    pub active: bool,
}

impl Table {
    /// Can this table seat the party on its own?
    pub fn fits(&self, party: u32) -> bool {
        self.active && self.min_covers <= party && party <= self.max_covers
    }
}

/// Party-size range → expected occupancy minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnTimeRule {
    pub id: Ulid,
    pub min_party: u32,
    pub max_party: u32,
    pub minutes: Minute,
}

impl TurnTimeRule {
    pub fn matches(&self, party: u32) -> bool {
        self.min_party <= party && party <= self.max_party
    }

    pub fn width(&self) -> u32 {
        self.max_party - self.min_party
    }
}

/// One named service window on one weekday, e.g. Friday "dinner" 18:00–22:00.
/// A weekday with no periods is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePeriod {
    pub id: Ulid,
    pub weekday: Weekday,
    pub name: String,
    pub span: TimeSpan,
}

/// Soft demand ceilings, distinct from physical table capacity.
/// A zero cap disables that check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingLimits {
    pub moderate_pct: u32,
    pub busy_pct: u32,
    pub max_covers_per_slot: u32,
    pub max_bookings_per_slot: u32,
}

impl Default for PacingLimits {
    fn default() -> Self {
        Self {
            moderate_pct: 50,
            busy_pct: 80,
            max_covers_per_slot: 0,
            max_bookings_per_slot: 0,
        }
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    NoShow,
    Cancelled,
}

impl BookingStatus {
    /// Every status except `cancelled` keeps the table occupied for the
    /// booking's interval.
    pub fn blocks_table(self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::NoShow => "no_show",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "no_show" => Some(BookingStatus::NoShow),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

/// A committed reservation. `table_ids` holds one table, or two when a
/// combinable pair was joined for a large party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub table_ids: Vec<Ulid>,
    pub date: NaiveDate,
    pub span: TimeSpan,
    pub party_size: u32,
    pub status: BookingStatus,
    pub guest_name: Option<String>,
    pub override_reason: Option<String>,
}

impl Booking {
    pub fn blocks(&self) -> bool {
        self.status.blocks_table()
    }

    pub fn occupies(&self, table_id: Ulid) -> bool {
        self.table_ids.contains(&table_id)
    }

    pub fn overridden(&self) -> bool {
        self.override_reason.is_some()
    }
}

// ── Per-restaurant state ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RestaurantState {
    pub id: Ulid,
    pub name: String,
    /// Slot grid spacing in minutes.
    pub slot_interval: Minute,
    /// Last seating this many minutes before a period closes (0 = none).
    pub last_seating_lead: Minute,
    pub pacing: PacingLimits,
    pub tables: Vec<Table>,
    pub rules: Vec<TurnTimeRule>,
    pub periods: Vec<ServicePeriod>,
    /// Bookings per service date, each day sorted by `span.start`.
    pub book: BTreeMap<NaiveDate, Vec<Booking>>,
}

impl RestaurantState {
    pub fn new(
        id: Ulid,
        name: String,
        slot_interval: Minute,
        last_seating_lead: Minute,
        pacing: PacingLimits,
    ) -> Self {
        Self {
            id,
            name,
            slot_interval,
            last_seating_lead,
            pacing,
            tables: Vec::new(),
            rules: Vec::new(),
            periods: Vec::new(),
            book: BTreeMap::new(),
        }
    }

    pub fn table(&self, id: Ulid) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn table_mut(&mut self, id: Ulid) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == id)
    }

    /// All bookings on a service date, sorted by start minute.
    pub fn day(&self, date: NaiveDate) -> &[Booking] {
        self.book.get(&date).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Insert a booking maintaining per-day sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let day = self.book.entry(booking.date).or_default();
        let pos = day
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, booking);
    }

    pub fn booking_mut(&mut self, date: NaiveDate, id: Ulid) -> Option<&mut Booking> {
        self.book
            .get_mut(&date)
            .and_then(|day| day.iter_mut().find(|b| b.id == id))
    }

    /// Bookings on `date` whose span overlaps the query window, any status.
    /// Binary search skips bookings starting at or after `query.end`.
    pub fn overlapping(&self, date: NaiveDate, query: &TimeSpan) -> impl Iterator<Item = &Booking> {
        let day = self.day(date);
        // Everything at index >= right_bound starts at or after query.end, so it can't overlap.
        let right_bound = day.partition_point(|b| b.span.start < query.end);
        let query_start = query.start;
        day[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query_start)
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RestaurantCreated {
        id: Ulid,
        name: String,
        slot_interval: Minute,
        last_seating_lead: Minute,
        pacing: PacingLimits,
    },
    RestaurantDeleted {
        id: Ulid,
    },
    TableAdded {
        id: Ulid,
        restaurant_id: Ulid,
        label: String,
        min_covers: u32,
        max_covers: u32,
        priority: i32,
        combinable: bool,
    },
    TableRetired {
        id: Ulid,
        restaurant_id: Ulid,
    },
    RuleAdded {
        id: Ulid,
        restaurant_id: Ulid,
        min_party: u32,
        max_party: u32,
        minutes: Minute,
    },
    RuleRemoved {
        id: Ulid,
        restaurant_id: Ulid,
    },
    PeriodAdded {
        id: Ulid,
        restaurant_id: Ulid,
        weekday: Weekday,
        name: String,
        span: TimeSpan,
    },
    PeriodRemoved {
        id: Ulid,
        restaurant_id: Ulid,
    },
    BookingCommitted {
        id: Ulid,
        restaurant_id: Ulid,
        table_ids: Vec<Ulid>,
        date: NaiveDate,
        span: TimeSpan,
        party_size: u32,
        guest_name: Option<String>,
        override_reason: Option<String>,
    },
    BookingStatusSet {
        id: Ulid,
        restaurant_id: Ulid,
        date: NaiveDate,
        status: BookingStatus,
    },
    BookingCancelled {
        id: Ulid,
        restaurant_id: Ulid,
        date: NaiveDate,
    },
}

// ── Derived / query result types ─────────────────────────────────

/// Demand classification for one slot, most to least constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingStatus {
    PhysicallyFull,
    PacingFull,
    Busy,
    Moderate,
    Available,
}

impl PacingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PacingStatus::PhysicallyFull => "physically_full",
            PacingStatus::PacingFull => "pacing_full",
            PacingStatus::Busy => "busy",
            PacingStatus::Moderate => "moderate",
            PacingStatus::Available => "available",
        }
    }

    /// Can a booking land here without an override?
    pub fn bookable(self) -> bool {
        !matches!(self, PacingStatus::PhysicallyFull | PacingStatus::PacingFull)
    }
}

/// One row of an availability report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub minute: Minute,
    pub tables_free: u32,
    pub status: PacingStatus,
    /// Committed covers over the pacing ceiling, percent. May exceed 100
    /// once overridden bookings push past the ceiling.
    pub utilization_pct: u32,
    pub can_override: bool,
    pub alternatives: Vec<Minute>,
    /// 1-based rank among the day's least-utilized bookable slots.
    pub best_rank: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestaurantInfo {
    pub id: Ulid,
    pub name: String,
    pub slot_interval: Minute,
    pub last_seating_lead: Minute,
    pub pacing: PacingLimits,
    pub active_tables: u32,
}

/// One candidate from the available-tables query; `best` marks the
/// assignment the resolver would pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOption {
    pub table: Table,
    pub best: bool,
}

/// Everything needed to attempt a booking commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub date: NaiveDate,
    pub start: Minute,
    pub party_size: u32,
    pub guest_name: Option<String>,
    pub override_pacing: bool,
    pub override_reason: Option<String>,
}

/// What a successful commit decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingReceipt {
    pub id: Ulid,
    pub table_ids: Vec<Ulid>,
    pub date: NaiveDate,
    pub span: TimeSpan,
    pub party_size: u32,
    pub overridden: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn booking(date: NaiveDate, start: Minute, end: Minute) -> Booking {
        Booking {
            id: Ulid::new(),
            table_ids: vec![Ulid::new()],
            date,
            span: TimeSpan::new(start, end),
            party_size: 2,
            status: BookingStatus::Confirmed,
            guest_name: None,
            override_reason: None,
        }
    }

    fn state() -> RestaurantState {
        RestaurantState::new(
            Ulid::new(),
            "Chez Test".into(),
            30,
            0,
            PacingLimits::default(),
        )
    }

    #[test]
    fn span_basics() {
        let s = TimeSpan::new(1080, 1170);
        assert_eq!(s.duration_min(), 90);
        assert!(s.contains_minute(1080));
        assert!(s.contains_minute(1169));
        assert!(!s.contains_minute(1170)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = TimeSpan::new(1080, 1170);
        let b = TimeSpan::new(1140, 1230);
        let c = TimeSpan::new(1170, 1260);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn minute_formatting() {
        assert_eq!(fmt_minute(0), "00:00");
        assert_eq!(fmt_minute(1080), "18:00");
        assert_eq!(fmt_minute(1439), "23:59");
        assert_eq!(fmt_minute(1500), "25:00"); // past-midnight spill
    }

    #[test]
    fn minute_parsing() {
        assert_eq!(parse_minute("18:00"), Some(1080));
        assert_eq!(parse_minute("9:30"), Some(570));
        assert_eq!(parse_minute("570"), Some(570));
        assert_eq!(parse_minute("18:60"), None);
        assert_eq!(parse_minute("-5"), None);
        assert_eq!(parse_minute("dinner"), None);
    }

    #[test]
    fn status_parse_roundtrip() {
        for s in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Completed,
            BookingStatus::NoShow,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(BookingStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(BookingStatus::parse("seated"), None);
    }

    #[test]
    fn only_cancelled_frees_the_table() {
        assert!(BookingStatus::Pending.blocks_table());
        assert!(BookingStatus::Confirmed.blocks_table());
        assert!(BookingStatus::Completed.blocks_table());
        assert!(BookingStatus::NoShow.blocks_table());
        assert!(!BookingStatus::Cancelled.blocks_table());
    }

    #[test]
    fn table_fits_respects_range_and_active() {
        let mut t = Table {
            id: Ulid::new(),
            label: "T1".into(),
            min_covers: 2,
            max_covers: 4,
            priority: 0,
            combinable: false,
            active: true,
        };
        assert!(!t.fits(1));
        assert!(t.fits(2));
        assert!(t.fits(4));
        assert!(!t.fits(5));
        t.active = false;
        assert!(!t.fits(3));
    }

    #[test]
    fn bookings_sorted_within_day() {
        let mut rs = state();
        let d = date("2025-06-06");
        rs.insert_booking(booking(d, 1200, 1290));
        rs.insert_booking(booking(d, 1080, 1170));
        rs.insert_booking(booking(d, 1140, 1230));
        let starts: Vec<Minute> = rs.day(d).iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![1080, 1140, 1200]);
    }

    #[test]
    fn overlapping_scoped_to_date() {
        let mut rs = state();
        let fri = date("2025-06-06");
        let sat = date("2025-06-07");
        rs.insert_booking(booking(fri, 1080, 1170));
        rs.insert_booking(booking(sat, 1080, 1170));

        let query = TimeSpan::new(1080, 1170);
        assert_eq!(rs.overlapping(fri, &query).count(), 1);
        assert_eq!(rs.overlapping(sat, &query).count(), 1);
        assert_eq!(rs.overlapping(date("2025-06-08"), &query).count(), 0);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = state();
        let d = date("2025-06-06");
        rs.insert_booking(booking(d, 1080, 1170));
        // Interval ending exactly at query.start is NOT overlapping (half-open)
        let query = TimeSpan::new(1170, 1260);
        assert_eq!(rs.overlapping(d, &query).count(), 0);
    }

    #[test]
    fn overlapping_skips_later_starts() {
        let mut rs = state();
        let d = date("2025-06-06");
        rs.insert_booking(booking(d, 600, 700));
        rs.insert_booking(booking(d, 1100, 1200));
        rs.insert_booking(booking(d, 1300, 1400));

        let query = TimeSpan::new(1150, 1250);
        let hits: Vec<_> = rs.overlapping(d, &query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, TimeSpan::new(1100, 1200));
    }

    #[test]
    fn booking_mut_finds_by_id() {
        let mut rs = state();
        let d = date("2025-06-06");
        let b = booking(d, 1080, 1170);
        let id = b.id;
        rs.insert_booking(b);

        rs.booking_mut(d, id).unwrap().status = BookingStatus::Cancelled;
        assert!(!rs.day(d)[0].blocks());
        assert!(rs.booking_mut(d, Ulid::new()).is_none());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCommitted {
            id: Ulid::new(),
            restaurant_id: Ulid::new(),
            table_ids: vec![Ulid::new(), Ulid::new()],
            date: date("2025-06-06"),
            span: TimeSpan::new(1080, 1170),
            party_size: 6,
            guest_name: Some("Okafor".into()),
            override_reason: None,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn weekday_event_roundtrip() {
        let event = Event::PeriodAdded {
            id: Ulid::new(),
            restaurant_id: Ulid::new(),
            weekday: Weekday::Fri,
            name: "dinner".into(),
            span: TimeSpan::new(1080, 1320),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
