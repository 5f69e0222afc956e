//! Hard limits enforced at the engine boundary. Every rejection surfaces
//! as `EngineError::LimitExceeded` naming the limit that tripped.

/// Restaurants a single tenant may hold.
pub const MAX_RESTAURANTS_PER_TENANT: usize = 4096;

/// Tables per restaurant, retired ones included.
pub const MAX_TABLES_PER_RESTAURANT: usize = 512;

/// Turn-time rules per restaurant.
pub const MAX_RULES_PER_RESTAURANT: usize = 64;

/// Service periods per restaurant (whole week).
pub const MAX_PERIODS_PER_RESTAURANT: usize = 64;

/// Non-cancelled bookings per restaurant per service date.
pub const MAX_BOOKINGS_PER_DAY: usize = 4096;

/// Restaurant and guest name length in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// Table label / period name length in bytes.
pub const MAX_LABEL_LEN: usize = 64;

/// Override reason length in bytes.
pub const MAX_REASON_LEN: usize = 512;

/// Shortest override reason accepted, after trimming whitespace.
pub const MIN_OVERRIDE_REASON_LEN: usize = 3;

/// Largest party size a booking or turn-time rule may reference.
pub const MAX_PARTY_SIZE: u32 = 100;

/// Slot grid spacing bounds, minutes.
pub const MIN_SLOT_INTERVAL: i64 = 5;
pub const MAX_SLOT_INTERVAL: i64 = 240;

/// Longest turn time a rule may configure, minutes.
pub const MAX_TURN_TIME_MIN: i64 = 24 * 60;

/// Service periods may spill past midnight but belong to their service
/// date; `close` is capped at two days' worth of minutes.
pub const MAX_PERIOD_END: i64 = 2 * 24 * 60;

/// Alternative-time suggestions per slot.
pub const MAX_ALTERNATIVES: usize = 3;

/// Best-availability suggestions per report.
pub const BEST_AVAILABILITY_COUNT: usize = 3;

/// Tenant (database name) limits.
pub const MAX_TENANT_NAME_LEN: usize = 64;
pub const MAX_TENANTS: usize = 1024;
