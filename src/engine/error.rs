use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Minute, fmt_minute};

#[derive(Debug)]
pub enum EngineError {
    Invalid(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    RestaurantClosed {
        date: NaiveDate,
    },
    /// No table or combinable pair can physically seat the party.
    PhysicallyFull {
        minute: Minute,
    },
    /// A table chosen for the commit was taken by a competing booking.
    TableConflict {
        booking: Ulid,
    },
    /// Slot is over its pacing ceiling; an override would succeed.
    OverrideRequired {
        minute: Minute,
    },
    LockBusy {
        key: String,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Whether retrying the same operation can succeed without any input
    /// change. Only contended slot claims qualify; everything else reports
    /// a state or validation problem a retry cannot fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::LockBusy { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::RestaurantClosed { date } => {
                write!(f, "restaurant closed on {date}")
            }
            EngineError::PhysicallyFull { minute } => {
                write!(f, "no table free at {}", fmt_minute(*minute))
            }
            EngineError::TableConflict { booking } => {
                write!(f, "table taken by booking: {booking}")
            }
            EngineError::OverrideRequired { minute } => {
                write!(
                    f,
                    "slot {} is at its pacing ceiling; override required",
                    fmt_minute(*minute)
                )
            }
            EngineError::LockBusy { key } => write!(f, "slot lock busy: {key}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
