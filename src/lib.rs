//! maitred — a multi-tenant restaurant booking and capacity-pacing engine
//! speaking the Postgres wire protocol.
//!
//! Each tenant (pgwire database name) owns an isolated engine: restaurant
//! configuration, table inventory, and bookings live in memory, durably
//! backed by a per-tenant write-ahead log. Booking commits are serialized
//! per (restaurant, date, time) slot by an in-process lock coordinator.

pub mod auth;
pub mod engine;
pub mod limits;
pub mod lock;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
