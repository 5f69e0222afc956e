mod assign;
mod error;
mod mutations;
mod pacing;
mod queries;
mod report;
mod slots;
mod turn_time;

pub use assign::{Assignment, TableAvailability, is_table_free, resolve_tables};
pub use error::EngineError;
pub use pacing::{Classification, SlotLoad, classify, slot_load};
pub use report::day_report;
pub use slots::{bucket_of, slot_grid, within_service};
pub use turn_time::{DEFAULT_TURN_TIME_MIN, resolve_duration};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::lock::{LockConfig, SlotLockCoordinator};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRestaurantState = Arc<RwLock<RestaurantState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the open batch before the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush what we have
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even when an append failed so partially buffered bytes don't
    // leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's booking engine: every restaurant the tenant operates, backed
/// by a single WAL and a shared slot lock coordinator.
pub struct Engine {
    pub state: DashMap<Ulid, SharedRestaurantState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub locks: SlotLockCoordinator,
    /// booking id → (restaurant id, service date)
    pub(super) booking_index: DashMap<Ulid, (Ulid, NaiveDate)>,
    /// table/rule/period id → restaurant id
    pub(super) entity_index: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a RestaurantState (no locking, caller holds
/// the lock).
fn apply_event(
    rs: &mut RestaurantState,
    event: &Event,
    booking_index: &DashMap<Ulid, (Ulid, NaiveDate)>,
    entity_index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::TableAdded {
            id,
            restaurant_id,
            label,
            min_covers,
            max_covers,
            priority,
            combinable,
        } => {
            rs.tables.push(Table {
                id: *id,
                label: label.clone(),
                min_covers: *min_covers,
                max_covers: *max_covers,
                priority: *priority,
                combinable: *combinable,
                active: true,
            });
            entity_index.insert(*id, *restaurant_id);
        }
        Event::TableRetired { id, .. } => {
            // Retired tables stay in the inventory: old bookings reference them.
            if let Some(table) = rs.table_mut(*id) {
                table.active = false;
            }
        }
        Event::RuleAdded {
            id,
            restaurant_id,
            min_party,
            max_party,
            minutes,
        } => {
            rs.rules.push(TurnTimeRule {
                id: *id,
                min_party: *min_party,
                max_party: *max_party,
                minutes: *minutes,
            });
            entity_index.insert(*id, *restaurant_id);
        }
        Event::RuleRemoved { id, .. } => {
            rs.rules.retain(|r| r.id != *id);
            entity_index.remove(id);
        }
        Event::PeriodAdded {
            id,
            restaurant_id,
            weekday,
            name,
            span,
        } => {
            rs.periods.push(ServicePeriod {
                id: *id,
                weekday: *weekday,
                name: name.clone(),
                span: *span,
            });
            entity_index.insert(*id, *restaurant_id);
        }
        Event::PeriodRemoved { id, .. } => {
            rs.periods.retain(|p| p.id != *id);
            entity_index.remove(id);
        }
        Event::BookingCommitted {
            id,
            restaurant_id,
            table_ids,
            date,
            span,
            party_size,
            guest_name,
            override_reason,
        } => {
            rs.insert_booking(Booking {
                id: *id,
                table_ids: table_ids.clone(),
                date: *date,
                span: *span,
                party_size: *party_size,
                status: BookingStatus::Confirmed,
                guest_name: guest_name.clone(),
                override_reason: override_reason.clone(),
            });
            booking_index.insert(*id, (*restaurant_id, *date));
        }
        Event::BookingStatusSet { id, date, status, .. } => {
            if let Some(b) = rs.booking_mut(*date, *id) {
                b.status = *status;
            }
        }
        Event::BookingCancelled { id, date, .. } => {
            if let Some(b) = rs.booking_mut(*date, *id) {
                b.status = BookingStatus::Cancelled;
            }
        }
        // Created/Deleted are handled at the DashMap level, not here
        Event::RestaurantCreated { .. } | Event::RestaurantDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        lock_config: LockConfig,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            locks: SlotLockCoordinator::new(lock_config),
            booking_index: DashMap::new(),
            entity_index: DashMap::new(),
        };

        // Replay events. We're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (lazy tenant
        // creation).
        for event in &events {
            match event {
                Event::RestaurantCreated {
                    id,
                    name,
                    slot_interval,
                    last_seating_lead,
                    pacing,
                } => {
                    let rs = RestaurantState::new(
                        *id,
                        name.clone(),
                        *slot_interval,
                        *last_seating_lead,
                        *pacing,
                    );
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::RestaurantDeleted { id } => {
                    engine.state.remove(id);
                    engine.booking_index.retain(|_, (rid, _)| *rid != *id);
                    engine.entity_index.retain(|_, rid| *rid != *id);
                }
                other => {
                    if let Some(restaurant_id) = event_restaurant_id(other)
                        && let Some(entry) = engine.state.get(&restaurant_id)
                    {
                        let rs_arc = entry.clone();
                        let mut guard =
                            rs_arc.try_write().expect("replay: uncontended write");
                        apply_event(
                            &mut guard,
                            other,
                            &engine.booking_index,
                            &engine.entity_index,
                        );
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_restaurant(&self, id: &Ulid) -> Option<SharedRestaurantState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn restaurant_of_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_index.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        restaurant_id: Ulid,
        rs: &mut RestaurantState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_event(rs, event, &self.booking_index, &self.entity_index);
        self.notify.send(restaurant_id, event);
        Ok(())
    }

    /// Lookup entity → restaurant, then take the restaurant write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RestaurantState>), EngineError> {
        let restaurant_id = self
            .restaurant_of_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_restaurant(&restaurant_id)
            .ok_or(EngineError::NotFound(restaurant_id))?;
        let guard = rs.write_owned().await;
        Ok((restaurant_id, guard))
    }

    /// Lookup booking → (restaurant, date), then take the write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<
        (Ulid, NaiveDate, tokio::sync::OwnedRwLockWriteGuard<RestaurantState>),
        EngineError,
    > {
        let (restaurant_id, date) = self
            .booking_index
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_restaurant(&restaurant_id)
            .ok_or(EngineError::NotFound(restaurant_id))?;
        let guard = rs.write_owned().await;
        Ok((restaurant_id, date, guard))
    }
}

/// Extract the restaurant id from an event (for non-Create/Delete events).
fn event_restaurant_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::TableAdded { restaurant_id, .. }
        | Event::TableRetired { restaurant_id, .. }
        | Event::RuleAdded { restaurant_id, .. }
        | Event::RuleRemoved { restaurant_id, .. }
        | Event::PeriodAdded { restaurant_id, .. }
        | Event::PeriodRemoved { restaurant_id, .. }
        | Event::BookingCommitted { restaurant_id, .. }
        | Event::BookingStatusSet { restaurant_id, .. }
        | Event::BookingCancelled { restaurant_id, .. } => Some(*restaurant_id),
        Event::RestaurantCreated { .. } | Event::RestaurantDeleted { .. } => None,
    }
}
