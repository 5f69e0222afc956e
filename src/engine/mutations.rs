use std::sync::Arc;

use chrono::{Datelike, Weekday};
use metrics::counter;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::lock::SlotKey;
use crate::model::*;
use crate::observability::{BOOKINGS_COMMITTED_TOTAL, BOOKINGS_OVERRIDDEN_TOTAL};

use super::{Engine, EngineError, WalCommand, assign, pacing, slots, turn_time};

impl Engine {
    pub async fn create_restaurant(
        &self,
        id: Ulid,
        name: String,
        slot_interval: Option<Minute>,
        pacing: PacingLimits,
        last_seating_lead: Option<Minute>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_RESTAURANTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many restaurants"));
        }
        if name.trim().is_empty() {
            return Err(EngineError::Invalid("restaurant name required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("restaurant name too long"));
        }
        let slot_interval = slot_interval.unwrap_or(30);
        if !(MIN_SLOT_INTERVAL..=MAX_SLOT_INTERVAL).contains(&slot_interval) {
            return Err(EngineError::Invalid("slot interval out of range"));
        }
        let last_seating_lead = last_seating_lead.unwrap_or(0);
        if !(0..DAY_MINUTES).contains(&last_seating_lead) {
            return Err(EngineError::Invalid("last seating lead out of range"));
        }
        if pacing.moderate_pct > pacing.busy_pct {
            return Err(EngineError::Invalid(
                "moderate threshold above busy threshold",
            ));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RestaurantCreated {
            id,
            name: name.clone(),
            slot_interval,
            last_seating_lead,
            pacing,
        };
        self.wal_append(&event).await?;
        let rs = RestaurantState::new(id, name, slot_interval, last_seating_lead, pacing);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn delete_restaurant(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.state.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::RestaurantDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.booking_index.retain(|_, (rid, _)| *rid != id);
        self.entity_index.retain(|_, rid| *rid != id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_table(
        &self,
        id: Ulid,
        restaurant_id: Ulid,
        label: String,
        min_covers: u32,
        max_covers: u32,
        priority: i32,
        combinable: bool,
    ) -> Result<(), EngineError> {
        if label.trim().is_empty() {
            return Err(EngineError::Invalid("table label required"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(EngineError::LimitExceeded("table label too long"));
        }
        if min_covers == 0 {
            return Err(EngineError::Invalid("table minimum covers must be positive"));
        }
        if min_covers > max_covers {
            return Err(EngineError::Invalid("table covers range inverted"));
        }
        if max_covers > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("table capacity too large"));
        }
        if self.entity_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self
            .get_restaurant(&restaurant_id)
            .ok_or(EngineError::NotFound(restaurant_id))?;
        let mut guard = rs.write().await;
        if guard.tables.len() >= MAX_TABLES_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many tables"));
        }

        let event = Event::TableAdded {
            id,
            restaurant_id,
            label,
            min_covers,
            max_covers,
            priority,
            combinable,
        };
        self.persist_and_apply(restaurant_id, &mut guard, &event).await
    }

    /// Retire a table from service. Its bookings stay on the books; it just
    /// stops receiving new assignments.
    pub async fn retire_table(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (restaurant_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.table(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::TableRetired { id, restaurant_id };
        self.persist_and_apply(restaurant_id, &mut guard, &event).await?;
        Ok(restaurant_id)
    }

    pub async fn add_rule(
        &self,
        id: Ulid,
        restaurant_id: Ulid,
        min_party: u32,
        max_party: u32,
        minutes: Minute,
    ) -> Result<(), EngineError> {
        if min_party == 0 {
            return Err(EngineError::Invalid("rule minimum party must be positive"));
        }
        if min_party > max_party {
            return Err(EngineError::Invalid("rule party range inverted"));
        }
        if max_party > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("rule party bound too large"));
        }
        if minutes <= 0 || minutes > MAX_TURN_TIME_MIN {
            return Err(EngineError::Invalid("turn time out of range"));
        }
        if self.entity_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self
            .get_restaurant(&restaurant_id)
            .ok_or(EngineError::NotFound(restaurant_id))?;
        let mut guard = rs.write().await;
        if guard.rules.len() >= MAX_RULES_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many turn time rules"));
        }

        let event = Event::RuleAdded {
            id,
            restaurant_id,
            min_party,
            max_party,
            minutes,
        };
        self.persist_and_apply(restaurant_id, &mut guard, &event).await
    }

    pub async fn remove_rule(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (restaurant_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.rules.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::RuleRemoved { id, restaurant_id };
        self.persist_and_apply(restaurant_id, &mut guard, &event).await?;
        Ok(restaurant_id)
    }

    pub async fn add_period(
        &self,
        id: Ulid,
        restaurant_id: Ulid,
        weekday: Weekday,
        name: String,
        open: Minute,
        close: Minute,
    ) -> Result<(), EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Invalid("period name required"));
        }
        if name.len() > MAX_LABEL_LEN {
            return Err(EngineError::LimitExceeded("period name too long"));
        }
        if !(0..DAY_MINUTES).contains(&open) {
            return Err(EngineError::Invalid("period open out of range"));
        }
        if close <= open {
            return Err(EngineError::Invalid("period must close after it opens"));
        }
        if close > MAX_PERIOD_END {
            return Err(EngineError::Invalid("period close out of range"));
        }
        if self.entity_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self
            .get_restaurant(&restaurant_id)
            .ok_or(EngineError::NotFound(restaurant_id))?;
        let mut guard = rs.write().await;
        if guard.periods.len() >= MAX_PERIODS_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many service periods"));
        }

        let event = Event::PeriodAdded {
            id,
            restaurant_id,
            weekday,
            name,
            span: TimeSpan::new(open, close),
        };
        self.persist_and_apply(restaurant_id, &mut guard, &event).await
    }

    pub async fn remove_period(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (restaurant_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.periods.iter().any(|p| p.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::PeriodRemoved { id, restaurant_id };
        self.persist_and_apply(restaurant_id, &mut guard, &event).await?;
        Ok(restaurant_id)
    }

    /// Book a table. The whole check-then-commit runs under the slot's
    /// advisory claim, so two requests for the same restaurant/date/time
    /// serialize here instead of racing to the state lock.
    pub async fn create_booking(
        &self,
        req: BookingRequest,
    ) -> Result<BookingReceipt, EngineError> {
        if req.party_size == 0 {
            return Err(EngineError::Invalid("party size must be positive"));
        }
        if req.party_size > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("party size too large"));
        }
        if let Some(ref name) = req.guest_name
            && name.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("guest name too long"));
        }
        if let Some(ref reason) = req.override_reason
            && reason.len() > MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("override reason too long"));
        }
        if !(0..MAX_PERIOD_END).contains(&req.start) {
            return Err(EngineError::Invalid("booking time out of range"));
        }
        if !self.state.contains_key(&req.restaurant_id) {
            return Err(EngineError::NotFound(req.restaurant_id));
        }

        let key = SlotKey {
            restaurant_id: req.restaurant_id,
            date: req.date,
            minute: req.start,
        };
        self.locks
            .with_slot_lock(key, || {
                let req = req.clone();
                async move { self.commit_booking(req).await }
            })
            .await
    }

    async fn commit_booking(&self, req: BookingRequest) -> Result<BookingReceipt, EngineError> {
        let rs = self
            .get_restaurant(&req.restaurant_id)
            .ok_or(EngineError::NotFound(req.restaurant_id))?;
        let mut guard = rs.write_owned().await;

        let weekday = req.date.weekday();
        let grid = slots::slot_grid(
            &guard.periods,
            req.date,
            guard.slot_interval,
            guard.last_seating_lead,
        );
        if grid.is_empty() {
            return Err(EngineError::RestaurantClosed { date: req.date });
        }
        if !slots::within_service(&guard.periods, weekday, req.start, guard.last_seating_lead) {
            return Err(EngineError::Invalid("requested time is outside service hours"));
        }

        let blocking_today = guard.day(req.date).iter().filter(|b| b.blocks()).count();
        if blocking_today >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings for one day"));
        }
        if self.booking_index.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let duration = turn_time::resolve_duration(&guard.rules, req.party_size);
        let span = TimeSpan::new(req.start, req.start + duration);

        let resolved = assign::resolve_tables(&guard, req.date, &span, req.party_size);
        let Some(ref best) = resolved.best else {
            return Err(EngineError::PhysicallyFull { minute: req.start });
        };

        let bucket = slots::bucket_of(&guard.periods, weekday, guard.slot_interval, req.start);
        let load = pacing::slot_load(&guard, req.date, bucket, guard.slot_interval);
        let class = pacing::classify(
            resolved.option_count(),
            &load,
            req.party_size,
            &guard.pacing,
        );

        let mut override_reason = None;
        if class.status == PacingStatus::PacingFull {
            if !req.override_pacing {
                return Err(EngineError::OverrideRequired { minute: bucket });
            }
            let reason = req.override_reason.as_deref().map(str::trim).unwrap_or("");
            if reason.len() < MIN_OVERRIDE_REASON_LEN {
                return Err(EngineError::Invalid("override requires a reason"));
            }
            override_reason = Some(reason.to_string());
        }

        // The chosen tables must still be free at commit.
        let table_ids = best.table_ids();
        for &table_id in &table_ids {
            if let Some(holder) = guard
                .overlapping(req.date, &span)
                .find(|b| b.blocks() && b.occupies(table_id))
            {
                return Err(EngineError::TableConflict {
                    booking: holder.id,
                });
            }
        }

        let event = Event::BookingCommitted {
            id: req.id,
            restaurant_id: req.restaurant_id,
            table_ids: table_ids.clone(),
            date: req.date,
            span,
            party_size: req.party_size,
            guest_name: req.guest_name.clone(),
            override_reason: override_reason.clone(),
        };
        self.persist_and_apply(req.restaurant_id, &mut guard, &event).await?;

        counter!(BOOKINGS_COMMITTED_TOTAL).increment(1);
        let overridden = override_reason.is_some();
        if overridden {
            counter!(BOOKINGS_OVERRIDDEN_TOTAL).increment(1);
        }

        Ok(BookingReceipt {
            id: req.id,
            table_ids,
            date: req.date,
            span,
            party_size: req.party_size,
            overridden,
        })
    }

    /// Cancel a booking, freeing its tables for the interval.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (restaurant_id, date, mut guard) = self.resolve_booking_write(&id).await?;
        let event = Event::BookingCancelled {
            id,
            restaurant_id,
            date,
        };
        self.persist_and_apply(restaurant_id, &mut guard, &event).await?;
        Ok(restaurant_id)
    }

    /// Walk a booking through its lifecycle. Setting `cancelled` is the same
    /// as cancel_booking; no other status frees the tables.
    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Ulid, EngineError> {
        let (restaurant_id, date, mut guard) = self.resolve_booking_write(&id).await?;
        let event = if status == BookingStatus::Cancelled {
            Event::BookingCancelled {
                id,
                restaurant_id,
                date,
            }
        } else {
            Event::BookingStatusSet {
                id,
                restaurant_id,
                date,
                status,
            }
        };
        self.persist_and_apply(restaurant_id, &mut guard, &event).await?;
        Ok(restaurant_id)
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let restaurant_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in restaurant_ids {
            let Some(rs) = self.get_restaurant(&id) else {
                continue;
            };
            let guard = rs.read().await;

            events.push(Event::RestaurantCreated {
                id: guard.id,
                name: guard.name.clone(),
                slot_interval: guard.slot_interval,
                last_seating_lead: guard.last_seating_lead,
                pacing: guard.pacing,
            });
            for t in &guard.tables {
                events.push(Event::TableAdded {
                    id: t.id,
                    restaurant_id: guard.id,
                    label: t.label.clone(),
                    min_covers: t.min_covers,
                    max_covers: t.max_covers,
                    priority: t.priority,
                    combinable: t.combinable,
                });
                if !t.active {
                    events.push(Event::TableRetired {
                        id: t.id,
                        restaurant_id: guard.id,
                    });
                }
            }
            for r in &guard.rules {
                events.push(Event::RuleAdded {
                    id: r.id,
                    restaurant_id: guard.id,
                    min_party: r.min_party,
                    max_party: r.max_party,
                    minutes: r.minutes,
                });
            }
            for p in &guard.periods {
                events.push(Event::PeriodAdded {
                    id: p.id,
                    restaurant_id: guard.id,
                    weekday: p.weekday,
                    name: p.name.clone(),
                    span: p.span,
                });
            }
            for day in guard.book.values() {
                for b in day {
                    events.push(Event::BookingCommitted {
                        id: b.id,
                        restaurant_id: guard.id,
                        table_ids: b.table_ids.clone(),
                        date: b.date,
                        span: b.span,
                        party_size: b.party_size,
                        guest_name: b.guest_name.clone(),
                        override_reason: b.override_reason.clone(),
                    });
                    match b.status {
                        BookingStatus::Confirmed => {}
                        BookingStatus::Cancelled => events.push(Event::BookingCancelled {
                            id: b.id,
                            restaurant_id: guard.id,
                            date: b.date,
                        }),
                        status => events.push(Event::BookingStatusSet {
                            id: b.id,
                            restaurant_id: guard.id,
                            date: b.date,
                            status,
                        }),
                    }
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
