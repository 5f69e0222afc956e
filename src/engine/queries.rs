use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Assignment, Engine, EngineError, SharedRestaurantState, assign, report, turn_time};

impl Engine {
    /// Slot-by-slot availability for one restaurant, date and party size.
    ///
    /// `preferred` anchors alternative-time suggestions when the guest named
    /// a time; pass `None` to anchor each constrained slot on itself.
    pub async fn availability_report(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
        party_size: u32,
        preferred: Option<Minute>,
    ) -> Result<Vec<SlotReport>, EngineError> {
        if party_size == 0 {
            return Err(EngineError::Invalid("party size must be positive"));
        }
        if party_size > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("party size too large"));
        }
        let rs = self
            .get_restaurant(&restaurant_id)
            .ok_or(EngineError::NotFound(restaurant_id))?;
        let guard = rs.read().await;
        report::day_report(&guard, date, party_size, preferred)
    }

    /// Tables that could seat the party at `start`, the resolver's own pick
    /// flagged. A combined pair comes back as two rows, both flagged.
    pub async fn available_tables(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
        start: Minute,
        party_size: u32,
    ) -> Result<Vec<TableOption>, EngineError> {
        if party_size == 0 {
            return Err(EngineError::Invalid("party size must be positive"));
        }
        if party_size > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("party size too large"));
        }
        let rs = self
            .get_restaurant(&restaurant_id)
            .ok_or(EngineError::NotFound(restaurant_id))?;
        let guard = rs.read().await;

        let duration = turn_time::resolve_duration(&guard.rules, party_size);
        let span = TimeSpan::new(start, start + duration);
        let resolved = assign::resolve_tables(&guard, date, &span, party_size);

        let mut options = Vec::new();
        match &resolved.best {
            Some(Assignment::Combined(a, b)) => {
                for id in [*a, *b] {
                    if let Some(t) = guard.table(id) {
                        options.push(TableOption { table: t.clone(), best: true });
                    }
                }
            }
            _ => {
                for (i, id) in resolved.free.iter().enumerate() {
                    if let Some(t) = guard.table(*id) {
                        options.push(TableOption { table: t.clone(), best: i == 0 });
                    }
                }
            }
        }
        Ok(options)
    }

    pub async fn list_restaurants(&self) -> Vec<RestaurantInfo> {
        // Clone the Arcs out first so no map shard guard lives across await.
        let arcs: Vec<SharedRestaurantState> =
            self.state.iter().map(|entry| entry.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for rs in arcs {
            let guard = rs.read().await;
            out.push(RestaurantInfo {
                id: guard.id,
                name: guard.name.clone(),
                slot_interval: guard.slot_interval,
                last_seating_lead: guard.last_seating_lead,
                pacing: guard.pacing,
                active_tables: guard.tables.iter().filter(|t| t.active).count() as u32,
            });
        }
        out.sort_by_key(|info| info.id);
        out
    }

    /// Full table inventory, retired tables included.
    pub async fn list_tables(&self, restaurant_id: Ulid) -> Result<Vec<Table>, EngineError> {
        let rs = self
            .get_restaurant(&restaurant_id)
            .ok_or(EngineError::NotFound(restaurant_id))?;
        let guard = rs.read().await;
        Ok(guard.tables.clone())
    }

    pub async fn list_bookings(
        &self,
        restaurant_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_restaurant(&restaurant_id)
            .ok_or(EngineError::NotFound(restaurant_id))?;
        let guard = rs.read().await;
        Ok(match date {
            Some(d) => guard.day(d).to_vec(),
            None => guard.book.values().flatten().cloned().collect(),
        })
    }
}
