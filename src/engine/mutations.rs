use ulid::Ulid;

use crate::auth::Identity;
use crate::clock::ClockTime;
use crate::limits::*;
use crate::model::*;

use super::availability::seating_window;
use super::conflict::*;
use super::{Engine, EngineError, OwnershipVerifier};

impl Engine {
    // ── Restaurant registry ──────────────────────────────────

    pub async fn create_restaurant(
        &self,
        identity: &Identity,
        name: Option<&str>,
    ) -> Result<Restaurant, EngineError> {
        let owner_id = identity
            .uid()
            .ok_or_else(|| EngineError::Forbidden("sign in required".into()))?
            .to_string();
        let name = require_text("name", name)?.trim();
        check_len(name, MAX_NAME_LEN, "restaurant name too long")?;
        let base = slugify(name);
        if base.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "name {name:?} has no characters usable in a slug"
            )));
        }

        let _registry = self.registry_lock.lock().await;
        if self.store.restaurant_count() >= MAX_RESTAURANTS {
            return Err(EngineError::LimitExceeded("too many restaurants"));
        }
        let mut slug = base.clone();
        let mut suffix = 0u32;
        while self.store.slug_taken(&slug) {
            suffix += 1;
            slug = format!("{base}-{suffix}");
        }

        let restaurant = Restaurant {
            id: Ulid::new(),
            name: name.to_string(),
            slug,
            owner_id,
            created_at: now(),
        };
        self.persist_and_apply(&Event::RestaurantCreated {
            restaurant: restaurant.clone(),
        })
        .await?;
        tracing::info!(
            "restaurant {} created as {:?} by {}",
            restaurant.id,
            restaurant.slug,
            restaurant.owner_id
        );
        Ok(restaurant)
    }

    // ── Table directory ──────────────────────────────────────

    pub async fn create_table(
        &self,
        identity: &Identity,
        restaurant_id: Option<&str>,
        name: Option<&str>,
        capacity: Option<i64>,
    ) -> Result<Table, EngineError> {
        let restaurant_id = parse_id("restaurantId", restaurant_id)?;
        self.store.verify_owner(identity, &restaurant_id)?;
        let name = require_text("name", name)?;
        check_len(name, MAX_NAME_LEN, "table name too long")?;
        if self.store.table_count(&restaurant_id) >= MAX_TABLES_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many tables in restaurant"));
        }

        let table = Table {
            id: Ulid::new(),
            restaurant_id,
            name: name.to_string(),
            capacity: normalize_capacity(capacity.unwrap_or(1)),
            created_at: now(),
        };
        self.persist_and_apply(&Event::TableCreated { table: table.clone() }).await?;
        tracing::debug!("table {} ({:?}) added to {restaurant_id}", table.id, table.name);
        Ok(table)
    }

    /// Overwrite a table's name and/or capacity. The supplied restaurant id
    /// must match the stored one, which stops cross-tenant edits by forged id.
    pub async fn update_table(
        &self,
        identity: &Identity,
        id: Option<&str>,
        restaurant_id: Option<&str>,
        name: Option<&str>,
        capacity: Option<i64>,
    ) -> Result<Table, EngineError> {
        let id = parse_id("id", id)?;
        let restaurant_id = parse_id("restaurantId", restaurant_id)?;
        let mut table = self
            .store
            .get_table(&id)
            .ok_or_else(|| EngineError::not_found("table", id))?;
        if table.restaurant_id != restaurant_id {
            return Err(EngineError::Forbidden(format!(
                "table {id} does not belong to restaurant {restaurant_id}"
            )));
        }
        self.store.verify_owner(identity, &restaurant_id)?;

        if let Some(name) = name {
            let name = require_text("name", Some(name))?;
            check_len(name, MAX_NAME_LEN, "table name too long")?;
            table.name = name.to_string();
        }
        if let Some(capacity) = capacity {
            table.capacity = normalize_capacity(capacity);
        }

        self.persist_and_apply(&Event::TableUpdated {
            id,
            name: table.name.clone(),
            capacity: table.capacity,
        })
        .await?;
        Ok(table)
    }

    /// Delete by id. Reservations pointing at the table are left in place.
    /// Returns whether a table was actually removed.
    pub async fn delete_table(&self, identity: &Identity, id: Option<&str>) -> Result<bool, EngineError> {
        let id = parse_id("id", id)?;
        let Some(table) = self.store.get_table(&id) else {
            return Ok(false);
        };
        self.store.verify_owner(identity, &table.restaurant_id)?;
        self.persist_and_apply(&Event::TableDeleted { id }).await?;
        tracing::debug!("table {id} removed from {}", table.restaurant_id);
        Ok(true)
    }

    // ── Reservation ledger ───────────────────────────────────

    /// Book as `identity` (possibly anonymous). Status always starts as
    /// pending. When a table is named, the slot is locked and re-checked
    /// so two concurrent bookings cannot both take it.
    pub async fn create_reservation(
        &self,
        identity: &Identity,
        new: NewReservation,
    ) -> Result<Reservation, EngineError> {
        let restaurant_id = parse_id("restaurantId", Some(&new.restaurant_id))?;
        let date = require_text("date", new.date.as_deref())?;
        let time = require_text("time", new.time.as_deref())?;
        check_len(date, MAX_DATE_TOKEN_LEN, "date too long")?;
        check_len(time, MAX_DATE_TOKEN_LEN, "time too long")?;
        check_optional_len(new.table_name.as_deref(), MAX_NAME_LEN, "table name too long")?;
        check_optional_len(new.user_name.as_deref(), MAX_NAME_LEN, "user name too long")?;
        for field in [&new.user_phone, &new.user_email, &new.occasion, &new.notes] {
            check_optional_len(field.as_deref(), MAX_TEXT_FIELD_LEN, "text field too long")?;
        }
        if new.guests.is_some_and(|g| g > MAX_GUESTS) {
            return Err(EngineError::LimitExceeded("party too large"));
        }

        if self.store.get_restaurant(&restaurant_id).is_none() {
            return Err(EngineError::not_found("restaurant", restaurant_id));
        }
        if self.store.reservation_count(&restaurant_id) >= MAX_RESERVATIONS_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many reservations in restaurant"));
        }

        let table_id = match new.table_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_id("tableId", Some(raw))?),
        };

        let reservation = Reservation {
            id: Ulid::new(),
            restaurant_id,
            table_id,
            table_name: new.table_name,
            date: date.to_string(),
            time: time.to_string(),
            guests: new.guests,
            status: ReservationStatus::Pending,
            user_id: identity.uid().map(str::to_string),
            user_name: new.user_name,
            user_phone: new.user_phone,
            user_email: new.user_email,
            occasion: new.occasion,
            notes: new.notes,
            created_at: now(),
        };

        let Some(table_id) = table_id else {
            self.persist_and_apply(&Event::ReservationCreated {
                reservation: reservation.clone(),
            })
            .await?;
            tracing::debug!("unassigned reservation {} for {restaurant_id}", reservation.id);
            return Ok(reservation);
        };

        match self.store.get_table(&table_id) {
            Some(t) if t.restaurant_id == restaurant_id => {}
            _ => return Err(EngineError::not_found("table", table_id)),
        }
        let window = seating_window(time.parse::<ClockTime>()?);

        let slot = self.slot_lock(restaurant_id, table_id, date);
        let _slot = slot.lock().await;
        check_no_conflict(&self.store, &restaurant_id, table_id, date, &window, None)?;
        self.persist_and_apply(&Event::ReservationCreated {
            reservation: reservation.clone(),
        })
        .await?;
        tracing::debug!(
            "reservation {} holds table {table_id} on {date:?} at {time}",
            reservation.id
        );
        Ok(reservation)
    }

    /// Owner-only status change. Moving a cancelled or rejected booking back
    /// to an active status re-validates its seating like a fresh booking.
    pub async fn update_reservation_status(
        &self,
        identity: &Identity,
        id: Option<&str>,
        status: Option<&str>,
    ) -> Result<Reservation, EngineError> {
        let id = parse_id("id", id)?;
        let status: ReservationStatus = require_text("status", status)?
            .parse()
            .map_err(EngineError::InvalidArgument)?;
        let current = self
            .store
            .get_reservation(&id)
            .ok_or_else(|| EngineError::not_found("reservation", id))?;
        self.store.verify_owner(identity, &current.restaurant_id)?;

        let event = Event::ReservationStatusChanged { id, status };
        let Some(table_id) = current.table_id else {
            self.persist_and_apply(&event).await?;
            tracing::info!("reservation {id}: {} -> {status}", current.status);
            return self.get_updated(id);
        };

        // Status writes on a seated booking serialize with bookings of its slot.
        let slot = self.slot_lock(current.restaurant_id, table_id, &current.date);
        let _slot = slot.lock().await;
        let previous = self
            .store
            .get_reservation(&id)
            .ok_or_else(|| EngineError::not_found("reservation", id))?
            .status;
        if !previous.holds_table() && status.holds_table() {
            let window = seating_window(current.time.parse::<ClockTime>().map_err(|e| {
                EngineError::Internal(format!("reservation {id} has unreadable time: {e}"))
            })?);
            check_no_conflict(
                &self.store,
                &current.restaurant_id,
                table_id,
                &current.date,
                &window,
                Some(id),
            )?;
        }
        self.persist_and_apply(&event).await?;
        tracing::info!("reservation {id}: {previous} -> {status}");

        self.get_updated(id)
    }

    fn get_updated(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store
            .get_reservation(&id)
            .ok_or_else(|| EngineError::not_found("reservation", id))
    }
}
