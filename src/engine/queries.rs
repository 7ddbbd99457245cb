use std::cmp::Reverse;

use ulid::Ulid;

use crate::auth::Identity;
use crate::clock::ClockTime;
use crate::model::*;
use crate::natural::natural_cmp;

use super::availability::free_tables;
use super::conflict::{parse_id, require_text};
use super::{Engine, EngineError, OwnershipVerifier};

fn sort_by_name(tables: &mut [Table]) {
    tables.sort_by(|a, b| natural_cmp(&a.name, &b.name).then(a.id.cmp(&b.id)));
}

impl Engine {
    /// Tables free for a three-hour seating at `time` on `date`. Public: no
    /// ownership check. An unknown restaurant simply has no tables, and an id
    /// that is not a ULID cannot name one.
    pub fn find_available(
        &self,
        restaurant_id: Option<&str>,
        date: Option<&str>,
        time: Option<&str>,
        min_capacity: Option<u32>,
    ) -> Result<Vec<Table>, EngineError> {
        let raw_restaurant = require_text("restaurantId", restaurant_id)?;
        let date = require_text("date", date)?;
        let time = require_text("time", time)?;
        let requested: ClockTime = time.parse()?;
        let Ok(restaurant_id) = Ulid::from_string(raw_restaurant.trim()) else {
            return Ok(Vec::new());
        };

        let mut tables = self.store.tables_for(&restaurant_id);
        if tables.is_empty() {
            return Ok(tables);
        }
        sort_by_name(&mut tables);
        let reservations = self.store.reservations_on(&restaurant_id, date);
        let free = free_tables(tables, &reservations, requested, min_capacity)?;

        metrics::histogram!(crate::observability::AVAILABLE_TABLES).record(free.len() as f64);
        Ok(free)
    }

    /// Owner view of every table, in natural name order.
    pub fn list_tables(
        &self,
        identity: &Identity,
        restaurant_id: Option<&str>,
    ) -> Result<Vec<Table>, EngineError> {
        let restaurant_id = parse_id("restaurantId", restaurant_id)?;
        self.store.verify_owner(identity, &restaurant_id)?;
        let mut tables = self.store.tables_for(&restaurant_id);
        sort_by_name(&mut tables);
        Ok(tables)
    }

    /// Owner view of the ledger, newest date first. `date` narrows to one
    /// exact date token.
    pub fn list_reservations(
        &self,
        identity: &Identity,
        restaurant_id: Option<&str>,
        date: Option<&str>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let restaurant_id = parse_id("restaurantId", restaurant_id)?;
        self.store.verify_owner(identity, &restaurant_id)?;
        let mut reservations = match date {
            Some(date) => self.store.reservations_on(&restaurant_id, date),
            None => self.store.reservations_for(&restaurant_id),
        };
        reservations.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        Ok(reservations)
    }

    pub fn restaurant_by_slug(&self, slug: Option<&str>) -> Result<Option<Restaurant>, EngineError> {
        let slug = require_text("slug", slug)?;
        Ok(self.store.restaurant_by_slug(slug.trim()))
    }

    /// The caller's restaurants; admins see all of them.
    pub fn list_restaurants(&self, identity: &Identity) -> Result<Vec<Restaurant>, EngineError> {
        let mut found = if identity.is_admin() {
            self.store.restaurants_where(|_| true)
        } else {
            let uid = identity
                .uid()
                .ok_or_else(|| EngineError::Forbidden("sign in required".into()))?;
            self.store.restaurants_where(|r| r.owner_id == uid)
        };
        found.sort_by_key(|r| Reverse(r.id));
        Ok(found)
    }
}
