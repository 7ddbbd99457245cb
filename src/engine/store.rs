use dashmap::DashMap;
use ulid::Ulid;

use crate::auth::Identity;
use crate::model::*;

use super::EngineError;

/// Answers "who owns this restaurant?". Every mutating table/reservation
/// operation goes through `verify_owner`; the public availability query does not.
pub trait OwnershipVerifier: Send + Sync {
    fn owner_of(&self, restaurant_id: &Ulid) -> Option<String>;

    fn verify_owner(&self, identity: &Identity, restaurant_id: &Ulid) -> Result<(), EngineError> {
        let owner = self
            .owner_of(restaurant_id)
            .ok_or_else(|| EngineError::not_found("restaurant", restaurant_id))?;
        match identity.uid() {
            Some(uid) if uid == owner => Ok(()),
            Some(_) => Err(EngineError::Forbidden(format!(
                "not the owner of restaurant {restaurant_id}"
            ))),
            None => Err(EngineError::Forbidden("sign in required".into())),
        }
    }
}

type DayKey = (Ulid, String);

/// In-memory document collections plus the secondary indexes the equality
/// queries need. Mutated only through `apply_event`, after the WAL append.
pub struct DocumentStore {
    restaurants: DashMap<Ulid, Restaurant>,
    slugs: DashMap<String, Ulid>,
    tables: DashMap<Ulid, Table>,
    tables_by_restaurant: DashMap<Ulid, Vec<Ulid>>,
    reservations: DashMap<Ulid, Reservation>,
    reservations_by_restaurant: DashMap<Ulid, Vec<Ulid>>,
    reservations_by_day: DashMap<DayKey, Vec<Ulid>>,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            restaurants: DashMap::new(),
            slugs: DashMap::new(),
            tables: DashMap::new(),
            tables_by_restaurant: DashMap::new(),
            reservations: DashMap::new(),
            reservations_by_restaurant: DashMap::new(),
            reservations_by_day: DashMap::new(),
        }
    }

    // ── Restaurants ──────────────────────────────────────────

    pub fn restaurant_count(&self) -> usize {
        self.restaurants.len()
    }

    pub fn get_restaurant(&self, id: &Ulid) -> Option<Restaurant> {
        self.restaurants.get(id).map(|e| e.value().clone())
    }

    pub fn restaurant_by_slug(&self, slug: &str) -> Option<Restaurant> {
        let id = *self.slugs.get(slug)?.value();
        self.get_restaurant(&id)
    }

    pub fn slug_taken(&self, slug: &str) -> bool {
        self.slugs.contains_key(slug)
    }

    /// Unordered scan. Fine at registry scale (bounded by `MAX_RESTAURANTS`).
    pub fn restaurants_where(&self, pred: impl Fn(&Restaurant) -> bool) -> Vec<Restaurant> {
        self.restaurants
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }

    // ── Tables ───────────────────────────────────────────────

    pub fn get_table(&self, id: &Ulid) -> Option<Table> {
        self.tables.get(id).map(|e| e.value().clone())
    }

    pub fn table_count(&self, restaurant_id: &Ulid) -> usize {
        self.tables_by_restaurant
            .get(restaurant_id)
            .map_or(0, |ids| ids.len())
    }

    /// All tables where `restaurantId = X`, unordered.
    pub fn tables_for(&self, restaurant_id: &Ulid) -> Vec<Table> {
        let ids = self
            .tables_by_restaurant
            .get(restaurant_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_table(id)).collect()
    }

    // ── Reservations ─────────────────────────────────────────

    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn reservation_count(&self, restaurant_id: &Ulid) -> usize {
        self.reservations_by_restaurant
            .get(restaurant_id)
            .map_or(0, |ids| ids.len())
    }

    /// All reservations where `restaurantId = X`, unordered.
    pub fn reservations_for(&self, restaurant_id: &Ulid) -> Vec<Reservation> {
        let ids = self
            .reservations_by_restaurant
            .get(restaurant_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_reservation(id)).collect()
    }

    /// All reservations where `restaurantId = X AND date = Y`, by exact date token.
    pub fn reservations_on(&self, restaurant_id: &Ulid, date: &str) -> Vec<Reservation> {
        let key = (*restaurant_id, date.to_string());
        let ids = self
            .reservations_by_day
            .get(&key)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_reservation(id)).collect()
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::RestaurantCreated { restaurant } => {
                self.slugs.insert(restaurant.slug.clone(), restaurant.id);
                self.restaurants.insert(restaurant.id, restaurant.clone());
            }
            Event::TableCreated { table } => {
                self.tables_by_restaurant
                    .entry(table.restaurant_id)
                    .or_default()
                    .push(table.id);
                self.tables.insert(table.id, table.clone());
            }
            Event::TableUpdated { id, name, capacity } => {
                if let Some(mut table) = self.tables.get_mut(id) {
                    table.name = name.clone();
                    table.capacity = *capacity;
                }
            }
            Event::TableDeleted { id } => {
                if let Some((_, table)) = self.tables.remove(id)
                    && let Some(mut ids) = self.tables_by_restaurant.get_mut(&table.restaurant_id)
                {
                    ids.retain(|t| t != id);
                }
            }
            Event::ReservationCreated { reservation } => {
                self.reservations_by_restaurant
                    .entry(reservation.restaurant_id)
                    .or_default()
                    .push(reservation.id);
                self.reservations_by_day
                    .entry((reservation.restaurant_id, reservation.date.clone()))
                    .or_default()
                    .push(reservation.id);
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationStatusChanged { id, status } => {
                if let Some(mut res) = self.reservations.get_mut(id) {
                    res.status = *status;
                }
            }
        }
    }

    /// Minimal event list that recreates the current documents: restaurants,
    /// then tables, then reservations carrying their current status.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut restaurants: Vec<Restaurant> =
            self.restaurants.iter().map(|e| e.value().clone()).collect();
        restaurants.sort_by_key(|r| r.id);
        let mut tables: Vec<Table> = self.tables.iter().map(|e| e.value().clone()).collect();
        tables.sort_by_key(|t| t.id);
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);

        restaurants
            .into_iter()
            .map(|restaurant| Event::RestaurantCreated { restaurant })
            .chain(tables.into_iter().map(|table| Event::TableCreated { table }))
            .chain(
                reservations
                    .into_iter()
                    .map(|reservation| Event::ReservationCreated { reservation }),
            )
            .collect()
    }
}

impl OwnershipVerifier for DocumentStore {
    fn owner_of(&self, restaurant_id: &Ulid) -> Option<String> {
        self.restaurants
            .get(restaurant_id)
            .map(|r| r.value().owner_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn restaurant(owner: &str, slug: &str) -> Restaurant {
        Restaurant {
            id: Ulid::new(),
            name: slug.into(),
            slug: slug.into(),
            owner_id: owner.into(),
            created_at: Utc::now(),
        }
    }

    fn table(restaurant_id: Ulid, name: &str) -> Table {
        Table {
            id: Ulid::new(),
            restaurant_id,
            name: name.into(),
            capacity: 2,
            created_at: Utc::now(),
        }
    }

    fn reservation(restaurant_id: Ulid, date: &str) -> Reservation {
        Reservation {
            id: Ulid::new(),
            restaurant_id,
            table_id: None,
            table_name: None,
            date: date.into(),
            time: "7:00 PM".into(),
            guests: None,
            status: ReservationStatus::Pending,
            user_id: None,
            user_name: None,
            user_phone: None,
            user_email: None,
            occasion: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn verify_owner_outcomes() {
        let store = DocumentStore::new();
        let r = restaurant("owner-1", "luigis");
        store.apply_event(&Event::RestaurantCreated { restaurant: r.clone() });

        assert!(store.verify_owner(&Identity::user("owner-1"), &r.id).is_ok());
        assert!(matches!(
            store.verify_owner(&Identity::user("intruder"), &r.id),
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            store.verify_owner(&Identity::anonymous(), &r.id),
            Err(EngineError::Forbidden(_))
        ));
        assert!(matches!(
            store.verify_owner(&Identity::user("owner-1"), &Ulid::new()),
            Err(EngineError::NotFound("restaurant", _))
        ));
    }

    #[test]
    fn table_index_follows_create_and_delete() {
        let store = DocumentStore::new();
        let rid = Ulid::new();
        let t1 = table(rid, "T1");
        let t2 = table(rid, "T2");
        store.apply_event(&Event::TableCreated { table: t1.clone() });
        store.apply_event(&Event::TableCreated { table: t2.clone() });
        store.apply_event(&Event::TableCreated { table: table(Ulid::new(), "elsewhere") });
        assert_eq!(store.table_count(&rid), 2);

        store.apply_event(&Event::TableDeleted { id: t1.id });
        assert_eq!(store.tables_for(&rid), vec![t2]);
        // Deleting twice is harmless.
        store.apply_event(&Event::TableDeleted { id: t1.id });
        assert_eq!(store.table_count(&rid), 1);
    }

    #[test]
    fn reservations_by_exact_date_token() {
        let store = DocumentStore::new();
        let rid = Ulid::new();
        let iso = "2024-06-01T00:00:00.000Z";
        let a = reservation(rid, iso);
        let b = reservation(rid, "2024-06-01");
        store.apply_event(&Event::ReservationCreated { reservation: a.clone() });
        store.apply_event(&Event::ReservationCreated { reservation: b });

        assert_eq!(store.reservations_on(&rid, iso), vec![a]);
        assert_eq!(store.reservations_for(&rid).len(), 2);
        assert!(store.reservations_on(&Ulid::new(), iso).is_empty());
    }

    #[test]
    fn snapshot_replays_to_same_state() {
        let store = DocumentStore::new();
        let r = restaurant("o", "slug");
        let t = table(r.id, "T1");
        let res = reservation(r.id, "d");
        store.apply_event(&Event::RestaurantCreated { restaurant: r.clone() });
        store.apply_event(&Event::TableCreated { table: t.clone() });
        store.apply_event(&Event::TableUpdated { id: t.id, name: "Window".into(), capacity: 6 });
        store.apply_event(&Event::ReservationCreated { reservation: res.clone() });
        store.apply_event(&Event::ReservationStatusChanged {
            id: res.id,
            status: ReservationStatus::Confirmed,
        });

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 3);

        let replayed = DocumentStore::new();
        for event in &snapshot {
            replayed.apply_event(event);
        }
        assert_eq!(replayed.restaurant_by_slug("slug"), Some(r));
        let table = replayed.get_table(&t.id).unwrap();
        assert_eq!((table.name.as_str(), table.capacity), ("Window", 6));
        assert_eq!(
            replayed.get_reservation(&res.id).unwrap().status,
            ReservationStatus::Confirmed
        );
    }
}
