use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight on a reservation's calendar date. Not clamped to a
/// single day: a late seating's window runs past 1440.
pub type Minute = i32;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Rejected,
}

impl ReservationStatus {
    /// Cancelled and rejected bookings stay in the ledger but never hold a table.
    pub fn holds_table(self) -> bool {
        !matches!(self, ReservationStatus::Cancelled | ReservationStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" | "canceled" => Ok(ReservationStatus::Cancelled),
            "rejected" => Ok(ReservationStatus::Rejected),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Ulid,
    pub name: String,
    pub slug: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub table_id: Option<Ulid>,
    pub table_name: Option<String>,
    /// Opaque date token, matched byte-for-byte (conventionally an ISO timestamp).
    pub date: String,
    /// Wall-clock time as submitted, e.g. `"7:00 PM"`.
    pub time: String,
    pub guests: Option<u32>,
    pub status: ReservationStatus,
    /// Uid of the booking account; `None` for anonymous diners.
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_phone: Option<String>,
    pub user_email: Option<String>,
    pub occasion: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields a caller may supply when booking. Status and timestamps are server-set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewReservation {
    pub restaurant_id: String,
    pub table_id: Option<String>,
    pub table_name: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub guests: Option<u32>,
    pub user_name: Option<String>,
    pub user_phone: Option<String>,
    pub user_email: Option<String>,
    pub occasion: Option<String>,
    pub notes: Option<String>,
}

/// Render timestamps the way browsers' `toISOString` does.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RestaurantCreated {
        restaurant: Restaurant,
    },
    TableCreated {
        table: Table,
    },
    TableUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    TableDeleted {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        status: ReservationStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
        assert_eq!(a.duration(), 100);
    }

    #[test]
    fn status_parsing_and_activity() {
        assert_eq!("Confirmed".parse::<ReservationStatus>(), Ok(ReservationStatus::Confirmed));
        assert_eq!("canceled".parse::<ReservationStatus>(), Ok(ReservationStatus::Cancelled));
        assert!("seated".parse::<ReservationStatus>().is_err());

        assert!(ReservationStatus::Pending.holds_table());
        assert!(ReservationStatus::Confirmed.holds_table());
        assert!(!ReservationStatus::Cancelled.holds_table());
        assert!(!ReservationStatus::Rejected.holds_table());
    }

    #[test]
    fn timestamp_matches_iso_string_shape() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T18:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&ts), "2024-01-01T18:00:00.000Z");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::TableCreated {
            table: Table {
                id: Ulid::new(),
                restaurant_id: Ulid::new(),
                name: "Table 1".into(),
                capacity: 4,
                created_at: Utc::now(),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
