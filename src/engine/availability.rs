use std::collections::HashMap;

use ulid::Ulid;

use crate::clock::ClockTime;
use crate::model::*;

use super::EngineError;

/// Every reservation occupies its table for one fixed seating.
pub const SEATING_MINUTES: Minute = 180;

// ── Seating windows ──────────────────────────────────────────────

/// `[T, T + 180)` on the flat minute line of the reservation's date. A late
/// seating's window runs past 1440 rather than wrapping into the next day.
pub fn seating_window(start: ClockTime) -> Span {
    Span::new(start.minutes(), start.minutes() + SEATING_MINUTES)
}

/// Two seatings collide iff their start times are less than one seating apart.
pub fn seatings_conflict(a: ClockTime, b: ClockTime) -> bool {
    seating_window(a).overlaps(&seating_window(b))
}

/// Window of a stored reservation. Bookings bound to a table are validated on
/// the way in, so a parse failure here means the stored data is damaged.
fn stored_window(res: &Reservation) -> Result<Span, EngineError> {
    let start: ClockTime = res.time.parse().map_err(|e| {
        EngineError::Internal(format!("reservation {} has unreadable time: {e}", res.id))
    })?;
    Ok(seating_window(start))
}

// ── Conflict detection ───────────────────────────────────────────

/// First reservation on `table_id` that still holds the table and whose seating
/// overlaps `requested`. Cancelled and rejected bookings never block.
pub fn find_conflict<'a>(
    table_id: Ulid,
    requested: &Span,
    reservations: impl IntoIterator<Item = &'a Reservation>,
) -> Result<Option<&'a Reservation>, EngineError> {
    for res in reservations {
        if res.table_id != Some(table_id) || !res.status.holds_table() {
            continue;
        }
        if stored_window(res)?.overlaps(requested) {
            return Ok(Some(res));
        }
    }
    Ok(None)
}

// ── Table filtering ──────────────────────────────────────────────

/// Tables free for a seating starting at `requested`, in the order given.
///
/// `reservations` must already be narrowed to one restaurant and one date.
/// Unassigned reservations (no table) are ignored.
pub fn free_tables(
    tables: Vec<Table>,
    reservations: &[Reservation],
    requested: ClockTime,
    min_capacity: Option<u32>,
) -> Result<Vec<Table>, EngineError> {
    let window = seating_window(requested);

    let mut by_table: HashMap<Ulid, Vec<&Reservation>> = HashMap::new();
    for res in reservations {
        if let Some(table_id) = res.table_id {
            by_table.entry(table_id).or_default().push(res);
        }
    }

    let mut free = Vec::with_capacity(tables.len());
    for table in tables {
        let booked = by_table.get(&table.id).map(Vec::as_slice).unwrap_or_default();
        let conflict = find_conflict(table.id, &window, booked.iter().copied())?;
        let fits = min_capacity.is_none_or(|min| table.capacity >= min);
        if conflict.is_none() && fits {
            free.push(table);
        }
    }
    Ok(free)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn table(name: &str, capacity: u32) -> Table {
        Table {
            id: Ulid::new(),
            restaurant_id: Ulid::nil(),
            name: name.into(),
            capacity,
            created_at: Utc::now(),
        }
    }

    fn booking(table: &Table, time: &str, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            restaurant_id: table.restaurant_id,
            table_id: Some(table.id),
            table_name: Some(table.name.clone()),
            date: "2024-06-01T00:00:00.000Z".into(),
            time: time.into(),
            guests: Some(2),
            status,
            user_id: None,
            user_name: None,
            user_phone: None,
            user_email: None,
            occasion: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    fn names(tables: &[Table]) -> Vec<&str> {
        tables.iter().map(|t| t.name.as_str()).collect()
    }

    // ── windows ───────────────────────────────────────────

    #[test]
    fn window_is_three_hours() {
        assert_eq!(seating_window(at("7:00 PM")), Span::new(1140, 1320));
        assert_eq!(seating_window(at("12:00 AM")), Span::new(0, 180));
    }

    #[test]
    fn late_window_runs_past_midnight() {
        assert_eq!(seating_window(at("10:30 PM")), Span::new(1350, 1530));
        // Flat line: an early-morning seating on the same date record is
        // hours before, not after, the late one.
        assert!(!seatings_conflict(at("10:30 PM"), at("12:30 AM")));
    }

    #[test]
    fn conflict_iff_starts_less_than_a_seating_apart() {
        for a in (0..24 * 60).step_by(10) {
            for b in (0..24 * 60).step_by(10) {
                let ta = ClockTime::from_minutes(a).unwrap();
                let tb = ClockTime::from_minutes(b).unwrap();
                assert_eq!(
                    seatings_conflict(ta, tb),
                    (a - b).abs() < SEATING_MINUTES,
                    "{ta} vs {tb}"
                );
                assert_eq!(seatings_conflict(ta, tb), seatings_conflict(tb, ta));
            }
        }
    }

    #[test]
    fn back_to_back_is_not_a_conflict() {
        assert!(!seatings_conflict(at("7:00 PM"), at("10:00 PM")));
        assert!(seatings_conflict(at("7:00 PM"), at("9:59 PM")));
        assert!(seatings_conflict(at("7:00 PM"), at("7:00 PM")));
    }

    // ── find_conflict ─────────────────────────────────────

    #[test]
    fn inactive_statuses_never_block() {
        let t = table("T1", 2);
        let window = seating_window(at("7:00 PM"));
        for status in [ReservationStatus::Cancelled, ReservationStatus::Rejected] {
            let res = [booking(&t, "7:00 PM", status)];
            assert!(find_conflict(t.id, &window, &res).unwrap().is_none());
        }
        for status in [ReservationStatus::Pending, ReservationStatus::Confirmed] {
            let res = [booking(&t, "7:00 PM", status)];
            assert_eq!(find_conflict(t.id, &window, &res).unwrap().map(|r| r.id), Some(res[0].id));
        }
    }

    #[test]
    fn other_tables_are_ignored() {
        let t1 = table("T1", 2);
        let t2 = table("T2", 2);
        let res = [booking(&t2, "7:00 PM", ReservationStatus::Confirmed)];
        let window = seating_window(at("7:00 PM"));
        assert!(find_conflict(t1.id, &window, &res).unwrap().is_none());
    }

    #[test]
    fn damaged_stored_time_is_internal() {
        let t = table("T1", 2);
        let res = [booking(&t, "seven-ish", ReservationStatus::Pending)];
        let window = seating_window(at("7:00 PM"));
        let err = find_conflict(t.id, &window, &res).unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)), "{err}");
    }

    // ── free_tables ───────────────────────────────────────

    #[test]
    fn capacity_filter_applies_without_conflicts() {
        let tables = vec![table("T1", 2), table("T2", 4)];
        let free = free_tables(tables, &[], at("7:00 PM"), Some(3)).unwrap();
        assert_eq!(names(&free), vec!["T2"]);
    }

    #[test]
    fn capacity_boundary_is_inclusive() {
        let tables = vec![table("T1", 3)];
        let free = free_tables(tables, &[], at("7:00 PM"), Some(3)).unwrap();
        assert_eq!(names(&free), vec!["T1"]);
    }

    #[test]
    fn unassigned_reservations_do_not_block() {
        let t1 = table("T1", 2);
        let mut res = booking(&t1, "7:00 PM", ReservationStatus::Confirmed);
        res.table_id = None;
        let free = free_tables(vec![t1], &[res], at("7:00 PM"), None).unwrap();
        assert_eq!(names(&free), vec!["T1"]);
    }

    #[test]
    fn preserves_input_order() {
        let tables = vec![table("Table 1", 2), table("Table 2", 2), table("Table 10", 2)];
        let taken = booking(&tables[1], "8:00 PM", ReservationStatus::Pending);
        let free = free_tables(tables, &[taken], at("7:00 PM"), None).unwrap();
        assert_eq!(names(&free), vec!["Table 1", "Table 10"]);
    }

    #[test]
    fn no_tables_yields_empty() {
        assert!(free_tables(vec![], &[], at("7:00 PM"), None).unwrap().is_empty());
    }
}
