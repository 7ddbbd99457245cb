use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;

use super::availability::find_conflict;
use super::store::DocumentStore;
use super::EngineError;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a caller-supplied id. Absent or blank is a missing field; anything
/// else that is not a ULID is malformed.
pub(crate) fn parse_id(field: &str, raw: Option<&str>) -> Result<Ulid, EngineError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let raw = raw.ok_or_else(|| EngineError::missing(field))?;
    Ulid::from_string(raw)
        .map_err(|_| EngineError::InvalidArgument(format!("{field} is not a valid id: {raw:?}")))
}

/// Required, non-blank text. The value is returned untrimmed: date tokens are
/// matched byte-for-byte later.
pub(crate) fn require_text<'a>(field: &str, raw: Option<&'a str>) -> Result<&'a str, EngineError> {
    match raw {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(EngineError::missing(field)),
    }
}

pub(crate) fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn check_optional_len(
    value: Option<&str>,
    max: usize,
    what: &'static str,
) -> Result<(), EngineError> {
    value.map_or(Ok(()), |v| check_len(v, max, what))
}

/// `max(1, capacity)`, saturating at the top of the range.
pub(crate) fn normalize_capacity(raw: i64) -> u32 {
    raw.clamp(1, i64::from(u32::MAX)) as u32
}

/// URL slug for a restaurant name: lowercased, word characters only, with
/// runs of whitespace, `_` and `-` collapsed to a single `-`.
pub(crate) fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '_' || c == '-' {
            pending_dash = true;
        }
    }
    slug
}

/// Re-run the seating test against the live ledger. Callers hold the slot
/// lock for `(restaurant_id, table_id, date)` so nothing can slip in between
/// this check and the append that follows.
pub(crate) fn check_no_conflict(
    store: &DocumentStore,
    restaurant_id: &Ulid,
    table_id: Ulid,
    date: &str,
    window: &Span,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    let day = store.reservations_on(restaurant_id, date);
    let others = day.iter().filter(|r| Some(r.id) != ignore);
    if let Some(existing) = find_conflict(table_id, window, others)? {
        metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
        tracing::info!(
            "reservation rejected: table {table_id} on {date:?} already held by {}",
            existing.id
        );
        return Err(EngineError::Conflict(existing.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_rules() {
        assert_eq!(slugify("Luigi's Trattoria"), "luigis-trattoria");
        assert_eq!(slugify("  The   Blue__Door -- Cafe  "), "the-blue-door-cafe");
        assert_eq!(slugify("--Pho 24--"), "pho-24");
        assert_eq!(slugify("Café Ümlaut"), "caf-mlaut");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(normalize_capacity(4), 4);
        assert_eq!(normalize_capacity(0), 1);
        assert_eq!(normalize_capacity(-3), 1);
        assert_eq!(normalize_capacity(i64::MAX), u32::MAX);
    }

    #[test]
    fn id_parsing() {
        let id = Ulid::new();
        assert_eq!(parse_id("tableId", Some(&id.to_string())).unwrap(), id);
        assert!(matches!(parse_id("tableId", None), Err(EngineError::InvalidArgument(_))));
        assert!(matches!(parse_id("tableId", Some("  ")), Err(EngineError::InvalidArgument(_))));
        let err = parse_id("tableId", Some("table-1")).unwrap_err();
        assert!(err.to_string().contains("not a valid id"), "{err}");
    }

    #[test]
    fn required_text_keeps_original_bytes() {
        assert_eq!(require_text("date", Some(" 2024-06-01 ")).unwrap(), " 2024-06-01 ");
        assert!(require_text("date", Some("")).is_err());
        assert!(require_text("date", None).is_err());
    }
}
