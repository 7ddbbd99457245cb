use ulid::Ulid;

use crate::clock::ClockError;

#[derive(Debug)]
pub enum EngineError {
    /// A required field is missing or fails shape validation.
    InvalidArgument(String),
    /// `(kind, id)` of a table, restaurant, or reservation that does not exist.
    NotFound(&'static str, String),
    Forbidden(String),
    /// Booking overlaps the live reservation with this id.
    Conflict(Ulid),
    LimitExceeded(&'static str),
    /// Store or WAL failure, or stored data that no longer parses.
    Internal(String),
}

impl EngineError {
    pub(crate) fn missing(field: &str) -> Self {
        EngineError::InvalidArgument(format!("{field} is required"))
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound(kind, id.to_string())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::Conflict(id) => {
                write!(f, "table already booked for this seating by reservation {id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ClockError> for EngineError {
    fn from(e: ClockError) -> Self {
        EngineError::InvalidArgument(e.to_string())
    }
}
