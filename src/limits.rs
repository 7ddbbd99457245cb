pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TEXT_FIELD_LEN: usize = 1024;
pub const MAX_DATE_TOKEN_LEN: usize = 64;

pub const MAX_RESTAURANTS: usize = 10_000;
pub const MAX_TABLES_PER_RESTAURANT: usize = 1_000;
pub const MAX_RESERVATIONS_PER_RESTAURANT: usize = 100_000;

/// Upper bound on a single party. Larger requests are almost certainly typos.
pub const MAX_GUESTS: u32 = 1_000;
