use crate::model::Ms;

/// Earliest accepted booking timestamp (2000-01-01T00:00:00Z).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// Latest accepted booking timestamp (2200-01-01T00:00:00Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
/// A single booking may not run longer than a year.
pub const MAX_BOOKING_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_BOOKINGS_PER_ITEM: usize = 100_000;
pub const MAX_ITEMS_PER_TENANT: usize = 1_000_000;
pub const MAX_USERS_PER_TENANT: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_DESCRIPTION_LEN: usize = 4096;

pub const MAX_PAGE_SIZE: usize = 1000;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;
