//! Hard resource caps. These are defensive bounds on untrusted input, not
//! tuning knobs — exceeding one returns `LimitExceeded` to the caller.

use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_SLOTS_PER_TENANT: usize = 100_000;
pub const MAX_LOCKS_PER_SLOT: usize = 256;
pub const MAX_BOOKINGS_PER_SLOT: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PHONE_LEN: usize = 64;
pub const MAX_NOTES_LEN: usize = 2048;
pub const MAX_SESSION_LEN: usize = 256;

/// Largest party a single booking or lock may cover.
pub const MAX_PARTY_SIZE: u32 = 1_000;

/// 1970..2100, in unix ms. Timestamps outside this range are input errors.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest slot window (start..end) accepted: 7 days.
pub const MAX_SLOT_DURATION_MS: Ms = 7 * 24 * 3_600_000;

/// Widest availability query window: 366 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

/// Longest checkout hold: 1 hour.
pub const MAX_LOCK_TTL_MS: Ms = 3_600_000;

/// How long a transaction waits for a contended slot guard before failing
/// with the retryable `TransactionConflict`.
pub const LOCK_WAIT_TIMEOUT_MS: u64 = 5_000;
