//! Every tunable limit in one place.

/// Max students admitted into one slot.
pub const MAX_SEATS_PER_SLOT: u32 = 20;

/// Max slots one student may book per day (= hours, slots are one hour).
pub const DAILY_MAX_SLOTS: usize = 2;

/// Max hours one student may book per calendar month.
pub const MONTHLY_MAX_HOURS: u32 = 30;

/// The catalog of offered start hours. A slot is one hour starting on the hour.
pub const OFFERED_STARTS: [u8; 6] = [15, 16, 17, 18, 19, 20];

/// Student identifiers are caller-supplied; keep them short.
pub const MAX_STUDENT_ID_LEN: usize = 64;

/// Free-text metadata fields on a booking (unit, memo).
pub const MAX_TEXT_LEN: usize = 512;

/// Student-entered reflection fields and teacher comments.
pub const MAX_COMMENT_LEN: usize = 2000;

/// How long a call waits for ledger write locks before giving up
/// with `Contention`.
pub const LOCK_WAIT_MS: u64 = 2_000;

/// Backpressure bound on the group-commit WAL channel.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;

/// Default appends-since-compact threshold for the background compactor.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
