use chrono::NaiveDate;

use crate::limits::{DAILY_MAX_SLOTS, MAX_SEATS_PER_SLOT, MONTHLY_MAX_HOURS};
use crate::model::{BookingKey, SlotStart};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input — a caller bug, never retried.
    InvalidRequest(&'static str),
    MonthlyQuotaExceeded { used: u32, requested: u32 },
    DailyQuotaExceeded { booked: usize, requested: usize },
    SlotFull(SlotStart),
    DuplicateBooking(BookingKey),
    /// Cancellation is allowed strictly before the booking date.
    CutoffViolation(NaiveDate),
    NotFound(BookingKey),
    /// Transient: ledger locks could not be acquired within the bounded
    /// wait. The whole call may be retried from scratch.
    Contention,
    WalError(String),
}

impl EngineError {
    /// Only `Contention` is safe to retry without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::MonthlyQuotaExceeded { used, requested } => write!(
                f,
                "monthly limit of {MONTHLY_MAX_HOURS} hours exceeded: {used} used, {requested} requested"
            ),
            Self::DailyQuotaExceeded { booked, requested } => write!(
                f,
                "daily limit of {DAILY_MAX_SLOTS} slots exceeded: {booked} booked, {requested} requested"
            ),
            Self::SlotFull(start) => {
                write!(f, "the {start}:00 slot is full ({MAX_SEATS_PER_SLOT} seats)")
            }
            Self::DuplicateBooking(key) => write!(f, "already booked: {key}"),
            Self::CutoffViolation(date) => {
                write!(f, "bookings for {date} can only be cancelled before that day")
            }
            Self::NotFound(key) => write!(f, "no active booking: {key}"),
            Self::Contention => write!(f, "the ledgers are busy, please retry"),
            Self::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
