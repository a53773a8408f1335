use chrono::NaiveDate;

use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, today_local};

impl Engine {
    /// Cancel a booking, judging the cutoff against the local calendar.
    pub async fn cancel(&self, id: &BookingKey) -> Result<(), EngineError> {
        self.cancel_as_of(id, today_local()).await
    }

    /// Cancellation is allowed strictly BEFORE the booking's date: same-day
    /// and past bookings stay. The storage layer's access rules are the
    /// authoritative cutoff enforcement; this check is the engine's own
    /// line of defense.
    pub async fn cancel_as_of(&self, id: &BookingKey, today: NaiveDate) -> Result<(), EngineError> {
        let result = self.revoke(id, today).await;
        let status = match &result {
            Ok(()) => "ok",
            Err(e) => observability::rejection_label(e),
        };
        metrics::counter!(observability::CANCEL_TOTAL, "status" => status).increment(1);
        if result.is_ok() {
            metrics::gauge!(observability::BOOKINGS_ACTIVE).decrement(1.0);
        }
        result
    }

    async fn revoke(&self, id: &BookingKey, today: NaiveDate) -> Result<(), EngineError> {
        if !self.store.contains_booking(id) {
            return Err(EngineError::NotFound(id.clone()));
        }
        if id.date <= today {
            return Err(EngineError::CutoffViolation(id.date));
        }

        let mut guards = self.lock_ledgers(&id.student, id.date, &[id.start]).await?;

        // Re-check under the locks — a concurrent cancel may have won.
        if !self.store.contains_booking(id) {
            return Err(EngineError::NotFound(id.clone()));
        }

        let event = Event::ReservationCancelled {
            student: id.student.clone(),
            date: id.date,
            start: id.start,
        };
        self.wal_append(&event).await?;

        self.store.remove_booking(id);
        let (_, slot) = &mut guards.slots[0];
        if !slot.decrement_floored() {
            tracing::error!(key = %id.slot_key(), "slot counter underflow on cancellation");
        }
        guards.day.starts.remove(&id.start);
        if !guards.month.sub_hours_floored(1) {
            tracing::error!(key = %id.month_key(), "monthly usage underflow on cancellation");
        }

        self.notify.send(id.date, &event);
        Ok(())
    }
}
