use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, now_ms};

impl Engine {
    /// Book one or more slots on one date for one student.
    ///
    /// All-or-nothing: if any requested slot fails validation the whole
    /// batch is rejected and no ledger changes. Slots are processed in
    /// ascending start order, which fixes WHICH error surfaces first when
    /// several slots are invalid — it never changes the outcome.
    pub async fn reserve(
        &self,
        student: &StudentId,
        date: NaiveDate,
        starts: &[SlotStart],
        details: BookingDetails,
    ) -> Result<BookingBatch, EngineError> {
        let result = self.admit(student, date, starts, details).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => observability::rejection_label(e),
        };
        metrics::counter!(observability::RESERVE_TOTAL, "status" => status).increment(1);
        if result.is_ok() {
            metrics::gauge!(observability::BOOKINGS_ACTIVE).increment(starts.len() as f64);
        }
        result
    }

    async fn admit(
        &self,
        student: &StudentId,
        date: NaiveDate,
        starts: &[SlotStart],
        details: BookingDetails,
    ) -> Result<BookingBatch, EngineError> {
        if starts.is_empty() || starts.len() > DAILY_MAX_SLOTS {
            return Err(EngineError::InvalidRequest(
                "a request must book between one slot and the daily limit",
            ));
        }
        let mut ordered: Vec<SlotStart> = starts.to_vec();
        ordered.sort_unstable();
        if ordered.windows(2).any(|w| w[0] == w[1]) {
            return Err(EngineError::InvalidRequest("duplicate start in request"));
        }
        if details.unit.len() > MAX_TEXT_LEN || details.memo.len() > MAX_TEXT_LEN {
            return Err(EngineError::InvalidRequest("metadata text too long"));
        }

        let mut guards = self.lock_ledgers(student, date, &ordered).await?;

        // Validation reads go through the held guards, never a pre-lock
        // probe. Fixed check order keeps the surfaced error deterministic.
        let requested = ordered.len();
        if guards.month.used_hours + requested as u32 > MONTHLY_MAX_HOURS {
            return Err(EngineError::MonthlyQuotaExceeded {
                used: guards.month.used_hours,
                requested: requested as u32,
            });
        }
        if guards.day.starts.len() + requested > DAILY_MAX_SLOTS {
            return Err(EngineError::DailyQuotaExceeded {
                booked: guards.day.starts.len(),
                requested,
            });
        }
        for (start, slot) in &guards.slots {
            if slot.count >= MAX_SEATS_PER_SLOT {
                return Err(EngineError::SlotFull(*start));
            }
        }
        let booking_ids: Vec<BookingKey> = ordered
            .iter()
            .map(|start| BookingKey::new(student.clone(), date, *start))
            .collect();
        for id in &booking_ids {
            if self.store.contains_booking(id) {
                return Err(EngineError::DuplicateBooking(id.clone()));
            }
        }

        // Durable before visible. One WAL entry carries the whole batch;
        // replay can never see a partial commit.
        let created_at = now_ms();
        let event = Event::ReservationCommitted {
            student: student.clone(),
            date,
            starts: ordered.clone(),
            details: details.clone(),
            created_at,
        };
        self.wal_append(&event).await?;

        for (id, (_, slot)) in booking_ids.iter().zip(guards.slots.iter_mut()) {
            slot.increment();
            self.store.insert_booking(
                id.clone(),
                BookingRecord {
                    details: details.clone(),
                    status: BookingStatus::Active,
                    created_at,
                    updated_at: created_at,
                },
            );
        }
        guards.day.starts.extend(ordered.iter().copied());
        guards.month.add_hours(requested as u32);

        self.notify.send(date, &event);
        Ok(BookingBatch { booking_ids })
    }
}
