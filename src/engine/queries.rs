use chrono::NaiveDate;

use crate::limits::{MAX_SEATS_PER_SLOT, MONTHLY_MAX_HOURS};
use crate::model::*;

use super::Engine;

/// Read-only queries for the presentation collaborator. Eventually
/// consistent is fine here — admission re-reads everything under its own
/// locks at commit time.
impl Engine {
    pub async fn get_occupancy(&self, date: NaiveDate, start: SlotStart) -> Occupancy {
        let doc = self.store.slot_doc(&SlotKey { date, start });
        let count = doc.read().await.count;
        Occupancy {
            count,
            capacity: MAX_SEATS_PER_SLOT,
        }
    }

    pub async fn get_usage(&self, student: &StudentId, month: YearMonth) -> UsageSummary {
        let doc = self.store.month_doc(&MonthKey {
            student: student.clone(),
            month,
        });
        let used_hours = doc.read().await.used_hours;
        UsageSummary {
            used_hours,
            cap: MONTHLY_MAX_HOURS,
        }
    }

    /// The starts a student has booked on one day, ascending.
    pub async fn booked_starts(&self, student: &StudentId, date: NaiveDate) -> Vec<SlotStart> {
        let doc = self.store.day_doc(&DayKey {
            student: student.clone(),
            date,
        });
        let guard = doc.read().await;
        guard.starts.iter().copied().collect()
    }

    pub fn get_booking(&self, id: &BookingKey) -> Option<BookingRecord> {
        self.store.booking(id)
    }

    pub fn bookings_for_day(&self, student: &StudentId, date: NaiveDate) -> Vec<BookingInfo> {
        self.store.bookings_for_day(student, date)
    }

    pub fn bookings_for_month(&self, student: &StudentId, month: YearMonth) -> Vec<BookingInfo> {
        self.store.bookings_for_month(student, month)
    }

    /// Staff view: every booking on one date, ordered by start then student.
    pub fn bookings_on_date(&self, date: NaiveDate) -> Vec<BookingInfo> {
        self.store.bookings_on_date(date)
    }
}
