use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedDoc<T> = Arc<RwLock<T>>;

/// In-memory ledger collections, one map per persisted collection:
/// slot counters, per-day usage, per-month usage, booking records, and
/// study records.
///
/// Counter documents are created lazily — an absent document reads as zero.
/// Booking and study records live as plain map entries; every mutation of a
/// record happens while the engine holds the write guards that cover it.
pub struct LedgerStore {
    slots: DashMap<SlotKey, SharedDoc<SlotCounter>>,
    days: DashMap<DayKey, SharedDoc<DayUsage>>,
    months: DashMap<MonthKey, SharedDoc<MonthUsage>>,
    bookings: DashMap<BookingKey, BookingRecord>,
    records: DashMap<BookingKey, StudyRecord>,
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            days: DashMap::new(),
            months: DashMap::new(),
            bookings: DashMap::new(),
            records: DashMap::new(),
        }
    }

    // ── Counter documents (get-or-create) ────────────────────

    pub fn slot_doc(&self, key: &SlotKey) -> SharedDoc<SlotCounter> {
        self.slots.entry(key.clone()).or_default().value().clone()
    }

    pub fn day_doc(&self, key: &DayKey) -> SharedDoc<DayUsage> {
        self.days.entry(key.clone()).or_default().value().clone()
    }

    pub fn month_doc(&self, key: &MonthKey) -> SharedDoc<MonthUsage> {
        self.months.entry(key.clone()).or_default().value().clone()
    }

    // ── Booking records ──────────────────────────────────────

    pub fn booking(&self, key: &BookingKey) -> Option<BookingRecord> {
        self.bookings.get(key).map(|e| e.value().clone())
    }

    pub fn contains_booking(&self, key: &BookingKey) -> bool {
        self.bookings.contains_key(key)
    }

    pub fn insert_booking(&self, key: BookingKey, record: BookingRecord) {
        self.bookings.insert(key, record);
    }

    pub fn remove_booking(&self, key: &BookingKey) -> Option<BookingRecord> {
        self.bookings.remove(key).map(|(_, record)| record)
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    // ── Study records ────────────────────────────────────────

    pub fn record(&self, key: &BookingKey) -> Option<StudyRecord> {
        self.records.get(key).map(|e| e.value().clone())
    }

    /// Create-if-absent. Returns the stored record either way.
    pub fn insert_record_if_absent(&self, key: BookingKey, record: StudyRecord) -> StudyRecord {
        self.records.entry(key).or_insert(record).value().clone()
    }

    /// Apply `mutate` to an existing record. Returns false if absent.
    pub fn modify_record(&self, key: &BookingKey, mutate: impl FnOnce(&mut StudyRecord)) -> bool {
        match self.records.get_mut(key) {
            Some(mut entry) => {
                mutate(entry.value_mut());
                true
            }
            None => false,
        }
    }

    // ── Listings ─────────────────────────────────────────────

    pub fn bookings_for_day(&self, student: &StudentId, date: NaiveDate) -> Vec<BookingInfo> {
        let mut out: Vec<BookingInfo> = self
            .bookings
            .iter()
            .filter(|e| e.key().student == *student && e.key().date == date)
            .map(|e| BookingInfo {
                id: e.key().clone(),
                record: e.value().clone(),
            })
            .collect();
        out.sort_by_key(|b| b.id.start);
        out
    }

    pub fn bookings_for_month(&self, student: &StudentId, month: YearMonth) -> Vec<BookingInfo> {
        let mut out: Vec<BookingInfo> = self
            .bookings
            .iter()
            .filter(|e| e.key().student == *student && YearMonth::of(e.key().date) == month)
            .map(|e| BookingInfo {
                id: e.key().clone(),
                record: e.value().clone(),
            })
            .collect();
        out.sort_by_key(|b| (b.id.date, b.id.start));
        out
    }

    pub fn bookings_on_date(&self, date: NaiveDate) -> Vec<BookingInfo> {
        let mut out: Vec<BookingInfo> = self
            .bookings
            .iter()
            .filter(|e| e.key().date == date)
            .map(|e| BookingInfo {
                id: e.key().clone(),
                record: e.value().clone(),
            })
            .collect();
        out.sort_by(|a, b| (a.id.start, &a.id.student).cmp(&(b.id.start, &b.id.student)));
        out
    }

    // ── Event application (replay path) ──────────────────────

    /// Apply one WAL event. Used only while replaying at startup, when this
    /// store is not yet shared — the try_write calls cannot contend.
    pub fn apply(&self, event: &Event) {
        match event {
            Event::ReservationCommitted {
                student,
                date,
                starts,
                details,
                created_at,
            } => {
                for start in starts {
                    let key = BookingKey::new(student.clone(), *date, *start);
                    self.slot_doc(&key.slot_key())
                        .try_write()
                        .expect("replay: uncontended write")
                        .increment();
                    self.insert_booking(
                        key,
                        BookingRecord {
                            details: details.clone(),
                            status: BookingStatus::Active,
                            created_at: *created_at,
                            updated_at: *created_at,
                        },
                    );
                }
                let day = DayKey {
                    student: student.clone(),
                    date: *date,
                };
                self.day_doc(&day)
                    .try_write()
                    .expect("replay: uncontended write")
                    .starts
                    .extend(starts.iter().copied());
                let month = MonthKey {
                    student: student.clone(),
                    month: YearMonth::of(*date),
                };
                self.month_doc(&month)
                    .try_write()
                    .expect("replay: uncontended write")
                    .add_hours(starts.len() as u32);
            }
            Event::ReservationCancelled { student, date, start } => {
                let key = BookingKey::new(student.clone(), *date, *start);
                self.remove_booking(&key);
                self.slot_doc(&key.slot_key())
                    .try_write()
                    .expect("replay: uncontended write")
                    .decrement_floored();
                self.day_doc(&key.day_key())
                    .try_write()
                    .expect("replay: uncontended write")
                    .starts
                    .remove(start);
                self.month_doc(&key.month_key())
                    .try_write()
                    .expect("replay: uncontended write")
                    .sub_hours_floored(1);
            }
            Event::RecordCreated { id, record } => {
                self.insert_record_if_absent(id.clone(), record.clone());
            }
            Event::RecordUpdated { id, entry, updated_at } => {
                self.modify_record(id, |r| {
                    r.entry = entry.clone();
                    r.updated_at = *updated_at;
                });
            }
            Event::RecordConfirmed {
                id,
                confirmed_by,
                teacher_comment,
                confirmed_at,
            } => {
                self.modify_record(id, |r| {
                    r.status = RecordStatus::Confirmed;
                    r.confirmed_by = Some(confirmed_by.clone());
                    if let Some(comment) = teacher_comment {
                        r.teacher_comment = comment.clone();
                    }
                    r.confirmed_at = Some(*confirmed_at);
                    r.updated_at = *confirmed_at;
                });
            }
        }
    }

    /// The minimal event sequence that recreates current state: one commit
    /// per active booking, then the record events. Ordering is deterministic
    /// so back-to-back compactions produce identical logs.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut booking_keys: Vec<BookingKey> = self.bookings.iter().map(|e| e.key().clone()).collect();
        booking_keys.sort();

        let mut events = Vec::with_capacity(booking_keys.len() + self.records.len());
        for key in booking_keys {
            if let Some(record) = self.booking(&key) {
                events.push(Event::ReservationCommitted {
                    student: key.student,
                    date: key.date,
                    starts: vec![key.start],
                    details: record.details,
                    created_at: record.created_at,
                });
            }
        }

        let mut record_keys: Vec<BookingKey> = self.records.iter().map(|e| e.key().clone()).collect();
        record_keys.sort();
        for key in record_keys {
            if let Some(record) = self.record(&key) {
                events.push(Event::RecordCreated { id: key, record });
            }
        }

        events
    }
}
