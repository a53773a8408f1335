use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::limits::*;

/// Unix milliseconds — the only wall-clock type.
pub type Ms = i64;

/// One offered start hour. A slot is the hour `[start:00, start+1:00)` on a
/// given date. Constructible only for hours in the `OFFERED_STARTS` catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotStart(u8);

impl SlotStart {
    pub fn new(hour: u8) -> Option<Self> {
        OFFERED_STARTS.contains(&hour).then_some(Self(hour))
    }

    pub fn hour(self) -> u8 {
        self.0
    }
}

impl fmt::Display for SlotStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SlotStart {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u8>()
            .ok()
            .and_then(Self::new)
            .ok_or("start hour is not in the offered catalog")
    }
}

/// Opaque, already-authenticated student identifier supplied by the identity
/// collaborator. Restricted to letters, digits and `-` because `_` is the
/// separator in every composite key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(id: &str) -> Result<Self, &'static str> {
        if id.is_empty() {
            return Err("student id is empty");
        }
        if id.len() > MAX_STUDENT_ID_LEN {
            return Err("student id too long");
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err("student id may only contain letters, digits and '-'");
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Calendar month, displayed as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// ── Composite keys ───────────────────────────────────────────────
//
// Display forms match the persisted key layout:
//   slot counter   {date}_{start}
//   day usage      {student}_{date}
//   month usage    {student}_{yearMonth}
//   booking        {student}_{date}_{start}

/// Identity of one bookable hour.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub start: SlotStart,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.date, self.start)
    }
}

/// Per-student, per-day usage key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub student: StudentId,
    pub date: NaiveDate,
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.student, self.date)
    }
}

/// Per-student, per-month usage key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub student: StudentId,
    pub month: YearMonth,
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.student, self.month)
    }
}

/// The booking id. The composite key IS the record identity — a duplicate
/// booking collides on its key instead of needing a separate check.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BookingKey {
    pub student: StudentId,
    pub date: NaiveDate,
    pub start: SlotStart,
}

impl BookingKey {
    pub fn new(student: StudentId, date: NaiveDate, start: SlotStart) -> Self {
        Self { student, date, start }
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            date: self.date,
            start: self.start,
        }
    }

    pub fn day_key(&self) -> DayKey {
        DayKey {
            student: self.student.clone(),
            date: self.date,
        }
    }

    pub fn month_key(&self) -> MonthKey {
        MonthKey {
            student: self.student.clone(),
            month: YearMonth::of(self.date),
        }
    }
}

impl fmt::Display for BookingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.student, self.date, self.start)
    }
}

impl FromStr for BookingKey {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Student ids cannot contain '_', so the id splits into exactly
        // three parts.
        let mut parts = s.split('_');
        let (Some(student), Some(date), Some(start), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err("booking id must be student_date_start");
        };
        Ok(Self {
            student: StudentId::new(student)?,
            date: date.parse().map_err(|_| "bad date in booking id")?,
            start: start.parse()?,
        })
    }
}

// ── Ledger documents ─────────────────────────────────────────────

/// Occupancy counter for one slot. An absent document reads as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCounter {
    pub count: u32,
}

impl SlotCounter {
    pub fn increment(&mut self) {
        self.count += 1;
    }

    /// Floored decrement. Returns false when the counter was already zero,
    /// which is an invariant violation for the caller to log.
    pub fn decrement_floored(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        true
    }
}

/// The set of starts one student has booked on one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayUsage {
    pub starts: BTreeSet<SlotStart>,
}

/// Hours one student has booked in one calendar month. One accepted slot is
/// one hour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthUsage {
    pub used_hours: u32,
}

impl MonthUsage {
    pub fn add_hours(&mut self, hours: u32) {
        self.used_hours += hours;
    }

    /// Floored subtraction. Returns false on underflow.
    pub fn sub_hours_floored(&mut self, hours: u32) -> bool {
        if self.used_hours < hours {
            self.used_hours = 0;
            return false;
        }
        self.used_hours -= hours;
        true
    }
}

// ── Booking records ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subject {
    Japanese,
    Math,
    English,
    Science,
    SocialStudies,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purpose {
    Preparation,
    Review,
    Homework,
    TestPrep,
    CheckTest,
    Other,
}

/// How much explanation the student wants from staff during the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplanationLevel {
    Weak,
    Medium,
    Strong,
}

/// Student's own pass/fail mark on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelfMark {
    Good,
    Poor,
}

/// Cancellation deletes the record outright, so `Active` is the only state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    Draft,
    Confirmed,
}

/// What the student plans to do with the slot. Shared by every slot in one
/// reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub subject: Subject,
    pub purpose: Purpose,
    pub unit: String,
    pub memo: String,
    pub explanation_level: ExplanationLevel,
}

/// One accepted booking. Immutable until cancelled; cancellation deletes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub details: BookingDetails,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Student-entered reflection fields on a study record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub goal: String,
    pub reflection: String,
    pub self_mark: Option<SelfMark>,
}

/// The self-study record derived from a booking. Keyed by the same
/// `BookingKey`; outlives the booking if that is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyRecord {
    pub details: BookingDetails,
    pub entry: RecordEntry,
    pub teacher_comment: String,
    pub status: RecordStatus,
    pub confirmed_by: Option<String>,
    pub confirmed_at: Option<Ms>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

// ── WAL events ───────────────────────────────────────────────────

/// The WAL record format. One `ReservationCommitted` entry carries the whole
/// accepted batch, so a replayed log can never surface a partial commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCommitted {
        student: StudentId,
        date: NaiveDate,
        starts: Vec<SlotStart>,
        details: BookingDetails,
        created_at: Ms,
    },
    ReservationCancelled {
        student: StudentId,
        date: NaiveDate,
        start: SlotStart,
    },
    RecordCreated {
        id: BookingKey,
        record: StudyRecord,
    },
    RecordUpdated {
        id: BookingKey,
        entry: RecordEntry,
        updated_at: Ms,
    },
    RecordConfirmed {
        id: BookingKey,
        confirmed_by: String,
        teacher_comment: Option<String>,
        confirmed_at: Ms,
    },
}

// ── Result types ─────────────────────────────────────────────────

/// Returned by a successful `reserve` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingBatch {
    pub booking_ids: Vec<BookingKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub count: u32,
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSummary {
    pub used_hours: u32,
    pub cap: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: BookingKey,
    pub record: BookingRecord,
}
