use crate::limits::MAX_COMMENT_LEN;
use crate::model::*;

use super::{Engine, EngineError, lock_doc, now_ms};

/// Study-record lifecycle. Records are keyed by the same composite key as
/// the booking they were spawned from, and deliberately outlive it — a
/// cancelled booking removes nothing here.
///
/// Mutations serialize on the student's day-usage lock, which every caller
/// touching this key already contends on.
impl Engine {
    /// Create the study record for an active booking if it doesn't exist
    /// yet. Idempotent: an existing record is returned untouched.
    pub async fn ensure_record(&self, id: &BookingKey) -> Result<StudyRecord, EngineError> {
        let _day = lock_doc(self.store.day_doc(&id.day_key())).await?;

        if let Some(existing) = self.store.record(id) {
            return Ok(existing);
        }
        let booking = self
            .store
            .booking(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;

        let now = now_ms();
        let record = StudyRecord {
            details: booking.details,
            entry: RecordEntry::default(),
            teacher_comment: String::new(),
            status: RecordStatus::Draft,
            confirmed_by: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::RecordCreated {
            id: id.clone(),
            record: record.clone(),
        };
        self.wal_append(&event).await?;
        Ok(self.store.insert_record_if_absent(id.clone(), record))
    }

    /// Store the student-entered goal/reflection/self-mark.
    pub async fn update_record(&self, id: &BookingKey, entry: RecordEntry) -> Result<(), EngineError> {
        if entry.goal.len() > MAX_COMMENT_LEN || entry.reflection.len() > MAX_COMMENT_LEN {
            return Err(EngineError::InvalidRequest("reflection text too long"));
        }
        let _day = lock_doc(self.store.day_doc(&id.day_key())).await?;
        if self.store.record(id).is_none() {
            return Err(EngineError::NotFound(id.clone()));
        }

        let updated_at = now_ms();
        let event = Event::RecordUpdated {
            id: id.clone(),
            entry: entry.clone(),
            updated_at,
        };
        self.wal_append(&event).await?;
        self.store.modify_record(id, |r| {
            r.entry = entry;
            r.updated_at = updated_at;
        });
        Ok(())
    }

    /// Staff confirmation: Draft → Confirmed, with an optional comment.
    pub async fn confirm_record(
        &self,
        id: &BookingKey,
        confirmed_by: &str,
        teacher_comment: Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(ref comment) = teacher_comment
            && comment.len() > MAX_COMMENT_LEN
        {
            return Err(EngineError::InvalidRequest("teacher comment too long"));
        }
        let _day = lock_doc(self.store.day_doc(&id.day_key())).await?;
        if self.store.record(id).is_none() {
            return Err(EngineError::NotFound(id.clone()));
        }

        let confirmed_at = now_ms();
        let event = Event::RecordConfirmed {
            id: id.clone(),
            confirmed_by: confirmed_by.to_string(),
            teacher_comment: teacher_comment.clone(),
            confirmed_at,
        };
        self.wal_append(&event).await?;
        self.store.modify_record(id, |r| {
            r.status = RecordStatus::Confirmed;
            r.confirmed_by = Some(confirmed_by.to_string());
            if let Some(comment) = teacher_comment {
                r.teacher_comment = comment;
            }
            r.confirmed_at = Some(confirmed_at);
            r.updated_at = confirmed_at;
        });
        Ok(())
    }

    pub fn get_record(&self, id: &BookingKey) -> Option<StudyRecord> {
        self.store.record(id)
    }
}
