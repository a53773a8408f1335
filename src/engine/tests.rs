use super::*;
use crate::limits::*;

// ── Helpers ──────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("studiobook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn mk_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn sid(s: &str) -> StudentId {
    StudentId::new(s).unwrap()
}

fn st(h: u8) -> SlotStart {
    SlotStart::new(h).unwrap()
}

fn details() -> BookingDetails {
    BookingDetails {
        subject: Subject::Math,
        purpose: Purpose::Review,
        unit: "fractions".into(),
        memo: String::new(),
        explanation_level: ExplanationLevel::Medium,
    }
}

// ── Admission ────────────────────────────────────────────

#[tokio::test]
async fn reserve_single_slot() {
    let engine = mk_engine("reserve_single.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    let batch = engine.reserve(&s1, date, &[st(17)], details()).await.unwrap();
    assert_eq!(
        batch.booking_ids,
        vec![BookingKey::new(s1.clone(), date, st(17))]
    );

    let occ = engine.get_occupancy(date, st(17)).await;
    assert_eq!(occ.count, 1);
    assert_eq!(occ.capacity, MAX_SEATS_PER_SLOT);

    let usage = engine.get_usage(&s1, YearMonth::of(date)).await;
    assert_eq!(usage.used_hours, 1);
    assert_eq!(usage.cap, MONTHLY_MAX_HOURS);

    assert_eq!(engine.booked_starts(&s1, date).await, vec![st(17)]);

    let record = engine.get_booking(&batch.booking_ids[0]).unwrap();
    assert_eq!(record.status, BookingStatus::Active);
    assert_eq!(record.created_at, record.updated_at);
}

#[tokio::test]
async fn reserve_batch_commits_in_ascending_order() {
    let engine = mk_engine("reserve_batch.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    // Passed descending — committed (and reported) ascending.
    let batch = engine
        .reserve(&s1, date, &[st(16), st(15)], details())
        .await
        .unwrap();
    let starts: Vec<SlotStart> = batch.booking_ids.iter().map(|id| id.start).collect();
    assert_eq!(starts, vec![st(15), st(16)]);

    assert_eq!(engine.get_occupancy(date, st(15)).await.count, 1);
    assert_eq!(engine.get_occupancy(date, st(16)).await.count, 1);
    assert_eq!(engine.get_usage(&s1, YearMonth::of(date)).await.used_hours, 2);
}

#[tokio::test]
async fn reserve_rejects_malformed_requests() {
    let engine = mk_engine("reserve_malformed.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    let empty = engine.reserve(&s1, date, &[], details()).await;
    assert!(matches!(empty, Err(EngineError::InvalidRequest(_))));

    let too_many = engine
        .reserve(&s1, date, &[st(15), st(16), st(17)], details())
        .await;
    assert!(matches!(too_many, Err(EngineError::InvalidRequest(_))));

    let duplicated = engine.reserve(&s1, date, &[st(15), st(15)], details()).await;
    assert!(matches!(duplicated, Err(EngineError::InvalidRequest(_))));

    // None of the rejected requests touched any ledger.
    assert_eq!(engine.get_occupancy(date, st(15)).await.count, 0);
    assert_eq!(engine.get_usage(&s1, YearMonth::of(date)).await.used_hours, 0);
}

#[tokio::test]
async fn slot_fills_at_capacity() {
    let engine = mk_engine("slot_full.wal");
    let date = d("2026-02-08");

    for i in 0..MAX_SEATS_PER_SLOT - 1 {
        let s = sid(&format!("s{i}"));
        engine.reserve(&s, date, &[st(17)], details()).await.unwrap();
    }
    assert_eq!(engine.get_occupancy(date, st(17)).await.count, 19);

    // Seat 20 is admitted…
    engine
        .reserve(&sid("s19"), date, &[st(17)], details())
        .await
        .unwrap();
    assert_eq!(engine.get_occupancy(date, st(17)).await.count, MAX_SEATS_PER_SLOT);

    // …seat 21 is not, and the counter stays put.
    let overflow = engine.reserve(&sid("s20"), date, &[st(17)], details()).await;
    assert!(matches!(overflow, Err(EngineError::SlotFull(start)) if start == st(17)));
    assert_eq!(engine.get_occupancy(date, st(17)).await.count, MAX_SEATS_PER_SLOT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_never_overshoot_capacity() {
    let engine = Arc::new(mk_engine("concurrent_capacity.wal"));
    let date = d("2026-02-08");

    let mut handles = Vec::new();
    for i in 0..30 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let s = sid(&format!("racer{i}"));
            engine.reserve(&s, date, &[st(17)], details()).await
        }));
    }

    let mut admitted = 0u32;
    let mut rejected = 0u32;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(EngineError::SlotFull(_)) => rejected += 1,
            Err(e) => panic!("unexpected rejection: {e}"),
        }
    }

    assert_eq!(admitted, MAX_SEATS_PER_SLOT);
    assert_eq!(rejected, 30 - MAX_SEATS_PER_SLOT);
    assert_eq!(engine.get_occupancy(date, st(17)).await.count, MAX_SEATS_PER_SLOT);
}

#[tokio::test]
async fn monthly_quota_is_enforced() {
    let engine = mk_engine("monthly_quota.wal");
    let s1 = sid("s1");
    let month = YearMonth { year: 2026, month: 3 };

    // 14 days × 2 slots + 1 = 29 hours.
    for day in 1..=14 {
        let date = d(&format!("2026-03-{day:02}"));
        engine
            .reserve(&s1, date, &[st(15), st(16)], details())
            .await
            .unwrap();
    }
    engine
        .reserve(&s1, d("2026-03-15"), &[st(15)], details())
        .await
        .unwrap();
    assert_eq!(engine.get_usage(&s1, month).await.used_hours, 29);

    // Two more hours would overshoot 30 — rejected, usage untouched.
    let over = engine
        .reserve(&s1, d("2026-03-16"), &[st(15), st(16)], details())
        .await;
    assert!(matches!(
        over,
        Err(EngineError::MonthlyQuotaExceeded { used: 29, requested: 2 })
    ));
    assert_eq!(engine.get_usage(&s1, month).await.used_hours, 29);

    // One more hour exactly reaches the cap…
    engine
        .reserve(&s1, d("2026-03-16"), &[st(15)], details())
        .await
        .unwrap();
    assert_eq!(engine.get_usage(&s1, month).await.used_hours, 30);

    // …and the month is closed.
    let closed = engine.reserve(&s1, d("2026-03-17"), &[st(15)], details()).await;
    assert!(matches!(closed, Err(EngineError::MonthlyQuotaExceeded { .. })));

    // A different month is unaffected.
    engine
        .reserve(&s1, d("2026-04-01"), &[st(15)], details())
        .await
        .unwrap();
}

#[tokio::test]
async fn daily_quota_is_enforced() {
    let engine = mk_engine("daily_quota.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    engine
        .reserve(&s1, date, &[st(15), st(16)], details())
        .await
        .unwrap();

    let third = engine.reserve(&s1, date, &[st(17)], details()).await;
    assert!(matches!(
        third,
        Err(EngineError::DailyQuotaExceeded { booked: 2, requested: 1 })
    ));

    // The next day is unaffected.
    engine
        .reserve(&s1, d("2026-02-09"), &[st(17)], details())
        .await
        .unwrap();
}

#[tokio::test]
async fn duplicate_booking_rejected() {
    let engine = mk_engine("duplicate.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    engine.reserve(&s1, date, &[st(18)], details()).await.unwrap();

    let again = engine.reserve(&s1, date, &[st(18)], details()).await;
    let expected = BookingKey::new(s1.clone(), date, st(18));
    assert!(matches!(again, Err(EngineError::DuplicateBooking(key)) if key == expected));

    assert_eq!(engine.get_occupancy(date, st(18)).await.count, 1);
    assert_eq!(engine.get_usage(&s1, YearMonth::of(date)).await.used_hours, 1);
}

// ── Atomicity ────────────────────────────────────────────

#[tokio::test]
async fn failed_batch_leaves_every_ledger_unchanged() {
    let engine = mk_engine("atomic_batch.wal");
    let date = d("2026-02-08");

    // Fill 17:00 completely.
    for i in 0..MAX_SEATS_PER_SLOT {
        engine
            .reserve(&sid(&format!("filler{i}")), date, &[st(17)], details())
            .await
            .unwrap();
    }

    let s99 = sid("s99");
    let occupancy_16_before = engine.get_occupancy(date, st(16)).await;
    let usage_before = engine.get_usage(&s99, YearMonth::of(date)).await;

    // 16:00 is free, 17:00 is full — the whole batch must be rejected.
    let batch = engine.reserve(&s99, date, &[st(16), st(17)], details()).await;
    assert!(matches!(batch, Err(EngineError::SlotFull(start)) if start == st(17)));

    assert_eq!(engine.get_occupancy(date, st(16)).await, occupancy_16_before);
    assert_eq!(engine.get_usage(&s99, YearMonth::of(date)).await, usage_before);
    assert!(engine.booked_starts(&s99, date).await.is_empty());
    assert!(engine.bookings_for_day(&s99, date).is_empty());
}

#[tokio::test]
async fn failed_daily_quota_batch_is_all_or_nothing() {
    let engine = mk_engine("atomic_daily.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    engine.reserve(&s1, date, &[st(15)], details()).await.unwrap();

    // 1 booked + 2 requested exceeds the daily cap of 2 — nothing commits.
    let batch = engine.reserve(&s1, date, &[st(16), st(17)], details()).await;
    assert!(matches!(batch, Err(EngineError::DailyQuotaExceeded { .. })));

    assert_eq!(engine.get_occupancy(date, st(16)).await.count, 0);
    assert_eq!(engine.get_occupancy(date, st(17)).await.count, 0);
    assert_eq!(engine.get_usage(&s1, YearMonth::of(date)).await.used_hours, 1);
}

#[tokio::test]
async fn monthly_usage_tracks_active_bookings() {
    let engine = mk_engine("usage_tracks.wal");
    let s1 = sid("s1");
    let month = YearMonth { year: 2026, month: 2 };

    engine
        .reserve(&s1, d("2026-02-08"), &[st(15), st(16)], details())
        .await
        .unwrap();
    engine
        .reserve(&s1, d("2026-02-09"), &[st(17)], details())
        .await
        .unwrap();

    let cancelled = BookingKey::new(s1.clone(), d("2026-02-09"), st(17));
    engine.cancel_as_of(&cancelled, d("2026-02-01")).await.unwrap();

    let usage = engine.get_usage(&s1, month).await.used_hours;
    let active = engine.bookings_for_month(&s1, month).len();
    assert_eq!(usage as usize, active);
    assert_eq!(usage, 2);
}

// ── Cancellation ─────────────────────────────────────────

#[tokio::test]
async fn cancel_before_booking_date_reverses_all_ledgers() {
    let engine = mk_engine("cancel_ok.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    let batch = engine.reserve(&s1, date, &[st(17)], details()).await.unwrap();
    let id = &batch.booking_ids[0];

    engine.cancel_as_of(id, d("2026-02-07")).await.unwrap();

    assert_eq!(engine.get_occupancy(date, st(17)).await.count, 0);
    assert_eq!(engine.get_usage(&s1, YearMonth::of(date)).await.used_hours, 0);
    assert!(engine.booked_starts(&s1, date).await.is_empty());
    assert!(engine.get_booking(id).is_none());

    // The freed slot can be booked again.
    engine.reserve(&s1, date, &[st(17)], details()).await.unwrap();
}

#[tokio::test]
async fn same_day_cancellation_is_rejected() {
    let engine = mk_engine("cancel_cutoff.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    let batch = engine.reserve(&s1, date, &[st(17)], details()).await.unwrap();
    let id = &batch.booking_ids[0];

    let same_day = engine.cancel_as_of(id, d("2026-02-08")).await;
    assert!(matches!(same_day, Err(EngineError::CutoffViolation(dt)) if dt == date));

    let day_after = engine.cancel_as_of(id, d("2026-02-09")).await;
    assert!(matches!(day_after, Err(EngineError::CutoffViolation(_))));

    // The booking is untouched.
    assert_eq!(engine.get_occupancy(date, st(17)).await.count, 1);
    assert!(engine.get_booking(id).is_some());
}

#[tokio::test]
async fn cancel_unknown_booking_is_not_found() {
    let engine = mk_engine("cancel_unknown.wal");
    let id = BookingKey::new(sid("ghost"), d("2026-02-08"), st(17));
    let result = engine.cancel_as_of(&id, d("2026-02-01")).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn cancel_twice_is_not_found() {
    let engine = mk_engine("cancel_twice.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    let batch = engine.reserve(&s1, date, &[st(17)], details()).await.unwrap();
    let id = &batch.booking_ids[0];

    engine.cancel_as_of(id, d("2026-02-01")).await.unwrap();
    let second = engine.cancel_as_of(id, d("2026-02-01")).await;
    assert!(matches!(second, Err(EngineError::NotFound(_))));

    // The second attempt must not drive the counter negative-ish.
    assert_eq!(engine.get_occupancy(date, st(17)).await.count, 0);
}

// ── Reads & isolation ────────────────────────────────────

#[tokio::test]
async fn occupancy_read_is_idempotent() {
    let engine = mk_engine("idempotent_read.wal");
    let date = d("2026-02-08");
    engine
        .reserve(&sid("s1"), date, &[st(17)], details())
        .await
        .unwrap();

    let first = engine.get_occupancy(date, st(17)).await;
    let second = engine.get_occupancy(date, st(17)).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn unrelated_students_and_dates_are_independent() {
    let engine = mk_engine("independent.wal");
    let s1 = sid("s1");
    let s2 = sid("s2");

    engine
        .reserve(&s1, d("2026-02-08"), &[st(17)], details())
        .await
        .unwrap();
    engine
        .reserve(&s2, d("2026-02-09"), &[st(17)], details())
        .await
        .unwrap();

    assert_eq!(engine.get_occupancy(d("2026-02-08"), st(17)).await.count, 1);
    assert_eq!(engine.get_occupancy(d("2026-02-09"), st(17)).await.count, 1);

    let month = YearMonth { year: 2026, month: 2 };
    assert_eq!(engine.get_usage(&s1, month).await.used_hours, 1);
    assert_eq!(engine.get_usage(&s2, month).await.used_hours, 1);
}

#[tokio::test]
async fn staff_day_listing_is_ordered() {
    let engine = mk_engine("staff_listing.wal");
    let date = d("2026-02-08");

    engine.reserve(&sid("s2"), date, &[st(16)], details()).await.unwrap();
    engine.reserve(&sid("s1"), date, &[st(16)], details()).await.unwrap();
    engine.reserve(&sid("s1"), date, &[st(15)], details()).await.unwrap();

    let listing = engine.bookings_on_date(date);
    let keys: Vec<String> = listing.iter().map(|b| b.id.to_string()).collect();
    assert_eq!(
        keys,
        vec![
            "s1_2026-02-08_15",
            "s1_2026-02-08_16",
            "s2_2026-02-08_16",
        ]
    );
}

// ── Contention ───────────────────────────────────────────

#[tokio::test]
async fn reserve_times_out_as_contention_when_slot_is_held() {
    let engine = Arc::new(mk_engine("contention.wal"));
    let date = d("2026-02-08");

    // Park a write guard on the slot document the request will need.
    let slot = engine.store.slot_doc(&SlotKey { date, start: st(17) });
    let _held = slot.write_owned().await;

    let racer = engine.clone();
    let result = tokio::spawn(async move {
        racer.reserve(&sid("s1"), date, &[st(17)], details()).await
    })
    .await
    .unwrap();

    let err = result.unwrap_err();
    assert!(matches!(&err, EngineError::Contention));
    assert!(err.is_retryable());
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn restart_replays_committed_state() {
    let path = test_wal_path("restart_replay.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine
            .reserve(&s1, date, &[st(15), st(16)], details())
            .await
            .unwrap();
        engine
            .cancel_as_of(&BookingKey::new(s1.clone(), date, st(16)), d("2026-02-01"))
            .await
            .unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.get_occupancy(date, st(15)).await.count, 1);
    assert_eq!(engine.get_occupancy(date, st(16)).await.count, 0);
    assert_eq!(engine.get_usage(&s1, YearMonth::of(date)).await.used_hours, 1);
    assert_eq!(engine.booked_starts(&s1, date).await, vec![st(15)]);
    assert!(engine.get_booking(&BookingKey::new(s1.clone(), date, st(15))).is_some());
    assert!(engine.get_booking(&BookingKey::new(s1.clone(), date, st(16))).is_none());
}

#[tokio::test]
async fn compaction_preserves_state_across_restart() {
    let path = test_wal_path("compact_restart.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        // Churn, leaving one active booking.
        for _ in 0..5 {
            engine.reserve(&s1, date, &[st(15)], details()).await.unwrap();
            engine
                .cancel_as_of(&BookingKey::new(s1.clone(), date, st(15)), d("2026-02-01"))
                .await
                .unwrap();
        }
        engine.reserve(&s1, date, &[st(17)], details()).await.unwrap();

        assert!(engine.wal_appends_since_compact().await > 0);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.get_occupancy(date, st(15)).await.count, 0);
    assert_eq!(engine.get_occupancy(date, st(17)).await.count, 1);
    assert_eq!(engine.get_usage(&s1, YearMonth::of(date)).await.used_hours, 1);
    assert_eq!(engine.bookings_on_date(date).len(), 1);
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn reserve_and_cancel_notify_the_date_channel() {
    let engine = mk_engine("notify.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");
    let mut rx = engine.notify.subscribe(date);

    engine.reserve(&s1, date, &[st(17)], details()).await.unwrap();
    match rx.recv().await.unwrap() {
        Event::ReservationCommitted { starts, .. } => assert_eq!(starts, vec![st(17)]),
        other => panic!("unexpected event: {other:?}"),
    }

    engine
        .cancel_as_of(&BookingKey::new(s1.clone(), date, st(17)), d("2026-02-01"))
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        Event::ReservationCancelled { start, .. } => assert_eq!(start, st(17)),
        other => panic!("unexpected event: {other:?}"),
    }
}

// ── Study records ────────────────────────────────────────

#[tokio::test]
async fn record_lifecycle() {
    let engine = mk_engine("record_lifecycle.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    let batch = engine.reserve(&s1, date, &[st(17)], details()).await.unwrap();
    let id = &batch.booking_ids[0];

    let record = engine.ensure_record(id).await.unwrap();
    assert_eq!(record.status, RecordStatus::Draft);
    assert_eq!(record.details, details());
    assert!(record.entry.goal.is_empty());

    let entry = RecordEntry {
        goal: "finish chapter 4".into(),
        reflection: "kept focus for the whole hour".into(),
        self_mark: Some(SelfMark::Good),
    };
    engine.update_record(id, entry.clone()).await.unwrap();

    // ensure_record is idempotent — it must not reset the entry.
    let again = engine.ensure_record(id).await.unwrap();
    assert_eq!(again.entry, entry);

    engine
        .confirm_record(id, "admin-1", Some("good pace".into()))
        .await
        .unwrap();
    let confirmed = engine.get_record(id).unwrap();
    assert_eq!(confirmed.status, RecordStatus::Confirmed);
    assert_eq!(confirmed.confirmed_by.as_deref(), Some("admin-1"));
    assert_eq!(confirmed.teacher_comment, "good pace");
    assert!(confirmed.confirmed_at.is_some());
}

#[tokio::test]
async fn record_requires_an_active_booking() {
    let engine = mk_engine("record_missing.wal");
    let id = BookingKey::new(sid("ghost"), d("2026-02-08"), st(17));

    let ensure = engine.ensure_record(&id).await;
    assert!(matches!(ensure, Err(EngineError::NotFound(_))));

    let update = engine.update_record(&id, RecordEntry::default()).await;
    assert!(matches!(update, Err(EngineError::NotFound(_))));

    let confirm = engine.confirm_record(&id, "admin-1", None).await;
    assert!(matches!(confirm, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn record_survives_booking_cancellation() {
    let engine = mk_engine("record_survives.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");

    let batch = engine.reserve(&s1, date, &[st(17)], details()).await.unwrap();
    let id = &batch.booking_ids[0];
    engine.ensure_record(id).await.unwrap();

    engine.cancel_as_of(id, d("2026-02-01")).await.unwrap();

    assert!(engine.get_booking(id).is_none());
    assert!(engine.get_record(id).is_some());
}

#[tokio::test]
async fn records_replay_across_restart() {
    let path = test_wal_path("record_replay.wal");
    let s1 = sid("s1");
    let date = d("2026-02-08");
    let id = BookingKey::new(s1.clone(), date, st(17));

    let expected;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine.reserve(&s1, date, &[st(17)], details()).await.unwrap();
        engine.ensure_record(&id).await.unwrap();
        engine
            .update_record(
                &id,
                RecordEntry {
                    goal: "review verbs".into(),
                    reflection: String::new(),
                    self_mark: None,
                },
            )
            .await
            .unwrap();
        engine.confirm_record(&id, "admin-1", None).await.unwrap();
        expected = engine.get_record(&id).unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.get_record(&id).unwrap(), expected);
}
