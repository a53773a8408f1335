mod admission;
mod cancel;
mod error;
mod queries;
mod records;
#[cfg(test)]
mod tests;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{OwnedRwLockWriteGuard, mpsc, oneshot};

use crate::limits::{LOCK_WAIT_MS, WAL_CHANNEL_CAPACITY};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::{LedgerStore, SharedDoc};
use crate::wal::Wal;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn today_local() -> NaiveDate {
    chrono::Local::now().date_naive()
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block until an Append arrives, buffer it, drain whatever else is already
/// queued, then one flush_sync for the whole batch and respond to everyone.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch before the non-append command.
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The reservation admission & commit engine. Stateless between calls in
/// the sense that all bookable state lives in the ledger store; concurrent
/// callers coordinate only through per-document write locks.
pub struct Engine {
    pub(crate) store: LedgerStore,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = LedgerStore::new();
        for event in &events {
            store.apply(event);
        }
        tracing::info!(
            events = events.len(),
            active_bookings = store.booking_count(),
            "ledger store replayed"
        );
        metrics::gauge!(crate::observability::BOOKINGS_ACTIVE).set(store.booking_count() as f64);

        Ok(Self {
            store,
            wal_tx,
            notify,
        })
    }

    /// Write an event to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let events = self.store.snapshot_events();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

// ── Ledger write-set locking ─────────────────────────────

/// Write guards over every document one reserve/cancel call touches.
/// Holding these IS the transaction: reads through them are fresh by
/// construction, and no concurrent call can slip a commit in between
/// validation and apply.
pub(super) struct LedgerGuards {
    pub month: OwnedRwLockWriteGuard<MonthUsage>,
    pub day: OwnedRwLockWriteGuard<DayUsage>,
    pub slots: Vec<(SlotStart, OwnedRwLockWriteGuard<SlotCounter>)>,
}

pub(super) async fn lock_doc<T>(doc: SharedDoc<T>) -> Result<OwnedRwLockWriteGuard<T>, EngineError> {
    match tokio::time::timeout(Duration::from_millis(LOCK_WAIT_MS), doc.write_owned()).await {
        Ok(guard) => Ok(guard),
        Err(_) => {
            metrics::counter!(crate::observability::CONTENTION_TOTAL).increment(1);
            Err(EngineError::Contention)
        }
    }
}

impl Engine {
    /// Acquire write locks on exactly the ledger documents for one call, in
    /// a fixed global order — month, then day, then slots ascending — so two
    /// calls with overlapping write sets can never deadlock. `starts` must
    /// already be sorted.
    pub(super) async fn lock_ledgers(
        &self,
        student: &StudentId,
        date: NaiveDate,
        starts: &[SlotStart],
    ) -> Result<LedgerGuards, EngineError> {
        let month_key = MonthKey {
            student: student.clone(),
            month: YearMonth::of(date),
        };
        let day_key = DayKey {
            student: student.clone(),
            date,
        };

        let month = lock_doc(self.store.month_doc(&month_key)).await?;
        let day = lock_doc(self.store.day_doc(&day_key)).await?;
        let mut slots = Vec::with_capacity(starts.len());
        for start in starts {
            let key = SlotKey { date, start: *start };
            slots.push((*start, lock_doc(self.store.slot_doc(&key)).await?));
        }
        Ok(LedgerGuards { month, day, slots })
    }
}
