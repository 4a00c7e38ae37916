mod availability;
mod booking;
mod error;
mod queries;
mod validate;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::dispatch::Dispatcher;
use crate::journal::Journal;
use crate::limits::LOCK_WAIT_TIMEOUT_MS;
use crate::model::*;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
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

/// Background task that owns the journal and batches appends for group
/// commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut journal, &mut batch);
                            handle_non_append(&mut journal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut journal, &mut batch);
                }
            }
            other => handle_non_append(&mut journal, other),
        }
    }
}

fn flush_and_respond(
    journal: &mut Journal,
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE)
        .record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(journal, batch);
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    journal: &mut Journal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = journal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = journal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_compact_file(journal.path(), &events)
                .and_then(|()| journal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { .. } => unreachable!(),
    }
}

/// Per-tenant reservation engine. The write half of a slot's `RwLock` is
/// the row-level exclusive lock: every capacity mutation for that slot
/// serializes on it, and nothing mutates `booked_count` or lock rows
/// without holding it.
pub struct Engine {
    pub slots: DashMap<Ulid, SharedSlotState>,
    pub(super) journal_tx: mpsc::Sender<JournalCommand>,
    pub dispatch: Arc<Dispatcher>,
    /// Reverse lookup: entity (lock/booking) id → slot id
    pub(super) entity_to_slot: DashMap<Ulid, Ulid>,
    /// Service → slots index for availability queries.
    pub(super) service_slots: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply an event directly to a SlotState (no locking — caller holds the
/// write guard). Also used during replay, so an event must carry
/// everything needed to redo its transition.
fn apply_to_slot(rs: &mut SlotState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SlotUpdated { capacity, is_available, .. } => {
            rs.original_capacity = *capacity;
            rs.is_available = *is_available;
        }
        Event::LockAcquired {
            id,
            slot_id,
            session_id,
            reserved_capacity,
            expires_at,
        } => {
            rs.locks.push(CapacityLock {
                id: *id,
                session_id: session_id.clone(),
                reserved_capacity: *reserved_capacity,
                expires_at: *expires_at,
            });
            entity_map.insert(*id, *slot_id);
        }
        Event::LockReleased { id, .. } => {
            rs.remove_lock(*id);
            entity_map.remove(id);
        }
        Event::BookingCreated {
            id,
            slot_id,
            customer_name,
            customer_phone,
            customer_email,
            adult_count,
            child_count,
            visitor_count,
            price_cents,
            notes,
            created_by,
            created_at,
            lock_id,
        } => {
            if let Some(lid) = lock_id {
                rs.remove_lock(*lid);
                entity_map.remove(lid);
            }
            rs.bookings.push(BookingRecord {
                id: *id,
                customer_name: customer_name.clone(),
                customer_phone: customer_phone.clone(),
                customer_email: customer_email.clone(),
                adult_count: *adult_count,
                child_count: *child_count,
                visitor_count: *visitor_count,
                price_cents: *price_cents,
                status: BookingStatus::Confirmed,
                payment_status: PaymentStatus::Unpaid,
                notes: notes.clone(),
                created_at: *created_at,
                created_by: created_by.clone(),
            });
            rs.booked_count += visitor_count;
            entity_map.insert(*id, *slot_id);
            debug_assert!(rs.booked_count <= rs.original_capacity);
        }
        Event::BookingCanceled { id, .. } => {
            if let Some(b) = rs.find_booking_mut(*id) {
                b.status = BookingStatus::Canceled;
                let released = b.visitor_count;
                rs.booked_count = rs.booked_count.saturating_sub(released);
            }
        }
        // SlotCreated is handled at the DashMap level, not here
        Event::SlotCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(journal_path: PathBuf, dispatch: Arc<Dispatcher>) -> io::Result<Self> {
        let events = Journal::replay(&journal_path)?;
        let journal = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let engine = Self {
            slots: DashMap::new(),
            journal_tx,
            dispatch,
            entity_to_slot: DashMap::new(),
            service_slots: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use
        // blocking_write here because this may run inside an async context
        // (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::SlotCreated { id, service_id, span, capacity } => {
                    let rs = SlotState::new(*id, *service_id, *span, *capacity);
                    engine.slots.insert(*id, Arc::new(RwLock::new(rs)));
                    engine.service_slots.entry(*service_id).or_default().push(*id);
                }
                other => {
                    if let Some(slot_id) = event_slot_id(other)
                        && let Some(entry) = engine.slots.get(&slot_id) {
                            let rs_arc = entry.clone();
                            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                            apply_to_slot(&mut guard, other, &engine.entity_to_slot);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to the journal via the background group-commit writer.
    pub(super) async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    pub fn get_slot(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn get_slot_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_slot.get(entity_id).map(|e| *e.value())
    }

    /// Row-level exclusive lock on a slot, bounded by the lock-wait
    /// timeout. Timing out under contention is the retryable
    /// `TransactionConflict` class.
    pub(super) async fn lock_slot_for_update(
        &self,
        slot_id: Ulid,
        rs: SharedSlotState,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<SlotState>, EngineError> {
        tokio::time::timeout(Duration::from_millis(LOCK_WAIT_TIMEOUT_MS), rs.write_owned())
            .await
            .map_err(|_| EngineError::TransactionConflict(slot_id))
    }

    /// Lookup entity → slot, get slot, acquire the exclusive guard.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SlotState>), EngineError> {
        let slot_id = self
            .get_slot_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let guard = self.lock_slot_for_update(slot_id, rs).await?;
        Ok((slot_id, guard))
    }

    /// Journal-append + apply in one call. The append is the commit
    /// point: a failure before it leaves the slot untouched.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_slot(rs, event, &self.entity_to_slot);
        Ok(())
    }
}

/// Extract the slot_id from an event (for non-SlotCreated events).
fn event_slot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::LockAcquired { slot_id, .. }
        | Event::LockReleased { slot_id, .. }
        | Event::BookingCreated { slot_id, .. }
        | Event::BookingCanceled { slot_id, .. } => Some(*slot_id),
        Event::SlotUpdated { id, .. } => Some(*id),
        Event::SlotCreated { .. } => None,
    }
}
