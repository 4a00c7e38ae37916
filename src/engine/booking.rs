use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::dispatch::BookingNotice;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::validate::{
    check_release, check_reserve, now_ms, validate_booking_request, validate_lock, validate_span,
};
use super::{Engine, EngineError, JournalCommand};

impl Engine {
    /// Seed a slot. Called by the schedule generator; slots are never
    /// deleted afterwards, only soft-disabled via `update_slot`.
    pub async fn create_slot(
        &self,
        id: Ulid,
        service_id: Ulid,
        span: Span,
        capacity: u32,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        if self.slots.len() >= MAX_SLOTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        if self.slots.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::SlotCreated { id, service_id, span, capacity };
        self.journal_append(&event).await?;
        let rs = SlotState::new(id, service_id, span, capacity);
        self.slots.insert(id, Arc::new(RwLock::new(rs)));
        self.service_slots.entry(service_id).or_default().push(id);
        Ok(())
    }

    /// Adjust capacity and/or the availability flag. Shrinking below the
    /// committed booked count is rejected — cancellations must come first.
    pub async fn update_slot(
        &self,
        id: Ulid,
        capacity: Option<u32>,
        is_available: Option<bool>,
    ) -> Result<(), EngineError> {
        let rs = self.get_slot(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = self.lock_slot_for_update(id, rs).await?;

        let capacity = capacity.unwrap_or(guard.original_capacity);
        let is_available = is_available.unwrap_or(guard.is_available);
        if capacity < guard.booked_count {
            return Err(EngineError::InvalidInput("capacity below booked count"));
        }

        let event = Event::SlotUpdated { id, capacity, is_available };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Take a temporary hold on capacity for the checkout interval. Holds
    /// reserve capacity without consuming it: `booked_count` is untouched,
    /// but every grant decision counts unexpired holds against the slot.
    pub async fn acquire_lock(
        &self,
        id: Ulid,
        slot_id: Ulid,
        session_id: String,
        quantity: u32,
        ttl_ms: Ms,
    ) -> Result<(), EngineError> {
        if quantity == 0 {
            return Err(EngineError::InvalidInput("lock quantity must be positive"));
        }
        if quantity > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("party too large"));
        }
        if ttl_ms <= 0 || ttl_ms > MAX_LOCK_TTL_MS {
            return Err(EngineError::InvalidInput("lock ttl out of range"));
        }
        if session_id.is_empty() {
            return Err(EngineError::InvalidInput("session id required"));
        }
        if session_id.len() > MAX_SESSION_LEN {
            return Err(EngineError::LimitExceeded("session id too long"));
        }
        if self.entity_to_slot.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self.get_slot(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = self.lock_slot_for_update(slot_id, rs).await?;
        if !guard.is_available {
            return Err(EngineError::SlotUnavailable(slot_id));
        }
        if guard.locks.len() >= MAX_LOCKS_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many locks on slot"));
        }

        let now = now_ms();
        let reserved = guard.active_locked_qty(now, None);
        if let Err(e) = check_reserve(&guard, quantity, reserved) {
            metrics::counter!(observability::CAPACITY_REJECTIONS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::LockAcquired {
            id,
            slot_id,
            session_id,
            reserved_capacity: quantity,
            expires_at: now + ttl_ms,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::LOCKS_ACQUIRED_TOTAL).increment(1);
        Ok(())
    }

    /// Idempotent release: an unknown, already expired-and-reaped, or
    /// already consumed lock id is not an error. Returns whether a row was
    /// actually deleted.
    pub async fn release_lock(&self, id: Ulid) -> Result<bool, EngineError> {
        let Some(slot_id) = self.get_slot_for_entity(&id) else {
            return Ok(false);
        };
        let Some(rs) = self.get_slot(&slot_id) else {
            return Ok(false);
        };
        let mut guard = self.lock_slot_for_update(slot_id, rs).await?;
        // The entity index may also resolve booking ids; only locks are
        // deletable through this path.
        if guard.find_lock(id).is_none() {
            return Ok(false);
        }

        let event = Event::LockReleased { id, slot_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    /// The booking transaction. One slot guard, one journal append; any
    /// failure before the append leaves counters and lock rows untouched.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<BookingInfo, EngineError> {
        validate_booking_request(&req)?;
        if self.entity_to_slot.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let rs = self
            .get_slot(&req.slot_id)
            .ok_or(EngineError::NotFound(req.slot_id))?;
        let mut guard = self.lock_slot_for_update(req.slot_id, rs).await?;

        if guard.service_id != req.service_id {
            return Err(EngineError::NotFound(req.slot_id));
        }
        if !guard.is_available {
            return Err(EngineError::SlotUnavailable(req.slot_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many bookings on slot"));
        }

        let now = now_ms();
        if let Some(lock_id) = req.lock_id {
            validate_lock(
                &guard,
                lock_id,
                req.session_id.as_deref(),
                req.visitor_count,
                now,
            )?;
        }

        // The oversell guard: evaluated under the exclusive guard, against
        // holds other than the one this booking consumes.
        let reserved_elsewhere = guard.active_locked_qty(now, req.lock_id);
        if let Err(e) = check_reserve(&guard, req.visitor_count, reserved_elsewhere) {
            metrics::counter!(observability::CAPACITY_REJECTIONS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::BookingCreated {
            id: req.id,
            slot_id: req.slot_id,
            customer_name: req.customer_name,
            customer_phone: req.customer_phone,
            customer_email: req.customer_email,
            adult_count: req.adult_count,
            child_count: req.child_count,
            visitor_count: req.visitor_count,
            price_cents: req.price_cents,
            notes: req.notes,
            created_by: req.created_by,
            created_at: now,
            lock_id: req.lock_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);

        // Committed. External collaborators (tickets, messaging,
        // invoicing) run outside the transaction; their failures are
        // logged by the dispatcher and never touch the booking.
        let booking = guard
            .find_booking(req.id)
            .expect("booking applied under this guard");
        self.dispatch.booking_created(BookingNotice {
            booking_id: booking.id,
            slot_id: guard.id,
            service_id: guard.service_id,
            customer_name: booking.customer_name.clone(),
            customer_phone: booking.customer_phone.clone(),
            customer_email: booking.customer_email.clone(),
            visitor_count: booking.visitor_count,
            slot_start: guard.span.start,
            slot_end: guard.span.end,
            price_cents: booking.price_cents,
        });

        Ok(BookingInfo {
            id: booking.id,
            slot_id: guard.id,
            customer_name: booking.customer_name.clone(),
            visitor_count: booking.visitor_count,
            status: booking.status,
            payment_status: booking.payment_status,
            price_cents: booking.price_cents,
            created_at: booking.created_at,
        })
    }

    /// The compensating transaction: release the booking's seats back to
    /// the slot and mark it canceled, atomically.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (slot_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.find_booking(id).ok_or(EngineError::NotFound(id))?;
        if !booking.status.is_cancelable() {
            return Err(EngineError::InvalidInput("booking is not cancelable"));
        }
        let visitor_count = booking.visitor_count;
        if let Err(e) = check_release(&guard, visitor_count) {
            // Counter drift means an upstream bookkeeping bug, not a bad
            // request. Abort before any journal append.
            tracing::error!("refusing capacity release on slot {slot_id}: {e}");
            return Err(e);
        }

        let event = Event::BookingCanceled { id, slot_id };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CANCELED_TOTAL).increment(1);
        self.dispatch.booking_canceled(id);
        Ok(slot_id)
    }

    /// Expired, still-present lock rows. Skips slots whose guard is
    /// contended; the next sweep catches them. Hygiene only — expired
    /// locks are already invisible to every capacity computation.
    pub fn collect_expired_locks(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.slots.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for lock in &guard.locks {
                    if !lock.is_active(now) {
                        expired.push((lock.id, guard.id));
                    }
                }
            }
        }
        expired
    }

    /// Compact the journal by rewriting it with only the events needed to
    /// recreate the current state. Canceled bookings are kept as
    /// created+canceled pairs so history survives compaction.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let slot_ids: Vec<Ulid> = self.slots.iter().map(|e| *e.key()).collect();
        for id in slot_ids {
            let Some(rs) = self.get_slot(&id) else { continue };
            let guard = rs.read().await;

            events.push(Event::SlotCreated {
                id: guard.id,
                service_id: guard.service_id,
                span: guard.span,
                capacity: guard.original_capacity,
            });
            if !guard.is_available {
                events.push(Event::SlotUpdated {
                    id: guard.id,
                    capacity: guard.original_capacity,
                    is_available: false,
                });
            }
            for lock in &guard.locks {
                events.push(Event::LockAcquired {
                    id: lock.id,
                    slot_id: guard.id,
                    session_id: lock.session_id.clone(),
                    reserved_capacity: lock.reserved_capacity,
                    expires_at: lock.expires_at,
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: booking.id,
                    slot_id: guard.id,
                    customer_name: booking.customer_name.clone(),
                    customer_phone: booking.customer_phone.clone(),
                    customer_email: booking.customer_email.clone(),
                    adult_count: booking.adult_count,
                    child_count: booking.child_count,
                    visitor_count: booking.visitor_count,
                    price_cents: booking.price_cents,
                    notes: booking.notes.clone(),
                    created_by: booking.created_by.clone(),
                    created_at: booking.created_at,
                    lock_id: None,
                });
                if booking.status == BookingStatus::Canceled {
                    events.push(Event::BookingCanceled {
                        id: booking.id,
                        slot_id: guard.id,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
