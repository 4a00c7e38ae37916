use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.start >= span.end {
        return Err(EngineError::InvalidInput("slot window start must precede end"));
    }
    if span.duration_ms() > MAX_SLOT_DURATION_MS {
        return Err(EngineError::LimitExceeded("slot window too wide"));
    }
    Ok(())
}

/// Input checks the booking transaction runs before touching any slot
/// guard. A failure here has zero side effects by construction.
pub(crate) fn validate_booking_request(req: &BookingRequest) -> Result<(), EngineError> {
    if req.visitor_count == 0 {
        return Err(EngineError::InvalidInput("visitor count must be positive"));
    }
    if req.visitor_count != req.adult_count + req.child_count {
        return Err(EngineError::InvalidInput(
            "visitor count must equal adults plus children",
        ));
    }
    if req.visitor_count > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    if req.customer_name.is_empty() {
        return Err(EngineError::InvalidInput("customer name required"));
    }
    if req.customer_name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if req.customer_phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("customer phone too long"));
    }
    if req.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    if req.session_id.as_ref().is_some_and(|s| s.len() > MAX_SESSION_LEN) {
        return Err(EngineError::LimitExceeded("session id too long"));
    }
    if req.price_cents < 0 {
        return Err(EngineError::InvalidInput("price must not be negative"));
    }
    Ok(())
}

/// Commit-time lock check, run under the slot's write guard. The lock must
/// still exist on this slot and be unexpired (a reaped lock and a lock
/// targeting another slot are indistinguishable here, both are
/// `LockExpired`), belong to the same session, and reserve at least the
/// requested quantity.
pub(crate) fn validate_lock(
    slot: &SlotState,
    lock_id: Ulid,
    session_id: Option<&str>,
    qty: u32,
    now: Ms,
) -> Result<(), EngineError> {
    let lock = slot
        .find_lock(lock_id)
        .ok_or(EngineError::LockExpired(lock_id))?;
    if !lock.is_active(now) {
        return Err(EngineError::LockExpired(lock_id));
    }
    match session_id {
        Some(s) if s == lock.session_id => {}
        _ => return Err(EngineError::LockMismatch(lock_id)),
    }
    if lock.reserved_capacity < qty {
        return Err(EngineError::LockInsufficientCapacity {
            reserved: lock.reserved_capacity,
            requested: qty,
        });
    }
    Ok(())
}

/// Oversell guard for a capacity grant, evaluated under the write guard so
/// it sees a consistent snapshot: `booked + reserved_elsewhere + qty` must
/// fit in the original capacity.
pub(crate) fn check_reserve(
    slot: &SlotState,
    qty: u32,
    reserved_elsewhere: u32,
) -> Result<(), EngineError> {
    let committed = slot.booked_count.saturating_add(reserved_elsewhere);
    if committed.saturating_add(qty) > slot.original_capacity {
        return Err(EngineError::CapacityExceeded {
            requested: qty,
            available: slot.original_capacity.saturating_sub(committed),
        });
    }
    Ok(())
}

/// Underflow guard for the compensating (cancellation) direction.
pub(crate) fn check_release(slot: &SlotState, qty: u32) -> Result<(), EngineError> {
    if qty > slot.booked_count {
        return Err(EngineError::InvalidRelease {
            booked: slot.booked_count,
            releasing: qty,
        });
    }
    Ok(())
}
