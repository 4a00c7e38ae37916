use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;

use super::validate::now_ms;
use super::{Engine, EngineError};

// ── Availability projection ──────────────────────────────────────

/// Project one slot into an availability row, or `None` if it should not
/// be offered: disabled, outside the query window, already started, or no
/// effective capacity left.
///
/// Uses the same `expires_at > now` filter as the booking transaction, so
/// what a user is shown matches what the transaction will let them take.
/// A slot shown here can still be lost to a concurrent booker — that is an
/// expected outcome, not stale accounting.
pub fn project_slot(slot: &SlotState, window: &Span, now: Ms) -> Option<SlotAvailability> {
    if !slot.is_available {
        return None;
    }
    if !slot.span.overlaps(window) {
        return None;
    }
    if slot.span.start <= now {
        return None;
    }
    let effective = slot.effective_available(now);
    if effective == 0 {
        return None;
    }
    Some(SlotAvailability {
        slot_id: slot.id,
        start: slot.span.start,
        end: slot.span.end,
        effective_available: effective,
    })
}

impl Engine {
    /// Read path: per slot of the service inside the window, capacity
    /// minus bookings minus unexpired holds. Plain read guards only — this
    /// never blocks a booking transaction, and a momentary stale row only
    /// affects a hint shown to the user.
    pub async fn query_availability(
        &self,
        service_id: Ulid,
        window_start: Ms,
        window_end: Ms,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        if window_start >= window_end {
            return Err(EngineError::InvalidInput("query window start must precede end"));
        }
        if window_end - window_start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }

        let slot_ids = self
            .service_slots
            .get(&service_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let window = Span::new(window_start, window_end);
        let now = now_ms();
        let mut rows = Vec::new();
        for id in slot_ids {
            let Some(rs) = self.get_slot(&id) else { continue };
            let guard = rs.read().await;
            if let Some(row) = project_slot(&guard, &window, now) {
                rows.push(row);
            }
        }
        rows.sort_by_key(|r| (r.start, r.slot_id));
        Ok(rows)
    }
}
