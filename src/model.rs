use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A temporary capacity hold taken during checkout. Active iff
/// `expires_at > now`; expired locks are skipped by every capacity
/// computation and eventually swept by the reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityLock {
    pub id: Ulid,
    pub session_id: String,
    pub reserved_capacity: u32,
    pub expires_at: Ms,
}

impl CapacityLock {
    pub fn is_active(&self, now: Ms) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Canceled,
    Completed,
}

impl BookingStatus {
    /// Capacity can only be released from a state that still holds it.
    pub fn is_cancelable(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Canceled => "canceled",
            BookingStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// A committed booking row. `visitor_count` was validated against the
/// slot's effective capacity at creation time and stays reflected in
/// `booked_count` until the booking is canceled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRecord {
    pub id: Ulid,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub adult_count: u32,
    pub child_count: u32,
    pub visitor_count: u32,
    pub price_cents: i64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub created_by: Option<String>,
}

/// Validated input for the booking transaction. Built by the wire layer
/// from an INSERT; every field is checked before any slot guard is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub service_id: Ulid,
    pub slot_id: Ulid,
    pub lock_id: Option<Ulid>,
    pub session_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub adult_count: u32,
    pub child_count: u32,
    pub visitor_count: u32,
    pub price_cents: i64,
    pub notes: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlotState {
    pub id: Ulid,
    pub service_id: Ulid,
    /// The bookable time window (encodes date + start/end time).
    pub span: Span,
    pub original_capacity: u32,
    pub booked_count: u32,
    pub is_available: bool,
    /// Checkout holds owned by this slot.
    pub locks: Vec<CapacityLock>,
    /// All bookings ever taken on this slot, canceled ones included.
    pub bookings: Vec<BookingRecord>,
}

impl SlotState {
    pub fn new(id: Ulid, service_id: Ulid, span: Span, capacity: u32) -> Self {
        Self {
            id,
            service_id,
            span,
            original_capacity: capacity,
            booked_count: 0,
            is_available: true,
            locks: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Capacity minus confirmed bookings. Derived, never stored, so the
    /// `available == original - booked` invariant holds by construction.
    pub fn available_capacity(&self) -> u32 {
        self.original_capacity.saturating_sub(self.booked_count)
    }

    /// Sum of unexpired holds' reserved capacity, optionally skipping one
    /// lock (the one a booking is about to consume).
    pub fn active_locked_qty(&self, now: Ms, exclude: Option<Ulid>) -> u32 {
        self.locks
            .iter()
            .filter(|l| l.is_active(now) && Some(l.id) != exclude)
            .map(|l| l.reserved_capacity)
            .sum()
    }

    /// Capacity minus bookings minus unexpired holds — what a new caller
    /// may still take. The same filter the booking transaction applies.
    pub fn effective_available(&self, now: Ms) -> u32 {
        self.available_capacity()
            .saturating_sub(self.active_locked_qty(now, None))
    }

    pub fn find_lock(&self, id: Ulid) -> Option<&CapacityLock> {
        self.locks.iter().find(|l| l.id == id)
    }

    pub fn remove_lock(&mut self, id: Ulid) -> Option<CapacityLock> {
        if let Some(pos) = self.locks.iter().position(|l| l.id == id) {
            Some(self.locks.remove(pos))
        } else {
            None
        }
    }

    pub fn find_booking(&self, id: Ulid) -> Option<&BookingRecord> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn find_booking_mut(&mut self, id: Ulid) -> Option<&mut BookingRecord> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }
}

/// The event types — flat, no nesting. This is the journal record format.
/// One event is one committed transition; `BookingCreated` carries the
/// consumed lock id so booking insert, counter increment, and lock
/// deletion replay as a single atomic step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        id: Ulid,
        service_id: Ulid,
        span: Span,
        capacity: u32,
    },
    SlotUpdated {
        id: Ulid,
        capacity: u32,
        is_available: bool,
    },
    LockAcquired {
        id: Ulid,
        slot_id: Ulid,
        session_id: String,
        reserved_capacity: u32,
        expires_at: Ms,
    },
    LockReleased {
        id: Ulid,
        slot_id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        slot_id: Ulid,
        customer_name: String,
        customer_phone: String,
        customer_email: Option<String>,
        adult_count: u32,
        child_count: u32,
        visitor_count: u32,
        price_cents: i64,
        notes: Option<String>,
        created_by: Option<String>,
        created_at: Ms,
        lock_id: Option<Ulid>,
    },
    BookingCanceled {
        id: Ulid,
        slot_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub service_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub capacity: u32,
    pub booked_count: u32,
    pub available_capacity: u32,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub session_id: String,
    pub reserved_capacity: u32,
    pub expires_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub customer_name: String,
    pub visitor_count: u32,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub price_cents: i64,
    pub created_at: Ms,
}

/// One availability row: what a user may still reserve on this slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAvailability {
    pub slot_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub effective_available: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(capacity: u32) -> SlotState {
        SlotState::new(Ulid::new(), Ulid::new(), Span::new(1000, 2000), capacity)
    }

    fn lock(qty: u32, expires_at: Ms) -> CapacityLock {
        CapacityLock {
            id: Ulid::new(),
            session_id: "sess".into(),
            reserved_capacity: qty,
            expires_at,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.overlaps(&Span::new(150, 250)));
        assert!(!s.overlaps(&Span::new(200, 300))); // adjacent, half-open
    }

    #[test]
    fn available_capacity_derived() {
        let mut s = slot(10);
        assert_eq!(s.available_capacity(), 10);
        s.booked_count = 4;
        assert_eq!(s.available_capacity(), 6);
    }

    #[test]
    fn active_locked_qty_skips_expired() {
        let mut s = slot(10);
        s.locks.push(lock(3, 5000)); // active at now=1000
        s.locks.push(lock(2, 500)); // expired at now=1000
        assert_eq!(s.active_locked_qty(1000, None), 3);
        assert_eq!(s.effective_available(1000), 7);
    }

    #[test]
    fn active_locked_qty_excludes_named_lock() {
        let mut s = slot(10);
        let own = lock(4, 5000);
        let own_id = own.id;
        s.locks.push(own);
        s.locks.push(lock(3, 5000));
        assert_eq!(s.active_locked_qty(1000, None), 7);
        assert_eq!(s.active_locked_qty(1000, Some(own_id)), 3);
    }

    #[test]
    fn effective_available_saturates() {
        let mut s = slot(5);
        s.booked_count = 3;
        s.locks.push(lock(4, 5000)); // locked past capacity window
        assert_eq!(s.effective_available(1000), 0);
    }

    #[test]
    fn remove_lock_by_id() {
        let mut s = slot(5);
        let l = lock(1, 5000);
        let id = l.id;
        s.locks.push(l);
        assert!(s.remove_lock(id).is_some());
        assert!(s.remove_lock(id).is_none());
        assert!(s.locks.is_empty());
    }

    #[test]
    fn booking_status_cancelable() {
        assert!(BookingStatus::Pending.is_cancelable());
        assert!(BookingStatus::Confirmed.is_cancelable());
        assert!(!BookingStatus::Canceled.is_cancelable());
        assert!(!BookingStatus::Completed.is_cancelable());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            slot_id: Ulid::new(),
            customer_name: "Amina".into(),
            customer_phone: "+960 555 0100".into(),
            customer_email: None,
            adult_count: 2,
            child_count: 1,
            visitor_count: 3,
            price_cents: 4500,
            notes: None,
            created_by: Some("reception".into()),
            created_at: 1_700_000_000_000,
            lock_id: Some(Ulid::new()),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
