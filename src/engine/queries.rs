use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn list_slots(&self, service_id: Option<Ulid>) -> Vec<SlotInfo> {
        let mut out = Vec::new();
        for entry in self.slots.iter() {
            let rs = entry.value().clone();
            let guard = rs.read().await;
            if service_id.is_some_and(|sid| sid != guard.service_id) {
                continue;
            }
            out.push(SlotInfo {
                id: guard.id,
                service_id: guard.service_id,
                start: guard.span.start,
                end: guard.span.end,
                capacity: guard.original_capacity,
                booked_count: guard.booked_count,
                available_capacity: guard.available_capacity(),
                is_available: guard.is_available,
            });
        }
        out.sort_by_key(|s| (s.start, s.id));
        out
    }

    pub async fn get_locks(&self, slot_id: Ulid) -> Vec<LockInfo> {
        let Some(rs) = self.get_slot(&slot_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard
            .locks
            .iter()
            .map(|l| LockInfo {
                id: l.id,
                slot_id,
                session_id: l.session_id.clone(),
                reserved_capacity: l.reserved_capacity,
                expires_at: l.expires_at,
            })
            .collect()
    }

    pub async fn get_bookings(&self, slot_id: Ulid) -> Vec<BookingInfo> {
        let Some(rs) = self.get_slot(&slot_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard
            .bookings
            .iter()
            .map(|b| BookingInfo {
                id: b.id,
                slot_id,
                customer_name: b.customer_name.clone(),
                visitor_count: b.visitor_count,
                status: b.status,
                payment_status: b.payment_status,
                price_cents: b.price_cents,
                created_at: b.created_at,
            })
            .collect()
    }
}
