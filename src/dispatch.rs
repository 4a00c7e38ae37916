use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use ulid::Ulid;

use crate::model::Ms;

/// What collaborators get after a booking commits. Carries the contact
/// fields the ticket/messaging/invoicing services need; serializes to
/// JSON for transports that want a payload.
#[derive(Debug, Clone, Serialize)]
pub struct BookingNotice {
    pub booking_id: Ulid,
    pub slot_id: Ulid,
    pub service_id: Ulid,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub visitor_count: u32,
    pub slot_start: Ms,
    pub slot_end: Ms,
    pub price_cents: i64,
}

#[derive(Debug)]
pub struct SinkError(pub String);

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SinkError {}

/// An external collaborator notified after commit: ticket rendering,
/// WhatsApp/email delivery, invoicing. Delivery is best-effort; a failure
/// is logged and never reaches the booking transaction.
#[async_trait]
pub trait BookingSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn booking_created(&self, notice: &BookingNotice) -> Result<(), SinkError>;
    async fn booking_canceled(&self, booking_id: Ulid) -> Result<(), SinkError>;
}

/// Fans post-commit notices out to every sink, each on its own task. The
/// caller never awaits delivery.
pub struct Dispatcher {
    sinks: Vec<Arc<dyn BookingSink>>,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Arc<dyn BookingSink>>) -> Self {
        Self { sinks }
    }

    /// No collaborators configured. Bookings still commit normally.
    pub fn disabled() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn booking_created(&self, notice: BookingNotice) {
        for sink in &self.sinks {
            let sink = sink.clone();
            let notice = notice.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.booking_created(&notice).await {
                    tracing::warn!(
                        sink = sink.name(),
                        booking = %notice.booking_id,
                        "booking-created delivery failed: {e}"
                    );
                }
            });
        }
    }

    pub fn booking_canceled(&self, booking_id: Ulid) {
        for sink in &self.sinks {
            let sink = sink.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.booking_canceled(booking_id).await {
                    tracing::warn!(
                        sink = sink.name(),
                        booking = %booking_id,
                        "booking-canceled delivery failed: {e}"
                    );
                }
            });
        }
    }
}

/// Stand-in sink that logs the notice payload. The real transports
/// (ticket PDF/QR, WhatsApp, SMTP, invoicing) live out of process and
/// consume the same JSON shape.
pub struct LogSink;

#[async_trait]
impl BookingSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn booking_created(&self, notice: &BookingNotice) -> Result<(), SinkError> {
        let payload = serde_json::to_string(notice).map_err(|e| SinkError(e.to_string()))?;
        tracing::info!("booking created: {payload}");
        Ok(())
    }

    async fn booking_canceled(&self, booking_id: Ulid) -> Result<(), SinkError> {
        tracing::info!("booking canceled: {booking_id}");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use std::time::Duration;

    fn notice() -> BookingNotice {
        BookingNotice {
            booking_id: Ulid::new(),
            slot_id: Ulid::new(),
            service_id: Ulid::new(),
            customer_name: "Amina".into(),
            customer_phone: "+960 555 0100".into(),
            customer_email: None,
            visitor_count: 2,
            slot_start: 1000,
            slot_end: 2000,
            price_cents: 4500,
        }
    }

    #[tokio::test]
    async fn fans_out_to_all_sinks() {
        let (sink_a, mut rx_a, _) = RecordingSink::channel();
        let (sink_b, mut rx_b, _) = RecordingSink::channel();
        let dispatcher = Dispatcher::new(vec![sink_a, sink_b]);

        let n = notice();
        dispatcher.booking_created(n.clone());

        let got_a = tokio::time::timeout(Duration::from_secs(1), rx_a.recv())
            .await
            .unwrap()
            .unwrap();
        let got_b = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got_a.booking_id, n.booking_id);
        assert_eq!(got_b.booking_id, n.booking_id);
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        let (created_tx, mut created_rx) = tokio::sync::mpsc::unbounded_channel();
        let (canceled_tx, _canceled_rx) = tokio::sync::mpsc::unbounded_channel();
        let failing = Arc::new(RecordingSink { created_tx, canceled_tx, fail: true });
        let dispatcher = Dispatcher::new(vec![failing]);

        // Must not panic or propagate anywhere
        dispatcher.booking_created(notice());
        let got = tokio::time::timeout(Duration::from_secs(1), created_rx.recv())
            .await
            .unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn disabled_dispatcher_is_noop() {
        let dispatcher = Dispatcher::disabled();
        dispatcher.booking_created(notice());
        dispatcher.booking_canceled(Ulid::new());
    }

    #[test]
    fn notice_serializes_to_json() {
        let n = notice();
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("customer_name"));
        assert!(json.contains("Amina"));
    }
}
