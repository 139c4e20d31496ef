//! Relay metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider, which must be installed by
//! the host application. Without one every instrument is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("tandem-relay"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for messages delivered to a target's connection.
pub fn messages_relayed() -> Counter<u64> {
    meter()
        .u64_counter("tandem.messages.relayed")
        .with_description("Total messages queued for delivery to a target")
        .with_unit("message")
        .build()
}

/// Counter for messages that were not delivered.
pub fn messages_dropped() -> Counter<u64> {
    meter()
        .u64_counter("tandem.messages.dropped")
        .with_description("Total messages dropped (target absent or gone, sender torn down)")
        .with_unit("message")
        .build()
}

/// Counter for inbound frames that failed to parse.
pub fn frames_malformed() -> Counter<u64> {
    meter()
        .u64_counter("tandem.frames.malformed")
        .with_description("Total inbound frames rejected as malformed")
        .with_unit("frame")
        .build()
}

/// Counter for departure notifications delivered.
pub fn notifications_sent() -> Counter<u64> {
    meter()
        .u64_counter("tandem.notifications.sent")
        .with_description("Total departure notifications queued for a peer")
        .with_unit("notification")
        .build()
}

/// Counter for departure notifications that failed.
pub fn notifications_failed() -> Counter<u64> {
    meter()
        .u64_counter("tandem.notifications.failed")
        .with_description("Total departure notifications that could not be delivered")
        .with_unit("notification")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for registered connections.
pub fn connections_active() -> Gauge<i64> {
    meter()
        .i64_gauge("tandem.connections.active")
        .with_description("Current number of registered client connections")
        .with_unit("connection")
        .build()
}

// ============================================================================
// Recording helpers
// ============================================================================

/// Record a delivered message.
pub fn record_relayed() {
    messages_relayed().add(1, &[]);
}

/// Record a dropped message with the reason (`target_absent`, `target_gone`, `sender_absent`).
pub fn record_dropped(reason: &'static str) {
    messages_dropped().add(1, &[KeyValue::new("reason", reason)]);
}

/// Record a malformed inbound frame.
pub fn record_malformed() {
    frames_malformed().add(1, &[]);
}

/// Record the outcome of one departure notification.
pub fn record_notification(delivered: bool) {
    if delivered {
        notifications_sent().add(1, &[]);
    } else {
        notifications_failed().add(1, &[]);
    }
}

/// Record the current connection count.
pub fn record_connections(count: usize) {
    connections_active().record(count as i64, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_provider_is_noop() {
        record_relayed();
        record_dropped("target_absent");
        record_malformed();
        record_notification(true);
        record_notification(false);
        record_connections(3);
    }
}
