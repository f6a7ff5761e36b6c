//! Metric names recorded through the `metrics` facade.

/// Client connections accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
/// Client connections torn down (counter).
pub const DISCONNECTIONS_TOTAL: &str = "courier_disconnections_total";
/// Live sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "courier_sessions_active";
/// Publish commands routed (counter).
pub const PUBLISHES_TOTAL: &str = "courier_publishes_total";
/// MESSAGE envelopes enqueued to subscribers (counter).
pub const DELIVERIES_TOTAL: &str = "courier_deliveries_total";
/// Envelopes evicted by the drop-oldest policy (counter).
pub const QUEUE_OVERFLOW_DROPS_TOTAL: &str = "courier_queue_overflow_drops_total";
/// Client frames rejected with an ERROR reply (counter, labels: kind).
pub const REJECTED_FRAMES_TOTAL: &str = "courier_rejected_frames_total";
/// Sessions closed by the idle reaper (counter).
pub const IDLE_REAPED_TOTAL: &str = "courier_idle_reaped_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        let names = [
            CONNECTIONS_TOTAL,
            DISCONNECTIONS_TOTAL,
            SESSIONS_ACTIVE,
            PUBLISHES_TOTAL,
            DELIVERIES_TOTAL,
            QUEUE_OVERFLOW_DROPS_TOTAL,
            REJECTED_FRAMES_TOTAL,
            IDLE_REAPED_TOTAL,
        ];
        for name in names {
            assert!(name.starts_with("courier_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
