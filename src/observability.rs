use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations committed.
pub const RESERVATIONS_TOTAL: &str = "classbook_reservations_total";

/// Counter: booking requests rejected. Labels: reason.
pub const RESERVATION_REJECTIONS_TOTAL: &str = "classbook_reservation_rejections_total";

/// Counter: reservations canceled (first cancel only).
pub const CANCELLATIONS_TOTAL: &str = "classbook_cancellations_total";

/// Counter: attendance confirmations.
pub const ATTENDANCE_TOTAL: &str = "classbook_attendance_total";

// ── USE metrics (resource state) ────────────────────────────────

/// Counter: subscriptions deactivated by the expiry sweep.
pub const SUBSCRIPTIONS_EXPIRED_TOTAL: &str = "classbook_subscriptions_expired_total";

/// Counter: slots created by materialization.
pub const SLOTS_MATERIALIZED_TOTAL: &str = "classbook_slots_materialized_total";

/// Counter: reminder notices emitted by the sweep.
pub const REMINDERS_SENT_TOTAL: &str = "classbook_reminders_sent_total";

/// Gauge: engines loaded (one per center).
pub const CENTERS_ACTIVE: &str = "classbook_centers_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "classbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "classbook_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if `port`
/// is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Fmt subscriber with env-driven filtering. Call once from the embedding
/// process; repeated calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}

/// Map a rejection to a short label for metrics.
pub fn rejection_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::SlotNotFound(_) => "slot_not_found",
        EngineError::SectionNotFound(_) => "section_not_found",
        EngineError::NoValidSubscription => "no_valid_subscription",
        EngineError::NotActivatedByAdmin => "not_activated_by_admin",
        EngineError::SubscriptionExpired => "subscription_expired",
        EngineError::DuplicateBooking => "duplicate_booking",
        EngineError::OverlapWithinOneHour => "overlap_within_one_hour",
        EngineError::SlotFull => "slot_full",
        EngineError::RecordNotFound(_) => "record_not_found",
        EngineError::AlreadyAttended => "already_attended",
        EngineError::LessonNotStarted => "lesson_not_started",
        EngineError::InvalidFreezeState(_) => "invalid_freeze_state",
        EngineError::AlreadyExists(_) => "already_exists",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::WalError(_) => "wal_error",
    }
}
