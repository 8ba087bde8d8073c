use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::directory::UserDirectory;
use crate::engine::{now_local, Engine};
use crate::notify::Notice;
use crate::observability;

/// How far ahead the reminder sweep looks.
const REMINDER_HORIZON_MIN: i64 = 120;

/// Background task that reconciles the stored `active` flag of expired
/// subscriptions. The booking path checks expiry synchronously and never
/// waits for this; the sweep only keeps the cache honest.
pub async fn run_expiry_sweep(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        match engine.sweep_expired_subscriptions(now_local()).await {
            Ok(0) => {}
            Ok(swept) => info!("expiry sweep deactivated {swept} subscriptions"),
            Err(e) => tracing::warn!("expiry sweep failed: {e}"),
        }
    }
}

/// Background task that tells booked users their lesson starts soon. Reads
/// reservations and slots, never touches capacity.
pub async fn run_reminder_sweep(engine: Arc<Engine>, directory: Arc<dyn UserDirectory>) {
    let mut interval = tokio::time::interval(Duration::from_secs(300));
    loop {
        interval.tick().await;
        let due = engine.collect_due_reminders(
            now_local(),
            chrono::Duration::minutes(REMINDER_HORIZON_MIN),
        );
        for reminder in due {
            let display_name = directory
                .get(reminder.user_id)
                .await
                .map(|p| p.display_name);
            engine.notify.send(
                reminder.user_id,
                &Notice::Reminder {
                    slot: reminder.slot,
                    display_name,
                },
            );
            metrics::counter!(observability::REMINDERS_SENT_TOTAL).increment(1);
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
