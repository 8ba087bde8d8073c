use chrono::{Duration, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn get_slot(&self, slot_id: Ulid) -> Option<SlotInfo> {
        let arc = self.slot(&slot_id)?;
        let guard = arc.read().await;
        Some(guard.info())
    }

    /// All slots of a section, ordered by (date, start time).
    pub async fn list_section_slots(&self, section_id: Ulid) -> Vec<SlotInfo> {
        let mut out = Vec::new();
        for slot_id in self.slots_for_section(&section_id) {
            if let Some(arc) = self.slot(&slot_id) {
                let guard = arc.read().await;
                out.push(guard.info());
            }
        }
        out.sort_by_key(|s| (s.date, s.start_time));
        out
    }

    pub async fn get_reservation(&self, reservation_id: Ulid) -> Option<ReservationInfo> {
        let slot_id = self.slot_for_reservation(&reservation_id)?;
        let arc = self.slot(&slot_id)?;
        let guard = arc.read().await;
        let r = guard.find_reservation(reservation_id)?;
        Some(ReservationInfo {
            id: r.id,
            user_id: r.user_id,
            slot_id,
            subscription_id: r.subscription_id,
            attended: r.attended,
            canceled: r.canceled,
        })
    }

    /// Every reservation made under a subscription, canceled ones included.
    pub async fn list_subscription_reservations(
        &self,
        subscription_id: Ulid,
    ) -> Vec<ReservationInfo> {
        let mut out = Vec::new();
        for rsv_id in self.reservations_for_subscription(&subscription_id) {
            if let Some(info) = self.get_reservation(rsv_id).await {
                out.push(info);
            }
        }
        out
    }

    pub async fn get_subscription(&self, subscription_id: Ulid) -> Option<SubscriptionInfo> {
        let arc = self.subscription(&subscription_id)?;
        let guard = arc.read().await;
        Some(guard.info())
    }

    /// Reservations whose lesson starts within `(now, now + horizon]`, one
    /// entry per booked user, each slot reported at most once per process
    /// lifetime. Slots locked by in-flight bookings are picked up on the
    /// next pass.
    pub fn collect_due_reminders(
        &self,
        now: NaiveDateTime,
        horizon: Duration,
    ) -> Vec<ReminderDue> {
        let deadline = now + horizon;
        let mut due = Vec::new();
        for entry in self.slots.iter() {
            let arc = entry.value().clone();
            if let Ok(guard) = arc.try_read() {
                let start = guard.starts_at();
                if start <= now || start > deadline {
                    continue;
                }
                if !self.reminder_mark(guard.id) {
                    continue; // already reported
                }
                for r in guard.reservations.iter().filter(|r| !r.canceled) {
                    due.push(ReminderDue {
                        user_id: r.user_id,
                        slot: guard.info(),
                    });
                }
            }
        }
        due
    }
}
