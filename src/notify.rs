use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::SlotInfo;

const CHANNEL_CAPACITY: usize = 256;

/// What the external notification dispatcher gets told. Transport (SMS,
/// WhatsApp, email) is not our concern; a dispatcher subscribes per user and
/// forwards however it likes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Booked {
        reservation_id: Ulid,
        slot: SlotInfo,
    },
    Canceled {
        reservation_id: Ulid,
        slot: SlotInfo,
    },
    /// Lesson starting soon.
    Reminder {
        slot: SlotInfo,
        display_name: Option<String>,
    },
}

/// Broadcast hub, one channel per user. Sends are fire-and-forget: a notice
/// nobody listens for is dropped, and a send never fails the operation that
/// produced it.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a user's notices. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, user_id: Ulid, notice: &Notice) {
        if let Some(sender) = self.channels.get(&user_id) {
            let _ = sender.send(notice.clone());
        }
    }

    /// Drop a user's channel.
    #[allow(dead_code)]
    pub fn remove(&self, user_id: &Ulid) {
        self.channels.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::slot_status;
    use chrono::{NaiveDate, NaiveTime};

    fn slot_info() -> SlotInfo {
        SlotInfo {
            id: Ulid::new(),
            section_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            capacity: 20,
            reserved: 1,
            status: slot_status(1, 20),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let user = Ulid::new();
        let mut rx = hub.subscribe(user);

        let notice = Notice::Booked {
            reservation_id: Ulid::new(),
            slot: slot_info(),
        };
        hub.send(user, &notice);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, notice);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — must not panic or block.
        hub.send(
            Ulid::new(),
            &Notice::Reminder {
                slot: slot_info(),
                display_name: None,
            },
        );
    }

    #[tokio::test]
    async fn notices_are_per_user() {
        let hub = NotifyHub::new();
        let alice = Ulid::new();
        let bob = Ulid::new();
        let mut alice_rx = hub.subscribe(alice);
        let mut bob_rx = hub.subscribe(bob);

        let notice = Notice::Canceled {
            reservation_id: Ulid::new(),
            slot: slot_info(),
        };
        hub.send(alice, &notice);

        assert_eq!(alice_rx.recv().await.unwrap(), notice);
        assert!(bob_rx.try_recv().is_err());
    }
}
