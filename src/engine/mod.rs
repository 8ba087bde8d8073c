mod checks;
mod error;
mod queries;
mod reservations;
mod schedule;
mod subscriptions;

pub use error::EngineError;
pub(crate) use checks::now_local;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::directory::SectionCatalog;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedSlot = Arc<RwLock<SlotState>>;
pub type SharedSubscription = Arc<RwLock<SubscriptionState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch first, then handle the
                            // non-append command.
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation/capacity-allocation core for one center. All state is in
/// memory, rebuilt from the WAL on startup; every row is behind its own
/// RwLock so bookings on different slots never block each other.
pub struct Engine {
    subscriptions: DashMap<Ulid, SharedSubscription>,
    slots: DashMap<Ulid, SharedSlot>,
    /// Reverse lookup: reservation id → slot id.
    reservation_to_slot: DashMap<Ulid, Ulid>,
    /// Subscription id → reservation ids (canceled ones stay listed; readers
    /// filter on the flag).
    by_subscription: DashMap<Ulid, Vec<Ulid>>,
    /// Section id → slot ids.
    by_section: DashMap<Ulid, Vec<Ulid>>,
    /// Slots already picked up by the reminder sweep this process lifetime.
    reminded_slots: DashSet<Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    catalog: Arc<dyn SectionCatalog>,
}

/// Apply a row-level event to a slot (no locking — caller holds the lock).
fn apply_to_slot(
    slot: &mut SlotState,
    event: &Event,
    rsv_index: &DashMap<Ulid, Ulid>,
    sub_index: &DashMap<Ulid, Vec<Ulid>>,
) {
    match event {
        Event::ReservationCreated {
            id,
            user_id,
            slot_id,
            subscription_id,
        } => {
            slot.reservations.push(Reservation {
                id: *id,
                user_id: *user_id,
                subscription_id: *subscription_id,
                attended: false,
                canceled: false,
            });
            slot.reserved += 1;
            rsv_index.insert(*id, *slot_id);
            sub_index.entry(*subscription_id).or_default().push(*id);
        }
        Event::AttendanceConfirmed { reservation_id, .. } => {
            if let Some(r) = slot.find_reservation_mut(*reservation_id) {
                r.attended = true;
            }
        }
        Event::ReservationCanceled { reservation_id, .. } => {
            let freed = match slot.find_reservation_mut(*reservation_id) {
                Some(r) if !r.canceled => {
                    r.canceled = true;
                    true
                }
                _ => false,
            };
            if freed {
                slot.reserved = slot.reserved.saturating_sub(1);
            }
        }
        _ => {}
    }
}

/// Apply a row-level event to a subscription (caller holds the lock).
fn apply_to_subscription(sub: &mut SubscriptionState, event: &Event) {
    match event {
        Event::SubscriptionActivated { .. } => {
            sub.activated_by_admin = true;
        }
        Event::SubscriptionFrozen {
            frozen_start,
            frozen_end,
            remaining_days,
            ..
        } => {
            sub.frozen = true;
            sub.frozen_window = Some((*frozen_start, *frozen_end));
            sub.remaining_days = Some(*remaining_days);
            sub.active = false;
        }
        Event::SubscriptionUnfrozen { new_end, .. } => {
            sub.end = *new_end;
            sub.frozen = false;
            sub.frozen_window = None;
            sub.remaining_days = None;
            sub.active = true;
        }
        Event::SubscriptionDeactivated { .. } => {
            sub.active = false;
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        catalog: Arc<dyn SectionCatalog>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            subscriptions: DashMap::new(),
            slots: DashMap::new(),
            reservation_to_slot: DashMap::new(),
            by_subscription: DashMap::new(),
            by_section: DashMap::new(),
            reminded_slots: DashSet::new(),
            wal_tx,
            notify,
            catalog,
        };

        // Replay — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly. Never block here: this may run inside an
        // async context (lazy per-center creation).
        for event in &events {
            match event {
                Event::SubscriptionPurchased {
                    id,
                    user_id,
                    plan,
                    start,
                    end,
                } => {
                    let mut sub = SubscriptionState::new(*id, *user_id, *plan, *start);
                    sub.end = *end;
                    engine.subscriptions.insert(*id, Arc::new(RwLock::new(sub)));
                }
                Event::SlotCreated {
                    id,
                    section_id,
                    date,
                    start_time,
                    end_time,
                    capacity,
                } => {
                    let slot = SlotState::new(
                        *id,
                        *section_id,
                        *date,
                        *start_time,
                        *end_time,
                        *capacity,
                    );
                    engine.slots.insert(*id, Arc::new(RwLock::new(slot)));
                    engine.by_section.entry(*section_id).or_default().push(*id);
                }
                Event::SlotDeleted { id } => {
                    if let Some((_, arc)) = engine.slots.remove(id) {
                        let guard = arc.try_read().expect("replay: uncontended read");
                        if let Some(mut siblings) = engine.by_section.get_mut(&guard.section_id) {
                            siblings.retain(|s| s != id);
                        }
                        for r in &guard.reservations {
                            engine.reservation_to_slot.remove(&r.id);
                            if let Some(mut list) = engine.by_subscription.get_mut(&r.subscription_id) {
                                list.retain(|x| x != &r.id);
                            }
                        }
                    }
                }
                Event::SubscriptionActivated { id }
                | Event::SubscriptionFrozen { id, .. }
                | Event::SubscriptionUnfrozen { id, .. }
                | Event::SubscriptionDeactivated { id } => {
                    if let Some(entry) = engine.subscriptions.get(id) {
                        let arc = entry.value().clone();
                        let mut guard = arc.try_write().expect("replay: uncontended write");
                        apply_to_subscription(&mut guard, event);
                    }
                }
                Event::ReservationCreated { slot_id, .. }
                | Event::AttendanceConfirmed { slot_id, .. }
                | Event::ReservationCanceled { slot_id, .. } => {
                    if let Some(entry) = engine.slots.get(slot_id) {
                        let arc = entry.value().clone();
                        let mut guard = arc.try_write().expect("replay: uncontended write");
                        apply_to_slot(
                            &mut guard,
                            event,
                            &engine.reservation_to_slot,
                            &engine.by_subscription,
                        );
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write an event to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn slot(&self, id: &Ulid) -> Option<SharedSlot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn subscription(&self, id: &Ulid) -> Option<SharedSubscription> {
        self.subscriptions.get(id).map(|e| e.value().clone())
    }

    pub(super) fn slot_contains(&self, id: &Ulid) -> bool {
        self.slots.contains_key(id)
    }

    pub(super) fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub(super) fn slot_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_slot
            .get(reservation_id)
            .map(|e| *e.value())
    }

    pub(super) fn reservations_for_subscription(&self, subscription_id: &Ulid) -> Vec<Ulid> {
        self.by_subscription
            .get(subscription_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub(super) fn slots_for_section(&self, section_id: &Ulid) -> Vec<Ulid> {
        self.by_section
            .get(section_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub(super) fn section_catalog(&self) -> &Arc<dyn SectionCatalog> {
        &self.catalog
    }

    pub(super) fn reminder_mark(&self, slot_id: Ulid) -> bool {
        self.reminded_slots.insert(slot_id)
    }

    /// WAL-append + in-memory apply for a locked slot. Notification is the
    /// caller's job, after the guard is dropped.
    pub(super) async fn persist_and_apply_slot(
        &self,
        slot: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_slot(slot, event, &self.reservation_to_slot, &self.by_subscription);
        Ok(())
    }

    /// WAL-append + in-memory apply for a locked subscription.
    pub(super) async fn persist_and_apply_subscription(
        &self,
        sub: &mut SubscriptionState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_subscription(sub, event);
        Ok(())
    }

    /// Insert a freshly materialized slot and index it.
    pub(super) fn install_slot(&self, slot: SlotState) {
        let id = slot.id;
        let section_id = slot.section_id;
        self.slots.insert(id, Arc::new(RwLock::new(slot)));
        self.by_section.entry(section_id).or_default().push(id);
    }

    /// Remove a slot from the maps. The caller holds the slot's write lock
    /// and passes the reservation pairs it saw under that lock.
    pub(super) fn detach_slot(
        &self,
        slot_id: &Ulid,
        section_id: &Ulid,
        reservations: &[(Ulid, Ulid)],
    ) {
        self.slots.remove(slot_id);
        if let Some(mut siblings) = self.by_section.get_mut(section_id) {
            siblings.retain(|s| s != slot_id);
        }
        for (rsv_id, subscription_id) in reservations {
            self.reservation_to_slot.remove(rsv_id);
            if let Some(mut list) = self.by_subscription.get_mut(subscription_id) {
                list.retain(|x| x != rsv_id);
            }
        }
    }

    pub(super) fn install_subscription(&self, sub: SubscriptionState) {
        self.subscriptions.insert(sub.id, Arc::new(RwLock::new(sub)));
    }

    /// Lookup reservation → slot, acquire the slot's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SlotState>), EngineError> {
        let slot_id = self
            .slot_for_reservation(reservation_id)
            .ok_or(EngineError::RecordNotFound(*reservation_id))?;
        let slot = self
            .slot(&slot_id)
            .ok_or(EngineError::RecordNotFound(*reservation_id))?;
        let guard = slot.write_owned().await;
        Ok((slot_id, guard))
    }

    /// Compact the WAL down to the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.subscriptions.iter() {
            let arc = entry.value().clone();
            let sub = arc.try_read().expect("compact: uncontended read");
            events.push(Event::SubscriptionPurchased {
                id: sub.id,
                user_id: sub.user_id,
                plan: sub.plan,
                start: sub.start,
                end: sub.end,
            });
            if sub.activated_by_admin {
                events.push(Event::SubscriptionActivated { id: sub.id });
            }
            if sub.frozen {
                let (frozen_start, frozen_end) =
                    sub.frozen_window.unwrap_or((sub.start, sub.start));
                events.push(Event::SubscriptionFrozen {
                    id: sub.id,
                    frozen_start,
                    frozen_end,
                    remaining_days: sub.remaining_days.unwrap_or(0),
                });
            } else if !sub.active {
                events.push(Event::SubscriptionDeactivated { id: sub.id });
            }
        }

        for entry in self.slots.iter() {
            let arc = entry.value().clone();
            let slot = arc.try_read().expect("compact: uncontended read");
            events.push(Event::SlotCreated {
                id: slot.id,
                section_id: slot.section_id,
                date: slot.date,
                start_time: slot.start_time,
                end_time: slot.end_time,
                capacity: slot.capacity,
            });
            for r in &slot.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    user_id: r.user_id,
                    slot_id: slot.id,
                    subscription_id: r.subscription_id,
                });
                if r.attended {
                    events.push(Event::AttendanceConfirmed {
                        reservation_id: r.id,
                        slot_id: slot.id,
                    });
                }
                if r.canceled {
                    events.push(Event::ReservationCanceled {
                        reservation_id: r.id,
                        slot_id: slot.id,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
