use ulid::Ulid;

use crate::model::*;
use crate::notify::Notice;
use crate::observability;

use super::checks::now_local;
use super::{Engine, EngineError};

impl Engine {
    /// Book `user_id` into `slot_id` against `subscription_id`.
    ///
    /// Checks run in a fixed order, first failure wins: slot exists, ledger
    /// (active / admin-activated / not expired), duplicate, one-hour overlap,
    /// capacity. Duplicate and capacity are re-validated under the slot's
    /// write lock, which is the serialization point for `reserved`.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        user_id: Ulid,
        subscription_id: Ulid,
        slot_id: Ulid,
    ) -> Result<ReservationInfo, EngineError> {
        let result = self
            .create_reservation_inner(id, user_id, subscription_id, slot_id)
            .await;
        match &result {
            Ok(_) => {
                metrics::counter!(observability::RESERVATIONS_TOTAL).increment(1);
            }
            Err(e) => {
                metrics::counter!(
                    observability::RESERVATION_REJECTIONS_TOTAL,
                    "reason" => observability::rejection_label(e)
                )
                .increment(1);
            }
        }
        result
    }

    async fn create_reservation_inner(
        &self,
        id: Ulid,
        user_id: Ulid,
        subscription_id: Ulid,
        slot_id: Ulid,
    ) -> Result<ReservationInfo, EngineError> {
        let now = now_local();

        let slot_arc = self
            .slot(&slot_id)
            .ok_or(EngineError::SlotNotFound(slot_id))?;

        // Ledger checks. The stored `active` flag is checked as-is; the end
        // timestamp is checked synchronously because the expiry sweep may lag.
        {
            let sub_arc = self
                .subscription(&subscription_id)
                .ok_or(EngineError::NoValidSubscription)?;
            let sub = sub_arc.read().await;
            if sub.user_id != user_id || !sub.active {
                return Err(EngineError::NoValidSubscription);
            }
            if !sub.activated_by_admin {
                return Err(EngineError::NotActivatedByAdmin);
            }
            if sub.end <= now {
                return Err(EngineError::SubscriptionExpired);
            }
        }

        let (target_date, target_start) = {
            let guard = slot_arc.read().await;
            (guard.date, guard.start_time)
        };

        // Duplicate + one-hour window against the user's other bookings.
        // This scan runs before the target's write lock is taken: holding one
        // slot's lock while reading another's invites lock-order inversion
        // between concurrent bookings. Duplicates are re-checked under the
        // lock; the overlap check is not serialized across slots (§ booking
        // calls on different slots must not block each other).
        let mut others: Vec<(Ulid, chrono::NaiveDate, chrono::NaiveTime)> = Vec::new();
        for rsv_id in self.reservations_for_subscription(&subscription_id) {
            let Some(other_slot_id) = self.slot_for_reservation(&rsv_id) else {
                continue;
            };
            let Some(other_arc) = self.slot(&other_slot_id) else {
                continue;
            };
            let other = other_arc.read().await;
            let Some(rsv) = other.find_reservation(rsv_id) else {
                continue;
            };
            if rsv.canceled || rsv.user_id != user_id {
                continue;
            }
            others.push((other_slot_id, other.date, other.start_time));
        }
        if others.iter().any(|(sid, _, _)| *sid == slot_id) {
            return Err(EngineError::DuplicateBooking);
        }
        for (_, date, start) in &others {
            if starts_conflict(*date, *start, target_date, target_start) {
                return Err(EngineError::OverlapWithinOneHour);
            }
        }

        // Serialization point.
        let mut guard = slot_arc.write().await;
        if !self.slot_contains(&slot_id) {
            // Deleted by a materialization pass while we validated.
            return Err(EngineError::SlotNotFound(slot_id));
        }
        if guard.active_claim(user_id, subscription_id).is_some() {
            return Err(EngineError::DuplicateBooking);
        }
        if guard.reserved >= guard.capacity {
            return Err(EngineError::SlotFull);
        }

        let event = Event::ReservationCreated {
            id,
            user_id,
            slot_id,
            subscription_id,
        };
        self.persist_and_apply_slot(&mut guard, &event).await?;

        let slot_info = guard.info();
        drop(guard);

        // Off the critical path: a dropped notice never unwinds the booking.
        self.notify.send(
            user_id,
            &Notice::Booked {
                reservation_id: id,
                slot: slot_info,
            },
        );

        Ok(ReservationInfo {
            id,
            user_id,
            slot_id,
            subscription_id,
            attended: false,
            canceled: false,
        })
    }

    /// Mark a reservation attended. Allowed once, and only after the lesson's
    /// start instant has passed.
    pub async fn confirm_attendance(
        &self,
        reservation_id: Ulid,
        user_id: Ulid,
    ) -> Result<ReservationInfo, EngineError> {
        let (slot_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;

        let (owner, subscription_id, attended, canceled) = {
            let r = guard
                .find_reservation(reservation_id)
                .ok_or(EngineError::RecordNotFound(reservation_id))?;
            (r.user_id, r.subscription_id, r.attended, r.canceled)
        };
        if owner != user_id || canceled {
            return Err(EngineError::RecordNotFound(reservation_id));
        }
        if attended {
            return Err(EngineError::AlreadyAttended);
        }
        if !guard.has_started(now_local()) {
            return Err(EngineError::LessonNotStarted);
        }

        let event = Event::AttendanceConfirmed {
            reservation_id,
            slot_id,
        };
        self.persist_and_apply_slot(&mut guard, &event).await?;
        metrics::counter!(observability::ATTENDANCE_TOTAL).increment(1);

        Ok(ReservationInfo {
            id: reservation_id,
            user_id,
            slot_id,
            subscription_id,
            attended: true,
            canceled: false,
        })
    }

    /// Release a reservation. Idempotent: canceling twice is a no-op success,
    /// and `reserved` is decremented exactly once, never below zero.
    pub async fn cancel_reservation(&self, reservation_id: Ulid) -> Result<(), EngineError> {
        let (slot_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;

        let (user_id, canceled) = {
            let r = guard
                .find_reservation(reservation_id)
                .ok_or(EngineError::RecordNotFound(reservation_id))?;
            (r.user_id, r.canceled)
        };
        if canceled {
            return Ok(());
        }

        let event = Event::ReservationCanceled {
            reservation_id,
            slot_id,
        };
        self.persist_and_apply_slot(&mut guard, &event).await?;
        metrics::counter!(observability::CANCELLATIONS_TOTAL).increment(1);

        let slot_info = guard.info();
        drop(guard);

        self.notify.send(
            user_id,
            &Notice::Canceled {
                reservation_id,
                slot: slot_info,
            },
        );
        Ok(())
    }
}
