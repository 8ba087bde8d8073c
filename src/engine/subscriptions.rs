use chrono::{Duration, NaiveDateTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::checks::validate_freeze_days;
use super::{Engine, EngineError};

impl Engine {
    /// Register a purchased subscription. `start` is the purchase instant;
    /// the entitlement window is computed from the plan.
    pub async fn purchase_subscription(
        &self,
        id: Ulid,
        user_id: Ulid,
        plan: Plan,
        start: NaiveDateTime,
    ) -> Result<SubscriptionInfo, EngineError> {
        if self.subscription_count() >= MAX_SUBSCRIPTIONS {
            return Err(EngineError::LimitExceeded("too many subscriptions"));
        }
        if self.subscription(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let sub = SubscriptionState::new(id, user_id, plan, start);
        let event = Event::SubscriptionPurchased {
            id,
            user_id,
            plan,
            start,
            end: sub.end,
        };
        self.wal_append(&event).await?;
        let info = sub.info();
        self.install_subscription(sub);
        Ok(info)
    }

    /// Admin gate. Booking is refused until this has been called once.
    pub async fn activate_subscription(&self, id: Ulid) -> Result<(), EngineError> {
        let arc = self
            .subscription(&id)
            .ok_or(EngineError::RecordNotFound(id))?;
        let mut guard = arc.write().await;
        if guard.activated_by_admin {
            return Ok(()); // idempotent
        }
        let event = Event::SubscriptionActivated { id };
        self.persist_and_apply_subscription(&mut guard, &event).await
    }

    /// Suspend the countdown, banking the days left until `end`.
    pub async fn freeze_subscription(
        &self,
        id: Ulid,
        freeze_days: i64,
        now: NaiveDateTime,
    ) -> Result<SubscriptionInfo, EngineError> {
        validate_freeze_days(freeze_days)?;
        let arc = self
            .subscription(&id)
            .ok_or(EngineError::RecordNotFound(id))?;
        let mut guard = arc.write().await;
        if guard.frozen {
            return Err(EngineError::InvalidFreezeState("already frozen"));
        }

        let remaining_days = (guard.end - now).num_days().max(0);
        let event = Event::SubscriptionFrozen {
            id,
            frozen_start: now,
            frozen_end: now + Duration::days(freeze_days),
            remaining_days,
        };
        self.persist_and_apply_subscription(&mut guard, &event).await?;
        Ok(guard.info())
    }

    /// Resume the countdown: the banked days start counting from `now`.
    pub async fn unfreeze_subscription(
        &self,
        id: Ulid,
        now: NaiveDateTime,
    ) -> Result<SubscriptionInfo, EngineError> {
        let arc = self
            .subscription(&id)
            .ok_or(EngineError::RecordNotFound(id))?;
        let mut guard = arc.write().await;
        if !guard.frozen {
            return Err(EngineError::InvalidFreezeState("not frozen"));
        }

        let new_end = now + Duration::days(guard.remaining_days.unwrap_or(0));
        let event = Event::SubscriptionUnfrozen { id, new_end };
        self.persist_and_apply_subscription(&mut guard, &event).await?;
        Ok(guard.info())
    }

    /// Subscriptions whose stored `active` flag disagrees with the usability
    /// predicate. Rows locked by in-flight operations are picked up on the
    /// next sweep.
    pub fn collect_expired_subscriptions(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for entry in self.subscriptions.iter() {
            let arc = entry.value().clone();
            if let Ok(guard) = arc.try_read()
                && guard.active && !guard.is_usable(now) {
                    expired.push(guard.id);
                }
        }
        expired
    }

    /// One reconciliation pass over the whole ledger. Returns how many
    /// subscriptions were deactivated.
    pub async fn sweep_expired_subscriptions(
        &self,
        now: NaiveDateTime,
    ) -> Result<usize, EngineError> {
        let mut swept = 0;
        for id in self.collect_expired_subscriptions(now) {
            if self.deactivate_subscription(id).await? {
                tracing::info!("deactivated expired subscription {id}");
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// Reconcile one subscription's `active` cache. Returns whether a
    /// transition happened (false: someone else already deactivated it).
    pub async fn deactivate_subscription(&self, id: Ulid) -> Result<bool, EngineError> {
        let arc = self
            .subscription(&id)
            .ok_or(EngineError::RecordNotFound(id))?;
        let mut guard = arc.write().await;
        if !guard.active {
            return Ok(false);
        }
        let event = Event::SubscriptionDeactivated { id };
        self.persist_and_apply_subscription(&mut guard, &event).await?;
        metrics::counter!(observability::SUBSCRIPTIONS_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }
}

