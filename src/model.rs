use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Subscription duration class, in days of validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    Days30,
    Days180,
    Days365,
}

impl Plan {
    pub fn duration_days(&self) -> i64 {
        match self {
            Plan::Days30 => 30,
            Plan::Days180 => 180,
            Plan::Days365 => 365,
        }
    }
}

/// A user's entitlement window. All timestamps are naive local time of the
/// owning center; cross-timezone comparison is out of scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionState {
    pub id: Ulid,
    pub user_id: Ulid,
    pub plan: Plan,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Eventually-consistent cache of `is_usable`, reconciled by the sweep.
    pub active: bool,
    /// Admin gate, separate from `active`.
    pub activated_by_admin: bool,
    pub frozen: bool,
    pub frozen_window: Option<(NaiveDateTime, NaiveDateTime)>,
    /// Days of validity banked at freeze time. Set only while frozen.
    pub remaining_days: Option<i64>,
}

impl SubscriptionState {
    pub fn new(id: Ulid, user_id: Ulid, plan: Plan, start: NaiveDateTime) -> Self {
        Self {
            id,
            user_id,
            plan,
            start,
            end: start + Duration::days(plan.duration_days()),
            active: true,
            activated_by_admin: false,
            frozen: false,
            frozen_window: None,
            remaining_days: None,
        }
    }

    /// The single usability predicate. The booking path and the expiry sweep
    /// must both go through here; the stored `active` flag is only a cache.
    pub fn is_usable(&self, now: NaiveDateTime) -> bool {
        !self.frozen && self.end > now
    }

    /// Read-side snapshot.
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            user_id: self.user_id,
            plan: self.plan,
            start: self.start,
            end: self.end,
            active: self.active,
            activated_by_admin: self.activated_by_admin,
            frozen: self.frozen,
            remaining_days: self.remaining_days,
        }
    }
}

/// Derived slot state, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Open,
    Full,
}

/// Pure function of (reserved, capacity).
pub fn slot_status(reserved: u32, capacity: u32) -> SlotStatus {
    if reserved < capacity {
        SlotStatus::Open
    } else {
        SlotStatus::Full
    }
}

/// A user's claim on one slot under one subscription. Owned by the slot's
/// state; soft lifecycle via the two flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub subscription_id: Ulid,
    pub attended: bool,
    pub canceled: bool,
}

/// One bookable occurrence of a section's class. Timing fields are immutable
/// after creation; `reserved` is mutated only under the slot's write lock.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub id: Ulid,
    pub section_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: u32,
    pub reserved: u32,
    pub reservations: Vec<Reservation>,
}

impl SlotState {
    pub fn new(
        id: Ulid,
        section_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        capacity: u32,
    ) -> Self {
        debug_assert!(start_time < end_time, "slot start must be before end");
        Self {
            id,
            section_id,
            date,
            start_time,
            end_time,
            capacity,
            reserved: 0,
            reservations: Vec::new(),
        }
    }

    pub fn status(&self) -> SlotStatus {
        slot_status(self.reserved, self.capacity)
    }

    /// Combined start instant of the lesson.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn has_started(&self, now: NaiveDateTime) -> bool {
        now >= self.starts_at()
    }

    pub fn find_reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn find_reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Non-canceled claim by this (user, subscription) pair, if any.
    pub fn active_claim(&self, user_id: Ulid, subscription_id: Ulid) -> Option<&Reservation> {
        self.reservations
            .iter()
            .find(|r| !r.canceled && r.user_id == user_id && r.subscription_id == subscription_id)
    }

    /// Read-side snapshot.
    pub fn info(&self) -> SlotInfo {
        SlotInfo {
            id: self.id,
            section_id: self.section_id,
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
            capacity: self.capacity,
            reserved: self.reserved,
            status: self.status(),
        }
    }
}

/// Booking-overlap guard: same calendar date, start times strictly less than
/// an hour apart. Exactly one hour apart does not conflict. Slots on
/// different dates never conflict (cross-midnight pairs are not compared).
pub fn starts_conflict(
    a_date: NaiveDate,
    a_start: NaiveTime,
    b_date: NaiveDate,
    b_start: NaiveTime,
) -> bool {
    if a_date != b_date {
        return false;
    }
    (a_start - b_start).num_minutes().abs() < 60
}

// ── Weekly pattern ───────────────────────────────────────────────

/// One interval of a recurring weekly schedule. `capacity` falls back to
/// `limits::DEFAULT_SLOT_CAPACITY` when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternInterval {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternDay {
    pub weekday: Weekday,
    pub intervals: Vec<PatternInterval>,
}

/// Typed recurring schedule, validated at the engine boundary. This is the
/// JSON shape the admin layer submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyPattern {
    pub days: Vec<PatternDay>,
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SubscriptionPurchased {
        id: Ulid,
        user_id: Ulid,
        plan: Plan,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    SubscriptionActivated {
        id: Ulid,
    },
    SubscriptionFrozen {
        id: Ulid,
        frozen_start: NaiveDateTime,
        frozen_end: NaiveDateTime,
        remaining_days: i64,
    },
    SubscriptionUnfrozen {
        id: Ulid,
        new_end: NaiveDateTime,
    },
    SubscriptionDeactivated {
        id: Ulid,
    },
    SlotCreated {
        id: Ulid,
        section_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        capacity: u32,
    },
    SlotDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        user_id: Ulid,
        slot_id: Ulid,
        subscription_id: Ulid,
    },
    AttendanceConfirmed {
        reservation_id: Ulid,
        slot_id: Ulid,
    },
    ReservationCanceled {
        reservation_id: Ulid,
        slot_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: Ulid,
    pub user_id: Ulid,
    pub plan: Plan,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub active: bool,
    pub activated_by_admin: bool,
    pub frozen: bool,
    pub remaining_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub section_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: u32,
    pub reserved: u32,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub user_id: Ulid,
    pub slot_id: Ulid,
    pub subscription_id: Ulid,
    pub attended: bool,
    pub canceled: bool,
}

/// What a materialization pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterializeOutcome {
    pub created: usize,
    pub deleted: usize,
}

/// One pending reminder: this user's lesson starts within the horizon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderDue {
    pub user_id: Ulid,
    pub slot: SlotInfo,
}
