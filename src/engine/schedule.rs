use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::checks::{now_local, validate_pattern, validate_window};
use super::{Engine, EngineError};

impl Engine {
    /// Expand a weekly pattern into concrete slots over `[window_start,
    /// window_end]` for one section.
    ///
    /// Existing future slots in the window are regenerated: a slot that has
    /// not started and has no live reservations is deleted and recreated
    /// from the pattern. Slots that have started, or that anyone is still
    /// booked into, survive untouched — and the pattern entry matching a
    /// survivor's exact (date, start, end) is skipped, which is what makes
    /// re-running the same pattern idempotent.
    pub async fn materialize_slots(
        &self,
        section_id: Ulid,
        pattern: &WeeklyPattern,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> Result<MaterializeOutcome, EngineError> {
        validate_pattern(pattern)?;
        validate_window(window_start, window_end)?;
        if self.section_catalog().get(section_id).await.is_none() {
            return Err(EngineError::SectionNotFound(section_id));
        }

        let now = now_local();
        let mut outcome = MaterializeOutcome::default();
        let mut survivors: HashSet<(NaiveDate, NaiveTime, NaiveTime)> = HashSet::new();

        for slot_id in self.slots_for_section(&section_id) {
            let Some(arc) = self.slot(&slot_id) else {
                continue;
            };
            let guard = arc.write().await;
            if guard.date < window_start || guard.date > window_end {
                continue;
            }
            if guard.has_started(now) || guard.reserved > 0 {
                survivors.insert((guard.date, guard.start_time, guard.end_time));
                continue;
            }

            // Held through the map removal so a concurrent booking that gets
            // the lock next observes the slot as already gone.
            let reservations: Vec<(Ulid, Ulid)> = guard
                .reservations
                .iter()
                .map(|r| (r.id, r.subscription_id))
                .collect();
            self.wal_append(&Event::SlotDeleted { id: slot_id }).await?;
            self.detach_slot(&slot_id, &section_id, &reservations);
            drop(guard);
            outcome.deleted += 1;
        }

        let existing = self.slots_for_section(&section_id).len();
        let mut date = window_start;
        while date <= window_end {
            for day in pattern.days.iter().filter(|d| d.weekday == date.weekday()) {
                for interval in &day.intervals {
                    // Never materialize an occurrence that is already in the
                    // past, and never double up on a surviving slot.
                    if date.and_time(interval.start_time) <= now {
                        continue;
                    }
                    if survivors.contains(&(date, interval.start_time, interval.end_time)) {
                        continue;
                    }
                    if existing + outcome.created >= MAX_SLOTS_PER_SECTION {
                        return Err(EngineError::LimitExceeded("too many slots for section"));
                    }

                    let capacity = interval.capacity.unwrap_or(DEFAULT_SLOT_CAPACITY);
                    let id = Ulid::new();
                    self.wal_append(&Event::SlotCreated {
                        id,
                        section_id,
                        date,
                        start_time: interval.start_time,
                        end_time: interval.end_time,
                        capacity,
                    })
                    .await?;
                    self.install_slot(SlotState::new(
                        id,
                        section_id,
                        date,
                        interval.start_time,
                        interval.end_time,
                        capacity,
                    ));
                    outcome.created += 1;
                }
            }
            let Some(next) = date.succ_opt() else { break };
            date = next;
        }

        metrics::counter!(observability::SLOTS_MATERIALIZED_TOTAL)
            .increment(outcome.created as u64);
        tracing::info!(
            section = %section_id,
            created = outcome.created,
            deleted = outcome.deleted,
            "materialized weekly pattern"
        );
        Ok(outcome)
    }
}
