use chrono::{NaiveDate, NaiveDateTime};

use crate::limits::*;
use crate::model::WeeklyPattern;

use super::EngineError;

pub(crate) fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Shape validation for a weekly pattern, done at the engine boundary so the
/// materialization loop can trust its input.
pub(crate) fn validate_pattern(pattern: &WeeklyPattern) -> Result<(), EngineError> {
    if pattern.days.len() > MAX_PATTERN_DAYS {
        return Err(EngineError::LimitExceeded("too many pattern days"));
    }
    let mut seen = [false; 7];
    for day in &pattern.days {
        let idx = day.weekday.num_days_from_monday() as usize;
        if seen[idx] {
            return Err(EngineError::LimitExceeded("duplicate weekday in pattern"));
        }
        seen[idx] = true;

        if day.intervals.len() > MAX_INTERVALS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many intervals in a pattern day"));
        }
        for interval in &day.intervals {
            if interval.start_time >= interval.end_time {
                return Err(EngineError::LimitExceeded(
                    "pattern interval start must be before end",
                ));
            }
            if let Some(cap) = interval.capacity
                && (cap == 0 || cap > MAX_SLOT_CAPACITY) {
                    return Err(EngineError::LimitExceeded("pattern capacity out of range"));
                }
        }
    }
    Ok(())
}

pub(crate) fn validate_window(start: NaiveDate, end: NaiveDate) -> Result<(), EngineError> {
    if start > end {
        return Err(EngineError::LimitExceeded("window start after window end"));
    }
    if (end - start).num_days() > MAX_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("materialization window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_freeze_days(days: i64) -> Result<(), EngineError> {
    if days < 1 || days > MAX_FREEZE_DAYS {
        return Err(EngineError::LimitExceeded("freeze days out of range"));
    }
    Ok(())
}
