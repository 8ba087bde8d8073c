//! Hard caps. Every bound is rejected with a typed error instead of letting a
//! malformed request grow state without limit.

/// Capacity used when a pattern interval does not name one.
pub const DEFAULT_SLOT_CAPACITY: u32 = 20;

/// Largest capacity a single slot may declare.
pub const MAX_SLOT_CAPACITY: u32 = 500;

/// A weekly pattern holds at most one entry per weekday.
pub const MAX_PATTERN_DAYS: usize = 7;

/// Intervals per pattern day.
pub const MAX_INTERVALS_PER_DAY: usize = 24;

/// Widest materialization window, in days.
pub const MAX_WINDOW_DAYS: i64 = 92;

/// Slots a single section may accumulate.
pub const MAX_SLOTS_PER_SECTION: usize = 10_000;

/// Subscriptions per engine.
pub const MAX_SUBSCRIPTIONS: usize = 100_000;

/// Longest allowed freeze, in days.
pub const MAX_FREEZE_DAYS: i64 = 365;

pub const MAX_CENTER_NAME_LEN: usize = 256;

pub const MAX_CENTERS: usize = 1024;
