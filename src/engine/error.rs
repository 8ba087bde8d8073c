use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    SlotNotFound(Ulid),
    SectionNotFound(Ulid),
    NoValidSubscription,
    NotActivatedByAdmin,
    SubscriptionExpired,
    DuplicateBooking,
    OverlapWithinOneHour,
    SlotFull,
    RecordNotFound(Ulid),
    AlreadyAttended,
    LessonNotStarted,
    InvalidFreezeState(&'static str),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SlotNotFound(id) => write!(f, "slot not found: {id}"),
            EngineError::SectionNotFound(id) => write!(f, "section not found: {id}"),
            EngineError::NoValidSubscription => {
                write!(f, "no valid subscription for this user")
            }
            EngineError::NotActivatedByAdmin => {
                write!(f, "subscription has not been activated by an administrator")
            }
            EngineError::SubscriptionExpired => write!(f, "subscription has expired"),
            EngineError::DuplicateBooking => {
                write!(f, "already booked into this slot with this subscription")
            }
            EngineError::OverlapWithinOneHour => {
                write!(f, "another booking starts within one hour of this slot")
            }
            EngineError::SlotFull => write!(f, "slot is fully reserved"),
            EngineError::RecordNotFound(id) => write!(f, "record not found: {id}"),
            EngineError::AlreadyAttended => write!(f, "attendance already confirmed"),
            EngineError::LessonNotStarted => write!(f, "lesson has not started yet"),
            EngineError::InvalidFreezeState(msg) => write!(f, "invalid freeze state: {msg}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
