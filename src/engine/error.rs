use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::CalendarError;
use crate::lifecycle::InvalidTransition;
use crate::validation::ValidationReport;

use super::Unavailability;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("no booking with code {0}")]
    UnknownCode(String),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("validation failed: {0}")]
    Validation(ValidationReport),
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    /// The requested window is taken (submission or availability check).
    #[error("room unavailable: {0}")]
    Unavailable(Unavailability),
    /// Another booking won the slot while this one waited for approval.
    #[error("conflict: {0}")]
    Conflict(Unavailability),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("{actor} may not {action}")]
    Forbidden { actor: Ulid, action: &'static str },
    #[error("booking date {0} has passed")]
    BookingDatePassed(NaiveDate),
    #[error("booking {0} is already checked in")]
    AlreadyCheckedIn(Ulid),
    #[error("booking {0} has no check-in")]
    NotCheckedIn(Ulid),
    #[error("booking {0} already has feedback")]
    FeedbackExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
