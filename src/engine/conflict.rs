use chrono::{Local, NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::calendar::{DateRange, TimeWindow};
use crate::model::RoomState;

use super::availability::{check_range, AvailabilityResult, Occupancy, Unavailability};

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub(crate) fn now_local() -> NaiveDateTime {
    Local::now().naive_local()
}

/// `Err` with the first blocking date if the window is taken.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    dates: &DateRange,
    window: &TimeWindow,
    exclude: Option<Ulid>,
    occupancy: Occupancy,
) -> Result<(), Unavailability> {
    match check_range(rs, dates, window, exclude, occupancy) {
        AvailabilityResult::Available => Ok(()),
        AvailabilityResult::Unavailable(u) => Err(u),
    }
}
