use chrono::{NaiveDate, NaiveTime};
use tracing::debug;
use ulid::Ulid;

use crate::calendar::{DateRange, TimeWindow};
use crate::model::*;
use crate::observability;

use super::availability::{check_range, free_windows, AvailabilityResult, Occupancy};
use super::{Engine, EngineError};

impl Engine {
    /// Read-only availability check for a room, a single date or an inclusive range, and a window.
    /// Pending and approved bookings both occupy.
    pub async fn check_availability(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        end_date: Option<NaiveDate>,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<AvailabilityResult, EngineError> {
        let dates = DateRange::new(date, end_date.unwrap_or(date))?
            .within_limit(self.policy.max_range_days)?;
        let window = TimeWindow::new(start, end)?;
        self.check_availability_excluding(room_id, dates, window, None, Occupancy::PendingOrApproved)
            .await
    }

    pub async fn check_availability_excluding(
        &self,
        room_id: Ulid,
        dates: DateRange,
        window: TimeWindow,
        exclude: Option<Ulid>,
        occupancy: Occupancy,
    ) -> Result<AvailabilityResult, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        if guard.room.deleted_at.is_some() {
            return Err(EngineError::NotFound(room_id));
        }
        let window = guard.room.hours.admit(window)?;

        let result = check_range(&guard, &dates, &window, exclude, occupancy);
        let label = match &result {
            AvailabilityResult::Available => "available",
            AvailabilityResult::Unavailable(u) => u.reason.as_str(),
        };
        debug!(room = %room_id, %dates, %window, result = label, "availability checked");
        metrics::counter!(observability::AVAILABILITY_CHECKS_TOTAL, "result" => label).increment(1);
        Ok(result)
    }

    /// Free sub-windows of one day: operational hours minus closures, bookings and maintenance.
    pub async fn free_slots(&self, room_id: Ulid, date: NaiveDate) -> Result<Vec<TimeWindow>, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        if guard.room.deleted_at.is_some() {
            return Err(EngineError::NotFound(room_id));
        }
        Ok(free_windows(&guard, date, Occupancy::PendingOrApproved))
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self
            .store
            .room_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Codes are matched case-insensitively; they are issued upper-case.
    pub async fn booking_by_code(&self, code: &str) -> Result<Booking, EngineError> {
        let code = code.trim().to_ascii_uppercase();
        match self.store.booking_for_code(&code) {
            Some(id) => self.get_booking(id).await,
            None => Err(EngineError::UnknownCode(code)),
        }
    }

    /// Every booking of a room, cancelled ones included, ordered by start date.
    pub async fn bookings_for_room(&self, room_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.bookings.clone())
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::new();
        for id in self.store.room_ids() {
            if let Some(rs) = self.get_room(&id) {
                let guard = rs.read().await;
                if guard.room.deleted_at.is_none() {
                    rooms.push(guard.room.clone());
                }
            }
        }
        rooms
    }

    pub async fn get_room_info(&self, room_id: Ulid) -> Result<Room, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        if guard.room.deleted_at.is_some() {
            return Err(EngineError::NotFound(room_id));
        }
        Ok(guard.room.clone())
    }

    pub async fn room_facilities(&self, room_id: Ulid) -> Result<Vec<RoomFacility>, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.facilities.clone())
    }

    pub async fn usage_log(&self, booking_id: Ulid) -> Result<Option<UsageLog>, EngineError> {
        Ok(self.get_booking(booking_id).await?.usage)
    }
}
