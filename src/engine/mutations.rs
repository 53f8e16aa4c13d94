use std::sync::Arc;

use chrono::{Utc, Weekday};
use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::calendar::{DateTimeSpan, TimeWindow};
use crate::limits::*;
use crate::model::*;
use crate::validation::{validate_facilities, FacilityBatch, ValidationReport};

use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_room(&self, new: NewRoom) -> Result<Room, EngineError> {
        let _gate = self.rooms_gate.read().await;
        if self.store.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let name = new.name.trim().to_string();
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        let mut report = ValidationReport::default();
        if name.is_empty() {
            report.add("name", "room name is required");
        }
        if new.capacity == 0 {
            report.add("capacity", "room capacity must be greater than 0");
        }
        report.into_result().map_err(EngineError::Validation)?;
        if self.store.contains_room(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }

        let room = Room {
            id: new.id,
            building_id: new.building_id,
            category_id: new.category_id,
            name,
            capacity: new.capacity,
            status: new.status.unwrap_or(RoomStatus::Available),
            hours: new.hours.unwrap_or(self.policy.default_hours),
            requires_approval: new.requires_approval.unwrap_or(true),
            deleted_at: None,
        };
        let event = Event::RoomCreated { room: room.clone() };
        // Publish the room locked so nobody reads it before the log has it.
        let state = Arc::new(RwLock::new(RoomState::new(room.clone())));
        let mut guard = state.clone().write_owned().await;
        if !self.store.try_insert_room(room.id, state) {
            return Err(EngineError::AlreadyExists(room.id));
        }
        if let Err(e) = self.wal_append(&event).await {
            self.store.remove_room(&room.id);
            guard.room.deleted_at = Some(Utc::now());
            return Err(e);
        }
        drop(guard);
        info!(room = %room.id, name = %room.name, capacity = room.capacity, hours = %room.hours, "room created");
        Ok(room)
    }

    pub async fn set_room_status(&self, room_id: Ulid, status: RoomStatus) -> Result<(), EngineError> {
        let mut guard = self.live_room_write(room_id).await?;
        if guard.room.status == status {
            return Ok(());
        }
        let event = Event::RoomStatusChanged { room_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(room = %room_id, %status, "room status changed");
        Ok(())
    }

    /// Soft delete; the room's history stays in the log.
    pub async fn delete_room(&self, room_id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.live_room_write(room_id).await?;
        let event = Event::RoomDeleted {
            room_id,
            at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(room = %room_id, "room deleted");
        Ok(())
    }

    pub async fn add_rule(
        &self,
        id: Ulid,
        room_id: Ulid,
        weekday: Weekday,
        window: TimeWindow,
        is_available: bool,
    ) -> Result<(), EngineError> {
        let window = TimeWindow::new(window.start, window.end)?;
        if self.store.room_for_entity(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut guard = self.live_room_write(room_id).await?;
        if guard.rules.len() >= MAX_RULES_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many rules on room"));
        }
        let event = Event::RuleAdded {
            room_id,
            rule: AvailabilityRule {
                id,
                weekday,
                window,
                is_available,
                deleted_at: None,
            },
        };
        self.persist_new_entity(id, &mut guard, &event).await
    }

    pub async fn remove_rule(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.rules.iter().any(|r| r.id == id && r.deleted_at.is_none()) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::RuleRemoved {
            room_id,
            rule_id: id,
            at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room_id)
    }

    pub async fn schedule_maintenance(
        &self,
        id: Ulid,
        room_id: Ulid,
        span: DateTimeSpan,
        description: Option<String>,
        status: MaintenanceStatus,
    ) -> Result<(), EngineError> {
        if span.start >= span.end {
            return Err(EngineError::Validation(ValidationReport::single(
                "ends_at",
                "maintenance must end after it starts",
            )));
        }
        let description = description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
        if description.as_ref().is_some_and(|d| d.len() > MAX_TEXT_LEN) {
            return Err(EngineError::LimitExceeded("maintenance description too long"));
        }
        if self.store.room_for_entity(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut guard = self.live_room_write(room_id).await?;
        if guard.maintenance.len() >= MAX_MAINTENANCE_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many maintenance logs on room"));
        }
        let event = Event::MaintenanceScheduled {
            log: MaintenanceLog {
                id,
                room_id,
                span,
                description,
                status,
                deleted_at: None,
            },
        };
        self.persist_new_entity(id, &mut guard, &event).await?;
        info!(room = %room_id, maintenance = %id, %status, "maintenance scheduled");
        Ok(())
    }

    pub async fn cancel_maintenance(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.maintenance.iter().any(|m| m.id == id && m.deleted_at.is_none()) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::MaintenanceCancelled {
            room_id,
            log_id: id,
            at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(room = %room_id, maintenance = %id, "maintenance cancelled");
        Ok(room_id)
    }

    /// Attach or re-quantify facilities. The batch is validated as a whole first.
    pub async fn attach_facilities(
        &self,
        room_id: Ulid,
        batch: &FacilityBatch,
    ) -> Result<usize, EngineError> {
        let facilities = validate_facilities(batch).map_err(EngineError::Validation)?;
        let mut guard = self.live_room_write(room_id).await?;
        let count = facilities.len();
        let event = Event::FacilitiesAttached { room_id, facilities };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(count)
    }

    /// Rewrite the WAL with one snapshot event per entity, soft-deleted ones included.
    /// Read locks on every room are held until the rewrite lands so no append slips between.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.rooms_gate.write().await;
        let mut events = Vec::new();
        let mut guards = Vec::new();
        for id in self.store.room_ids() {
            let Some(rs) = self.store.get_room(&id) else {
                continue;
            };
            let guard = rs.read_owned().await;
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            for rule in &guard.rules {
                events.push(Event::RuleAdded {
                    room_id: id,
                    rule: rule.clone(),
                });
            }
            for log in &guard.maintenance {
                events.push(Event::MaintenanceScheduled { log: log.clone() });
            }
            if !guard.facilities.is_empty() {
                events.push(Event::FacilitiesAttached {
                    room_id: id,
                    facilities: guard.facilities.clone(),
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingSubmitted {
                    booking: booking.clone(),
                });
            }
            guards.push(guard);
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);
        info!(events = count, "WAL compacted");
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
