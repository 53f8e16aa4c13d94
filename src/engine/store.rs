use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ulid::Ulid;

use crate::lifecycle::BookingStatus;
use crate::limits::MAX_CODE_ATTEMPTS;
use crate::model::*;

use super::SharedRoomState;

/// Rooms plus the lookup indexes that let any owned entity find its room.
pub struct RoomStore {
    rooms: DashMap<Ulid, SharedRoomState>,
    /// Booking, rule, maintenance and document ids → owning room.
    entity_to_room: DashMap<Ulid, Ulid>,
    codes: DashMap<String, Ulid>,
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            entity_to_room: DashMap::new(),
            codes: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: &Ulid) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn insert_room(&self, id: Ulid, state: SharedRoomState) {
        self.rooms.insert(id, state);
    }

    /// Insert unless a room with this id already exists.
    pub fn try_insert_room(&self, id: Ulid, state: SharedRoomState) -> bool {
        match self.rooms.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(state);
                true
            }
        }
    }

    pub fn remove_room(&self, id: &Ulid) {
        self.rooms.remove(id);
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn room_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_room.get(entity_id).map(|e| *e.value())
    }

    pub fn map_entity(&self, entity_id: Ulid, room_id: Ulid) {
        self.entity_to_room.insert(entity_id, room_id);
    }

    /// Claim `entity_id` for `room_id`. False when any room already owns it.
    pub fn reserve_entity(&self, entity_id: Ulid, room_id: Ulid) -> bool {
        match self.entity_to_room.entry(entity_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(room_id);
                true
            }
        }
    }

    pub fn release_entity(&self, entity_id: &Ulid) {
        self.entity_to_room.remove(entity_id);
    }

    pub fn booking_for_code(&self, code: &str) -> Option<Ulid> {
        self.codes.get(code).map(|e| *e.value())
    }

    /// First free `BK-…` code for `id`, widening the id tail on collision.
    pub fn unique_code(&self, id: Ulid, booking_date: chrono::NaiveDate) -> Option<String> {
        (0..MAX_CODE_ATTEMPTS)
            .map(|extra| booking_code(id, booking_date, extra))
            .find(|code| !self.codes.contains_key(code))
    }

    // ── Event application ────────────────────────────────────

    /// Apply a logged event to its room. `RoomCreated` is handled by the caller,
    /// which owns the map insert.
    pub fn apply_event(&self, rs: &mut RoomState, event: &Event) {
        let room_id = rs.room.id;
        match event {
            Event::RoomCreated { .. } => {}
            Event::RoomStatusChanged { status, .. } => {
                rs.room.status = *status;
            }
            Event::RoomDeleted { at, .. } => {
                rs.room.deleted_at = Some(*at);
            }
            Event::RuleAdded { rule, .. } => {
                self.map_entity(rule.id, room_id);
                rs.rules.push(rule.clone());
            }
            Event::RuleRemoved { rule_id, at, .. } => {
                if let Some(rule) = rs.rule_mut(*rule_id) {
                    rule.deleted_at = Some(*at);
                }
            }
            Event::MaintenanceScheduled { log } => {
                self.map_entity(log.id, room_id);
                rs.maintenance.push(log.clone());
            }
            Event::MaintenanceCancelled { log_id, at, .. } => {
                if let Some(log) = rs.maintenance_mut(*log_id) {
                    log.status = MaintenanceStatus::Cancelled;
                    log.deleted_at = Some(*at);
                }
            }
            Event::FacilitiesAttached { facilities, .. } => {
                for f in facilities {
                    match rs.facilities.iter_mut().find(|x| x.facility_id == f.facility_id) {
                        Some(existing) => existing.quantity = f.quantity,
                        None => rs.facilities.push(f.clone()),
                    }
                }
            }
            Event::BookingSubmitted { booking } => {
                self.map_entity(booking.id, room_id);
                for doc in &booking.documents {
                    self.map_entity(doc.id, room_id);
                }
                self.codes.insert(booking.code.clone(), booking.id);
                rs.insert_booking(booking.clone());
            }
            Event::BookingApproved {
                booking_id,
                approver_id,
                at,
                ..
            } => {
                if let Some(b) = rs.booking_mut(*booking_id) {
                    b.status = BookingStatus::Approved;
                    b.approver_id = Some(*approver_id);
                    b.decided_at = Some(*at);
                }
            }
            Event::BookingRejected {
                booking_id,
                approver_id,
                reason,
                at,
                ..
            } => {
                if let Some(b) = rs.booking_mut(*booking_id) {
                    b.status = BookingStatus::Rejected;
                    b.approver_id = Some(*approver_id);
                    b.rejection_reason = Some(reason.clone());
                    b.decided_at = Some(*at);
                }
            }
            Event::BookingCancelled {
                booking_id,
                actor_id,
                at,
                ..
            } => {
                if let Some(b) = rs.booking_mut(*booking_id) {
                    b.status = BookingStatus::Cancelled;
                    b.cancelled_by = Some(*actor_id);
                    b.deleted_at = Some(*at);
                }
            }
            Event::DocumentAttached {
                booking_id,
                document,
                ..
            } => {
                if let Some(b) = rs.booking_mut(*booking_id) {
                    self.map_entity(document.id, room_id);
                    b.documents.push(document.clone());
                }
            }
            Event::DocumentRemoved {
                booking_id,
                document_id,
                at,
                ..
            } => {
                if let Some(doc) = rs
                    .booking_mut(*booking_id)
                    .and_then(|b| b.documents.iter_mut().find(|d| d.id == *document_id))
                {
                    doc.deleted_at = Some(*at);
                }
            }
            Event::CheckedIn { booking_id, at, .. } => {
                if let Some(b) = rs.booking_mut(*booking_id) {
                    b.usage = Some(UsageLog {
                        check_in: *at,
                        check_out: None,
                        late_checkout: false,
                        issue_report: None,
                    });
                }
            }
            Event::CheckedOut {
                booking_id,
                at,
                late,
                issue_report,
                ..
            } => {
                if let Some(b) = rs.booking_mut(*booking_id) {
                    if let Some(usage) = b.usage.as_mut() {
                        usage.check_out = Some(*at);
                        usage.late_checkout = *late;
                        usage.issue_report = issue_report.clone();
                    }
                    b.status = BookingStatus::Completed;
                }
            }
            Event::FeedbackLeft {
                booking_id,
                feedback,
                ..
            } => {
                if let Some(b) = rs.booking_mut(*booking_id) {
                    b.feedback = Some(feedback.clone());
                }
            }
        }
    }
}
