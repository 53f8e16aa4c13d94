use chrono::{NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, info, warn};
use ulid::Ulid;
use validator::Validate;

use crate::lifecycle::{Actor, BookingStatus, Transition};
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::validation::{validate_booking, BookingDraft, DocumentUpload, ValidationReport};

use super::availability::Occupancy;
use super::conflict::{check_no_conflict, now_local, today};
use super::{Engine, EngineError};

/// An approver's verdict on a pending booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { reason: String },
}

fn booking_of(rs: &RoomState, id: Ulid) -> Result<&Booking, EngineError> {
    rs.booking(id).ok_or(EngineError::NotFound(id))
}

fn snapshot(rs: &RoomState, id: Ulid) -> Result<Booking, EngineError> {
    booking_of(rs, id).cloned()
}

/// Documents may change only while the booking still holds its slot.
fn ensure_amendable(booking: &Booking) -> Result<(), EngineError> {
    if booking.holds_slot() {
        Ok(())
    } else {
        Err(EngineError::Validation(ValidationReport::single(
            "status",
            format!("documents cannot change on a {} booking", booking.status),
        )))
    }
}

fn optional_text(text: Option<String>, what: &'static str) -> Result<Option<String>, EngineError> {
    let text = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    if text.as_ref().is_some_and(|t| t.len() > MAX_TEXT_LEN) {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(text)
}

impl Engine {
    /// Validate, check availability and record a new booking, all under the room's write lock.
    pub async fn submit_booking(&self, draft: BookingDraft) -> Result<Booking, EngineError> {
        let mut guard = self.live_room_write(draft.room_id).await?;
        if self.store.room_for_entity(&draft.id).is_some() {
            return Err(EngineError::AlreadyExists(draft.id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        validate_booking(&draft, &guard.room, &self.policy)
            .into_result()
            .map_err(EngineError::Validation)?;
        let dates = draft.date_range()?;
        let window = draft.window()?;

        check_no_conflict(&guard, &dates, &window, None, Occupancy::PendingOrApproved).map_err(|u| {
            debug!(room = %draft.room_id, "submission rejected: {u}");
            EngineError::Unavailable(u)
        })?;

        let requires_approval = guard.room.requires_approval;
        let status = if requires_approval {
            BookingStatus::Pending
        } else {
            BookingStatus::Pending.apply(Transition::Approve)?
        };
        let code = self
            .store
            .unique_code(draft.id, dates.start)
            .ok_or(EngineError::LimitExceeded("booking code space exhausted"))?;
        let now = Utc::now();

        let booking = Booking {
            id: draft.id,
            code,
            room_id: draft.room_id,
            requester_id: draft.requester_id,
            dates,
            window,
            capacity: draft.capacity,
            purpose: draft.purpose.trim().to_string(),
            responsible_person: draft.responsible_person.trim().to_string(),
            contact: draft.contact.trim().to_string(),
            status,
            requires_approval,
            approver_id: None,
            rejection_reason: None,
            decided_at: (!requires_approval).then_some(now),
            cancelled_by: None,
            documents: draft
                .documents
                .into_iter()
                .map(|d| BookingDocument {
                    id: Ulid::new(),
                    doc_type: d.doc_type,
                    name: d.name,
                    path: d.path,
                    deleted_at: None,
                })
                .collect(),
            usage: None,
            feedback: None,
            created_at: now,
            deleted_at: None,
        };

        let event = Event::BookingSubmitted {
            booking: booking.clone(),
        };
        self.persist_new_entity(booking.id, &mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_SUBMITTED_TOTAL, "status" => booking.status.as_str())
            .increment(1);
        info!(
            booking = %booking.id,
            code = %booking.code,
            room = %booking.room_id,
            dates = %booking.dates,
            window = %booking.window,
            status = %booking.status,
            "booking submitted"
        );
        Ok(booking)
    }

    /// Approve or reject a pending booking. Approval re-runs availability against
    /// already-approved bookings while holding the room's write lock, so two
    /// overlapping bookings can never both end up approved.
    pub async fn decide_booking(
        &self,
        id: Ulid,
        decision: Decision,
        actor: Actor,
    ) -> Result<Booking, EngineError> {
        if !actor.can_decide() {
            return Err(EngineError::Forbidden {
                actor: actor.id,
                action: "decide bookings",
            });
        }
        let (room_id, mut guard) = self.live_entity_write(&id).await?;
        let booking = booking_of(&guard, id)?;
        let now = Utc::now();

        let event = match decision {
            Decision::Approve => {
                booking.status.apply(Transition::Approve)?;
                if let Err(u) = check_no_conflict(
                    &guard,
                    &booking.dates,
                    &booking.window,
                    Some(id),
                    Occupancy::ApprovedOnly,
                ) {
                    metrics::counter!(observability::APPROVAL_CONFLICTS_TOTAL).increment(1);
                    warn!(booking = %id, "approval lost the slot: {u}");
                    return Err(EngineError::Conflict(u));
                }
                Event::BookingApproved {
                    room_id,
                    booking_id: id,
                    approver_id: actor.id,
                    at: now,
                }
            }
            Decision::Reject { reason } => {
                booking.status.apply(Transition::Reject)?;
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(EngineError::Validation(ValidationReport::single(
                        "rejection_reason",
                        "a reason is required when rejecting",
                    )));
                }
                if reason.len() > MAX_TEXT_LEN {
                    return Err(EngineError::LimitExceeded("rejection reason too long"));
                }
                Event::BookingRejected {
                    room_id,
                    booking_id: id,
                    approver_id: actor.id,
                    reason: reason.to_string(),
                    at: now,
                }
            }
        };

        self.persist_and_apply(&mut guard, &event).await?;
        let booking = snapshot(&guard, id)?;
        metrics::counter!(observability::BOOKING_DECISIONS_TOTAL, "outcome" => booking.status.as_str())
            .increment(1);
        info!(booking = %id, approver = %actor.id, status = %booking.status, "booking decided");
        Ok(booking)
    }

    pub async fn cancel_booking(&self, id: Ulid, actor: Actor) -> Result<Booking, EngineError> {
        self.cancel_booking_at(id, actor, today()).await
    }

    /// Cancel as of `today`. Cancelling an already-cancelled booking returns it unchanged.
    pub async fn cancel_booking_at(
        &self,
        id: Ulid,
        actor: Actor,
        today: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = booking_of(&guard, id)?;
        if !actor.can_cancel(booking.requester_id) {
            return Err(EngineError::Forbidden {
                actor: actor.id,
                action: "cancel this booking",
            });
        }
        if booking.status == BookingStatus::Cancelled {
            debug!(booking = %id, "already cancelled");
            return Ok(booking.clone());
        }
        booking.status.apply(Transition::Cancel)?;
        if today > booking.booking_date() {
            return Err(EngineError::BookingDatePassed(booking.booking_date()));
        }

        let event = Event::BookingCancelled {
            room_id,
            booking_id: id,
            actor_id: actor.id,
            at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, actor = %actor.id, "booking cancelled");
        snapshot(&guard, id)
    }

    pub async fn check_in(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.check_in_at(id, now_local()).await
    }

    pub async fn check_in_at(&self, id: Ulid, at: NaiveDateTime) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.live_entity_write(&id).await?;
        let booking = booking_of(&guard, id)?;
        booking.status.apply(Transition::CheckIn)?;
        if booking.usage.is_some() {
            return Err(EngineError::AlreadyCheckedIn(id));
        }

        let event = Event::CheckedIn {
            room_id,
            booking_id: id,
            at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, "checked in");
        snapshot(&guard, id)
    }

    pub async fn check_out(&self, id: Ulid, issue_report: Option<String>) -> Result<Booking, EngineError> {
        self.check_out_at(id, issue_report, now_local()).await
    }

    /// Close the usage log and complete the booking. Late if after the last booked date's end time.
    pub async fn check_out_at(
        &self,
        id: Ulid,
        issue_report: Option<String>,
        at: NaiveDateTime,
    ) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.live_entity_write(&id).await?;
        let booking = booking_of(&guard, id)?;
        booking.status.apply(Transition::CheckOut)?;
        if booking.usage.is_none() {
            return Err(EngineError::NotCheckedIn(id));
        }
        let issue_report = optional_text(issue_report, "issue report too long")?;
        let late = at > booking.ends_at();

        let event = Event::CheckedOut {
            room_id,
            booking_id: id,
            at,
            late,
            issue_report,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, late, "checked out");
        snapshot(&guard, id)
    }

    pub async fn leave_feedback(
        &self,
        id: Ulid,
        actor: Actor,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = booking_of(&guard, id)?;
        if actor.id != booking.requester_id {
            return Err(EngineError::Forbidden {
                actor: actor.id,
                action: "leave feedback on this booking",
            });
        }
        if booking.status != BookingStatus::Completed {
            return Err(EngineError::Validation(ValidationReport::single(
                "status",
                format!("feedback needs a completed booking, this one is {}", booking.status),
            )));
        }
        if booking.feedback.is_some() {
            return Err(EngineError::FeedbackExists(id));
        }
        if !(1..=5).contains(&rating) {
            return Err(EngineError::Validation(ValidationReport::single(
                "rating",
                "rating must be between 1 and 5",
            )));
        }
        let comment = optional_text(comment, "feedback comment too long")?;

        let event = Event::FeedbackLeft {
            room_id,
            booking_id: id,
            feedback: Feedback {
                rating,
                comment,
                created_at: Utc::now(),
            },
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, rating, "feedback left");
        snapshot(&guard, id)
    }

    pub async fn attach_document(
        &self,
        id: Ulid,
        booking_id: Ulid,
        upload: DocumentUpload,
    ) -> Result<BookingDocument, EngineError> {
        if let Err(errors) = upload.validate() {
            return Err(EngineError::Validation(ValidationReport::from_errors(&errors)));
        }
        if self.store.room_for_entity(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let (room_id, mut guard) = self.live_entity_write(&booking_id).await?;
        let booking = booking_of(&guard, booking_id)?;
        ensure_amendable(booking)?;
        if booking.active_documents().count() >= MAX_DOCUMENTS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many documents on booking"));
        }

        let document = BookingDocument {
            id,
            doc_type: upload.doc_type,
            name: upload.name,
            path: upload.path,
            deleted_at: None,
        };
        let event = Event::DocumentAttached {
            room_id,
            booking_id,
            document: document.clone(),
        };
        self.persist_new_entity(id, &mut guard, &event).await?;
        info!(booking = %booking_id, document = %id, doc_type = %document.doc_type, "document attached");
        Ok(document)
    }

    /// Soft-delete a document. A pending booking always keeps at least one permit letter.
    pub async fn remove_document(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.live_entity_write(&id).await?;
        let booking = guard
            .bookings
            .iter()
            .find(|b| b.active_documents().any(|d| d.id == id))
            .ok_or(EngineError::NotFound(id))?;
        ensure_amendable(booking)?;
        let is_permit = booking
            .active_documents()
            .any(|d| d.id == id && d.doc_type == DocType::PermitLetter);
        if is_permit && booking.status == BookingStatus::Pending && booking.permit_letters() <= 1 {
            return Err(EngineError::Validation(ValidationReport::single(
                "permit_letter",
                "the last permit letter of a pending booking cannot be removed",
            )));
        }

        let booking_id = booking.id;
        let event = Event::DocumentRemoved {
            room_id,
            booking_id,
            document_id: id,
            at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %booking_id, document = %id, "document removed");
        Ok(booking_id)
    }
}
