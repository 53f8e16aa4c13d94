use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::calendar::{CalendarError, DateRange, TimeWindow};
use crate::config::BookingPolicy;
use crate::limits::{MAX_DOCUMENTS_PER_BOOKING, MAX_FACILITIES_PER_BATCH};
use crate::model::{DocType, Room, RoomFacility};

lazy_static::lazy_static! {
    static ref EMAIL_REGEX: regex::Regex =
        regex::Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    static ref PHONE_REGEX: regex::Regex = regex::Regex::new(r"^\+?[0-9]{8,15}$").unwrap();
}

// ── Report ───────────────────────────────────────────────────────

/// Field path → first message for that field. Nested paths use dots
/// (`documents.0.name`, `facilities.2.quantity`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: BTreeMap<String, String>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut report = Self::default();
        report.add(field, message);
        report
    }

    /// Record an error unless the field already has one.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn from_errors(errors: &ValidationErrors) -> Self {
        let mut report = Self::default();
        flatten("", errors, &mut report);
        report
    }

    pub fn into_result(self) -> Result<(), ValidationReport> {
        if self.ok() { Ok(()) } else { Err(self) }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.errors).unwrap_or_default()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.errors.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        f.write_str(&parts.join("; "))
    }
}

fn flatten(prefix: &str, errors: &ValidationErrors, report: &mut ValidationReport) {
    for (field, kind) in errors.errors() {
        let key = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                if let Some(first) = list.first() {
                    report.add(key, message_of(first));
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten(&key, inner, report),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    flatten(&format!("{key}.{idx}"), inner, report);
                }
            }
        }
    }
}

fn message_of(err: &ValidationError) -> String {
    err.message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| err.code.to_string())
}

// ── Field validators ─────────────────────────────────────────────

fn validate_contact(contact: &str) -> Result<(), ValidationError> {
    let trimmed = contact.trim();
    let compact: String = trimmed.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    if EMAIL_REGEX.is_match(trimmed) || PHONE_REGEX.is_match(&compact) {
        Ok(())
    } else {
        let mut err = ValidationError::new("contact_format");
        err.message = Some("contact must be an email address or a phone number of 8-15 digits".into());
        Err(err)
    }
}

fn validate_present(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("this field is required".into());
        Err(err)
    } else {
        Ok(())
    }
}

fn validate_ulid(value: &str) -> Result<(), ValidationError> {
    if Ulid::from_string(value.trim()).is_ok() {
        Ok(())
    } else {
        let mut err = ValidationError::new("ulid");
        err.message = Some("must be a valid id".into());
        Err(err)
    }
}

// ── Booking draft ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DocumentUpload {
    pub doc_type: DocType,
    #[validate(length(min = 1, max = 255, message = "document name must be 1-255 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 1024, message = "document path must be 1-1024 characters"))]
    pub path: String,
}

/// A booking request as the client assembled it. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BookingDraft {
    pub id: Ulid,
    pub room_id: Ulid,
    pub requester_id: Ulid,
    pub booking_date: NaiveDate,
    /// Set for range-mode requests.
    pub end_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[validate(range(min = 1, message = "capacity must be at least 1"))]
    pub capacity: u32,
    #[validate(
        custom(function = "validate_present"),
        length(max = 2000, message = "purpose must be at most 2000 characters")
    )]
    pub purpose: String,
    #[validate(
        custom(function = "validate_present"),
        length(max = 255, message = "responsible person must be at most 255 characters")
    )]
    pub responsible_person: String,
    #[validate(custom(function = "validate_contact"))]
    pub contact: String,
    #[validate(nested)]
    pub documents: Vec<DocumentUpload>,
}

impl BookingDraft {
    pub fn date_range(&self) -> Result<DateRange, CalendarError> {
        DateRange::new(self.booking_date, self.end_date.unwrap_or(self.booking_date))
    }

    pub fn window(&self) -> Result<TimeWindow, CalendarError> {
        TimeWindow::new(self.start_time, self.end_time)
    }
}

/// Validate a draft against its room and policy, collecting every problem.
pub fn validate_booking(draft: &BookingDraft, room: &Room, policy: &BookingPolicy) -> ValidationReport {
    let mut report = match draft.validate() {
        Ok(()) => ValidationReport::default(),
        Err(errors) => ValidationReport::from_errors(&errors),
    };

    if draft.documents.len() > MAX_DOCUMENTS_PER_BOOKING {
        report.add(
            "documents",
            format!("at most {MAX_DOCUMENTS_PER_BOOKING} documents per booking"),
        );
    }
    if !draft.documents.iter().any(|d| d.doc_type == DocType::PermitLetter) {
        report.add("permit_letter", "a permit letter is required");
    }

    if draft.capacity > room.capacity {
        report.add(
            "capacity",
            format!("requested capacity {} exceeds room capacity {}", draft.capacity, room.capacity),
        );
    } else if draft.capacity < policy.min_capacity {
        report.add(
            "capacity",
            format!("requested capacity must be at least {}", policy.min_capacity),
        );
    }

    if let Some(end_date) = draft.end_date {
        match DateRange::new(draft.booking_date, end_date) {
            Err(_) => report.add("end_date", "end date must be on or after the booking date"),
            Ok(range) => {
                if let Err(e) = range.within_limit(policy.max_range_days) {
                    report.add("end_date", e.to_string());
                }
            }
        }
    }

    let hours = room.hours;
    let start_ok = hours.clamp(draft.start_time).is_ok() && draft.start_time < hours.closes;
    let end_ok = hours.clamp(draft.end_time).is_ok() && draft.end_time > hours.opens;
    if !start_ok {
        report.add(
            "start_time",
            format!("start time {} is outside operational hours {hours}", draft.start_time.format("%H:%M")),
        );
    }
    if !end_ok {
        report.add(
            "end_time",
            format!("end time {} is outside operational hours {hours}", draft.end_time.format("%H:%M")),
        );
    }
    if draft.start_time >= draft.end_time {
        report.add("end_time", "end time must be after start time");
    }

    report
}

// ── Room facilities batch ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct FacilityAttachment {
    #[validate(custom(function = "validate_ulid"))]
    pub facility_id: String,
    #[validate(range(min = 1, max = 1000, message = "quantity must be between 1 and 1000"))]
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct FacilityBatch {
    #[validate(nested)]
    pub facilities: Vec<FacilityAttachment>,
}

/// Validate a facility batch and convert it, reporting per-item paths.
pub fn validate_facilities(batch: &FacilityBatch) -> Result<Vec<RoomFacility>, ValidationReport> {
    let mut report = match batch.validate() {
        Ok(()) => ValidationReport::default(),
        Err(errors) => ValidationReport::from_errors(&errors),
    };

    if batch.facilities.is_empty() {
        report.add("facilities", "at least one facility is required");
    } else if batch.facilities.len() > MAX_FACILITIES_PER_BATCH {
        report.add(
            "facilities",
            format!("at most {MAX_FACILITIES_PER_BATCH} facilities per batch"),
        );
    }

    let mut seen = HashSet::new();
    for (idx, item) in batch.facilities.iter().enumerate() {
        if !seen.insert(item.facility_id.trim()) {
            report.add(format!("facilities.{idx}.facility_id"), "duplicate facility in batch");
        }
    }

    report.into_result()?;
    let mut facilities = Vec::with_capacity(batch.facilities.len());
    for (idx, item) in batch.facilities.iter().enumerate() {
        let facility_id = Ulid::from_string(item.facility_id.trim()).map_err(|_| {
            ValidationReport::single(format!("facilities.{idx}.facility_id"), "must be a valid id")
        })?;
        facilities.push(RoomFacility {
            facility_id,
            quantity: item.quantity,
        });
    }
    Ok(facilities)
}
