use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::{DateRange, DateTimeSpan, OperationalHours, TimeWindow};
use crate::lifecycle::BookingStatus;

/// Wall-clock instant used for audit fields (`created_at`, `deleted_at`, decisions).
pub type Timestamp = DateTime<Utc>;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

// ── Rooms ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Maintenance,
    /// Informational only; availability is decided by bookings.
    Booked,
}

string_enum!(RoomStatus {
    Available => "available",
    Maintenance => "maintenance",
    Booked => "booked",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub building_id: Ulid,
    pub category_id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub status: RoomStatus,
    pub hours: OperationalHours,
    pub requires_approval: bool,
    pub deleted_at: Option<Timestamp>,
}

/// Room creation input; unset fields take defaults (policy hours, `available`, approval required).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub id: Ulid,
    pub building_id: Ulid,
    pub category_id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub status: Option<RoomStatus>,
    pub hours: Option<OperationalHours>,
    pub requires_approval: Option<bool>,
}

/// Weekday-recurring window marked available or unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub weekday: Weekday,
    pub window: TimeWindow,
    pub is_available: bool,
    pub deleted_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaintenanceStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

string_enum!(MaintenanceStatus {
    Scheduled => "scheduled",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceLog {
    pub id: Ulid,
    pub room_id: Ulid,
    pub span: DateTimeSpan,
    pub description: Option<String>,
    pub status: MaintenanceStatus,
    pub deleted_at: Option<Timestamp>,
}

impl MaintenanceLog {
    pub fn blocks(&self) -> bool {
        self.deleted_at.is_none() && self.status != MaintenanceStatus::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomFacility {
    pub facility_id: Ulid,
    pub quantity: u32,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    PermitLetter,
    Proposal,
    AttendanceList,
}

string_enum!(DocType {
    PermitLetter => "permit_letter",
    Proposal => "proposal",
    AttendanceList => "attendance_list",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDocument {
    pub id: Ulid,
    pub doc_type: DocType,
    pub name: String,
    /// Opaque storage path; the core never opens it.
    pub path: String,
    pub deleted_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLog {
    pub check_in: NaiveDateTime,
    pub check_out: Option<NaiveDateTime>,
    pub late_checkout: bool,
    pub issue_report: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub code: String,
    pub room_id: Ulid,
    pub requester_id: Ulid,
    /// `dates.start` is the booking date; range-mode requests extend `dates.end`.
    pub dates: DateRange,
    pub window: TimeWindow,
    pub capacity: u32,
    pub purpose: String,
    pub responsible_person: String,
    pub contact: String,
    pub status: BookingStatus,
    pub requires_approval: bool,
    pub approver_id: Option<Ulid>,
    pub rejection_reason: Option<String>,
    pub decided_at: Option<Timestamp>,
    pub cancelled_by: Option<Ulid>,
    pub documents: Vec<BookingDocument>,
    pub usage: Option<UsageLog>,
    pub feedback: Option<Feedback>,
    pub created_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Booking {
    pub fn booking_date(&self) -> NaiveDate {
        self.dates.start
    }

    /// Live and in a slot-holding status.
    pub fn holds_slot(&self) -> bool {
        self.deleted_at.is_none() && self.status.holds_slot()
    }

    pub fn active_documents(&self) -> impl Iterator<Item = &BookingDocument> {
        self.documents.iter().filter(|d| d.deleted_at.is_none())
    }

    pub fn permit_letters(&self) -> usize {
        self.active_documents()
            .filter(|d| d.doc_type == DocType::PermitLetter)
            .count()
    }

    /// Last instant of the reservation: end time on the last booked date.
    pub fn ends_at(&self) -> NaiveDateTime {
        self.dates.end.and_time(self.window.end)
    }
}

/// `BK-YYMMDD-XXXXXX`: booking date plus the tail of the id. `extra` widens the
/// tail when a shorter code is already taken.
pub fn booking_code(id: Ulid, booking_date: NaiveDate, extra: usize) -> String {
    let encoded = id.to_string();
    let take = (6 + extra).min(encoded.len());
    let tail = &encoded[encoded.len() - take..];
    format!("BK-{}-{}", booking_date.format("%y%m%d"), tail)
}

// ── Per-room state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// In creation order; later entries win ties during rule resolution.
    pub rules: Vec<AvailabilityRule>,
    pub maintenance: Vec<MaintenanceLog>,
    /// Sorted by `dates.start`.
    pub bookings: Vec<Booking>,
    pub facilities: Vec<RoomFacility>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            rules: Vec::new(),
            maintenance: Vec::new(),
            bookings: Vec::new(),
            facilities: Vec::new(),
        }
    }

    /// Insert keeping `bookings` ordered by start date; equal dates keep arrival order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.dates.start <= booking.dates.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose date range includes `date`, live or not.
    /// Skips everything starting after `date` by binary search.
    pub fn bookings_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.dates.start <= date);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.dates.end >= date)
    }

    pub fn rules_for(&self, weekday: Weekday) -> impl Iterator<Item = (usize, &AvailabilityRule)> {
        self.rules
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.deleted_at.is_none() && r.weekday == weekday)
    }

    /// Blocking maintenance logs touching `date`.
    pub fn maintenance_on(&self, date: NaiveDate) -> impl Iterator<Item = &MaintenanceLog> {
        self.maintenance
            .iter()
            .filter(move |m| m.blocks() && m.span.touches_date(date))
    }

    pub fn rule_mut(&mut self, id: Ulid) -> Option<&mut AvailabilityRule> {
        self.rules.iter_mut().find(|r| r.id == id)
    }

    pub fn maintenance_mut(&mut self, id: Ulid) -> Option<&mut MaintenanceLog> {
        self.maintenance.iter_mut().find(|m| m.id == id)
    }
}

/// The event types. This is the WAL record body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomStatusChanged {
        room_id: Ulid,
        status: RoomStatus,
    },
    RoomDeleted {
        room_id: Ulid,
        at: Timestamp,
    },
    RuleAdded {
        room_id: Ulid,
        rule: AvailabilityRule,
    },
    RuleRemoved {
        room_id: Ulid,
        rule_id: Ulid,
        at: Timestamp,
    },
    MaintenanceScheduled {
        log: MaintenanceLog,
    },
    MaintenanceCancelled {
        room_id: Ulid,
        log_id: Ulid,
        at: Timestamp,
    },
    FacilitiesAttached {
        room_id: Ulid,
        facilities: Vec<RoomFacility>,
    },
    /// Full booking snapshot; compaction re-emits one per booking.
    BookingSubmitted {
        booking: Booking,
    },
    BookingApproved {
        room_id: Ulid,
        booking_id: Ulid,
        approver_id: Ulid,
        at: Timestamp,
    },
    BookingRejected {
        room_id: Ulid,
        booking_id: Ulid,
        approver_id: Ulid,
        reason: String,
        at: Timestamp,
    },
    BookingCancelled {
        room_id: Ulid,
        booking_id: Ulid,
        actor_id: Ulid,
        at: Timestamp,
    },
    DocumentAttached {
        room_id: Ulid,
        booking_id: Ulid,
        document: BookingDocument,
    },
    DocumentRemoved {
        room_id: Ulid,
        booking_id: Ulid,
        document_id: Ulid,
        at: Timestamp,
    },
    CheckedIn {
        room_id: Ulid,
        booking_id: Ulid,
        at: NaiveDateTime,
    },
    CheckedOut {
        room_id: Ulid,
        booking_id: Ulid,
        at: NaiveDateTime,
        late: bool,
        issue_report: Option<String>,
    },
    FeedbackLeft {
        room_id: Ulid,
        booking_id: Ulid,
        feedback: Feedback,
    },
}

impl Event {
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomCreated { room } => room.id,
            Event::MaintenanceScheduled { log } => log.room_id,
            Event::BookingSubmitted { booking } => booking.room_id,
            Event::RoomStatusChanged { room_id, .. }
            | Event::RoomDeleted { room_id, .. }
            | Event::RuleAdded { room_id, .. }
            | Event::RuleRemoved { room_id, .. }
            | Event::MaintenanceCancelled { room_id, .. }
            | Event::FacilitiesAttached { room_id, .. }
            | Event::BookingApproved { room_id, .. }
            | Event::BookingRejected { room_id, .. }
            | Event::BookingCancelled { room_id, .. }
            | Event::DocumentAttached { room_id, .. }
            | Event::DocumentRemoved { room_id, .. }
            | Event::CheckedIn { room_id, .. }
            | Event::CheckedOut { room_id, .. }
            | Event::FeedbackLeft { room_id, .. } => *room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn window(sh: u32, eh: u32) -> TimeWindow {
        TimeWindow::new(
            NaiveTime::from_hms_opt(sh, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(eh, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn room() -> Room {
        Room {
            id: Ulid::new(),
            building_id: Ulid::new(),
            category_id: Ulid::new(),
            name: "R-101".into(),
            capacity: 30,
            status: RoomStatus::Available,
            hours: OperationalHours::default(),
            requires_approval: true,
            deleted_at: None,
        }
    }

    fn booking(room_id: Ulid, start: &str, end: &str) -> Booking {
        let id = Ulid::new();
        Booking {
            id,
            code: booking_code(id, d(start), 0),
            room_id,
            requester_id: Ulid::new(),
            dates: DateRange::new(d(start), d(end)).unwrap(),
            window: window(9, 11),
            capacity: 10,
            purpose: "seminar".into(),
            responsible_person: "Dr. Rahma".into(),
            contact: "rahma@example.ac.id".into(),
            status: BookingStatus::Pending,
            requires_approval: true,
            approver_id: None,
            rejection_reason: None,
            decided_at: None,
            cancelled_by: None,
            documents: Vec::new(),
            usage: None,
            feedback: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn bookings_stay_sorted() {
        let mut rs = RoomState::new(room());
        let rid = rs.room.id;
        rs.insert_booking(booking(rid, "2025-08-03", "2025-08-03"));
        rs.insert_booking(booking(rid, "2025-08-01", "2025-08-01"));
        rs.insert_booking(booking(rid, "2025-08-02", "2025-08-02"));
        let dates: Vec<_> = rs.bookings.iter().map(|b| b.booking_date()).collect();
        assert_eq!(dates, vec![d("2025-08-01"), d("2025-08-02"), d("2025-08-03")]);
    }

    #[test]
    fn bookings_on_includes_ranges() {
        let mut rs = RoomState::new(room());
        let rid = rs.room.id;
        let range = booking(rid, "2025-07-30", "2025-08-02");
        let range_id = range.id;
        rs.insert_booking(range);
        rs.insert_booking(booking(rid, "2025-08-01", "2025-08-01"));
        rs.insert_booking(booking(rid, "2025-08-05", "2025-08-05"));

        let hits: Vec<_> = rs.bookings_on(d("2025-08-01")).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, range_id);

        let hits: Vec<_> = rs.bookings_on(d("2025-08-03")).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn cancelled_booking_releases_slot() {
        let mut b = booking(Ulid::new(), "2025-08-01", "2025-08-01");
        assert!(b.holds_slot());
        b.status = BookingStatus::Cancelled;
        assert!(!b.holds_slot());
        b.status = BookingStatus::Approved;
        b.deleted_at = Some(Utc::now());
        assert!(!b.holds_slot());
    }

    #[test]
    fn code_format() {
        let id = Ulid::new();
        let code = booking_code(id, d("2025-08-01"), 0);
        assert!(code.starts_with("BK-250801-"));
        assert_eq!(code.len(), "BK-250801-".len() + 6);
        assert!(id.to_string().ends_with(&code[10..]));

        let wider = booking_code(id, d("2025-08-01"), 2);
        assert_eq!(wider.len(), code.len() + 2);
        assert!(wider.ends_with(&code[10..]));
    }

    #[test]
    fn maintenance_blocking() {
        let mut log = MaintenanceLog {
            id: Ulid::new(),
            room_id: Ulid::new(),
            span: window(8, 12).on(d("2025-08-01")),
            description: None,
            status: MaintenanceStatus::InProgress,
            deleted_at: None,
        };
        assert!(log.blocks());
        log.status = MaintenanceStatus::Completed;
        assert!(log.blocks());
        log.status = MaintenanceStatus::Cancelled;
        assert!(!log.blocks());
    }

    #[test]
    fn permit_letters_ignore_removed() {
        let mut b = booking(Ulid::new(), "2025-08-01", "2025-08-01");
        b.documents.push(BookingDocument {
            id: Ulid::new(),
            doc_type: DocType::PermitLetter,
            name: "permit.pdf".into(),
            path: "uploads/permit.pdf".into(),
            deleted_at: Some(Utc::now()),
        });
        b.documents.push(BookingDocument {
            id: Ulid::new(),
            doc_type: DocType::Proposal,
            name: "proposal.pdf".into(),
            path: "uploads/proposal.pdf".into(),
            deleted_at: None,
        });
        assert_eq!(b.permit_letters(), 0);
        assert_eq!(b.active_documents().count(), 1);
    }

    #[test]
    fn string_enums_parse() {
        assert_eq!("In_Progress".parse::<MaintenanceStatus>(), Ok(MaintenanceStatus::InProgress));
        assert_eq!("permit_letter".parse::<DocType>(), Ok(DocType::PermitLetter));
        assert_eq!(RoomStatus::Maintenance.to_string(), "maintenance");
        assert!("closed".parse::<RoomStatus>().is_err());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let r = room();
        let event = Event::BookingSubmitted {
            booking: booking(r.id, "2025-08-01", "2025-08-02"),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.room_id(), r.id);
    }
}
