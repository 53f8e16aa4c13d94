use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Persisted booking status. The client-side draft never reaches the store,
/// so it has no variant here (see `validation::BookingDraft`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Approved,
        BookingStatus::Rejected,
        BookingStatus::Cancelled,
        BookingStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }

    /// Statuses whose window blocks other requests.
    pub fn holds_slot(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    /// Transitions that may fire from this status.
    pub fn allowed_transitions(self) -> Vec<Transition> {
        Transition::ALL
            .into_iter()
            .filter(|t| t.sources().contains(&self))
            .collect()
    }

    /// Distinct statuses reachable in one step, excluding self-loops.
    pub fn allowed_next(self) -> Vec<BookingStatus> {
        let mut next = Vec::new();
        for t in self.allowed_transitions() {
            let to = t.target(self);
            if to != self && !next.contains(&to) {
                next.push(to);
            }
        }
        next
    }

    pub fn apply(self, transition: Transition) -> Result<BookingStatus, InvalidTransition> {
        if transition.sources().contains(&self) {
            Ok(transition.target(self))
        } else {
            Err(InvalidTransition {
                from: self,
                attempted: transition,
                allowed: self.allowed_next(),
            })
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown booking status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    Approve,
    Reject,
    Cancel,
    CheckIn,
    CheckOut,
}

impl Transition {
    pub const ALL: [Transition; 5] = [
        Transition::Approve,
        Transition::Reject,
        Transition::Cancel,
        Transition::CheckIn,
        Transition::CheckOut,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
            Transition::CheckIn => "check in",
            Transition::CheckOut => "check out",
        }
    }

    fn sources(self) -> &'static [BookingStatus] {
        match self {
            Transition::Approve | Transition::Reject => &[BookingStatus::Pending],
            Transition::Cancel => &[BookingStatus::Pending, BookingStatus::Approved],
            Transition::CheckIn | Transition::CheckOut => &[BookingStatus::Approved],
        }
    }

    fn target(self, from: BookingStatus) -> BookingStatus {
        match self {
            Transition::Approve => BookingStatus::Approved,
            Transition::Reject => BookingStatus::Rejected,
            Transition::Cancel => BookingStatus::Cancelled,
            // check-in is recorded in the usage log; status is unchanged
            Transition::CheckIn => from,
            Transition::CheckOut => BookingStatus::Completed,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: BookingStatus,
    pub attempted: Transition,
    pub allowed: Vec<BookingStatus>,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} a {} booking", self.attempted, self.from)?;
        if self.allowed.is_empty() {
            write!(f, "; {} is terminal", self.from)
        } else {
            let names: Vec<&str> = self.allowed.iter().map(|s| s.as_str()).collect();
            write!(f, "; allowed next states: {}", names.join(", "))
        }
    }
}

impl std::error::Error for InvalidTransition {}

// ── Actors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Requester,
    Approver,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Requester => "requester",
            Role::Approver => "approver",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requester" | "student" => Ok(Role::Requester),
            "approver" => Ok(Role::Approver),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Opaque identity of whoever triggers a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Ulid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn can_decide(&self) -> bool {
        matches!(self.role, Role::Approver | Role::Admin)
    }

    pub fn can_cancel(&self, requester_id: Ulid) -> bool {
        self.role == Role::Admin || self.id == requester_id
    }
}
