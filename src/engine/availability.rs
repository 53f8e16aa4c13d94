use std::fmt;

use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::calendar::{DateRange, TimeWindow};
use crate::lifecycle::BookingStatus;
use crate::model::*;

// ── Result types ─────────────────────────────────────────────────

/// Which booking statuses occupy a slot for a given check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    /// Submission and UI queries: anything still in play blocks.
    PendingOrApproved,
    /// Approval re-check: only bookings that already won count.
    ApprovedOnly,
}

impl Occupancy {
    fn counts(self, status: BookingStatus) -> bool {
        match self {
            Occupancy::PendingOrApproved => status.holds_slot(),
            Occupancy::ApprovedOnly => status == BookingStatus::Approved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocker {
    Booking(Ulid),
    Maintenance(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    UnderMaintenance,
    OutsideAvailabilityRule { rule_id: Ulid },
    Conflict(Blocker),
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::UnderMaintenance => "under_maintenance",
            UnavailableReason::OutsideAvailabilityRule { .. } => "outside_availability_rule",
            UnavailableReason::Conflict(_) => "conflict",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unavailability {
    /// First date in the request that failed.
    pub date: NaiveDate,
    pub reason: UnavailableReason,
}

impl Unavailability {
    pub fn conflicting_booking(&self) -> Option<Ulid> {
        match self.reason {
            UnavailableReason::Conflict(Blocker::Booking(id)) => Some(id),
            _ => None,
        }
    }

    pub fn conflicting_maintenance(&self) -> Option<Ulid> {
        match self.reason {
            UnavailableReason::Conflict(Blocker::Maintenance(id)) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Unavailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            UnavailableReason::UnderMaintenance => write!(f, "room is under maintenance"),
            UnavailableReason::OutsideAvailabilityRule { rule_id } => {
                write!(f, "{} is closed by availability rule {rule_id}", self.date)
            }
            UnavailableReason::Conflict(Blocker::Booking(id)) => {
                write!(f, "overlaps booking {id} on {}", self.date)
            }
            UnavailableReason::Conflict(Blocker::Maintenance(id)) => {
                write!(f, "overlaps maintenance {id} on {}", self.date)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityResult {
    Available,
    Unavailable(Unavailability),
}

impl AvailabilityResult {
    pub fn is_available(&self) -> bool {
        matches!(self, AvailabilityResult::Available)
    }
}

// ── Availability Algorithm ───────────────────────────────────────

/// Check every date of `dates` independently; the first failing date wins.
pub fn check_range(
    room: &RoomState,
    dates: &DateRange,
    window: &TimeWindow,
    exclude: Option<Ulid>,
    occupancy: Occupancy,
) -> AvailabilityResult {
    for date in dates.dates() {
        if let Some(reason) = check_date(room, date, window, exclude, occupancy) {
            return AvailabilityResult::Unavailable(Unavailability { date, reason });
        }
    }
    AvailabilityResult::Available
}

/// Decide one date. Order: room status, availability rules, then conflicts.
pub fn check_date(
    room: &RoomState,
    date: NaiveDate,
    window: &TimeWindow,
    exclude: Option<Ulid>,
    occupancy: Occupancy,
) -> Option<UnavailableReason> {
    if room.room.status == RoomStatus::Maintenance {
        return Some(UnavailableReason::UnderMaintenance);
    }
    if let Some(rule_id) = blocking_rule(room, date, window) {
        return Some(UnavailableReason::OutsideAvailabilityRule { rule_id });
    }
    if let Some(id) = conflicting_booking(room, date, window, exclude, occupancy) {
        return Some(UnavailableReason::Conflict(Blocker::Booking(id)));
    }
    let requested = window.on(date);
    room.maintenance_on(date)
        .find(|m| m.span.overlaps(&requested))
        .map(|m| UnavailableReason::Conflict(Blocker::Maintenance(m.id)))
}

/// Overlapping booking to report, preferring approved ones, then the earliest start.
fn conflicting_booking(
    room: &RoomState,
    date: NaiveDate,
    window: &TimeWindow,
    exclude: Option<Ulid>,
    occupancy: Occupancy,
) -> Option<Ulid> {
    room.bookings_on(date)
        .filter(|b| Some(b.id) != exclude)
        .filter(|b| b.deleted_at.is_none() && occupancy.counts(b.status))
        .filter(|b| b.window.overlaps(window))
        .min_by_key(|b| (b.status != BookingStatus::Approved, b.window.start, b.created_at))
        .map(|b| b.id)
}

/// Split `window` at every rule boundary and resolve each piece to the rule
/// that governs it: the narrowest covering rule, ties going to the one created
/// last. Pieces no rule covers map to `None`.
pub fn resolve_rules<'a>(
    room: &'a RoomState,
    date: NaiveDate,
    window: &TimeWindow,
) -> Vec<(TimeWindow, Option<&'a AvailabilityRule>)> {
    let rules: Vec<(usize, &AvailabilityRule)> = room
        .rules_for(date.weekday())
        .filter(|(_, r)| r.window.overlaps(window))
        .collect();

    let mut cuts = vec![window.start, window.end];
    for (_, r) in &rules {
        for t in [r.window.start, r.window.end] {
            if window.start < t && t < window.end {
                cuts.push(t);
            }
        }
    }
    cuts.sort();
    cuts.dedup();

    cuts.windows(2)
        .map(|pair| {
            let piece = TimeWindow {
                start: pair[0],
                end: pair[1],
            };
            let governing = rules
                .iter()
                .filter(|(_, r)| r.window.contains(&piece))
                .min_by_key(|(idx, r)| (r.window.duration_minutes(), std::cmp::Reverse(*idx)))
                .map(|(_, r)| *r);
            (piece, governing)
        })
        .collect()
}

/// Id of the rule closing any part of `window`, if one does.
pub fn blocking_rule(room: &RoomState, date: NaiveDate, window: &TimeWindow) -> Option<Ulid> {
    resolve_rules(room, date, window)
        .into_iter()
        .find_map(|(_, rule)| rule.filter(|r| !r.is_available).map(|r| r.id))
}

/// Free windows on `date` inside the room's operational hours.
pub fn free_windows(room: &RoomState, date: NaiveDate, occupancy: Occupancy) -> Vec<TimeWindow> {
    if room.room.status == RoomStatus::Maintenance || room.room.deleted_at.is_some() {
        return Vec::new();
    }
    let hours = room.room.hours;
    let day = TimeWindow {
        start: hours.opens,
        end: hours.closes,
    };

    let mut taken: Vec<TimeWindow> = resolve_rules(room, date, &day)
        .into_iter()
        .filter(|(_, rule)| rule.is_some_and(|r| !r.is_available))
        .map(|(piece, _)| piece)
        .collect();

    taken.extend(
        room.bookings_on(date)
            .filter(|b| b.deleted_at.is_none() && occupancy.counts(b.status))
            .map(|b| b.window),
    );

    let day_span = day.on(date);
    for m in room.maintenance_on(date) {
        let start = m.span.start.max(day_span.start);
        let end = m.span.end.min(day_span.end);
        if start < end {
            taken.push(TimeWindow {
                start: start.time(),
                end: end.time(),
            });
        }
    }

    taken.sort_by_key(|w| w.start);
    subtract_windows(&[day], &merge_overlapping(&taken))
}

/// Merge sorted overlapping/adjacent windows into disjoint windows.
pub fn merge_overlapping(sorted: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut merged: Vec<TimeWindow> = Vec::new();
    for &w in sorted {
        if let Some(last) = merged.last_mut()
            && w.start <= last.end
        {
            last.end = last.end.max(w.end);
            continue;
        }
        merged.push(w);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_windows(base: &[TimeWindow], to_remove: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeWindow {
                    start: current_start,
                    end: r.start,
                });
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(TimeWindow {
                start: current_start,
                end: current_end,
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{parse_date, OperationalHours};
    use chrono::{NaiveTime, Utc, Weekday};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn w(sh: u32, eh: u32) -> TimeWindow {
        TimeWindow::new(t(sh, 0), t(eh, 0)).unwrap()
    }

    // 2025-08-01 is a Friday
    fn friday() -> NaiveDate {
        parse_date("2025-08-01").unwrap()
    }

    fn room_state() -> RoomState {
        RoomState::new(Room {
            id: Ulid::new(),
            building_id: Ulid::new(),
            category_id: Ulid::new(),
            name: "Hall A".into(),
            capacity: 30,
            status: RoomStatus::Available,
            hours: OperationalHours::default(),
            requires_approval: true,
            deleted_at: None,
        })
    }

    fn add_rule(rs: &mut RoomState, weekday: Weekday, window: TimeWindow, is_available: bool) -> Ulid {
        let id = Ulid::new();
        rs.rules.push(AvailabilityRule {
            id,
            weekday,
            window,
            is_available,
            deleted_at: None,
        });
        id
    }

    fn add_booking(rs: &mut RoomState, window: TimeWindow, status: BookingStatus) -> Ulid {
        let id = Ulid::new();
        rs.insert_booking(Booking {
            id,
            code: booking_code(id, friday(), 0),
            room_id: rs.room.id,
            requester_id: Ulid::new(),
            dates: DateRange::single(friday()),
            window,
            capacity: 10,
            purpose: "lecture".into(),
            responsible_person: "Budi".into(),
            contact: "budi@example.ac.id".into(),
            status,
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
        });
        id
    }

    fn add_maintenance(rs: &mut RoomState, window: TimeWindow, status: MaintenanceStatus) -> Ulid {
        let id = Ulid::new();
        rs.maintenance.push(MaintenanceLog {
            id,
            room_id: rs.room.id,
            span: window.on(friday()),
            description: Some("projector repair".into()),
            status,
            deleted_at: None,
        });
        id
    }

    fn check(rs: &RoomState, window: TimeWindow) -> Option<UnavailableReason> {
        check_date(rs, friday(), &window, None, Occupancy::PendingOrApproved)
    }

    #[test]
    fn empty_room_is_available() {
        let rs = room_state();
        assert_eq!(check(&rs, w(9, 11)), None);
    }

    #[test]
    fn maintenance_status_short_circuits() {
        let mut rs = room_state();
        rs.room.status = RoomStatus::Maintenance;
        assert_eq!(check(&rs, w(9, 11)), Some(UnavailableReason::UnderMaintenance));
        rs.room.status = RoomStatus::Booked;
        assert_eq!(check(&rs, w(9, 11)), None);
    }

    #[test]
    fn booking_conflicts_respect_half_open() {
        let mut rs = room_state();
        let a = add_booking(&mut rs, w(9, 11), BookingStatus::Approved);
        assert_eq!(
            check(&rs, w(10, 12)),
            Some(UnavailableReason::Conflict(Blocker::Booking(a)))
        );
        assert_eq!(check(&rs, w(11, 12)), None);
        assert_eq!(check(&rs, w(7, 9)), None);
    }

    #[test]
    fn occupancy_filters_statuses() {
        let mut rs = room_state();
        let pending = add_booking(&mut rs, w(9, 11), BookingStatus::Pending);
        add_booking(&mut rs, w(13, 15), BookingStatus::Rejected);
        add_booking(&mut rs, w(15, 17), BookingStatus::Cancelled);

        assert_eq!(
            check(&rs, w(10, 12)),
            Some(UnavailableReason::Conflict(Blocker::Booking(pending)))
        );
        assert_eq!(
            check_date(&rs, friday(), &w(10, 12), None, Occupancy::ApprovedOnly),
            None
        );
        assert_eq!(check(&rs, w(13, 17)), None);
    }

    #[test]
    fn exclude_skips_self() {
        let mut rs = room_state();
        let me = add_booking(&mut rs, w(9, 11), BookingStatus::Pending);
        assert_eq!(
            check_date(&rs, friday(), &w(9, 11), Some(me), Occupancy::PendingOrApproved),
            None
        );
    }

    #[test]
    fn approved_reported_before_pending() {
        let mut rs = room_state();
        add_booking(&mut rs, w(9, 10), BookingStatus::Pending);
        let approved = add_booking(&mut rs, w(10, 11), BookingStatus::Approved);
        assert_eq!(
            check(&rs, w(9, 11)),
            Some(UnavailableReason::Conflict(Blocker::Booking(approved)))
        );
    }

    #[test]
    fn maintenance_log_conflicts_unless_cancelled() {
        let mut rs = room_state();
        let m = add_maintenance(&mut rs, w(8, 10), MaintenanceStatus::Scheduled);
        assert_eq!(
            check(&rs, w(9, 11)),
            Some(UnavailableReason::Conflict(Blocker::Maintenance(m)))
        );
        rs.maintenance[0].status = MaintenanceStatus::Cancelled;
        assert_eq!(check(&rs, w(9, 11)), None);
    }

    #[test]
    fn unavailable_rule_blocks_only_its_weekday() {
        let mut rs = room_state();
        let rule = add_rule(&mut rs, Weekday::Fri, w(12, 14), false);
        add_rule(&mut rs, Weekday::Mon, w(7, 21), false);
        assert_eq!(
            check(&rs, w(13, 15)),
            Some(UnavailableReason::OutsideAvailabilityRule { rule_id: rule })
        );
        assert_eq!(check(&rs, w(9, 12)), None);
    }

    #[test]
    fn narrowest_rule_wins() {
        let mut rs = room_state();
        add_rule(&mut rs, Weekday::Fri, w(7, 21), false);
        add_rule(&mut rs, Weekday::Fri, w(9, 12), true);
        // fully inside the narrower available rule
        assert_eq!(check(&rs, w(9, 11)), None);
        // spills into a piece only the wide closing rule covers
        assert!(matches!(
            check(&rs, w(11, 13)),
            Some(UnavailableReason::OutsideAvailabilityRule { .. })
        ));
    }

    #[test]
    fn equal_width_rules_latest_wins() {
        let mut rs = room_state();
        add_rule(&mut rs, Weekday::Fri, w(9, 12), true);
        let closing = add_rule(&mut rs, Weekday::Fri, w(9, 12), false);
        assert_eq!(
            check(&rs, w(10, 11)),
            Some(UnavailableReason::OutsideAvailabilityRule { rule_id: closing })
        );

        add_rule(&mut rs, Weekday::Fri, w(9, 12), true);
        assert_eq!(check(&rs, w(10, 11)), None);
    }

    #[test]
    fn removed_rules_ignored() {
        let mut rs = room_state();
        add_rule(&mut rs, Weekday::Fri, w(9, 12), false);
        rs.rules[0].deleted_at = Some(Utc::now());
        assert_eq!(check(&rs, w(10, 11)), None);
    }

    #[test]
    fn rules_checked_before_conflicts() {
        let mut rs = room_state();
        add_booking(&mut rs, w(9, 11), BookingStatus::Approved);
        let rule = add_rule(&mut rs, Weekday::Fri, w(9, 11), false);
        assert_eq!(
            check(&rs, w(9, 11)),
            Some(UnavailableReason::OutsideAvailabilityRule { rule_id: rule })
        );
    }

    #[test]
    fn range_reports_first_failing_date() {
        let mut rs = room_state();
        let saturday = friday().succ_opt().unwrap();
        let rule = add_rule(&mut rs, Weekday::Sat, w(7, 21), false);
        let dates = DateRange::new(friday() - chrono::Duration::days(1), saturday + chrono::Duration::days(1)).unwrap();
        let result = check_range(&rs, &dates, &w(9, 11), None, Occupancy::PendingOrApproved);
        assert_eq!(
            result,
            AvailabilityResult::Unavailable(Unavailability {
                date: saturday,
                reason: UnavailableReason::OutsideAvailabilityRule { rule_id: rule },
            })
        );

        let weekdays = DateRange::new(friday() - chrono::Duration::days(1), friday()).unwrap();
        assert!(check_range(&rs, &weekdays, &w(9, 11), None, Occupancy::PendingOrApproved).is_available());
    }

    #[test]
    fn free_windows_subtracts_everything() {
        let mut rs = room_state();
        add_booking(&mut rs, w(9, 11), BookingStatus::Approved);
        add_booking(&mut rs, w(10, 12), BookingStatus::Pending);
        add_booking(&mut rs, w(14, 15), BookingStatus::Rejected);
        add_rule(&mut rs, Weekday::Fri, w(17, 21), false);
        add_maintenance(&mut rs, w(13, 14), MaintenanceStatus::InProgress);

        let free = free_windows(&rs, friday(), Occupancy::PendingOrApproved);
        assert_eq!(free, vec![w(7, 9), w(12, 13), w(14, 17)]);

        let approved_only = free_windows(&rs, friday(), Occupancy::ApprovedOnly);
        assert_eq!(approved_only, vec![w(7, 9), w(11, 13), w(14, 17)]);
    }

    #[test]
    fn merge_and_subtract() {
        let merged = merge_overlapping(&[w(8, 10), w(9, 11), w(11, 12), w(14, 15)]);
        assert_eq!(merged, vec![w(8, 12), w(14, 15)]);
        let left = subtract_windows(&[w(7, 21)], &merged);
        assert_eq!(left, vec![w(7, 8), w(12, 14), w(15, 21)]);
        assert!(subtract_windows(&[w(9, 10)], &[w(7, 21)]).is_empty());
    }
}
