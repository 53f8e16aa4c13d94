use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roombook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roombook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roombook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roombook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roombook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Counter: successful WAL compactions.
pub const COMPACTIONS_TOTAL: &str = "roombook_compactions_total";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: accepted submissions. Labels: status (pending, or approved when auto-approved).
pub const BOOKINGS_SUBMITTED_TOTAL: &str = "roombook_bookings_submitted_total";

/// Counter: approver decisions. Labels: outcome.
pub const BOOKING_DECISIONS_TOTAL: &str = "roombook_booking_decisions_total";

/// Counter: approvals refused because an overlapping booking was approved first.
pub const APPROVAL_CONFLICTS_TOTAL: &str = "roombook_approval_conflicts_total";

/// Counter: availability checks. Labels: result.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "roombook_availability_checks_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SetRoomStatus { .. } => "set_room_status",
        Command::AttachFacilities { .. } => "attach_facilities",
        Command::InsertRule { .. } => "insert_rule",
        Command::DeleteRule { .. } => "delete_rule",
        Command::InsertMaintenance { .. } => "insert_maintenance",
        Command::DeleteMaintenance { .. } => "delete_maintenance",
        Command::InsertBooking(_) => "submit_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::DecideBooking { .. } => "decide_booking",
        Command::AttachDocument { .. } => "attach_document",
        Command::DeleteDocument { .. } => "delete_document",
        Command::CheckIn { .. } => "check_in",
        Command::CheckOut { .. } => "check_out",
        Command::LeaveFeedback { .. } => "leave_feedback",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::SelectBookings(_) => "select_bookings",
        Command::SelectRooms => "select_rooms",
        Command::SelectUsageLog { .. } => "select_usage_log",
    }
}
