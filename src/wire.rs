use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;
use tracing::debug;

use crate::calendar::{DateRange, DateTimeSpan, OperationalHours, TimeWindow};
use crate::engine::{AvailabilityResult, Blocker, Engine, EngineError, Occupancy, UnavailableReason};
use crate::model::*;
use crate::observability;
use crate::sql::{self, BookingFilter, Command, SqlError};

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn typed_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id"),
        text_field("date"),
        typed_field("available", Type::BOOL),
        text_field("reason"),
        text_field("conflicting_id"),
        text_field("message"),
    ]
}

fn free_slots_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id"),
        text_field("date"),
        text_field("start_time"),
        text_field("end_time"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("code"),
        text_field("room_id"),
        text_field("requester_id"),
        text_field("booking_date"),
        text_field("end_date"),
        text_field("start_time"),
        text_field("end_time"),
        typed_field("capacity", Type::INT8),
        text_field("purpose"),
        text_field("responsible_person"),
        text_field("contact"),
        text_field("status"),
        text_field("approver_id"),
        text_field("rejection_reason"),
        text_field("documents"),
    ]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("building_id"),
        text_field("category_id"),
        text_field("name"),
        typed_field("capacity", Type::INT8),
        text_field("status"),
        text_field("opens_at"),
        text_field("closes_at"),
        typed_field("requires_approval", Type::BOOL),
    ]
}

fn usage_logs_schema() -> Vec<FieldInfo> {
    vec![
        text_field("booking_id"),
        text_field("check_in"),
        text_field("check_out"),
        typed_field("late_checkout", Type::BOOL),
        text_field("issue_report"),
    ]
}

/// Row shape of a statement, judged from its text so unbound `$n` statements can be described.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.trim_start().to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .collect();
    let table = |keyword: &str| {
        words
            .iter()
            .position(|w| *w == keyword)
            .and_then(|i| words.get(i + 1))
            .map(|t| t.trim_matches('"'))
    };
    match words.first().copied() {
        Some("select") => match table("from") {
            Some("availability") => availability_schema(),
            Some("free_slots") => free_slots_schema(),
            Some("bookings") => bookings_schema(),
            Some("rooms") => rooms_schema(),
            Some("usage_logs") => usage_logs_schema(),
            _ => vec![],
        },
        // Booking transitions answer with the affected booking, like RETURNING *.
        Some("insert") => match table("into") {
            Some("bookings" | "decisions" | "check_ins" | "check_outs" | "feedback") => bookings_schema(),
            _ => vec![],
        },
        Some("delete") => match table("from") {
            Some("bookings") => bookings_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

fn hhmm(t: chrono::NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_booking(encoder: &mut DataRowEncoder, b: &Booking) -> PgWireResult<()> {
    let documents: Vec<&BookingDocument> = b.active_documents().collect();
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.code)?;
    encoder.encode_field(&b.room_id.to_string())?;
    encoder.encode_field(&b.requester_id.to_string())?;
    encoder.encode_field(&b.dates.start.to_string())?;
    encoder.encode_field(&b.dates.is_range().then(|| b.dates.end.to_string()))?;
    encoder.encode_field(&hhmm(b.window.start))?;
    encoder.encode_field(&hhmm(b.window.end))?;
    encoder.encode_field(&i64::from(b.capacity))?;
    encoder.encode_field(&b.purpose)?;
    encoder.encode_field(&b.responsible_person)?;
    encoder.encode_field(&b.contact)?;
    encoder.encode_field(&b.status.as_str().to_string())?;
    encoder.encode_field(&b.approver_id.map(|id| id.to_string()))?;
    encoder.encode_field(&b.rejection_reason)?;
    encoder.encode_field(&serde_json::to_string(&documents).unwrap_or_default())?;
    Ok(())
}

fn booking_response(booking: Booking) -> Response {
    query_response(bookings_schema(), &[booking], encode_booking)
}

fn encode_room(encoder: &mut DataRowEncoder, r: &Room) -> PgWireResult<()> {
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.building_id.to_string())?;
    encoder.encode_field(&r.category_id.to_string())?;
    encoder.encode_field(&r.name)?;
    encoder.encode_field(&i64::from(r.capacity))?;
    encoder.encode_field(&r.status.as_str().to_string())?;
    encoder.encode_field(&hhmm(r.hours.opens))?;
    encoder.encode_field(&hhmm(r.hours.closes))?;
    encoder.encode_field(&r.requires_approval)?;
    Ok(())
}

fn availability_response(room_id: ulid::Ulid, date: chrono::NaiveDate, result: AvailabilityResult) -> Response {
    let room = room_id.to_string();
    query_response(availability_schema(), &[result], move |encoder, result| {
        encoder.encode_field(&room)?;
        match result {
            AvailabilityResult::Available => {
                encoder.encode_field(&date.to_string())?;
                encoder.encode_field(&true)?;
                encoder.encode_field(&None::<String>)?;
                encoder.encode_field(&None::<String>)?;
                encoder.encode_field(&None::<String>)?;
            }
            AvailabilityResult::Unavailable(u) => {
                let conflicting = match u.reason {
                    UnavailableReason::UnderMaintenance => None,
                    UnavailableReason::OutsideAvailabilityRule { rule_id } => Some(rule_id),
                    UnavailableReason::Conflict(Blocker::Booking(id) | Blocker::Maintenance(id)) => Some(id),
                };
                encoder.encode_field(&u.date.to_string())?;
                encoder.encode_field(&false)?;
                encoder.encode_field(&Some(u.reason.as_str().to_string()))?;
                encoder.encode_field(&conflicting.map(|id| id.to_string()))?;
                encoder.encode_field(&Some(u.to_string()))?;
            }
        }
        Ok(())
    })
}

// ── Handler ──────────────────────────────────────────────────────

pub struct RoombookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RoombookQueryParser>,
}

impl RoombookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RoombookQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(command = label, "statement failed: {e}");
        }
        result.map_err(engine_err)
    }

    async fn execute_command(&self, cmd: Command) -> Result<Vec<Response>, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRoom {
                id,
                building_id,
                category_id,
                name,
                capacity,
                status,
                opens_at,
                closes_at,
                requires_approval,
            } => {
                let hours = match (opens_at, closes_at) {
                    (None, None) => None,
                    (opens, closes) => {
                        let defaults = engine.policy.default_hours;
                        Some(OperationalHours::new(
                            opens.unwrap_or(defaults.opens),
                            closes.unwrap_or(defaults.closes),
                        )?)
                    }
                };
                engine
                    .create_room(NewRoom {
                        id,
                        building_id,
                        category_id,
                        name,
                        capacity,
                        status,
                        hours,
                        requires_approval,
                    })
                    .await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SetRoomStatus { room_id, status } => {
                engine.set_room_status(room_id, status).await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::AttachFacilities { room_id, batch } => {
                let count = engine.attach_facilities(room_id, &batch).await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::InsertRule {
                id,
                room_id,
                weekday,
                start,
                end,
                is_available,
            } => {
                let window = TimeWindow::new(start, end)?;
                engine.add_rule(id, room_id, weekday, window, is_available).await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRule { id } => {
                engine.remove_rule(id).await?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertMaintenance {
                id,
                room_id,
                starts_at,
                ends_at,
                description,
                status,
            } => {
                let span = DateTimeSpan {
                    start: starts_at,
                    end: ends_at,
                };
                engine
                    .schedule_maintenance(id, room_id, span, description, status)
                    .await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteMaintenance { id } => {
                engine.cancel_maintenance(id).await?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking(draft) => {
                let booking = engine.submit_booking(*draft).await?;
                Ok(vec![booking_response(booking)])
            }
            Command::CancelBooking { id, actor } => {
                let booking = engine.cancel_booking(id, actor).await?;
                Ok(vec![booking_response(booking)])
            }
            Command::DecideBooking {
                booking_id,
                decision,
                actor,
            } => {
                let booking = engine.decide_booking(booking_id, decision, actor).await?;
                Ok(vec![booking_response(booking)])
            }
            Command::AttachDocument { id, booking_id, upload } => {
                engine.attach_document(id, booking_id, upload).await?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteDocument { id } => {
                engine.remove_document(id).await?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::CheckIn { booking_id } => {
                let booking = engine.check_in(booking_id).await?;
                Ok(vec![booking_response(booking)])
            }
            Command::CheckOut {
                booking_id,
                issue_report,
            } => {
                let booking = engine.check_out(booking_id, issue_report).await?;
                Ok(vec![booking_response(booking)])
            }
            Command::LeaveFeedback {
                booking_id,
                actor,
                rating,
                comment,
            } => {
                let booking = engine.leave_feedback(booking_id, actor, rating, comment).await?;
                Ok(vec![booking_response(booking)])
            }
            Command::SelectAvailability {
                room_id,
                date,
                end_date,
                start,
                end,
                exclude_booking,
            } => {
                let result = match exclude_booking {
                    None => {
                        engine
                            .check_availability(room_id, date, end_date, start, end)
                            .await?
                    }
                    Some(exclude) => {
                        let dates = DateRange::new(date, end_date.unwrap_or(date))?
                            .within_limit(engine.policy.max_range_days)?;
                        let window = TimeWindow::new(start, end)?;
                        engine
                            .check_availability_excluding(
                                room_id,
                                dates,
                                window,
                                Some(exclude),
                                Occupancy::PendingOrApproved,
                            )
                            .await?
                    }
                };
                Ok(vec![availability_response(room_id, date, result)])
            }
            Command::SelectFreeSlots { room_id, date } => {
                let slots = engine.free_slots(room_id, date).await?;
                let room = room_id.to_string();
                let day = date.to_string();
                Ok(vec![query_response(free_slots_schema(), &slots, |encoder, slot| {
                    encoder.encode_field(&room)?;
                    encoder.encode_field(&day)?;
                    encoder.encode_field(&hhmm(slot.start))?;
                    encoder.encode_field(&hhmm(slot.end))?;
                    Ok(())
                })])
            }
            Command::SelectBookings(filter) => {
                let bookings = match filter {
                    BookingFilter::Id(id) => vec![engine.get_booking(id).await?],
                    BookingFilter::Code(code) => vec![engine.booking_by_code(&code).await?],
                    BookingFilter::Room(room_id) => engine.bookings_for_room(room_id).await?,
                };
                Ok(vec![query_response(bookings_schema(), &bookings, encode_booking)])
            }
            Command::SelectRooms => {
                let rooms = engine.list_rooms().await;
                Ok(vec![query_response(rooms_schema(), &rooms, encode_room)])
            }
            Command::SelectUsageLog { booking_id } => {
                let logs: Vec<UsageLog> = engine.usage_log(booking_id).await?.into_iter().collect();
                let booking = booking_id.to_string();
                Ok(vec![query_response(usage_logs_schema(), &logs, |encoder, log| {
                    encoder.encode_field(&booking)?;
                    encoder.encode_field(&log.check_in.to_string())?;
                    encoder.encode_field(&log.check_out.map(|t| t.to_string()))?;
                    encoder.encode_field(&log.late_checkout)?;
                    encoder.encode_field(&log.issue_report)?;
                    Ok(())
                })])
            }
        }
    }
}

#[async_trait]
impl SimpleQueryHandler for RoombookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoombookQueryParser;

#[async_trait]
impl QueryParser for RoombookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoombookHandler {
    type Statement = String;
    type QueryParser = RoombookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let query = substitute_params(portal);
        let mut responses = self.run(&query).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Auth ─────────────────────────────────────────────────────────

/// One shared cleartext password; booking actors are named inside statements.
#[derive(Debug)]
pub struct RoombookAuthSource {
    password: String,
}

impl RoombookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for RoombookAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoombookFactory {
    handler: Arc<RoombookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RoombookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoombookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = RoombookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoombookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoombookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
) -> std::io::Result<()> {
    let factory = Arc::new(RoombookFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "23514",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Unavailable(_) | EngineError::Conflict(_) => "23P01",
        EngineError::InvalidTransition(_)
        | EngineError::BookingDatePassed(_)
        | EngineError::AlreadyCheckedIn(_)
        | EngineError::NotCheckedIn(_)
        | EngineError::FeedbackExists(_) => "55000",
        EngineError::NotFound(_) | EngineError::UnknownCode(_) => "P0002",
        EngineError::Forbidden { .. } => "42501",
        EngineError::Calendar(_) => "22007",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    // Validation failures carry the field map so clients can show per-field messages.
    let message = match &e {
        EngineError::Validation(report) => report.to_json(),
        other => other.to_string(),
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        message,
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarError;
    use crate::validation::ValidationReport;

    #[test]
    fn count_params_takes_highest() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("SELECT * FROM bookings WHERE id = $2 AND room_id = $1"), 2);
        assert_eq!(count_params("INSERT INTO check_ins VALUES ($10)"), 10);
    }

    #[test]
    fn bind_params_quotes_and_nulls() {
        let sql = bind_params(
            "INSERT INTO check_outs VALUES ($1, $2)",
            &[Some("01ARZ3NDEKTSV4RRFFQ69G5FAV".into()), None],
        );
        assert_eq!(sql, "INSERT INTO check_outs VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', NULL)");

        let sql = bind_params("SELECT $1", &[Some("it's".into())]);
        assert_eq!(sql, "SELECT 'it''s'");
    }

    #[test]
    fn bind_params_does_not_clobber_two_digit_placeholders() {
        let params: Vec<Option<String>> = (1..=10).map(|i| Some(i.to_string())).collect();
        let sql = bind_params("VALUES ($1, $10)", &params);
        assert_eq!(sql, "VALUES ('1', '10')");
    }

    #[test]
    fn result_schema_follows_table() {
        assert_eq!(result_schema("SELECT * FROM availability WHERE room_id = $1").len(), 6);
        assert_eq!(result_schema("select * from free_slots where room_id = $1").len(), 4);
        assert_eq!(result_schema("SELECT * FROM rooms;").len(), 9);
        assert_eq!(result_schema("INSERT INTO bookings (id) VALUES ($1)").len(), 16);
        assert_eq!(result_schema("DELETE FROM bookings WHERE id = $1").len(), 16);
        assert!(result_schema("INSERT INTO rooms VALUES ($1)").is_empty());
        assert!(result_schema("DELETE FROM rooms WHERE id = $1").is_empty());
    }

    #[test]
    fn sqlstates_by_error_kind() {
        let id = ulid::Ulid::new();
        assert_eq!(sqlstate(&EngineError::NotFound(id)), "P0002");
        assert_eq!(
            sqlstate(&EngineError::Validation(ValidationReport::single("capacity", "too big"))),
            "23514"
        );
        assert_eq!(
            sqlstate(&EngineError::Calendar(CalendarError::InvalidRange {
                start: chrono::NaiveDate::from_ymd_opt(2025, 8, 2).unwrap(),
                end: chrono::NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
            })),
            "22007"
        );
        assert_eq!(
            sqlstate(&EngineError::Forbidden {
                actor: id,
                action: "decide bookings"
            }),
            "42501"
        );
        assert_eq!(sqlstate(&EngineError::FeedbackExists(id)), "55000");
    }
}
