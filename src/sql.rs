use std::collections::HashMap;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::{parse_date, parse_datetime, parse_time, parse_weekday};
use crate::engine::Decision;
use crate::lifecycle::{Actor, Role};
use crate::model::*;
use crate::validation::{BookingDraft, DocumentUpload, FacilityAttachment, FacilityBatch};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        building_id: Ulid,
        category_id: Ulid,
        name: String,
        capacity: u32,
        status: Option<RoomStatus>,
        opens_at: Option<NaiveTime>,
        closes_at: Option<NaiveTime>,
        requires_approval: Option<bool>,
    },
    DeleteRoom {
        id: Ulid,
    },
    SetRoomStatus {
        room_id: Ulid,
        status: RoomStatus,
    },
    AttachFacilities {
        room_id: Ulid,
        batch: FacilityBatch,
    },
    InsertRule {
        id: Ulid,
        room_id: Ulid,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
        is_available: bool,
    },
    DeleteRule {
        id: Ulid,
    },
    InsertMaintenance {
        id: Ulid,
        room_id: Ulid,
        starts_at: NaiveDateTime,
        ends_at: NaiveDateTime,
        description: Option<String>,
        status: MaintenanceStatus,
    },
    DeleteMaintenance {
        id: Ulid,
    },
    InsertBooking(Box<BookingDraft>),
    CancelBooking {
        id: Ulid,
        actor: Actor,
    },
    DecideBooking {
        booking_id: Ulid,
        decision: Decision,
        actor: Actor,
    },
    AttachDocument {
        id: Ulid,
        booking_id: Ulid,
        upload: DocumentUpload,
    },
    DeleteDocument {
        id: Ulid,
    },
    CheckIn {
        booking_id: Ulid,
    },
    CheckOut {
        booking_id: Ulid,
        issue_report: Option<String>,
    },
    LeaveFeedback {
        booking_id: Ulid,
        actor: Actor,
        rating: u8,
        comment: Option<String>,
    },
    SelectAvailability {
        room_id: Ulid,
        date: NaiveDate,
        end_date: Option<NaiveDate>,
        start: NaiveTime,
        end: NaiveTime,
        exclude_booking: Option<Ulid>,
    },
    SelectFreeSlots {
        room_id: Ulid,
        date: NaiveDate,
    },
    SelectBookings(BookingFilter),
    SelectRooms,
    SelectUsageLog {
        booking_id: Ulid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingFilter {
    Id(Ulid),
    Code(String),
    Room(Ulid),
}

// Positional column order per table; named INSERTs may use any subset in any order.
const ROOM_COLUMNS: &[&str] = &[
    "id",
    "building_id",
    "category_id",
    "name",
    "capacity",
    "status",
    "opens_at",
    "closes_at",
    "requires_approval",
];
const ROOM_STATUS_COLUMNS: &[&str] = &["room_id", "status"];
const FACILITY_COLUMNS: &[&str] = &["room_id", "facility_id", "quantity"];
const RULE_COLUMNS: &[&str] = &["id", "room_id", "weekday", "start_time", "end_time", "is_available"];
const MAINTENANCE_COLUMNS: &[&str] = &["id", "room_id", "starts_at", "ends_at", "description", "status"];
const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "requester_id",
    "booking_date",
    "end_date",
    "start_time",
    "end_time",
    "capacity",
    "purpose",
    "responsible_person",
    "contact",
    "documents",
];
const DECISION_COLUMNS: &[&str] = &["booking_id", "decision", "actor_id", "actor_role", "reason"];
const DOCUMENT_COLUMNS: &[&str] = &["id", "booking_id", "doc_type", "name", "path"];
const CHECK_IN_COLUMNS: &[&str] = &["booking_id"];
const CHECK_OUT_COLUMNS: &[&str] = &["booking_id", "issue_report"];
const FEEDBACK_COLUMNS: &[&str] = &["booking_id", "actor_id", "rating", "comment"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "rooms" => {
            let row = single_row(insert, "rooms", ROOM_COLUMNS)?;
            Ok(Command::InsertRoom {
                id: row.ulid("id")?,
                building_id: row.ulid("building_id")?,
                category_id: row.ulid("category_id")?,
                name: row.text("name")?,
                capacity: row.u32("capacity")?,
                status: row.opt_parsed("status")?,
                opens_at: row.opt_time("opens_at")?,
                closes_at: row.opt_time("closes_at")?,
                requires_approval: row.opt_bool("requires_approval")?,
            })
        }
        "room_status" => {
            let row = single_row(insert, "room_status", ROOM_STATUS_COLUMNS)?;
            Ok(Command::SetRoomStatus {
                room_id: row.ulid("room_id")?,
                status: row.parsed("status")?,
            })
        }
        "room_facilities" => {
            let rows = insert_rows(insert, "room_facilities", FACILITY_COLUMNS)?;
            let room_id = rows[0].ulid("room_id")?;
            let mut facilities = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.ulid("room_id")? != room_id {
                    return Err(SqlError::Parse(format!("row {i}: all rows must share one room_id")));
                }
                // Facility ids and quantities stay raw; the batch validator reports them per item.
                facilities.push(FacilityAttachment {
                    facility_id: row.text("facility_id")?,
                    quantity: row.u32("quantity")?,
                });
            }
            Ok(Command::AttachFacilities {
                room_id,
                batch: FacilityBatch { facilities },
            })
        }
        "availability_rules" => {
            let row = single_row(insert, "availability_rules", RULE_COLUMNS)?;
            Ok(Command::InsertRule {
                id: row.ulid("id")?,
                room_id: row.ulid("room_id")?,
                weekday: row.weekday("weekday")?,
                start: row.time("start_time")?,
                end: row.time("end_time")?,
                is_available: row.opt_bool("is_available")?.unwrap_or(false),
            })
        }
        "maintenance" => {
            let row = single_row(insert, "maintenance", MAINTENANCE_COLUMNS)?;
            Ok(Command::InsertMaintenance {
                id: row.ulid("id")?,
                room_id: row.ulid("room_id")?,
                starts_at: row.datetime("starts_at")?,
                ends_at: row.datetime("ends_at")?,
                description: row.opt_text("description")?,
                status: row.opt_parsed("status")?.unwrap_or(MaintenanceStatus::Scheduled),
            })
        }
        "bookings" => {
            let row = single_row(insert, "bookings", BOOKING_COLUMNS)?;
            let documents = match row.opt_text("documents")? {
                Some(json) => serde_json::from_str::<Vec<DocumentUpload>>(&json)
                    .map_err(|e| SqlError::BadValue("documents", e.to_string()))?,
                None => Vec::new(),
            };
            Ok(Command::InsertBooking(Box::new(BookingDraft {
                id: row.ulid("id")?,
                room_id: row.ulid("room_id")?,
                requester_id: row.ulid("requester_id")?,
                booking_date: row.date("booking_date")?,
                end_date: row.opt_date("end_date")?,
                start_time: row.time("start_time")?,
                end_time: row.time("end_time")?,
                capacity: row.u32("capacity")?,
                purpose: row.opt_text("purpose")?.unwrap_or_default(),
                responsible_person: row.opt_text("responsible_person")?.unwrap_or_default(),
                contact: row.opt_text("contact")?.unwrap_or_default(),
                documents,
            })))
        }
        "decisions" => {
            let row = single_row(insert, "decisions", DECISION_COLUMNS)?;
            let decision = match row.text("decision")?.trim().to_ascii_lowercase().as_str() {
                "approve" | "approved" => Decision::Approve,
                "reject" | "rejected" => Decision::Reject {
                    reason: row.opt_text("reason")?.unwrap_or_default(),
                },
                other => return Err(SqlError::BadValue("decision", format!("unknown decision: {other}"))),
            };
            Ok(Command::DecideBooking {
                booking_id: row.ulid("booking_id")?,
                decision,
                actor: Actor::new(row.ulid("actor_id")?, row.parsed("actor_role")?),
            })
        }
        "booking_documents" => {
            let row = single_row(insert, "booking_documents", DOCUMENT_COLUMNS)?;
            Ok(Command::AttachDocument {
                id: row.ulid("id")?,
                booking_id: row.ulid("booking_id")?,
                upload: DocumentUpload {
                    doc_type: row.parsed("doc_type")?,
                    name: row.opt_text("name")?.unwrap_or_default(),
                    path: row.opt_text("path")?.unwrap_or_default(),
                },
            })
        }
        "check_ins" => {
            let row = single_row(insert, "check_ins", CHECK_IN_COLUMNS)?;
            Ok(Command::CheckIn {
                booking_id: row.ulid("booking_id")?,
            })
        }
        "check_outs" => {
            let row = single_row(insert, "check_outs", CHECK_OUT_COLUMNS)?;
            Ok(Command::CheckOut {
                booking_id: row.ulid("booking_id")?,
                issue_report: row.opt_text("issue_report")?,
            })
        }
        "feedback" => {
            let row = single_row(insert, "feedback", FEEDBACK_COLUMNS)?;
            let rating = row.u32("rating")?;
            Ok(Command::LeaveFeedback {
                booking_id: row.ulid("booking_id")?,
                // Requester role: feedback belongs to whoever booked.
                actor: Actor::new(row.ulid("actor_id")?, Role::Requester),
                rating: u8::try_from(rating).unwrap_or(u8::MAX),
                comment: row.opt_text("comment")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = where_equalities(&delete.selection)?;
    let id = filters.ulid("id")?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "availability_rules" => Ok(Command::DeleteRule { id }),
        "maintenance" => Ok(Command::DeleteMaintenance { id }),
        "booking_documents" => Ok(Command::DeleteDocument { id }),
        "bookings" => Ok(Command::CancelBooking {
            id,
            actor: Actor::new(filters.ulid("actor_id")?, filters.parsed("actor_role")?),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = where_equalities(&select.selection)?;

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            room_id: filters.ulid("room_id")?,
            date: filters.date("date")?,
            end_date: filters.opt_date("end_date")?,
            start: filters.time("start_time")?,
            end: filters.time("end_time")?,
            exclude_booking: filters.opt_ulid("exclude_booking")?,
        }),
        "free_slots" => Ok(Command::SelectFreeSlots {
            room_id: filters.ulid("room_id")?,
            date: filters.date("date")?,
        }),
        "bookings" => {
            let filter = if let Some(id) = filters.opt_ulid("id")? {
                BookingFilter::Id(id)
            } else if let Some(code) = filters.opt_text("code")? {
                BookingFilter::Code(code)
            } else if let Some(room_id) = filters.opt_ulid("room_id")? {
                BookingFilter::Room(room_id)
            } else {
                return Err(SqlError::MissingFilter("id, code or room_id"));
            };
            Ok(Command::SelectBookings(filter))
        }
        "rooms" => Ok(Command::SelectRooms),
        "usage_logs" => Ok(Command::SelectUsageLog {
            booking_id: filters.ulid("booking_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Rows ──────────────────────────────────────────────────────

/// Column name → value expression, for one VALUES row or one WHERE clause.
struct Fields<'a> {
    values: HashMap<String, &'a Expr>,
}

impl<'a> Fields<'a> {
    /// The column's value, with SQL NULL treated as absent.
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.values
            .get(column)
            .copied()
            .filter(|e| !matches!(extract_value(e), Some(Value::Null)))
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }

    fn opt_text(&self, column: &'static str) -> Result<Option<String>, SqlError> {
        self.get(column).map(|e| expr_text(column, e)).transpose()
    }

    fn text(&self, column: &'static str) -> Result<String, SqlError> {
        expr_text(column, self.required(column)?)
    }

    fn opt_ulid(&self, column: &'static str) -> Result<Option<Ulid>, SqlError> {
        self.opt_text(column)?
            .map(|s| Ulid::from_string(s.trim()).map_err(|e| SqlError::BadValue(column, format!("bad ULID: {e}"))))
            .transpose()
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        self.opt_ulid(column)?.ok_or(SqlError::MissingColumn(column))
    }

    fn u32(&self, column: &'static str) -> Result<u32, SqlError> {
        let v = parse_i64_expr(column, self.required(column)?)?;
        u32::try_from(v).map_err(|_| SqlError::BadValue(column, format!("{v} out of u32 range")))
    }

    fn opt_bool(&self, column: &'static str) -> Result<Option<bool>, SqlError> {
        self.get(column).map(|e| parse_bool(column, e)).transpose()
    }

    fn opt_date(&self, column: &'static str) -> Result<Option<NaiveDate>, SqlError> {
        self.opt_text(column)?
            .map(|s| parse_date(&s).ok_or_else(|| SqlError::BadValue(column, format!("bad date: {s}"))))
            .transpose()
    }

    fn date(&self, column: &'static str) -> Result<NaiveDate, SqlError> {
        self.opt_date(column)?.ok_or(SqlError::MissingColumn(column))
    }

    fn opt_time(&self, column: &'static str) -> Result<Option<NaiveTime>, SqlError> {
        self.opt_text(column)?
            .map(|s| parse_time(&s).ok_or_else(|| SqlError::BadValue(column, format!("bad time: {s}"))))
            .transpose()
    }

    fn time(&self, column: &'static str) -> Result<NaiveTime, SqlError> {
        self.opt_time(column)?.ok_or(SqlError::MissingColumn(column))
    }

    fn datetime(&self, column: &'static str) -> Result<NaiveDateTime, SqlError> {
        let s = self.text(column)?;
        parse_datetime(&s).ok_or_else(|| SqlError::BadValue(column, format!("bad timestamp: {s}")))
    }

    fn weekday(&self, column: &'static str) -> Result<Weekday, SqlError> {
        let s = self.text(column)?;
        parse_weekday(&s).ok_or_else(|| SqlError::BadValue(column, format!("bad weekday: {s}")))
    }

    fn opt_parsed<T: FromStr<Err = String>>(&self, column: &'static str) -> Result<Option<T>, SqlError> {
        self.opt_text(column)?
            .map(|s| s.parse::<T>().map_err(|e| SqlError::BadValue(column, e)))
            .transpose()
    }

    fn parsed<T: FromStr<Err = String>>(&self, column: &'static str) -> Result<T, SqlError> {
        self.opt_parsed(column)?.ok_or(SqlError::MissingColumn(column))
    }
}

fn single_row<'a>(
    insert: &'a ast::Insert,
    table: &'static str,
    columns: &'static [&'static str],
) -> Result<Fields<'a>, SqlError> {
    let mut rows = insert_rows(insert, table, columns)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported(format!("{table}: multi-row INSERT")));
    }
    Ok(rows.remove(0))
}

/// Pair each VALUES row with its column names, explicit or positional.
fn insert_rows<'a>(
    insert: &'a ast::Insert,
    table: &'static str,
    columns: &'static [&'static str],
) -> Result<Vec<Fields<'a>>, SqlError> {
    let named: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    for name in &named {
        if !columns.contains(&name.as_str()) {
            return Err(SqlError::UnknownColumn(table, name.clone()));
        }
    }

    let mut rows = Vec::new();
    for row in extract_all_insert_rows(insert)? {
        let names: Vec<&str> = if named.is_empty() {
            if row.len() > columns.len() {
                return Err(SqlError::WrongArity(table, columns.len(), row.len()));
            }
            columns[..row.len()].to_vec()
        } else {
            if row.len() != named.len() {
                return Err(SqlError::WrongArity(table, named.len(), row.len()));
            }
            named.iter().map(String::as_str).collect()
        };
        let values = names
            .into_iter()
            .map(str::to_string)
            .zip(row.iter())
            .collect();
        rows.push(Fields { values });
    }
    Ok(rows)
}

/// Collect `col = value` conjuncts of a WHERE clause. Anything else is unsupported.
fn where_equalities(selection: &Option<Expr>) -> Result<Fields<'_>, SqlError> {
    let mut values = HashMap::new();
    if let Some(expr) = selection {
        collect_equalities(expr, &mut values)?;
    }
    Ok(Fields { values })
}

fn collect_equalities<'a>(expr: &'a Expr, out: &mut HashMap<String, &'a Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_equalities(left, out)?;
                collect_equalities(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.insert(col, right.as_ref());
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::Nested(inner) => collect_equalities(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn expr_text(column: &'static str, expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s))
        | Some(Value::DollarQuotedString(ast::DollarQuotedString { value: s, .. }))
        | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Boolean(b)) => Ok(b.to_string()),
        Some(value) => Err(SqlError::BadValue(column, format!("expected string, got {value}"))),
        None => Err(SqlError::BadValue(column, format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(column: &'static str, expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(column, expr)?);
    }
    let s = expr_text(column, expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::BadValue(column, format!("bad integer {s}: {e}")))
}

fn parse_bool(column: &'static str, expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::Number(n, _)) => Ok(n != "0"),
        _ => match expr_text(column, expr)?.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(true),
            "false" | "f" | "0" | "no" => Ok(false),
            s => Err(SqlError::BadValue(column, format!("bad bool: {s}"))),
        },
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    BadValue(&'static str, String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at most {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing value: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadValue(col, msg) => write!(f, "{col}: {msg}"),
        }
    }
}

impl std::error::Error for SqlError {}
