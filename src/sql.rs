use chrono::FixedOffset;
use sqlparser::ast::{
    self, Assignment, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr,
    Statement, TableFactor, TableObject, TableWithJoins, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::scheduler::{
    AppointmentFilter, BookingRequest, ClientInput, ClientPatch, NewService, NewWorker,
    ServicePatch,
};
use crate::time::parse_timestamp;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertService {
        service: NewService,
        returning: bool,
    },
    UpdateService {
        id: Ulid,
        patch: ServicePatch,
    },
    DeleteService {
        id: Ulid,
    },
    InsertWorker {
        worker: NewWorker,
        returning: bool,
    },
    DeleteWorker {
        id: Ulid,
    },
    InsertClient {
        client: ClientInput,
        returning: bool,
    },
    UpdateClient {
        id: Ulid,
        patch: ClientPatch,
    },
    InsertAppointment {
        request: BookingRequest,
        returning: bool,
    },
    /// Columns left out of the SET list keep their stored values.
    UpdateAppointment {
        id: Ulid,
        patch: BookingRequest,
    },
    DeleteAppointment {
        id: Ulid,
    },
    SelectServices {
        active: Option<bool>,
    },
    SelectWorkers,
    SelectClients,
    SelectAppointments {
        filter: AppointmentFilter,
    },
    SelectAppointment {
        id: Ulid,
    },
    SelectAvailableWorkers {
        service_id: Ulid,
        starts_at: Ms,
        exclude_id: Option<Ulid>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

/// Parse one statement. Naive timestamps are read in `offset`.
pub fn parse_sql(sql: &str, offset: FixedOffset) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches('"').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper == "UNLISTEN *" {
        return Ok(Command::UnlistenAll);
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches('"').to_string();
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert, offset),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection, offset),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query, offset),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Column → value pairs from an INSERT row or an UPDATE's SET list.
struct Row {
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn from_insert(insert: &ast::Insert, table: &'static str) -> Result<Self, SqlError> {
        if insert.columns.is_empty() {
            return Err(SqlError::Parse(format!("INSERT INTO {table} must name its columns")));
        }
        let mut rows = extract_all_insert_rows(insert)?;
        if rows.len() != 1 {
            return Err(SqlError::Unsupported(format!("multi-row INSERT INTO {table}")));
        }
        let values = rows.remove(0);
        if values.len() != insert.columns.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        let cells = insert
            .columns
            .iter()
            .map(|c| c.value.to_lowercase())
            .zip(values)
            .collect();
        Ok(Self { cells })
    }

    fn from_assignments(assignments: &[Assignment]) -> Result<Self, SqlError> {
        let mut cells = Vec::with_capacity(assignments.len());
        for a in assignments {
            let column = match &a.target {
                AssignmentTarget::ColumnName(name) => object_name_last(name),
                AssignmentTarget::Tuple(_) => None,
            }
            .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
            cells.push((column, a.value.clone()));
        }
        Ok(Self { cells })
    }

    fn check_columns(&self, table: &'static str, allowed: &[&str]) -> Result<(), SqlError> {
        match self.cells.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
            Some((c, _)) => Err(SqlError::UnknownColumn(table, c.clone())),
            None => Ok(()),
        }
    }

    /// Whether the column was given at all, NULL included.
    fn is_set(&self, column: &str) -> bool {
        self.cells.iter().any(|(c, _)| c == column)
    }

    /// The column's expression, `None` when absent or NULL.
    fn value(&self, column: &str) -> Option<&Expr> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, e)| e)
            .filter(|e| !is_null(e))
    }

    fn ulid(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.value(column).map(parse_ulid_expr).transpose()
    }

    fn string(&self, column: &str) -> Result<Option<String>, SqlError> {
        self.value(column).map(parse_string_expr).transpose()
    }

    /// For nullable text columns: absent → `None`, NULL → `Some(None)`.
    fn nullable_string(&self, column: &str) -> Result<Option<Option<String>>, SqlError> {
        if !self.is_set(column) {
            return Ok(None);
        }
        Ok(Some(self.string(column)?))
    }

    fn u32(&self, column: &str) -> Result<Option<u32>, SqlError> {
        self.value(column)
            .map(|e| {
                let v = parse_i64_expr(e)?;
                u32::try_from(v).map_err(|_| SqlError::Parse(format!("{column}: {v} out of range")))
            })
            .transpose()
    }

    fn u64(&self, column: &str) -> Result<Option<u64>, SqlError> {
        self.value(column)
            .map(|e| {
                let v = parse_i64_expr(e)?;
                u64::try_from(v).map_err(|_| SqlError::Parse(format!("{column}: {v} must not be negative")))
            })
            .transpose()
    }

    fn bool(&self, column: &str) -> Result<Option<bool>, SqlError> {
        self.value(column).map(parse_bool).transpose()
    }

    fn timestamp(&self, column: &str, offset: FixedOffset) -> Result<Option<Ms>, SqlError> {
        self.value(column)
            .map(|e| parse_timestamp_expr(e, offset))
            .transpose()
    }

    fn status(&self, column: &str) -> Result<Option<AppointmentStatus>, SqlError> {
        self.value(column).map(parse_status_expr).transpose()
    }
}

const SERVICE_COLUMNS: &[&str] = &["name", "duration_minutes", "price", "active"];
const WORKER_COLUMNS: &[&str] = &["first_name", "last_name", "service_ids", "schedule"];
const CLIENT_COLUMNS: &[&str] = &["full_name", "email", "phone", "notes"];
const APPOINTMENT_COLUMNS: &[&str] = &["client_id", "service_id", "worker_id", "starts_at", "notes", "status"];

fn parse_insert(insert: &ast::Insert, offset: FixedOffset) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "services" => {
            let row = Row::from_insert(insert, "services")?;
            row.check_columns("services", SERVICE_COLUMNS)?;
            Ok(Command::InsertService {
                service: NewService {
                    name: row.string("name")?.unwrap_or_default(),
                    duration_minutes: row.u32("duration_minutes")?.unwrap_or(0),
                    price: row.u64("price")?.unwrap_or(0),
                    active: row.bool("active")?.unwrap_or(true),
                },
                returning,
            })
        }
        "workers" => {
            let row = Row::from_insert(insert, "workers")?;
            row.check_columns("workers", WORKER_COLUMNS)?;
            Ok(Command::InsertWorker {
                worker: NewWorker {
                    first_name: row.string("first_name")?.unwrap_or_default(),
                    last_name: row.string("last_name")?.unwrap_or_default(),
                    service_ids: row.value("service_ids").map(parse_ulid_list).transpose()?.unwrap_or_default(),
                    schedule: row.value("schedule").map(parse_schedule).transpose()?.unwrap_or_default(),
                },
                returning,
            })
        }
        "clients" => {
            let row = Row::from_insert(insert, "clients")?;
            row.check_columns("clients", CLIENT_COLUMNS)?;
            Ok(Command::InsertClient {
                client: ClientInput {
                    full_name: row.string("full_name")?.unwrap_or_default(),
                    email: row.string("email")?,
                    phone: row.string("phone")?,
                    notes: row.string("notes")?,
                },
                returning,
            })
        }
        "appointments" => {
            let row = Row::from_insert(insert, "appointments")?;
            row.check_columns("appointments", APPOINTMENT_COLUMNS)?;
            Ok(Command::InsertAppointment {
                request: booking_request(&row, offset)?,
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn booking_request(row: &Row, offset: FixedOffset) -> Result<BookingRequest, SqlError> {
    Ok(BookingRequest {
        client_id: row.ulid("client_id")?,
        service_id: row.ulid("service_id")?,
        worker_id: row.ulid("worker_id")?,
        starts_at: row.timestamp("starts_at", offset)?,
        notes: row.string("notes")?,
        status: row.status("status")?,
    })
}

fn parse_update(
    table: &TableWithJoins,
    assignments: &[Assignment],
    selection: &Option<Expr>,
    offset: FixedOffset,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let row = Row::from_assignments(assignments)?;

    match table.as_str() {
        "services" => {
            row.check_columns("services", SERVICE_COLUMNS)?;
            Ok(Command::UpdateService {
                id,
                patch: ServicePatch {
                    name: row.string("name")?,
                    duration_minutes: row.u32("duration_minutes")?,
                    price: row.u64("price")?,
                    active: row.bool("active")?,
                },
            })
        }
        "clients" => {
            row.check_columns("clients", CLIENT_COLUMNS)?;
            Ok(Command::UpdateClient {
                id,
                patch: ClientPatch {
                    full_name: row.string("full_name")?,
                    email: row.nullable_string("email")?,
                    phone: row.nullable_string("phone")?,
                    notes: row.nullable_string("notes")?,
                },
            })
        }
        "appointments" => {
            row.check_columns("appointments", APPOINTMENT_COLUMNS)?;
            let mut patch = booking_request(&row, offset)?;
            // SET notes = NULL clears them; blank text normalises to none.
            if row.is_set("notes") && patch.notes.is_none() {
                patch.notes = Some(String::new());
            }
            Ok(Command::UpdateAppointment { id, patch })
        }
        "workers" => Err(SqlError::Unsupported("UPDATE workers".into())),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "services" => Ok(Command::DeleteService { id }),
        "workers" => Ok(Command::DeleteWorker { id }),
        "appointments" => Ok(Command::DeleteAppointment { id }),
        "clients" => Err(SqlError::Unsupported("DELETE FROM clients".into())),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query, offset: FixedOffset) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut predicates = Vec::new();
    if let Some(selection) = &select.selection {
        collect_predicates(selection, &mut predicates)?;
    }

    match table.as_str() {
        "services" => {
            let mut active = None;
            for (col, op, value) in predicates {
                match (col.as_str(), op) {
                    ("active", BinaryOperator::Eq) => active = Some(parse_bool(value)?),
                    _ => return Err(SqlError::UnsupportedFilter("services", col)),
                }
            }
            Ok(Command::SelectServices { active })
        }
        "workers" => match predicates.into_iter().next() {
            Some((col, _, _)) => Err(SqlError::UnsupportedFilter("workers", col)),
            None => Ok(Command::SelectWorkers),
        },
        "clients" => match predicates.into_iter().next() {
            Some((col, _, _)) => Err(SqlError::UnsupportedFilter("clients", col)),
            None => Ok(Command::SelectClients),
        },
        "appointments" => {
            let mut filter = AppointmentFilter::default();
            for (col, op, value) in predicates {
                match (col.as_str(), op) {
                    ("id", BinaryOperator::Eq) => {
                        return Ok(Command::SelectAppointment { id: parse_ulid_expr(value)? });
                    }
                    ("status", BinaryOperator::Eq) => filter.status = Some(parse_status_expr(value)?),
                    ("worker_id", BinaryOperator::Eq) => filter.worker_id = Some(parse_ulid_expr(value)?),
                    ("starts_at", BinaryOperator::GtEq) => {
                        filter.from = Some(parse_timestamp_expr(value, offset)?);
                    }
                    ("starts_at", BinaryOperator::Gt) => {
                        let after = parse_timestamp_expr(value, offset)?;
                        filter.from = Some(after.checked_add(1).ok_or_else(|| out_of_range(after))?);
                    }
                    ("starts_at", BinaryOperator::LtEq) => {
                        filter.to = Some(parse_timestamp_expr(value, offset)?);
                    }
                    ("starts_at", BinaryOperator::Lt) => {
                        let before = parse_timestamp_expr(value, offset)?;
                        filter.to = Some(before.checked_sub(1).ok_or_else(|| out_of_range(before))?);
                    }
                    _ => return Err(SqlError::UnsupportedFilter("appointments", col)),
                }
            }
            Ok(Command::SelectAppointments { filter })
        }
        "available_workers" => {
            let (mut service_id, mut starts_at, mut exclude_id) = (None, None, None);
            for (col, op, value) in predicates {
                match (col.as_str(), op) {
                    ("service_id", BinaryOperator::Eq) => service_id = Some(parse_ulid_expr(value)?),
                    ("starts_at", BinaryOperator::Eq) => {
                        starts_at = Some(parse_timestamp_expr(value, offset)?);
                    }
                    ("exclude_id", BinaryOperator::Eq) => exclude_id = Some(parse_ulid_expr(value)?),
                    _ => return Err(SqlError::UnsupportedFilter("available_workers", col)),
                }
            }
            Ok(Command::SelectAvailableWorkers {
                service_id: service_id.ok_or(SqlError::MissingFilter("service_id"))?,
                starts_at: starts_at.ok_or(SqlError::MissingFilter("starts_at"))?,
                exclude_id,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten an AND-tree of `column <op> value` comparisons.
fn collect_predicates<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_predicates(left, out)?;
            collect_predicates(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.push((col, op.clone(), right.as_ref()));
            Ok(())
        }
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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s))
        | Some(Value::EscapedStringLiteral(s))
        | Some(Value::DollarQuotedString(ast::DollarQuotedString { value: s, .. })) => Ok(s.clone()),
        Some(Value::Number(n, _)) => Ok(n.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        let value = parse_i64_expr(expr)?;
        value.checked_neg().ok_or_else(|| out_of_range(value))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn out_of_range(value: i64) -> SqlError {
    SqlError::Parse(format!("{value} is out of range"))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

/// Integer milliseconds, or an ISO-8601 string.
fn parse_timestamp_expr(expr: &Expr, offset: FixedOffset) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            parse_timestamp(s, offset).ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}")))
        }
        _ => parse_i64_expr(expr),
    }
}

fn parse_status_expr(expr: &Expr) -> Result<AppointmentStatus, SqlError> {
    let s = parse_string_expr(expr)?;
    AppointmentStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
}

/// `'id1,id2'` or `ARRAY['id1', 'id2']`.
fn parse_ulid_list(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    if let Expr::Array(array) = expr {
        return array.elem.iter().map(parse_ulid_expr).collect();
    }
    let s = parse_string_expr(expr)?;
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| Ulid::from_string(part).map_err(|e| SqlError::Parse(format!("bad ULID {part:?}: {e}"))))
        .collect()
}

/// JSON array of `{"weekday": "Mon", "startMinute": 540, "endMinute": 1080}`.
fn parse_schedule(expr: &Expr) -> Result<Vec<ScheduleWindow>, SqlError> {
    let s = parse_string_expr(expr)?;
    serde_json::from_str(&s).map_err(|e| SqlError::Parse(format!("bad schedule: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    UnsupportedFilter(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} in {t}"),
            SqlError::UnsupportedFilter(t, c) => write!(f, "{t} cannot be filtered by {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
