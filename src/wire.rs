use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{
    AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler,
};
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
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::scheduler::{BookingError, Entity, Scheduler};
use crate::sql::{self, Command, SqlError};
use crate::store::{Database, Store};
use crate::time::format_iso;

/// LISTEN channel carrying one worker's calendar changes.
const WORKER_CHANNEL_PREFIX: &str = "worker_";

/// One per connection: LISTEN subscriptions are connection state.
pub struct SlotkeeperHandler {
    scheduler: Arc<Scheduler<Database>>,
    query_parser: Arc<SlotkeeperQueryParser>,
    listeners: Mutex<HashMap<String, broadcast::Receiver<Event>>>,
}

impl SlotkeeperHandler {
    pub fn new(scheduler: Arc<Scheduler<Database>>) -> Self {
        Self {
            scheduler,
            query_parser: Arc::new(SlotkeeperQueryParser),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    async fn run(&self, sql: &str, format: Option<&Format>) -> PgWireResult<Response> {
        let offset = self.scheduler.policy().utc_offset;
        let cmd = sql::parse_sql(sql, offset).map_err(|e| {
            metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let label = command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(cmd, format).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command, format: Option<&Format>) -> PgWireResult<Response> {
        let scheduler = &self.scheduler;
        match cmd {
            // ── Services ─────────────────────────────────────
            Command::InsertService { service, returning } => {
                let service = scheduler.create_service(service).await.map_err(booking_err)?;
                if returning {
                    return Ok(rows(fields(SERVICE_FIELDS, format), &[service], encode_service));
                }
                Ok(inserted())
            }
            Command::UpdateService { id, patch } => {
                scheduler.update_service(id, patch).await.map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteService { id } => {
                scheduler.delete_service(id).await.map_err(booking_err)?;
                Ok(deleted())
            }
            Command::SelectServices { active } => {
                let services = scheduler.list_services(active).await.map_err(booking_err)?;
                Ok(rows(fields(SERVICE_FIELDS, format), &services, encode_service))
            }

            // ── Workers ──────────────────────────────────────
            Command::InsertWorker { worker, returning } => {
                let worker = scheduler.create_worker(worker).await.map_err(booking_err)?;
                if returning {
                    return Ok(rows(fields(WORKER_FIELDS, format), &[worker], encode_worker));
                }
                Ok(inserted())
            }
            Command::DeleteWorker { id } => {
                scheduler.delete_worker(id).await.map_err(booking_err)?;
                let channel = format!("{WORKER_CHANNEL_PREFIX}{id}");
                self.lock_listeners().remove(&channel);
                Ok(deleted())
            }
            Command::SelectWorkers => {
                let workers = scheduler.list_workers().await.map_err(booking_err)?;
                Ok(rows(fields(WORKER_FIELDS, format), &workers, encode_worker))
            }

            // ── Clients ──────────────────────────────────────
            Command::InsertClient { client, returning } => {
                let client = scheduler.create_client(client).await.map_err(booking_err)?;
                if returning {
                    return Ok(rows(fields(CLIENT_FIELDS, format), &[client], encode_client));
                }
                Ok(inserted())
            }
            Command::UpdateClient { id, patch } => {
                scheduler.patch_client(id, patch).await.map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectClients => {
                let clients = scheduler.list_clients().await.map_err(booking_err)?;
                Ok(rows(fields(CLIENT_FIELDS, format), &clients, encode_client))
            }

            // ── Appointments ─────────────────────────────────
            Command::InsertAppointment { request, returning } => {
                let details = scheduler.create_appointment(request).await.map_err(booking_err)?;
                if returning {
                    return Ok(rows(fields(APPOINTMENT_FIELDS, format), &[details], encode_appointment));
                }
                Ok(inserted())
            }
            Command::UpdateAppointment { id, patch } => {
                scheduler.patch_appointment(id, patch).await.map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteAppointment { id } => {
                scheduler.delete_appointment(id).await.map_err(booking_err)?;
                Ok(deleted())
            }
            Command::SelectAppointments { filter } => {
                let found = scheduler.list_appointments(filter).await.map_err(booking_err)?;
                Ok(rows(fields(APPOINTMENT_FIELDS, format), &found, encode_appointment))
            }
            Command::SelectAppointment { id } => {
                let details = scheduler.get_appointment(id).await.map_err(booking_err)?;
                Ok(rows(fields(APPOINTMENT_FIELDS, format), &[details], encode_appointment))
            }
            Command::SelectAvailableWorkers {
                service_id,
                starts_at,
                exclude_id,
            } => {
                let free = scheduler
                    .find_available_workers(service_id, starts_at, exclude_id)
                    .await;
                Ok(rows(fields(AVAILABLE_WORKER_FIELDS, format), &free, encode_available_worker))
            }

            // ── Notifications ────────────────────────────────
            Command::Listen { channel } => {
                let worker_id = parse_worker_channel(&channel)?;
                if scheduler
                    .store()
                    .get_worker(worker_id)
                    .await
                    .map_err(|e| booking_err(e.into()))?
                    .is_none()
                {
                    return Err(booking_err(BookingError::not_found(Entity::Worker, worker_id)));
                }
                let rx = scheduler.store().notify.subscribe(worker_id);
                self.lock_listeners().insert(channel, rx);
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                self.lock_listeners().remove(&channel);
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.lock_listeners().clear();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Receiver<Event>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain every subscribed channel. Channels whose worker was deleted are
    /// dropped.
    fn pending_notifications(&self) -> Vec<NotificationResponse> {
        let mut listeners = self.lock_listeners();
        let mut out = Vec::new();
        let mut closed = Vec::new();
        for (channel, rx) in listeners.iter_mut() {
            loop {
                match rx.try_recv() {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(payload) => out.push(NotificationResponse::new(0, channel.clone(), payload)),
                        Err(e) => warn!("cannot encode notification on {channel}: {e}"),
                    },
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!("listener on {channel} lagged, {skipped} events dropped");
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Closed) => {
                        closed.push(channel.clone());
                        break;
                    }
                }
            }
        }
        for channel in closed {
            debug!("channel {channel} closed");
            listeners.remove(&channel);
        }
        out
    }

    /// Notifications are delivered ahead of the next statement's results.
    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin,
        PgWireError: From<C::Error>,
    {
        for notification in self.pending_notifications() {
            client
                .send(PgWireBackendMessage::NotificationResponse(notification))
                .await?;
        }
        Ok(())
    }
}

fn parse_worker_channel(channel: &str) -> PgWireResult<Ulid> {
    let id = channel.strip_prefix(WORKER_CHANNEL_PREFIX).ok_or_else(|| {
        user_error(
            "42000",
            format!("invalid channel: {channel} (expected {WORKER_CHANNEL_PREFIX}{{id}})"),
        )
    })?;
    Ulid::from_string(id).map_err(|e| user_error("42000", format!("bad ULID in channel: {e}")))
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

// ── Row schemas ──────────────────────────────────────────────────

const SERVICE_FIELDS: &[(&str, Type)] = &[
    ("id", Type::VARCHAR),
    ("name", Type::VARCHAR),
    ("duration_minutes", Type::INT8),
    ("price", Type::INT8),
    ("active", Type::BOOL),
    ("created_at", Type::VARCHAR),
];

const WORKER_FIELDS: &[(&str, Type)] = &[
    ("id", Type::VARCHAR),
    ("first_name", Type::VARCHAR),
    ("last_name", Type::VARCHAR),
    ("service_ids", Type::VARCHAR),
    ("schedule", Type::VARCHAR),
];

const CLIENT_FIELDS: &[(&str, Type)] = &[
    ("id", Type::VARCHAR),
    ("full_name", Type::VARCHAR),
    ("email", Type::VARCHAR),
    ("phone", Type::VARCHAR),
    ("notes", Type::VARCHAR),
];

/// Flat columns for SQL clients plus the nested JSON object a dashboard reads.
const APPOINTMENT_FIELDS: &[(&str, Type)] = &[
    ("id", Type::VARCHAR),
    ("client_id", Type::VARCHAR),
    ("service_id", Type::VARCHAR),
    ("worker_id", Type::VARCHAR),
    ("starts_at", Type::VARCHAR),
    ("ends_at", Type::VARCHAR),
    ("duration_minutes", Type::INT8),
    ("status", Type::VARCHAR),
    ("notes", Type::VARCHAR),
    ("client_name", Type::VARCHAR),
    ("service_name", Type::VARCHAR),
    ("worker_name", Type::VARCHAR),
    ("details", Type::VARCHAR),
];

const AVAILABLE_WORKER_FIELDS: &[(&str, Type)] = &[
    ("worker_id", Type::VARCHAR),
    ("name", Type::VARCHAR),
];

fn fields(columns: &[(&str, Type)], format: Option<&Format>) -> Arc<Vec<FieldInfo>> {
    Arc::new(
        columns
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| {
                let field_format = format.map_or(FieldFormat::Text, |f| f.format_for(i));
                FieldInfo::new((*name).into(), None, None, ty.clone(), field_format)
            })
            .collect(),
    )
}

/// Schema of whatever rows `sql` would return, for Describe.
fn result_schema(sql: &str, format: Option<&Format>) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if !(lower.trim_start().starts_with("select") || lower.contains("returning")) {
        return vec![];
    }
    // available_workers first: it contains "workers".
    let columns = if lower.contains("available_workers") {
        AVAILABLE_WORKER_FIELDS
    } else if lower.contains("appointments") {
        APPOINTMENT_FIELDS
    } else if lower.contains("services") {
        SERVICE_FIELDS
    } else if lower.contains("workers") {
        WORKER_FIELDS
    } else if lower.contains("clients") {
        CLIENT_FIELDS
    } else {
        return vec![];
    };
    Arc::unwrap_or_clone(fields(columns, format))
}

fn rows<T>(
    schema: Arc<Vec<FieldInfo>>,
    items: &[T],
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
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

fn encode_service(e: &mut DataRowEncoder, s: &Service) -> PgWireResult<()> {
    e.encode_field(&s.id.to_string())?;
    e.encode_field(&s.name)?;
    e.encode_field(&i64::from(s.duration_minutes))?;
    e.encode_field(&i64::try_from(s.price).unwrap_or(i64::MAX))?;
    e.encode_field(&s.active)?;
    e.encode_field(&format_iso(s.created_at))
}

fn encode_worker(e: &mut DataRowEncoder, w: &Worker) -> PgWireResult<()> {
    let service_ids = w
        .service_ids
        .iter()
        .map(Ulid::to_string)
        .collect::<Vec<_>>()
        .join(",");
    e.encode_field(&w.id.to_string())?;
    e.encode_field(&w.first_name)?;
    e.encode_field(&w.last_name)?;
    e.encode_field(&service_ids)?;
    e.encode_field(&to_json(&w.schedule)?)
}

fn encode_client(e: &mut DataRowEncoder, c: &Client) -> PgWireResult<()> {
    e.encode_field(&c.id.to_string())?;
    e.encode_field(&c.full_name)?;
    e.encode_field(&c.email)?;
    e.encode_field(&c.phone)?;
    e.encode_field(&c.notes)
}

fn encode_appointment(e: &mut DataRowEncoder, d: &AppointmentDetails) -> PgWireResult<()> {
    e.encode_field(&d.id.to_string())?;
    e.encode_field(&d.client_id.to_string())?;
    e.encode_field(&d.service_id.to_string())?;
    e.encode_field(&d.worker_id.to_string())?;
    e.encode_field(&format_iso(d.starts_at))?;
    e.encode_field(&format_iso(d.ends_at()))?;
    e.encode_field(&i64::from(d.duration_minutes))?;
    e.encode_field(&d.status.to_string())?;
    e.encode_field(&d.notes)?;
    e.encode_field(&d.client.full_name)?;
    e.encode_field(&d.service.name)?;
    e.encode_field(&d.worker.display_name())?;
    e.encode_field(&to_json(d)?)
}

fn encode_available_worker(e: &mut DataRowEncoder, w: &AvailableWorker) -> PgWireResult<()> {
    e.encode_field(&w.worker_id.to_string())?;
    e.encode_field(&w.name)
}

fn to_json<T: serde::Serialize>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| user_error("XX000", format!("encode error: {e}")))
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for SlotkeeperHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.flush_notifications(client).await?;
        let response = self.run(query, None).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotkeeperQueryParser;

#[async_trait]
impl QueryParser for SlotkeeperQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotkeeperHandler {
    type Statement = String;
    type QueryParser = SlotkeeperQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.flush_notifications(client).await?;
        let sql = substitute_params(portal);
        self.run(&sql, Some(&portal.result_column_format)).await
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
            result_schema(&target.statement, None),
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
            Some(&target.result_column_format),
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Auth + factory ───────────────────────────────────────────────

#[derive(Debug)]
pub struct PasswordAuthSource {
    password: String,
}

impl PasswordAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for PasswordAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

pub struct SlotkeeperFactory {
    handler: Arc<SlotkeeperHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<PasswordAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotkeeperFactory {
    pub fn new(scheduler: Arc<Scheduler<Database>>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotkeeperHandler::new(scheduler)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                PasswordAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotkeeperFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    scheduler: Arc<Scheduler<Database>>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = SlotkeeperFactory::new(scheduler, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for each booking failure.
fn sqlstate(e: &BookingError) -> &'static str {
    match e {
        BookingError::Validation(v) if !v.missing.is_empty() => "23502",
        BookingError::Validation(_) => "22023",
        BookingError::InvalidService(_) => "23503",
        BookingError::NotFound { .. } => "P0002",
        BookingError::Conflict(_) => "23P01",
        BookingError::Dependency(_) => "58000",
    }
}

fn booking_err(e: BookingError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{SchedulingConflict, ValidationError};
    use crate::store::StoreError;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM services"), 0);
        assert_eq!(count_params("SELECT * FROM appointments WHERE id = $1"), 1);
        assert_eq!(count_params("VALUES ($2, $1, $10)"), 10);
        assert_eq!(count_params("price is $"), 0);
    }

    #[test]
    fn sqlstate_per_error_kind() {
        let missing: BookingError = ValidationError::missing(vec!["workerId"]).into();
        assert_eq!(sqlstate(&missing), "23502");
        assert_eq!(sqlstate(&BookingError::invalid("notes too long")), "22023");
        assert_eq!(sqlstate(&BookingError::InvalidService(Ulid::new())), "23503");
        assert_eq!(sqlstate(&BookingError::not_found(Entity::Client, Ulid::new())), "P0002");
        assert_eq!(
            sqlstate(&BookingError::Dependency(StoreError::Unavailable("down".into()))),
            "58000"
        );
        let conflict = BookingError::Conflict(Box::new(SchedulingConflict {
            conflict: BookedSlot {
                id: Ulid::new(),
                starts_at: 0,
                duration_minutes: 30,
            },
            available_workers: vec![],
        }));
        assert_eq!(sqlstate(&conflict), "23P01");
    }

    #[test]
    fn describe_picks_schema_by_table() {
        let names = |sql: &str| -> Vec<String> {
            result_schema(sql, None)
                .iter()
                .map(|f| f.name().to_string())
                .collect()
        };
        assert_eq!(
            names("SELECT * FROM available_workers WHERE service_id = $1 AND starts_at = $2"),
            vec!["worker_id", "name"]
        );
        assert_eq!(names("SELECT * FROM appointments WHERE id = $1").len(), APPOINTMENT_FIELDS.len());
        assert_eq!(names("INSERT INTO services (name) VALUES ($1) RETURNING *")[1], "name");
        assert!(names("DELETE FROM workers WHERE id = $1").is_empty());
        assert!(names("INSERT INTO clients (full_name) VALUES ($1)").is_empty());
    }

    #[test]
    fn worker_channel_parsing() {
        let id = Ulid::new();
        assert_eq!(parse_worker_channel(&format!("worker_{id}")).unwrap(), id);
        assert!(parse_worker_channel(&format!("resource_{id}")).is_err());
        assert!(parse_worker_channel("worker_nope").is_err());
    }
}
