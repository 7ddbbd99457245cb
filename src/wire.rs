use std::collections::HashSet;
use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{CoversAuthSource, Identity};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct CoversHandler {
    engine: Arc<Engine>,
    admins: Arc<HashSet<String>>,
    query_parser: Arc<CoversQueryParser>,
}

impl CoversHandler {
    pub fn new(engine: Arc<Engine>, admins: Arc<HashSet<String>>) -> Self {
        Self {
            engine,
            admins,
            query_parser: Arc::new(CoversQueryParser),
        }
    }

    fn identity<C: ClientInfo>(&self, client: &C) -> Identity {
        let user = client.metadata().get("user").map(String::as_str);
        Identity::from_login(user, &self.admins)
    }

    /// Parse, run and time one statement, recording query metrics either way.
    async fn run(&self, identity: &Identity, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(identity, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, identity: &Identity, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRestaurant { name, returning } => {
                let restaurant = engine
                    .create_restaurant(identity, name.as_deref())
                    .await
                    .map_err(engine_err)?;
                Ok(written("INSERT", returning, restaurant_schema(), vec![restaurant], encode_restaurant))
            }
            Command::SelectRestaurants { slug: Some(slug) } => {
                let found = engine.restaurant_by_slug(Some(&slug)).map_err(engine_err)?;
                Ok(rows(restaurant_schema(), found.into_iter().collect(), encode_restaurant))
            }
            Command::SelectRestaurants { slug: None } => {
                let mine = engine.list_restaurants(identity).map_err(engine_err)?;
                Ok(rows(restaurant_schema(), mine, encode_restaurant))
            }
            Command::InsertTable {
                restaurant_id,
                name,
                capacity,
                returning,
            } => {
                let table = engine
                    .create_table(identity, restaurant_id.as_deref(), name.as_deref(), capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(written("INSERT", returning, table_schema(), vec![table], encode_table))
            }
            Command::SelectTables { restaurant_id } => {
                let tables = engine
                    .list_tables(identity, Some(&restaurant_id))
                    .map_err(engine_err)?;
                Ok(rows(table_schema(), tables, encode_table))
            }
            Command::UpdateTable {
                id,
                restaurant_id,
                name,
                capacity,
                returning,
            } => {
                let table = engine
                    .update_table(identity, Some(&id), Some(&restaurant_id), name.as_deref(), capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(written("UPDATE", returning, table_schema(), vec![table], encode_table))
            }
            Command::DeleteTable { id } => {
                let removed = engine.delete_table(identity, Some(&id)).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(usize::from(removed))))
            }
            Command::InsertReservation {
                reservation,
                returning,
            } => {
                let reservation = engine
                    .create_reservation(identity, reservation)
                    .await
                    .map_err(engine_err)?;
                Ok(written(
                    "INSERT",
                    returning,
                    reservation_schema(),
                    vec![reservation],
                    encode_reservation,
                ))
            }
            Command::SelectReservations { restaurant_id, date } => {
                let ledger = engine
                    .list_reservations(identity, Some(&restaurant_id), date.as_deref())
                    .map_err(engine_err)?;
                Ok(rows(reservation_schema(), ledger, encode_reservation))
            }
            Command::UpdateReservationStatus { id, status, returning } => {
                let reservation = engine
                    .update_reservation_status(identity, Some(&id), Some(&status))
                    .await
                    .map_err(engine_err)?;
                Ok(written(
                    "UPDATE",
                    returning,
                    reservation_schema(),
                    vec![reservation],
                    encode_reservation,
                ))
            }
            Command::SelectAvailableTables {
                restaurant_id,
                date,
                time,
                min_capacity,
            } => {
                let free = engine
                    .find_available(Some(&restaurant_id), Some(&date), Some(&time), min_capacity)
                    .map_err(engine_err)?;
                Ok(rows(table_schema(), free, encode_table))
            }
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn restaurant_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("slug", Type::VARCHAR),
        text_field("owner_id", Type::VARCHAR),
        text_field("created_at", Type::VARCHAR),
    ]
}

/// Shared by `tables` and `available_tables`.
fn table_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("restaurant_id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("capacity", Type::INT8),
        text_field("created_at", Type::VARCHAR),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("restaurant_id", Type::VARCHAR),
        text_field("table_id", Type::VARCHAR),
        text_field("table_name", Type::VARCHAR),
        text_field("date", Type::VARCHAR),
        text_field("time", Type::VARCHAR),
        text_field("guests", Type::INT8),
        text_field("status", Type::VARCHAR),
        text_field("user_id", Type::VARCHAR),
        text_field("user_name", Type::VARCHAR),
        text_field("user_phone", Type::VARCHAR),
        text_field("user_email", Type::VARCHAR),
        text_field("occasion", Type::VARCHAR),
        text_field("notes", Type::VARCHAR),
        text_field("created_at", Type::VARCHAR),
    ]
}

fn encode_restaurant(enc: &mut DataRowEncoder, r: &Restaurant) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.name)?;
    enc.encode_field(&r.slug)?;
    enc.encode_field(&r.owner_id)?;
    enc.encode_field(&format_timestamp(&r.created_at))
}

fn encode_table(enc: &mut DataRowEncoder, t: &Table) -> PgWireResult<()> {
    enc.encode_field(&t.id.to_string())?;
    enc.encode_field(&t.restaurant_id.to_string())?;
    enc.encode_field(&t.name)?;
    enc.encode_field(&i64::from(t.capacity))?;
    enc.encode_field(&format_timestamp(&t.created_at))
}

fn encode_reservation(enc: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.restaurant_id.to_string())?;
    enc.encode_field(&r.table_id.map(|id| id.to_string()))?;
    enc.encode_field(&r.table_name)?;
    enc.encode_field(&r.date)?;
    enc.encode_field(&r.time)?;
    enc.encode_field(&r.guests.map(i64::from))?;
    enc.encode_field(&r.status.to_string())?;
    enc.encode_field(&r.user_id)?;
    enc.encode_field(&r.user_name)?;
    enc.encode_field(&r.user_phone)?;
    enc.encode_field(&r.user_email)?;
    enc.encode_field(&r.occasion)?;
    enc.encode_field(&r.notes)?;
    enc.encode_field(&format_timestamp(&r.created_at))
}

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
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

/// A write answers with its rows under RETURNING, otherwise with a command tag.
fn written<T>(
    tag: &str,
    returning: bool,
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    if returning {
        rows(schema, items, encode)
    } else {
        Response::Execution(Tag::new(tag).with_rows(items.len()))
    }
}

#[async_trait]
impl SimpleQueryHandler for CoversHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let identity = self.identity(client);
        Ok(vec![self.run(&identity, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CoversQueryParser;

#[async_trait]
impl QueryParser for CoversQueryParser {
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

/// Row shape a statement will answer with, decided by the relation it
/// targets. Empty for plain writes and for statements that will not parse.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::statement_shape(sql) {
        Ok(shape) if shape.returns_rows => match shape.table.as_str() {
            "restaurants" => restaurant_schema(),
            "tables" | "available_tables" => table_schema(),
            "reservations" => reservation_schema(),
            _ => vec![],
        },
        _ => vec![],
    }
}

#[async_trait]
impl ExtendedQueryHandler for CoversHandler {
    type Statement = String;
    type QueryParser = CoversQueryParser;

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
        let identity = self.identity(client);
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&identity, &sql).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// `$N` placeholders outside string literals, as `(start, end, N)` byte spans.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start, i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

/// Bind parameters (text format) as quoted literals in one left-to-right pass
/// over the original statement. Bound values are never rescanned.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CoversFactory {
    handler: Arc<CoversHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CoversAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CoversFactory {
    pub fn new(engine: Arc<Engine>, password: String, admins: Arc<HashSet<String>>) -> Self {
        let auth_source = CoversAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CoversHandler::new(engine, admins)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CoversFactory {
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
    admins: Arc<HashSet<String>>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(CoversFactory::new(engine, password, admins));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

pub fn sqlstate_for(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidArgument(_) => "22023",
        EngineError::NotFound(..) => "P0002",
        EngineError::Forbidden(_) => "42501",
        EngineError::Conflict(_) => "23P01",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Internal(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::Internal(msg) = &e {
        tracing::error!("internal error: {msg}");
    }
    user_error(sqlstate_for(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::MissingFilter(_) | SqlError::MissingValue(_) => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
