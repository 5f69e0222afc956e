use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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

use crate::auth::MaitredAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct MaitredHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<MaitredQueryParser>,
}

impl MaitredHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(MaitredQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = command_label(&cmd);
        let start = Instant::now();
        let result = self.dispatch(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::CreateRestaurant {
                id,
                name,
                slot_interval,
                pacing,
                last_seating_lead,
            } => {
                engine
                    .create_restaurant(id, name, slot_interval, pacing, last_seating_lead)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRestaurant { id } => {
                engine.delete_restaurant(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::AddTable {
                id,
                restaurant_id,
                label,
                min_covers,
                max_covers,
                priority,
                combinable,
            } => {
                engine
                    .add_table(id, restaurant_id, label, min_covers, max_covers, priority, combinable)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RetireTable { id } => {
                engine.retire_table(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::AddRule {
                id,
                restaurant_id,
                min_party,
                max_party,
                minutes,
            } => {
                engine
                    .add_rule(id, restaurant_id, min_party, max_party, minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RemoveRule { id } => {
                engine.remove_rule(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::AddPeriod {
                id,
                restaurant_id,
                weekday,
                name,
                open,
                close,
            } => {
                engine
                    .add_period(id, restaurant_id, weekday, name, open, close)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RemovePeriod { id } => {
                engine.remove_period(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::CreateBooking { req } => {
                engine.create_booking(req).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SetBookingStatus { id, status } => {
                engine
                    .set_booking_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::Availability {
                restaurant_id,
                date,
                party_size,
                preferred,
            } => {
                let reports = engine
                    .availability_report(restaurant_id, date, party_size, preferred)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = reports
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&fmt_minute(r.minute))?;
                        encoder.encode_field(&(r.tables_free as i32))?;
                        encoder.encode_field(&r.status.as_str())?;
                        encoder.encode_field(&(r.utilization_pct as i32))?;
                        encoder.encode_field(&r.can_override)?;
                        let alts: Vec<String> =
                            r.alternatives.iter().map(|&m| fmt_minute(m)).collect();
                        encoder.encode_field(&to_json(&alts)?)?;
                        encoder.encode_field(&r.best_rank.map(i32::from))?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::AvailableTables {
                restaurant_id,
                date,
                start,
                party_size,
            } => {
                let options = engine
                    .available_tables(restaurant_id, date, start, party_size)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(available_tables_schema());
                let rows: Vec<PgWireResult<_>> = options
                    .into_iter()
                    .map(|opt| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encode_table_fields(&mut encoder, &opt.table)?;
                        encoder.encode_field(&opt.best)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::ListBookings { restaurant_id, date } => {
                let bookings = engine
                    .list_bookings(restaurant_id, date)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.date.to_string())?;
                        encoder.encode_field(&fmt_minute(b.span.start))?;
                        encoder.encode_field(&fmt_minute(b.span.end))?;
                        encoder.encode_field(&(b.party_size as i32))?;
                        encoder.encode_field(&b.status.as_str())?;
                        let ids: Vec<String> =
                            b.table_ids.iter().map(|t| t.to_string()).collect();
                        encoder.encode_field(&to_json(&ids)?)?;
                        encoder.encode_field(&b.guest_name)?;
                        encoder.encode_field(&b.override_reason)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::ListTables { restaurant_id } => {
                let tables = engine.list_tables(restaurant_id).await.map_err(engine_err)?;

                let schema = Arc::new(tables_schema());
                let rows: Vec<PgWireResult<_>> = tables
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encode_table_fields(&mut encoder, &t)?;
                        encoder.encode_field(&t.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::ListRestaurants => {
                let infos = engine.list_restaurants().await;

                let schema = Arc::new(restaurants_schema());
                let rows: Vec<PgWireResult<_>> = infos
                    .into_iter()
                    .map(|info| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&info.id.to_string())?;
                        encoder.encode_field(&info.name)?;
                        encoder.encode_field(&info.slot_interval)?;
                        encoder.encode_field(&info.last_seating_lead)?;
                        encoder.encode_field(&(info.pacing.moderate_pct as i32))?;
                        encoder.encode_field(&(info.pacing.busy_pct as i32))?;
                        encoder.encode_field(&(info.pacing.max_covers_per_slot as i32))?;
                        encoder.encode_field(&(info.pacing.max_bookings_per_slot as i32))?;
                        encoder.encode_field(&(info.active_tables as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn encode_table_fields(encoder: &mut DataRowEncoder, table: &Table) -> PgWireResult<()> {
    encoder.encode_field(&table.id.to_string())?;
    encoder.encode_field(&table.label)?;
    encoder.encode_field(&(table.min_covers as i32))?;
    encoder.encode_field(&(table.max_covers as i32))?;
    encoder.encode_field(&table.priority)?;
    encoder.encode_field(&table.combinable)?;
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| PgWireError::ApiError(Box::new(e)))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int4_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT4, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("slot"),
        int4_field("tables_free"),
        text_field("status"),
        int4_field("utilization_pct"),
        bool_field("can_override"),
        text_field("alternatives"),
        int4_field("best_rank"),
    ]
}

fn available_tables_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("label"),
        int4_field("min_covers"),
        int4_field("max_covers"),
        int4_field("priority"),
        bool_field("combinable"),
        bool_field("best"),
    ]
}

fn tables_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("label"),
        int4_field("min_covers"),
        int4_field("max_covers"),
        int4_field("priority"),
        bool_field("combinable"),
        bool_field("active"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("date"),
        text_field("time"),
        text_field("end_time"),
        int4_field("party_size"),
        text_field("status"),
        text_field("table_ids"),
        text_field("guest_name"),
        text_field("override_reason"),
    ]
}

fn restaurants_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        int8_field("slot_interval"),
        int8_field("last_seating_lead"),
        int4_field("moderate_pct"),
        int4_field("busy_pct"),
        int4_field("max_covers_per_slot"),
        int4_field("max_bookings_per_slot"),
        int4_field("active_tables"),
    ]
}

/// Result schema for the extended protocol, picked by table keyword. Probed
/// before execution, so this must agree with what `dispatch` encodes.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABLE_TABLES") {
        available_tables_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("RESTAURANT_TABLES") {
        tables_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("RESTAURANTS") {
        restaurants_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for MaitredHandler {
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
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MaitredQueryParser;

#[async_trait]
impl QueryParser for MaitredQueryParser {
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
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for MaitredHandler {
    type Statement = String;
    type QueryParser = MaitredQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
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
            schema_for_statement(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_statement(
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
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct MaitredFactory {
    handler: Arc<MaitredHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<MaitredAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl MaitredFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = MaitredAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MaitredHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MaitredFactory {
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

/// Serve one client socket to completion.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls_acceptor: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(MaitredFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls_acceptor, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
