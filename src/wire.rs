use std::fmt::Debug;
use std::sync::Arc;

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
use ulid::Ulid;

use crate::auth::CharterAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct CharterHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CharterQueryParser>,
}

impl CharterHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CharterQueryParser),
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

    async fn execute_timed(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertRequest {
                id,
                scenario_id,
                customer_ref,
                participants,
                candidates,
                requested_stores,
                eligible_staff,
            } => {
                engine
                    .open_request(
                        id,
                        scenario_id,
                        customer_ref,
                        participants,
                        candidates,
                        requested_stores,
                        eligible_staff,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertResponse {
                request_id,
                staff_id,
                available,
                candidate_orders,
                notes,
            } => {
                engine
                    .submit_availability(request_id, staff_id, available, candidate_orders, notes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertConfirmation {
                request_id,
                candidate_order,
                store_id,
                gm_id,
            } => {
                engine
                    .confirm(request_id, candidate_order, store_id, gm_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertRejection { request_id, reason } => {
                engine.reject(request_id, reason).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertScheduleEvent {
                id,
                store_id,
                date,
                start_time,
                end_time,
                gm_ids,
                label,
            } => {
                engine
                    .record_schedule_event(id, store_id, date, start_time, end_time, gm_ids, label)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteScheduleEvent { id } => {
                engine
                    .withdraw_schedule_event(id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectRequests { id, status } => {
                let requests = match id {
                    Some(id) => match engine.request_info(id).await {
                        Ok(info) => vec![info],
                        Err(EngineError::NotFound(_)) => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    None => engine.list_requests(status).await,
                };
                Ok(vec![request_rows(requests)?])
            }
            Command::SelectPendingRequests { staff_id } => {
                let requests = engine.list_pending_for_staff(staff_id).await;
                Ok(vec![request_rows(requests)?])
            }
            Command::SelectActionableRequests => {
                let requests = engine.list_store_actionable().await;
                Ok(vec![request_rows(requests)?])
            }
            Command::SelectResponses { request_id } => {
                let responses = engine
                    .list_responses(request_id)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(responses_schema());
                let rows: Vec<PgWireResult<_>> = responses
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.request_id.to_string())?;
                        encoder.encode_field(&r.staff_id.to_string())?;
                        encoder.encode_field(&r.status.as_str())?;
                        encoder.encode_field(&orders_json(&r.selected_orders))?;
                        encoder.encode_field(&r.notes)?;
                        encoder.encode_field(&r.responded_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectOccupancy { from, to } => {
                let entries = engine
                    .occupancy_between(from, to)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(occupancy_schema());
                let rows: Vec<PgWireResult<_>> = entries
                    .into_iter()
                    .map(|o| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&o.kind.as_str())?;
                        encoder.encode_field(&o.owner_id.to_string())?;
                        encoder.encode_field(&o.date.to_string())?;
                        encoder.encode_field(&o.time_slot.as_str())?;
                        encoder.encode_field(&o.occupant.kind_str())?;
                        encoder.encode_field(&o.occupant.id().to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let request_id_str = channel.strip_prefix("request_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected request_{{id}})"),
                    )))
                })?;
                let _request_id = Ulid::from_string(request_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

// ── Row schemas & encoding ───────────────────────────────────────

fn requests_schema() -> Vec<FieldInfo> {
    let varchar = |name: &str| {
        FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
    };
    vec![
        varchar("id"),
        varchar("scenario_id"),
        varchar("customer_ref"),
        FieldInfo::new("participants".into(), None, None, Type::INT8, FieldFormat::Text),
        varchar("status"),
        varchar("candidates"),
        varchar("requested_stores"),
        varchar("confirmed_store_id"),
        varchar("assigned_gm_id"),
        varchar("rejection_reason"),
        FieldInfo::new("opened_at".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("updated_at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn responses_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("request_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("staff_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("selected_orders".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("notes".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("responded_at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("kind".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("owner_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("date".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("time_slot".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("occupant_kind".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("occupant_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn candidates_json(slots: &[CandidateSlot]) -> String {
    let arr: Vec<serde_json::Value> = slots
        .iter()
        .map(|c| {
            serde_json::json!({
                "order": c.order,
                "date": c.date.to_string(),
                "timeSlot": c.time_slot.as_str(),
                "startTime": c.start_time.format("%H:%M").to_string(),
                "endTime": c.end_time.format("%H:%M").to_string(),
                "status": match c.status {
                    SlotStatus::Proposed => "proposed",
                    SlotStatus::Confirmed => "confirmed",
                },
            })
        })
        .collect();
    serde_json::Value::Array(arr).to_string()
}

fn ids_json(ids: &[Ulid]) -> String {
    let arr: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| serde_json::Value::String(id.to_string()))
        .collect();
    serde_json::Value::Array(arr).to_string()
}

fn orders_json(orders: &[u32]) -> String {
    serde_json::to_string(orders).unwrap_or_else(|_| "[]".into())
}

fn request_rows(requests: Vec<RequestInfo>) -> PgWireResult<Response> {
    let schema = Arc::new(requests_schema());
    let rows: Vec<PgWireResult<_>> = requests
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.scenario_id.to_string())?;
            encoder.encode_field(&r.customer_ref)?;
            encoder.encode_field(&(r.participants as i64))?;
            encoder.encode_field(&r.status.as_str())?;
            encoder.encode_field(&candidates_json(&r.candidate_slots))?;
            encoder.encode_field(&ids_json(&r.requested_store_ids))?;
            encoder.encode_field(&r.confirmed_store_id.map(|id| id.to_string()))?;
            encoder.encode_field(&r.assigned_gm_id.map(|id| id.to_string()))?;
            encoder.encode_field(&r.rejection_reason)?;
            encoder.encode_field(&r.opened_at)?;
            encoder.encode_field(&r.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for CharterHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_timed(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CharterQueryParser;

#[async_trait]
impl QueryParser for CharterQueryParser {
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
        Ok(statement_schema(stmt))
    }
}

/// Result schema for a statement, keyed off the table it selects from.
fn statement_schema(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("OCCUPANCY") {
        occupancy_schema()
    } else if upper.contains("RESPONSES") {
        responses_schema()
    } else if upper.contains("REQUESTS") {
        requests_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl ExtendedQueryHandler for CharterHandler {
    type Statement = String;
    type QueryParser = CharterQueryParser;

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
        let mut responses = self.execute_timed(&engine, cmd).await?;
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
            statement_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(statement_schema(
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
                && n > max {
                    max = n;
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

pub struct CharterFactory {
    handler: Arc<CharterHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CharterAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CharterFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = CharterAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CharterHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CharterFactory {
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

/// Handle one client connection end-to-end.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(CharterFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
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
