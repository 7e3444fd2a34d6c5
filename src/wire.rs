use std::fmt::Debug;
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
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{self, RentdAuthSource};
use crate::engine::{Decision, Engine, EngineError, parse_bucket, parse_page};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, Listing, SqlError};
use crate::tenant::TenantManager;

pub struct RentdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RentdQueryParser>,
}

impl RentdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RentdQueryParser),
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

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Rows> {
        let engine = self.resolve_engine(client)?;
        let caller = auth::caller_from_login(client.metadata().get("user").map(String::as_str));
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = execute_command(&engine, caller, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().label(),
        };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);

        result.map_err(engine_err)
    }
}

fn require_caller(caller: Option<UserId>) -> Result<UserId, EngineError> {
    caller.ok_or(EngineError::MissingCaller)
}

fn listing_params(listing: &Listing) -> Result<(Bucket, Page), EngineError> {
    Ok((
        parse_bucket(listing.state.as_deref())?,
        parse_page(listing.page, listing.size)?,
    ))
}

fn fresh_item(item: Item) -> ItemView {
    ItemView {
        item,
        adjacent: Adjacent::default(),
    }
}

/// Run one command against a tenant engine on behalf of `caller`.
/// Only user registration works without a caller identity.
async fn execute_command(
    engine: &Engine,
    caller: Option<UserId>,
    cmd: Command,
) -> Result<Rows, EngineError> {
    match cmd {
        Command::InsertUser { name, email } => {
            let user = engine.register_user(name, email).await?;
            Ok(Rows::Users(vec![user]))
        }
        Command::UpdateUser { id, name, email } => {
            let actor = require_caller(caller)?;
            let user = engine.update_user(id, actor, name, email).await?;
            Ok(Rows::Users(vec![user]))
        }
        Command::SelectUser { id } => {
            require_caller(caller)?;
            Ok(Rows::Users(vec![engine.get_user(id)?]))
        }
        Command::SelectUsers { listing } => {
            require_caller(caller)?;
            let page = parse_page(listing.page, listing.size)?;
            Ok(Rows::Users(engine.list_users(page)))
        }
        Command::InsertItem {
            name,
            description,
            available,
            request_id,
        } => {
            let owner = require_caller(caller)?;
            let item = engine
                .list_item(owner, name, description, available, request_id)
                .await?;
            Ok(Rows::Items(vec![fresh_item(item)]))
        }
        Command::UpdateItem {
            id,
            name,
            description,
            available,
        } => {
            let actor = require_caller(caller)?;
            let item = engine
                .update_item(id, actor, name, description, available)
                .await?;
            Ok(Rows::Items(vec![fresh_item(item)]))
        }
        Command::SelectItem { id } => {
            let viewer = require_caller(caller)?;
            Ok(Rows::Items(vec![engine.item_view(id, viewer).await?]))
        }
        Command::SelectItems { listing } => {
            let owner = require_caller(caller)?;
            let page = parse_page(listing.page, listing.size)?;
            Ok(Rows::Items(engine.owner_items(owner, page).await?))
        }
        Command::InsertRequest { description } => {
            let requester = require_caller(caller)?;
            let request = engine.open_request(requester, description).await?;
            Ok(Rows::Requests(vec![RequestView {
                request,
                items: Vec::new(),
            }]))
        }
        Command::SelectRequest { id } => {
            let caller = require_caller(caller)?;
            Ok(Rows::Requests(vec![engine.request_view(id, caller).await?]))
        }
        Command::SelectMyRequests => {
            let caller = require_caller(caller)?;
            Ok(Rows::Requests(engine.my_requests(caller).await?))
        }
        Command::SelectOtherRequests { listing } => {
            let caller = require_caller(caller)?;
            let page = parse_page(listing.page, listing.size)?;
            Ok(Rows::Requests(engine.other_requests(caller, page).await?))
        }
        Command::InsertBooking {
            item_id,
            start,
            end,
        } => {
            let booker = require_caller(caller)?;
            let booking = engine.create_booking(item_id, booker, start, end).await?;
            Ok(Rows::Bookings(vec![booking]))
        }
        Command::DecideBooking { id, approved } => {
            let actor = require_caller(caller)?;
            let booking = engine
                .decide_booking(id, actor, Decision::from_approved(approved))
                .await?;
            Ok(Rows::Bookings(vec![booking]))
        }
        Command::SelectBooking { id } => {
            let caller = require_caller(caller)?;
            Ok(Rows::Bookings(vec![engine.get_booking(id, caller).await?]))
        }
        Command::SelectBookings { role, listing } => {
            let subject = require_caller(caller)?;
            let (bucket, page) = listing_params(&listing)?;
            Ok(Rows::Bookings(
                engine.list_bookings(subject, role, bucket, page).await?,
            ))
        }
    }
}

// ── Row schemas ──────────────────────────────────────────────────

/// Result shape of a command.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Table {
    Users,
    Items,
    Requests,
    Bookings,
}

impl Table {
    fn of(cmd: &Command) -> Table {
        match cmd {
            Command::InsertUser { .. }
            | Command::UpdateUser { .. }
            | Command::SelectUser { .. }
            | Command::SelectUsers { .. } => Table::Users,
            Command::InsertItem { .. }
            | Command::UpdateItem { .. }
            | Command::SelectItem { .. }
            | Command::SelectItems { .. } => Table::Items,
            Command::InsertRequest { .. }
            | Command::SelectRequest { .. }
            | Command::SelectMyRequests
            | Command::SelectOtherRequests { .. } => Table::Requests,
            Command::InsertBooking { .. }
            | Command::DecideBooking { .. }
            | Command::SelectBooking { .. }
            | Command::SelectBookings { .. } => Table::Bookings,
        }
    }

    fn columns(self) -> Vec<(&'static str, Type)> {
        match self {
            Table::Users => vec![
                ("id", Type::INT8),
                ("name", Type::VARCHAR),
                ("email", Type::VARCHAR),
            ],
            Table::Items => vec![
                ("id", Type::INT8),
                ("owner_id", Type::INT8),
                ("name", Type::VARCHAR),
                ("description", Type::VARCHAR),
                ("available", Type::BOOL),
                ("request_id", Type::INT8),
                ("last_booking_id", Type::INT8),
                ("last_booker_id", Type::INT8),
                ("last_start", Type::INT8),
                ("last_end", Type::INT8),
                ("next_booking_id", Type::INT8),
                ("next_booker_id", Type::INT8),
                ("next_start", Type::INT8),
                ("next_end", Type::INT8),
            ],
            Table::Requests => vec![
                ("id", Type::INT8),
                ("requester_id", Type::INT8),
                ("description", Type::VARCHAR),
                ("created", Type::INT8),
                // JSON array of the items listed for the request.
                ("items", Type::VARCHAR),
            ],
            Table::Bookings => vec![
                ("id", Type::INT8),
                ("item_id", Type::INT8),
                ("item_name", Type::VARCHAR),
                ("owner_id", Type::INT8),
                ("booker_id", Type::INT8),
                ("start", Type::INT8),
                ("end", Type::INT8),
                ("status", Type::VARCHAR),
            ],
        }
    }

    /// Field descriptions in the result format the client asked for.
    fn schema(self, format: &Format) -> Vec<FieldInfo> {
        self.columns()
            .into_iter()
            .enumerate()
            .map(|(i, (name, ty))| {
                FieldInfo::new(name.into(), None, None, ty, column_format(format, i))
            })
            .collect()
    }
}

/// Format for column `idx`. Columns beyond a short per-column list fall back to text.
fn column_format(format: &Format, idx: usize) -> FieldFormat {
    match format {
        Format::Individual(codes) if idx >= codes.len() => FieldFormat::Text,
        _ => format.format_for(idx),
    }
}

/// Result schema for a statement, by target table.
fn schema_for(sql: &str, format: &Format) -> Vec<FieldInfo> {
    match sql::parse_sql(sql) {
        Ok(cmd) => Table::of(&cmd).schema(format),
        Err(_) => Vec::new(),
    }
}

/// Rows produced by one command, not yet encoded.
#[derive(Debug)]
enum Rows {
    Users(Vec<User>),
    Items(Vec<ItemView>),
    Requests(Vec<RequestView>),
    Bookings(Vec<BookingView>),
}

impl Rows {
    fn table(&self) -> Table {
        match self {
            Rows::Users(_) => Table::Users,
            Rows::Items(_) => Table::Items,
            Rows::Requests(_) => Table::Requests,
            Rows::Bookings(_) => Table::Bookings,
        }
    }

    fn into_response(self, format: &Format) -> Response {
        let schema = Arc::new(self.table().schema(format));
        match self {
            Rows::Users(users) => query_response(schema, &users, encode_user),
            Rows::Items(views) => query_response(schema, &views, encode_item),
            Rows::Requests(views) => query_response(schema, &views, encode_request),
            Rows::Bookings(views) => query_response(schema, &views, encode_booking),
        }
    }
}

fn query_response<T>(
    schema: Arc<Vec<FieldInfo>>,
    rows: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let rows: Vec<PgWireResult<_>> = rows
        .iter()
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, row)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_user(enc: &mut DataRowEncoder, u: &User) -> PgWireResult<()> {
    enc.encode_field(&u.id)?;
    enc.encode_field(&u.name)?;
    enc.encode_field(&u.email)
}

fn encode_brief(enc: &mut DataRowEncoder, brief: &Option<BookingBrief>) -> PgWireResult<()> {
    enc.encode_field(&brief.as_ref().map(|b| b.id))?;
    enc.encode_field(&brief.as_ref().map(|b| b.booker_id))?;
    enc.encode_field(&brief.as_ref().map(|b| b.start))?;
    enc.encode_field(&brief.as_ref().map(|b| b.end))
}

fn encode_item(enc: &mut DataRowEncoder, v: &ItemView) -> PgWireResult<()> {
    enc.encode_field(&v.item.id)?;
    enc.encode_field(&v.item.owner_id)?;
    enc.encode_field(&v.item.name)?;
    enc.encode_field(&v.item.description)?;
    enc.encode_field(&v.item.available)?;
    enc.encode_field(&v.item.request_id)?;
    encode_brief(enc, &v.adjacent.last)?;
    encode_brief(enc, &v.adjacent.next)
}

fn encode_request(enc: &mut DataRowEncoder, v: &RequestView) -> PgWireResult<()> {
    let items =
        serde_json::to_string(&v.items).map_err(|e| PgWireError::ApiError(Box::new(e)))?;
    enc.encode_field(&v.request.id)?;
    enc.encode_field(&v.request.requester_id)?;
    enc.encode_field(&v.request.description)?;
    enc.encode_field(&v.request.created)?;
    enc.encode_field(&items)
}

fn encode_booking(enc: &mut DataRowEncoder, b: &BookingView) -> PgWireResult<()> {
    enc.encode_field(&b.id)?;
    enc.encode_field(&b.item_id)?;
    enc.encode_field(&b.item_name)?;
    enc.encode_field(&b.owner_id)?;
    enc.encode_field(&b.booker_id)?;
    enc.encode_field(&b.start)?;
    enc.encode_field(&b.end)?;
    enc.encode_field(&b.status.to_string())
}

#[async_trait]
impl SimpleQueryHandler for RentdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let rows = self.run(client, query).await?;
        Ok(vec![rows.into_response(&Format::UnifiedText)])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RentdQueryParser;

#[async_trait]
impl QueryParser for RentdQueryParser {
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
        let text = Format::UnifiedText;
        Ok(schema_for(&placeholder_sql(stmt), column_format.unwrap_or(&text)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RentdHandler {
    type Statement = String;
    type QueryParser = RentdQueryParser;

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
        let sql = substitute_params(portal);
        let rows = self.run(client, &sql).await?;
        Ok(rows.into_response(&portal.result_column_format))
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
            schema_for(&placeholder_sql(&target.statement), &Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(schema_for(
            &substitute_params(target),
            &target.result_column_format,
        )))
    }
}

/// Rewrite every `$N` placeholder outside quoted text with `bind(N - 1)`.
/// Placeholders `bind` declines keep their original text. One pass, so bound
/// values are never rescanned.
fn rewrite_params(sql: &str, mut bind: impl FnMut(usize) -> Option<String>) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) => {
                // A doubled quote closes and reopens, which is the same text.
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '$' => {
                let mut end = i + 1;
                while let Some(&(j, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = j + 1;
                    chars.next();
                }
                let bound = sql[i + 1..end]
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .and_then(|n| bind(n - 1));
                match bound {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&sql[i..end]),
                }
            }
            None => out.push(c),
        }
    }
    out
}

/// Highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    rewrite_params(sql, |i| {
        max = max.max(i + 1);
        None
    });
    max
}

fn quote_literal(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    format!("'{}'", text.replace('\'', "''"))
}

/// Bind text-format parameter values as quoted literals.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    rewrite_params(sql, |i| {
        params.get(i).map(|p| match p {
            Some(bytes) => quote_literal(bytes.as_ref()),
            None => "NULL".to_string(),
        })
    })
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// Statement text with every placeholder bound to `'0'`, for describing
/// result columns before parameters are bound.
fn placeholder_sql(sql: &str) -> String {
    rewrite_params(sql, |_| Some("'0'".to_string()))
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RentdFactory {
    handler: Arc<RentdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RentdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RentdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = RentdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RentdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RentdFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = RentdFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.kind().sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
