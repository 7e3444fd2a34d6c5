use sqlparser::ast::{
    self, AssignmentTarget, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject,
    Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;

/// Raw listing parameters. Bucket names and page bounds are checked by the engine.
#[derive(Debug, Default, PartialEq)]
pub struct Listing {
    pub state: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        name: String,
        email: String,
    },
    UpdateUser {
        id: UserId,
        name: Option<String>,
        email: Option<String>,
    },
    SelectUser {
        id: UserId,
    },
    SelectUsers {
        listing: Listing,
    },
    InsertItem {
        name: String,
        description: String,
        available: bool,
        request_id: Option<RequestId>,
    },
    UpdateItem {
        id: ItemId,
        name: Option<String>,
        description: Option<String>,
        available: Option<bool>,
    },
    SelectItem {
        id: ItemId,
    },
    /// The caller's inventory.
    SelectItems {
        listing: Listing,
    },
    InsertRequest {
        description: String,
    },
    SelectRequest {
        id: RequestId,
    },
    /// The caller's own requests.
    SelectMyRequests,
    /// Everyone else's requests.
    SelectOtherRequests {
        listing: Listing,
    },
    InsertBooking {
        item_id: ItemId,
        start: Ms,
        end: Ms,
    },
    DecideBooking {
        id: BookingId,
        approved: bool,
    },
    SelectBooking {
        id: BookingId,
    },
    SelectBookings {
        role: Role,
        listing: Listing,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// VALUES row keyed by column name. Without a column list the table's
/// natural column order applies.
struct Row {
    table: &'static str,
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn new(insert: &ast::Insert, table: &'static str, natural: &[&str]) -> Result<Self, SqlError> {
        let values = extract_insert_values(insert)?;
        let columns: Vec<String> = if insert.columns.is_empty() {
            natural.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if values.len() != columns.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        for col in &columns {
            if !natural.contains(&col.as_str()) {
                return Err(SqlError::UnknownColumn(table, col.clone()));
            }
        }
        Ok(Self {
            table,
            cells: columns.into_iter().zip(values).collect(),
        })
    }

    fn get(&self, column: &'static str) -> Option<&Expr> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "users" => {
            let row = Row::new(insert, "users", &["name", "email"])?;
            Ok(Command::InsertUser {
                name: parse_string_expr(row.require("name")?)?,
                email: parse_string_expr(row.require("email")?)?,
            })
        }
        "items" => {
            let row = Row::new(
                insert,
                "items",
                &["name", "description", "available", "request_id"],
            )?;
            Ok(Command::InsertItem {
                name: parse_string_expr(row.require("name")?)?,
                description: parse_string_expr(row.require("description")?)?,
                available: match row.get("available") {
                    Some(e) => parse_bool(e)?,
                    None => true,
                },
                request_id: match row.get("request_id") {
                    Some(e) => parse_i64_or_null(e)?,
                    None => None,
                },
            })
        }
        "requests" => {
            let row = Row::new(insert, "requests", &["description"])?;
            Ok(Command::InsertRequest {
                description: parse_string_expr(row.require("description")?)?,
            })
        }
        "bookings" => {
            let row = Row::new(insert, "bookings", &["item_id", "start", "end"])?;
            Ok(Command::InsertBooking {
                item_id: parse_i64_expr(row.require("item_id")?)?,
                start: parse_i64_expr(row.require("start")?)?,
                end: parse_i64_expr(row.require("end")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((column, &assignment.value));
    }

    match table.as_str() {
        "users" => {
            let (mut name, mut email) = (None, None);
            for (column, value) in set {
                match column.as_str() {
                    "name" => name = Some(parse_string_expr(value)?),
                    "email" => email = Some(parse_string_expr(value)?),
                    _ => return Err(SqlError::UnknownColumn("users", column)),
                }
            }
            Ok(Command::UpdateUser { id, name, email })
        }
        "items" => {
            let (mut name, mut description, mut available) = (None, None, None);
            for (column, value) in set {
                match column.as_str() {
                    "name" => name = Some(parse_string_expr(value)?),
                    "description" => description = Some(parse_string_expr(value)?),
                    "available" => available = Some(parse_bool(value)?),
                    _ => return Err(SqlError::UnknownColumn("items", column)),
                }
            }
            Ok(Command::UpdateItem {
                id,
                name,
                description,
                available,
            })
        }
        "bookings" => match set.as_slice() {
            [(column, value)] if column == "approved" => Ok(Command::DecideBooking {
                id,
                approved: parse_bool(value)?,
            }),
            [(column, _)] => Err(SqlError::UnknownColumn("bookings", column.clone())),
            _ => Err(SqlError::WrongArity("bookings", 1, set.len())),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }
    let id = match filter(&filters, "id") {
        Some(e) => Some(parse_i64_expr(e)?),
        None => None,
    };

    match (table.as_str(), id) {
        ("users", Some(id)) => Ok(Command::SelectUser { id }),
        ("users", None) => Ok(Command::SelectUsers {
            listing: listing(&filters, "users", false)?,
        }),
        ("items", Some(id)) => Ok(Command::SelectItem { id }),
        ("items", None) => Ok(Command::SelectItems {
            listing: listing(&filters, "items", false)?,
        }),
        ("requests", Some(id)) => Ok(Command::SelectRequest { id }),
        ("requests", None) => Ok(Command::SelectMyRequests),
        ("all_requests", None) => Ok(Command::SelectOtherRequests {
            listing: listing(&filters, "all_requests", false)?,
        }),
        ("bookings", Some(id)) => Ok(Command::SelectBooking { id }),
        ("bookings", None) => Ok(Command::SelectBookings {
            role: Role::Booker,
            listing: listing(&filters, "bookings", true)?,
        }),
        ("owner_bookings", None) => Ok(Command::SelectBookings {
            role: Role::Owner,
            listing: listing(&filters, "owner_bookings", true)?,
        }),
        ("all_requests" | "owner_bookings", Some(_)) => {
            Err(SqlError::Unsupported(format!("{table} by id")))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y AND ...` into (column, value) pairs.
fn collect_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push((column, right.as_ref().clone()));
            Ok(())
        }
        Expr::Nested(inner) => collect_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn filter<'a>(filters: &'a [(String, Expr)], column: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == column).map(|(_, e)| e)
}

fn listing(
    filters: &[(String, Expr)],
    table: &'static str,
    with_state: bool,
) -> Result<Listing, SqlError> {
    let mut out = Listing::default();
    for (column, value) in filters {
        match column.as_str() {
            "state" if with_state => out.state = Some(parse_string_expr(value)?),
            "page" => out.page = Some(parse_i64_expr(value)?),
            "size" => out.size = Some(parse_i64_expr(value)?),
            _ => return Err(SqlError::UnknownColumn(table, column.clone())),
        }
    }
    Ok(out)
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<i64, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_i64_expr(right),
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => Ok(Some(parse_i64_expr(expr)?)),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
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
    MissingColumn(&'static str, &'static str),
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
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
