use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// Intake: a new private booking request.
    InsertRequest {
        id: Ulid,
        scenario_id: Ulid,
        customer_ref: String,
        participants: u32,
        candidates: Vec<CandidateSlot>,
        requested_stores: Vec<Ulid>,
        eligible_staff: Vec<Ulid>,
    },
    /// A GM's availability answer.
    InsertResponse {
        request_id: Ulid,
        staff_id: Ulid,
        available: bool,
        candidate_orders: Vec<u32>,
        notes: Option<String>,
    },
    /// Store-side confirmation.
    InsertConfirmation {
        request_id: Ulid,
        candidate_order: u32,
        store_id: Ulid,
        gm_id: Ulid,
    },
    /// Store-side rejection.
    InsertRejection {
        request_id: Ulid,
        reason: String,
    },
    /// Ordinary-occupancy feed entry.
    InsertScheduleEvent {
        id: Ulid,
        store_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        gm_ids: Vec<Ulid>,
        label: Option<String>,
    },
    DeleteScheduleEvent {
        id: Ulid,
    },
    SelectRequests {
        id: Option<Ulid>,
        status: Option<RequestStatus>,
    },
    SelectResponses {
        request_id: Ulid,
    },
    SelectPendingRequests {
        staff_id: Ulid,
    },
    SelectActionableRequests,
    SelectOccupancy {
        from: NaiveDate,
        to: NaiveDate,
    },
    Listen {
        channel: String,
    },
}

/// Candidate slots travel as a JSON array string:
/// `[{"order":1,"date":"2024-01-05","startTime":"10:00",
/// "endTime":"14:00"}, ...]`. The time-slot bucket is always derived,
/// never supplied.
#[derive(Deserialize)]
struct CandidateJson {
    order: u32,
    date: NaiveDate,
    #[serde(rename = "startTime")]
    start_time: String,
    #[serde(rename = "endTime")]
    end_time: String,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

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
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "requests" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("requests", 7, values.len()));
            }
            Ok(Command::InsertRequest {
                id: parse_ulid(&values[0])?,
                scenario_id: parse_ulid(&values[1])?,
                customer_ref: parse_string(&values[2])?,
                participants: parse_u32(&values[3])?,
                candidates: parse_candidates_json(&values[4])?,
                requested_stores: parse_ulid_list_json(&values[5])?,
                eligible_staff: parse_ulid_list_json(&values[6])?,
            })
        }
        "responses" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("responses", 3, values.len()));
            }
            let candidate_orders = if values.len() >= 4 {
                parse_u32_list_json(&values[3])?
            } else {
                Vec::new()
            };
            let notes = if values.len() >= 5 {
                parse_string_or_null(&values[4])?
            } else {
                None
            };
            Ok(Command::InsertResponse {
                request_id: parse_ulid(&values[0])?,
                staff_id: parse_ulid(&values[1])?,
                available: parse_bool(&values[2])?,
                candidate_orders,
                notes,
            })
        }
        "confirmations" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("confirmations", 4, values.len()));
            }
            Ok(Command::InsertConfirmation {
                request_id: parse_ulid(&values[0])?,
                candidate_order: parse_u32(&values[1])?,
                store_id: parse_ulid(&values[2])?,
                gm_id: parse_ulid(&values[3])?,
            })
        }
        "rejections" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("rejections", 2, values.len()));
            }
            Ok(Command::InsertRejection {
                request_id: parse_ulid(&values[0])?,
                reason: parse_string(&values[1])?,
            })
        }
        "schedule_events" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("schedule_events", 5, values.len()));
            }
            let gm_ids = if values.len() >= 6 {
                parse_ulid_list_json(&values[5])?
            } else {
                Vec::new()
            };
            let label = if values.len() >= 7 {
                parse_string_or_null(&values[6])?
            } else {
                None
            };
            Ok(Command::InsertScheduleEvent {
                id: parse_ulid(&values[0])?,
                store_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                start_time: parse_time(&values[3])?,
                end_time: parse_time(&values[4])?,
                gm_ids,
                label,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "schedule_events" => Ok(Command::DeleteScheduleEvent { id }),
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

    match table.as_str() {
        "requests" => {
            let (mut id, mut status) = (None, None);
            if let Some(selection) = &select.selection {
                extract_request_filters(selection, &mut id, &mut status)?;
            }
            Ok(Command::SelectRequests { id, status })
        }
        "responses" => {
            let mut request_id = None;
            if let Some(selection) = &select.selection {
                extract_eq_ulid(selection, "request_id", &mut request_id)?;
            }
            Ok(Command::SelectResponses {
                request_id: request_id.ok_or(SqlError::MissingFilter("request_id"))?,
            })
        }
        "pending_requests" => {
            let mut staff_id = None;
            if let Some(selection) = &select.selection {
                extract_eq_ulid(selection, "staff_id", &mut staff_id)?;
            }
            Ok(Command::SelectPendingRequests {
                staff_id: staff_id.ok_or(SqlError::MissingFilter("staff_id"))?,
            })
        }
        "actionable_requests" => Ok(Command::SelectActionableRequests),
        "occupancy" => {
            let (mut from, mut to) = (None, None);
            if let Some(selection) = &select.selection {
                extract_occupancy_filters(selection, &mut from, &mut to)?;
            }
            Ok(Command::SelectOccupancy {
                from: from.ok_or(SqlError::MissingFilter("date >="))?,
                to: to.ok_or(SqlError::MissingFilter("date <="))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_request_filters(
    expr: &Expr,
    id: &mut Option<Ulid>,
    status: &mut Option<RequestStatus>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_request_filters(left, id, status)?;
                extract_request_filters(right, id, status)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                if col.as_deref() == Some("id") {
                    *id = Some(parse_ulid_expr(right)?);
                } else if col.as_deref() == Some("status") {
                    let s = parse_string_expr(right)?;
                    *status = Some(
                        RequestStatus::parse(&s)
                            .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                    );
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn extract_eq_ulid(expr: &Expr, column: &str, out: &mut Option<Ulid>) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_eq_ulid(left, column, out)?;
                extract_eq_ulid(right, column, out)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some(column) {
                    *out = Some(parse_ulid_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn extract_occupancy_filters(
    expr: &Expr,
    from: &mut Option<NaiveDate>,
    to: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_occupancy_filters(left, from, to)?;
                extract_occupancy_filters(right, from, to)?;
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    *from = Some(parse_date_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    *to = Some(parse_date_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    s.parse()
        .map_err(|e| SqlError::Parse(format!("bad date: {e}")))
}

fn parse_time_str(s: &str) -> Result<NaiveTime, SqlError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| SqlError::Parse(format!("bad time: {e}")))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_expr(expr)
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    Ok(Some(parse_string_expr(expr)?))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date_expr(expr)
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    parse_time_str(&parse_string_expr(expr)?)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
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
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_candidates_json(expr: &Expr) -> Result<Vec<CandidateSlot>, SqlError> {
    let raw = parse_string_expr(expr)?;
    let parsed: Vec<CandidateJson> = serde_json::from_str(&raw)
        .map_err(|e| SqlError::Parse(format!("bad candidates JSON: {e}")))?;
    parsed
        .into_iter()
        .map(|c| {
            let start = parse_time_str(&c.start_time)?;
            let end = parse_time_str(&c.end_time)?;
            Ok(CandidateSlot::new(c.order, c.date, start, end))
        })
        .collect()
}

fn parse_ulid_list_json(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    let raw = parse_string_expr(expr)?;
    let parsed: Vec<String> = serde_json::from_str(&raw)
        .map_err(|e| SqlError::Parse(format!("bad id list JSON: {e}")))?;
    parsed
        .iter()
        .map(|s| Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}"))))
        .collect()
}

fn parse_u32_list_json(expr: &Expr) -> Result<Vec<u32>, SqlError> {
    let raw = parse_string_expr(expr)?;
    serde_json::from_str(&raw).map_err(|e| SqlError::Parse(format!("bad order list JSON: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
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
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
