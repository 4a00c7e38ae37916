use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSlot {
        id: Ulid,
        service_id: Ulid,
        start: Ms,
        end: Ms,
        capacity: u32,
    },
    UpdateSlot {
        id: Ulid,
        capacity: Option<u32>,
        available: Option<bool>,
    },
    InsertLock {
        id: Ulid,
        slot_id: Ulid,
        session_id: String,
        quantity: u32,
        ttl_ms: Ms,
    },
    DeleteLock {
        id: Ulid,
    },
    InsertBooking(Box<BookingRequest>),
    DeleteBooking {
        id: Ulid,
    },
    SelectSlots {
        service_id: Option<Ulid>,
    },
    SelectLocks {
        slot_id: Ulid,
    },
    SelectBookings {
        slot_id: Ulid,
    },
    SelectAvailability {
        service_id: Ulid,
        start: Ms,
        end: Ms,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "slots" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("slots", 5, values.len()));
            }
            Ok(Command::InsertSlot {
                id: parse_ulid(&values[0])?,
                service_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                capacity: parse_u32(&values[4])?,
            })
        }
        "locks" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("locks", 5, values.len()));
            }
            Ok(Command::InsertLock {
                id: parse_ulid(&values[0])?,
                slot_id: parse_ulid(&values[1])?,
                session_id: parse_string(&values[2])?,
                quantity: parse_u32(&values[3])?,
                ttl_ms: parse_i64(&values[4])?,
            })
        }
        "bookings" => {
            if values.len() < 9 {
                return Err(SqlError::WrongArity("bookings", 9, values.len()));
            }
            let lock_id = if values.len() >= 10 {
                parse_ulid_or_null(&values[9])?
            } else {
                None
            };
            let session_id = if values.len() >= 11 {
                parse_string_or_null(&values[10])?
            } else {
                None
            };
            let notes = if values.len() >= 12 {
                parse_string_or_null(&values[11])?
            } else {
                None
            };
            Ok(Command::InsertBooking(Box::new(BookingRequest {
                id: parse_ulid(&values[0])?,
                slot_id: parse_ulid(&values[1])?,
                service_id: parse_ulid(&values[2])?,
                customer_name: parse_string(&values[3])?,
                customer_phone: parse_string(&values[4])?,
                customer_email: None,
                adult_count: parse_u32(&values[5])?,
                child_count: parse_u32(&values[6])?,
                visitor_count: parse_u32(&values[7])?,
                price_cents: parse_i64(&values[8])?,
                lock_id,
                session_id,
                notes,
                created_by: None,
            })))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "slots" {
        return Err(SqlError::UnknownTable(table));
    }

    let id = extract_where_id(selection)?;
    let mut capacity = None;
    let mut available = None;
    for assignment in assignments {
        let col = assignment_column(&assignment.target)?;
        match col.as_str() {
            "capacity" => capacity = Some(parse_u32(&assignment.value)?),
            "available" => available = Some(parse_bool(&assignment.value)?),
            _ => return Err(SqlError::Parse(format!("unknown column in SET: {col}"))),
        }
    }
    if capacity.is_none() && available.is_none() {
        return Err(SqlError::Parse("UPDATE without assignments".into()));
    }
    Ok(Command::UpdateSlot { id, capacity, available })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "locks" => Ok(Command::DeleteLock { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
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
        "availability" => {
            let (mut service_id, mut start, mut end) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut service_id, &mut start, &mut end)?;
            }
            Ok(Command::SelectAvailability {
                service_id: service_id.ok_or(SqlError::MissingFilter("service_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
            })
        }
        "slots" => {
            let mut service_id = None;
            if let Some(selection) = &select.selection {
                extract_eq_ulid(selection, "service_id", &mut service_id)?;
            }
            Ok(Command::SelectSlots { service_id })
        }
        "locks" => {
            let mut slot_id = None;
            if let Some(selection) = &select.selection {
                extract_eq_ulid(selection, "slot_id", &mut slot_id)?;
            }
            Ok(Command::SelectLocks {
                slot_id: slot_id.ok_or(SqlError::MissingFilter("slot_id"))?,
            })
        }
        "bookings" => {
            let mut slot_id = None;
            if let Some(selection) = &select.selection {
                extract_eq_ulid(selection, "slot_id", &mut slot_id)?;
            }
            Ok(Command::SelectBookings {
                slot_id: slot_id.ok_or(SqlError::MissingFilter("slot_id"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_availability_filters(
    expr: &Expr,
    service_id: &mut Option<Ulid>,
    start: &mut Option<Ms>,
    end: &mut Option<Ms>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, service_id, start, end)?;
                extract_availability_filters(right, service_id, start, end)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("service_id") {
                    *service_id = Some(parse_ulid(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    *end = Some(parse_i64(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Extract a single `col = '<ulid>'` equality from a WHERE clause.
fn extract_eq_ulid(expr: &Expr, col: &str, out: &mut Option<Ulid>) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_eq_ulid(left, col, out)?;
                extract_eq_ulid(right, col, out)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some(col) {
                    *out = Some(parse_ulid(right)?);
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

fn assignment_column(target: &AssignmentTarget) -> Result<String, SqlError> {
    match target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
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
                parse_ulid(right)
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
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

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(Some(
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))?,
            )),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
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
