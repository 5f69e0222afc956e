use chrono::{NaiveDate, Weekday};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
///
/// INSERT values are positional; a column list, when present, is not
/// consulted. Optional trailing columns may be omitted or passed as NULL.
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateRestaurant {
        id: Ulid,
        name: String,
        slot_interval: Option<Minute>,
        pacing: PacingLimits,
        last_seating_lead: Option<Minute>,
    },
    DeleteRestaurant {
        id: Ulid,
    },
    AddTable {
        id: Ulid,
        restaurant_id: Ulid,
        label: String,
        min_covers: u32,
        max_covers: u32,
        priority: i32,
        combinable: bool,
    },
    RetireTable {
        id: Ulid,
    },
    AddRule {
        id: Ulid,
        restaurant_id: Ulid,
        min_party: u32,
        max_party: u32,
        minutes: Minute,
    },
    RemoveRule {
        id: Ulid,
    },
    AddPeriod {
        id: Ulid,
        restaurant_id: Ulid,
        weekday: Weekday,
        name: String,
        open: Minute,
        close: Minute,
    },
    RemovePeriod {
        id: Ulid,
    },
    CreateBooking {
        req: BookingRequest,
    },
    CancelBooking {
        id: Ulid,
    },
    SetBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    Availability {
        restaurant_id: Ulid,
        date: NaiveDate,
        party_size: u32,
        preferred: Option<Minute>,
    },
    AvailableTables {
        restaurant_id: Ulid,
        date: NaiveDate,
        start: Minute,
        party_size: u32,
    },
    ListBookings {
        restaurant_id: Ulid,
        date: Option<NaiveDate>,
    },
    ListTables {
        restaurant_id: Ulid,
    },
    ListRestaurants,
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
        "restaurants" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("restaurants", 2, values.len()));
            }
            let id = parse_ulid(&values[0])?;
            let name = parse_string(&values[1])?;
            let slot_interval = if values.len() >= 3 {
                parse_minute_or_null(&values[2])?
            } else {
                None
            };
            let defaults = PacingLimits::default();
            let pacing = PacingLimits {
                moderate_pct: opt_field(&values, 3, parse_u32_or_null)?
                    .unwrap_or(defaults.moderate_pct),
                busy_pct: opt_field(&values, 4, parse_u32_or_null)?.unwrap_or(defaults.busy_pct),
                max_covers_per_slot: opt_field(&values, 5, parse_u32_or_null)?.unwrap_or(0),
                max_bookings_per_slot: opt_field(&values, 6, parse_u32_or_null)?.unwrap_or(0),
            };
            let last_seating_lead = opt_field(&values, 7, parse_minute_or_null)?;
            Ok(Command::CreateRestaurant { id, name, slot_interval, pacing, last_seating_lead })
        }
        "restaurant_tables" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("restaurant_tables", 5, values.len()));
            }
            Ok(Command::AddTable {
                id: parse_ulid(&values[0])?,
                restaurant_id: parse_ulid(&values[1])?,
                label: parse_string(&values[2])?,
                min_covers: parse_u32(&values[3])?,
                max_covers: parse_u32(&values[4])?,
                priority: opt_field(&values, 5, parse_i32_or_null)?.unwrap_or(0),
                combinable: opt_field(&values, 6, parse_bool_or_null)?.unwrap_or(false),
            })
        }
        "schedules" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("schedules", 6, values.len()));
            }
            Ok(Command::AddPeriod {
                id: parse_ulid(&values[0])?,
                restaurant_id: parse_ulid(&values[1])?,
                weekday: parse_weekday(&values[2])?,
                name: parse_string(&values[3])?,
                open: parse_minute_field(&values[4])?,
                close: parse_minute_field(&values[5])?,
            })
        }
        "turn_time_rules" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("turn_time_rules", 5, values.len()));
            }
            Ok(Command::AddRule {
                id: parse_ulid(&values[0])?,
                restaurant_id: parse_ulid(&values[1])?,
                min_party: parse_u32(&values[2])?,
                max_party: parse_u32(&values[3])?,
                minutes: parse_i64(&values[4])?,
            })
        }
        "bookings" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            let req = BookingRequest {
                id: parse_ulid(&values[0])?,
                restaurant_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                start: parse_minute_field(&values[3])?,
                party_size: parse_u32(&values[4])?,
                guest_name: opt_field(&values, 5, parse_string_or_null)?,
                override_pacing: opt_field(&values, 6, parse_bool_or_null)?.unwrap_or(false),
                override_reason: opt_field(&values, 7, parse_string_or_null)?,
            };
            Ok(Command::CreateBooking { req })
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
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let mut status = None;
    for assignment in assignments {
        let col = match &assignment.target {
            ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        };
        if col.as_deref() == Some("status") {
            status = Some(parse_status(&assignment.value)?);
        }
    }

    Ok(Command::SetBookingStatus {
        id,
        status: status.ok_or(SqlError::MissingFilter("status"))?,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "restaurants" => Ok(Command::DeleteRestaurant { id }),
        "restaurant_tables" => Ok(Command::RetireTable { id }),
        "schedules" => Ok(Command::RemovePeriod { id }),
        "turn_time_rules" => Ok(Command::RemoveRule { id }),
        "bookings" => Ok(Command::CancelBooking { id }),
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

    let mut filters = SelectFilters::default();
    if let Some(selection) = &select.selection {
        extract_select_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "availability" => Ok(Command::Availability {
            restaurant_id: filters
                .restaurant_id
                .ok_or(SqlError::MissingFilter("restaurant_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
            party_size: filters.party_size.ok_or(SqlError::MissingFilter("party_size"))?,
            preferred: filters.preferred_time,
        }),
        "available_tables" => Ok(Command::AvailableTables {
            restaurant_id: filters
                .restaurant_id
                .ok_or(SqlError::MissingFilter("restaurant_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
            start: filters.time.ok_or(SqlError::MissingFilter("time"))?,
            party_size: filters.party_size.ok_or(SqlError::MissingFilter("party_size"))?,
        }),
        "bookings" => Ok(Command::ListBookings {
            restaurant_id: filters
                .restaurant_id
                .ok_or(SqlError::MissingFilter("restaurant_id"))?,
            date: filters.date,
        }),
        "restaurant_tables" => Ok(Command::ListTables {
            restaurant_id: filters
                .restaurant_id
                .ok_or(SqlError::MissingFilter("restaurant_id"))?,
        }),
        "restaurants" => Ok(Command::ListRestaurants),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Equality filters recognized in SELECT WHERE clauses. Unknown columns are
/// ignored so clients can add benign predicates.
#[derive(Default)]
struct SelectFilters {
    restaurant_id: Option<Ulid>,
    date: Option<NaiveDate>,
    party_size: Option<u32>,
    preferred_time: Option<Minute>,
    time: Option<Minute>,
}

fn extract_select_filters(expr: &Expr, filters: &mut SelectFilters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_select_filters(left, filters)?;
                extract_select_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("restaurant_id") => filters.restaurant_id = Some(parse_ulid_expr(right)?),
                Some("date") => filters.date = Some(parse_date(right)?),
                Some("party_size") => filters.party_size = Some(parse_u32(right)?),
                Some("preferred_time") => {
                    filters.preferred_time = Some(parse_minute_field(right)?)
                }
                Some("time") => filters.time = Some(parse_minute_field(right)?),
                _ => {}
            },
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

/// Value at `idx`, parsed by `parse`; absent trailing columns read as None.
fn opt_field<T>(
    values: &[Expr],
    idx: usize,
    parse: fn(&Expr) -> Result<Option<T>, SqlError>,
) -> Result<Option<T>, SqlError> {
    match values.get(idx) {
        Some(expr) => parse(expr),
        None => Ok(None),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
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
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_u32(expr)?))
    }
}

fn parse_i32_or_null(expr: &Expr) -> Result<Option<i32>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        let v = parse_i64_expr(expr)?;
        Ok(Some(i32::try_from(v).map_err(|_| {
            SqlError::Parse(format!("{v} out of i32 range"))
        })?))
    }
}

/// Clock value: 'HH:MM' string or a bare minutes-since-midnight number.
fn parse_minute_field(expr: &Expr) -> Result<Minute, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => parse_minute(s)
                .ok_or_else(|| SqlError::Parse(format!("bad time: {s}"))),
            _ => Err(SqlError::Parse(format!("expected time, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_minute_or_null(expr: &Expr) -> Result<Option<Minute>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_minute_field(expr)?))
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
    } else {
        Err(SqlError::Parse(format!("expected date string, got {expr:?}")))
    }
}

fn parse_weekday(expr: &Expr) -> Result<Weekday, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        s.parse::<Weekday>()
            .map_err(|_| SqlError::Parse(format!("bad weekday: {s}")))
    } else {
        Err(SqlError::Parse(format!("expected weekday string, got {expr:?}")))
    }
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        BookingStatus::parse(s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
    } else {
        Err(SqlError::Parse(format!("expected status string, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        Ok(s.clone())
    } else {
        Err(SqlError::Parse(format!("expected string, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_string(expr)?))
    }
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

fn parse_bool_or_null(expr: &Expr) -> Result<Option<bool>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_bool(expr)?))
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

#[cfg(test)]
mod tests {
    use super::*;

    const RID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const EID: &str = "01BX5ZZKBKACTAV9WEVGEMMVRY";

    #[test]
    fn parse_insert_restaurant_minimal() {
        let sql = format!("INSERT INTO restaurants (id, name) VALUES ('{RID}', 'Chez Nous')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::CreateRestaurant { id, name, slot_interval, pacing, last_seating_lead } => {
                assert_eq!(id.to_string(), RID);
                assert_eq!(name, "Chez Nous");
                assert_eq!(slot_interval, None);
                assert_eq!(pacing, PacingLimits::default());
                assert_eq!(last_seating_lead, None);
            }
            _ => panic!("expected CreateRestaurant, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_restaurant_full() {
        let sql = format!(
            "INSERT INTO restaurants VALUES ('{RID}', 'Chez Nous', 15, 40, 75, 60, 8, 90)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::CreateRestaurant { slot_interval, pacing, last_seating_lead, .. } => {
                assert_eq!(slot_interval, Some(15));
                assert_eq!(pacing.moderate_pct, 40);
                assert_eq!(pacing.busy_pct, 75);
                assert_eq!(pacing.max_covers_per_slot, 60);
                assert_eq!(pacing.max_bookings_per_slot, 8);
                assert_eq!(last_seating_lead, Some(90));
            }
            _ => panic!("expected CreateRestaurant, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_restaurant_null_interval_uses_default() {
        let sql = format!(
            "INSERT INTO restaurants (id, name, slot_interval) VALUES ('{RID}', 'Chez Nous', NULL)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::CreateRestaurant { slot_interval, .. } => assert_eq!(slot_interval, None),
            _ => panic!("expected CreateRestaurant, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_table() {
        let sql = format!(
            "INSERT INTO restaurant_tables VALUES ('{EID}', '{RID}', 'T1', 2, 4, 10, true)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::AddTable { label, min_covers, max_covers, priority, combinable, .. } => {
                assert_eq!(label, "T1");
                assert_eq!(min_covers, 2);
                assert_eq!(max_covers, 4);
                assert_eq!(priority, 10);
                assert!(combinable);
            }
            _ => panic!("expected AddTable, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_table_defaults() {
        let sql =
            format!("INSERT INTO restaurant_tables VALUES ('{EID}', '{RID}', 'T1', 2, 4)");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::AddTable { priority, combinable, .. } => {
                assert_eq!(priority, 0);
                assert!(!combinable);
            }
            _ => panic!("expected AddTable, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_schedule() {
        let sql = format!(
            "INSERT INTO schedules VALUES ('{EID}', '{RID}', 'fri', 'dinner', '18:00', 1320)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::AddPeriod { weekday, name, open, close, .. } => {
                assert_eq!(weekday, Weekday::Fri);
                assert_eq!(name, "dinner");
                assert_eq!(open, 1080);
                assert_eq!(close, 1320);
            }
            _ => panic!("expected AddPeriod, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_schedule_bad_weekday_errors() {
        let sql = format!(
            "INSERT INTO schedules VALUES ('{EID}', '{RID}', 'someday', 'dinner', 1080, 1320)"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_rule() {
        let sql = format!("INSERT INTO turn_time_rules VALUES ('{EID}', '{RID}', 1, 4, 90)");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::AddRule { min_party, max_party, minutes, .. } => {
                assert_eq!(min_party, 1);
                assert_eq!(max_party, 4);
                assert_eq!(minutes, 90);
            }
            _ => panic!("expected AddRule, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_minimal() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{EID}', '{RID}', '2025-06-06', '19:00', 4)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::CreateBooking { req } => {
                assert_eq!(req.id.to_string(), EID);
                assert_eq!(req.restaurant_id.to_string(), RID);
                assert_eq!(req.date.to_string(), "2025-06-06");
                assert_eq!(req.start, 1140);
                assert_eq!(req.party_size, 4);
                assert_eq!(req.guest_name, None);
                assert!(!req.override_pacing);
                assert_eq!(req.override_reason, None);
            }
            _ => panic!("expected CreateBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_with_override() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{EID}', '{RID}', '2025-06-06', 1140, 4, 'Dr. Lam', true, 'regular, okayed by chef')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::CreateBooking { req } => {
                assert_eq!(req.start, 1140);
                assert_eq!(req.guest_name.as_deref(), Some("Dr. Lam"));
                assert!(req.override_pacing);
                assert_eq!(req.override_reason.as_deref(), Some("regular, okayed by chef"));
            }
            _ => panic!("expected CreateBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_status() {
        let sql = format!("UPDATE bookings SET status = 'no_show' WHERE id = '{EID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SetBookingStatus { id, status } => {
                assert_eq!(id.to_string(), EID);
                assert_eq!(status, BookingStatus::NoShow);
            }
            _ => panic!("expected SetBookingStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_bad_status_errors() {
        let sql = format!("UPDATE bookings SET status = 'vanished' WHERE id = '{EID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_delete_booking_is_cancel() {
        let sql = format!("DELETE FROM bookings WHERE id = '{EID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::CancelBooking { .. }));
    }

    #[test]
    fn parse_delete_table_is_retire() {
        let sql = format!("DELETE FROM restaurant_tables WHERE id = '{EID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::RetireTable { .. }));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE restaurant_id = '{RID}' AND date = '2025-06-06' AND party_size = 4"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::Availability { restaurant_id, date, party_size, preferred } => {
                assert_eq!(restaurant_id.to_string(), RID);
                assert_eq!(date.to_string(), "2025-06-06");
                assert_eq!(party_size, 4);
                assert_eq!(preferred, None);
            }
            _ => panic!("expected Availability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_with_preferred_time() {
        let sql = format!(
            "SELECT * FROM availability WHERE restaurant_id = '{RID}' AND date = '2025-06-06' AND party_size = 2 AND preferred_time = '19:30'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::Availability { preferred, .. } => assert_eq!(preferred, Some(1170)),
            _ => panic!("expected Availability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_party_errors() {
        let sql = format!(
            "SELECT * FROM availability WHERE restaurant_id = '{RID}' AND date = '2025-06-06'"
        );
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("party_size"))
        ));
    }

    #[test]
    fn parse_select_available_tables() {
        let sql = format!(
            "SELECT * FROM available_tables WHERE restaurant_id = '{RID}' AND date = '2025-06-06' AND time = '20:00' AND party_size = 6"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::AvailableTables { start, party_size, .. } => {
                assert_eq!(start, 1200);
                assert_eq!(party_size, 6);
            }
            _ => panic!("expected AvailableTables, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_bookings_with_and_without_date() {
        let sql =
            format!("SELECT * FROM bookings WHERE restaurant_id = '{RID}' AND date = '2025-06-06'");
        match parse_sql(&sql).unwrap() {
            Command::ListBookings { date, .. } => {
                assert_eq!(date.map(|d| d.to_string()), Some("2025-06-06".into()))
            }
            cmd => panic!("expected ListBookings, got {cmd:?}"),
        }

        let sql = format!("SELECT * FROM bookings WHERE restaurant_id = '{RID}'");
        match parse_sql(&sql).unwrap() {
            Command::ListBookings { date, .. } => assert_eq!(date, None),
            cmd => panic!("expected ListBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_tables() {
        let sql = format!("SELECT * FROM restaurant_tables WHERE restaurant_id = '{RID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::ListTables { .. }));
    }

    #[test]
    fn parse_select_restaurants() {
        let cmd = parse_sql("SELECT * FROM restaurants").unwrap();
        assert_eq!(cmd, Command::ListRestaurants);
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{RID}')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
