use sqlparser::ast::{
    self, Assignment, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::NewReservation;

/// Parsed command from SQL input. Ids and text stay raw strings here; the
/// engine validates them so SQL and library callers get the same errors.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRestaurant {
        name: Option<String>,
        returning: bool,
    },
    /// `slug` set: public lookup. Otherwise: the caller's restaurants.
    SelectRestaurants {
        slug: Option<String>,
    },
    InsertTable {
        restaurant_id: Option<String>,
        name: Option<String>,
        capacity: Option<i64>,
        returning: bool,
    },
    SelectTables {
        restaurant_id: String,
    },
    UpdateTable {
        id: String,
        restaurant_id: String,
        name: Option<String>,
        capacity: Option<i64>,
        returning: bool,
    },
    DeleteTable {
        id: String,
    },
    InsertReservation {
        reservation: NewReservation,
        returning: bool,
    },
    SelectReservations {
        restaurant_id: String,
        date: Option<String>,
    },
    UpdateReservationStatus {
        id: String,
        status: String,
        returning: bool,
    },
    SelectAvailableTables {
        restaurant_id: String,
        date: String,
        time: String,
        min_capacity: Option<u32>,
    },
}

impl Command {
    /// Whether the command answers with rows (SELECT, or a write with RETURNING).
    pub fn returns_rows(&self) -> bool {
        match self {
            Command::SelectRestaurants { .. }
            | Command::SelectTables { .. }
            | Command::SelectReservations { .. }
            | Command::SelectAvailableTables { .. } => true,
            Command::InsertRestaurant { returning, .. }
            | Command::InsertTable { returning, .. }
            | Command::UpdateTable { returning, .. }
            | Command::InsertReservation { returning, .. }
            | Command::UpdateReservationStatus { returning, .. } => *returning,
            Command::DeleteTable { .. } => false,
        }
    }
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    stmts.into_iter().next().ok_or(SqlError::Empty)
}

/// Relation a statement targets and whether it answers with rows. Reads the
/// statement structure only, so unbound `$n` placeholders are fine.
#[derive(Debug, PartialEq, Eq)]
pub struct StatementShape {
    pub table: String,
    pub returns_rows: bool,
}

pub fn statement_shape(sql: &str) -> Result<StatementShape, SqlError> {
    let (table, returns_rows) = match parse_statement(sql)? {
        Statement::Insert(insert) => (insert_table_name(&insert)?, insert.returning.is_some()),
        Statement::Update { table, returning, .. } => {
            (table_factor_name(&table.relation)?, returning.is_some())
        }
        Statement::Delete(delete) => (delete_table_name(&delete)?, false),
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => {
                let from = select
                    .from
                    .first()
                    .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
                (table_factor_name(&from.relation)?, true)
            }
            _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
        },
        other => return Err(SqlError::Unsupported(format!("{other}"))),
    };
    Ok(StatementShape { table, returns_rows })
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmt = parse_statement(sql)?;

    match &stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            returning,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref(), returning.is_some()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Column order assumed when an INSERT names no columns.
const RESTAURANT_COLUMNS: &[&str] = &["name"];
const TABLE_COLUMNS: &[&str] = &["restaurantid", "name", "capacity"];
const RESERVATION_COLUMNS: &[&str] = &[
    "restaurantid",
    "tableid",
    "tablename",
    "date",
    "time",
    "guests",
    "username",
    "userphone",
    "useremail",
    "occasion",
    "notes",
    "status",
];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let returning = insert.returning.is_some();
    let defaults = match table.as_str() {
        "restaurants" => RESTAURANT_COLUMNS,
        "tables" => TABLE_COLUMNS,
        "reservations" => RESERVATION_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = insert_row(insert, defaults)?;

    match table.as_str() {
        "restaurants" => {
            let mut name = None;
            for (col, expr) in row {
                match col.as_str() {
                    "name" => name = text_or_null(expr)?,
                    _ => return Err(unknown_column(&table, &col)),
                }
            }
            Ok(Command::InsertRestaurant { name, returning })
        }
        "tables" => {
            let (mut restaurant_id, mut name, mut capacity) = (None, None, None);
            for (col, expr) in row {
                match col.as_str() {
                    "restaurantid" => restaurant_id = text_or_null(expr)?,
                    "name" => name = text_or_null(expr)?,
                    "capacity" | "seats" => capacity = i64_or_null(expr)?,
                    _ => return Err(unknown_column(&table, &col)),
                }
            }
            Ok(Command::InsertTable {
                restaurant_id,
                name,
                capacity,
                returning,
            })
        }
        _ => {
            let mut res = NewReservation::default();
            for (col, expr) in row {
                match col.as_str() {
                    "restaurantid" => res.restaurant_id = text_or_null(expr)?.unwrap_or_default(),
                    "tableid" => res.table_id = text_or_null(expr)?,
                    "tablename" => res.table_name = text_or_null(expr)?,
                    "date" => res.date = text_or_null(expr)?,
                    "time" => res.time = text_or_null(expr)?,
                    "guests" | "partysize" => {
                        res.guests = i64_or_null(expr)?.map(to_u32).transpose()?;
                    }
                    "username" => res.user_name = text_or_null(expr)?,
                    "userphone" => res.user_phone = text_or_null(expr)?,
                    "useremail" => res.user_email = text_or_null(expr)?,
                    "occasion" => res.occasion = text_or_null(expr)?,
                    "notes" => res.notes = text_or_null(expr)?,
                    // Accepted for client compatibility; new bookings always start pending.
                    "status" => {}
                    _ => return Err(unknown_column(&table, &col)),
                }
            }
            Ok(Command::InsertReservation {
                reservation: res,
                returning,
            })
        }
    }
}

/// Pair each value of the single VALUES row with its normalized column name.
fn insert_row<'a>(
    insert: &'a ast::Insert,
    defaults: &[&str],
) -> Result<Vec<(String, &'a Expr)>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let values = match body.body.as_ref() {
        SetExpr::Values(values) => values,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let row = match values.rows.as_slice() {
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        [row] => row,
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().take(row.len()).map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| normalize_column(&c.value)).collect()
    };
    if columns.len() != row.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            columns.len(),
            row.len()
        )));
    }
    Ok(columns.into_iter().zip(row.iter()).collect())
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[Assignment],
    selection: Option<&Expr>,
    returning: bool,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let filters = Filters::from_selection(selection)?;

    let mut set = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => return Err(SqlError::Unsupported("tuple assignment".into())),
        };
        set.push((normalize_column(&col), &assignment.value));
    }

    match table.as_str() {
        "tables" => {
            let (mut name, mut capacity) = (None, None);
            for (col, expr) in set {
                match col.as_str() {
                    "name" => name = text_or_null(expr)?,
                    "capacity" | "seats" => capacity = i64_or_null(expr)?,
                    _ => return Err(unknown_column(&table, &col)),
                }
            }
            Ok(Command::UpdateTable {
                id: filters.required("id")?,
                restaurant_id: filters.required("restaurant_id")?,
                name,
                capacity,
                returning,
            })
        }
        "reservations" => {
            let mut status = None;
            for (col, expr) in set {
                match col.as_str() {
                    "status" => status = text_or_null(expr)?,
                    _ => return Err(unknown_column(&table, &col)),
                }
            }
            Ok(Command::UpdateReservationStatus {
                id: filters.required("id")?,
                status: status.ok_or(SqlError::MissingValue("status"))?,
                returning,
            })
        }
        "restaurants" | "available_tables" => Err(SqlError::Unsupported(format!("UPDATE {table}"))),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "tables" => Ok(Command::DeleteTable {
            id: filters.required("id")?,
        }),
        "restaurants" | "reservations" | "available_tables" => {
            Err(SqlError::Unsupported(format!("DELETE FROM {table}")))
        }
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
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "restaurants" => Ok(Command::SelectRestaurants {
            slug: filters.optional("slug")?,
        }),
        "tables" => Ok(Command::SelectTables {
            restaurant_id: filters.required("restaurant_id")?,
        }),
        "reservations" => Ok(Command::SelectReservations {
            restaurant_id: filters.required("restaurant_id")?,
            date: filters.optional("date")?,
        }),
        "available_tables" => {
            let min_capacity = match filters.number("min_capacity")? {
                Some(n) => Some(n),
                None => filters.number("guests")?,
            };
            Ok(Command::SelectAvailableTables {
                restaurant_id: filters.required("restaurant_id")?,
                date: filters.required("date")?,
                time: filters.required("time")?,
                min_capacity: min_capacity.map(to_u32).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` terms of a WHERE clause joined by AND.
struct Filters<'a> {
    terms: Vec<(String, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_eq_terms(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        let key = normalize_column(col);
        self.terms.iter().find(|(c, _)| *c == key).map(|(_, e)| *e)
    }

    fn optional(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.get(col).map_or(Ok(None), text_or_null)
    }

    fn required(&self, col: &'static str) -> Result<String, SqlError> {
        self.optional(col)?.ok_or(SqlError::MissingFilter(col))
    }

    fn number(&self, col: &str) -> Result<Option<i64>, SqlError> {
        self.get(col).map_or(Ok(None), i64_or_null)
    }
}

fn collect_eq_terms<'a>(expr: &'a Expr, terms: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_terms(inner, terms),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_terms(left, terms)?;
            collect_eq_terms(right, terms)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            terms.push((normalize_column(&col), right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!(
            "filter {other}: only AND-ed equality filters are supported"
        ))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// `restaurant_id`, `restaurantId` and `"RestaurantID"` all name one column.
fn normalize_column(name: &str) -> String {
    name.trim_matches('"')
        .chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn unknown_column(table: &str, col: &str) -> SqlError {
    SqlError::Unsupported(format!("column {col} on {table}"))
}

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

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.clone()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// A literal as text. Numbers and booleans are rendered; NULL is `None`.
fn text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) | Value::Number(s, _)) => {
            Ok(Some(s.clone()))
        }
        Some(Value::Boolean(b)) => Ok(Some(b.to_string())),
        Some(value) => Err(SqlError::Parse(format!("expected text, got {value}"))),
        None => Err(SqlError::Parse(format!("expected a literal, got {expr}"))),
    }
}

fn i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(i64_or_null(expr)?.map(|v| -v));
    }
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected a literal, got {expr}"))),
    }
}

fn to_u32(v: i64) -> Result<u32, SqlError> {
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    MissingFilter(&'static str),
    MissingValue(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingValue(col) => write!(f, "missing value: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
