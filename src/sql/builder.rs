//! Builds PostgreSQL DDL and parameterized DML. Identifiers come from table
//! definitions and are always quoted; values are always parameters.

use crate::backend::{Aggregate, Filter, Row, SelectQuery, SortOrder};
use crate::config::{ColumnConfig, ColumnDefaultConfig, SchemaChange, TableSchema};
use serde_json::Value;
use std::collections::HashMap;

/// Column name to PostgreSQL type name (`udt_name`), used to cast placeholders.
pub type ColumnTypes = HashMap<String, String>;

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// SQL literal for a default value.
pub fn literal(v: &Value) -> String {
    match v {
        Value::Null => "NULL".into(),
        Value::Bool(true) => "TRUE".into(),
        Value::Bool(false) => "FALSE".into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Array(_) | Value::Object(_) => format!("'{}'", v.to_string().replace('\'', "''")),
    }
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Push a parameter and return its placeholder, cast to the column type when known.
    fn placeholder(&mut self, v: Value, column: &str, types: &ColumnTypes) -> String {
        self.params.push(v);
        let n = self.params.len();
        match types.get(column) {
            Some(t) => format!("${}::{}", n, quoted(t)),
            None => format!("${}", n),
        }
    }

    fn where_clause(&mut self, filter: Option<&Filter>, types: &ColumnTypes) -> String {
        let Some(filter) = filter.filter(|f| !f.is_empty()) else {
            return String::new();
        };
        let parts: Vec<String> = filter
            .conditions()
            .iter()
            .map(|(col, val)| {
                if val.is_null() {
                    format!("{} IS NULL", quoted(col))
                } else {
                    let ph = self.placeholder(val.clone(), col, types);
                    format!("{} = {}", quoted(col), ph)
                }
            })
            .collect();
        format!(" WHERE {}", parts.join(" AND "))
    }
}

pub fn column_definition(c: &ColumnConfig) -> String {
    let mut def = format!("{} {}", quoted(&c.name), c.type_.sql());
    if !c.nullable {
        def.push_str(" NOT NULL");
    }
    if c.unique {
        def.push_str(" UNIQUE");
    }
    if let Some(ref d) = c.default {
        def.push_str(" DEFAULT ");
        match d {
            ColumnDefaultConfig::Literal(v) => def.push_str(&literal(v)),
            ColumnDefaultConfig::Expression { expression } => def.push_str(expression),
        }
    }
    def
}

pub fn create_table(schema: &TableSchema) -> String {
    let mut defs: Vec<String> = schema.columns.iter().map(column_definition).collect();
    if let Some(pk) = &schema.primary_key {
        defs.push(format!("PRIMARY KEY ({})", quoted(pk)));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        quoted(&schema.name),
        defs.join(",\n  ")
    )
}

/// Statements implementing one schema change, in execution order.
pub fn alter_table(table: &str, change: &SchemaChange) -> Vec<String> {
    let t = quoted(table);
    match change {
        SchemaChange::AddColumn { column } => {
            vec![format!("ALTER TABLE {} ADD COLUMN {}", t, column_definition(column))]
        }
        SchemaChange::DropColumn { name } => {
            vec![format!("ALTER TABLE {} DROP COLUMN {}", t, quoted(name))]
        }
        SchemaChange::RenameColumn { from, to } => vec![format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            t,
            quoted(from),
            quoted(to)
        )],
        SchemaChange::AlterColumn { column } => {
            let col = quoted(&column.name);
            let mut out = vec![format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                t,
                col,
                column.type_.sql(),
                col,
                column.type_.sql()
            )];
            out.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
                t,
                col,
                if column.nullable { "DROP" } else { "SET" }
            ));
            out.push(match &column.default {
                Some(ColumnDefaultConfig::Literal(v)) => format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    t,
                    col,
                    literal(v)
                ),
                Some(ColumnDefaultConfig::Expression { expression }) => format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    t, col, expression
                ),
                None => format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT", t, col),
            });
            out
        }
        SchemaChange::AddIndex { name, columns, unique } => {
            let cols: Vec<String> = columns.iter().map(|c| quoted(c)).collect();
            vec![format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                if *unique { "UNIQUE " } else { "" },
                quoted(name),
                t,
                cols.join(", ")
            )]
        }
        SchemaChange::DropIndex { name } => vec![format!("DROP INDEX IF EXISTS {}", quoted(name))],
        SchemaChange::Raw { sql } => vec![sql.clone()],
    }
}

pub fn has_table() -> &'static str {
    "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1)"
}

pub fn column_types() -> &'static str {
    "SELECT column_name, udt_name FROM information_schema.columns WHERE table_schema = current_schema() AND table_name = $1"
}

pub fn select(table: &str, query: &SelectQuery, types: &ColumnTypes) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cols = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query.columns.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", ")
    };
    let where_clause = q.where_clause(Some(&query.filter), types);
    let order_clause = if query.order_by.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = query
            .order_by
            .iter()
            .map(|(c, o)| {
                let dir = match o {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                format!("{} {}", quoted(c), dir)
            })
            .collect();
        format!(" ORDER BY {}", parts.join(", "))
    };
    let limit_clause = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = query.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        cols,
        quoted(table),
        where_clause,
        order_clause,
        limit_clause,
        offset_clause
    );
    q
}

pub fn count(table: &str, filter: Option<&Filter>, types: &ColumnTypes) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = q.where_clause(filter, types);
    q.sql = format!("SELECT COUNT(*) AS count FROM {}{}", quoted(table), where_clause);
    q
}

/// Numeric results come back as text (`numeric` has no JSON mapping) and are parsed by the caller.
pub fn aggregate(
    table: &str,
    aggregate: &Aggregate,
    filter: Option<&Filter>,
    types: &ColumnTypes,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = q.where_clause(filter, types);
    let expr = match aggregate {
        Aggregate::Sum(_) | Aggregate::Avg(_) => format!(
            "{}({})::text",
            aggregate.function(),
            quoted(aggregate.column())
        ),
        Aggregate::Min(_) | Aggregate::Max(_) => {
            format!("{}({})", aggregate.function(), quoted(aggregate.column()))
        }
    };
    q.sql = format!(
        "SELECT {} AS value FROM {}{}",
        expr,
        quoted(table),
        where_clause
    );
    q
}

pub fn insert(table: &str, row: &Row, types: &ColumnTypes) -> QueryBuf {
    let mut q = QueryBuf::new();
    if row.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES", quoted(table));
        return q;
    }
    let mut cols = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    for (name, val) in row {
        cols.push(quoted(name));
        placeholders.push(q.placeholder(val.clone(), name, types));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quoted(table),
        cols.join(", "),
        placeholders.join(", ")
    );
    q
}

pub fn update(table: &str, filter: &Filter, patch: &Row, types: &ColumnTypes) -> QueryBuf {
    let mut q = QueryBuf::new();
    let sets: Vec<String> = patch
        .iter()
        .map(|(k, v)| {
            let ph = q.placeholder(v.clone(), k, types);
            format!("{} = {}", quoted(k), ph)
        })
        .collect();
    let where_clause = q.where_clause(Some(filter), types);
    q.sql = format!(
        "UPDATE {} SET {}{}",
        quoted(table),
        sets.join(", "),
        where_clause
    );
    q
}

pub fn delete(table: &str, filter: &Filter, types: &ColumnTypes) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = q.where_clause(Some(filter), types);
    q.sql = format!("DELETE FROM {}{}", quoted(table), where_clause);
    q
}

pub fn truncate(table: &str) -> String {
    format!("TRUNCATE TABLE {}", quoted(table))
}
