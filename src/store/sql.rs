//! sea-orm storage engine
//!
//! Renders schema DDL, predicate trees, and assignment sets into
//! parameterized [`Statement`]s for the connected backend. Postgres
//! and SQLite are covered by the enabled sqlx drivers.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult, Statement,
};
use serde_json::Value;

use crate::error::Error;
use crate::store::engine::StorageEngine;
use crate::store::predicate::{Assign, Changes, Operand, Predicate, SelectSpec, SortOrder};
use crate::store::schema::{ColumnType, TableSchema};
use crate::store::Record;

/// Storage engine over a sea-orm connection pool
#[derive(Clone)]
pub struct SqlEngine {
    inner: Arc<DatabaseConnection>,
    backend: DatabaseBackend,
}

impl SqlEngine {
    /// Connect to a database url.
    ///
    /// For SQLite file urls the database file is created if missing,
    /// parent directories included.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let url = if url.starts_with("sqlite://") {
            let path = url.trim_start_matches("sqlite://");
            let path = path.trim_start_matches("./");

            if path != ":memory:" && !path.starts_with(":memory:") {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).ok();
                    }
                }
                if !std::path::Path::new(path).exists() {
                    std::fs::File::create(path).ok();
                }
            }

            format!("sqlite:{}?mode=rwc", path)
        } else {
            url.to_string()
        };

        let mut opt = ConnectOptions::new(&url);
        opt.sqlx_logging(false);

        let conn = sea_orm::Database::connect(opt)
            .await
            .map_err(|e| Error::storage(e.to_string()))?;
        let backend = conn.get_database_backend();

        Ok(Self {
            inner: Arc::new(conn),
            backend,
        })
    }

    /// The underlying sea-orm connection
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    fn statement(&self, sql: String, params: Vec<sea_orm::Value>) -> Statement {
        Statement::from_sql_and_values(self.backend, sql, params)
    }
}

#[async_trait]
impl StorageEngine for SqlEngine {
    async fn apply_schema(&self, schema: &TableSchema) -> Result<(), Error> {
        let sql = render_create_table(self.backend, schema);
        self.inner.execute(self.statement(sql, Vec::new())).await?;
        Ok(())
    }

    async fn insert(&self, schema: &TableSchema, rows: Vec<Record>) -> Result<u64, Error> {
        let mut inserted = 0;
        for row in rows {
            let (sql, params) = render_insert(self.backend, schema, &row)?;
            let result = self.inner.execute(self.statement(sql, params)).await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn select(&self, schema: &TableSchema, spec: &SelectSpec) -> Result<Vec<Record>, Error> {
        let (sql, params) = render_select(self.backend, schema, spec)?;
        let rows = self.inner.query_all(self.statement(sql, params)).await?;
        rows.iter().map(|row| decode_row(schema, row)).collect()
    }

    async fn update(
        &self,
        schema: &TableSchema,
        filter: &Predicate,
        changes: &Changes,
    ) -> Result<u64, Error> {
        let (sql, params) = render_update(self.backend, schema, filter, changes)?;
        let result = self.inner.execute(self.statement(sql, params)).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, schema: &TableSchema, filter: &Predicate) -> Result<u64, Error> {
        let (sql, params) = render_delete(self.backend, schema, filter)?;
        let result = self.inner.execute(self.statement(sql, params)).await?;
        Ok(result.rows_affected())
    }
}

fn quote(backend: DatabaseBackend, ident: &str) -> String {
    match backend {
        DatabaseBackend::MySql => format!("`{}`", ident),
        _ => format!("\"{}\"", ident),
    }
}

fn placeholder(backend: DatabaseBackend, index: usize) -> String {
    match backend {
        DatabaseBackend::Postgres => format!("${}", index),
        _ => "?".to_string(),
    }
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Integer | ColumnType::Boolean => "BIGINT",
        ColumnType::Text | ColumnType::Json | ColumnType::Timestamp => "TEXT",
    }
}

fn bind_value(schema: &TableSchema, column: &str, value: &Value) -> Result<sea_orm::Value, Error> {
    let ty = schema
        .column_def(column)
        .map(|c| c.ty)
        .unwrap_or(ColumnType::Text);

    let bound = match (ty, value) {
        (ColumnType::Integer, Value::Null) | (ColumnType::Boolean, Value::Null) => {
            sea_orm::Value::BigInt(None)
        }
        (_, Value::Null) => sea_orm::Value::String(None),
        (ColumnType::Integer, v) => sea_orm::Value::BigInt(Some(v.as_i64().ok_or_else(|| {
            Error::storage(format!("non-integer value for {}.{}", schema.table, column))
        })?)),
        (ColumnType::Boolean, Value::Bool(b)) => sea_orm::Value::BigInt(Some(*b as i64)),
        (ColumnType::Boolean, v) => sea_orm::Value::BigInt(Some(v.as_i64().ok_or_else(|| {
            Error::storage(format!("non-boolean value for {}.{}", schema.table, column))
        })?)),
        (_, Value::String(s)) => sea_orm::Value::String(Some(Box::new(s.clone()))),
        (_, v) => {
            return Err(Error::storage(format!(
                "cannot bind {} to text column {}.{}",
                v, schema.table, column
            )))
        }
    };
    Ok(bound)
}

fn render_predicate(
    backend: DatabaseBackend,
    schema: &TableSchema,
    predicate: &Predicate,
    params: &mut Vec<sea_orm::Value>,
) -> Result<String, Error> {
    match predicate {
        Predicate::Compare { column, op, rhs } => {
            let left = quote(backend, column);
            let right = match rhs {
                Operand::Column(other) => quote(backend, other),
                Operand::Value(Value::Null) => {
                    // comparisons against null only make sense for
                    // equality; render SQL null tests
                    return Ok(match op {
                        crate::store::predicate::Compare::Eq => format!("{} IS NULL", left),
                        crate::store::predicate::Compare::Ne => format!("{} IS NOT NULL", left),
                        _ => format!("{} IS NULL AND 1 = 0", left),
                    });
                }
                Operand::Value(value) => {
                    params.push(bind_value(schema, column, value)?);
                    placeholder(backend, params.len())
                }
            };
            Ok(format!("{} {} {}", left, op.as_sql(), right))
        }
        Predicate::And(parts) => render_junction(backend, schema, parts, " AND ", params),
        Predicate::Or(parts) => render_junction(backend, schema, parts, " OR ", params),
        Predicate::Not(inner) => {
            let rendered = render_predicate(backend, schema, inner, params)?;
            Ok(format!("NOT ({})", rendered))
        }
    }
}

fn render_junction(
    backend: DatabaseBackend,
    schema: &TableSchema,
    parts: &[Predicate],
    joiner: &str,
    params: &mut Vec<sea_orm::Value>,
) -> Result<String, Error> {
    if parts.is_empty() {
        return Ok("1 = 1".to_string());
    }
    let rendered: Result<Vec<String>, Error> = parts
        .iter()
        .map(|p| Ok(format!("({})", render_predicate(backend, schema, p, params)?)))
        .collect();
    Ok(rendered?.join(joiner))
}

pub(crate) fn render_create_table(backend: DatabaseBackend, schema: &TableSchema) -> String {
    let mut columns = Vec::new();
    for column in &schema.columns {
        let mut def = format!("{} {}", quote(backend, column.name), sql_type(column.ty));
        if Some(column.name) == schema.id_column {
            def.push_str(" PRIMARY KEY");
        } else {
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            if Some(column.name) == schema.name_column {
                def.push_str(" UNIQUE");
            }
        }
        match &column.default {
            Some(Value::Number(n)) => def.push_str(&format!(" DEFAULT {}", n)),
            Some(Value::Bool(b)) => def.push_str(&format!(" DEFAULT {}", *b as i64)),
            Some(Value::String(s)) => def.push_str(&format!(" DEFAULT '{}'", s.replace('\'', "''"))),
            _ => {}
        }
        columns.push(def);
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(backend, schema.table),
        columns.join(", ")
    )
}

pub(crate) fn render_insert(
    backend: DatabaseBackend,
    schema: &TableSchema,
    row: &Record,
) -> Result<(String, Vec<sea_orm::Value>), Error> {
    let mut names = Vec::new();
    let mut slots = Vec::new();
    let mut params = Vec::new();

    for column in &schema.columns {
        if let Some(value) = row.get(column.name) {
            params.push(bind_value(schema, column.name, value)?);
            names.push(quote(backend, column.name));
            slots.push(placeholder(backend, params.len()));
        }
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(backend, schema.table),
        names.join(", "),
        slots.join(", ")
    );
    Ok((sql, params))
}

pub(crate) fn render_select(
    backend: DatabaseBackend,
    schema: &TableSchema,
    spec: &SelectSpec,
) -> Result<(String, Vec<sea_orm::Value>), Error> {
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| quote(backend, c.name))
        .collect();
    let mut sql = format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote(backend, schema.table)
    );
    let mut params = Vec::new();

    if let Some(filter) = &spec.filter {
        let rendered = render_predicate(backend, schema, filter, &mut params)?;
        sql.push_str(&format!(" WHERE {}", rendered));
    }
    if let Some((column, order)) = &spec.order_by {
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {} {}", quote(backend, column), direction));
    }
    if let Some(limit) = spec.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Ok((sql, params))
}

pub(crate) fn render_update(
    backend: DatabaseBackend,
    schema: &TableSchema,
    filter: &Predicate,
    changes: &Changes,
) -> Result<(String, Vec<sea_orm::Value>), Error> {
    let mut assignments = Vec::new();
    let mut params = Vec::new();

    for (column, assign) in changes.iter() {
        let name = quote(backend, column);
        match assign {
            Assign::Value(value) => {
                params.push(bind_value(schema, column, value)?);
                assignments.push(format!("{} = {}", name, placeholder(backend, params.len())));
            }
            Assign::Increment(n) => {
                params.push(sea_orm::Value::BigInt(Some(*n)));
                assignments.push(format!(
                    "{} = {} + {}",
                    name,
                    name,
                    placeholder(backend, params.len())
                ));
            }
            Assign::Decrement(n) => {
                params.push(sea_orm::Value::BigInt(Some(*n)));
                assignments.push(format!(
                    "{} = {} - {}",
                    name,
                    name,
                    placeholder(backend, params.len())
                ));
            }
        }
    }

    let rendered = render_predicate(backend, schema, filter, &mut params)?;
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        quote(backend, schema.table),
        assignments.join(", "),
        rendered
    );
    Ok((sql, params))
}

pub(crate) fn render_delete(
    backend: DatabaseBackend,
    schema: &TableSchema,
    filter: &Predicate,
) -> Result<(String, Vec<sea_orm::Value>), Error> {
    let mut params = Vec::new();
    let rendered = render_predicate(backend, schema, filter, &mut params)?;
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        quote(backend, schema.table),
        rendered
    );
    Ok((sql, params))
}

fn decode_row(schema: &TableSchema, row: &QueryResult) -> Result<Record, Error> {
    let mut record = Record::new();
    for column in &schema.columns {
        let value = match column.ty {
            ColumnType::Integer => row
                .try_get::<Option<i64>>("", column.name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnType::Boolean => row
                .try_get::<Option<i64>>("", column.name)?
                .map(|v| Value::Bool(v != 0))
                .unwrap_or(Value::Null),
            _ => row
                .try_get::<Option<String>>("", column.name)?
                .map(Value::String)
                .unwrap_or(Value::Null),
        };
        record.insert(column.name.to_string(), value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::Column;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("workflow")
            .id_uuid("id")
            .unique_name("name")
            .column(Column::integer("running_jobs").default_value(0))
            .column(Column::integer("concurrency").default_value(0))
            .column(Column::json("steps"))
            .timestamps()
    }

    #[test]
    fn test_render_create_table() {
        let sql = render_create_table(DatabaseBackend::Sqlite, &schema());
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"workflow\" (\
             \"id\" TEXT PRIMARY KEY, \
             \"name\" TEXT NOT NULL UNIQUE, \
             \"running_jobs\" BIGINT NOT NULL DEFAULT 0, \
             \"concurrency\" BIGINT NOT NULL DEFAULT 0, \
             \"steps\" TEXT NOT NULL, \
             \"created\" TEXT NOT NULL, \
             \"updated\" TEXT NOT NULL)"
        );
    }

    #[test]
    fn test_render_select_postgres_placeholders() {
        let spec = SelectSpec {
            filter: Some(Predicate::eq("name", "nightly")),
            limit: Some(2),
            order_by: None,
        };
        let (sql, params) = render_select(DatabaseBackend::Postgres, &schema(), &spec).unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\", \"running_jobs\", \"concurrency\", \"steps\", \
             \"created\", \"updated\" FROM \"workflow\" WHERE \"name\" = $1 LIMIT 2"
        );
        assert_eq!(
            params,
            vec![sea_orm::Value::String(Some(Box::new("nightly".to_string())))]
        );
    }

    #[test]
    fn test_render_admission_update() {
        // the fused admission check: increment only below the limit
        let filter = Predicate::and(vec![
            Predicate::eq("id", "abc"),
            Predicate::or(vec![
                Predicate::eq("concurrency", 0),
                Predicate::lt_col("running_jobs", "concurrency"),
            ]),
        ]);
        let changes = Changes::new().increment("running_jobs", 1);
        let (sql, params) =
            render_update(DatabaseBackend::Sqlite, &schema(), &filter, &changes).unwrap();
        assert_eq!(
            sql,
            "UPDATE \"workflow\" SET \"running_jobs\" = \"running_jobs\" + ? \
             WHERE (\"id\" = ?) AND ((\"concurrency\" = ?) OR (\"running_jobs\" < \"concurrency\"))"
        );
        assert_eq!(
            params,
            vec![
                sea_orm::Value::BigInt(Some(1)),
                sea_orm::Value::String(Some(Box::new("abc".to_string()))),
                sea_orm::Value::BigInt(Some(0)),
            ]
        );
    }

    #[test]
    fn test_render_null_comparison() {
        let filter = Predicate::eq("steps", json!(null));
        let (sql, params) =
            render_delete(DatabaseBackend::Sqlite, &schema(), &filter).unwrap();
        assert_eq!(sql, "DELETE FROM \"workflow\" WHERE \"steps\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_render_insert_skips_absent_columns() {
        let row: Record = json!({"id": "abc", "name": "nightly", "steps": "[]"})
            .as_object()
            .unwrap()
            .clone();
        let (sql, params) = render_insert(DatabaseBackend::Postgres, &schema(), &row).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"workflow\" (\"id\", \"name\", \"steps\") VALUES ($1, $2, $3)"
        );
        assert_eq!(params.len(), 3);
    }
}
