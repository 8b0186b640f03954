// =====================================================
// POSTGRESQL SPECIFIC GATEWAY OPERATIONS
// =====================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, Pool, Postgres, Row as _};

use crate::coerce::{self, SqlValue};
use crate::crypto::{apply_encrypt_fields, is_bcrypt_hash, PasswordHasher};
use crate::db_types::{
    ColumnMetadata, ConnectionDiagnostics, CustomTypeInfo, DatabaseStructure, EngineExtras,
    ExtensionInfo, ForeignKey, IndexInfo, ParameterMode, RoutineInfo, RoutineKind,
    RoutineParameter, Row, RowSet, SequenceInfo, TableStructure, TriggerInfo, ValidationOutcome,
    ViewInfo,
};
use crate::dialect::{normalize_param_name, split_routine_name, Dialect, DEFAULT_LIST_LIMIT};
use crate::error::{GatewayError, Result};
use crate::repository::{QueryRepository, ReadRepository};

const DIALECT: Dialect = Dialect::Postgres;

// --- Connection ---

pub(crate) async fn create_pool(connection_string: &str) -> Result<Pool<Postgres>> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .connect(connection_string)
        .await
        .map_err(|e| GatewayError::execution("failed to create PostgreSQL pool", e))
}

// --- Parameter Binding ---

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

fn bind_value<'q>(query: PgQuery<'q>, value: &SqlValue) -> PgQuery<'q> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::Uuid(v) => query.bind(*v),
        SqlValue::Json(v) => match serde_json::from_str::<Value>(v) {
            Ok(doc) => query.bind(doc),
            Err(_) => query.bind(v.clone()),
        },
        SqlValue::Bytes(v) => query.bind(v.clone()),
    }
}

fn bind_all<'q>(mut query: PgQuery<'q>, values: &[SqlValue]) -> PgQuery<'q> {
    for value in values {
        query = bind_value(query, value);
    }
    query
}

// --- Row Normalization ---

fn opt_json<T>(value: Option<T>, to_json: impl Fn(T) -> Value) -> Value {
    value.map(to_json).unwrap_or(Value::Null)
}

fn decode_column(row: &PgRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(index) {
        return opt_json(v, coerce::decimal_to_json);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
        return opt_json(v, |v| coerce::datetime_to_json(v.naive_utc()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return opt_json(v, coerce::datetime_to_json);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return opt_json(v, coerce::date_to_json);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(index) {
        return opt_json(v, coerce::time_to_json);
    }
    if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(index) {
        return opt_json(v, coerce::uuid_to_json);
    }
    if let Ok(v) = row.try_get::<Option<Value>, _>(index) {
        return v.unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return opt_json(v, Value::String);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return opt_json(v, |bytes| coerce::bytes_to_json(&bytes));
    }
    Value::Null
}

fn row_to_map(row: &PgRow) -> Row {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_column(row, index));
    }
    map
}

// --- Catalog Queries ---

/// Detects a column's catalog type. Failures are logged and treated as
/// "unknown" so the value falls back to a plain string bind.
async fn detect_column_type(
    pool: &Pool<Postgres>,
    table: &str,
    schema: &str,
    column: &str,
) -> Option<String> {
    let result = sqlx::query(
        "SELECT data_type FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 AND column_name = $3",
    )
    .bind(schema)
    .bind(table)
    .bind(column)
    .fetch_optional(pool)
    .await;

    match result {
        Ok(row) => row.and_then(|r| r.try_get::<String, _>(0).ok().map(|t| t.to_lowercase())),
        Err(e) => {
            log::warn!("could not detect type of column '{}': {}", column, e);
            None
        }
    }
}

async fn lookup_schema(
    pool: &Pool<Postgres>,
    table: &str,
    schema_hint: Option<&str>,
) -> Result<Option<String>> {
    if let Some(hint) = schema_hint.map(str::trim).filter(|s| !s.is_empty()) {
        let row = sqlx::query(
            "SELECT table_schema FROM information_schema.tables \
             WHERE table_name = $1 AND table_schema = $2 LIMIT 1",
        )
        .bind(table)
        .bind(hint)
        .fetch_optional(pool)
        .await
        .map_err(|e| GatewayError::execution("PostgreSQL schema lookup failed", e))?;
        if let Some(row) = row {
            return Ok(row.try_get::<String, _>(0).ok());
        }
    }

    // default schema wins, then the first catalog match
    let row = sqlx::query(
        "SELECT table_schema FROM information_schema.tables \
         WHERE table_name = $1 \
         ORDER BY CASE WHEN table_schema = 'public' THEN 0 ELSE 1 END \
         LIMIT 1",
    )
    .bind(table)
    .fetch_optional(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL schema lookup failed", e))?;

    Ok(row.and_then(|r| r.try_get::<String, _>(0).ok()))
}

async fn routine_kind(
    pool: &Pool<Postgres>,
    routine: &str,
    schema: Option<&str>,
) -> Result<RoutineKind> {
    let kind: Option<String> = match schema {
        Some(schema) => sqlx::query_scalar(
            "SELECT routine_type FROM information_schema.routines \
             WHERE routine_schema = $1 AND routine_name = $2 LIMIT 1",
        )
        .bind(schema)
        .bind(routine)
        .fetch_optional(pool)
        .await,
        None => sqlx::query_scalar(
            "SELECT routine_type FROM information_schema.routines \
             WHERE routine_name = $1 \
             ORDER BY CASE WHEN routine_schema = 'public' THEN 1 ELSE 2 END \
             LIMIT 1",
        )
        .bind(routine)
        .fetch_optional(pool)
        .await,
    }
    .map_err(|e| GatewayError::execution("PostgreSQL routine lookup failed", e))?;

    Ok(kind.as_deref().map(RoutineKind::parse).unwrap_or(RoutineKind::Procedure))
}

async fn routine_parameters(
    pool: &Pool<Postgres>,
    routine: &str,
    schema: Option<&str>,
) -> Result<Vec<RoutineParameter>> {
    let rows = match schema {
        Some(schema) => {
            sqlx::query(
                "SELECT parameter_name, parameter_mode, data_type, \
                        CAST(character_maximum_length AS BIGINT) AS max_length, \
                        CAST(numeric_precision AS BIGINT) AS numeric_precision, \
                        CAST(numeric_scale AS BIGINT) AS numeric_scale, \
                        CAST(ordinal_position AS BIGINT) AS ordinal_position \
                 FROM information_schema.parameters \
                 WHERE specific_name = ( \
                     SELECT specific_name FROM information_schema.routines \
                     WHERE routine_schema = $1 AND routine_name = $2 LIMIT 1) \
                 ORDER BY ordinal_position",
            )
            .bind(schema)
            .bind(routine)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query(
                "SELECT parameter_name, parameter_mode, data_type, \
                        CAST(character_maximum_length AS BIGINT) AS max_length, \
                        CAST(numeric_precision AS BIGINT) AS numeric_precision, \
                        CAST(numeric_scale AS BIGINT) AS numeric_scale, \
                        CAST(ordinal_position AS BIGINT) AS ordinal_position \
                 FROM information_schema.parameters \
                 WHERE specific_name = ( \
                     SELECT specific_name FROM information_schema.routines \
                     WHERE routine_name = $1 \
                     ORDER BY CASE WHEN routine_schema = 'public' THEN 1 ELSE 2 END \
                     LIMIT 1) \
                 ORDER BY ordinal_position",
            )
            .bind(routine)
            .fetch_all(pool)
            .await
        }
    }
    .map_err(|e| GatewayError::execution("PostgreSQL parameter metadata failed", e))?;

    let mut parameters = Vec::new();
    for row in rows {
        parameters.push(RoutineParameter {
            name: row.try_get::<Option<String>, _>("parameter_name").ok().flatten().unwrap_or_default(),
            mode: ParameterMode::parse(
                &row.try_get::<Option<String>, _>("parameter_mode")
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "IN".to_string()),
            ),
            data_type: row
                .try_get::<Option<String>, _>("data_type")
                .ok()
                .flatten()
                .unwrap_or_else(|| "text".to_string()),
            max_length: row.try_get::<Option<i64>, _>("max_length").ok().flatten(),
            numeric_precision: row.try_get::<Option<i64>, _>("numeric_precision").ok().flatten(),
            numeric_scale: row.try_get::<Option<i64>, _>("numeric_scale").ok().flatten(),
            ordinal_position: row
                .try_get::<Option<i64>, _>("ordinal_position")
                .ok()
                .flatten()
                .unwrap_or(0),
        });
    }
    Ok(parameters)
}

// --- Read Repository ---

pub struct PostgresReadRepository {
    pool: Pool<Postgres>,
    hasher: Arc<dyn PasswordHasher>,
}

impl PostgresReadRepository {
    pub async fn connect(
        connection_string: &str,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Result<PostgresReadRepository> {
        Ok(PostgresReadRepository { pool: create_pool(connection_string).await?, hasher })
    }

    fn require(value: &str, what: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(GatewayError::input(format!("{} cannot be empty", what)));
        }
        Ok(())
    }

    /// Applies the encrypt list, then types each value: strings go through
    /// catalog type detection, everything else binds by its JSON shape.
    async fn prepare_values(
        &self,
        table: &str,
        schema: &str,
        data: &Row,
        encrypt_fields: &[String],
    ) -> Result<(Vec<String>, Vec<SqlValue>)> {
        let data = apply_encrypt_fields(data, encrypt_fields, self.hasher.as_ref())?;
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (column, value) in &data {
            let value = match value {
                Value::String(s) if is_bcrypt_hash(s) => SqlValue::Text(s.clone()),
                Value::String(s) => {
                    let column_type = detect_column_type(&self.pool, table, schema, column).await;
                    coerce::convert_text(DIALECT, s, column_type.as_deref())
                }
                other => SqlValue::from_json_literal(other),
            };
            columns.push(column.clone());
            values.push(value);
        }
        Ok((columns, values))
    }
}

#[async_trait]
impl ReadRepository for PostgresReadRepository {
    async fn list_rows(
        &self,
        table: &str,
        schema: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Row>> {
        Self::require(table, "table name")?;
        let schema_final = DIALECT.effective_schema(schema);
        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIST_LIMIT);
        let sql = DIALECT.select_all_with_limit(schema_final.as_deref(), table, limit);

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::execution(
                    &format!(
                        "PostgreSQL error listing '{}.{}'",
                        schema_final.as_deref().unwrap_or("public"),
                        table
                    ),
                    e,
                )
            })?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn rows_by_key(
        &self,
        table: &str,
        key: &str,
        value: &str,
        schema: Option<&str>,
    ) -> Result<Vec<Row>> {
        Self::require(table, "table name")?;
        Self::require(key, "key name")?;
        Self::require(value, "key value")?;
        let schema_final = DIALECT.effective_schema(schema);
        let schema_name = schema_final.as_deref().unwrap_or("public");

        let column_type = detect_column_type(&self.pool, table, schema_name, key).await;
        let date_probe_on_timestamp = column_type
            .as_deref()
            .map(|t| coerce::is_datetime_type(DIALECT, t))
            .unwrap_or(false)
            && coerce::is_bare_date(value);

        let (sql, bound) = if date_probe_on_timestamp {
            let date = coerce::extract_date_only(value)
                .ok_or_else(|| GatewayError::input(format!("invalid date value '{}'", value)))?;
            (
                DIALECT.select_by_key(schema_final.as_deref(), table, key, true),
                SqlValue::Date(date),
            )
        } else {
            (
                DIALECT.select_by_key(schema_final.as_deref(), table, key, false),
                coerce::convert_text(DIALECT, value, column_type.as_deref()),
            )
        };

        let rows = bind_value(sqlx::query(&sql), &bound)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::execution(
                    &format!("PostgreSQL error filtering '{}.{}'", schema_name, table),
                    e,
                )
            })?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn insert(
        &self,
        table: &str,
        data: &Row,
        schema: Option<&str>,
        encrypt_fields: &[String],
    ) -> Result<bool> {
        Self::require(table, "table name")?;
        if data.is_empty() {
            return Err(GatewayError::input("data cannot be empty"));
        }
        let schema_final = DIALECT.effective_schema(schema);
        let schema_name = schema_final.as_deref().unwrap_or("public");

        let (columns, values) =
            self.prepare_values(table, schema_name, data, encrypt_fields).await?;
        let sql = DIALECT.insert(schema_final.as_deref(), table, &columns);

        let result = bind_all(sqlx::query(&sql), &values)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::execution(
                    &format!("PostgreSQL error inserting into '{}.{}'", schema_name, table),
                    e,
                )
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn update(
        &self,
        table: &str,
        key: &str,
        key_value: &str,
        data: &Row,
        schema: Option<&str>,
        encrypt_fields: &[String],
    ) -> Result<u64> {
        Self::require(table, "table name")?;
        Self::require(key, "key name")?;
        Self::require(key_value, "key value")?;
        if data.is_empty() {
            return Err(GatewayError::input("data cannot be empty"));
        }
        let schema_final = DIALECT.effective_schema(schema);
        let schema_name = schema_final.as_deref().unwrap_or("public");

        let (columns, mut values) =
            self.prepare_values(table, schema_name, data, encrypt_fields).await?;
        let key_type = detect_column_type(&self.pool, table, schema_name, key).await;
        values.push(coerce::convert_text(DIALECT, key_value, key_type.as_deref()));

        let sql = DIALECT.update_by_key(schema_final.as_deref(), table, &columns, key);
        let result = bind_all(sqlx::query(&sql), &values)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::execution(
                    &format!("PostgreSQL error updating '{}.{}'", schema_name, table),
                    e,
                )
            })?;
        Ok(result.rows_affected())
    }

    async fn delete(
        &self,
        table: &str,
        key: &str,
        key_value: &str,
        schema: Option<&str>,
    ) -> Result<u64> {
        Self::require(table, "table name")?;
        Self::require(key, "key name")?;
        Self::require(key_value, "key value")?;
        let schema_final = DIALECT.effective_schema(schema);
        let schema_name = schema_final.as_deref().unwrap_or("public");

        let key_type = detect_column_type(&self.pool, table, schema_name, key).await;
        let bound = coerce::convert_text(DIALECT, key_value, key_type.as_deref());

        let sql = DIALECT.delete_by_key(schema_final.as_deref(), table, key);
        let result = bind_value(sqlx::query(&sql), &bound)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::execution(
                    &format!("PostgreSQL error deleting from '{}.{}'", schema_name, table),
                    e,
                )
            })?;
        Ok(result.rows_affected())
    }

    async fn password_hash(
        &self,
        table: &str,
        user_column: &str,
        password_column: &str,
        user_value: &str,
        schema: Option<&str>,
    ) -> Result<Option<String>> {
        Self::require(table, "table name")?;
        Self::require(user_column, "user column")?;
        Self::require(password_column, "password column")?;
        Self::require(user_value, "user value")?;
        let schema_final = DIALECT.effective_schema(schema);

        let sql = DIALECT.select_column_by_key(
            schema_final.as_deref(),
            table,
            password_column,
            user_column,
        );
        let row = sqlx::query(&sql)
            .bind(user_value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::execution(
                    &format!(
                        "PostgreSQL error fetching hash from '{}.{}'",
                        schema_final.as_deref().unwrap_or("public"),
                        table
                    ),
                    e,
                )
            })?;
        Ok(row
            .and_then(|r| r.try_get::<Option<String>, _>(0).ok().flatten())
            .filter(|h| !h.is_empty()))
    }

    async fn connection_diagnostics(&self) -> Result<ConnectionDiagnostics> {
        let row = sqlx::query(
            "SELECT current_database() AS database_name, \
                    current_schema() AS schema_name, \
                    version() AS server_version, \
                    inet_server_addr()::text AS server_address, \
                    CAST(inet_server_port() AS BIGINT) AS server_port, \
                    pg_postmaster_start_time()::text AS start_time, \
                    current_user AS connected_user, \
                    CAST(pg_backend_pid() AS BIGINT) AS backend_pid",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatewayError::execution("PostgreSQL diagnostics failed", e))?;

        Ok(ConnectionDiagnostics {
            provider: "PostgreSQL".to_string(),
            database: row.try_get::<Option<String>, _>("database_name").ok().flatten(),
            schema: row
                .try_get::<Option<String>, _>("schema_name")
                .ok()
                .flatten()
                .or_else(|| Some("public".to_string())),
            version: row.try_get::<Option<String>, _>("server_version").ok().flatten(),
            server: row
                .try_get::<Option<String>, _>("server_address")
                .ok()
                .flatten()
                .or_else(|| Some("localhost".to_string())),
            port: row.try_get::<Option<i64>, _>("server_port").ok().flatten(),
            start_time: row.try_get::<Option<String>, _>("start_time").ok().flatten(),
            user: row.try_get::<Option<String>, _>("connected_user").ok().flatten(),
            session_id: row.try_get::<Option<i64>, _>("backend_pid").ok().flatten(),
        })
    }
}

// --- Query Repository ---

pub struct PostgresQueryRepository {
    pool: Pool<Postgres>,
}

impl PostgresQueryRepository {
    pub async fn connect(connection_string: &str) -> Result<PostgresQueryRepository> {
        Ok(PostgresQueryRepository { pool: create_pool(connection_string).await? })
    }
}

#[async_trait]
impl QueryRepository for PostgresQueryRepository {
    async fn execute_parametrized_query(
        &self,
        sql: &str,
        params: &[(String, SqlValue)],
        max_rows: usize,
        _schema: Option<&str>,
    ) -> Result<RowSet> {
        if sql.trim().is_empty() {
            return Err(GatewayError::input("query cannot be empty"));
        }
        let narrowed: Vec<(String, SqlValue)> = params
            .iter()
            .map(|(name, value)| (name.clone(), coerce::narrow_midnight(value.clone())))
            .collect();
        let (rewritten, values) = DIALECT.rewrite_named_params(sql, &narrowed);

        let rows = bind_all(sqlx::query(&rewritten), &values)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| GatewayError::execution("PostgreSQL query failed", e))?;

        Ok(RowSet::capped(rows.iter().map(row_to_map).collect(), max_rows))
    }

    async fn validate_query(
        &self,
        sql: &str,
        params: &[(String, SqlValue)],
    ) -> Result<ValidationOutcome> {
        if sql.trim().is_empty() {
            return Ok(ValidationOutcome::invalid("query cannot be empty"));
        }
        let (rewritten, values) = DIALECT.rewrite_named_params(sql, params);
        let check = format!("EXPLAIN {}", rewritten);

        match bind_all(sqlx::query(&check), &values).fetch_all(&self.pool).await {
            Ok(_) => Ok(ValidationOutcome::valid()),
            Err(e) => Ok(ValidationOutcome::invalid(e.to_string())),
        }
    }

    async fn execute_routine(
        &self,
        name: &str,
        params: &serde_json::Map<String, Value>,
    ) -> Result<Vec<Row>> {
        if name.trim().is_empty() {
            return Err(GatewayError::input("routine name cannot be empty"));
        }

        // an explicit schema.routine prefix wins over the search order
        let (schema, routine) = split_routine_name(name);
        let kind = routine_kind(&self.pool, routine, schema).await?;
        let metadata = routine_parameters(&self.pool, routine, schema).await?;

        let mut supplied: Vec<(String, Value)> = Vec::new();
        for (key, value) in params {
            supplied.push((normalize_param_name(key).to_lowercase(), value.clone()));
        }

        let inputs: Vec<&RoutineParameter> =
            metadata.iter().filter(|p| p.mode.takes_input()).collect();
        let has_inout = metadata.iter().any(|p| p.mode == ParameterMode::InOut);

        let mut values = Vec::new();
        for parameter in &inputs {
            let lookup = normalize_param_name(&parameter.name).to_lowercase();
            let raw = supplied
                .iter()
                .find(|(key, _)| *key == lookup)
                .map(|(_, value)| value.clone())
                .unwrap_or(Value::Null);
            values.push(coerce::convert_json_param(
                DIALECT,
                &raw,
                &parameter.data_type,
                parameter.max_length,
                &parameter.name,
            )?);
        }

        let qualified = match schema {
            Some(schema) => format!("{}.{}", schema, routine),
            None => routine.to_string(),
        };
        let sql = match kind {
            RoutineKind::Function => DIALECT.function_call(&qualified, values.len()),
            RoutineKind::Procedure => {
                let names: Vec<String> = inputs
                    .iter()
                    .map(|p| normalize_param_name(&p.name).to_string())
                    .collect();
                DIALECT.procedure_call(&qualified, &names)
            }
        };

        let context = format!("PostgreSQL error executing routine '{}'", name);
        if kind == RoutineKind::Function || has_inout {
            let rows = bind_all(sqlx::query(&sql), &values)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| GatewayError::execution(&context, e))?;
            Ok(rows.iter().map(row_to_map).collect())
        } else {
            bind_all(sqlx::query(&sql), &values)
                .execute(&self.pool)
                .await
                .map_err(|e| GatewayError::execution(&context, e))?;
            Ok(Vec::new())
        }
    }

    async fn resolve_schema(
        &self,
        table: &str,
        schema_hint: Option<&str>,
    ) -> Result<Option<String>> {
        if table.trim().is_empty() {
            return Err(GatewayError::input("table name cannot be empty"));
        }
        lookup_schema(&self.pool, table, schema_hint).await
    }

    async fn table_structure(&self, table: &str, schema: &str) -> Result<Vec<ColumnMetadata>> {
        if table.trim().is_empty() {
            return Err(GatewayError::input("table name cannot be empty"));
        }
        let rows = sqlx::query(
            "SELECT \
                 c.column_name, \
                 c.data_type, \
                 CAST(c.character_maximum_length AS BIGINT) AS max_length, \
                 CAST(c.numeric_precision AS BIGINT) AS numeric_precision, \
                 CAST(c.numeric_scale AS BIGINT) AS numeric_scale, \
                 c.is_nullable, \
                 c.column_default, \
                 CAST(c.ordinal_position AS BIGINT) AS ordinal_position, \
                 c.is_identity, \
                 CASE WHEN pk.column_name IS NOT NULL THEN 'YES' ELSE 'NO' END AS is_primary_key, \
                 CASE WHEN uq.column_name IS NOT NULL THEN 'YES' ELSE 'NO' END AS is_unique, \
                 fk.foreign_table_name, \
                 fk.foreign_column_name, \
                 fk.constraint_name AS fk_constraint_name, \
                 chk.check_clause \
             FROM information_schema.columns c \
             LEFT JOIN ( \
                 SELECT kcu.table_schema, kcu.table_name, kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                     ON tc.constraint_name = kcu.constraint_name \
                     AND tc.table_schema = kcu.table_schema \
                 WHERE tc.constraint_type = 'PRIMARY KEY' \
             ) pk ON c.table_schema = pk.table_schema \
                 AND c.table_name = pk.table_name \
                 AND c.column_name = pk.column_name \
             LEFT JOIN ( \
                 SELECT kcu.table_schema, kcu.table_name, kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                     ON tc.constraint_name = kcu.constraint_name \
                     AND tc.table_schema = kcu.table_schema \
                 WHERE tc.constraint_type = 'UNIQUE' \
             ) uq ON c.table_schema = uq.table_schema \
                 AND c.table_name = uq.table_name \
                 AND c.column_name = uq.column_name \
             LEFT JOIN ( \
                 SELECT kcu.table_schema, kcu.table_name, kcu.column_name, \
                        ccu.table_name AS foreign_table_name, \
                        ccu.column_name AS foreign_column_name, \
                        tc.constraint_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                     ON tc.constraint_name = kcu.constraint_name \
                     AND tc.table_schema = kcu.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                     ON tc.constraint_name = ccu.constraint_name \
                     AND tc.table_schema = ccu.table_schema \
                 WHERE tc.constraint_type = 'FOREIGN KEY' \
             ) fk ON c.table_schema = fk.table_schema \
                 AND c.table_name = fk.table_name \
                 AND c.column_name = fk.column_name \
             LEFT JOIN ( \
                 SELECT ccu.table_schema, ccu.table_name, ccu.column_name, cc.check_clause \
                 FROM information_schema.constraint_column_usage ccu \
                 JOIN information_schema.check_constraints cc \
                     ON ccu.constraint_name = cc.constraint_name \
                     AND ccu.constraint_schema = cc.constraint_schema \
             ) chk ON c.table_schema = chk.table_schema \
                 AND c.table_name = chk.table_name \
                 AND c.column_name = chk.column_name \
             WHERE c.table_name = $1 AND c.table_schema = $2 \
             ORDER BY c.ordinal_position",
        )
        .bind(table)
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            GatewayError::execution(
                &format!("PostgreSQL error describing '{}.{}'", schema, table),
                e,
            )
        })?;

        let mut columns = Vec::new();
        for row in rows {
            let yes = |name: &str| {
                row.try_get::<Option<String>, _>(name)
                    .ok()
                    .flatten()
                    .map(|v| v == "YES")
                    .unwrap_or(false)
            };
            columns.push(ColumnMetadata {
                name: row.try_get::<String, _>("column_name").unwrap_or_default(),
                data_type: row.try_get::<String, _>("data_type").unwrap_or_default(),
                max_length: row.try_get::<Option<i64>, _>("max_length").ok().flatten(),
                numeric_precision: row
                    .try_get::<Option<i64>, _>("numeric_precision")
                    .ok()
                    .flatten(),
                numeric_scale: row.try_get::<Option<i64>, _>("numeric_scale").ok().flatten(),
                is_nullable: yes("is_nullable"),
                column_default: row.try_get::<Option<String>, _>("column_default").ok().flatten(),
                ordinal_position: row
                    .try_get::<Option<i64>, _>("ordinal_position")
                    .ok()
                    .flatten()
                    .unwrap_or(0),
                is_primary_key: yes("is_primary_key"),
                is_unique: yes("is_unique"),
                is_identity: yes("is_identity"),
                foreign_table: row
                    .try_get::<Option<String>, _>("foreign_table_name")
                    .ok()
                    .flatten(),
                foreign_column: row
                    .try_get::<Option<String>, _>("foreign_column_name")
                    .ok()
                    .flatten(),
                fk_constraint: row
                    .try_get::<Option<String>, _>("fk_constraint_name")
                    .ok()
                    .flatten(),
                check_clause: row.try_get::<Option<String>, _>("check_clause").ok().flatten(),
                comment: None,
            });
        }
        Ok(columns)
    }

    async fn database_structure(&self) -> Result<DatabaseStructure> {
        let mut structure = DatabaseStructure::default();
        structure.tables = fetch_tables_with_columns(&self.pool).await?;
        structure.views = fetch_views(&self.pool).await?;
        structure.functions = fetch_routines(&self.pool, RoutineKind::Function).await?;
        structure.procedures = fetch_routines(&self.pool, RoutineKind::Procedure).await?;
        structure.triggers = fetch_triggers(&self.pool).await?;
        structure.sequences = fetch_sequences(&self.pool).await?;
        structure.indexes = fetch_indexes(&self.pool).await?;
        structure.types = fetch_custom_types(&self.pool).await?;
        structure.extras = EngineExtras {
            extensions: fetch_extensions(&self.pool).await?,
            ..EngineExtras::default()
        };
        Ok(structure)
    }
}

// --- Structure Snapshot Helpers ---

async fn fetch_tables_with_columns(pool: &Pool<Postgres>) -> Result<Vec<TableStructure>> {
    let rows = sqlx::query(
        "SELECT t.table_name, \
                obj_description((quote_ident(t.table_schema) || '.' || quote_ident(t.table_name))::regclass) AS table_comment \
         FROM information_schema.tables t \
         WHERE t.table_schema = 'public' AND t.table_type = 'BASE TABLE' \
         ORDER BY t.table_name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL error listing tables", e))?;

    let mut tables = Vec::new();
    for row in rows {
        let name: String = row.try_get("table_name").unwrap_or_default();
        let comment = row.try_get::<Option<String>, _>("table_comment").ok().flatten();
        let columns = fetch_table_columns(pool, &name).await?;
        let foreign_keys = fetch_table_foreign_keys(pool, &name).await?;
        tables.push(TableStructure {
            schema: Some("public".to_string()),
            name,
            comment,
            columns,
            foreign_keys,
            indexes: Vec::new(),
        });
    }
    Ok(tables)
}

async fn fetch_table_columns(pool: &Pool<Postgres>, table: &str) -> Result<Vec<ColumnMetadata>> {
    let rows = sqlx::query(
        "SELECT c.column_name, c.data_type, \
                CAST(c.character_maximum_length AS BIGINT) AS max_length, \
                CAST(c.numeric_precision AS BIGINT) AS numeric_precision, \
                CAST(c.numeric_scale AS BIGINT) AS numeric_scale, \
                c.is_nullable, c.column_default, c.is_identity, \
                CAST(c.ordinal_position AS BIGINT) AS ordinal_position, \
                CASE WHEN pk.column_name IS NOT NULL THEN 'YES' ELSE 'NO' END AS is_primary_key, \
                CASE WHEN uq.column_name IS NOT NULL THEN 'YES' ELSE 'NO' END AS is_unique, \
                col_description((quote_ident(c.table_schema) || '.' || quote_ident(c.table_name))::regclass, CAST(c.ordinal_position AS INT)) AS column_comment \
         FROM information_schema.columns c \
         LEFT JOIN ( \
             SELECT kcu.table_schema, kcu.table_name, kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
                 ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
         ) pk ON c.table_schema = pk.table_schema AND c.table_name = pk.table_name AND c.column_name = pk.column_name \
         LEFT JOIN ( \
             SELECT kcu.table_schema, kcu.table_name, kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
                 ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'UNIQUE' \
         ) uq ON c.table_schema = uq.table_schema AND c.table_name = uq.table_name AND c.column_name = uq.column_name \
         WHERE c.table_name = $1 AND c.table_schema = 'public' \
         ORDER BY c.ordinal_position",
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL error describing columns", e))?;

    let mut columns = Vec::new();
    for row in rows {
        let yes = |name: &str| {
            row.try_get::<Option<String>, _>(name)
                .ok()
                .flatten()
                .map(|v| v == "YES")
                .unwrap_or(false)
        };
        columns.push(ColumnMetadata {
            name: row.try_get::<String, _>("column_name").unwrap_or_default(),
            data_type: row.try_get::<String, _>("data_type").unwrap_or_default(),
            max_length: row.try_get::<Option<i64>, _>("max_length").ok().flatten(),
            numeric_precision: row.try_get::<Option<i64>, _>("numeric_precision").ok().flatten(),
            numeric_scale: row.try_get::<Option<i64>, _>("numeric_scale").ok().flatten(),
            is_nullable: yes("is_nullable"),
            column_default: row.try_get::<Option<String>, _>("column_default").ok().flatten(),
            ordinal_position: row
                .try_get::<Option<i64>, _>("ordinal_position")
                .ok()
                .flatten()
                .unwrap_or(0),
            is_primary_key: yes("is_primary_key"),
            is_unique: yes("is_unique"),
            is_identity: yes("is_identity"),
            foreign_table: None,
            foreign_column: None,
            fk_constraint: None,
            check_clause: None,
            comment: row.try_get::<Option<String>, _>("column_comment").ok().flatten(),
        });
    }
    Ok(columns)
}

async fn fetch_table_foreign_keys(pool: &Pool<Postgres>, table: &str) -> Result<Vec<ForeignKey>> {
    let rows = sqlx::query(
        "SELECT tc.constraint_name, kcu.column_name, \
                ccu.table_name AS foreign_table_name, \
                ccu.column_name AS foreign_column_name, \
                rc.update_rule, rc.delete_rule \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
             ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
         JOIN information_schema.constraint_column_usage ccu \
             ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.table_schema \
         JOIN information_schema.referential_constraints rc \
             ON tc.constraint_name = rc.constraint_name \
         WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_name = $1 AND tc.table_schema = 'public'",
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL error fetching foreign keys", e))?;

    Ok(rows
        .iter()
        .map(|row| ForeignKey {
            constraint_name: row.try_get("constraint_name").unwrap_or_default(),
            column_name: row.try_get("column_name").unwrap_or_default(),
            referenced_schema: None,
            referenced_table: row.try_get("foreign_table_name").unwrap_or_default(),
            referenced_column: row.try_get("foreign_column_name").unwrap_or_default(),
            on_update: row.try_get::<Option<String>, _>("update_rule").ok().flatten(),
            on_delete: row.try_get::<Option<String>, _>("delete_rule").ok().flatten(),
        })
        .collect())
}

async fn fetch_views(pool: &Pool<Postgres>) -> Result<Vec<ViewInfo>> {
    let rows = sqlx::query(
        "SELECT v.table_name AS view_name, v.view_definition \
         FROM information_schema.views v \
         WHERE v.table_schema = 'public' \
         ORDER BY v.table_name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL error fetching views", e))?;

    Ok(rows
        .iter()
        .map(|row| ViewInfo {
            schema: Some("public".to_string()),
            name: row.try_get("view_name").unwrap_or_default(),
            definition: row.try_get::<Option<String>, _>("view_definition").ok().flatten(),
        })
        .collect())
}

async fn fetch_routines(pool: &Pool<Postgres>, kind: RoutineKind) -> Result<Vec<RoutineInfo>> {
    let prokind = match kind {
        RoutineKind::Function => "f",
        RoutineKind::Procedure => "p",
    };
    let rows = sqlx::query(
        "SELECT p.proname AS routine_name, p.prosrc AS source_code \
         FROM pg_proc p \
         JOIN pg_namespace n ON p.pronamespace = n.oid \
         WHERE n.nspname = 'public' AND p.prokind = $1::\"char\" \
         ORDER BY p.proname",
    )
    .bind(prokind)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL error fetching routines", e))?;

    let mut routines = Vec::new();
    for row in rows {
        let name: String = row.try_get("routine_name").unwrap_or_default();
        let parameters = routine_parameters(pool, &name, Some("public")).await?;
        routines.push(RoutineInfo {
            schema: Some("public".to_string()),
            name,
            kind,
            definition: row.try_get::<Option<String>, _>("source_code").ok().flatten(),
            parameters,
        });
    }
    Ok(routines)
}

async fn fetch_triggers(pool: &Pool<Postgres>) -> Result<Vec<TriggerInfo>> {
    let rows = sqlx::query(
        "SELECT t.trigger_name, t.event_manipulation, \
                t.event_object_table AS table_name, t.action_timing \
         FROM information_schema.triggers t \
         WHERE t.trigger_schema = 'public' \
         ORDER BY t.event_object_table, t.trigger_name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL error fetching triggers", e))?;

    Ok(rows
        .iter()
        .map(|row| TriggerInfo {
            schema: Some("public".to_string()),
            name: row.try_get("trigger_name").unwrap_or_default(),
            table_name: row.try_get("table_name").unwrap_or_default(),
            event: row.try_get::<Option<String>, _>("event_manipulation").ok().flatten(),
            timing: row.try_get::<Option<String>, _>("action_timing").ok().flatten(),
        })
        .collect())
}

async fn fetch_sequences(pool: &Pool<Postgres>) -> Result<Vec<SequenceInfo>> {
    let rows = sqlx::query(
        "SELECT s.sequence_name, s.data_type, \
                CAST(s.start_value AS TEXT) AS start_value, \
                CAST(s.minimum_value AS TEXT) AS minimum_value, \
                CAST(s.maximum_value AS TEXT) AS maximum_value, \
                CAST(s.increment AS TEXT) AS increment, \
                s.cycle_option \
         FROM information_schema.sequences s \
         WHERE s.sequence_schema = 'public' \
         ORDER BY s.sequence_name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL error fetching sequences", e))?;

    Ok(rows
        .iter()
        .map(|row| SequenceInfo {
            schema: Some("public".to_string()),
            name: row.try_get("sequence_name").unwrap_or_default(),
            data_type: row.try_get::<Option<String>, _>("data_type").ok().flatten(),
            start_value: row.try_get::<Option<String>, _>("start_value").ok().flatten(),
            increment: row.try_get::<Option<String>, _>("increment").ok().flatten(),
            minimum_value: row.try_get::<Option<String>, _>("minimum_value").ok().flatten(),
            maximum_value: row.try_get::<Option<String>, _>("maximum_value").ok().flatten(),
            is_cycling: row
                .try_get::<Option<String>, _>("cycle_option")
                .ok()
                .flatten()
                .map(|v| v == "YES"),
            current_value: None,
        })
        .collect())
}

async fn fetch_indexes(pool: &Pool<Postgres>) -> Result<Vec<IndexInfo>> {
    let rows = sqlx::query(
        "SELECT i.indexname AS index_name, i.tablename AS table_name, \
                i.indexdef AS index_definition, \
                ix.indisunique AS is_unique, ix.indisprimary AS is_primary, \
                am.amname AS index_type \
         FROM pg_indexes i \
         JOIN pg_class c ON c.relname = i.indexname \
         JOIN pg_index ix ON ix.indexrelid = c.oid \
         JOIN pg_am am ON am.oid = c.relam \
         WHERE i.schemaname = 'public' \
         ORDER BY i.tablename, i.indexname",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL error fetching indexes", e))?;

    Ok(rows
        .iter()
        .map(|row| IndexInfo {
            schema: Some("public".to_string()),
            table_name: row.try_get("table_name").unwrap_or_default(),
            name: row.try_get("index_name").unwrap_or_default(),
            index_type: row.try_get::<Option<String>, _>("index_type").ok().flatten(),
            columns: None,
            definition: row.try_get::<Option<String>, _>("index_definition").ok().flatten(),
            is_unique: row.try_get::<bool, _>("is_unique").unwrap_or(false),
            is_primary: row.try_get::<bool, _>("is_primary").unwrap_or(false),
        })
        .collect())
}

async fn fetch_custom_types(pool: &Pool<Postgres>) -> Result<Vec<CustomTypeInfo>> {
    let rows = sqlx::query(
        "SELECT t.typname AS type_name, \
                CASE t.typtype \
                    WHEN 'e' THEN 'enum' \
                    WHEN 'c' THEN 'composite' \
                    WHEN 'd' THEN 'domain' \
                    WHEN 'r' THEN 'range' \
                END AS type_category, \
                CASE WHEN t.typtype = 'e' THEN ( \
                    SELECT array_agg(e.enumlabel ORDER BY e.enumsortorder)::text \
                    FROM pg_enum e WHERE e.enumtypid = t.oid) \
                END AS enum_values \
         FROM pg_type t \
         JOIN pg_namespace n ON t.typnamespace = n.oid \
         WHERE n.nspname = 'public' AND t.typtype IN ('e', 'c', 'd', 'r') \
         ORDER BY t.typname",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL error fetching custom types", e))?;

    Ok(rows
        .iter()
        .map(|row| CustomTypeInfo {
            schema: Some("public".to_string()),
            name: row.try_get("type_name").unwrap_or_default(),
            category: row.try_get::<Option<String>, _>("type_category").ok().flatten(),
            detail: row.try_get::<Option<String>, _>("enum_values").ok().flatten(),
        })
        .collect())
}

async fn fetch_extensions(pool: &Pool<Postgres>) -> Result<Vec<ExtensionInfo>> {
    let rows = sqlx::query(
        "SELECT e.extname AS extension_name, e.extversion AS version, n.nspname AS schema_name \
         FROM pg_extension e \
         JOIN pg_namespace n ON e.extnamespace = n.oid \
         ORDER BY e.extname",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("PostgreSQL error fetching extensions", e))?;

    Ok(rows
        .iter()
        .map(|row| ExtensionInfo {
            name: row.try_get("extension_name").unwrap_or_default(),
            version: row.try_get::<Option<String>, _>("version").ok().flatten(),
            schema: row.try_get::<Option<String>, _>("schema_name").ok().flatten(),
        })
        .collect())
}
