// =====================================================
// MySQL / MariaDB SPECIFIC GATEWAY OPERATIONS
// =====================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, MySql, Pool, Row as _};

use crate::coerce::{self, SqlValue};
use crate::crypto::{apply_encrypt_fields, is_bcrypt_hash, PasswordHasher};
use crate::db_types::{
    ColumnMetadata, ConnectionDiagnostics, DatabaseStructure, Engine, EngineExtras, EventInfo,
    ForeignKey, IndexInfo, ParameterMode, RoutineInfo, RoutineKind, RoutineParameter, Row, RowSet,
    SequenceInfo, TableStructure, TriggerInfo, ValidationOutcome, ViewInfo,
};
use crate::dialect::{normalize_param_name, split_routine_name, Dialect, DEFAULT_LIST_LIMIT};
use crate::error::{GatewayError, Result};
use crate::repository::{QueryRepository, ReadRepository};

const DIALECT: Dialect = Dialect::MySql;

// --- Connection ---

pub(crate) async fn create_pool(connection_string: &str) -> Result<Pool<MySql>> {
    MySqlPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .connect(connection_string)
        .await
        .map_err(|e| GatewayError::execution("failed to create MySQL pool", e))
}

// --- Parameter Binding ---

type MyQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

fn bind_value<'q>(query: MyQuery<'q>, value: &SqlValue) -> MyQuery<'q> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        // MySQL has no uuid type; bind the canonical text form
        SqlValue::Uuid(v) => query.bind(v.to_string()),
        SqlValue::Json(v) => query.bind(v.clone()),
        SqlValue::Bytes(v) => query.bind(v.clone()),
    }
}

fn bind_all<'q>(mut query: MyQuery<'q>, values: &[SqlValue]) -> MyQuery<'q> {
    for value in values {
        query = bind_value(query, value);
    }
    query
}

// --- Row Normalization ---

fn opt_json<T>(value: Option<T>, to_json: impl Fn(T) -> Value) -> Value {
    value.map(to_json).unwrap_or(Value::Null)
}

fn decode_column(row: &MySqlRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<i8>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<u32>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<u16>, _>(index) {
        return opt_json(v, |v| serde_json::json!(v));
    }
    if let Ok(v) = row.try_get::<Option<u8>, _>(index) {
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
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return opt_json(v, coerce::datetime_to_json);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return opt_json(v, coerce::date_to_json);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(index) {
        return opt_json(v, coerce::time_to_json);
    }
    if let Ok(v) = row.try_get::<Option<Value>, _>(index) {
        return v.unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return opt_json(v, Value::String);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return opt_json(v, |bytes| Value::String(String::from_utf8_lossy(&bytes).to_string()));
    }
    Value::Null
}

fn row_to_map(row: &MySqlRow) -> Row {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_column(row, index));
    }
    map
}

/// Catalog strings sometimes come back as VARBINARY; fall back to a lossy
/// UTF-8 view as the driver does not promise text.
fn text_column(row: &MySqlRow, name: &str) -> String {
    row.try_get::<String, _>(name).unwrap_or_else(|_| {
        row.try_get::<Vec<u8>, _>(name)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    })
}

fn opt_text_column(row: &MySqlRow, name: &str) -> Option<String> {
    match row.try_get::<Option<String>, _>(name) {
        Ok(v) => v,
        Err(_) => row
            .try_get::<Option<Vec<u8>>, _>(name)
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()),
    }
}

// --- Catalog Queries ---

async fn detect_column_type(
    pool: &Pool<MySql>,
    table: &str,
    schema: Option<&str>,
    column: &str,
) -> Option<String> {
    let result = match schema {
        Some(schema) => {
            sqlx::query(
                "SELECT DATA_TYPE FROM information_schema.columns \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND COLUMN_NAME = ?",
            )
            .bind(schema)
            .bind(table)
            .bind(column)
            .fetch_optional(pool)
            .await
        }
        None => {
            sqlx::query(
                "SELECT DATA_TYPE FROM information_schema.columns \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?",
            )
            .bind(table)
            .bind(column)
            .fetch_optional(pool)
            .await
        }
    };

    match result {
        Ok(row) => row.map(|r| text_column(&r, "DATA_TYPE").to_lowercase()),
        Err(e) => {
            log::warn!("could not detect type of column '{}': {}", column, e);
            None
        }
    }
}

async fn lookup_schema(
    pool: &Pool<MySql>,
    table: &str,
    schema_hint: Option<&str>,
) -> Result<Option<String>> {
    if let Some(hint) = schema_hint.map(str::trim).filter(|s| !s.is_empty()) {
        let row = sqlx::query(
            "SELECT TABLE_SCHEMA FROM information_schema.tables \
             WHERE TABLE_NAME = ? AND TABLE_SCHEMA = ? LIMIT 1",
        )
        .bind(table)
        .bind(hint)
        .fetch_optional(pool)
        .await
        .map_err(|e| GatewayError::execution("MySQL schema lookup failed", e))?;
        if let Some(row) = row {
            return Ok(Some(text_column(&row, "TABLE_SCHEMA")));
        }
    }

    // the connected database wins, then the first catalog match
    let row = sqlx::query(
        "SELECT TABLE_SCHEMA FROM information_schema.tables \
         WHERE TABLE_NAME = ? \
         ORDER BY CASE WHEN TABLE_SCHEMA = DATABASE() THEN 0 ELSE 1 END \
         LIMIT 1",
    )
    .bind(table)
    .fetch_optional(pool)
    .await
    .map_err(|e| GatewayError::execution("MySQL schema lookup failed", e))?;

    Ok(row.map(|r| text_column(&r, "TABLE_SCHEMA")))
}

async fn routine_kind(
    pool: &Pool<MySql>,
    routine: &str,
    schema: Option<&str>,
) -> Result<RoutineKind> {
    let row = match schema {
        Some(schema) => sqlx::query(
            "SELECT ROUTINE_TYPE FROM information_schema.routines \
             WHERE ROUTINE_SCHEMA = ? AND ROUTINE_NAME = ? LIMIT 1",
        )
        .bind(schema)
        .bind(routine)
        .fetch_optional(pool)
        .await,
        None => sqlx::query(
            "SELECT ROUTINE_TYPE FROM information_schema.routines \
             WHERE ROUTINE_NAME = ? \
             ORDER BY CASE WHEN ROUTINE_SCHEMA = DATABASE() THEN 0 ELSE 1 END \
             LIMIT 1",
        )
        .bind(routine)
        .fetch_optional(pool)
        .await,
    }
    .map_err(|e| GatewayError::execution("MySQL routine lookup failed", e))?;

    Ok(row
        .map(|r| RoutineKind::parse(&text_column(&r, "ROUTINE_TYPE")))
        .unwrap_or(RoutineKind::Procedure))
}

async fn routine_parameters(
    pool: &Pool<MySql>,
    routine: &str,
    schema: Option<&str>,
) -> Result<Vec<RoutineParameter>> {
    let rows = match schema {
        Some(schema) => {
            sqlx::query(
                "SELECT PARAMETER_NAME, PARAMETER_MODE, DATA_TYPE, \
                        CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS max_length, \
                        CAST(NUMERIC_PRECISION AS SIGNED) AS numeric_precision, \
                        CAST(NUMERIC_SCALE AS SIGNED) AS numeric_scale, \
                        CAST(ORDINAL_POSITION AS SIGNED) AS ordinal_position \
                 FROM information_schema.parameters \
                 WHERE SPECIFIC_SCHEMA = ? AND SPECIFIC_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
            )
            .bind(schema)
            .bind(routine)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query(
                "SELECT PARAMETER_NAME, PARAMETER_MODE, DATA_TYPE, \
                        CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS max_length, \
                        CAST(NUMERIC_PRECISION AS SIGNED) AS numeric_precision, \
                        CAST(NUMERIC_SCALE AS SIGNED) AS numeric_scale, \
                        CAST(ORDINAL_POSITION AS SIGNED) AS ordinal_position \
                 FROM information_schema.parameters \
                 WHERE SPECIFIC_SCHEMA = DATABASE() AND SPECIFIC_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
            )
            .bind(routine)
            .fetch_all(pool)
            .await
        }
    }
    .map_err(|e| GatewayError::execution("MySQL parameter metadata failed", e))?;

    let mut parameters = Vec::new();
    for row in rows {
        let name = opt_text_column(&row, "PARAMETER_NAME").unwrap_or_default();
        if name.is_empty() {
            // a function's unnamed return slot sits at ordinal 0
            continue;
        }
        parameters.push(RoutineParameter {
            name,
            mode: ParameterMode::parse(
                &opt_text_column(&row, "PARAMETER_MODE").unwrap_or_else(|| "IN".to_string()),
            ),
            data_type: opt_text_column(&row, "DATA_TYPE").unwrap_or_else(|| "varchar".to_string()),
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

pub struct MySqlReadRepository {
    pool: Pool<MySql>,
    engine: Engine,
    hasher: Arc<dyn PasswordHasher>,
}

impl MySqlReadRepository {
    pub async fn connect(
        connection_string: &str,
        engine: Engine,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Result<MySqlReadRepository> {
        Ok(MySqlReadRepository { pool: create_pool(connection_string).await?, engine, hasher })
    }

    fn require(value: &str, what: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(GatewayError::input(format!("{} cannot be empty", what)));
        }
        Ok(())
    }

    async fn prepare_values(
        &self,
        table: &str,
        schema: Option<&str>,
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
impl ReadRepository for MySqlReadRepository {
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

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(|e| {
            GatewayError::execution(&format!("MySQL error listing '{}'", table), e)
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

        let column_type =
            detect_column_type(&self.pool, table, schema_final.as_deref(), key).await;
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
                GatewayError::execution(&format!("MySQL error filtering '{}'", table), e)
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

        let (columns, values) =
            self.prepare_values(table, schema_final.as_deref(), data, encrypt_fields).await?;
        let sql = DIALECT.insert(schema_final.as_deref(), table, &columns);

        let result = bind_all(sqlx::query(&sql), &values)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::execution(&format!("MySQL error inserting into '{}'", table), e)
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

        let (columns, mut values) =
            self.prepare_values(table, schema_final.as_deref(), data, encrypt_fields).await?;
        let key_type = detect_column_type(&self.pool, table, schema_final.as_deref(), key).await;
        values.push(coerce::convert_text(DIALECT, key_value, key_type.as_deref()));

        let sql = DIALECT.update_by_key(schema_final.as_deref(), table, &columns, key);
        let result = bind_all(sqlx::query(&sql), &values)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::execution(&format!("MySQL error updating '{}'", table), e)
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

        let key_type = detect_column_type(&self.pool, table, schema_final.as_deref(), key).await;
        let bound = coerce::convert_text(DIALECT, key_value, key_type.as_deref());

        let sql = DIALECT.delete_by_key(schema_final.as_deref(), table, key);
        let result = bind_value(sqlx::query(&sql), &bound)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::execution(&format!("MySQL error deleting from '{}'", table), e)
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
                GatewayError::execution(&format!("MySQL error fetching hash from '{}'", table), e)
            })?;
        Ok(row.and_then(|r| opt_text_column(&r, password_column)).filter(|h| !h.is_empty()))
    }

    async fn connection_diagnostics(&self) -> Result<ConnectionDiagnostics> {
        let row = sqlx::query(
            "SELECT DATABASE() AS database_name, \
                    SCHEMA() AS schema_name, \
                    VERSION() AS server_version, \
                    @@hostname AS server_name, \
                    CAST(@@port AS SIGNED) AS server_port, \
                    @@version_comment AS server_comment, \
                    USER() AS connected_user, \
                    CAST(CONNECTION_ID() AS SIGNED) AS connection_id",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatewayError::execution("MySQL diagnostics failed", e))?;

        // uptime tells us when the server came up
        let uptime_row = sqlx::query("SHOW STATUS LIKE 'Uptime'")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GatewayError::execution("MySQL diagnostics failed", e))?;
        let uptime_seconds = uptime_row
            .map(|r| text_column(&r, "Value"))
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let start_time = chrono::Utc::now()
            .checked_sub_signed(chrono::Duration::seconds(uptime_seconds))
            .map(|t| t.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string());

        let server_comment = opt_text_column(&row, "server_comment").unwrap_or_default();
        let provider = if server_comment.to_lowercase().contains("mariadb") {
            "MariaDB".to_string()
        } else {
            self.engine.display_name().to_string()
        };

        let database = opt_text_column(&row, "database_name");
        Ok(ConnectionDiagnostics {
            provider,
            schema: opt_text_column(&row, "schema_name").or_else(|| database.clone()),
            database,
            version: opt_text_column(&row, "server_version"),
            server: opt_text_column(&row, "server_name"),
            port: row.try_get::<Option<i64>, _>("server_port").ok().flatten(),
            start_time,
            user: opt_text_column(&row, "connected_user"),
            session_id: row.try_get::<Option<i64>, _>("connection_id").ok().flatten(),
        })
    }
}

// --- Query Repository ---

pub struct MySqlQueryRepository {
    pool: Pool<MySql>,
}

impl MySqlQueryRepository {
    pub async fn connect(connection_string: &str) -> Result<MySqlQueryRepository> {
        Ok(MySqlQueryRepository { pool: create_pool(connection_string).await? })
    }
}

#[async_trait]
impl QueryRepository for MySqlQueryRepository {
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
            .map_err(|e| GatewayError::execution("MySQL query failed", e))?;

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

        // EXPLAIN only applies to SELECT-shaped statements
        if !sql.trim().to_uppercase().starts_with("SELECT") {
            return Ok(ValidationOutcome::valid());
        }
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

        let (schema, routine) = split_routine_name(name);
        let kind = routine_kind(&self.pool, routine, schema).await?;
        let metadata = routine_parameters(&self.pool, routine, schema).await?;

        let mut supplied: Vec<(String, Value)> = Vec::new();
        for (key, value) in params {
            supplied.push((normalize_param_name(key).to_lowercase(), value.clone()));
        }

        let qualified = match schema {
            Some(schema) => format!("{}.{}", schema, routine),
            None => routine.to_string(),
        };

        let (sql, values) = if metadata.is_empty() && !supplied.is_empty() {
            // no parameter metadata visible: bind the caller's values in
            // the order supplied, midnight-narrowed
            let values: Vec<SqlValue> = supplied
                .iter()
                .map(|(_, value)| coerce::narrow_midnight(coerce::sniff_param(value)))
                .collect();
            let names: Vec<String> = supplied.iter().map(|(key, _)| key.clone()).collect();
            let sql = match kind {
                RoutineKind::Function => DIALECT.function_call(&qualified, values.len()),
                RoutineKind::Procedure => DIALECT.procedure_call(&qualified, &names),
            };
            (sql, values)
        } else {
            let inputs: Vec<&RoutineParameter> =
                metadata.iter().filter(|p| p.mode.takes_input()).collect();
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
            let names: Vec<String> = inputs
                .iter()
                .map(|p| normalize_param_name(&p.name).to_string())
                .collect();
            let sql = match kind {
                RoutineKind::Function => DIALECT.function_call(&qualified, values.len()),
                RoutineKind::Procedure => DIALECT.procedure_call(&qualified, &names),
            };
            (sql, values)
        };

        let rows = bind_all(sqlx::query(&sql), &values)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                GatewayError::execution(&format!("MySQL error executing routine '{}'", name), e)
            })?;
        Ok(rows.iter().map(row_to_map).collect())
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
                 c.COLUMN_NAME, c.DATA_TYPE, \
                 CAST(c.CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS max_length, \
                 CAST(c.NUMERIC_PRECISION AS SIGNED) AS numeric_precision, \
                 CAST(c.NUMERIC_SCALE AS SIGNED) AS numeric_scale, \
                 c.IS_NULLABLE, c.COLUMN_DEFAULT, \
                 CAST(c.ORDINAL_POSITION AS SIGNED) AS ordinal_position, \
                 c.COLUMN_KEY, c.EXTRA, c.COLUMN_COMMENT, \
                 fk.REFERENCED_TABLE_NAME, fk.REFERENCED_COLUMN_NAME, fk.CONSTRAINT_NAME AS fk_constraint, \
                 chk.CHECK_CLAUSE \
             FROM information_schema.COLUMNS c \
             LEFT JOIN ( \
                 SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, \
                        REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME, CONSTRAINT_NAME \
                 FROM information_schema.KEY_COLUMN_USAGE \
                 WHERE REFERENCED_TABLE_NAME IS NOT NULL \
             ) fk ON c.TABLE_SCHEMA = fk.TABLE_SCHEMA \
                 AND c.TABLE_NAME = fk.TABLE_NAME \
                 AND c.COLUMN_NAME = fk.COLUMN_NAME \
             LEFT JOIN ( \
                 SELECT tc.TABLE_SCHEMA, tc.TABLE_NAME, cc.CHECK_CLAUSE, tc.CONSTRAINT_NAME \
                 FROM information_schema.TABLE_CONSTRAINTS tc \
                 JOIN information_schema.CHECK_CONSTRAINTS cc \
                     ON tc.CONSTRAINT_SCHEMA = cc.CONSTRAINT_SCHEMA \
                     AND tc.CONSTRAINT_NAME = cc.CONSTRAINT_NAME \
                 WHERE tc.CONSTRAINT_TYPE = 'CHECK' \
             ) chk ON c.TABLE_SCHEMA = chk.TABLE_SCHEMA \
                 AND c.TABLE_NAME = chk.TABLE_NAME \
                 AND chk.CHECK_CLAUSE LIKE CONCAT('%', c.COLUMN_NAME, '%') \
             WHERE c.TABLE_SCHEMA = ? AND c.TABLE_NAME = ? \
             ORDER BY c.ORDINAL_POSITION",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            GatewayError::execution(
                &format!("MySQL error describing '{}.{}'", schema, table),
                e,
            )
        })?;

        let mut columns = Vec::new();
        for row in rows {
            let column_key = text_column(&row, "COLUMN_KEY");
            let extra = text_column(&row, "EXTRA");
            columns.push(ColumnMetadata {
                name: text_column(&row, "COLUMN_NAME"),
                data_type: text_column(&row, "DATA_TYPE"),
                max_length: row.try_get::<Option<i64>, _>("max_length").ok().flatten(),
                numeric_precision: row
                    .try_get::<Option<i64>, _>("numeric_precision")
                    .ok()
                    .flatten(),
                numeric_scale: row.try_get::<Option<i64>, _>("numeric_scale").ok().flatten(),
                is_nullable: text_column(&row, "IS_NULLABLE") == "YES",
                column_default: opt_text_column(&row, "COLUMN_DEFAULT"),
                ordinal_position: row
                    .try_get::<Option<i64>, _>("ordinal_position")
                    .ok()
                    .flatten()
                    .unwrap_or(0),
                is_primary_key: column_key == "PRI",
                is_unique: column_key == "UNI" || column_key == "PRI",
                is_identity: extra.to_lowercase().contains("auto_increment"),
                foreign_table: opt_text_column(&row, "REFERENCED_TABLE_NAME"),
                foreign_column: opt_text_column(&row, "REFERENCED_COLUMN_NAME"),
                fk_constraint: opt_text_column(&row, "fk_constraint"),
                check_clause: opt_text_column(&row, "CHECK_CLAUSE"),
                comment: opt_text_column(&row, "COLUMN_COMMENT").filter(|c| !c.is_empty()),
            });
        }
        Ok(columns)
    }

    async fn database_structure(&self) -> Result<DatabaseStructure> {
        let mut structure = DatabaseStructure::default();
        structure.tables = fetch_tables_with_columns(self).await?;
        structure.views = fetch_views(&self.pool).await?;
        structure.procedures = fetch_routines(&self.pool, RoutineKind::Procedure).await?;
        structure.functions = fetch_routines(&self.pool, RoutineKind::Function).await?;
        structure.triggers = fetch_triggers(&self.pool).await?;
        structure.indexes = fetch_indexes(&self.pool).await?;
        structure.sequences = fetch_auto_increments(&self.pool).await?;
        structure.extras =
            EngineExtras { events: fetch_events(&self.pool).await?, ..EngineExtras::default() };
        Ok(structure)
    }
}

// --- Structure Snapshot Helpers ---

async fn fetch_tables_with_columns(repo: &MySqlQueryRepository) -> Result<Vec<TableStructure>> {
    let rows = sqlx::query(
        "SELECT TABLE_NAME, TABLE_COMMENT \
         FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
         ORDER BY TABLE_NAME",
    )
    .fetch_all(&repo.pool)
    .await
    .map_err(|e| GatewayError::execution("MySQL error listing tables", e))?;

    let database = current_database(&repo.pool).await?;
    let mut tables = Vec::new();
    for row in rows {
        let name = text_column(&row, "TABLE_NAME");
        let columns = match database.as_deref() {
            Some(schema) => repo.table_structure(&name, schema).await?,
            None => Vec::new(),
        };
        tables.push(TableStructure {
            schema: database.clone(),
            comment: opt_text_column(&row, "TABLE_COMMENT").filter(|c| !c.is_empty()),
            columns,
            foreign_keys: fetch_table_foreign_keys(&repo.pool, &name).await?,
            indexes: fetch_table_indexes(&repo.pool, &name).await?,
            name,
        });
    }
    Ok(tables)
}

async fn current_database(pool: &Pool<MySql>) -> Result<Option<String>> {
    let row = sqlx::query("SELECT DATABASE() AS db")
        .fetch_one(pool)
        .await
        .map_err(|e| GatewayError::execution("MySQL error resolving database", e))?;
    Ok(opt_text_column(&row, "db"))
}

async fn fetch_table_foreign_keys(pool: &Pool<MySql>, table: &str) -> Result<Vec<ForeignKey>> {
    let rows = sqlx::query(
        "SELECT kcu.CONSTRAINT_NAME, kcu.COLUMN_NAME, \
                kcu.REFERENCED_TABLE_SCHEMA, kcu.REFERENCED_TABLE_NAME, kcu.REFERENCED_COLUMN_NAME, \
                rc.UPDATE_RULE, rc.DELETE_RULE \
         FROM information_schema.KEY_COLUMN_USAGE kcu \
         JOIN information_schema.REFERENTIAL_CONSTRAINTS rc \
             ON kcu.CONSTRAINT_SCHEMA = rc.CONSTRAINT_SCHEMA \
             AND kcu.CONSTRAINT_NAME = rc.CONSTRAINT_NAME \
         WHERE kcu.TABLE_SCHEMA = DATABASE() AND kcu.TABLE_NAME = ? \
             AND kcu.REFERENCED_TABLE_NAME IS NOT NULL",
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("MySQL error fetching foreign keys", e))?;

    Ok(rows
        .iter()
        .map(|row| ForeignKey {
            constraint_name: text_column(row, "CONSTRAINT_NAME"),
            column_name: text_column(row, "COLUMN_NAME"),
            referenced_schema: opt_text_column(row, "REFERENCED_TABLE_SCHEMA"),
            referenced_table: text_column(row, "REFERENCED_TABLE_NAME"),
            referenced_column: text_column(row, "REFERENCED_COLUMN_NAME"),
            on_update: opt_text_column(row, "UPDATE_RULE"),
            on_delete: opt_text_column(row, "DELETE_RULE"),
        })
        .collect())
}

async fn fetch_table_indexes(pool: &Pool<MySql>, table: &str) -> Result<Vec<IndexInfo>> {
    let rows = sqlx::query(
        "SELECT INDEX_NAME, INDEX_TYPE, \
                CAST(MIN(NON_UNIQUE) AS SIGNED) AS non_unique, \
                GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX SEPARATOR ', ') AS columns \
         FROM information_schema.STATISTICS \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
         GROUP BY INDEX_NAME, INDEX_TYPE \
         ORDER BY INDEX_NAME",
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("MySQL error fetching indexes", e))?;

    Ok(rows
        .iter()
        .map(|row| {
            let name = text_column(row, "INDEX_NAME");
            let non_unique =
                row.try_get::<Option<i64>, _>("non_unique").ok().flatten().unwrap_or(1);
            IndexInfo {
                schema: None,
                table_name: table.to_string(),
                is_primary: name == "PRIMARY",
                name,
                index_type: opt_text_column(row, "INDEX_TYPE"),
                columns: opt_text_column(row, "columns"),
                definition: None,
                is_unique: non_unique == 0,
            }
        })
        .collect())
}

async fn fetch_views(pool: &Pool<MySql>) -> Result<Vec<ViewInfo>> {
    let rows = sqlx::query(
        "SELECT TABLE_NAME AS view_name, VIEW_DEFINITION \
         FROM information_schema.VIEWS \
         WHERE TABLE_SCHEMA = DATABASE() \
         ORDER BY TABLE_NAME",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("MySQL error fetching views", e))?;

    Ok(rows
        .iter()
        .map(|row| ViewInfo {
            schema: None,
            name: text_column(row, "view_name"),
            definition: opt_text_column(row, "VIEW_DEFINITION"),
        })
        .collect())
}

async fn fetch_routines(pool: &Pool<MySql>, kind: RoutineKind) -> Result<Vec<RoutineInfo>> {
    let routine_type = match kind {
        RoutineKind::Function => "FUNCTION",
        RoutineKind::Procedure => "PROCEDURE",
    };
    let rows = sqlx::query(
        "SELECT ROUTINE_NAME, ROUTINE_DEFINITION \
         FROM information_schema.ROUTINES \
         WHERE ROUTINE_SCHEMA = DATABASE() AND ROUTINE_TYPE = ? \
         ORDER BY ROUTINE_NAME",
    )
    .bind(routine_type)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("MySQL error fetching routines", e))?;

    let mut routines = Vec::new();
    for row in rows {
        let name = text_column(&row, "ROUTINE_NAME");
        let parameters = routine_parameters(pool, &name, None).await?;
        routines.push(RoutineInfo {
            schema: None,
            name,
            kind,
            definition: opt_text_column(&row, "ROUTINE_DEFINITION"),
            parameters,
        });
    }
    Ok(routines)
}

async fn fetch_triggers(pool: &Pool<MySql>) -> Result<Vec<TriggerInfo>> {
    let rows = sqlx::query(
        "SELECT TRIGGER_NAME, EVENT_MANIPULATION, EVENT_OBJECT_TABLE, ACTION_TIMING \
         FROM information_schema.TRIGGERS \
         WHERE TRIGGER_SCHEMA = DATABASE() \
         ORDER BY EVENT_OBJECT_TABLE, TRIGGER_NAME",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("MySQL error fetching triggers", e))?;

    Ok(rows
        .iter()
        .map(|row| TriggerInfo {
            schema: None,
            name: text_column(row, "TRIGGER_NAME"),
            table_name: text_column(row, "EVENT_OBJECT_TABLE"),
            event: opt_text_column(row, "EVENT_MANIPULATION"),
            timing: opt_text_column(row, "ACTION_TIMING"),
        })
        .collect())
}

async fn fetch_indexes(pool: &Pool<MySql>) -> Result<Vec<IndexInfo>> {
    let rows = sqlx::query(
        "SELECT TABLE_NAME, INDEX_NAME, INDEX_TYPE, \
                CAST(MIN(NON_UNIQUE) AS SIGNED) AS non_unique, \
                GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX SEPARATOR ', ') AS columns \
         FROM information_schema.STATISTICS \
         WHERE TABLE_SCHEMA = DATABASE() \
         GROUP BY TABLE_NAME, INDEX_NAME, INDEX_TYPE \
         ORDER BY TABLE_NAME, INDEX_NAME",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("MySQL error fetching indexes", e))?;

    Ok(rows
        .iter()
        .map(|row| {
            let name = text_column(row, "INDEX_NAME");
            let non_unique =
                row.try_get::<Option<i64>, _>("non_unique").ok().flatten().unwrap_or(1);
            IndexInfo {
                schema: None,
                table_name: text_column(row, "TABLE_NAME"),
                is_primary: name == "PRIMARY",
                name,
                index_type: opt_text_column(row, "INDEX_TYPE"),
                columns: opt_text_column(row, "columns"),
                definition: None,
                is_unique: non_unique == 0,
            }
        })
        .collect())
}

/// MySQL has no sequence objects; auto-increment counters play that role.
async fn fetch_auto_increments(pool: &Pool<MySql>) -> Result<Vec<SequenceInfo>> {
    let rows = sqlx::query(
        "SELECT TABLE_NAME, CAST(AUTO_INCREMENT AS CHAR) AS auto_increment \
         FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA = DATABASE() AND AUTO_INCREMENT IS NOT NULL \
         ORDER BY TABLE_NAME",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("MySQL error fetching auto-increment counters", e))?;

    Ok(rows
        .iter()
        .map(|row| SequenceInfo {
            schema: None,
            name: text_column(row, "TABLE_NAME"),
            data_type: None,
            start_value: None,
            increment: None,
            minimum_value: None,
            maximum_value: None,
            is_cycling: None,
            current_value: opt_text_column(row, "auto_increment"),
        })
        .collect())
}

async fn fetch_events(pool: &Pool<MySql>) -> Result<Vec<EventInfo>> {
    let rows = sqlx::query(
        "SELECT EVENT_NAME, STATUS, EVENT_TYPE \
         FROM information_schema.EVENTS \
         WHERE EVENT_SCHEMA = DATABASE() \
         ORDER BY EVENT_NAME",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::execution("MySQL error fetching events", e))?;

    Ok(rows
        .iter()
        .map(|row| EventInfo {
            name: text_column(row, "EVENT_NAME"),
            status: text_column(row, "STATUS"),
            event_type: text_column(row, "EVENT_TYPE"),
        })
        .collect())
}
