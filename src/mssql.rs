// =====================================================
// MSSQL SPECIFIC GATEWAY OPERATIONS (via Tiberius)
// =====================================================

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_tiberius::Pool;
use serde_json::Value;
use tiberius::{ColumnData, ToSql};

use crate::coerce::{self, SqlValue};
use crate::crypto::{apply_encrypt_fields, is_bcrypt_hash, PasswordHasher};
use crate::db_types::{
    ColumnMetadata, ConnectionDiagnostics, CustomTypeInfo, DatabaseStructure, EngineExtras,
    ForeignKey, IndexInfo, ParameterMode, RoutineInfo, RoutineKind, RoutineParameter, Row, RowSet,
    SequenceInfo, SynonymInfo, TableStructure, TriggerInfo, ValidationOutcome, ViewInfo,
};
use crate::dialect::{normalize_param_name, split_routine_name, Dialect, DEFAULT_LIST_LIMIT};
use crate::error::{GatewayError, Result};
use crate::repository::{QueryRepository, ReadRepository};

const DIALECT: Dialect = Dialect::SqlServer;

// --- Connection ---

pub(crate) fn create_pool(connection_string: &str) -> Result<Pool> {
    deadpool_tiberius::Manager::from_ado_string(connection_string)
        .map_err(|e| GatewayError::execution("failed to configure SQL Server pool", e))?
        .max_size(10)
        .create_pool()
        .map_err(|e| GatewayError::execution("failed to create SQL Server pool", e))
}

// --- Parameter Binding ---

impl ToSql for SqlValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlValue::Null => ColumnData::String(None),
            SqlValue::Bool(v) => v.to_sql(),
            SqlValue::Int(v) => v.to_sql(),
            SqlValue::Float(v) => v.to_sql(),
            SqlValue::Text(v) => v.to_sql(),
            SqlValue::Date(v) => v.to_sql(),
            SqlValue::DateTime(v) => v.to_sql(),
            SqlValue::Time(v) => v.to_sql(),
            SqlValue::Uuid(v) => v.to_sql(),
            SqlValue::Json(v) => v.to_sql(),
            SqlValue::Bytes(v) => v.to_sql(),
        }
    }
}

fn as_params(values: &[SqlValue]) -> Vec<&dyn ToSql> {
    values.iter().map(|v| v as &dyn ToSql).collect()
}

// --- Row Normalization ---

fn decode_column(row: &tiberius::Row, index: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<i64, _>(index) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<i32, _>(index) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<i16, _>(index) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<u8, _>(index) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<f64, _>(index) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<f32, _>(index) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<bool, _>(index) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<rust_decimal::Decimal, _>(index) {
        coerce::decimal_to_json(v)
    } else if let Ok(Some(v)) = row.try_get::<chrono::NaiveDateTime, _>(index) {
        coerce::datetime_to_json(v)
    } else if let Ok(Some(v)) = row.try_get::<chrono::NaiveDate, _>(index) {
        coerce::date_to_json(v)
    } else if let Ok(Some(v)) = row.try_get::<chrono::NaiveTime, _>(index) {
        coerce::time_to_json(v)
    } else if let Ok(Some(v)) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
        coerce::datetime_to_json(v.naive_utc())
    } else if let Ok(Some(v)) = row.try_get::<uuid::Uuid, _>(index) {
        coerce::uuid_to_json(v)
    } else if let Ok(Some(v)) = row.try_get::<&str, _>(index) {
        serde_json::json!(v)
    } else if let Ok(Some(v)) = row.try_get::<&[u8], _>(index) {
        coerce::bytes_to_json(v)
    } else {
        Value::Null
    }
}

fn row_to_map(row: &tiberius::Row) -> Row {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_column(row, index));
    }
    map
}

fn str_at(row: &tiberius::Row, name: &str) -> Option<String> {
    row.try_get::<&str, _>(name).ok().flatten().map(str::to_string)
}

fn int_at(row: &tiberius::Row, name: &str) -> Option<i64> {
    row.try_get::<i64, _>(name).ok().flatten()
}

fn bool_at(row: &tiberius::Row, name: &str) -> bool {
    row.try_get::<bool, _>(name).ok().flatten().unwrap_or(false)
}

// --- Query Helpers ---

type Client = tiberius::Client<tokio_util::compat::Compat<tokio::net::TcpStream>>;

async fn fetch_rows(
    conn: &mut Client,
    sql: &str,
    params: &[SqlValue],
    context: &str,
) -> Result<Vec<tiberius::Row>> {
    let params = as_params(params);
    let stream = conn
        .query(sql, &params)
        .await
        .map_err(|e| GatewayError::execution(context, e))?;
    stream
        .into_first_result()
        .await
        .map_err(|e| GatewayError::execution(context, e))
}

async fn execute_count(
    conn: &mut Client,
    sql: &str,
    params: &[SqlValue],
    context: &str,
) -> Result<u64> {
    let params = as_params(params);
    let result = conn
        .execute(sql, &params)
        .await
        .map_err(|e| GatewayError::execution(context, e))?;
    Ok(result.total())
}

// --- Catalog Queries ---

async fn detect_column_type(
    conn: &mut Client,
    table: &str,
    schema: &str,
    column: &str,
) -> Option<String> {
    let params = [
        SqlValue::Text(schema.to_string()),
        SqlValue::Text(table.to_string()),
        SqlValue::Text(column.to_string()),
    ];
    let rows = fetch_rows(
        conn,
        "SELECT DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 AND COLUMN_NAME = @P3",
        &params,
        "SQL Server column type lookup failed",
    )
    .await;

    match rows {
        Ok(rows) => rows.first().and_then(|r| str_at(r, "DATA_TYPE")).map(|t| t.to_lowercase()),
        Err(e) => {
            log::warn!("could not detect type of column '{}': {}", column, e);
            None
        }
    }
}

async fn lookup_schema(
    conn: &mut Client,
    table: &str,
    schema_hint: Option<&str>,
) -> Result<Option<String>> {
    if let Some(hint) = schema_hint.map(str::trim).filter(|s| !s.is_empty()) {
        let params = [SqlValue::Text(table.to_string()), SqlValue::Text(hint.to_string())];
        let rows = fetch_rows(
            conn,
            "SELECT TABLE_SCHEMA FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_NAME = @P1 AND TABLE_SCHEMA = @P2",
            &params,
            "SQL Server schema lookup failed",
        )
        .await?;
        if let Some(row) = rows.first() {
            return Ok(str_at(row, "TABLE_SCHEMA"));
        }
    }

    let params = [SqlValue::Text(table.to_string())];
    let rows = fetch_rows(
        conn,
        "SELECT TOP 1 TABLE_SCHEMA FROM INFORMATION_SCHEMA.TABLES \
         WHERE TABLE_NAME = @P1 \
         ORDER BY CASE WHEN TABLE_SCHEMA = 'dbo' THEN 0 ELSE 1 END",
        &params,
        "SQL Server schema lookup failed",
    )
    .await?;
    Ok(rows.first().and_then(|r| str_at(r, "TABLE_SCHEMA")))
}

async fn routine_kind(
    conn: &mut Client,
    routine: &str,
    schema: Option<&str>,
) -> Result<RoutineKind> {
    let rows = match schema {
        Some(schema) => {
            let params =
                [SqlValue::Text(routine.to_string()), SqlValue::Text(schema.to_string())];
            fetch_rows(
                conn,
                "SELECT TOP 1 ROUTINE_TYPE FROM INFORMATION_SCHEMA.ROUTINES \
                 WHERE ROUTINE_NAME = @P1 AND ROUTINE_SCHEMA = @P2",
                &params,
                "SQL Server routine lookup failed",
            )
            .await?
        }
        None => {
            let params = [SqlValue::Text(routine.to_string())];
            fetch_rows(
                conn,
                "SELECT TOP 1 ROUTINE_TYPE FROM INFORMATION_SCHEMA.ROUTINES \
                 WHERE ROUTINE_NAME = @P1 \
                 ORDER BY CASE WHEN ROUTINE_SCHEMA = 'dbo' THEN 0 ELSE 1 END",
                &params,
                "SQL Server routine lookup failed",
            )
            .await?
        }
    };
    Ok(rows
        .first()
        .and_then(|r| str_at(r, "ROUTINE_TYPE"))
        .map(|t| RoutineKind::parse(&t))
        .unwrap_or(RoutineKind::Procedure))
}

async fn routine_parameters(
    conn: &mut Client,
    routine: &str,
    schema: Option<&str>,
) -> Result<Vec<RoutineParameter>> {
    let sql_with_schema = "SELECT PARAMETER_NAME, PARAMETER_MODE, DATA_TYPE, \
            CAST(CHARACTER_MAXIMUM_LENGTH AS BIGINT) AS max_length, \
            CAST(NUMERIC_PRECISION AS BIGINT) AS numeric_precision, \
            CAST(NUMERIC_SCALE AS BIGINT) AS numeric_scale, \
            CAST(ORDINAL_POSITION AS BIGINT) AS ordinal_position \
     FROM INFORMATION_SCHEMA.PARAMETERS \
     WHERE SPECIFIC_NAME = @P1 AND SPECIFIC_SCHEMA = @P2 \
     ORDER BY ORDINAL_POSITION";
    let sql_any_schema = "SELECT PARAMETER_NAME, PARAMETER_MODE, DATA_TYPE, \
            CAST(CHARACTER_MAXIMUM_LENGTH AS BIGINT) AS max_length, \
            CAST(NUMERIC_PRECISION AS BIGINT) AS numeric_precision, \
            CAST(NUMERIC_SCALE AS BIGINT) AS numeric_scale, \
            CAST(ORDINAL_POSITION AS BIGINT) AS ordinal_position \
     FROM INFORMATION_SCHEMA.PARAMETERS \
     WHERE SPECIFIC_NAME = @P1 \
     ORDER BY ORDINAL_POSITION";

    let rows = match schema {
        Some(schema) => {
            let params =
                [SqlValue::Text(routine.to_string()), SqlValue::Text(schema.to_string())];
            fetch_rows(conn, sql_with_schema, &params, "SQL Server parameter metadata failed")
                .await?
        }
        None => {
            let params = [SqlValue::Text(routine.to_string())];
            fetch_rows(conn, sql_any_schema, &params, "SQL Server parameter metadata failed")
                .await?
        }
    };

    let mut parameters = Vec::new();
    for row in rows {
        let name = str_at(&row, "PARAMETER_NAME").unwrap_or_default();
        if name.is_empty() {
            // the unnamed slot is a function's return value
            continue;
        }
        parameters.push(RoutineParameter {
            name,
            mode: ParameterMode::parse(
                &str_at(&row, "PARAMETER_MODE").unwrap_or_else(|| "IN".to_string()),
            ),
            data_type: str_at(&row, "DATA_TYPE").unwrap_or_else(|| "nvarchar".to_string()),
            max_length: int_at(&row, "max_length"),
            numeric_precision: int_at(&row, "numeric_precision"),
            numeric_scale: int_at(&row, "numeric_scale"),
            ordinal_position: int_at(&row, "ordinal_position").unwrap_or(0),
        });
    }
    Ok(parameters)
}

// --- Read Repository ---

pub struct SqlServerReadRepository {
    pool: Pool,
    hasher: Arc<dyn PasswordHasher>,
}

impl SqlServerReadRepository {
    pub async fn connect(
        connection_string: &str,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Result<SqlServerReadRepository> {
        Ok(SqlServerReadRepository { pool: create_pool(connection_string)?, hasher })
    }

    fn require(value: &str, what: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(GatewayError::input(format!("{} cannot be empty", what)));
        }
        Ok(())
    }

    async fn prepare_values(
        &self,
        conn: &mut Client,
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
                    let column_type = detect_column_type(conn, table, schema, column).await;
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
impl ReadRepository for SqlServerReadRepository {
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

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        let context = format!(
            "SQL Server error listing '{}.{}'",
            schema_final.as_deref().unwrap_or("dbo"),
            table
        );
        let rows = fetch_rows(&mut conn, &sql, &[], &context).await?;
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
        let schema_name = schema_final.clone().unwrap_or_else(|| "dbo".to_string());

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        let column_type = detect_column_type(&mut conn, table, &schema_name, key).await;
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

        let context = format!("SQL Server error filtering '{}.{}'", schema_name, table);
        let params = [bound];
        let rows = fetch_rows(&mut conn, &sql, &params, &context).await?;
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
        let schema_name = schema_final.clone().unwrap_or_else(|| "dbo".to_string());

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        let (columns, values) =
            self.prepare_values(&mut conn, table, &schema_name, data, encrypt_fields).await?;
        let sql = DIALECT.insert(schema_final.as_deref(), table, &columns);

        let context = format!("SQL Server error inserting into '{}.{}'", schema_name, table);
        Ok(execute_count(&mut conn, &sql, &values, &context).await? > 0)
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
        let schema_name = schema_final.clone().unwrap_or_else(|| "dbo".to_string());

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        let (columns, mut values) =
            self.prepare_values(&mut conn, table, &schema_name, data, encrypt_fields).await?;
        let key_type = detect_column_type(&mut conn, table, &schema_name, key).await;
        values.push(coerce::convert_text(DIALECT, key_value, key_type.as_deref()));

        let sql = DIALECT.update_by_key(schema_final.as_deref(), table, &columns, key);
        let context = format!("SQL Server error updating '{}.{}'", schema_name, table);
        execute_count(&mut conn, &sql, &values, &context).await
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
        let schema_name = schema_final.clone().unwrap_or_else(|| "dbo".to_string());

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        let key_type = detect_column_type(&mut conn, table, &schema_name, key).await;
        let params = [coerce::convert_text(DIALECT, key_value, key_type.as_deref())];

        let sql = DIALECT.delete_by_key(schema_final.as_deref(), table, key);
        let context = format!("SQL Server error deleting from '{}.{}'", schema_name, table);
        execute_count(&mut conn, &sql, &params, &context).await
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
        let schema_name = schema_final.clone().unwrap_or_else(|| "dbo".to_string());

        let sql = DIALECT.select_column_by_key(
            schema_final.as_deref(),
            table,
            password_column,
            user_column,
        );
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        let context = format!("SQL Server error fetching hash from '{}.{}'", schema_name, table);
        let params = [SqlValue::Text(user_value.to_string())];
        let rows = fetch_rows(&mut conn, &sql, &params, &context).await?;
        Ok(rows
            .first()
            .and_then(|r| r.try_get::<&str, _>(0).ok().flatten().map(str::to_string))
            .filter(|h| !h.is_empty()))
    }

    async fn connection_diagnostics(&self) -> Result<ConnectionDiagnostics> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        let rows = fetch_rows(
            &mut conn,
            "SELECT DB_NAME() AS database_name, \
                    SCHEMA_NAME() AS schema_name, \
                    @@VERSION AS server_version, \
                    @@SERVERNAME AS server_name, \
                    SUSER_SNAME() AS connected_user, \
                    CAST(@@SPID AS BIGINT) AS session_id, \
                    CONVERT(VARCHAR(33), (SELECT sqlserver_start_time FROM sys.dm_os_sys_info), 126) AS start_time",
            &[],
            "SQL Server diagnostics failed",
        )
        .await?;
        let row = rows
            .first()
            .ok_or_else(|| GatewayError::Execution("SQL Server diagnostics returned no rows".into()))?;

        Ok(ConnectionDiagnostics {
            provider: "SQL Server".to_string(),
            database: str_at(row, "database_name"),
            schema: str_at(row, "schema_name").or_else(|| Some("dbo".to_string())),
            version: str_at(row, "server_version"),
            server: str_at(row, "server_name"),
            port: None,
            start_time: str_at(row, "start_time"),
            user: str_at(row, "connected_user"),
            session_id: int_at(row, "session_id"),
        })
    }
}

// --- Query Repository ---

pub struct SqlServerQueryRepository {
    pool: Pool,
}

impl SqlServerQueryRepository {
    pub async fn connect(connection_string: &str) -> Result<SqlServerQueryRepository> {
        Ok(SqlServerQueryRepository { pool: create_pool(connection_string)? })
    }
}

/// Maps the common parse-error codes to readable categories; anything else
/// keeps the raw engine text.
fn map_validation_error(error_text: &str) -> String {
    if error_text.contains("102") {
        "SQL syntax error: check the statement structure".to_string()
    } else if error_text.contains("207") {
        "Invalid column name: verify the columns exist".to_string()
    } else if error_text.contains("208") {
        "Invalid object: the table or view does not exist in the database".to_string()
    } else if error_text.contains("156") {
        "Incorrect SQL keyword or keyword in the wrong position".to_string()
    } else if error_text.contains("170") {
        "Syntax error near a reserved word".to_string()
    } else {
        format!("SQL Server validation error: {}", error_text)
    }
}

#[async_trait]
impl QueryRepository for SqlServerQueryRepository {
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

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        let rows = fetch_rows(&mut conn, &rewritten, &values, "SQL Server query failed").await?;

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

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        // streams must be drained before the connection takes another query
        match conn.simple_query("SET PARSEONLY ON").await {
            Ok(stream) => {
                let _ = stream.into_results().await;
            }
            Err(e) => {
                return Ok(ValidationOutcome::invalid(map_validation_error(&e.to_string())));
            }
        }

        let outcome = {
            let params = as_params(&values);
            match conn.query(rewritten.as_str(), &params).await {
                Ok(stream) => match stream.into_results().await {
                    Ok(_) => ValidationOutcome::valid(),
                    Err(e) => ValidationOutcome::invalid(map_validation_error(&e.to_string())),
                },
                Err(e) => ValidationOutcome::invalid(map_validation_error(&e.to_string())),
            }
        };

        // the session goes back to the pool, so always restore parse mode
        if let Ok(stream) = conn.simple_query("SET PARSEONLY OFF").await {
            let _ = stream.into_results().await;
        }
        Ok(outcome)
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
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        let kind = routine_kind(&mut conn, routine, schema).await?;
        let metadata = routine_parameters(&mut conn, routine, schema).await?;

        let mut supplied: Vec<(String, Value)> = Vec::new();
        for (key, value) in params {
            supplied.push((normalize_param_name(key).to_lowercase(), value.clone()));
        }

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

        let sql = match kind {
            RoutineKind::Function => {
                // scalar function calls always need a schema prefix
                let qualified = format!("{}.{}", schema.unwrap_or("dbo"), routine);
                DIALECT.function_call(&qualified, values.len())
            }
            RoutineKind::Procedure => {
                let qualified = match schema {
                    Some(schema) => format!("{}.{}", schema, routine),
                    None => routine.to_string(),
                };
                let names: Vec<String> = inputs
                    .iter()
                    .map(|p| normalize_param_name(&p.name).to_string())
                    .collect();
                DIALECT.procedure_call(&qualified, &names)
            }
        };

        let context = format!("SQL Server error executing routine '{}'", name);
        let params = as_params(&values);
        let stream = conn
            .query(sql.as_str(), &params)
            .await
            .map_err(|e| GatewayError::execution(&context, e))?;
        let results = stream
            .into_results()
            .await
            .map_err(|e| GatewayError::execution(&context, e))?;
        Ok(results
            .into_iter()
            .next()
            .unwrap_or_default()
            .iter()
            .map(row_to_map)
            .collect())
    }

    async fn resolve_schema(
        &self,
        table: &str,
        schema_hint: Option<&str>,
    ) -> Result<Option<String>> {
        if table.trim().is_empty() {
            return Err(GatewayError::input("table name cannot be empty"));
        }
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        lookup_schema(&mut conn, table, schema_hint).await
    }

    async fn table_structure(&self, table: &str, schema: &str) -> Result<Vec<ColumnMetadata>> {
        if table.trim().is_empty() {
            return Err(GatewayError::input("table name cannot be empty"));
        }
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        fetch_table_columns(&mut conn, schema, table).await
    }

    async fn database_structure(&self) -> Result<DatabaseStructure> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::execution("SQL Server connection failed", e))?;
        let mut structure = DatabaseStructure::default();
        structure.tables = fetch_tables_with_columns(&mut conn).await?;
        structure.views = fetch_views(&mut conn).await?;
        structure.procedures = fetch_procedures(&mut conn).await?;
        structure.functions = fetch_functions(&mut conn).await?;
        structure.triggers = fetch_triggers(&mut conn).await?;
        structure.indexes = fetch_indexes(&mut conn).await?;
        structure.sequences = fetch_sequences(&mut conn).await?;
        structure.types = fetch_custom_types(&mut conn).await?;
        structure.extras = EngineExtras {
            synonyms: fetch_synonyms(&mut conn).await?,
            ..EngineExtras::default()
        };
        Ok(structure)
    }
}

// --- Structure Snapshot Helpers ---

async fn fetch_table_columns(
    conn: &mut Client,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnMetadata>> {
    let params = [SqlValue::Text(schema.to_string()), SqlValue::Text(table.to_string())];
    let rows = fetch_rows(
        conn,
        "SELECT \
             c.name AS column_name, \
             tp.name AS data_type, \
             CAST(c.max_length AS BIGINT) AS max_length, \
             CAST(c.precision AS BIGINT) AS numeric_precision, \
             CAST(c.scale AS BIGINT) AS numeric_scale, \
             c.is_nullable, \
             dc.definition AS column_default, \
             CAST(c.column_id AS BIGINT) AS ordinal_position, \
             CAST(CASE WHEN pk.column_id IS NOT NULL THEN 1 ELSE 0 END AS BIT) AS is_primary_key, \
             CAST(CASE WHEN uq.column_id IS NOT NULL THEN 1 ELSE 0 END AS BIT) AS is_unique, \
             c.is_identity, \
             fk.referenced_table, fk.referenced_column, fk.fk_constraint, \
             chk.check_clause, \
             CAST(ep.value AS NVARCHAR(4000)) AS column_comment \
         FROM sys.columns c \
         INNER JOIN sys.tables t ON c.object_id = t.object_id \
         INNER JOIN sys.schemas s ON t.schema_id = s.schema_id \
         INNER JOIN sys.types tp ON c.user_type_id = tp.user_type_id \
         LEFT JOIN sys.default_constraints dc ON c.default_object_id = dc.object_id \
         LEFT JOIN ( \
             SELECT ic.object_id, ic.column_id \
             FROM sys.index_columns ic \
             INNER JOIN sys.indexes i ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
             WHERE i.is_primary_key = 1 \
         ) pk ON c.object_id = pk.object_id AND c.column_id = pk.column_id \
         LEFT JOIN ( \
             SELECT ic.object_id, ic.column_id \
             FROM sys.index_columns ic \
             INNER JOIN sys.indexes i ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
             WHERE i.is_unique = 1 AND i.is_primary_key = 0 \
         ) uq ON c.object_id = uq.object_id AND c.column_id = uq.column_id \
         LEFT JOIN ( \
             SELECT fkc.parent_object_id, fkc.parent_column_id, \
                    OBJECT_NAME(fkc.referenced_object_id) AS referenced_table, \
                    COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id) AS referenced_column, \
                    fkobj.name AS fk_constraint \
             FROM sys.foreign_key_columns fkc \
             INNER JOIN sys.objects fkobj ON fkc.constraint_object_id = fkobj.object_id \
         ) fk ON c.object_id = fk.parent_object_id AND c.column_id = fk.parent_column_id \
         LEFT JOIN ( \
             SELECT ccu.TABLE_SCHEMA, ccu.TABLE_NAME, ccu.COLUMN_NAME, cc.CHECK_CLAUSE AS check_clause \
             FROM INFORMATION_SCHEMA.CONSTRAINT_COLUMN_USAGE ccu \
             JOIN INFORMATION_SCHEMA.CHECK_CONSTRAINTS cc \
                 ON ccu.CONSTRAINT_NAME = cc.CONSTRAINT_NAME \
                 AND ccu.CONSTRAINT_SCHEMA = cc.CONSTRAINT_SCHEMA \
         ) chk ON chk.TABLE_SCHEMA = s.name AND chk.TABLE_NAME = t.name AND chk.COLUMN_NAME = c.name \
         LEFT JOIN sys.extended_properties ep \
             ON ep.major_id = c.object_id AND ep.minor_id = c.column_id AND ep.name = 'MS_Description' \
         WHERE s.name = @P1 AND t.name = @P2 \
         ORDER BY c.column_id",
        &params,
        "SQL Server error describing table",
    )
    .await?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(ColumnMetadata {
            name: str_at(&row, "column_name").unwrap_or_default(),
            data_type: str_at(&row, "data_type").unwrap_or_default(),
            max_length: int_at(&row, "max_length"),
            numeric_precision: int_at(&row, "numeric_precision"),
            numeric_scale: int_at(&row, "numeric_scale"),
            is_nullable: bool_at(&row, "is_nullable"),
            column_default: str_at(&row, "column_default"),
            ordinal_position: int_at(&row, "ordinal_position").unwrap_or(0),
            is_primary_key: bool_at(&row, "is_primary_key"),
            is_unique: bool_at(&row, "is_unique"),
            is_identity: bool_at(&row, "is_identity"),
            foreign_table: str_at(&row, "referenced_table"),
            foreign_column: str_at(&row, "referenced_column"),
            fk_constraint: str_at(&row, "fk_constraint"),
            check_clause: str_at(&row, "check_clause"),
            comment: str_at(&row, "column_comment"),
        });
    }
    Ok(columns)
}

async fn fetch_tables_with_columns(conn: &mut Client) -> Result<Vec<TableStructure>> {
    let rows = fetch_rows(
        conn,
        "SELECT s.name AS schema_name, t.name AS table_name, \
                CAST(ep.value AS NVARCHAR(4000)) AS table_comment \
         FROM sys.tables t \
         INNER JOIN sys.schemas s ON t.schema_id = s.schema_id \
         LEFT JOIN sys.extended_properties ep \
             ON ep.major_id = t.object_id AND ep.minor_id = 0 AND ep.name = 'MS_Description' \
         WHERE t.is_ms_shipped = 0 \
         ORDER BY s.name, t.name",
        &[],
        "SQL Server error listing tables",
    )
    .await?;

    let mut listed = Vec::new();
    for row in &rows {
        listed.push((
            str_at(row, "schema_name").unwrap_or_default(),
            str_at(row, "table_name").unwrap_or_default(),
            str_at(row, "table_comment"),
        ));
    }

    let mut tables = Vec::new();
    for (schema, table, comment) in listed {
        let columns = fetch_table_columns(conn, &schema, &table).await?;
        let foreign_keys = fetch_table_foreign_keys(conn, &schema, &table).await?;
        let indexes = fetch_table_indexes(conn, &schema, &table).await?;
        tables.push(TableStructure {
            schema: Some(schema),
            name: table,
            comment,
            columns,
            foreign_keys,
            indexes,
        });
    }
    Ok(tables)
}

async fn fetch_table_foreign_keys(
    conn: &mut Client,
    schema: &str,
    table: &str,
) -> Result<Vec<ForeignKey>> {
    let params = [SqlValue::Text(schema.to_string()), SqlValue::Text(table.to_string())];
    let rows = fetch_rows(
        conn,
        "SELECT fk.name AS constraint_name, \
                COL_NAME(fkc.parent_object_id, fkc.parent_column_id) AS column_name, \
                OBJECT_SCHEMA_NAME(fkc.referenced_object_id) AS referenced_schema, \
                OBJECT_NAME(fkc.referenced_object_id) AS referenced_table, \
                COL_NAME(fkc.referenced_object_id, fkc.referenced_column_id) AS referenced_column, \
                fk.update_referential_action_desc AS on_update, \
                fk.delete_referential_action_desc AS on_delete \
         FROM sys.foreign_keys fk \
         INNER JOIN sys.foreign_key_columns fkc ON fk.object_id = fkc.constraint_object_id \
         INNER JOIN sys.tables t ON fk.parent_object_id = t.object_id \
         INNER JOIN sys.schemas s ON t.schema_id = s.schema_id \
         WHERE s.name = @P1 AND t.name = @P2 \
         ORDER BY fk.name",
        &params,
        "SQL Server error fetching foreign keys",
    )
    .await?;

    Ok(rows
        .iter()
        .map(|row| ForeignKey {
            constraint_name: str_at(row, "constraint_name").unwrap_or_default(),
            column_name: str_at(row, "column_name").unwrap_or_default(),
            referenced_schema: str_at(row, "referenced_schema"),
            referenced_table: str_at(row, "referenced_table").unwrap_or_default(),
            referenced_column: str_at(row, "referenced_column").unwrap_or_default(),
            on_update: str_at(row, "on_update"),
            on_delete: str_at(row, "on_delete"),
        })
        .collect())
}

async fn fetch_table_indexes(
    conn: &mut Client,
    schema: &str,
    table: &str,
) -> Result<Vec<IndexInfo>> {
    let params = [SqlValue::Text(schema.to_string()), SqlValue::Text(table.to_string())];
    let rows = fetch_rows(
        conn,
        "SELECT i.name AS index_name, i.type_desc AS index_type, \
                i.is_unique, i.is_primary_key, \
                STRING_AGG(c.name, ', ') WITHIN GROUP (ORDER BY ic.key_ordinal) AS columns \
         FROM sys.indexes i \
         INNER JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
         INNER JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
         INNER JOIN sys.tables t ON i.object_id = t.object_id \
         INNER JOIN sys.schemas s ON t.schema_id = s.schema_id \
         WHERE s.name = @P1 AND t.name = @P2 AND i.name IS NOT NULL \
         GROUP BY i.name, i.type_desc, i.is_unique, i.is_primary_key \
         ORDER BY i.name",
        &params,
        "SQL Server error fetching indexes",
    )
    .await?;

    Ok(rows
        .iter()
        .map(|row| IndexInfo {
            schema: Some(schema.to_string()),
            table_name: table.to_string(),
            name: str_at(row, "index_name").unwrap_or_default(),
            index_type: str_at(row, "index_type"),
            columns: str_at(row, "columns"),
            definition: None,
            is_unique: bool_at(row, "is_unique"),
            is_primary: bool_at(row, "is_primary_key"),
        })
        .collect())
}

async fn fetch_views(conn: &mut Client) -> Result<Vec<ViewInfo>> {
    let rows = fetch_rows(
        conn,
        "SELECT s.name AS schema_name, v.name AS view_name, m.definition AS view_definition \
         FROM sys.views v \
         INNER JOIN sys.schemas s ON v.schema_id = s.schema_id \
         LEFT JOIN sys.sql_modules m ON v.object_id = m.object_id \
         WHERE v.is_ms_shipped = 0 \
         ORDER BY s.name, v.name",
        &[],
        "SQL Server error fetching views",
    )
    .await?;

    Ok(rows
        .iter()
        .map(|row| ViewInfo {
            schema: str_at(row, "schema_name"),
            name: str_at(row, "view_name").unwrap_or_default(),
            definition: str_at(row, "view_definition"),
        })
        .collect())
}

async fn fetch_procedures(conn: &mut Client) -> Result<Vec<RoutineInfo>> {
    let rows = fetch_rows(
        conn,
        "SELECT s.name AS schema_name, p.name AS procedure_name, m.definition \
         FROM sys.procedures p \
         INNER JOIN sys.schemas s ON p.schema_id = s.schema_id \
         LEFT JOIN sys.sql_modules m ON p.object_id = m.object_id \
         WHERE p.is_ms_shipped = 0 \
         ORDER BY s.name, p.name",
        &[],
        "SQL Server error fetching procedures",
    )
    .await?;

    let mut listed = Vec::new();
    for row in &rows {
        listed.push((
            str_at(row, "schema_name"),
            str_at(row, "procedure_name").unwrap_or_default(),
            str_at(row, "definition"),
        ));
    }

    let mut procedures = Vec::new();
    for (schema, name, definition) in listed {
        let parameters = routine_parameters(conn, &name, schema.as_deref()).await?;
        procedures.push(RoutineInfo {
            schema,
            name,
            kind: RoutineKind::Procedure,
            definition,
            parameters,
        });
    }
    Ok(procedures)
}

async fn fetch_functions(conn: &mut Client) -> Result<Vec<RoutineInfo>> {
    let rows = fetch_rows(
        conn,
        "SELECT s.name AS schema_name, o.name AS function_name, m.definition \
         FROM sys.objects o \
         INNER JOIN sys.schemas s ON o.schema_id = s.schema_id \
         LEFT JOIN sys.sql_modules m ON o.object_id = m.object_id \
         WHERE o.type IN ('FN', 'IF', 'TF', 'FS', 'FT') AND o.is_ms_shipped = 0 \
         ORDER BY s.name, o.name",
        &[],
        "SQL Server error fetching functions",
    )
    .await?;

    let mut listed = Vec::new();
    for row in &rows {
        listed.push((
            str_at(row, "schema_name"),
            str_at(row, "function_name").unwrap_or_default(),
            str_at(row, "definition"),
        ));
    }

    let mut functions = Vec::new();
    for (schema, name, definition) in listed {
        let parameters = routine_parameters(conn, &name, schema.as_deref()).await?;
        functions.push(RoutineInfo {
            schema,
            name,
            kind: RoutineKind::Function,
            definition,
            parameters,
        });
    }
    Ok(functions)
}

async fn fetch_triggers(conn: &mut Client) -> Result<Vec<TriggerInfo>> {
    let rows = fetch_rows(
        conn,
        "SELECT s.name AS schema_name, tr.name AS trigger_name, \
                OBJECT_NAME(tr.parent_id) AS table_name, \
                te.type_desc AS trigger_event, \
                CASE WHEN tr.is_instead_of_trigger = 1 THEN 'INSTEAD OF' ELSE 'AFTER' END AS timing \
         FROM sys.triggers tr \
         INNER JOIN sys.objects o ON tr.parent_id = o.object_id \
         INNER JOIN sys.schemas s ON o.schema_id = s.schema_id \
         LEFT JOIN sys.trigger_events te ON tr.object_id = te.object_id \
         WHERE tr.is_ms_shipped = 0 \
         ORDER BY s.name, tr.name",
        &[],
        "SQL Server error fetching triggers",
    )
    .await?;

    Ok(rows
        .iter()
        .map(|row| TriggerInfo {
            schema: str_at(row, "schema_name"),
            name: str_at(row, "trigger_name").unwrap_or_default(),
            table_name: str_at(row, "table_name").unwrap_or_default(),
            event: str_at(row, "trigger_event"),
            timing: str_at(row, "timing"),
        })
        .collect())
}

async fn fetch_indexes(conn: &mut Client) -> Result<Vec<IndexInfo>> {
    let rows = fetch_rows(
        conn,
        "SELECT s.name AS schema_name, t.name AS table_name, i.name AS index_name, \
                i.type_desc AS index_type, i.is_unique, i.is_primary_key, \
                STRING_AGG(c.name, ', ') WITHIN GROUP (ORDER BY ic.key_ordinal) AS columns \
         FROM sys.indexes i \
         INNER JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
         INNER JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
         INNER JOIN sys.tables t ON i.object_id = t.object_id \
         INNER JOIN sys.schemas s ON t.schema_id = s.schema_id \
         WHERE i.name IS NOT NULL AND t.is_ms_shipped = 0 \
         GROUP BY s.name, t.name, i.name, i.type_desc, i.is_unique, i.is_primary_key \
         ORDER BY s.name, t.name, i.name",
        &[],
        "SQL Server error fetching indexes",
    )
    .await?;

    Ok(rows
        .iter()
        .map(|row| IndexInfo {
            schema: str_at(row, "schema_name"),
            table_name: str_at(row, "table_name").unwrap_or_default(),
            name: str_at(row, "index_name").unwrap_or_default(),
            index_type: str_at(row, "index_type"),
            columns: str_at(row, "columns"),
            definition: None,
            is_unique: bool_at(row, "is_unique"),
            is_primary: bool_at(row, "is_primary_key"),
        })
        .collect())
}

async fn fetch_sequences(conn: &mut Client) -> Result<Vec<SequenceInfo>> {
    let rows = fetch_rows(
        conn,
        "SELECT s.name AS schema_name, seq.name AS sequence_name, \
                TYPE_NAME(seq.user_type_id) AS data_type, \
                CONVERT(VARCHAR(40), seq.start_value) AS start_value, \
                CONVERT(VARCHAR(40), seq.increment) AS increment, \
                CONVERT(VARCHAR(40), seq.minimum_value) AS minimum_value, \
                CONVERT(VARCHAR(40), seq.maximum_value) AS maximum_value, \
                seq.is_cycling, \
                CONVERT(VARCHAR(40), seq.current_value) AS current_value \
         FROM sys.sequences seq \
         INNER JOIN sys.schemas s ON seq.schema_id = s.schema_id \
         ORDER BY s.name, seq.name",
        &[],
        "SQL Server error fetching sequences",
    )
    .await?;

    Ok(rows
        .iter()
        .map(|row| SequenceInfo {
            schema: str_at(row, "schema_name"),
            name: str_at(row, "sequence_name").unwrap_or_default(),
            data_type: str_at(row, "data_type"),
            start_value: str_at(row, "start_value"),
            increment: str_at(row, "increment"),
            minimum_value: str_at(row, "minimum_value"),
            maximum_value: str_at(row, "maximum_value"),
            is_cycling: Some(bool_at(row, "is_cycling")),
            current_value: str_at(row, "current_value"),
        })
        .collect())
}

async fn fetch_custom_types(conn: &mut Client) -> Result<Vec<CustomTypeInfo>> {
    let rows = fetch_rows(
        conn,
        "SELECT s.name AS schema_name, t.name AS type_name, \
                CASE \
                    WHEN t.is_table_type = 1 THEN 'TABLE TYPE' \
                    WHEN t.is_user_defined = 1 THEN 'USER DEFINED TYPE' \
                    ELSE 'ALIAS TYPE' \
                END AS type_category, \
                bt.name AS base_type \
         FROM sys.types t \
         INNER JOIN sys.schemas s ON t.schema_id = s.schema_id \
         LEFT JOIN sys.types bt ON t.system_type_id = bt.user_type_id AND bt.is_user_defined = 0 \
         WHERE t.is_user_defined = 1 \
         ORDER BY s.name, t.name",
        &[],
        "SQL Server error fetching custom types",
    )
    .await?;

    Ok(rows
        .iter()
        .map(|row| CustomTypeInfo {
            schema: str_at(row, "schema_name"),
            name: str_at(row, "type_name").unwrap_or_default(),
            category: str_at(row, "type_category"),
            detail: str_at(row, "base_type"),
        })
        .collect())
}

async fn fetch_synonyms(conn: &mut Client) -> Result<Vec<SynonymInfo>> {
    let rows = fetch_rows(
        conn,
        "SELECT s.name AS schema_name, syn.name AS synonym_name, \
                syn.base_object_name AS target_object \
         FROM sys.synonyms syn \
         INNER JOIN sys.schemas s ON syn.schema_id = s.schema_id \
         ORDER BY s.name, syn.name",
        &[],
        "SQL Server error fetching synonyms",
    )
    .await?;

    Ok(rows
        .iter()
        .map(|row| SynonymInfo {
            schema: str_at(row, "schema_name"),
            name: str_at(row, "synonym_name").unwrap_or_default(),
            target_object: str_at(row, "target_object").unwrap_or_default(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_codes_map_to_readable_categories() {
        assert!(map_validation_error("Server error code 102").contains("syntax error"));
        assert!(map_validation_error("Server error code 207").contains("column"));
        assert!(map_validation_error("Server error code 208").contains("object"));
        assert!(map_validation_error("Server error code 156").contains("keyword"));
        assert!(map_validation_error("Server error code 170").contains("reserved word"));
    }

    #[test]
    fn unmapped_validation_errors_keep_the_engine_text() {
        let mapped = map_validation_error("login failed for user");
        assert!(mapped.contains("login failed for user"));
    }
}
