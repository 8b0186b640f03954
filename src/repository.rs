// =====================================================
// REPOSITORY CONTRACTS AND ENGINE REGISTRY
// =====================================================

use std::sync::Arc;

use async_trait::async_trait;

use crate::coerce::SqlValue;
use crate::crypto::PasswordHasher;
use crate::db_types::{
    ColumnMetadata, ConnectionDescriptor, ConnectionDiagnostics, DatabaseStructure, Engine, Row,
    RowSet, ValidationOutcome,
};
use crate::error::Result;

/// Generic table CRUD over one engine. One implementation per engine; each
/// call acquires a pooled connection and releases it on every exit path.
#[async_trait]
pub trait ReadRepository: Send + Sync {
    async fn list_rows(
        &self,
        table: &str,
        schema: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Row>>;

    async fn rows_by_key(
        &self,
        table: &str,
        key: &str,
        value: &str,
        schema: Option<&str>,
    ) -> Result<Vec<Row>>;

    /// Inserts one row; columns named in `encrypt_fields` are stored as
    /// salted hashes. Returns whether a row was written.
    async fn insert(
        &self,
        table: &str,
        data: &Row,
        schema: Option<&str>,
        encrypt_fields: &[String],
    ) -> Result<bool>;

    /// Returns the affected-row count; zero is a valid outcome, not an
    /// error.
    async fn update(
        &self,
        table: &str,
        key: &str,
        key_value: &str,
        data: &Row,
        schema: Option<&str>,
        encrypt_fields: &[String],
    ) -> Result<u64>;

    async fn delete(
        &self,
        table: &str,
        key: &str,
        key_value: &str,
        schema: Option<&str>,
    ) -> Result<u64>;

    /// Fetches the stored password hash for a user, or `None` when the user
    /// does not exist.
    async fn password_hash(
        &self,
        table: &str,
        user_column: &str,
        password_column: &str,
        user_value: &str,
        schema: Option<&str>,
    ) -> Result<Option<String>>;

    async fn connection_diagnostics(&self) -> Result<ConnectionDiagnostics>;
}

/// Ad-hoc query execution, validation, routine invocation and catalog
/// introspection over one engine.
#[async_trait]
pub trait QueryRepository: Send + Sync {
    /// Runs caller SQL with `@name` parameters; results are capped at
    /// `max_rows` with the truncation flag set when the cap was hit.
    async fn execute_parametrized_query(
        &self,
        sql: &str,
        params: &[(String, SqlValue)],
        max_rows: usize,
        schema: Option<&str>,
    ) -> Result<RowSet>;

    /// Syntax-only check: engine failures become `(false, message)` instead
    /// of propagating, since invalid SQL is the expected case here.
    async fn validate_query(
        &self,
        sql: &str,
        params: &[(String, SqlValue)],
    ) -> Result<ValidationOutcome>;

    /// Invokes a stored procedure or function, dispatching on the routine
    /// kind found in the catalog. `schema.routine` names pin the schema.
    async fn execute_routine(
        &self,
        name: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<Row>>;

    /// Resolves the schema a table actually lives in, or `None` when the
    /// table does not exist anywhere.
    async fn resolve_schema(&self, table: &str, schema_hint: Option<&str>)
        -> Result<Option<String>>;

    async fn table_structure(&self, table: &str, schema: &str) -> Result<Vec<ColumnMetadata>>;

    async fn database_structure(&self) -> Result<DatabaseStructure>;
}

// --- Engine Registry ---
//
// Engine id → constructor, resolved statically. Adding an engine means
// adding one arm to each match.

pub async fn connect_read_repository(
    descriptor: &ConnectionDescriptor,
    hasher: Arc<dyn PasswordHasher>,
) -> Result<Box<dyn ReadRepository>> {
    match descriptor.engine {
        Engine::SqlServer => Ok(Box::new(
            crate::mssql::SqlServerReadRepository::connect(&descriptor.connection_string, hasher)
                .await?,
        )),
        Engine::PostgreSql => Ok(Box::new(
            crate::postgres::PostgresReadRepository::connect(&descriptor.connection_string, hasher)
                .await?,
        )),
        Engine::MySql | Engine::MariaDb => Ok(Box::new(
            crate::mysql::MySqlReadRepository::connect(
                &descriptor.connection_string,
                descriptor.engine,
                hasher,
            )
            .await?,
        )),
    }
}

pub async fn connect_query_repository(
    descriptor: &ConnectionDescriptor,
) -> Result<Box<dyn QueryRepository>> {
    match descriptor.engine {
        Engine::SqlServer => Ok(Box::new(
            crate::mssql::SqlServerQueryRepository::connect(&descriptor.connection_string).await?,
        )),
        Engine::PostgreSql => Ok(Box::new(
            crate::postgres::PostgresQueryRepository::connect(&descriptor.connection_string)
                .await?,
        )),
        Engine::MySql | Engine::MariaDb => Ok(Box::new(
            crate::mysql::MySqlQueryRepository::connect(&descriptor.connection_string).await?,
        )),
    }
}
