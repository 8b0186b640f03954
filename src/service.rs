// =====================================================
// POLICY-ENFORCING SERVICE FACADE
// =====================================================
//
// The services sit between the transport boundary and the per-engine
// repositories: fail-fast input validation, forbidden-table enforcement and
// parameter normalization all happen here, before any connection is used.

use std::sync::Arc;

use serde_json::Value;

use crate::coerce::{self, SqlValue};
use crate::crypto::{apply_encrypt_fields, PasswordHasher};
use crate::db_types::{ConnectionDiagnostics, Row, RowSet, ValidationOutcome};
use crate::dialect::normalize_param_name;
use crate::error::{GatewayError, Result};
use crate::policy::ForbiddenTablePolicy;
use crate::repository::{QueryRepository, ReadRepository};

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::input(format!("{} cannot be empty", what)));
    }
    Ok(())
}

fn normalize_schema(schema: Option<&str>) -> Option<String> {
    schema.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

// --- CRUD Service ---

pub struct CrudService {
    repository: Box<dyn ReadRepository>,
    policy: ForbiddenTablePolicy,
    hasher: Arc<dyn PasswordHasher>,
}

impl CrudService {
    pub fn new(
        repository: Box<dyn ReadRepository>,
        policy: ForbiddenTablePolicy,
        hasher: Arc<dyn PasswordHasher>,
    ) -> CrudService {
        CrudService { repository, policy, hasher }
    }

    pub async fn list(
        &self,
        table: &str,
        schema: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Row>> {
        require(table, "table name")?;
        self.policy.assert_table_allowed(table)?;
        let schema = normalize_schema(schema);
        let limit = limit.filter(|l| *l > 0);
        self.repository.list_rows(table, schema.as_deref(), limit).await
    }

    pub async fn rows_by_key(
        &self,
        table: &str,
        key: &str,
        value: &str,
        schema: Option<&str>,
    ) -> Result<Vec<Row>> {
        require(table, "table name")?;
        require(key, "key name")?;
        require(value, "key value")?;
        self.policy.assert_table_allowed(table)?;
        let schema = normalize_schema(schema);
        self.repository.rows_by_key(table, key.trim(), value.trim(), schema.as_deref()).await
    }

    pub async fn insert(
        &self,
        table: &str,
        data: &Row,
        schema: Option<&str>,
        encrypt_fields: &[String],
    ) -> Result<bool> {
        require(table, "table name")?;
        if data.is_empty() {
            return Err(GatewayError::input("data cannot be empty"));
        }
        self.policy.assert_table_allowed(table)?;
        let schema = normalize_schema(schema);
        self.repository.insert(table, data, schema.as_deref(), encrypt_fields).await
    }

    pub async fn update(
        &self,
        table: &str,
        key: &str,
        key_value: &str,
        data: &Row,
        schema: Option<&str>,
        encrypt_fields: &[String],
    ) -> Result<u64> {
        require(table, "table name")?;
        require(key, "key name")?;
        require(key_value, "key value")?;
        if data.is_empty() {
            return Err(GatewayError::input("data cannot be empty"));
        }
        self.policy.assert_table_allowed(table)?;
        let schema = normalize_schema(schema);
        self.repository
            .update(table, key.trim(), key_value.trim(), data, schema.as_deref(), encrypt_fields)
            .await
    }

    pub async fn delete(
        &self,
        table: &str,
        key: &str,
        key_value: &str,
        schema: Option<&str>,
    ) -> Result<u64> {
        require(table, "table name")?;
        require(key, "key name")?;
        require(key_value, "key value")?;
        self.policy.assert_table_allowed(table)?;
        let schema = normalize_schema(schema);
        self.repository.delete(table, key.trim(), key_value.trim(), schema.as_deref()).await
    }

    /// Checks credentials against the stored hash. Returns an HTTP-shaped
    /// status pair so the boundary can forward it directly.
    pub async fn verify_password(
        &self,
        table: &str,
        user_column: &str,
        password_column: &str,
        user_value: &str,
        password: &str,
        schema: Option<&str>,
    ) -> Result<(u16, String)> {
        require(table, "table name")?;
        require(user_column, "user column")?;
        require(password_column, "password column")?;
        require(user_value, "user value")?;
        if password.is_empty() {
            return Err(GatewayError::input("password cannot be empty"));
        }
        self.policy.assert_table_allowed(table)?;
        let schema = normalize_schema(schema);

        let stored = self
            .repository
            .password_hash(
                table,
                user_column.trim(),
                password_column.trim(),
                user_value.trim(),
                schema.as_deref(),
            )
            .await?;

        match stored {
            None => Ok((404, format!("user '{}' not found", user_value.trim()))),
            Some(hash) if self.hasher.verify(password, &hash) => {
                Ok((200, "credentials are valid".to_string()))
            }
            Some(_) => Ok((401, "incorrect password".to_string())),
        }
    }

    pub async fn connection_diagnostics(&self) -> Result<ConnectionDiagnostics> {
        self.repository.connection_diagnostics().await
    }
}

// --- Query Service ---

pub struct QueryService {
    repository: Box<dyn QueryRepository>,
    policy: ForbiddenTablePolicy,
    hasher: Arc<dyn PasswordHasher>,
    max_rows: usize,
}

impl QueryService {
    pub fn new(
        repository: Box<dyn QueryRepository>,
        policy: ForbiddenTablePolicy,
        hasher: Arc<dyn PasswordHasher>,
        max_rows: usize,
    ) -> QueryService {
        QueryService { repository, policy, hasher, max_rows }
    }

    /// Only SELECT/WITH statements may run generically, and none may touch a
    /// denied table.
    fn assert_query_allowed(&self, sql: &str) -> Result<()> {
        require(sql, "query")?;
        let normalized = sql.trim().to_uppercase();
        if !normalized.starts_with("SELECT") && !normalized.starts_with("WITH") {
            return Err(GatewayError::denied(
                "only SELECT and WITH statements are allowed",
            ));
        }
        self.policy.assert_query_allowed(sql)
    }

    /// Types each JSON parameter by shape and validates its name.
    fn convert_params(
        params: &serde_json::Map<String, Value>,
    ) -> Result<Vec<(String, SqlValue)>> {
        let mut converted = Vec::new();
        for (key, value) in params {
            let name = normalize_param_name(key);
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(GatewayError::input(format!("invalid parameter name: '{}'", key)));
            }
            converted.push((name.to_string(), coerce::sniff_param(value)));
        }
        Ok(converted)
    }

    pub async fn execute_query(
        &self,
        sql: &str,
        params: &serde_json::Map<String, Value>,
        max_rows: Option<usize>,
        schema: Option<&str>,
    ) -> Result<RowSet> {
        self.assert_query_allowed(sql)?;
        let params = Self::convert_params(params)?;
        let max_rows = max_rows.filter(|m| *m > 0).unwrap_or(self.max_rows);
        let schema = normalize_schema(schema);
        self.repository
            .execute_parametrized_query(sql, &params, max_rows, schema.as_deref())
            .await
    }

    pub async fn validate_query(
        &self,
        sql: &str,
        params: &serde_json::Map<String, Value>,
    ) -> Result<ValidationOutcome> {
        if sql.trim().is_empty() {
            return Ok(ValidationOutcome::invalid("query cannot be empty"));
        }
        let params = Self::convert_params(params)?;
        self.repository.validate_query(sql, &params).await
    }

    pub async fn execute_routine(
        &self,
        name: &str,
        params: &serde_json::Map<String, Value>,
        encrypt_fields: &[String],
    ) -> Result<Vec<Row>> {
        require(name, "routine name")?;
        let params = apply_encrypt_fields(params, encrypt_fields, self.hasher.as_ref())?;
        self.repository.execute_routine(name.trim(), &params).await
    }

    pub async fn resolve_schema(
        &self,
        table: &str,
        schema_hint: Option<&str>,
    ) -> Result<Option<String>> {
        require(table, "table name")?;
        self.repository.resolve_schema(table, schema_hint).await
    }

    pub async fn table_structure(
        &self,
        table: &str,
        schema: &str,
    ) -> Result<Vec<crate::db_types::ColumnMetadata>> {
        require(table, "table name")?;
        require(schema, "schema name")?;
        self.policy.assert_table_allowed(table)?;
        self.repository.table_structure(table, schema).await
    }

    pub async fn database_structure(&self) -> Result<crate::db_types::DatabaseStructure> {
        self.repository.database_structure().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::crypto::BcryptHasher;
    use crate::db_types::{ColumnMetadata, DatabaseStructure};

    fn hasher() -> Arc<dyn PasswordHasher> {
        Arc::new(BcryptHasher::new(4).unwrap())
    }

    // --- Stub Repositories ---

    #[derive(Default)]
    struct StubReadRepository {
        calls: Mutex<Vec<String>>,
        affected: u64,
        stored_hash: Option<String>,
    }

    impl StubReadRepository {
        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReadRepository for StubReadRepository {
        async fn list_rows(
            &self,
            table: &str,
            _schema: Option<&str>,
            _limit: Option<i64>,
        ) -> Result<Vec<Row>> {
            self.record(&format!("list:{}", table));
            Ok(vec![])
        }

        async fn rows_by_key(
            &self,
            table: &str,
            _key: &str,
            _value: &str,
            _schema: Option<&str>,
        ) -> Result<Vec<Row>> {
            self.record(&format!("by_key:{}", table));
            Ok(vec![])
        }

        async fn insert(
            &self,
            table: &str,
            _data: &Row,
            _schema: Option<&str>,
            _encrypt_fields: &[String],
        ) -> Result<bool> {
            self.record(&format!("insert:{}", table));
            Ok(true)
        }

        async fn update(
            &self,
            table: &str,
            _key: &str,
            _key_value: &str,
            _data: &Row,
            _schema: Option<&str>,
            _encrypt_fields: &[String],
        ) -> Result<u64> {
            self.record(&format!("update:{}", table));
            Ok(self.affected)
        }

        async fn delete(
            &self,
            table: &str,
            _key: &str,
            _key_value: &str,
            _schema: Option<&str>,
        ) -> Result<u64> {
            self.record(&format!("delete:{}", table));
            Ok(self.affected)
        }

        async fn password_hash(
            &self,
            _table: &str,
            _user_column: &str,
            _password_column: &str,
            _user_value: &str,
            _schema: Option<&str>,
        ) -> Result<Option<String>> {
            Ok(self.stored_hash.clone())
        }

        async fn connection_diagnostics(&self) -> Result<ConnectionDiagnostics> {
            Ok(ConnectionDiagnostics {
                provider: "stub".into(),
                database: None,
                schema: None,
                version: None,
                server: None,
                port: None,
                start_time: None,
                user: None,
                session_id: None,
            })
        }
    }

    #[derive(Default)]
    struct StubQueryRepository {
        last_params: Mutex<Option<serde_json::Map<String, Value>>>,
        last_query_params: Mutex<Vec<(String, SqlValue)>>,
    }

    #[async_trait]
    impl QueryRepository for StubQueryRepository {
        async fn execute_parametrized_query(
            &self,
            _sql: &str,
            params: &[(String, SqlValue)],
            max_rows: usize,
            _schema: Option<&str>,
        ) -> Result<RowSet> {
            *self.last_query_params.lock().unwrap() = params.to_vec();
            // hand back one row per requested cap so the caller sees the cap
            let mut row = Row::new();
            row.insert("max_rows".into(), serde_json::json!(max_rows));
            Ok(RowSet { rows: vec![row], truncated: false })
        }

        async fn validate_query(
            &self,
            _sql: &str,
            _params: &[(String, SqlValue)],
        ) -> Result<ValidationOutcome> {
            Ok(ValidationOutcome::valid())
        }

        async fn execute_routine(
            &self,
            _name: &str,
            params: &serde_json::Map<String, Value>,
        ) -> Result<Vec<Row>> {
            *self.last_params.lock().unwrap() = Some(params.clone());
            Ok(vec![])
        }

        async fn resolve_schema(
            &self,
            _table: &str,
            _schema_hint: Option<&str>,
        ) -> Result<Option<String>> {
            Ok(Some("public".into()))
        }

        async fn table_structure(
            &self,
            _table: &str,
            _schema: &str,
        ) -> Result<Vec<ColumnMetadata>> {
            Ok(vec![])
        }

        async fn database_structure(&self) -> Result<DatabaseStructure> {
            Ok(DatabaseStructure::default())
        }
    }

    fn crud(policy: &str) -> (CrudService, Arc<StubReadRepository>) {
        let repo = Arc::new(StubReadRepository::default());
        let service = CrudService::new(
            Box::new(SharedRead(repo.clone())),
            ForbiddenTablePolicy::from_csv(policy),
            hasher(),
        );
        (service, repo)
    }

    // wrapper so the test can keep a handle on the stub behind the Box
    struct SharedRead(Arc<StubReadRepository>);

    #[async_trait]
    impl ReadRepository for SharedRead {
        async fn list_rows(
            &self,
            table: &str,
            schema: Option<&str>,
            limit: Option<i64>,
        ) -> Result<Vec<Row>> {
            self.0.list_rows(table, schema, limit).await
        }
        async fn rows_by_key(
            &self,
            table: &str,
            key: &str,
            value: &str,
            schema: Option<&str>,
        ) -> Result<Vec<Row>> {
            self.0.rows_by_key(table, key, value, schema).await
        }
        async fn insert(
            &self,
            table: &str,
            data: &Row,
            schema: Option<&str>,
            encrypt_fields: &[String],
        ) -> Result<bool> {
            self.0.insert(table, data, schema, encrypt_fields).await
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
            self.0.update(table, key, key_value, data, schema, encrypt_fields).await
        }
        async fn delete(
            &self,
            table: &str,
            key: &str,
            key_value: &str,
            schema: Option<&str>,
        ) -> Result<u64> {
            self.0.delete(table, key, key_value, schema).await
        }
        async fn password_hash(
            &self,
            table: &str,
            user_column: &str,
            password_column: &str,
            user_value: &str,
            schema: Option<&str>,
        ) -> Result<Option<String>> {
            self.0.password_hash(table, user_column, password_column, user_value, schema).await
        }
        async fn connection_diagnostics(&self) -> Result<ConnectionDiagnostics> {
            self.0.connection_diagnostics().await
        }
    }

    // --- CRUD Service ---

    #[tokio::test]
    async fn forbidden_table_is_denied_before_the_repository_runs() {
        let (service, repo) = crud("usuarios_sistema");
        let denied = service.list("usuarios_sistema", None, None).await;
        assert!(matches!(denied, Err(GatewayError::AccessDenied(_))));
        // case-insensitive
        let denied = service.list("USUARIOS_SISTEMA", None, None).await;
        assert!(matches!(denied, Err(GatewayError::AccessDenied(_))));
        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_deny_list_allows_everything() {
        let (service, repo) = crud("");
        service.list("usuarios_sistema", None, None).await.unwrap();
        assert_eq!(repo.calls(), vec!["list:usuarios_sistema"]);
    }

    #[tokio::test]
    async fn blank_identifiers_fail_fast() {
        let (service, repo) = crud("");
        assert!(matches!(
            service.list("  ", None, None).await,
            Err(GatewayError::InputValidation(_))
        ));
        assert!(matches!(
            service.rows_by_key("t", "", "v", None).await,
            Err(GatewayError::InputValidation(_))
        ));
        assert!(matches!(
            service.insert("t", &Row::new(), None, &[]).await,
            Err(GatewayError::InputValidation(_))
        ));
        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn keyed_update_on_missing_row_returns_zero() {
        let (service, _repo) = crud("");
        let mut data = Row::new();
        data.insert("precio".into(), serde_json::json!(10));
        let affected =
            service.update("producto", "codigo", "NOPE", &data, None, &[]).await.unwrap();
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn verify_password_maps_missing_user_bad_password_and_success() {
        let bcrypt = BcryptHasher::new(4).unwrap();
        let stored = bcrypt.hash("secret123").unwrap();

        let repo = Arc::new(StubReadRepository {
            stored_hash: Some(stored),
            ..StubReadRepository::default()
        });
        let service = CrudService::new(
            Box::new(SharedRead(repo)),
            ForbiddenTablePolicy::from_csv(""),
            hasher(),
        );

        let (code, _) = service
            .verify_password("usuario", "email", "clave", "a@b.com", "secret123", None)
            .await
            .unwrap();
        assert_eq!(code, 200);

        let (code, _) = service
            .verify_password("usuario", "email", "clave", "a@b.com", "wrong", None)
            .await
            .unwrap();
        assert_eq!(code, 401);

        let missing = Arc::new(StubReadRepository::default());
        let service = CrudService::new(
            Box::new(SharedRead(missing)),
            ForbiddenTablePolicy::from_csv(""),
            hasher(),
        );
        let (code, _) = service
            .verify_password("usuario", "email", "clave", "ghost", "secret123", None)
            .await
            .unwrap();
        assert_eq!(code, 404);
    }

    // --- Query Service ---

    fn queries(policy: &str) -> (QueryService, Arc<StubQueryRepository>) {
        let repo = Arc::new(StubQueryRepository::default());
        let service = QueryService::new(
            Box::new(SharedQuery(repo.clone())),
            ForbiddenTablePolicy::from_csv(policy),
            hasher(),
            10_000,
        );
        (service, repo)
    }

    struct SharedQuery(Arc<StubQueryRepository>);

    #[async_trait]
    impl QueryRepository for SharedQuery {
        async fn execute_parametrized_query(
            &self,
            sql: &str,
            params: &[(String, SqlValue)],
            max_rows: usize,
            schema: Option<&str>,
        ) -> Result<RowSet> {
            self.0.execute_parametrized_query(sql, params, max_rows, schema).await
        }
        async fn validate_query(
            &self,
            sql: &str,
            params: &[(String, SqlValue)],
        ) -> Result<ValidationOutcome> {
            self.0.validate_query(sql, params).await
        }
        async fn execute_routine(
            &self,
            name: &str,
            params: &serde_json::Map<String, Value>,
        ) -> Result<Vec<Row>> {
            self.0.execute_routine(name, params).await
        }
        async fn resolve_schema(
            &self,
            table: &str,
            schema_hint: Option<&str>,
        ) -> Result<Option<String>> {
            self.0.resolve_schema(table, schema_hint).await
        }
        async fn table_structure(
            &self,
            table: &str,
            schema: &str,
        ) -> Result<Vec<ColumnMetadata>> {
            self.0.table_structure(table, schema).await
        }
        async fn database_structure(&self) -> Result<DatabaseStructure> {
            self.0.database_structure().await
        }
    }

    #[tokio::test]
    async fn only_select_and_with_statements_are_accepted() {
        let (service, _) = queries("");
        let params = serde_json::Map::new();
        assert!(service.execute_query("SELECT * FROM producto", &params, None, None).await.is_ok());
        assert!(service
            .execute_query("WITH x AS (SELECT 1) SELECT * FROM x", &params, None, None)
            .await
            .is_ok());
        assert!(matches!(
            service.execute_query("DELETE FROM producto", &params, None, None).await,
            Err(GatewayError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn query_referencing_forbidden_table_is_denied() {
        let (service, _) = queries("auditoria");
        let params = serde_json::Map::new();
        let denied = service.execute_query("SELECT * FROM auditoria", &params, None, None).await;
        assert!(matches!(denied, Err(GatewayError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn default_row_cap_flows_to_the_repository() {
        let (service, _) = queries("");
        let params = serde_json::Map::new();
        let result =
            service.execute_query("SELECT * FROM producto", &params, None, None).await.unwrap();
        assert_eq!(result.rows[0]["max_rows"], serde_json::json!(10_000));

        let result = service
            .execute_query("SELECT * FROM producto", &params, Some(50), None)
            .await
            .unwrap();
        assert_eq!(result.rows[0]["max_rows"], serde_json::json!(50));
    }

    #[tokio::test]
    async fn parameter_names_are_validated_and_typed() {
        let (service, repo) = queries("");
        let mut params = serde_json::Map::new();
        params.insert("@id".into(), serde_json::json!("5"));
        service
            .execute_query("SELECT * FROM producto WHERE id = @id", &params, None, None)
            .await
            .unwrap();
        let bound = repo.last_query_params.lock().unwrap().clone();
        assert_eq!(bound, vec![("id".to_string(), SqlValue::Int(5))]);

        let mut bad = serde_json::Map::new();
        bad.insert("bad name!".into(), serde_json::json!(1));
        assert!(matches!(
            service.execute_query("SELECT 1", &bad, None, None).await,
            Err(GatewayError::InputValidation(_))
        ));
    }

    #[tokio::test]
    async fn routine_encrypt_fields_are_hashed_before_dispatch() {
        let (service, repo) = queries("");
        let mut params = serde_json::Map::new();
        params.insert("usuario".into(), serde_json::json!("ana"));
        params.insert("clave".into(), serde_json::json!("secret123"));

        service
            .execute_routine("registrar_usuario", &params, &["clave".to_string()])
            .await
            .unwrap();

        let sent = repo.last_params.lock().unwrap().clone().unwrap();
        assert_eq!(sent["usuario"], serde_json::json!("ana"));
        let stored = sent["clave"].as_str().unwrap().to_string();
        assert!(crate::crypto::is_bcrypt_hash(&stored));
        assert!(BcryptHasher::new(4).unwrap().verify("secret123", &stored));
    }

    #[tokio::test]
    async fn empty_routine_name_fails_fast() {
        let (service, _) = queries("");
        let params = serde_json::Map::new();
        assert!(matches!(
            service.execute_routine("  ", &params, &[]).await,
            Err(GatewayError::InputValidation(_))
        ));
    }

    #[tokio::test]
    async fn validate_query_reports_instead_of_failing() {
        let (service, _) = queries("");
        let params = serde_json::Map::new();
        let outcome = service.validate_query("", &params).await.unwrap();
        assert!(!outcome.is_valid);
        let outcome = service.validate_query("SELECT 1", &params).await.unwrap();
        assert!(outcome.is_valid);
    }
}
