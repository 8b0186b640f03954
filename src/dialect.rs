// =====================================================
// PER-ENGINE SQL TEXT ASSEMBLY
// =====================================================
//
// Everything here is pure string work: identifier quoting, schema
// qualification, row-limit clauses, parameter placeholder styles, named
// parameter rewriting and routine call syntax. Caller-supplied *values* are
// never interpolated into statement text — only identifiers are, and those
// come from catalog lookups or the caller's path parameters.

use crate::coerce::SqlValue;

/// Default row count for table listings when the caller gives none.
pub const DEFAULT_LIST_LIMIT: i64 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dialect {
    SqlServer,
    Postgres,
    MySql,
}

impl Dialect {
    // --- Identifiers ---

    /// Quotes a single identifier: `[x]`, `"x"` or `` `x` ``.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::SqlServer => format!("[{}]", ident.replace(']', "]]")),
            Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
        }
    }

    /// The engine's conventional default schema, if it has one. MySQL scopes
    /// objects to the connected database instead.
    pub fn default_schema(&self) -> Option<&'static str> {
        match self {
            Dialect::SqlServer => Some("dbo"),
            Dialect::Postgres => Some("public"),
            Dialect::MySql => None,
        }
    }

    /// Resolves the schema to qualify statements with: the caller's hint
    /// when given, else the engine default.
    pub fn effective_schema(&self, schema: Option<&str>) -> Option<String> {
        match schema.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Some(s.to_string()),
            None => self.default_schema().map(str::to_string),
        }
    }

    /// Schema-qualified, quoted table reference. MySQL stays database-
    /// implicit unless an explicit schema was supplied.
    pub fn qualify(&self, schema: Option<&str>, table: &str) -> String {
        match self.effective_schema(schema) {
            Some(s) => format!("{}.{}", self.quote(&s), self.quote(table)),
            None => self.quote(table),
        }
    }

    // --- Placeholders ---

    /// The engine's placeholder for the 1-based parameter position.
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::SqlServer => format!("@P{}", position),
            Dialect::Postgres => format!("${}", position),
            Dialect::MySql => "?".to_string(),
        }
    }

    /// Whether a placeholder names a position (reusable) or is purely
    /// positional (`?`, one value per occurrence).
    pub fn placeholders_are_positional(&self) -> bool {
        matches!(self, Dialect::MySql)
    }

    // --- Statement Templates ---

    /// `SELECT * FROM t` with the engine's row-limit clause: a leading
    /// `TOP (n)` on SQL Server, a trailing `LIMIT n` elsewhere.
    pub fn select_all_with_limit(&self, schema: Option<&str>, table: &str, limit: i64) -> String {
        let target = self.qualify(schema, table);
        match self {
            Dialect::SqlServer => format!("SELECT TOP ({}) * FROM {}", limit, target),
            Dialect::Postgres | Dialect::MySql => {
                format!("SELECT * FROM {} LIMIT {}", target, limit)
            }
        }
    }

    /// Keyed lookup. With `cast_key_to_date` the key column is reduced to
    /// its date part before comparing, so a bare-date probe can match a
    /// timestamp column despite the implicit-midnight mismatch.
    pub fn select_by_key(
        &self,
        schema: Option<&str>,
        table: &str,
        key: &str,
        cast_key_to_date: bool,
    ) -> String {
        let target = self.qualify(schema, table);
        let column = self.quote(key);
        let predicate = if cast_key_to_date {
            match self {
                Dialect::MySql => format!("DATE({}) = {}", column, self.placeholder(1)),
                _ => format!("CAST({} AS DATE) = {}", column, self.placeholder(1)),
            }
        } else {
            format!("{} = {}", column, self.placeholder(1))
        };
        format!("SELECT * FROM {} WHERE {}", target, predicate)
    }

    pub fn insert(&self, schema: Option<&str>, table: &str, columns: &[String]) -> String {
        let target = self.qualify(schema, table);
        let column_list: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        let placeholders: Vec<String> =
            (1..=columns.len()).map(|i| self.placeholder(i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            target,
            column_list.join(", "),
            placeholders.join(", ")
        )
    }

    /// `UPDATE … SET c1 = p1, … WHERE key = pN`; the key placeholder comes
    /// last in the bind order.
    pub fn update_by_key(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[String],
        key: &str,
    ) -> String {
        let target = self.qualify(schema, table);
        let assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", self.quote(c), self.placeholder(i + 1)))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {} = {}",
            target,
            assignments.join(", "),
            self.quote(key),
            self.placeholder(columns.len() + 1)
        )
    }

    pub fn delete_by_key(&self, schema: Option<&str>, table: &str, key: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.qualify(schema, table),
            self.quote(key),
            self.placeholder(1)
        )
    }

    /// Single-column fetch used for stored password hashes.
    pub fn select_column_by_key(
        &self,
        schema: Option<&str>,
        table: &str,
        column: &str,
        key: &str,
    ) -> String {
        let target = self.qualify(schema, table);
        let select = self.quote(column);
        let predicate = format!("{} = {}", self.quote(key), self.placeholder(1));
        match self {
            Dialect::SqlServer => {
                format!("SELECT TOP (1) {} FROM {} WHERE {}", select, target, predicate)
            }
            Dialect::Postgres | Dialect::MySql => {
                format!("SELECT {} FROM {} WHERE {} LIMIT 1", select, target, predicate)
            }
        }
    }

    // --- Named Parameter Rewrite ---

    /// Rewrites `@name` tokens in caller SQL to the engine's placeholder
    /// syntax and returns the ordered bind list.
    ///
    /// The scan is left to right with identifier-boundary checks, so `@id`
    /// never clobbers `@id2`. `@@server_variables` are left alone, as are
    /// names the caller supplied no value for. On `?` engines a repeated
    /// name repeats its value; on numbered engines the position is reused.
    pub fn rewrite_named_params(
        &self,
        sql: &str,
        params: &[(String, SqlValue)],
    ) -> (String, Vec<SqlValue>) {
        let mut out = String::with_capacity(sql.len());
        let mut values: Vec<SqlValue> = Vec::new();
        // name → assigned 1-based position, for numbered placeholders
        let mut positions: Vec<(String, usize)> = Vec::new();

        // '@' is ASCII and never appears inside a multi-byte sequence, so
        // byte-wise scanning with slice copies is UTF-8 safe
        let bytes = sql.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'@' {
                let start = i;
                while i < bytes.len() && bytes[i] != b'@' {
                    i += 1;
                }
                out.push_str(&sql[start..i]);
                continue;
            }
            // server variables (@@spid) and anything not starting an
            // identifier pass through untouched
            if i + 1 < bytes.len() && bytes[i + 1] == b'@' {
                let start = i;
                i += 2;
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                out.push_str(&sql[start..i]);
                continue;
            }
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_ident_char(bytes[end]) {
                end += 1;
            }
            if end == start {
                out.push('@');
                i += 1;
                continue;
            }
            let name = &sql[start..end];
            let supplied = params
                .iter()
                .find(|(key, _)| normalize_param_name(key).eq_ignore_ascii_case(name));
            match supplied {
                Some((_, value)) => {
                    if self.placeholders_are_positional() {
                        values.push(value.clone());
                        out.push_str(&self.placeholder(values.len()));
                    } else {
                        let position = match positions
                            .iter()
                            .find(|(n, _)| n.eq_ignore_ascii_case(name))
                        {
                            Some((_, p)) => *p,
                            None => {
                                values.push(value.clone());
                                positions.push((name.to_string(), values.len()));
                                values.len()
                            }
                        };
                        out.push_str(&self.placeholder(position));
                    }
                }
                None => out.push_str(&sql[i..end]),
            }
            i = end;
        }

        (out, values)
    }

    // --- Routine Calls ---

    /// Function invocation text for `argc` input parameters.
    pub fn function_call(&self, qualified_name: &str, argc: usize) -> String {
        let args: Vec<String> = (1..=argc).map(|i| self.placeholder(i)).collect();
        match self {
            Dialect::Postgres => {
                format!("SELECT * FROM {}({})", qualified_name, args.join(", "))
            }
            Dialect::SqlServer | Dialect::MySql => {
                format!("SELECT {}({}) AS result", qualified_name, args.join(", "))
            }
        }
    }

    /// Procedure invocation text. SQL Server names every argument
    /// (`EXEC sp @a = @P1, …`); the others call positionally.
    pub fn procedure_call(&self, qualified_name: &str, arg_names: &[String]) -> String {
        match self {
            Dialect::SqlServer => {
                if arg_names.is_empty() {
                    return format!("EXEC {}", qualified_name);
                }
                let assignments: Vec<String> = arg_names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| format!("@{} = {}", name, self.placeholder(i + 1)))
                    .collect();
                format!("EXEC {} {}", qualified_name, assignments.join(", "))
            }
            Dialect::Postgres | Dialect::MySql => {
                let args: Vec<String> =
                    (1..=arg_names.len()).map(|i| self.placeholder(i)).collect();
                format!("CALL {}({})", qualified_name, args.join(", "))
            }
        }
    }
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Strips the `@` prefix callers may or may not put on parameter names.
pub fn normalize_param_name(name: &str) -> &str {
    name.strip_prefix('@').unwrap_or(name)
}

/// Splits an optional `schema.routine` prefix off a routine name. An
/// explicit prefix takes precedence over the default-schema search order.
pub fn split_routine_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, routine)) if !schema.trim().is_empty() => {
            (Some(schema.trim()), routine.trim())
        }
        _ => (None, name.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_per_dialect() {
        assert_eq!(Dialect::SqlServer.quote("usuario"), "[usuario]");
        assert_eq!(Dialect::Postgres.quote("usuario"), "\"usuario\"");
        assert_eq!(Dialect::MySql.quote("usuario"), "`usuario`");
    }

    #[test]
    fn quoting_escapes_embedded_quote_chars() {
        assert_eq!(Dialect::SqlServer.quote("a]b"), "[a]]b]");
        assert_eq!(Dialect::Postgres.quote("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::MySql.quote("a`b"), "`a``b`");
    }

    #[test]
    fn schema_defaulting() {
        assert_eq!(Dialect::SqlServer.effective_schema(None).as_deref(), Some("dbo"));
        assert_eq!(Dialect::Postgres.effective_schema(None).as_deref(), Some("public"));
        assert_eq!(Dialect::MySql.effective_schema(None), None);
        assert_eq!(
            Dialect::Postgres.effective_schema(Some("ventas")).as_deref(),
            Some("ventas")
        );
        assert_eq!(Dialect::SqlServer.effective_schema(Some("  ")).as_deref(), Some("dbo"));
    }

    #[test]
    fn list_uses_top_on_sqlserver_and_limit_elsewhere() {
        assert_eq!(
            Dialect::SqlServer.select_all_with_limit(None, "producto", 50),
            "SELECT TOP (50) * FROM [dbo].[producto]"
        );
        assert_eq!(
            Dialect::Postgres.select_all_with_limit(None, "producto", 50),
            "SELECT * FROM \"public\".\"producto\" LIMIT 50"
        );
        assert_eq!(
            Dialect::MySql.select_all_with_limit(None, "producto", 50),
            "SELECT * FROM `producto` LIMIT 50"
        );
    }

    #[test]
    fn mysql_qualifies_only_with_explicit_schema() {
        assert_eq!(
            Dialect::MySql.select_all_with_limit(Some("tienda"), "producto", 10),
            "SELECT * FROM `tienda`.`producto` LIMIT 10"
        );
    }

    #[test]
    fn keyed_lookup_with_date_cast() {
        assert_eq!(
            Dialect::Postgres.select_by_key(None, "venta", "fecha", true),
            "SELECT * FROM \"public\".\"venta\" WHERE CAST(\"fecha\" AS DATE) = $1"
        );
        assert_eq!(
            Dialect::MySql.select_by_key(None, "venta", "fecha", true),
            "SELECT * FROM `venta` WHERE DATE(`fecha`) = ?"
        );
        assert_eq!(
            Dialect::SqlServer.select_by_key(None, "venta", "fecha", true),
            "SELECT * FROM [dbo].[venta] WHERE CAST([fecha] AS DATE) = @P1"
        );
    }

    #[test]
    fn keyed_lookup_without_cast() {
        assert_eq!(
            Dialect::SqlServer.select_by_key(Some("ventas"), "factura", "codigo", false),
            "SELECT * FROM [ventas].[factura] WHERE [codigo] = @P1"
        );
    }

    #[test]
    fn insert_statement_shapes() {
        let columns = vec!["email".to_string(), "clave".to_string()];
        assert_eq!(
            Dialect::Postgres.insert(None, "usuario", &columns),
            "INSERT INTO \"public\".\"usuario\" (\"email\", \"clave\") VALUES ($1, $2)"
        );
        assert_eq!(
            Dialect::MySql.insert(None, "usuario", &columns),
            "INSERT INTO `usuario` (`email`, `clave`) VALUES (?, ?)"
        );
        assert_eq!(
            Dialect::SqlServer.insert(None, "usuario", &columns),
            "INSERT INTO [dbo].[usuario] ([email], [clave]) VALUES (@P1, @P2)"
        );
    }

    #[test]
    fn update_binds_key_last() {
        let columns = vec!["precio".to_string(), "stock".to_string()];
        assert_eq!(
            Dialect::Postgres.update_by_key(None, "producto", &columns, "codigo"),
            "UPDATE \"public\".\"producto\" SET \"precio\" = $1, \"stock\" = $2 WHERE \"codigo\" = $3"
        );
        assert_eq!(
            Dialect::MySql.update_by_key(None, "producto", &columns, "codigo"),
            "UPDATE `producto` SET `precio` = ?, `stock` = ? WHERE `codigo` = ?"
        );
    }

    #[test]
    fn delete_statement() {
        assert_eq!(
            Dialect::SqlServer.delete_by_key(None, "producto", "codigo"),
            "DELETE FROM [dbo].[producto] WHERE [codigo] = @P1"
        );
    }

    #[test]
    fn password_hash_lookup_limits_to_one_row() {
        assert_eq!(
            Dialect::SqlServer.select_column_by_key(None, "usuario", "clave", "email"),
            "SELECT TOP (1) [clave] FROM [dbo].[usuario] WHERE [email] = @P1"
        );
        assert_eq!(
            Dialect::MySql.select_column_by_key(None, "usuario", "clave", "email"),
            "SELECT `clave` FROM `usuario` WHERE `email` = ? LIMIT 1"
        );
    }

    #[test]
    fn named_rewrite_postgres_numbers_parameters() {
        let params = vec![
            ("id".to_string(), SqlValue::Int(5)),
            ("nombre".to_string(), SqlValue::Text("ana".into())),
        ];
        let (sql, values) = Dialect::Postgres.rewrite_named_params(
            "SELECT * FROM cliente WHERE id = @id AND nombre = @nombre",
            &params,
        );
        assert_eq!(sql, "SELECT * FROM cliente WHERE id = $1 AND nombre = $2");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn named_rewrite_mysql_repeats_values_per_occurrence() {
        let params = vec![("id".to_string(), SqlValue::Int(5))];
        let (sql, values) = Dialect::MySql.rewrite_named_params(
            "SELECT * FROM pedido WHERE cliente_id = @id OR vendedor_id = @id",
            &params,
        );
        assert_eq!(sql, "SELECT * FROM pedido WHERE cliente_id = ? OR vendedor_id = ?");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn named_rewrite_numbered_reuses_positions() {
        let params = vec![("id".to_string(), SqlValue::Int(5))];
        let (sql, values) = Dialect::Postgres.rewrite_named_params(
            "SELECT * FROM pedido WHERE cliente_id = @id OR vendedor_id = @id",
            &params,
        );
        assert_eq!(sql, "SELECT * FROM pedido WHERE cliente_id = $1 OR vendedor_id = $1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn named_rewrite_respects_identifier_boundaries() {
        let params = vec![
            ("id".to_string(), SqlValue::Int(1)),
            ("id2".to_string(), SqlValue::Int(2)),
        ];
        let (sql, values) = Dialect::Postgres
            .rewrite_named_params("SELECT @id, @id2 FROM dual", &params);
        assert_eq!(sql, "SELECT $1, $2 FROM dual");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn named_rewrite_leaves_unknown_names_and_server_variables() {
        let params = vec![("id".to_string(), SqlValue::Int(1))];
        let (sql, values) = Dialect::SqlServer.rewrite_named_params(
            "SELECT @@SPID, @other FROM t WHERE id = @id",
            &params,
        );
        assert_eq!(sql, "SELECT @@SPID, @other FROM t WHERE id = @P1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn named_rewrite_keeps_non_ascii_text_intact() {
        let params = vec![("id".to_string(), SqlValue::Int(1))];
        let (sql, values) = Dialect::Postgres.rewrite_named_params(
            "SELECT 'año', descripción FROM artículo WHERE id = @id",
            &params,
        );
        assert_eq!(sql, "SELECT 'año', descripción FROM artículo WHERE id = $1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn named_rewrite_matches_case_insensitively() {
        let params = vec![("Codigo".to_string(), SqlValue::Text("A1".into()))];
        let (sql, values) = Dialect::MySql
            .rewrite_named_params("SELECT * FROM t WHERE c = @codigo", &params);
        assert_eq!(sql, "SELECT * FROM t WHERE c = ?");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn function_call_syntax_per_engine() {
        assert_eq!(
            Dialect::Postgres.function_call("ventas.calcular_total", 2),
            "SELECT * FROM ventas.calcular_total($1, $2)"
        );
        assert_eq!(
            Dialect::SqlServer.function_call("dbo.calcular_total", 1),
            "SELECT dbo.calcular_total(@P1) AS result"
        );
        assert_eq!(
            Dialect::MySql.function_call("calcular_total", 1),
            "SELECT calcular_total(?) AS result"
        );
    }

    #[test]
    fn procedure_call_syntax_per_engine() {
        assert_eq!(
            Dialect::Postgres.procedure_call("public.registrar_venta", &["id".into()]),
            "CALL public.registrar_venta($1)"
        );
        assert_eq!(
            Dialect::MySql.procedure_call("registrar_venta", &["id".into(), "total".into()]),
            "CALL registrar_venta(?, ?)"
        );
        assert_eq!(
            Dialect::SqlServer.procedure_call("dbo.registrar_venta", &["id".into(), "total".into()]),
            "EXEC dbo.registrar_venta @id = @P1, @total = @P2"
        );
        assert_eq!(
            Dialect::SqlServer.procedure_call("dbo.reindexar", &[]),
            "EXEC dbo.reindexar"
        );
    }

    #[test]
    fn routine_name_splitting() {
        assert_eq!(split_routine_name("calcular_total"), (None, "calcular_total"));
        assert_eq!(
            split_routine_name("ventas.calcular_total"),
            (Some("ventas"), "calcular_total")
        );
    }

    #[test]
    fn param_name_normalization() {
        assert_eq!(normalize_param_name("@id"), "id");
        assert_eq!(normalize_param_name("id"), "id");
    }
}
