// =====================================================
// COMMON GATEWAY TYPES AND STRUCTURES
// =====================================================

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;

// --- Engine Enum ---

/// One of the supported relational database products. MariaDB is listed
/// separately so provider ids and diagnostics can tell it apart, but it
/// shares the MySQL dialect and repository implementations.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    SqlServer,
    PostgreSql,
    MySql,
    MariaDb,
}

impl Engine {
    /// Parses a provider id the way connection settings spell them.
    pub fn parse(provider: &str) -> Option<Engine> {
        match provider.trim().to_lowercase().as_str() {
            "sqlserver" | "sqlserverexpress" | "localdb" | "mssql" => Some(Engine::SqlServer),
            "postgres" | "postgresql" => Some(Engine::PostgreSql),
            "mysql" => Some(Engine::MySql),
            "mariadb" => Some(Engine::MariaDb),
            _ => None,
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Engine::SqlServer => Dialect::SqlServer,
            Engine::PostgreSql => Dialect::Postgres,
            Engine::MySql | Engine::MariaDb => Dialect::MySql,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Engine::SqlServer => "SQL Server",
            Engine::PostgreSql => "PostgreSQL",
            Engine::MySql => "MySQL",
            Engine::MariaDb => "MariaDB",
        }
    }
}

// --- Connection Descriptor ---

/// Engine + connection string pair handed out by the connection provider.
/// The string goes to the driver untouched; this crate never parses it.
#[derive(Clone, Debug)]
pub struct ConnectionDescriptor {
    pub engine: Engine,
    pub connection_string: String,
}

// --- Result Rows ---

/// One result row: an ordered column → scalar mapping. Column order follows
/// the engine's projection order (`serde_json` is built with
/// `preserve_order`, so the map keeps insertion order).
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows plus the truncation marker for capped ad-hoc queries.
#[derive(Serialize, Debug, Default)]
pub struct RowSet {
    pub rows: Vec<Row>,
    pub truncated: bool,
}

impl RowSet {
    /// Applies the row cap: rows beyond `max_rows` are dropped and the
    /// truncation flag records that the cap was hit.
    pub fn capped(mut rows: Vec<Row>, max_rows: usize) -> RowSet {
        let truncated = rows.len() > max_rows;
        rows.truncate(max_rows);
        RowSet { rows, truncated }
    }
}

/// Outcome of a syntax-only validation run.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        ValidationOutcome { is_valid: true, error: None }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ValidationOutcome { is_valid: false, error: Some(message.into()) }
    }
}

// --- Column Metadata ---

/// Column facts assembled from the engine's system catalog, including the
/// constraint joins (PK/UNIQUE/FK/CHECK). Fetched fresh per request and
/// never cached.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    pub max_length: Option<i64>,
    pub numeric_precision: Option<i64>,
    pub numeric_scale: Option<i64>,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub ordinal_position: i64,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub is_identity: bool,
    pub foreign_table: Option<String>,
    pub foreign_column: Option<String>,
    pub fk_constraint: Option<String>,
    pub check_clause: Option<String>,
    pub comment: Option<String>,
}

// --- Routine Metadata ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParameterMode {
    In,
    Out,
    InOut,
}

impl ParameterMode {
    pub fn parse(mode: &str) -> ParameterMode {
        match mode.trim().to_uppercase().as_str() {
            "OUT" => ParameterMode::Out,
            "INOUT" => ParameterMode::InOut,
            _ => ParameterMode::In,
        }
    }

    /// IN and INOUT parameters participate in the call value list.
    pub fn takes_input(&self) -> bool {
        !matches!(self, ParameterMode::Out)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoutineParameter {
    pub name: String,
    pub mode: ParameterMode,
    pub data_type: String,
    pub max_length: Option<i64>,
    pub numeric_precision: Option<i64>,
    pub numeric_scale: Option<i64>,
    pub ordinal_position: i64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoutineKind {
    Function,
    Procedure,
}

impl RoutineKind {
    pub fn parse(kind: &str) -> RoutineKind {
        if kind.trim().eq_ignore_ascii_case("FUNCTION") {
            RoutineKind::Function
        } else {
            RoutineKind::Procedure
        }
    }
}

// --- Structure Snapshot ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ForeignKey {
    pub constraint_name: String,
    pub column_name: String,
    pub referenced_schema: Option<String>,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexInfo {
    pub schema: Option<String>,
    pub table_name: String,
    pub name: String,
    pub index_type: Option<String>,
    pub columns: Option<String>,
    pub definition: Option<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TableStructure {
    pub schema: Option<String>,
    pub name: String,
    pub comment: Option<String>,
    pub columns: Vec<ColumnMetadata>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ViewInfo {
    pub schema: Option<String>,
    pub name: String,
    pub definition: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoutineInfo {
    pub schema: Option<String>,
    pub name: String,
    pub kind: RoutineKind,
    pub definition: Option<String>,
    pub parameters: Vec<RoutineParameter>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TriggerInfo {
    pub schema: Option<String>,
    pub name: String,
    pub table_name: String,
    pub event: Option<String>,
    pub timing: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SequenceInfo {
    pub schema: Option<String>,
    pub name: String,
    pub data_type: Option<String>,
    pub start_value: Option<String>,
    pub increment: Option<String>,
    pub minimum_value: Option<String>,
    pub maximum_value: Option<String>,
    pub is_cycling: Option<bool>,
    pub current_value: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CustomTypeInfo {
    pub schema: Option<String>,
    pub name: String,
    pub category: Option<String>,
    pub detail: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExtensionInfo {
    pub name: String,
    pub version: Option<String>,
    pub schema: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EventInfo {
    pub name: String,
    pub status: String,
    pub event_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SynonymInfo {
    pub schema: Option<String>,
    pub name: String,
    pub target_object: String,
}

/// Engine-specific odds and ends of a structure snapshot. Only the
/// collections the active engine actually has are populated.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct EngineExtras {
    pub extensions: Vec<ExtensionInfo>,
    pub events: Vec<EventInfo>,
    pub synonyms: Vec<SynonymInfo>,
}

/// Full-database introspection result: the uniform shape every engine
/// normalizes its catalog into.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DatabaseStructure {
    pub tables: Vec<TableStructure>,
    pub views: Vec<ViewInfo>,
    pub procedures: Vec<RoutineInfo>,
    pub functions: Vec<RoutineInfo>,
    pub triggers: Vec<TriggerInfo>,
    pub indexes: Vec<IndexInfo>,
    pub sequences: Vec<SequenceInfo>,
    pub types: Vec<CustomTypeInfo>,
    pub extras: EngineExtras,
}

// --- Connection Diagnostics ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionDiagnostics {
    pub provider: String,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub version: Option<String>,
    pub server: Option<String>,
    pub port: Option<i64>,
    pub start_time: Option<String>,
    pub user: Option<String>,
    pub session_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_parse_accepts_provider_variants() {
        assert_eq!(Engine::parse("sqlserver"), Some(Engine::SqlServer));
        assert_eq!(Engine::parse("SqlServerExpress"), Some(Engine::SqlServer));
        assert_eq!(Engine::parse("localdb"), Some(Engine::SqlServer));
        assert_eq!(Engine::parse("postgres"), Some(Engine::PostgreSql));
        assert_eq!(Engine::parse("postgresql"), Some(Engine::PostgreSql));
        assert_eq!(Engine::parse("mysql"), Some(Engine::MySql));
        assert_eq!(Engine::parse("mariadb"), Some(Engine::MariaDb));
        assert_eq!(Engine::parse("oracle"), None);
    }

    #[test]
    fn mariadb_shares_the_mysql_dialect() {
        assert_eq!(Engine::MariaDb.dialect(), Engine::MySql.dialect());
        assert_ne!(Engine::MariaDb.dialect(), Engine::PostgreSql.dialect());
    }

    #[test]
    fn parameter_mode_parsing() {
        assert_eq!(ParameterMode::parse("IN"), ParameterMode::In);
        assert_eq!(ParameterMode::parse("out"), ParameterMode::Out);
        assert_eq!(ParameterMode::parse("InOut"), ParameterMode::InOut);
        // unknown modes count as plain inputs
        assert_eq!(ParameterMode::parse(""), ParameterMode::In);
    }

    #[test]
    fn out_parameters_are_excluded_from_call_inputs() {
        assert!(ParameterMode::In.takes_input());
        assert!(ParameterMode::InOut.takes_input());
        assert!(!ParameterMode::Out.takes_input());
    }

    #[test]
    fn row_cap_drops_overflow_and_flags_it() {
        let make_rows = |n: usize| {
            (0..n)
                .map(|i| {
                    let mut row = Row::new();
                    row.insert("id".into(), serde_json::json!(i));
                    row
                })
                .collect::<Vec<_>>()
        };

        let over = RowSet::capped(make_rows(10_050), 10_000);
        assert_eq!(over.rows.len(), 10_000);
        assert!(over.truncated);

        let under = RowSet::capped(make_rows(9_999), 10_000);
        assert_eq!(under.rows.len(), 9_999);
        assert!(!under.truncated);

        let exact = RowSet::capped(make_rows(10_000), 10_000);
        assert_eq!(exact.rows.len(), 10_000);
        assert!(!exact.truncated);
    }

    #[test]
    fn row_preserves_column_order() {
        let mut row = Row::new();
        row.insert("zeta".into(), serde_json::json!(1));
        row.insert("alpha".into(), serde_json::json!(2));
        let keys: Vec<&String> = row.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }
}
