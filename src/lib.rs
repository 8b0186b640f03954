// =====================================================
// tablegate — GENERIC SQL TABLE GATEWAY CORE
// =====================================================
//
// Exposes relational tables and stored routines over a uniform contract for
// four engines: SQL Server (tiberius), PostgreSQL and MySQL/MariaDB (sqlx).
// The transport that wraps this crate handles HTTP, auth and status-code
// mapping; everything from schema resolution and type coercion down to
// engine-correct SQL text lives here.

// Shared building blocks
pub mod coerce;
pub mod crypto;
pub mod db_types;
pub mod dialect;
pub mod error;
pub mod policy;
pub mod settings;

// Repository contracts and services
pub mod repository;
pub mod service;

// Engine implementations
pub mod mssql;
pub mod mysql;
pub mod postgres;

pub use coerce::SqlValue;
pub use db_types::{
    ColumnMetadata, ConnectionDescriptor, ConnectionDiagnostics, DatabaseStructure, Engine,
    ParameterMode, RoutineKind, RoutineParameter, Row, RowSet, ValidationOutcome,
};
pub use crypto::{BcryptHasher, PasswordHasher};
pub use dialect::Dialect;
pub use error::{GatewayError, Result};
pub use policy::ForbiddenTablePolicy;
pub use repository::{
    connect_query_repository, connect_read_repository, QueryRepository, ReadRepository,
};
pub use service::{CrudService, QueryService};
pub use settings::{ConnectionProvider, Settings};
