// =====================================================
// GATEWAY SETTINGS AND CONNECTION PROVIDER
// =====================================================

use crate::db_types::{ConnectionDescriptor, Engine};
use crate::error::{GatewayError, Result};

/// Default cap on rows returned from one ad-hoc query.
pub const DEFAULT_MAX_ROWS: usize = 10_000;

/// Default BCrypt work factor.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Process configuration, built once at startup and passed by reference into
/// whatever needs it. There is no cached global.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Active provider id: `sqlserver`, `sqlserverexpress`, `localdb`,
    /// `postgres`, `postgresql`, `mysql` or `mariadb`.
    pub provider: String,
    pub sqlserver: String,
    pub postgres: String,
    pub mysql: String,
    pub mariadb: String,
    /// Comma-separated deny list; empty means everything is allowed.
    pub forbidden_tables: String,
    pub max_rows: usize,
    pub bcrypt_cost: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            provider: "sqlserver".to_string(),
            sqlserver: String::new(),
            postgres: String::new(),
            mysql: String::new(),
            mariadb: String::new(),
            forbidden_tables: String::new(),
            max_rows: DEFAULT_MAX_ROWS,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }
}

impl Settings {
    /// Reads the conventional environment variables. Missing ones keep
    /// their defaults; loading `.env` files is the host process's business.
    pub fn from_env() -> Settings {
        let get = |key: &str| std::env::var(key).unwrap_or_default();
        let mut settings = Settings::default();
        let provider = get("DB_PROVIDER");
        if !provider.is_empty() {
            settings.provider = provider;
        }
        settings.sqlserver = get("DB_SQLSERVER");
        settings.postgres = get("DB_POSTGRES");
        settings.mysql = get("DB_MYSQL");
        settings.mariadb = get("DB_MARIADB");
        settings.forbidden_tables = get("FORBIDDEN_TABLES");
        if let Ok(max_rows) = std::env::var("MAX_QUERY_ROWS") {
            if let Ok(parsed) = max_rows.trim().parse::<usize>() {
                settings.max_rows = parsed;
            }
        }
        if let Ok(cost) = std::env::var("BCRYPT_COST") {
            if let Ok(parsed) = cost.trim().parse::<u32>() {
                settings.bcrypt_cost = parsed;
            }
        }
        settings
    }
}

/// Resolves the active engine and its connection string from settings.
#[derive(Clone, Debug)]
pub struct ConnectionProvider {
    settings: Settings,
}

impl ConnectionProvider {
    pub fn new(settings: Settings) -> ConnectionProvider {
        ConnectionProvider { settings }
    }

    pub fn current_engine(&self) -> Result<Engine> {
        Engine::parse(&self.settings.provider).ok_or_else(|| {
            GatewayError::input(format!(
                "unsupported provider '{}'; expected one of sqlserver, sqlserverexpress, localdb, postgres, postgresql, mysql, mariadb",
                self.settings.provider
            ))
        })
    }

    pub fn connection_string(&self) -> Result<String> {
        let engine = self.current_engine()?;
        let raw = match engine {
            Engine::SqlServer => &self.settings.sqlserver,
            Engine::PostgreSql => &self.settings.postgres,
            Engine::MySql => &self.settings.mysql,
            Engine::MariaDb => &self.settings.mariadb,
        };
        if raw.trim().is_empty() {
            return Err(GatewayError::input(format!(
                "no connection string configured for provider '{}'",
                self.settings.provider
            )));
        }
        Ok(raw.clone())
    }

    pub fn descriptor(&self) -> Result<ConnectionDescriptor> {
        Ok(ConnectionDescriptor {
            engine: self.current_engine()?,
            connection_string: self.connection_string()?,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(provider: &str, conn: &str) -> Settings {
        let mut s = Settings::default();
        s.provider = provider.to_string();
        match Engine::parse(provider) {
            Some(Engine::SqlServer) => s.sqlserver = conn.to_string(),
            Some(Engine::PostgreSql) => s.postgres = conn.to_string(),
            Some(Engine::MySql) => s.mysql = conn.to_string(),
            Some(Engine::MariaDb) => s.mariadb = conn.to_string(),
            None => {}
        }
        s
    }

    #[test]
    fn provider_resolution() {
        let provider = ConnectionProvider::new(settings_with("postgres", "postgres://x"));
        assert_eq!(provider.current_engine().unwrap(), Engine::PostgreSql);
        assert_eq!(provider.connection_string().unwrap(), "postgres://x");
    }

    #[test]
    fn sqlserver_variants_use_the_sqlserver_string() {
        let mut s = Settings::default();
        s.provider = "localdb".to_string();
        s.sqlserver = "Server=(localdb)\\mssqllocaldb;Database=demo".to_string();
        let provider = ConnectionProvider::new(s);
        assert_eq!(provider.current_engine().unwrap(), Engine::SqlServer);
        assert!(provider.connection_string().unwrap().starts_with("Server="));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let provider = ConnectionProvider::new(settings_with("oracle", ""));
        assert!(provider.current_engine().is_err());
    }

    #[test]
    fn missing_connection_string_is_rejected() {
        let provider = ConnectionProvider::new(settings_with("mysql", ""));
        assert!(matches!(
            provider.connection_string(),
            Err(GatewayError::InputValidation(_))
        ));
    }

    #[test]
    fn default_row_cap() {
        assert_eq!(Settings::default().max_rows, 10_000);
    }
}
