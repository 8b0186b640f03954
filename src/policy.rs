// =====================================================
// FORBIDDEN TABLE POLICY
// =====================================================

use std::collections::HashSet;

use crate::error::{GatewayError, Result};

/// Deny-list policy over table names. An empty list allows everything;
/// comparisons are case-insensitive; blank names are never allowed.
#[derive(Clone, Debug, Default)]
pub struct ForbiddenTablePolicy {
    denied: HashSet<String>,
}

impl ForbiddenTablePolicy {
    /// Builds the policy from a comma-separated list, e.g.
    /// `usuarios_sistema,configuracion_interna,auditoria`.
    pub fn from_csv(list: &str) -> ForbiddenTablePolicy {
        let denied = list
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        ForbiddenTablePolicy { denied }
    }

    pub fn is_table_allowed(&self, table: &str) -> bool {
        if table.trim().is_empty() {
            return false;
        }
        !self.denied.contains(&table.trim().to_lowercase())
    }

    pub fn has_restrictions(&self) -> bool {
        !self.denied.is_empty()
    }

    pub fn denied_tables(&self) -> &HashSet<String> {
        &self.denied
    }

    /// Errors with `AccessDenied` when the table is on the deny list.
    pub fn assert_table_allowed(&self, table: &str) -> Result<()> {
        if self.is_table_allowed(table) {
            Ok(())
        } else {
            Err(GatewayError::denied(format!(
                "table '{}' is restricted and cannot be accessed",
                table
            )))
        }
    }

    /// Scans ad-hoc SQL text for references to denied tables.
    pub fn assert_query_allowed(&self, sql: &str) -> Result<()> {
        let lowered = sql.to_lowercase();
        for table in &self.denied {
            if lowered.contains(table.as_str()) {
                return Err(GatewayError::denied(format!(
                    "query references the restricted table '{}'",
                    table
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_allows_everything() {
        let policy = ForbiddenTablePolicy::from_csv("");
        assert!(policy.is_table_allowed("usuarios_sistema"));
        assert!(!policy.has_restrictions());
    }

    #[test]
    fn denial_is_case_insensitive() {
        let policy = ForbiddenTablePolicy::from_csv("usuarios_sistema, auditoria");
        assert!(!policy.is_table_allowed("usuarios_sistema"));
        assert!(!policy.is_table_allowed("USUARIOS_SISTEMA"));
        assert!(!policy.is_table_allowed("  auditoria "));
        assert!(policy.is_table_allowed("producto"));
    }

    #[test]
    fn blank_names_are_never_allowed() {
        let policy = ForbiddenTablePolicy::from_csv("");
        assert!(!policy.is_table_allowed(""));
        assert!(!policy.is_table_allowed("   "));
    }

    #[test]
    fn query_scan_catches_denied_references() {
        let policy = ForbiddenTablePolicy::from_csv("auditoria");
        assert!(policy.assert_query_allowed("SELECT * FROM producto").is_ok());
        let denied = policy.assert_query_allowed("SELECT * FROM auditoria");
        assert!(matches!(denied, Err(GatewayError::AccessDenied(_))));
        let denied_mixed = policy.assert_query_allowed("SELECT * FROM Auditoria a");
        assert!(denied_mixed.is_err());
    }

    #[test]
    fn assert_table_allowed_maps_to_access_denied() {
        let policy = ForbiddenTablePolicy::from_csv("usuarios_sistema");
        assert!(matches!(
            policy.assert_table_allowed("usuarios_sistema"),
            Err(GatewayError::AccessDenied(_))
        ));
        assert!(policy.assert_table_allowed("producto").is_ok());
    }
}
