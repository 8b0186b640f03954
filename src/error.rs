// =====================================================
// GATEWAY ERROR TYPES
// =====================================================

use thiserror::Error;

/// Errors surfaced by the gateway repositories and services.
///
/// Empty results are not errors: a lookup that matches nothing returns an
/// empty collection or `None`, and mutations report affected-row counts.
/// Only boundary layers translate emptiness into a not-found signal.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The caller supplied an empty or malformed identifier, parameter name
    /// or data map. Raised before any connection is opened.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// The requested table is on the deny list, or the statement kind is not
    /// permitted for generic execution.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Any engine/driver failure: connectivity loss, constraint violation,
    /// timeout. Carries the driver's error text but never connection strings.
    #[error("{0}")]
    Execution(String),
}

impl GatewayError {
    pub fn input(message: impl Into<String>) -> Self {
        GatewayError::InputValidation(message.into())
    }

    pub fn denied(message: impl Into<String>) -> Self {
        GatewayError::AccessDenied(message.into())
    }

    /// Wraps a driver error with the failing operation's context.
    pub fn execution(context: &str, err: impl std::fmt::Display) -> Self {
        GatewayError::Execution(format!("{}: {}", context, err))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
