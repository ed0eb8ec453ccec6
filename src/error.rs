// src/error.rs

/// Errors raised by input validation and estimation.
///
/// Every variant carries a stable message fragment so callers can match on
/// `to_string()`. `Type` is the only type-category error; the rest describe
/// bad values, bad shapes, missing inputs or bad configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OpeError {
    #[error("{0}")]
    Shape(String),

    #[error("{0}")]
    Value(String),

    #[error("{0}")]
    Missing(String),

    #[error("{0}")]
    Type(String),

    #[error("{0}")]
    Config(String),
}

impl OpeError {
    pub fn is_type_error(&self) -> bool {
        matches!(self, OpeError::Type(_))
    }

    pub fn is_value_error(&self) -> bool {
        !self.is_type_error()
    }
}

pub type OpeResult<T> = std::result::Result<T, OpeError>;
