//! Error types for point-calc

use errors::PointError;
use thiserror::Error;

/// Calculation errors
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Expression is not invertible: {0}")]
    NotInvertible(String),
}

impl CalcError {
    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }

    pub fn not_invertible(expr: impl Into<String>) -> Self {
        Self::NotInvertible(expr.into())
    }
}

impl From<CalcError> for PointError {
    fn from(err: CalcError) -> Self {
        match err {
            CalcError::Expression(msg) => PointError::InvalidExpression {
                expression: String::new(),
                error: msg,
            },
            CalcError::NotInvertible(expr) => PointError::InvalidExpression {
                expression: expr,
                error: "formula is not a linear function of x".to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, CalcError>;
