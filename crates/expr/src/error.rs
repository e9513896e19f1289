use thiserror::Error;

pub type ExprResult<T> = Result<T, ExprError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at column {col}: {message}")]
    Parse { col: usize, message: String },

    #[error("unknown variable \"{0}\"")]
    UnknownVariable(String),

    #[error("unknown function \"{0}\"")]
    UnknownFunction(String),

    #[error("function \"{name}\" takes {expected} argument(s), got {got}")]
    Arity {
        name: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("expression evaluates to a non-finite value")]
    NonFinite,
}
