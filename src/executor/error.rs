use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalcError {
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Arithmetic overflow")]
    Overflow,
}

impl CalcError {
    pub fn status_code(&self) -> u16 {
        match self {
            CalcError::UnsupportedOperator(_) => 400,
            CalcError::DivisionByZero | CalcError::Overflow => 422,
        }
    }
}
