mod error;

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub use self::error::CalcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.trim() {
            "+" => Some(Operator::Add),
            "-" | "−" => Some(Operator::Subtract),
            "*" | "x" | "×" => Some(Operator::Multiply),
            "/" | "÷" => Some(Operator::Divide),
            _ => None,
        }
    }

    /// Legacy numeric operation codes: 1 add, 2 subtract, 3 multiply, 4 divide.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Operator::Add),
            2 => Some(Operator::Subtract),
            3 => Some(Operator::Multiply),
            4 => Some(Operator::Divide),
            _ => None,
        }
    }

    /// Integer arithmetic; division truncates toward zero.
    pub fn apply(&self, a: i64, b: i64) -> Result<i64, CalcError> {
        let result = match self {
            Operator::Add => a.checked_add(b),
            Operator::Subtract => a.checked_sub(b),
            Operator::Multiply => a.checked_mul(b),
            Operator::Divide => {
                if b == 0 {
                    return Err(CalcError::DivisionByZero);
                }
                a.checked_div(b)
            }
        };
        result.ok_or(CalcError::Overflow)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Operator as it arrives on the wire: a symbol or a legacy integer code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperatorField {
    Symbol(String),
    Code(i64),
}

impl OperatorField {
    pub fn resolve(&self) -> Result<Operator, CalcError> {
        match self {
            OperatorField::Symbol(s) => {
                Operator::from_symbol(s).ok_or_else(|| CalcError::UnsupportedOperator(s.clone()))
            }
            OperatorField::Code(c) => {
                Operator::from_code(*c).ok_or_else(|| CalcError::UnsupportedOperator(c.to_string()))
            }
        }
    }
}

impl From<Operator> for OperatorField {
    fn from(op: Operator) -> Self {
        OperatorField::Symbol(op.symbol().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationRequest {
    #[serde(alias = "operationType")]
    pub operator: OperatorField,
    pub a: i64,
    pub b: i64,
}

impl CalculationRequest {
    pub fn new(operator: Operator, a: i64, b: i64) -> Self {
        Self {
            operator: operator.into(),
            a,
            b,
        }
    }

    pub fn operator(&self) -> Result<Operator, CalcError> {
        self.operator.resolve()
    }

    /// Rejects anything the cluster should not bother dispatching.
    pub fn validate(&self) -> Result<Operator, CalcError> {
        let op = self.operator()?;
        if op == Operator::Divide && self.b == 0 {
            return Err(CalcError::DivisionByZero);
        }
        Ok(op)
    }

    pub fn evaluate(&self) -> Result<i64, CalcError> {
        self.operator()?.apply(self.a, self.b)
    }
}

/// Evaluates calculations on this node. A byzantine executor ignores the
/// operands and answers with a random non-negative number.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    byzantine: bool,
}

impl Executor {
    pub fn new(byzantine: bool) -> Self {
        Self { byzantine }
    }

    pub fn is_byzantine(&self) -> bool {
        self.byzantine
    }

    pub fn execute(&self, request: &CalculationRequest) -> Result<i64, CalcError> {
        let op = request.operator()?;
        if self.byzantine {
            return Ok(rand::rng().random_range(0..=i64::MAX));
        }
        op.apply(request.a, request.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> CalculationRequest {
        serde_json::from_str(json).expect("decode")
    }

    #[test]
    fn honest_executor_applies_each_operator() {
        let exec = Executor::new(false);
        let cases = [
            (Operator::Add, 2, 3, 5),
            (Operator::Subtract, 2, 3, -1),
            (Operator::Multiply, -4, 3, -12),
            (Operator::Divide, 7, 2, 3),
            (Operator::Divide, -7, 2, -3),
        ];
        for (op, a, b, want) in cases {
            let req = CalculationRequest::new(op, a, b);
            assert_eq!(exec.execute(&req), Ok(want), "{a} {op} {b}");
        }
    }

    #[test]
    fn division_by_zero_and_overflow_are_errors() {
        let exec = Executor::new(false);
        let div = CalculationRequest::new(Operator::Divide, 1, 0);
        assert_eq!(exec.execute(&div), Err(CalcError::DivisionByZero));
        assert_eq!(div.validate(), Err(CalcError::DivisionByZero));
        assert_eq!(CalcError::DivisionByZero.status_code(), 422);

        let add = CalculationRequest::new(Operator::Add, i64::MAX, 1);
        assert_eq!(exec.execute(&add), Err(CalcError::Overflow));
        let div = CalculationRequest::new(Operator::Divide, i64::MIN, -1);
        assert_eq!(exec.execute(&div), Err(CalcError::Overflow));
    }

    #[test]
    fn byzantine_executor_ignores_operands() {
        let exec = Executor::new(true);
        let req = CalculationRequest::new(Operator::Divide, 5, 0);
        for _ in 0..32 {
            assert!(exec.execute(&req).expect("random value") >= 0);
        }
    }

    #[test]
    fn wire_accepts_symbols_codes_and_legacy_field_name() {
        assert_eq!(decode(r#"{"operator":"+","a":2,"b":3}"#).evaluate(), Ok(5));
        assert_eq!(decode(r#"{"operator":"×","a":2,"b":3}"#).evaluate(), Ok(6));
        assert_eq!(decode(r#"{"operator":"x","a":2,"b":3}"#).evaluate(), Ok(6));
        assert_eq!(decode(r#"{"operator":"÷","a":9,"b":3}"#).evaluate(), Ok(3));
        assert_eq!(decode(r#"{"operationType":2,"a":2,"b":3}"#).evaluate(), Ok(-1));
        assert_eq!(decode(r#"{"operator":4,"a":8,"b":2}"#).evaluate(), Ok(4));
    }

    #[test]
    fn unknown_operators_are_rejected_before_dispatch() {
        let err = decode(r#"{"operator":"%","a":2,"b":3}"#)
            .validate()
            .expect_err("modulo is not supported");
        assert_eq!(err, CalcError::UnsupportedOperator("%".to_string()));
        assert_eq!(err.status_code(), 400);

        let err = decode(r#"{"operator":7,"a":2,"b":3}"#)
            .validate()
            .expect_err("code 7 is not supported");
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn requests_encode_with_symbol() {
        let json = serde_json::to_value(CalculationRequest::new(Operator::Multiply, 4, 5))
            .expect("encode");
        assert_eq!(json["operator"], "*");
        assert_eq!(json["a"], 4);
    }
}
