use phylo_core::errors::{ErrorInfo, PhyloError};
use serde::{Deserialize, Serialize};

use super::{argument, DeterministicFunction};
use crate::value::Value;

/// Binary operator applied by [`Arithmetic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
}

/// Binary arithmetic on two real parents.
#[derive(Debug, Clone, Copy)]
pub struct Arithmetic {
    op: ArithmeticOp,
}

impl Arithmetic {
    /// Creates the function for `op`.
    pub fn new(op: ArithmeticOp) -> Self {
        Self { op }
    }
}

impl DeterministicFunction for Arithmetic {
    fn name(&self) -> &str {
        match self.op {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Sub => "sub",
            ArithmeticOp::Mul => "mul",
            ArithmeticOp::Div => "div",
        }
    }

    fn arity(&self) -> usize {
        2
    }

    fn evaluate(&self, args: &[&Value]) -> Result<Value, PhyloError> {
        let a = argument(args, 0, self.name())?.as_real()?;
        let b = argument(args, 1, self.name())?.as_real()?;
        let result = match self.op {
            ArithmeticOp::Add => a + b,
            ArithmeticOp::Sub => a - b,
            ArithmeticOp::Mul => a * b,
            ArithmeticOp::Div => {
                if b == 0.0 {
                    return Err(PhyloError::Numerical(
                        ErrorInfo::new("division-by-zero", "denominator evaluated to zero")
                            .with_context("numerator", a),
                    ));
                }
                a / b
            }
        };
        Ok(Value::Real(result))
    }
}

/// Exponential of a real parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exp;

impl DeterministicFunction for Exp {
    fn name(&self) -> &str {
        "exp"
    }

    fn arity(&self) -> usize {
        1
    }

    fn evaluate(&self, args: &[&Value]) -> Result<Value, PhyloError> {
        Ok(Value::Real(argument(args, 0, self.name())?.as_real()?.exp()))
    }
}
