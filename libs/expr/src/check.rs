//! Static kind inference.
//!
//! Runs once at compile time. Anything that can be proven wrong from the
//! field declarations alone is rejected here; operations involving
//! [`Kind::Any`] are left to the evaluator.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{ExprError, ExprResult};
use crate::functions;
use crate::value::Kind;
use crate::Environment;

pub(crate) fn check<E: Environment>(expr: &Expr) -> ExprResult<Kind> {
    match expr {
        Expr::Literal(value) => Ok(value.kind()),
        Expr::Field(name) => E::kind_of(name).ok_or_else(|| ExprError::UnknownField(name.clone())),
        Expr::List(items) => {
            for item in items {
                check::<E>(item)?;
            }
            Ok(Kind::List)
        }
        Expr::Unary { op, operand } => {
            let kind = check::<E>(operand)?;
            match op {
                UnaryOp::Not if kind.admits(Kind::Bool) => Ok(Kind::Bool),
                UnaryOp::Neg if kind.is_numeric() || kind == Kind::Any => Ok(kind),
                UnaryOp::Not => Err(ExprError::mismatch(format!("cannot negate {kind} with '!'"))),
                UnaryOp::Neg => Err(ExprError::mismatch(format!("cannot negate {kind} with '-'"))),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let l = check::<E>(lhs)?;
            let r = check::<E>(rhs)?;
            check_binary(*op, l, r)
        }
        Expr::Member { target, name } => match check::<E>(target)? {
            Kind::Map | Kind::Any => Ok(Kind::Any),
            other => Err(ExprError::mismatch(format!(
                "cannot access field '{name}' on {other}"
            ))),
        },
        Expr::Index { target, index } => {
            let target = check::<E>(target)?;
            let index = check::<E>(index)?;
            match target {
                Kind::List if index.admits(Kind::Int) => Ok(Kind::Any),
                Kind::String if index.admits(Kind::Int) => Ok(Kind::String),
                Kind::Map if index.admits(Kind::String) => Ok(Kind::Any),
                Kind::Any => Ok(Kind::Any),
                Kind::List | Kind::String | Kind::Map => Err(ExprError::mismatch(format!(
                    "cannot index {target} with {index}"
                ))),
                other => Err(ExprError::mismatch(format!("cannot index {other}"))),
            }
        }
        Expr::Call { function, args } => {
            let signature = functions::lookup(function)
                .ok_or_else(|| ExprError::UnknownFunction(function.clone()))?;
            if args.len() != signature.params.len() {
                return Err(ExprError::Arity {
                    function: function.clone(),
                    expected: signature.params.len(),
                    actual: args.len(),
                });
            }
            for (arg, expected) in args.iter().zip(signature.params) {
                let actual = check::<E>(arg)?;
                if !actual.admits(*expected) {
                    return Err(ExprError::ArgumentType {
                        function: function.clone(),
                        expected: *expected,
                        actual,
                    });
                }
            }
            Ok(signature.returns)
        }
    }
}

fn check_binary(op: BinaryOp, l: Kind, r: Kind) -> ExprResult<Kind> {
    let fail = || -> ExprResult<Kind> {
        Err(ExprError::mismatch(format!(
            "operator '{}' not defined for {l} and {r}",
            op.symbol()
        )))
    };

    match op {
        BinaryOp::Or | BinaryOp::And => {
            if l.admits(Kind::Bool) && r.admits(Kind::Bool) {
                Ok(Kind::Bool)
            } else {
                fail()
            }
        }
        BinaryOp::Eq | BinaryOp::Ne => Ok(Kind::Bool),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if orderable(l, r) {
                Ok(Kind::Bool)
            } else {
                fail()
            }
        }
        BinaryOp::In | BinaryOp::NotIn => match r {
            Kind::List | Kind::Any => Ok(Kind::Bool),
            Kind::Map | Kind::String if l.admits(Kind::String) => Ok(Kind::Bool),
            _ => fail(),
        },
        BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith => {
            if l.admits(Kind::String) && r.admits(Kind::String) {
                Ok(Kind::Bool)
            } else {
                fail()
            }
        }
        BinaryOp::Add => match (l, r) {
            (Kind::String, Kind::String) => Ok(Kind::String),
            (Kind::Int, Kind::Int) => Ok(Kind::Int),
            (a, b) if a.is_numeric() && b.is_numeric() => Ok(Kind::Float),
            (Kind::Any, other) | (other, Kind::Any)
                if other == Kind::Any || other == Kind::String || other.is_numeric() =>
            {
                Ok(Kind::Any)
            }
            _ => fail(),
        },
        BinaryOp::Sub | BinaryOp::Mul => match (l, r) {
            (Kind::Int, Kind::Int) => Ok(Kind::Int),
            (a, b) if a.is_numeric() && b.is_numeric() => Ok(Kind::Float),
            (Kind::Any, other) | (other, Kind::Any) if other == Kind::Any || other.is_numeric() => {
                Ok(Kind::Any)
            }
            _ => fail(),
        },
        BinaryOp::Div => {
            let numeric = |k: Kind| k.is_numeric() || k == Kind::Any;
            if numeric(l) && numeric(r) {
                Ok(Kind::Float)
            } else {
                fail()
            }
        }
        BinaryOp::Rem => {
            if l.admits(Kind::Int) && r.admits(Kind::Int) {
                Ok(Kind::Int)
            } else {
                fail()
            }
        }
    }
}

fn orderable(l: Kind, r: Kind) -> bool {
    let numeric = |k: Kind| k.is_numeric() || k == Kind::Any;
    (numeric(l) && numeric(r)) || (l.admits(Kind::String) && r.admits(Kind::String))
}
