//! Tree-walking evaluator.

use std::cmp::Ordering;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{ExprError, ExprResult};
use crate::functions;
use crate::value::Value;
use crate::Environment;

pub(crate) fn eval(expr: &Expr, env: &dyn Environment) -> ExprResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Field(name) => Ok(env.lookup(name).unwrap_or(Value::Nil)),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, env))
            .collect::<ExprResult<Vec<_>>>()
            .map(Value::List),
        Expr::Unary { op, operand } => {
            let value = eval(operand, env)?;
            match (op, value) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, Value::Int(i)) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| ExprError::mismatch("integer overflow")),
                (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                (op, other) => Err(ExprError::mismatch(format!(
                    "cannot apply {op:?} to {}",
                    other.kind()
                ))),
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, env),
        Expr::Member { target, name } => match eval(target, env)? {
            Value::Map(map) => Ok(map.get(name).cloned().unwrap_or(Value::Nil)),
            other => Err(ExprError::mismatch(format!(
                "cannot access field '{name}' on {}",
                other.kind()
            ))),
        },
        Expr::Index { target, index } => {
            let target = eval(target, env)?;
            let index = eval(index, env)?;
            eval_index(target, index)
        }
        Expr::Call { function, args } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, env))
                .collect::<ExprResult<Vec<_>>>()?;
            functions::call(function, &args)
        }
    }
}

fn as_bool(value: Value, op: BinaryOp) -> ExprResult<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::mismatch(format!(
            "operator '{}' expects bool, got {}",
            op.symbol(),
            other.kind()
        ))),
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, env: &dyn Environment) -> ExprResult<Value> {
    // Short-circuit before touching the right-hand side.
    match op {
        BinaryOp::And => {
            if !as_bool(eval(lhs, env)?, op)? {
                return Ok(Value::Bool(false));
            }
            return as_bool(eval(rhs, env)?, op).map(Value::Bool);
        }
        BinaryOp::Or => {
            if as_bool(eval(lhs, env)?, op)? {
                return Ok(Value::Bool(true));
            }
            return as_bool(eval(rhs, env)?, op).map(Value::Bool);
        }
        _ => {}
    }

    let l = eval(lhs, env)?;
    let r = eval(rhs, env)?;
    let mismatch = |l: &Value, r: &Value| {
        ExprError::mismatch(format!(
            "operator '{}' not defined for {} and {}",
            op.symbol(),
            l.kind(),
            r.kind()
        ))
    };

    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&l, &r).ok_or_else(|| mismatch(&l, &r))?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In | BinaryOp::NotIn => {
            let found = match (&l, &r) {
                (_, Value::List(items)) => items.iter().any(|item| values_equal(&l, item)),
                (Value::String(key), Value::Map(map)) => map.contains_key(key),
                (Value::String(needle), Value::String(haystack)) => haystack.contains(needle.as_str()),
                (_, Value::Nil) => false,
                _ => return Err(mismatch(&l, &r)),
            };
            Ok(Value::Bool(found == (op == BinaryOp::In)))
        }
        BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith => {
            let (Value::String(s), Value::String(p)) = (&l, &r) else {
                return Err(mismatch(&l, &r));
            };
            let result = match op {
                BinaryOp::Contains => s.contains(p.as_str()),
                BinaryOp::StartsWith => s.starts_with(p.as_str()),
                _ => s.ends_with(p.as_str()),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (&l, &r) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => arithmetic(op, &l, &r).ok_or_else(|| mismatch(&l, &r))?,
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, &l, &r).ok_or_else(|| mismatch(&l, &r))?
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

/// Numeric arithmetic; `None` if the operands are not numbers.
fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Option<ExprResult<Value>> {
    let overflow = || ExprError::mismatch("integer overflow");

    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Div if b == 0 => Err(ExprError::DivisionByZero),
            BinaryOp::Div => Ok(Value::Float(a as f64 / b as f64)),
            BinaryOp::Rem if b == 0 => Err(ExprError::DivisionByZero),
            BinaryOp::Rem => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
            _ => return None,
        };
        return Some(result);
    }

    let (a, b) = (l.as_f64()?, r.as_f64()?);
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return Some(Err(ExprError::DivisionByZero)),
        BinaryOp::Div => a / b,
        _ => return None,
    };
    Some(Ok(Value::Float(result)))
}

fn eval_index(target: Value, index: Value) -> ExprResult<Value> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => {
            let idx = resolve_index(i, items.len())?;
            Ok(items[idx].clone())
        }
        (Value::String(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = resolve_index(i, chars.len())?;
            Ok(Value::String(chars[idx].to_string()))
        }
        (Value::Map(map), Value::String(key)) => Ok(map.get(&key).cloned().unwrap_or(Value::Nil)),
        (target, index) => Err(ExprError::mismatch(format!(
            "cannot index {} with {}",
            target.kind(),
            index.kind()
        ))),
    }
}

/// Negative indexes count from the end.
fn resolve_index(index: i64, len: usize) -> ExprResult<usize> {
    let out_of_range = || ExprError::IndexOutOfRange { index, len };
    let resolved = if index < 0 {
        i64::try_from(len)
            .ok()
            .and_then(|l| l.checked_add(index))
            .ok_or_else(out_of_range)?
    } else {
        index
    };
    let resolved = usize::try_from(resolved).map_err(|_| out_of_range())?;
    if resolved >= len {
        return Err(out_of_range());
    }
    Ok(resolved)
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            l.as_f64() == r.as_f64()
        }
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
    }
}
