//! # ferry-expr
//!
//! A small, side-effect free expression language used to decide which
//! instances belong to a batch and which instances a batch constraint
//! applies to.
//!
//! ```text
//! os == "Ubuntu" && cpus <= 4 && path_dir(location) == "/dc1/vm/web"
//! ```
//!
//! Expressions are evaluated against an [`Environment`]: a flat, read-only
//! view of a subject whose fields are declared up front through
//! [`Environment::kind_of`]. That lets [`Program::compile`] reject unknown
//! fields, unknown functions, wrong arity and non-boolean results before an
//! expression is ever stored.
//!
//! Two functions are available: `path_base(string)` and `path_dir(string)`.
//! There is no other way for an expression to reach outside its subject.
//!
//! # Invariants
//!
//! - Evaluation never mutates the subject
//! - Compile and runtime failures are both reported as [`ExprError`]; a failed
//!   evaluation is never treated as "no match"
//! - `&&` and `||` short-circuit

mod ast;
mod check;
mod error;
mod eval;
mod functions;
mod lexer;
mod parser;
mod value;

use std::fmt;
use std::marker::PhantomData;

pub use error::{ExprError, ExprResult};
pub use functions::{path_base, path_dir};
pub use value::{Kind, Value};

/// A subject expressions can be evaluated against.
pub trait Environment {
    /// Static kind of a field, or `None` if the field does not exist.
    fn kind_of(field: &str) -> Option<Kind>
    where
        Self: Sized;

    /// Current value of a field.
    ///
    /// Returning `None` for a field that [`Environment::kind_of`] declared is
    /// treated as `nil`.
    fn lookup(&self, field: &str) -> Option<Value>;
}

/// A compiled, type-checked expression for environment `E`.
pub struct Program<E> {
    source: String,
    expr: ast::Expr,
    _env: PhantomData<fn(&E)>,
}

impl<E: Environment> Program<E> {
    /// Parse and type-check `source`.
    pub fn compile(source: &str) -> ExprResult<Self> {
        let expr = parser::parse(source)?;
        let kind = check::check::<E>(&expr)?;
        if !matches!(kind, Kind::Bool | Kind::Any) {
            return Err(ExprError::NotBoolean(kind));
        }

        Ok(Self {
            source: source.to_string(),
            expr,
            _env: PhantomData,
        })
    }

    /// Evaluate against `env`.
    pub fn run(&self, env: &E) -> ExprResult<bool> {
        match eval::eval(&self.expr, env)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExprError::NotBoolean(other.kind())),
        }
    }

    /// The source text this program was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl<E> Clone for Program<E> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            expr: self.expr.clone(),
            _env: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Program<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Compile `source` and evaluate it against `env` in one step.
pub fn evaluate<E: Environment>(source: &str, env: &E) -> ExprResult<bool> {
    Program::<E>::compile(source)?.run(env)
}
