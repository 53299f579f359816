//! Built-in functions.
//!
//! Only the two path helpers exist. Paths are slash separated inventory
//! locations such as `/dc1/vm/web/web01`.

use crate::error::{ExprError, ExprResult};
use crate::value::{Kind, Value};

pub(crate) struct Signature {
    pub name: &'static str,
    pub params: &'static [Kind],
    pub returns: Kind,
    imp: fn(&str) -> String,
}

const FUNCTIONS: &[Signature] = &[
    Signature {
        name: "path_base",
        params: &[Kind::String],
        returns: Kind::String,
        imp: path_base,
    },
    Signature {
        name: "path_dir",
        params: &[Kind::String],
        returns: Kind::String,
        imp: path_dir,
    },
];

pub(crate) fn lookup(name: &str) -> Option<&'static Signature> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

pub(crate) fn call(name: &str, args: &[Value]) -> ExprResult<Value> {
    let signature = lookup(name).ok_or_else(|| ExprError::UnknownFunction(name.to_string()))?;

    if args.len() != signature.params.len() {
        return Err(ExprError::Arity {
            function: name.to_string(),
            expected: signature.params.len(),
            actual: args.len(),
        });
    }

    match args {
        [Value::String(path)] => Ok(Value::String((signature.imp)(path))),
        [other] => Err(ExprError::ArgumentType {
            function: name.to_string(),
            expected: Kind::String,
            actual: other.kind(),
        }),
        _ => Err(ExprError::Arity {
            function: name.to_string(),
            expected: 1,
            actual: args.len(),
        }),
    }
}

/// Last element of a slash separated path.
///
/// Trailing slashes are ignored. An empty path yields `"."` and a path made
/// only of slashes yields `"/"`.
pub fn path_base(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }

    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Everything but the last element of a slash separated path.
///
/// A path without a slash yields `"."`; the root yields `"/"`.
pub fn path_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "." } else { "/" }.to_string();
    }

    let Some(idx) = trimmed.rfind('/') else {
        return ".".to_string();
    };

    let dir = trimmed[..idx].trim_end_matches('/');
    if dir.is_empty() {
        "/".to_string()
    } else {
        dir.to_string()
    }
}
