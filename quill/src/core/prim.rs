//! Primitive types and builtin operations.
//!
//! Builtins evaluate through [`External`][super::semantics::External]
//! values: arguments accumulate up to the declared arity, and the native
//! step runs only once every argument is a literal. A step returns `None`
//! for arguments outside its domain, leaving the application stuck.

use std::sync::Arc;

use fxhash::FxHashMap;

use crate::core::quantity::{Quantity, Usages};
use crate::core::semantics::{ArcValue, Closure, ForeignDef, ImportEntry, Step, VBinder, Value};
use crate::core::{Binder, Literal, Plicity, Term};
use crate::env::SharedEnv;
use crate::symbol::Symbol;

macro_rules! num_binop {
    ($op:expr) => {
        |args: &[ArcValue]| match (args[0].as_ref(), args[1].as_ref()) {
            (Value::Lit(Literal::Num(x)), Value::Lit(Literal::Num(y))) => {
                Some(Value::lit(Literal::Num($op(*x, *y))))
            }
            _ => None,
        }
    };
}

macro_rules! num_cmp {
    ($op:expr) => {
        |args: &[ArcValue]| match (args[0].as_ref(), args[1].as_ref()) {
            (Value::Lit(Literal::Num(x)), Value::Lit(Literal::Num(y))) => {
                Some(Value::lit(Literal::Bool($op(*x, *y))))
            }
            _ => None,
        }
    };
}

macro_rules! bool_binop {
    ($op:expr) => {
        |args: &[ArcValue]| match (args[0].as_ref(), args[1].as_ref()) {
            (Value::Lit(Literal::Bool(x)), Value::Lit(Literal::Bool(y))) => {
                Some(Value::lit(Literal::Bool($op(*x, *y))))
            }
            _ => None,
        }
    };
}

fn lit_eq(args: &[ArcValue]) -> Option<ArcValue> {
    match (args[0].as_ref(), args[1].as_ref()) {
        (Value::Lit(x), Value::Lit(y)) => Some(Value::lit(Literal::Bool(x == y))),
        _ => None,
    }
}

fn lit_neq(args: &[ArcValue]) -> Option<ArcValue> {
    match (args[0].as_ref(), args[1].as_ref()) {
        (Value::Lit(x), Value::Lit(y)) => Some(Value::lit(Literal::Bool(x != y))),
        _ => None,
    }
}

fn str_append(args: &[ArcValue]) -> Option<ArcValue> {
    match (args[0].as_ref(), args[1].as_ref()) {
        (Value::Lit(Literal::Str(x)), Value::Lit(Literal::Str(y))) => {
            let appended = format!("{}{}", x.resolve(), y.resolve());
            Some(Value::lit(Literal::Str(Symbol::intern(appended))))
        }
        _ => None,
    }
}

/// A binary function type `a -> b -> c` over primitive atoms, as a value.
fn fun2(a: &'static str, b: &'static str, c: &'static str) -> ArcValue {
    let codomain = Arc::new(Term::Abs(
        Binder::Pi {
            name: Symbol::intern_static("y"),
            plicity: Plicity::Explicit,
            quantity: Quantity::Many,
            ann: Term::atom(b),
        },
        Term::atom(c),
    ));
    Arc::new(Value::Abs(
        VBinder::Pi {
            name: Symbol::intern_static("x"),
            plicity: Plicity::Explicit,
            quantity: Quantity::Many,
            ann: Value::atom(a),
        },
        Closure::new(SharedEnv::new(), codomain),
    ))
}

/// The builtin operation table for a fresh context.
pub fn foreigns() -> FxHashMap<Symbol, ForeignDef> {
    let mut defs = FxHashMap::default();
    let mut define = |name: &'static str, arity: usize, step: Step, r#type: ArcValue| {
        defs.insert(
            Symbol::intern_static(name),
            ForeignDef {
                arity,
                step,
                r#type,
            },
        );
    };

    define("$add", 2, num_binop!(|x, y| x + y), fun2("Num", "Num", "Num"));
    define("$sub", 2, num_binop!(|x, y| x - y), fun2("Num", "Num", "Num"));
    define("$mul", 2, num_binop!(|x, y| x * y), fun2("Num", "Num", "Num"));
    define("$div", 2, num_binop!(|x, y| x / y), fun2("Num", "Num", "Num"));
    define("$mod", 2, num_binop!(|x: f64, y| x % y), fun2("Num", "Num", "Num"));

    define("$lt", 2, num_cmp!(|x, y| x < y), fun2("Num", "Num", "Bool"));
    define("$gt", 2, num_cmp!(|x, y| x > y), fun2("Num", "Num", "Bool"));
    define("$lte", 2, num_cmp!(|x, y| x <= y), fun2("Num", "Num", "Bool"));
    define("$gte", 2, num_cmp!(|x, y| x >= y), fun2("Num", "Num", "Bool"));

    define("$and", 2, bool_binop!(|x, y| x && y), fun2("Bool", "Bool", "Bool"));
    define("$or", 2, bool_binop!(|x, y| x || y), fun2("Bool", "Bool", "Bool"));

    define("$eq", 2, lit_eq, fun2("Any", "Any", "Bool"));
    define("$neq", 2, lit_neq, fun2("Any", "Any", "Bool"));

    define("$append", 2, str_append, fun2("String", "String", "String"));

    defs
}

/// The primitive types pre-registered in the imports table of a fresh
/// context.
pub fn imports() -> FxHashMap<Symbol, ImportEntry> {
    let mut entries = FxHashMap::default();
    for name in ["Num", "Bool", "String", "Unit", "Type", "Any"] {
        entries.insert(
            Symbol::intern_static(name),
            ImportEntry {
                term: Term::atom(name),
                r#type: Value::universe(),
                usages: Usages::none(0),
            },
        );
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::semantics::{ElimContext, EvalContext, Globals, Solutions};
    use crate::core::Var;

    #[test]
    fn builtin_addition_computes() {
        let imports = imports();
        let sigma = FxHashMap::default();
        let foreigns = foreigns();
        let solutions = Solutions::default();
        let globals = Globals {
            imports: &imports,
            sigma: &sigma,
            foreigns: &foreigns,
            solutions: &solutions,
        };
        let mut locals = SharedEnv::new();
        let term = Term::App(
            Plicity::Explicit,
            Arc::new(Term::App(
                Plicity::Explicit,
                Term::var(Var::Foreign(Symbol::intern("$add"))),
                Term::lit(Literal::Num(1.0)),
            )),
            Term::lit(Literal::Num(2.0)),
        );
        let value = EvalContext::new(&mut locals, globals).eval(&term);
        assert!(matches!(value.as_ref(), Value::Lit(Literal::Num(n)) if *n == 3.0));
    }

    #[test]
    fn builtin_stays_stuck_on_flexible_argument() {
        let imports = imports();
        let sigma = FxHashMap::default();
        let foreigns = foreigns();
        let solutions = Solutions::default();
        let globals = Globals {
            imports: &imports,
            sigma: &sigma,
            foreigns: &foreigns,
            solutions: &solutions,
        };
        let elim = ElimContext::new(globals);
        let mut locals = SharedEnv::new();
        let add = EvalContext::new(&mut locals, globals)
            .eval(&Term::Var(Var::Foreign(Symbol::intern("$add"))));
        let partial = elim.apply_fun(
            add,
            Plicity::Explicit,
            Value::flexible(crate::core::MetaId::from_usize(0)),
        );
        let full = elim.apply_fun(partial, Plicity::Explicit, Value::lit(Literal::Num(2.0)));
        assert!(matches!(full.as_ref(), Value::External(external) if external.args.len() == 2));
    }
}
