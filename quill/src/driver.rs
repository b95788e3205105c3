//! Statement-level driver.
//!
//! The module loader hands us a script: a sequence of top-level statements.
//! Each statement is elaborated, its constraints solved, its term zonked and
//! generalised, and the result recorded by name. A failing statement is
//! recorded against its name and the run continues with the remaining
//! statements; only internal invariant violations abort the whole run.

use std::sync::Arc;

use crate::core::quantity::Usages;
use crate::core::semantics::{ArcValue, ImportEntry};
use crate::core::{self, Var};
use crate::surface::elaboration::{implicits, Context, Error};
use crate::surface::{Statement, Term};
use crate::symbol::Symbol;

/// A successfully elaborated top-level statement: the fully explicit core
/// term, its normalised type, and the usage vector it produced.
#[derive(Debug, Clone)]
pub enum Elaborated {
    Let {
        name: Symbol,
        term: Arc<core::Term>,
        r#type: ArcValue,
        usages: Usages,
    },
    Expr {
        term: Arc<core::Term>,
        r#type: ArcValue,
        usages: Usages,
    },
    Using {
        term: Arc<core::Term>,
        r#type: ArcValue,
    },
    Foreign {
        name: Symbol,
        r#type: ArcValue,
    },
}

/// The per-statement results of elaborating a script.
pub type ScriptOutput = Vec<(Option<Symbol>, Result<Elaborated, Error>)>;

/// Elaborate a script: fold the statements over the context, growing its
/// imports table by one entry per successful `let`.
pub fn elab_script(context: &mut Context, statements: &[Statement]) -> ScriptOutput {
    statements
        .iter()
        .map(|statement| {
            let result = elab_statement(context, statement);
            if result.is_err() {
                // Leftover constraints from the failed statement must not
                // leak into the next one.
                context.drain_constraints();
            }
            (statement.name(), result)
        })
        .collect()
}

fn elab_statement(context: &mut Context, statement: &Statement) -> Result<Elaborated, Error> {
    match statement {
        Statement::Let {
            range,
            name,
            ann,
            value,
        } => {
            let (term, r#type, usages) = context.synth_let(*range, *name, ann.as_ref(), value)?;
            context.solve()?;
            let (term, r#type) = implicits::generalize(context, term, &r#type);
            context.register_import(
                *name,
                ImportEntry {
                    term: term.clone(),
                    r#type: r#type.clone(),
                    usages: usages.clone(),
                },
            );
            Ok(Elaborated::Let {
                name: *name,
                term,
                r#type,
                usages,
            })
        }
        Statement::Using { value, .. } => {
            let (term, r#type, _) = context.synth(value)?;
            context.solve()?;
            let term = implicits::zonk(context, &term);
            context.register_instance(term.clone(), r#type.clone());
            Ok(Elaborated::Using { term, r#type })
        }
        Statement::Foreign { name, ann, .. } => {
            let (ann, _) = context.check(ann, &crate::core::semantics::Value::universe())?;
            context.solve()?;
            let ann = implicits::zonk(context, &ann);
            let r#type = context.eval(&ann);
            context.register_import(
                *name,
                ImportEntry {
                    term: core::Term::var(Var::Foreign(*name)),
                    r#type: r#type.clone(),
                    usages: Usages::none(0),
                },
            );
            Ok(Elaborated::Foreign {
                name: *name,
                r#type,
            })
        }
        Statement::Expr(term) => elab_expr(context, term),
    }
}

/// Elaborate a single expression as if it were a statement, solving its
/// constraints and generalising the result.
pub fn elab_expr(context: &mut Context, term: &Term) -> Result<Elaborated, Error> {
    let (term, r#type, usages) = context.synth(term)?;
    context.solve()?;
    let (term, r#type) = implicits::generalize(context, term, &r#type);
    Ok(Elaborated::Expr {
        term,
        r#type,
        usages,
    })
}
