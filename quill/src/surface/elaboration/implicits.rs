//! Implicit argument insertion and generalisation.
//!
//! After synthesising a term, [`insert`] peels implicit function types off
//! its type: each implicit binder is either satisfied from the instance
//! table (populated by `using` statements) or filled with a fresh
//! metavariable and a `resolve` constraint. After solving, [`generalize`]
//! abstracts whatever metavariables are still unsolved as implicit lambdas,
//! in first-occurrence order.

use std::sync::Arc;

use crate::core::quantity::{Quantity, Usages};
use crate::core::semantics::{ArcValue, Value, VBinder};
use crate::core::{self, Binder, MetaId, Modalities, Plicity, Row, RowVar, Var};
use crate::env::Index;
use crate::source::ByteRange;
use crate::symbol::Symbol;

use super::{Constraint, Context};

/// Repeatedly insert implicit arguments in front of a synthesised term.
/// Terms that are themselves implicit lambdas are left untouched, so that an
/// explicitly written implicit binder is not immediately applied away.
pub fn insert(
    ctx: &mut Context,
    synthed: (Arc<core::Term>, ArcValue, Usages),
    range: ByteRange,
) -> (Arc<core::Term>, ArcValue, Usages) {
    let (mut term, mut r#type, usages) = synthed;

    if matches!(
        term.as_ref(),
        core::Term::Abs(
            Binder::Lambda {
                plicity: Plicity::Implicit,
                ..
            },
            _,
        )
    ) {
        return (term, r#type, usages);
    }

    loop {
        let forced = ctx.force(&r#type);
        let (ann, closure) = match forced.as_ref() {
            Value::Abs(
                VBinder::Pi {
                    plicity: Plicity::Implicit,
                    ann,
                    ..
                },
                closure,
            ) => (ann.clone(), closure.clone()),
            _ => break,
        };

        match ctx.resolve_implicit(&ann) {
            Some(instance) => {
                let value = ctx.eval(&instance);
                term = Arc::new(core::Term::App(Plicity::Implicit, term, instance));
                r#type = ctx.elim_context().apply_closure(&closure, value);
            }
            None => {
                let meta = ctx.fresh_meta(ann.clone());
                ctx.emit(Constraint::Resolve {
                    meta,
                    r#type: ann,
                    range,
                });
                term = Arc::new(core::Term::App(
                    Plicity::Implicit,
                    term,
                    core::Term::meta(meta),
                ));
                r#type = (ctx.elim_context()).apply_closure(&closure, Value::flexible(meta));
            }
        }
    }

    (term, r#type, usages)
}

/// Substitute solved metavariables out of a term, leaving only unsolved
/// ones.
pub fn zonk(ctx: &Context, term: &Arc<core::Term>) -> Arc<core::Term> {
    match term.as_ref() {
        core::Term::Lit(_) => term.clone(),
        core::Term::Var(Var::Meta(meta)) => match ctx.zonker().get(*meta) {
            Some(solution) => ctx.quote(solution),
            None => term.clone(),
        },
        core::Term::Var(_) => term.clone(),
        core::Term::Abs(binder, body) => {
            let binder = zonk_binder(ctx, binder);
            Arc::new(core::Term::Abs(binder, zonk(ctx, body)))
        }
        core::Term::App(plicity, head, arg) => Arc::new(core::Term::App(
            *plicity,
            zonk(ctx, head),
            zonk(ctx, arg),
        )),
        core::Term::Row(row) => Arc::new(core::Term::Row(zonk_row(ctx, row))),
        core::Term::Struct(row) => Arc::new(core::Term::Struct(zonk_row(ctx, row))),
        core::Term::Schema(row) => Arc::new(core::Term::Schema(zonk_row(ctx, row))),
        core::Term::Variant(row) => Arc::new(core::Term::Variant(zonk_row(ctx, row))),
        core::Term::Proj(label, head) => Arc::new(core::Term::Proj(*label, zonk(ctx, head))),
        core::Term::Inj(label, value, head) => Arc::new(core::Term::Inj(
            *label,
            zonk(ctx, value),
            zonk(ctx, head),
        )),
        core::Term::Ann(subject, r#type) => Arc::new(core::Term::Ann(
            zonk(ctx, subject),
            zonk(ctx, r#type),
        )),
        core::Term::Match(scrutinee, alternatives) => Arc::new(core::Term::Match(
            zonk(ctx, scrutinee),
            alternatives
                .iter()
                .map(|alt| core::Alternative {
                    pattern: alt.pattern.clone(),
                    term: zonk(ctx, &alt.term),
                })
                .collect(),
        )),
        core::Term::Block(statements, ret) => Arc::new(core::Term::Block(
            statements
                .iter()
                .map(|statement| match statement {
                    core::Statement::Let { name, term } => core::Statement::Let {
                        name: *name,
                        term: zonk(ctx, term),
                    },
                    core::Statement::Expr(term) => core::Statement::Expr(zonk(ctx, term)),
                })
                .collect(),
            zonk(ctx, ret),
        )),
        core::Term::Modal(subject, modalities) => Arc::new(core::Term::Modal(
            zonk(ctx, subject),
            Modalities {
                quantity: modalities.quantity,
                liquid: modalities.liquid.as_ref().map(|liquid| zonk(ctx, liquid)),
            },
        )),
    }
}

fn zonk_binder(ctx: &Context, binder: &Binder) -> Binder {
    match binder {
        Binder::Lambda { name, plicity, ann } => Binder::Lambda {
            name: *name,
            plicity: *plicity,
            ann: zonk(ctx, ann),
        },
        Binder::Pi {
            name,
            plicity,
            quantity,
            ann,
        } => Binder::Pi {
            name: *name,
            plicity: *plicity,
            quantity: *quantity,
            ann: zonk(ctx, ann),
        },
        Binder::Mu { name, source, ann } => Binder::Mu {
            name: *name,
            source: *source,
            ann: zonk(ctx, ann),
        },
    }
}

fn zonk_row(ctx: &Context, row: &Row<Arc<core::Term>>) -> Row<Arc<core::Term>> {
    match row {
        Row::Empty => Row::Empty,
        Row::Extend(label, term, rest) => {
            Row::extend(*label, zonk(ctx, term), zonk_row(ctx, rest))
        }
        Row::Var(RowVar::Meta(meta)) => match ctx.zonker().get(*meta) {
            Some(solution) => match ctx.quote(solution).as_ref() {
                core::Term::Row(row) => row.clone(),
                _ => Row::Var(RowVar::Meta(*meta)),
            },
            None => Row::Var(RowVar::Meta(*meta)),
        },
        Row::Var(var) => Row::Var(*var),
    }
}

/// Collect the unsolved metavariables of a (zonked) term, in first
/// occurrence order.
pub fn collect_metas(term: &core::Term, out: &mut Vec<MetaId>) {
    let push = |meta: MetaId, out: &mut Vec<MetaId>| {
        if !out.contains(&meta) {
            out.push(meta);
        }
    };
    match term {
        core::Term::Lit(_) => {}
        core::Term::Var(Var::Meta(meta)) => push(*meta, out),
        core::Term::Var(_) => {}
        core::Term::Abs(binder, body) => {
            collect_metas(binder.ann(), out);
            collect_metas(body, out);
        }
        core::Term::App(_, head, arg) => {
            collect_metas(head, out);
            collect_metas(arg, out);
        }
        core::Term::Row(row)
        | core::Term::Struct(row)
        | core::Term::Schema(row)
        | core::Term::Variant(row) => {
            for (_, term) in row.fields() {
                collect_metas(term, out);
            }
            if let Some(RowVar::Meta(meta)) = row.tail_var() {
                push(meta, out);
            }
        }
        core::Term::Proj(_, head) => collect_metas(head, out),
        core::Term::Inj(_, value, head) => {
            collect_metas(value, out);
            collect_metas(head, out);
        }
        core::Term::Ann(subject, r#type) => {
            collect_metas(subject, out);
            collect_metas(r#type, out);
        }
        core::Term::Match(scrutinee, alternatives) => {
            collect_metas(scrutinee, out);
            for alternative in alternatives {
                collect_metas(&alternative.term, out);
            }
        }
        core::Term::Block(statements, ret) => {
            for statement in statements {
                match statement {
                    core::Statement::Let { term, .. } | core::Statement::Expr(term) => {
                        collect_metas(term, out)
                    }
                }
            }
            collect_metas(ret, out);
        }
        core::Term::Modal(subject, modalities) => {
            collect_metas(subject, out);
            if let Some(liquid) = &modalities.liquid {
                collect_metas(liquid, out);
            }
        }
    }
}

/// Abstract the metavariables still unsolved after constraint solving:
/// one implicit lambda per metavariable on the term, one implicit `Pi` per
/// metavariable on its type, with occurrences rewritten to the new bound
/// parameters.
pub fn generalize(
    ctx: &mut Context,
    term: Arc<core::Term>,
    r#type: &ArcValue,
) -> (Arc<core::Term>, ArcValue) {
    let term = zonk(ctx, &term);
    let type_term = zonk(ctx, &ctx.quote(r#type));

    let mut metas = Vec::new();
    collect_metas(&term, &mut metas);
    collect_metas(&type_term, &mut metas);

    if metas.is_empty() {
        let r#type = ctx.eval(&type_term);
        return (term, r#type);
    }

    let count = metas.len();
    let mut wrapped_term = replace_metas(&term, &metas, 0, count);
    let mut wrapped_type = replace_metas(&type_term, &metas, 0, count);
    for (position, meta) in metas.iter().enumerate().rev() {
        let name = Symbol::get_alphabetic_name(position);
        let ann = zonk(ctx, &ctx.quote(ctx.metas().ann(*meta)));
        let ann = replace_metas(&ann, &metas, 0, position);
        wrapped_term = Arc::new(core::Term::Abs(
            Binder::Lambda {
                name,
                plicity: Plicity::Implicit,
                ann: ann.clone(),
            },
            wrapped_term,
        ));
        wrapped_type = Arc::new(core::Term::Abs(
            Binder::Pi {
                name,
                plicity: Plicity::Implicit,
                quantity: Quantity::Many,
                ann,
            },
            wrapped_type,
        ));
    }

    let r#type = ctx.eval(&wrapped_type);
    (wrapped_term, r#type)
}

/// Rewrite occurrences of the listed metavariables to bound variables.
/// `enclosing` is how many of the generalised binders are in scope at this
/// position; `offset` counts the local binders crossed on the way down.
fn replace_metas(
    term: &Arc<core::Term>,
    metas: &[MetaId],
    offset: usize,
    enclosing: usize,
) -> Arc<core::Term> {
    let var_for = |meta: &MetaId| -> Option<Index> {
        let position = metas.iter().position(|m| m == meta)?;
        (position < enclosing).then(|| Index::from_usize(offset + enclosing - 1 - position))
    };

    match term.as_ref() {
        core::Term::Lit(_) => term.clone(),
        core::Term::Var(Var::Meta(meta)) => match var_for(meta) {
            Some(index) => core::Term::bound(index),
            None => term.clone(),
        },
        core::Term::Var(_) => term.clone(),
        core::Term::Abs(binder, body) => {
            let binder = match binder {
                Binder::Lambda { name, plicity, ann } => Binder::Lambda {
                    name: *name,
                    plicity: *plicity,
                    ann: replace_metas(ann, metas, offset, enclosing),
                },
                Binder::Pi {
                    name,
                    plicity,
                    quantity,
                    ann,
                } => Binder::Pi {
                    name: *name,
                    plicity: *plicity,
                    quantity: *quantity,
                    ann: replace_metas(ann, metas, offset, enclosing),
                },
                Binder::Mu { name, source, ann } => Binder::Mu {
                    name: *name,
                    source: *source,
                    ann: replace_metas(ann, metas, offset, enclosing),
                },
            };
            Arc::new(core::Term::Abs(
                binder,
                replace_metas(body, metas, offset + 1, enclosing),
            ))
        }
        core::Term::App(plicity, head, arg) => Arc::new(core::Term::App(
            *plicity,
            replace_metas(head, metas, offset, enclosing),
            replace_metas(arg, metas, offset, enclosing),
        )),
        core::Term::Row(row) => Arc::new(core::Term::Row(replace_metas_row(
            row, metas, offset, enclosing,
        ))),
        core::Term::Struct(row) => Arc::new(core::Term::Struct(replace_metas_row(
            row, metas, offset, enclosing,
        ))),
        core::Term::Schema(row) => Arc::new(core::Term::Schema(replace_metas_row(
            row, metas, offset, enclosing,
        ))),
        core::Term::Variant(row) => Arc::new(core::Term::Variant(replace_metas_row(
            row, metas, offset, enclosing,
        ))),
        core::Term::Proj(label, head) => Arc::new(core::Term::Proj(
            *label,
            replace_metas(head, metas, offset, enclosing),
        )),
        core::Term::Inj(label, value, head) => Arc::new(core::Term::Inj(
            *label,
            replace_metas(value, metas, offset, enclosing),
            replace_metas(head, metas, offset, enclosing),
        )),
        core::Term::Ann(subject, r#type) => Arc::new(core::Term::Ann(
            replace_metas(subject, metas, offset, enclosing),
            replace_metas(r#type, metas, offset, enclosing),
        )),
        core::Term::Match(scrutinee, alternatives) => Arc::new(core::Term::Match(
            replace_metas(scrutinee, metas, offset, enclosing),
            alternatives
                .iter()
                .map(|alt| core::Alternative {
                    pattern: alt.pattern.clone(),
                    term: replace_metas(
                        &alt.term,
                        metas,
                        offset + alt.pattern.binders().len(),
                        enclosing,
                    ),
                })
                .collect(),
        )),
        core::Term::Block(statements, ret) => {
            let mut offset = offset;
            let statements = statements
                .iter()
                .map(|statement| match statement {
                    core::Statement::Let { name, term } => {
                        let term = replace_metas(term, metas, offset, enclosing);
                        offset += 1;
                        core::Statement::Let { name: *name, term }
                    }
                    core::Statement::Expr(term) => {
                        core::Statement::Expr(replace_metas(term, metas, offset, enclosing))
                    }
                })
                .collect();
            Arc::new(core::Term::Block(
                statements,
                replace_metas(ret, metas, offset, enclosing),
            ))
        }
        core::Term::Modal(subject, modalities) => Arc::new(core::Term::Modal(
            replace_metas(subject, metas, offset, enclosing),
            Modalities {
                quantity: modalities.quantity,
                liquid: (modalities.liquid.as_ref())
                    .map(|liquid| replace_metas(liquid, metas, offset, enclosing)),
            },
        )),
    }
}

fn replace_metas_row(
    row: &Row<Arc<core::Term>>,
    metas: &[MetaId],
    offset: usize,
    enclosing: usize,
) -> Row<Arc<core::Term>> {
    match row {
        Row::Empty => Row::Empty,
        Row::Extend(label, term, rest) => Row::extend(
            *label,
            replace_metas(term, metas, offset, enclosing),
            replace_metas_row(rest, metas, offset, enclosing),
        ),
        Row::Var(RowVar::Meta(meta)) => match metas.iter().position(|m| m == meta) {
            Some(position) if position < enclosing => {
                Row::Var(RowVar::Bound(Index::from_usize(
                    offset + enclosing - 1 - position,
                )))
            }
            _ => Row::Var(RowVar::Meta(*meta)),
        },
        Row::Var(var) => Row::Var(*var),
    }
}
