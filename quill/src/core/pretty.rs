//! A pretty printer for the core language.
//!
//! This is mainly used to render the two sides of a failed constraint in
//! diagnostics, so it favours brevity over round-tripping.

use pretty::RcDoc;

use crate::core::quantity::Quantity;
use crate::core::{Binder, Literal, Pattern, Plicity, Row, RowVar, Statement, Term, Var};
use crate::symbol::Symbol;

/// Term precedences
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Top = 0,
    Fun,
    App,
    Atomic,
}

pub struct Context {
    /// Names of the binders passed on the way down, for printing bound
    /// variables.
    names: Vec<Symbol>,
}

impl Context {
    pub fn new() -> Context {
        Context { names: Vec::new() }
    }

    pub fn term(&mut self, term: &Term) -> RcDoc<'static> {
        self.term_prec(Prec::Top, term)
    }

    /// Render a term to a string at the given width.
    pub fn render(term: &Term, width: usize) -> String {
        let mut context = Context::new();
        let doc = context.term(term);
        let mut out = String::new();
        doc.render_fmt(width, &mut out).unwrap_or_default();
        out
    }

    fn term_prec(&mut self, prec: Prec, term: &Term) -> RcDoc<'static> {
        match term {
            Term::Lit(literal) => self.literal(literal),
            Term::Var(var) => self.var(var),
            Term::Abs(Binder::Lambda { name, plicity, .. }, body) => {
                self.names.push(*name);
                let body = self.term_prec(Prec::Top, body);
                self.names.pop();
                paren(
                    prec > Prec::Fun,
                    RcDoc::text("fun ")
                        .append(binder_name(*name, *plicity))
                        .append(RcDoc::text(" => "))
                        .append(body),
                )
            }
            Term::Abs(
                Binder::Pi {
                    name,
                    plicity,
                    quantity,
                    ann,
                },
                body,
            ) => {
                let ann = self.term_prec(Prec::Top, ann);
                self.names.push(*name);
                let body = self.term_prec(Prec::Fun, body);
                self.names.pop();
                let quantity = match quantity {
                    Quantity::Many => RcDoc::nil(),
                    quantity => RcDoc::text(format!("{quantity} ")),
                };
                let domain = match plicity {
                    Plicity::Explicit => RcDoc::text("(")
                        .append(RcDoc::text(name.to_string()))
                        .append(RcDoc::text(" : "))
                        .append(quantity)
                        .append(ann)
                        .append(RcDoc::text(")")),
                    Plicity::Implicit => RcDoc::text("{")
                        .append(RcDoc::text(name.to_string()))
                        .append(RcDoc::text(" : "))
                        .append(quantity)
                        .append(ann)
                        .append(RcDoc::text("}")),
                };
                paren(
                    prec > Prec::Fun,
                    domain.append(RcDoc::text(" -> ")).append(body),
                )
            }
            Term::Abs(Binder::Mu { name, .. }, body) => {
                self.names.push(*name);
                let body = self.term_prec(Prec::Top, body);
                self.names.pop();
                paren(
                    prec > Prec::Fun,
                    RcDoc::text("mu ")
                        .append(RcDoc::text(name.to_string()))
                        .append(RcDoc::text(" => "))
                        .append(body),
                )
            }
            Term::App(plicity, head, arg) => {
                let head = self.term_prec(Prec::App, head);
                let arg = self.term_prec(Prec::Atomic, arg);
                let arg = match plicity {
                    Plicity::Explicit => arg,
                    Plicity::Implicit => RcDoc::text("{").append(arg).append(RcDoc::text("}")),
                };
                paren(prec > Prec::App, head.append(RcDoc::space()).append(arg))
            }
            Term::Row(row) => self.row(row, "[", "]", ": "),
            Term::Struct(row) => self.row(row, "{", "}", " = "),
            Term::Schema(row) => self.row(row, "{", "}", " : "),
            Term::Variant(row) => self.row(row, "[|", "|]", " : "),
            Term::Proj(label, head) => {
                let head = self.term_prec(Prec::Atomic, head);
                head.append(RcDoc::text(format!(".{label}")))
            }
            Term::Inj(label, value, head) => {
                let head = self.term_prec(Prec::Atomic, head);
                let value = self.term_prec(Prec::Top, value);
                head.append(RcDoc::text(format!(" with {label} = ")))
                    .append(value)
            }
            Term::Ann(term, r#type) => {
                let term = self.term_prec(Prec::App, term);
                let r#type = self.term_prec(Prec::App, r#type);
                paren(
                    prec > Prec::Top,
                    term.append(RcDoc::text(" : ")).append(r#type),
                )
            }
            Term::Match(scrutinee, alternatives) => {
                let scrutinee = self.term_prec(Prec::Atomic, scrutinee);
                let alternatives =
                    RcDoc::intersperse(
                        alternatives.iter().map(|alternative| {
                            let binders = alternative.pattern.binders();
                            let pattern = self.pattern(&alternative.pattern);
                            self.names.extend(binders.iter().copied());
                            let term = self.term_prec(Prec::Top, &alternative.term);
                            self.names.truncate(self.names.len() - binders.len());
                            pattern.append(RcDoc::text(" => ")).append(term)
                        }),
                        RcDoc::text(", "),
                    );
                RcDoc::text("match ")
                    .append(scrutinee)
                    .append(RcDoc::text(" { "))
                    .append(alternatives)
                    .append(RcDoc::text(" }"))
            }
            Term::Block(statements, ret) => {
                let mut bound = 0;
                let statements: Vec<_> = statements
                    .iter()
                    .map(|statement| match statement {
                        Statement::Let { name, term } => {
                            let term = self.term_prec(Prec::Top, term);
                            self.names.push(*name);
                            bound += 1;
                            RcDoc::text(format!("let {name} = ")).append(term)
                        }
                        Statement::Expr(term) => self.term_prec(Prec::Top, term),
                    })
                    .collect();
                let ret = self.term_prec(Prec::Top, ret);
                self.names.truncate(self.names.len() - bound);
                RcDoc::text("{ ")
                    .append(RcDoc::intersperse(statements, RcDoc::text("; ")))
                    .append(RcDoc::text("; "))
                    .append(ret)
                    .append(RcDoc::text(" }"))
            }
            Term::Modal(term, modalities) => {
                let term = self.term_prec(Prec::Atomic, term);
                term.append(RcDoc::text(format!(" ^{}", modalities.quantity)))
            }
        }
    }

    fn literal(&mut self, literal: &Literal) -> RcDoc<'static> {
        match literal {
            Literal::Num(n) if n.fract() == 0.0 && n.is_finite() => {
                RcDoc::text(format!("{}", *n as i64))
            }
            Literal::Num(n) => RcDoc::text(format!("{n}")),
            Literal::Str(s) => RcDoc::text(format!("\"{s}\"")),
            Literal::Bool(b) => RcDoc::text(format!("{b}")),
            Literal::Unit => RcDoc::text("unit"),
            Literal::Atom(name) => RcDoc::text(name.to_string()),
        }
    }

    fn var(&mut self, var: &Var) -> RcDoc<'static> {
        match var {
            Var::Bound(index) => match self.names.iter().rev().nth(index.to_usize()) {
                Some(name) => RcDoc::text(name.to_string()),
                None => RcDoc::text(format!("${}", index.to_usize())),
            },
            Var::Free(name) => RcDoc::text(name.to_string()),
            Var::Meta(meta) => RcDoc::text(format!("{meta}")),
            Var::Foreign(name) => RcDoc::text(name.to_string()),
            Var::Label(name) => RcDoc::text(format!("'{name}")),
        }
    }

    fn row(
        &mut self,
        row: &Row<std::sync::Arc<Term>>,
        open: &'static str,
        close: &'static str,
        sep: &'static str,
    ) -> RcDoc<'static> {
        let fields = RcDoc::intersperse(
            row.fields().map(|(label, term)| {
                RcDoc::text(label.to_string())
                    .append(RcDoc::text(sep))
                    .append(self.term_prec(Prec::Top, term))
            }),
            RcDoc::text(", "),
        );
        let tail = match row.tail_var() {
            None => RcDoc::nil(),
            Some(RowVar::Meta(meta)) => RcDoc::text(format!(" | {meta}")),
            Some(RowVar::Bound(index)) => match self.names.iter().rev().nth(index.to_usize()) {
                Some(name) => RcDoc::text(format!(" | {name}")),
                None => RcDoc::text(format!(" | ${}", index.to_usize())),
            },
            Some(RowVar::Rigid(level)) => RcDoc::text(format!(" | #{}", level.to_usize())),
        };
        RcDoc::text(open)
            .append(RcDoc::space())
            .append(fields)
            .append(tail)
            .append(RcDoc::space())
            .append(RcDoc::text(close))
    }

    fn pattern(&mut self, pattern: &Pattern) -> RcDoc<'static> {
        match pattern {
            Pattern::Wildcard => RcDoc::text("_"),
            Pattern::Binder(name) => RcDoc::text(name.to_string()),
            Pattern::Lit(literal) => self.literal(literal),
            Pattern::Named(name) => RcDoc::text(name.to_string()),
            Pattern::Struct(row) | Pattern::Row(row) => self.pattern_row(row, "{", "}"),
            Pattern::Variant(row) => self.pattern_row(row, "[|", "|]"),
        }
    }

    fn pattern_row(
        &mut self,
        row: &crate::core::PatRow,
        open: &'static str,
        close: &'static str,
    ) -> RcDoc<'static> {
        let fields = RcDoc::intersperse(
            row.fields.iter().map(|(label, pattern)| {
                RcDoc::text(format!("{label}: ")).append(self.pattern(pattern))
            }),
            RcDoc::text(", "),
        );
        let rest = match row.rest {
            Some(name) => RcDoc::text(format!(" | {name}")),
            None => RcDoc::nil(),
        };
        RcDoc::text(open)
            .append(fields)
            .append(rest)
            .append(RcDoc::text(close))
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

fn binder_name(name: Symbol, plicity: Plicity) -> RcDoc<'static> {
    match plicity {
        Plicity::Explicit => RcDoc::text(name.to_string()),
        Plicity::Implicit => RcDoc::text(format!("{{{name}}}")),
    }
}

fn paren(wrap: bool, doc: RcDoc<'static>) -> RcDoc<'static> {
    if wrap {
        RcDoc::text("(").append(doc).append(RcDoc::text(")"))
    } else {
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MetaId;
    use crate::env::Index;
    use std::sync::Arc;

    #[test]
    fn renders_pi_types() {
        let pi = Term::Abs(
            Binder::Pi {
                name: Symbol::intern("x"),
                plicity: Plicity::Explicit,
                quantity: Quantity::Many,
                ann: Term::meta(MetaId::from_usize(0)),
            },
            Term::atom("Num"),
        );
        assert_eq!(Context::render(&pi, 80), "(x : ?0) -> Num");
    }

    #[test]
    fn renders_bound_names() {
        let lambda = Term::Abs(
            Binder::Lambda {
                name: Symbol::intern("x"),
                plicity: Plicity::Explicit,
                ann: Term::atom("Num"),
            },
            Term::bound(Index::last()),
        );
        assert_eq!(Context::render(&lambda, 80), "fun x => x");
    }
}
