//! End-to-end elaboration tests, driving surface terms through synthesis,
//! constraint solving, and generalisation.

use quill::core::quantity::Quantity;
use quill::core::semantics::{ArcValue, VBinder, Value};
use quill::core::{self, Binder, Literal, Plicity};
use quill::driver::{elab_script, Elaborated};
use quill::source::ByteRange;
use quill::surface::elaboration::{Constraint, Context, Error};
use quill::surface::{self, PatRowExpr, RowExpr, Statement, Term};
use quill::symbol::Symbol;

fn r() -> ByteRange {
    ByteRange::none()
}

fn sym(name: &str) -> Symbol {
    Symbol::intern(name)
}

fn num(n: f64) -> Term {
    Term::Lit(r(), Literal::Num(n))
}

fn name(n: &str) -> Term {
    Term::Name(r(), sym(n))
}

fn lambda(binder: &str, body: Term) -> Term {
    Term::Lambda {
        range: r(),
        name: sym(binder),
        plicity: Plicity::Explicit,
        ann: None,
        body: Box::new(body),
    }
}

fn app(head: Term, arg: Term) -> Term {
    Term::App {
        range: r(),
        plicity: Plicity::Explicit,
        head: Box::new(head),
        arg: Box::new(arg),
    }
}

fn record(fields: &[(&str, Term)]) -> Term {
    Term::Struct(
        r(),
        RowExpr::closed(
            fields
                .iter()
                .map(|(label, term)| (sym(label), term.clone()))
                .collect(),
        ),
    )
}

fn proj(head: Term, label: &str) -> Term {
    Term::Proj {
        range: r(),
        head: Box::new(head),
        label: sym(label),
    }
}

/// A function type over primitive atoms, evaluated to a value.
fn fun_type(ctx: &mut Context, quantity: Quantity, domain: &'static str, codomain: &'static str) -> ArcValue {
    let term = core::Term::Abs(
        Binder::Pi {
            name: sym("x"),
            plicity: Plicity::Explicit,
            quantity,
            ann: core::Term::atom(domain),
        },
        core::Term::atom(codomain),
    );
    ctx.eval(&term)
}

/// Strip the implicit lambdas added by generalisation.
fn strip_implicit_lambdas(term: &core::Term) -> &core::Term {
    match term {
        core::Term::Abs(
            Binder::Lambda {
                plicity: Plicity::Implicit,
                ..
            },
            body,
        ) => strip_implicit_lambdas(body),
        other => other,
    }
}

/// Strip the implicit function types added by generalisation.
fn strip_implicit_pis(ctx: &Context, r#type: &ArcValue) -> ArcValue {
    match r#type.as_ref() {
        Value::Abs(
            VBinder::Pi {
                plicity: Plicity::Implicit,
                ..
            },
            closure,
        ) => {
            let instantiated = ctx.elim_context().apply_closure(closure, Value::atom("Any"));
            strip_implicit_pis(ctx, &instantiated)
        }
        _ => r#type.clone(),
    }
}

#[test]
fn synth_number_literal() {
    let mut ctx = Context::new();
    let (term, r#type, usages) = ctx.synth(&num(1.0)).unwrap();

    assert!(matches!(term.as_ref(), core::Term::Lit(Literal::Num(n)) if *n == 1.0));
    assert!(r#type.is_atom("Num"));
    assert_eq!(usages.len(), 0);
    assert!(ctx.constraints().is_empty());
}

#[test]
fn synth_constant_lambda() {
    let mut ctx = Context::new();
    let (_, r#type, _) = ctx.synth(&lambda("x", num(1.0))).unwrap();

    // The type is a function out of a fresh metavariable at multiplicity ω.
    match r#type.as_ref() {
        Value::Abs(
            VBinder::Pi {
                quantity,
                ann,
                plicity: Plicity::Explicit,
                ..
            },
            closure,
        ) => {
            assert_eq!(*quantity, Quantity::Many);
            assert!(matches!(
                ann.as_ref(),
                Value::Stuck(quill::core::semantics::Head::Flexible(_), _)
            ));
            let codomain = ctx.elim_context().apply_closure(closure, Value::atom("Any"));
            assert!(codomain.is_atom("Num"));
        }
        other => panic!("expected a function type, found {other:?}"),
    }

    // Exactly one usage constraint: the unused binder against ω.
    let usage_constraints: Vec<_> = ctx
        .constraints()
        .iter()
        .filter_map(|constraint| match constraint {
            Constraint::Usage {
                expected, computed, ..
            } => Some((*expected, *computed)),
            _ => None,
        })
        .collect();
    assert_eq!(usage_constraints, vec![(Quantity::Many, Quantity::Zero)]);
}

#[test]
fn synth_struct_literal() {
    let mut ctx = Context::new();
    let (term, r#type, _) = ctx
        .synth(&record(&[("x", num(1.0)), ("y", num(2.0))]))
        .unwrap();

    match term.as_ref() {
        core::Term::Struct(row) => {
            assert!(matches!(
                row.get(sym("x")).map(|term| term.as_ref()),
                Some(core::Term::Lit(Literal::Num(n))) if *n == 1.0
            ));
            assert!(row.get(sym("y")).is_some());
        }
        other => panic!("expected a struct, found {other:?}"),
    }
    match r#type.as_ref() {
        Value::Schema(row) => {
            assert!(row.get(sym("x")).map_or(false, |ty| ty.is_atom("Num")));
            assert!(row.get(sym("y")).map_or(false, |ty| ty.is_atom("Num")));
        }
        other => panic!("expected a schema, found {other:?}"),
    }

    ctx.solve().unwrap();
}

#[test]
fn synth_struct_projection() {
    let mut ctx = Context::new();
    let (_, r#type, _) = ctx
        .synth(&proj(record(&[("x", num(1.0)), ("y", num(2.0))]), "x"))
        .unwrap();

    assert!(r#type.is_atom("Num"));

    // Projection emits an assign constraint equating the two (identical)
    // schema shapes.
    let schema_assigns = ctx
        .constraints()
        .iter()
        .filter(|constraint| match constraint {
            Constraint::Assign { lhs, rhs, .. } => {
                matches!(lhs.as_ref(), Value::Schema(_))
                    && matches!(rhs.as_ref(), Value::Schema(_))
            }
            _ => false,
        })
        .count();
    assert_eq!(schema_assigns, 1);

    ctx.solve().unwrap();
}

#[test]
fn recursive_let_wraps_binder_in_mu() {
    let mut ctx = Context::new();
    let statement = Statement::Let {
        range: r(),
        name: sym("f"),
        ann: None,
        value: lambda("x", app(name("f"), name("x"))),
    };
    let output = elab_script(&mut ctx, &[statement]);

    assert_eq!(output.len(), 1);
    assert_eq!(output[0].0, Some(sym("f")));
    match output[0].1.as_ref().unwrap() {
        Elaborated::Let { term, r#type, .. } => {
            let inner = strip_implicit_lambdas(term);
            assert!(matches!(
                inner,
                core::Term::Abs(Binder::Mu { source, .. }, _) if *source == sym("f")
            ));
            let r#type = strip_implicit_pis(&ctx, r#type);
            assert!(matches!(
                r#type.as_ref(),
                Value::Abs(
                    VBinder::Pi {
                        plicity: Plicity::Explicit,
                        quantity: Quantity::Many,
                        ..
                    },
                    _,
                )
            ));
        }
        other => panic!("expected a let, found {other:?}"),
    }

    // The definition is visible to later statements.
    assert!(ctx.imports().contains_key(&sym("f")));
}

#[test]
fn check_lambda_with_unbound_head_fails() {
    let mut ctx = Context::new();
    let expected = fun_type(&mut ctx, Quantity::Many, "Num", "Num");
    let error = ctx
        .check(&lambda("x", app(name("g"), name("x"))), &expected)
        .unwrap_err();

    match error {
        Error::UnboundVariable {
            name, ..
        } => assert_eq!(name, sym("g")),
        other => panic!("expected an unbound variable error, found {other:?}"),
    }
}

#[test]
fn unused_linear_binder_is_rejected() {
    let mut ctx = Context::new();
    let expected = fun_type(&mut ctx, Quantity::One, "Num", "Num");
    ctx.check(&lambda("x", num(1.0)), &expected).unwrap();

    match ctx.solve().unwrap_err() {
        Error::UsageViolation {
            expected, computed, ..
        } => {
            assert_eq!(expected, Quantity::One);
            assert_eq!(computed, Quantity::Zero);
        }
        other => panic!("expected a usage violation, found {other:?}"),
    }
}

#[test]
fn linear_identity_is_accepted() {
    let mut ctx = Context::new();
    let expected = fun_type(&mut ctx, Quantity::One, "Num", "Num");
    ctx.check(&lambda("x", name("x")), &expected).unwrap();
    ctx.solve().unwrap();
}

#[test]
fn builtin_application_has_numeric_type() {
    let mut ctx = Context::new();
    let expr = Statement::Expr(app(app(name("$add"), num(1.0)), num(2.0)));
    let output = elab_script(&mut ctx, &[expr]);

    match output[0].1.as_ref().unwrap() {
        Elaborated::Expr { r#type, .. } => assert!(r#type.is_atom("Num")),
        other => panic!("expected an expression, found {other:?}"),
    }
}

#[test]
fn using_statement_resolves_implicit_arguments() {
    let mut ctx = Context::new();

    // let fallback : Num = 42
    let fallback = Statement::Let {
        range: r(),
        name: sym("fallback"),
        ann: Some(name("Num")),
        value: num(42.0),
    };
    // using fallback
    let using = Statement::Using {
        range: r(),
        value: name("fallback"),
    };
    // let poly : {d : Num} -> Num = \{d} => d
    let poly = Statement::Let {
        range: r(),
        name: sym("poly"),
        ann: Some(Term::Pi {
            range: r(),
            name: sym("d"),
            plicity: Plicity::Implicit,
            quantity: None,
            domain: Box::new(name("Num")),
            codomain: Box::new(name("Num")),
        }),
        value: Term::Lambda {
            range: r(),
            name: sym("d"),
            plicity: Plicity::Implicit,
            ann: None,
            body: Box::new(name("d")),
        },
    };
    // poly : Num — forces the implicit to be resolved from the table
    let expr = Statement::Expr(Term::Ann(
        r(),
        Box::new(name("poly")),
        Box::new(name("Num")),
    ));

    let output = elab_script(&mut ctx, &[fallback, using, poly, expr]);
    for (name, result) in &output {
        assert!(result.is_ok(), "statement {name:?} failed: {result:?}");
    }

    match output[3].1.as_ref().unwrap() {
        Elaborated::Expr { term, r#type, .. } => {
            assert!(r#type.is_atom("Num"));
            // The instance registered by `using` was applied implicitly.
            fn mentions_fallback(term: &core::Term) -> bool {
                match term {
                    core::Term::Var(core::Var::Free(name)) => *name == Symbol::intern("fallback"),
                    core::Term::App(_, head, arg) => {
                        mentions_fallback(head) || mentions_fallback(arg)
                    }
                    _ => false,
                }
            }
            assert!(mentions_fallback(term));
        }
        other => panic!("expected an expression, found {other:?}"),
    }
}

#[test]
fn match_on_tagged_value() {
    let mut ctx = Context::new();
    let scrutinee = Term::Tagged {
        range: r(),
        tag: sym("some"),
        term: Box::new(num(1.0)),
    };
    let alternatives = vec![
        surface::Alternative {
            pattern: surface::Pattern::Variant(
                r(),
                PatRowExpr {
                    fields: vec![(sym("some"), surface::Pattern::Name(r(), sym("n")))],
                    rest: None,
                },
            ),
            term: name("n"),
        },
        surface::Alternative {
            pattern: surface::Pattern::Wildcard(r()),
            term: num(0.0),
        },
    ];
    let expr = Statement::Expr(Term::Match {
        range: r(),
        scrutinee: Box::new(scrutinee),
        alternatives,
    });

    let output = elab_script(&mut ctx, &[expr]);
    match output[0].1.as_ref().unwrap() {
        Elaborated::Expr { r#type, .. } => {
            let r#type = strip_implicit_pis(&ctx, r#type);
            assert!(r#type.is_atom("Num"));
        }
        other => panic!("expected an expression, found {other:?}"),
    }
}

#[test]
fn block_let_scopes_usages() {
    let mut ctx = Context::new();
    let block = Term::Block {
        range: r(),
        statements: vec![Statement::Let {
            range: r(),
            name: sym("y"),
            ann: None,
            value: num(1.0),
        }],
        ret: Some(Box::new(name("y"))),
    };

    let (_, r#type, usages) = ctx.synth(&block).unwrap();
    // Usages for block-local bindings are dropped: only variables visible
    // before the block remain.
    assert_eq!(usages.len(), 0);
    ctx.solve().unwrap();
    let forced = ctx.force(&r#type);
    assert!(forced.is_atom("Num"));
}

#[test]
fn foreign_statement_registers_import() {
    let mut ctx = Context::new();
    let foreign = Statement::Foreign {
        range: r(),
        name: sym("print"),
        ann: Term::Arrow(r(), Box::new(name("String")), Box::new(name("Unit"))),
    };
    let expr = Statement::Expr(app(
        name("print"),
        Term::Lit(r(), Literal::Str(sym("hello"))),
    ));

    let output = elab_script(&mut ctx, &[foreign, expr]);
    assert!(output[0].1.is_ok());
    match output[1].1.as_ref().unwrap() {
        Elaborated::Expr { r#type, .. } => assert!(r#type.is_atom("Unit")),
        other => panic!("expected an expression, found {other:?}"),
    }
}

#[test]
fn failed_statement_does_not_stop_the_script() {
    let mut ctx = Context::new();
    let bad = Statement::Let {
        range: r(),
        name: sym("bad"),
        ann: None,
        value: name("missing"),
    };
    let good = Statement::Let {
        range: r(),
        name: sym("good"),
        ann: None,
        value: num(1.0),
    };

    let output = elab_script(&mut ctx, &[bad, good]);
    assert!(matches!(
        output[0].1,
        Err(Error::UnboundVariable { name, .. }) if name == sym("missing")
    ));
    assert!(output[1].1.is_ok());
    assert!(ctx.imports().contains_key(&sym("good")));
    assert!(!ctx.imports().contains_key(&sym("bad")));
}

#[test]
fn unbound_variable_suggests_close_name() {
    let ctx = Context::new();
    let error = ctx.lookup(r(), sym("Nom")).unwrap_err();
    match error {
        Error::UnboundVariable { suggestion, .. } => {
            assert_eq!(suggestion, Some(sym("Num")));
        }
        other => panic!("expected an unbound variable error, found {other:?}"),
    }
}

#[test]
fn list_literals_are_a_typed_error() {
    let mut ctx = Context::new();
    let error = ctx.synth(&Term::List(r(), vec![num(1.0)])).unwrap_err();
    assert!(matches!(error, Error::NotImplemented { .. }));
}
