//! Elaboration of the surface language into the core language.
//!
//! This module is where user-facing type checking happens, along with
//! translating the surface language into the fully explicit core language.
//!
//! The algorithm is structured _bidirectionally_: divided into _checking_
//! and _synthesis_ modes. Where bidirectional rules are not enough,
//! unification constraints are emitted and solved once the enclosing
//! statement has been elaborated, filling in metavariables based on how
//! they were used.
//!
//! Alongside every elaborated term, a usage vector is computed recording how
//! many times each variable in scope was consumed, checked against the
//! declared multiplicities by the constraint solver.

use std::sync::Arc;

use fxhash::FxHashMap;

use crate::core::quantity::{Quantity, Usages};
use crate::core::semantics::{
    ArcValue, Closure, ElimContext, EvalContext, ForeignDef, Globals, ImportEntry, QuoteContext,
    SigmaEntry, VBinder, Value,
};
use crate::core::{self, prim, Binder, Literal, MetaId, Modalities, Plicity, Row, RowVar, Var};
use crate::env::{indices, EnvLen, Index, SharedEnv, UniqueEnv};
use crate::source::ByteRange;
use crate::surface::{self, RowExpr, Statement, Term};
use crate::symbol::Symbol;

pub mod implicits;
pub mod patterns;
pub mod reporting;
pub mod unification;

use unification::Substitution;

/// How a binder entered the context.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Written in the source program.
    Source,
    /// Inserted by the elaborator while resolving implicit arguments.
    Inserted,
}

/// The metavariable supply: an environment of annotations whose length is
/// the next fresh id. Carried in the context rather than process-global, so
/// elaboration runs are reproducible.
#[derive(Debug, Default)]
pub struct MetaEnv {
    anns: Vec<ArcValue>,
}

impl MetaEnv {
    pub fn new() -> MetaEnv {
        MetaEnv { anns: Vec::new() }
    }

    /// Allocate a fresh metavariable with the given type annotation.
    pub fn fresh(&mut self, ann: ArcValue) -> MetaId {
        let meta = MetaId::from_usize(self.anns.len());
        self.anns.push(ann);
        meta
    }

    pub fn ann(&self, meta: MetaId) -> &ArcValue {
        &self.anns[meta.to_usize()]
    }

    pub fn len(&self) -> usize {
        self.anns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anns.is_empty()
    }
}

/// Where a constraint came from, carried through to diagnostics.
#[derive(Debug, Copy, Clone)]
pub struct Provenance {
    pub range: ByteRange,
    pub task: &'static str,
}

/// Constraints emitted during elaboration, solved in emission order once
/// the enclosing statement has been elaborated.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Equate two types.
    Assign {
        lhs: ArcValue,
        rhs: ArcValue,
        len: EnvLen,
        provenance: Provenance,
    },
    /// Check a computed usage against a declared multiplicity.
    Usage {
        name: Symbol,
        expected: Quantity,
        computed: Quantity,
        range: ByteRange,
    },
    /// Resolve an inserted implicit argument against the instance table.
    Resolve {
        meta: MetaId,
        r#type: ArcValue,
        range: ByteRange,
    },
}

/// Structured elaboration failures. These are user errors: they are recorded
/// against the offending statement and the run continues.
#[derive(Debug, Clone)]
pub enum Error {
    UnboundVariable {
        range: ByteRange,
        name: Symbol,
        suggestion: Option<Symbol>,
    },
    UnificationFailure {
        provenance: Provenance,
        lhs: Arc<core::Term>,
        rhs: Arc<core::Term>,
    },
    CyclicSolution {
        provenance: Provenance,
        meta: MetaId,
    },
    MissingLabel {
        provenance: Provenance,
        label: Symbol,
    },
    UsageViolation {
        range: ByteRange,
        name: Symbol,
        expected: Quantity,
        computed: Quantity,
    },
    PlicityMismatch {
        range: ByteRange,
        expected: Plicity,
        found: Plicity,
    },
    NotImplemented {
        range: ByteRange,
        feature: &'static str,
    },
}

/// Elaboration context.
///
/// The local environments behave as a stack: entering a scope pushes one
/// entry onto each of them, leaving it pops. The tables (`imports`, `sigma`,
/// `instances`, metavariable solutions) are append-only and survive the
/// scope they were created in.
pub struct Context {
    /// Names of the local binders.
    names: UniqueEnv<Symbol>,
    /// How each local binder entered the context.
    origins: UniqueEnv<Origin>,
    /// Types of the local binders.
    types: UniqueEnv<ArcValue>,
    /// Declared multiplicities of the local binders.
    quantities: UniqueEnv<Quantity>,
    /// Values substituted for local binders during evaluation.
    exprs: SharedEnv<ArcValue>,
    /// Completed top-level definitions.
    imports: FxHashMap<Symbol, ImportEntry>,
    /// Dependent-record field bindings.
    sigma: FxHashMap<Symbol, SigmaEntry>,
    /// Builtin definitions.
    foreigns: FxHashMap<Symbol, ForeignDef>,
    /// Values registered by `using` statements, scanned when resolving
    /// implicit arguments.
    instances: Vec<(Arc<core::Term>, ArcValue)>,
    /// The metavariable supply.
    metas: MetaEnv,
    /// Solutions for metavariables. Grows monotonically: a solved
    /// metavariable is never rebound.
    zonker: Substitution,
    /// Constraints emitted by the current statement.
    constraints: Vec<Constraint>,
}

impl Context {
    /// Construct an elaboration context with the primitive types and builtin
    /// operations in scope.
    pub fn new() -> Context {
        Context {
            names: UniqueEnv::new(),
            origins: UniqueEnv::new(),
            types: UniqueEnv::new(),
            quantities: UniqueEnv::new(),
            exprs: SharedEnv::new(),
            imports: prim::imports(),
            sigma: FxHashMap::default(),
            foreigns: prim::foreigns(),
            instances: Vec::new(),
            metas: MetaEnv::new(),
            zonker: Substitution::new(),
            constraints: Vec::new(),
        }
    }

    pub fn len(&self) -> EnvLen {
        self.exprs.len()
    }

    pub fn imports(&self) -> &FxHashMap<Symbol, ImportEntry> {
        &self.imports
    }

    pub fn sigma(&self) -> &FxHashMap<Symbol, SigmaEntry> {
        &self.sigma
    }

    pub fn zonker(&self) -> &Substitution {
        &self.zonker
    }

    pub fn metas(&self) -> &MetaEnv {
        &self.metas
    }

    pub(crate) fn register_import(&mut self, name: Symbol, entry: ImportEntry) {
        self.imports.insert(name, entry);
    }

    pub(crate) fn register_instance(&mut self, term: Arc<core::Term>, r#type: ArcValue) {
        self.instances.push((term, r#type));
    }

    pub fn globals(&self) -> Globals<'_> {
        Globals {
            imports: &self.imports,
            sigma: &self.sigma,
            foreigns: &self.foreigns,
            solutions: self.zonker.solutions(),
        }
    }

    pub fn eval(&mut self, term: &core::Term) -> ArcValue {
        let globals = Globals {
            imports: &self.imports,
            sigma: &self.sigma,
            foreigns: &self.foreigns,
            solutions: self.zonker.solutions(),
        };
        EvalContext::new(&mut self.exprs, globals).eval(term)
    }

    pub fn elim_context(&self) -> ElimContext<'_> {
        ElimContext::new(self.globals())
    }

    pub fn force(&self, value: &ArcValue) -> ArcValue {
        self.elim_context().force(value)
    }

    pub fn quote(&self, value: &ArcValue) -> Arc<core::Term> {
        QuoteContext::new(self.len(), self.globals()).quote(value)
    }

    /// Close over a value that mentions the next binder, producing a closure
    /// that instantiates it.
    fn close_value(&self, value: &ArcValue) -> Closure {
        let mut len = self.len();
        len.push();
        let term = QuoteContext::new(len, self.globals()).quote(value);
        Closure::new(self.exprs.clone(), term)
    }

    pub fn fresh_meta(&mut self, ann: ArcValue) -> MetaId {
        self.metas.fresh(ann)
    }

    fn fresh_meta_value(&mut self, ann: ArcValue) -> ArcValue {
        Value::flexible(self.metas.fresh(ann))
    }

    /// A fresh metavariable standing for a type, at a fresh kind.
    fn fresh_type_meta(&mut self) -> ArcValue {
        let kind = self.fresh_meta_value(Value::universe());
        self.fresh_meta_value(kind)
    }

    fn emit(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    fn assign(&mut self, lhs: ArcValue, rhs: ArcValue, range: ByteRange, task: &'static str) {
        let len = self.len();
        self.emit(Constraint::Assign {
            lhs,
            rhs,
            len,
            provenance: Provenance { range, task },
        });
    }

    /// The constraints emitted so far by the current statement.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub(crate) fn drain_constraints(&mut self) -> Vec<Constraint> {
        std::mem::take(&mut self.constraints)
    }

    /// Push a parameter onto the context, returning its rigid value.
    fn push_param(
        &mut self,
        name: Symbol,
        r#type: ArcValue,
        quantity: Quantity,
        origin: Origin,
    ) -> ArcValue {
        let expr = Value::rigid(self.exprs.len().next_level());
        self.names.push(name);
        self.origins.push(origin);
        self.types.push(r#type);
        self.quantities.push(quantity);
        self.exprs.push(expr.clone());
        expr
    }

    fn truncate(&mut self, len: EnvLen) {
        self.names.truncate(len);
        self.origins.truncate(len);
        self.types.truncate(len);
        self.quantities.truncate(len);
        self.exprs.truncate(len);
    }

    /// Run `f` in a nested scope, restoring the environment afterwards even
    /// when elaboration fails partway through.
    fn in_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, Error>) -> Result<T, Error> {
        let len = self.len();
        let result = f(self);
        self.truncate(len);
        result
    }

    /// Lookup a name: local binders innermost-first, then dependent-record
    /// field bindings, then imports, then builtins.
    pub fn lookup(
        &self,
        range: ByteRange,
        name: Symbol,
    ) -> Result<(Arc<core::Term>, ArcValue, Usages), Error> {
        let len = self.len().to_usize();

        let local = Iterator::zip(indices(), self.names.iter().rev())
            .find_map(|(index, n)| (*n == name).then(|| index));
        if let Some(index) = local {
            let r#type = self.types.get_index(index).cloned();
            let quantity = self.quantities.get_index(index).copied();
            if let (Some(r#type), Some(quantity)) = (r#type, quantity) {
                let usages = Usages::one_hot(len, index.to_usize(), quantity);
                return Ok((core::Term::bound(index), r#type, usages));
            }
        }

        if let Some(entry) = self.sigma.get(&name) {
            return Ok((
                core::Term::var(Var::Label(name)),
                entry.ann.clone(),
                Usages::none(len),
            ));
        }

        if let Some(entry) = self.imports.get(&name) {
            let usages = entry.usages.add(&Usages::none(len));
            return Ok((
                core::Term::var(Var::Free(name)),
                entry.r#type.clone(),
                usages,
            ));
        }

        if let Some(def) = self.foreigns.get(&name) {
            return Ok((
                core::Term::var(Var::Foreign(name)),
                def.r#type.clone(),
                Usages::none(len),
            ));
        }

        Err(Error::UnboundVariable {
            range,
            name,
            suggestion: self.suggest(name),
        })
    }

    /// Find the closest name in scope, for "did you mean" diagnostics.
    fn suggest(&self, name: Symbol) -> Option<Symbol> {
        let name = name.resolve();
        (self.names.iter().copied())
            .chain(self.sigma.keys().copied())
            .chain(self.imports.keys().copied())
            .chain(self.foreigns.keys().copied())
            .map(|candidate| (candidate, levenshtein::levenshtein(name, candidate.resolve())))
            .filter(|(_, distance)| *distance <= 2)
            .min_by_key(|(_, distance)| *distance)
            .map(|(candidate, _)| candidate)
    }

    /// Synthesise the type of a surface term.
    pub fn synth(
        &mut self,
        term: &Term,
    ) -> Result<(Arc<core::Term>, ArcValue, Usages), Error> {
        match term {
            Term::Name(range, name) => self.lookup(*range, *name),
            Term::Lit(_, literal) => {
                let r#type = match literal {
                    Literal::Num(_) => Value::atom("Num"),
                    Literal::Str(_) => Value::atom("String"),
                    Literal::Bool(_) => Value::atom("Bool"),
                    Literal::Unit => Value::atom("Unit"),
                    Literal::Atom(_) => Value::universe(),
                };
                let usages = Usages::none(self.len().to_usize());
                Ok((core::Term::lit(*literal), r#type, usages))
            }
            Term::Hole(_) => {
                let r#type = self.fresh_type_meta();
                let meta = self.fresh_meta(r#type.clone());
                let usages = Usages::none(self.len().to_usize());
                Ok((core::Term::meta(meta), r#type, usages))
            }
            Term::Ann(_, subject, ann) => {
                let (ann, _) = self.check(ann, &Value::universe())?;
                let r#type = self.eval(&ann);
                let (subject, usages) = self.check(subject, &r#type)?;
                Ok((subject, r#type, usages))
            }
            Term::Lambda { .. } => self.synth_lambda(term),
            Term::Pi { .. } | Term::Arrow(..) => self.synth_pi(term),
            Term::App { .. } => self.synth_app(term),
            Term::Struct(range, row) => self.synth_struct(*range, row),
            Term::Tuple(range, fields) => {
                let row = tuple_row(fields);
                self.synth_struct(*range, &row)
            }
            Term::Variant(_, _) => {
                let (term, usages) = self.check(term, &Value::universe())?;
                Ok((term, Value::universe(), usages))
            }
            Term::Row(range, row) => self.synth_row(*range, row),
            Term::Tagged { tag, term, .. } => {
                let (term, r#type, usages) = self.synth(term)?;
                let row_var = self.fresh_meta(Value::row_kind());
                let variant = Arc::new(Value::Variant(Row::extend(
                    *tag,
                    r#type,
                    Row::Var(RowVar::Meta(row_var)),
                )));
                let tagged = Arc::new(core::Term::Struct(Row::extend(*tag, term, Row::Empty)));
                Ok((tagged, variant, usages))
            }
            Term::Proj { range, head, label } => {
                let (head, head_type, usages) = self.synth(head)?;
                let r#type = self.synth_proj(*range, &head, *label, &head_type)?;
                Ok((Arc::new(core::Term::Proj(*label, head)), r#type, usages))
            }
            Term::Inj {
                range,
                label,
                value,
                head,
            } => {
                let (value, value_type, value_usages) = self.synth(value)?;
                let (head, head_type, head_usages) = self.synth(head)?;
                let r#type = self.synth_inj(*range, *label, &value_type, &head_type)?;
                Ok((
                    Arc::new(core::Term::Inj(*label, value, head)),
                    r#type,
                    head_usages.add(&value_usages),
                ))
            }
            Term::Match {
                range,
                scrutinee,
                alternatives,
            } => self.synth_match(*range, scrutinee, alternatives),
            Term::Block {
                range: _,
                statements,
                ret,
            } => {
                let (statements, ret, r#type, usages) =
                    self.synth_block(statements, ret.as_deref())?;
                Ok((
                    Arc::new(core::Term::Block(statements, ret)),
                    r#type,
                    usages,
                ))
            }
            Term::Modal {
                range: _,
                term,
                quantity,
                liquid,
            } => {
                let (term, r#type, usages) = self.synth(term)?;
                let liquid = self.elab_liquid(liquid.as_deref())?;
                Ok((
                    Arc::new(core::Term::Modal(
                        term,
                        Modalities {
                            quantity: quantity.unwrap_or(Quantity::Many),
                            liquid,
                        },
                    )),
                    r#type,
                    usages,
                ))
            }
            Term::List(range, _) => Err(Error::NotImplemented {
                range: *range,
                feature: "list literals",
            }),
        }
    }

    fn synth_lambda(
        &mut self,
        term: &Term,
    ) -> Result<(Arc<core::Term>, ArcValue, Usages), Error> {
        let (range, name, plicity, ann, body) = match term {
            Term::Lambda {
                range,
                name,
                plicity,
                ann,
                body,
            } => (*range, *name, *plicity, ann.as_deref(), body.as_ref()),
            _ => unreachable!("synth_lambda on a non-lambda"),
        };

        let ann = match ann {
            Some(ann) => self.check(ann, &Value::universe())?.0,
            None => core::Term::meta(self.fresh_meta(Value::universe())),
        };
        let ann_type = self.eval(&ann);

        let (body, body_type, body_usages) = self.in_scope(|this| {
            this.push_param(name, ann_type.clone(), Quantity::Many, Origin::Source);
            let synthed = this.synth(body)?;
            Ok(implicits::insert(this, synthed, range))
        })?;

        let (head_usage, body_usages) = body_usages.split_innermost();
        self.emit(Constraint::Usage {
            name,
            expected: Quantity::Many,
            computed: head_usage,
            range,
        });

        let pi = Arc::new(Value::Abs(
            VBinder::Pi {
                name,
                plicity,
                quantity: Quantity::Many,
                ann: ann_type,
            },
            self.close_value(&body_type),
        ));
        let term = Arc::new(core::Term::Abs(
            Binder::Lambda { name, plicity, ann },
            body,
        ));
        Ok((term, pi, body_usages))
    }

    fn synth_pi(&mut self, term: &Term) -> Result<(Arc<core::Term>, ArcValue, Usages), Error> {
        let (name, plicity, quantity, domain, codomain) = match term {
            Term::Pi {
                name,
                plicity,
                quantity,
                domain,
                codomain,
                ..
            } => (
                *name,
                *plicity,
                quantity.unwrap_or(Quantity::Many),
                domain.as_ref(),
                codomain.as_ref(),
            ),
            Term::Arrow(_, domain, codomain) => (
                Symbol::intern_static("_"),
                Plicity::Explicit,
                Quantity::Many,
                domain.as_ref(),
                codomain.as_ref(),
            ),
            _ => unreachable!("synth_pi on a non-pi"),
        };

        let (domain, domain_usages) = self.check(domain, &Value::universe())?;
        let domain_type = self.eval(&domain);

        let (codomain, codomain_usages) = self.in_scope(|this| {
            this.push_param(name, domain_type, quantity, Origin::Source);
            this.check(codomain, &Value::universe())
        })?;
        let (_, codomain_usages) = codomain_usages.split_innermost();

        let term = Arc::new(core::Term::Abs(
            Binder::Pi {
                name,
                plicity,
                quantity,
                ann: domain,
            },
            codomain,
        ));
        Ok((
            term,
            Value::universe(),
            domain_usages.add(&codomain_usages),
        ))
    }

    fn synth_app(&mut self, term: &Term) -> Result<(Arc<core::Term>, ArcValue, Usages), Error> {
        let (range, plicity, head, arg) = match term {
            Term::App {
                range,
                plicity,
                head,
                arg,
            } => (*range, *plicity, head.as_ref(), arg.as_ref()),
            _ => unreachable!("synth_app on a non-application"),
        };

        let synthed = self.synth(head)?;
        // Implicit arguments are only auto-inserted in front of explicit
        // applications: an explicitly supplied implicit argument should
        // reach the function unchanged.
        let (head, head_type, head_usages) = match plicity {
            Plicity::Explicit => implicits::insert(self, synthed, range),
            Plicity::Implicit => synthed,
        };

        let (domain, codomain, quantity) = self.match_pi(range, plicity, &head_type)?;
        let (arg, arg_usages) = self.check(arg, &domain)?;
        let arg_value = self.eval(&arg);
        let r#type = self.elim_context().apply_closure(&codomain, arg_value);

        Ok((
            Arc::new(core::Term::App(plicity, head, arg)),
            r#type,
            head_usages.add(&arg_usages.scale(quantity)),
        ))
    }

    /// View a type as a function type of the given plicity, constraining it
    /// to a fresh one when it is not yet known.
    fn match_pi(
        &mut self,
        range: ByteRange,
        plicity: Plicity,
        r#type: &ArcValue,
    ) -> Result<(ArcValue, Closure, Quantity), Error> {
        let forced = self.force(r#type);
        match forced.as_ref() {
            Value::Modal(inner, _) => self.match_pi(range, plicity, inner),
            Value::Abs(
                VBinder::Pi {
                    plicity: pi_plicity,
                    quantity,
                    ann,
                    ..
                },
                closure,
            ) => {
                if *pi_plicity != plicity {
                    return Err(Error::PlicityMismatch {
                        range,
                        expected: *pi_plicity,
                        found: plicity,
                    });
                }
                Ok((ann.clone(), closure.clone(), *quantity))
            }
            _ => {
                let domain = self.fresh_type_meta();
                let kind = self.fresh_meta_value(Value::universe());
                let codomain_meta = self.fresh_meta(kind);
                let closure = Closure::new(self.exprs.clone(), core::Term::meta(codomain_meta));
                let pi = Arc::new(Value::Abs(
                    VBinder::Pi {
                        name: Symbol::intern_static("x"),
                        plicity,
                        quantity: Quantity::Many,
                        ann: domain.clone(),
                    },
                    closure.clone(),
                ));
                self.assign(
                    forced,
                    pi,
                    range,
                    "treating the head of an application as a function",
                );
                Ok((domain, closure, Quantity::Many))
            }
        }
    }

    /// Allocate dependent-record field bindings for every label in the row,
    /// so that later fields can refer to earlier labels by name.
    fn sigma_extract(&mut self, row: &RowExpr) {
        for (label, _) in &row.fields {
            let expr_kind = self.fresh_meta_value(Value::universe());
            let expr = self.fresh_meta_value(expr_kind);
            let ann_kind = self.fresh_meta_value(Value::universe());
            let ann = self.fresh_meta_value(ann_kind);
            self.sigma.insert(*label, SigmaEntry { expr, ann });
        }
    }

    fn synth_struct(
        &mut self,
        range: ByteRange,
        row: &RowExpr,
    ) -> Result<(Arc<core::Term>, ArcValue, Usages), Error> {
        self.sigma_extract(row);

        let mut usages = Usages::none(self.len().to_usize());
        let mut term_fields = Vec::new();
        let mut type_fields = Vec::new();
        for (label, field) in &row.fields {
            let (term, r#type, field_usages) = self.synth(field)?;
            let value = self.eval(&term);
            let entry = self.sigma[label].clone();
            self.assign(value, entry.expr, field.range(), "binding a record field");
            self.assign(
                r#type.clone(),
                entry.ann,
                field.range(),
                "binding a record field type",
            );
            term_fields.push((*label, term));
            type_fields.push((*label, r#type));
            usages = usages.add(&field_usages);
        }

        let tail = match &row.tail {
            None => {
                let term = Row::from_fields(term_fields, Row::Empty);
                let r#type = Row::from_fields(type_fields, Row::Empty);
                return Ok((
                    Arc::new(core::Term::Struct(term)),
                    Arc::new(Value::Schema(r#type)),
                    usages,
                ));
            }
            Some(tail) => tail,
        };

        let (tail_term, tail_type, _) = self.lookup(tail.0, tail.1)?;
        let tail_var = match tail_term.as_ref() {
            core::Term::Var(Var::Bound(index)) => RowVar::Bound(*index),
            core::Term::Var(Var::Meta(meta)) => RowVar::Meta(*meta),
            _ => {
                return Err(Error::NotImplemented {
                    range: tail.0,
                    feature: "non-variable row tails",
                })
            }
        };

        let forced = self.force(&tail_type);
        match forced.as_ref() {
            // A row-kinded tail: the struct literal denotes a record type.
            value if value.is_atom("Row") => {
                let term = Row::from_fields(term_fields, Row::Var(tail_var));
                Ok((
                    Arc::new(core::Term::Schema(term)),
                    Value::universe(),
                    usages,
                ))
            }
            Value::Schema(tail_row) => {
                let term = Row::from_fields(term_fields, Row::Var(tail_var));
                let r#type = Row::from_fields(type_fields, tail_row.clone());
                Ok((
                    Arc::new(core::Term::Struct(term)),
                    Arc::new(Value::Schema(r#type)),
                    usages,
                ))
            }
            Value::Stuck(_, _) => {
                let row_meta = self.fresh_meta(Value::row_kind());
                let schema = Arc::new(Value::Schema(Row::Var(RowVar::Meta(row_meta))));
                self.assign(
                    forced.clone(),
                    schema,
                    range,
                    "constraining a record tail to a record type",
                );
                let term = Row::from_fields(term_fields, Row::Var(tail_var));
                let r#type = Row::from_fields(type_fields, Row::Var(RowVar::Meta(row_meta)));
                Ok((
                    Arc::new(core::Term::Struct(term)),
                    Arc::new(Value::Schema(r#type)),
                    usages,
                ))
            }
            _ => Err(Error::NotImplemented {
                range: tail.0,
                feature: "struct tails that are neither records nor rows",
            }),
        }
    }

    fn synth_row(
        &mut self,
        range: ByteRange,
        row: &RowExpr,
    ) -> Result<(Arc<core::Term>, ArcValue, Usages), Error> {
        if row.tail.is_some() {
            return Err(Error::NotImplemented {
                range,
                feature: "row literals with tails",
            });
        }
        self.sigma_extract(row);

        let mut usages = Usages::none(self.len().to_usize());
        let mut fields = Vec::new();
        for (label, field) in &row.fields {
            let (term, r#type, field_usages) = self.synth(field)?;
            let value = self.eval(&term);
            let entry = self.sigma[label].clone();
            self.assign(value, entry.expr, field.range(), "binding a row field");
            self.assign(
                r#type,
                entry.ann,
                field.range(),
                "binding a row field type",
            );
            fields.push((*label, term));
            usages = usages.add(&field_usages);
        }

        Ok((
            Arc::new(core::Term::Row(Row::from_fields(fields, Row::Empty))),
            Value::row_kind(),
            usages,
        ))
    }

    fn synth_proj(
        &mut self,
        range: ByteRange,
        _head: &Arc<core::Term>,
        label: Symbol,
        head_type: &ArcValue,
    ) -> Result<ArcValue, Error> {
        let forced = self.force(head_type);
        match forced.as_ref() {
            Value::Modal(inner, _) => self.synth_proj(range, _head, label, inner),
            Value::Schema(row) => match row.rewrite(label) {
                Some((field_type, rest)) => {
                    let rewritten =
                        Arc::new(Value::Schema(Row::extend(label, field_type.clone(), rest)));
                    self.assign(rewritten, forced.clone(), range, "projecting a record field");
                    Ok(field_type)
                }
                None if row.tail_var().is_some() => {
                    let tail = match row.tail_var() {
                        Some(tail) => tail,
                        None => unreachable!("guarded by `tail_var().is_some()`"),
                    };
                    let kind = self.fresh_meta_value(Value::universe());
                    let field_type = self.fresh_meta_value(kind);
                    let extended = Arc::new(Value::Schema(Row::from_fields(
                        row.fields().map(|(label, value)| (label, value.clone())),
                        Row::extend(label, field_type.clone(), Row::Var(tail)),
                    )));
                    self.assign(
                        extended,
                        forced.clone(),
                        range,
                        "projecting a field hidden behind a row tail",
                    );
                    Ok(field_type)
                }
                None => Err(Error::MissingLabel {
                    provenance: Provenance {
                        range,
                        task: "projecting a record field",
                    },
                    label,
                }),
            },
            // The head type is not yet known to be a record: constrain it to
            // an open one containing the label.
            _ => {
                let kind = self.fresh_meta_value(Value::universe());
                let field_type = self.fresh_meta_value(kind);
                let row_meta = self.fresh_meta(Value::row_kind());
                let schema = Arc::new(Value::Schema(Row::extend(
                    label,
                    field_type.clone(),
                    Row::Var(RowVar::Meta(row_meta)),
                )));
                self.assign(schema, forced, range, "projecting a record field");
                Ok(field_type)
            }
        }
    }

    fn synth_inj(
        &mut self,
        range: ByteRange,
        label: Symbol,
        value_type: &ArcValue,
        head_type: &ArcValue,
    ) -> Result<ArcValue, Error> {
        let forced = self.force(head_type);
        match forced.as_ref() {
            Value::Modal(inner, _) => self.synth_inj(range, label, value_type, inner),
            Value::Schema(row) => Ok(Arc::new(Value::Schema(
                row.set(label, value_type.clone()),
            ))),
            Value::Variant(row) => Ok(Arc::new(Value::Variant(
                row.set(label, value_type.clone()),
            ))),
            Value::Row(row) => Ok(Arc::new(Value::Row(row.set(label, value_type.clone())))),
            _ => {
                let row_meta = self.fresh_meta(Value::row_kind());
                let schema = Arc::new(Value::Schema(Row::Var(RowVar::Meta(row_meta))));
                self.assign(
                    schema,
                    forced,
                    range,
                    "injecting a field into a record",
                );
                Ok(Arc::new(Value::Schema(Row::extend(
                    label,
                    value_type.clone(),
                    Row::Var(RowVar::Meta(row_meta)),
                ))))
            }
        }
    }

    fn synth_match(
        &mut self,
        _range: ByteRange,
        scrutinee: &Term,
        alternatives: &[surface::Alternative],
    ) -> Result<(Arc<core::Term>, ArcValue, Usages), Error> {
        let (scrutinee_term, scrutinee_type, scrutinee_usages) = self.synth(scrutinee)?;
        let result_type = self.fresh_type_meta();

        let mut alts = Vec::new();
        for alternative in alternatives {
            let (pattern, pattern_type, binders) = self.synth_pattern(&alternative.pattern)?;
            self.assign(
                pattern_type,
                scrutinee_type.clone(),
                alternative.pattern.range(),
                "matching a pattern against the scrutinee type",
            );
            let (term, r#type, _) = self.in_scope(|this| {
                for (name, r#type) in &binders {
                    this.push_param(*name, r#type.clone(), Quantity::Many, Origin::Source);
                }
                this.synth(&alternative.term)
            })?;
            self.assign(
                r#type,
                result_type.clone(),
                alternative.term.range(),
                "unifying the types of match alternatives",
            );
            alts.push(core::Alternative { pattern, term });
        }

        Ok((
            Arc::new(core::Term::Match(scrutinee_term, alts)),
            result_type,
            scrutinee_usages,
        ))
    }

    fn synth_block(
        &mut self,
        statements: &[Statement],
        ret: Option<&Term>,
    ) -> Result<(Vec<core::Statement>, Arc<core::Term>, ArcValue, Usages), Error> {
        let (statement, rest) = match statements.split_first() {
            None => {
                return match ret {
                    Some(term) => {
                        let (term, r#type, usages) = self.synth(term)?;
                        Ok((Vec::new(), term, r#type, usages))
                    }
                    None => Ok((
                        Vec::new(),
                        core::Term::lit(Literal::Unit),
                        Value::atom("Unit"),
                        Usages::none(self.len().to_usize()),
                    )),
                };
            }
            Some(parts) => parts,
        };

        match statement {
            Statement::Let {
                range,
                name,
                ann,
                value,
            } => {
                let (term, r#type, value_usages) =
                    self.synth_let(*range, *name, ann.as_ref(), value)?;
                let (mut rest_statements, ret_term, ret_type, rest_usages) =
                    self.in_scope(|this| {
                        this.push_param(*name, r#type, Quantity::Many, Origin::Source);
                        this.synth_block(rest, ret)
                    })?;
                let (binder_usage, rest_usages) = rest_usages.split_innermost();
                self.emit(Constraint::Usage {
                    name: *name,
                    expected: Quantity::Many,
                    computed: binder_usage,
                    range: *range,
                });
                rest_statements.insert(0, core::Statement::Let { name: *name, term });
                Ok((
                    rest_statements,
                    ret_term,
                    ret_type,
                    rest_usages.add(&value_usages.scale(Quantity::Many)),
                ))
            }
            Statement::Expr(term) => {
                let (term, _, _) = self.synth(term)?;
                let (mut rest_statements, ret_term, ret_type, rest_usages) =
                    self.synth_block(rest, ret)?;
                rest_statements.insert(0, core::Statement::Expr(term));
                Ok((rest_statements, ret_term, ret_type, rest_usages))
            }
            Statement::Using { range, .. } | Statement::Foreign { range, .. } => {
                Err(Error::NotImplemented {
                    range: *range,
                    feature: "`using` and `foreign` statements inside blocks",
                })
            }
        }
    }

    /// Elaborate a `let` definition: check the value against its (possibly
    /// metavariable) annotation, and wrap the binder in `Mu` when the
    /// definition refers to itself.
    pub(crate) fn synth_let(
        &mut self,
        _range: ByteRange,
        name: Symbol,
        ann: Option<&Term>,
        value: &Term,
    ) -> Result<(Arc<core::Term>, ArcValue, Usages), Error> {
        let ann = match ann {
            Some(ann) => self.check(ann, &Value::universe())?.0,
            None => core::Term::meta(self.fresh_meta(Value::universe())),
        };
        let r#type = self.eval(&ann);

        let (term, usages) = self.in_scope(|this| {
            this.push_param(name, r#type.clone(), Quantity::Many, Origin::Source);
            this.check(value, &r#type)
        })?;
        let (_, usages) = usages.split_innermost();

        let term = if term.binds_local(Index::last()) {
            Arc::new(core::Term::Abs(
                Binder::Mu {
                    name: Symbol::intern_static("x"),
                    source: name,
                    ann,
                },
                term,
            ))
        } else {
            term
        };
        Ok((term, r#type, usages))
    }

    fn elab_liquid(&mut self, liquid: Option<&Term>) -> Result<Option<Arc<core::Term>>, Error> {
        match liquid {
            None => Ok(None),
            Some(liquid) => {
                let (term, _) = self.check(liquid, &Value::atom("Bool"))?;
                Ok(Some(term))
            }
        }
    }

    /// Check a surface term against an expected type.
    pub fn check(
        &mut self,
        term: &Term,
        expected: &ArcValue,
    ) -> Result<(Arc<core::Term>, Usages), Error> {
        let expected = self.force(expected);

        match (term, expected.as_ref()) {
            (Term::Hole(_), _) => {
                let meta = self.fresh_meta(expected.clone());
                Ok((
                    core::Term::meta(meta),
                    Usages::none(self.len().to_usize()),
                ))
            }
            (
                Term::Lambda {
                    range,
                    name,
                    plicity,
                    ann,
                    body,
                },
                Value::Abs(
                    VBinder::Pi {
                        plicity: pi_plicity,
                        quantity,
                        ann: pi_ann,
                        ..
                    },
                    closure,
                ),
            ) if *plicity == *pi_plicity => {
                let ann = match ann {
                    Some(ann) => {
                        let (ann, _) = self.check(ann, &Value::universe())?;
                        let ann_type = self.eval(&ann);
                        self.assign(
                            ann_type,
                            pi_ann.clone(),
                            *range,
                            "checking a lambda annotation against the function type",
                        );
                        ann
                    }
                    None => self.quote(pi_ann),
                };
                let body_type = (self.elim_context())
                    .apply_closure(closure, Value::rigid(self.len().next_level()));
                let pi_ann = pi_ann.clone();
                let quantity = *quantity;

                let (body, usages) = self.in_scope(|this| {
                    this.push_param(*name, pi_ann, quantity, Origin::Source);
                    this.check(body, &body_type)
                })?;
                let (head_usage, usages) = usages.split_innermost();
                self.emit(Constraint::Usage {
                    name: *name,
                    expected: quantity,
                    computed: head_usage,
                    range: *range,
                });

                Ok((
                    Arc::new(core::Term::Abs(
                        Binder::Lambda {
                            name: *name,
                            plicity: *plicity,
                            ann,
                        },
                        body,
                    )),
                    usages,
                ))
            }
            // Any other term against an implicit function type: insert the
            // implicit binder transparently and keep checking.
            (
                _,
                Value::Abs(
                    VBinder::Pi {
                        name,
                        plicity: Plicity::Implicit,
                        quantity,
                        ann,
                    },
                    closure,
                ),
            ) if !is_implicit_lambda(term) => {
                let ann_term = self.quote(ann);
                let body_type = (self.elim_context())
                    .apply_closure(closure, Value::rigid(self.len().next_level()));
                let name = *name;
                let quantity = *quantity;
                let ann = ann.clone();

                let (body, usages) = self.in_scope(|this| {
                    this.push_param(name, ann, quantity, Origin::Inserted);
                    this.check(term, &body_type)
                })?;
                let (head_usage, usages) = usages.split_innermost();
                self.emit(Constraint::Usage {
                    name,
                    expected: quantity,
                    computed: head_usage,
                    range: term.range(),
                });

                Ok((
                    Arc::new(core::Term::Abs(
                        Binder::Lambda {
                            name,
                            plicity: Plicity::Implicit,
                            ann: ann_term,
                        },
                        body,
                    )),
                    usages,
                ))
            }
            (Term::Variant(_, row), expected) if expected.is_atom("Type") => {
                let (row, usages) = self.check_row_type(row)?;
                Ok((Arc::new(core::Term::Variant(row)), usages))
            }
            (Term::Struct(_, row), expected) if expected.is_atom("Type") => {
                let (row, usages) = self.check_row_type(row)?;
                Ok((Arc::new(core::Term::Schema(row)), usages))
            }
            (Term::Tuple(_, fields), expected) if expected.is_atom("Type") => {
                let row = tuple_row(fields);
                let (row, usages) = self.check_row_type(&row)?;
                Ok((Arc::new(core::Term::Schema(row)), usages))
            }
            (
                Term::Inj {
                    label,
                    value,
                    head,
                    ..
                },
                other,
            ) if other.is_atom("Type") => {
                let (value, usages) = self.check(value, &expected)?;
                let (head, _) = self.check(head, &expected)?;
                Ok((Arc::new(core::Term::Inj(*label, value, head)), usages))
            }
            (Term::Struct(range, row), Value::Schema(schema_row)) => {
                let schema_row = schema_row.clone();
                let (row, usages) = self.check_struct_fields(*range, row, &schema_row)?;
                Ok((Arc::new(core::Term::Struct(row)), usages))
            }
            (Term::Tuple(range, fields), Value::Schema(schema_row)) => {
                let schema_row = schema_row.clone();
                let row = tuple_row(fields);
                let (row, usages) = self.check_struct_fields(*range, &row, &schema_row)?;
                Ok((Arc::new(core::Term::Struct(row)), usages))
            }
            (
                Term::Match {
                    scrutinee,
                    alternatives,
                    ..
                },
                _,
            ) => self.check_match(scrutinee, alternatives, &expected),
            (Term::Lit(range, Literal::Num(n)), Value::Lit(Literal::Num(m))) => {
                // Dependent number literals: the expected type is itself a
                // number, so the literal must be exactly it.
                if n.total_cmp(m).is_eq() {
                    Ok((
                        core::Term::lit(Literal::Num(*n)),
                        Usages::none(self.len().to_usize()),
                    ))
                } else {
                    Err(Error::UnificationFailure {
                        provenance: Provenance {
                            range: *range,
                            task: "checking a number literal",
                        },
                        lhs: core::Term::lit(Literal::Num(*n)),
                        rhs: core::Term::lit(Literal::Num(*m)),
                    })
                }
            }
            (Term::Lit(_, literal @ Literal::Num(_)), other) if other.is_atom("Type") => Ok((
                core::Term::lit(*literal),
                Usages::none(self.len().to_usize()),
            )),
            (_, Value::Modal(inner, _)) => {
                let inner = inner.clone();
                self.check(term, &inner)
            }
            (
                Term::Modal {
                    term,
                    quantity,
                    liquid,
                    ..
                },
                _,
            ) => {
                let (term, usages) = self.check(term, &expected)?;
                let liquid = self.elab_liquid(liquid.as_deref())?;
                Ok((
                    Arc::new(core::Term::Modal(
                        term,
                        Modalities {
                            quantity: quantity.unwrap_or(Quantity::Many),
                            liquid,
                        },
                    )),
                    usages,
                ))
            }
            // Fall back to synthesis followed by a type equality constraint:
            // most terms are checked this way, leaving the heavy lifting to
            // the unifier.
            (_, _) => {
                let synthed = self.synth(term)?;
                let (term_out, r#type, usages) = implicits::insert(self, synthed, term.range());
                self.assign(
                    r#type,
                    expected.clone(),
                    term.range(),
                    "checking against the expected type",
                );
                Ok((term_out, usages))
            }
        }
    }

    /// Check the fields of a variant or schema row against `Type`.
    fn check_row_type(&mut self, row: &RowExpr) -> Result<(Row<Arc<core::Term>>, Usages), Error> {
        let mut usages = Usages::none(self.len().to_usize());
        let mut fields = Vec::new();
        for (label, field) in &row.fields {
            let (term, field_usages) = self.check(field, &Value::universe())?;
            fields.push((*label, term));
            usages = usages.add(&field_usages);
        }
        let tail = match &row.tail {
            None => Row::Empty,
            Some((range, name)) => {
                let (term, _, _) = self.lookup(*range, *name)?;
                match term.as_ref() {
                    core::Term::Var(Var::Bound(index)) => Row::Var(RowVar::Bound(*index)),
                    core::Term::Var(Var::Meta(meta)) => Row::Var(RowVar::Meta(*meta)),
                    _ => {
                        return Err(Error::NotImplemented {
                            range: *range,
                            feature: "non-variable row tails",
                        })
                    }
                }
            }
        };
        Ok((Row::from_fields(fields, tail), usages))
    }

    /// Check a struct literal against a known schema, field by field via row
    /// rewriting. Fields may be written in any order.
    fn check_struct_fields(
        &mut self,
        range: ByteRange,
        row: &RowExpr,
        schema_row: &Row<ArcValue>,
    ) -> Result<(Row<Arc<core::Term>>, Usages), Error> {
        if row.tail.is_some() {
            return Err(Error::NotImplemented {
                range,
                feature: "row tails in checked struct literals",
            });
        }
        self.sigma_extract(row);

        let mut usages = Usages::none(self.len().to_usize());
        let mut fields = Vec::new();
        let mut remaining = schema_row.clone();
        for (label, field) in &row.fields {
            let (field_type, rest) = match remaining.rewrite(*label) {
                Some(found) => found,
                None => {
                    return Err(Error::MissingLabel {
                        provenance: Provenance {
                            range: field.range(),
                            task: "checking a record against its type",
                        },
                        label: *label,
                    })
                }
            };
            // The field's sigma annotation is known exactly here, so record
            // it before elaborating any dependent siblings.
            if let Some(entry) = self.sigma.get_mut(label) {
                entry.ann = field_type.clone();
            }
            let (term, field_usages) = self.check(field, &field_type)?;
            let value = self.eval(&term);
            let entry = self.sigma[label].clone();
            self.assign(value, entry.expr, field.range(), "binding a record field");
            fields.push((*label, term));
            usages = usages.add(&field_usages);
            remaining = rest;
        }

        if let Row::Extend(label, _, _) = remaining {
            return Err(Error::MissingLabel {
                provenance: Provenance {
                    range,
                    task: "checking a record against its type",
                },
                label,
            });
        }

        Ok((Row::from_fields(fields, Row::Empty), usages))
    }

    fn check_match(
        &mut self,
        scrutinee: &Term,
        alternatives: &[surface::Alternative],
        expected: &ArcValue,
    ) -> Result<(Arc<core::Term>, Usages), Error> {
        let (scrutinee_term, scrutinee_type, scrutinee_usages) = self.synth(scrutinee)?;

        let mut alts = Vec::new();
        for alternative in alternatives {
            let (pattern, pattern_type, binders) = self.synth_pattern(&alternative.pattern)?;
            self.assign(
                pattern_type,
                scrutinee_type.clone(),
                alternative.pattern.range(),
                "matching a pattern against the scrutinee type",
            );
            let (term, _) = self.in_scope(|this| {
                for (name, r#type) in &binders {
                    this.push_param(*name, r#type.clone(), Quantity::Many, Origin::Source);
                }
                this.check(&alternative.term, expected)
            })?;
            alts.push(core::Alternative { pattern, term });
        }

        Ok((
            Arc::new(core::Term::Match(scrutinee_term, alts)),
            scrutinee_usages,
        ))
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

/// Whether a surface term is literally an implicit lambda, which implicit
/// insertion must leave untouched to avoid double-wrapping.
fn is_implicit_lambda(term: &Term) -> bool {
    matches!(
        term,
        Term::Lambda {
            plicity: Plicity::Implicit,
            ..
        }
    )
}

/// Desugar positional fields to a row labelled `_0`, `_1`, ….
fn tuple_row(fields: &[Term]) -> RowExpr {
    RowExpr::closed(
        fields
            .iter()
            .enumerate()
            .map(|(index, field)| (Symbol::get_tuple_label(index), field.clone()))
            .collect(),
    )
}
