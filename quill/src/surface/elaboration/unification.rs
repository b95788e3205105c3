//! Unification and constraint solving.
//!
//! Elaboration emits constraints rather than unifying eagerly; once a
//! statement has been elaborated, the [solver][Context::solve] works through
//! the constraint list in emission order, unifying types structurally and
//! accumulating metavariable solutions in a [`Substitution`]. Earlier
//! solutions are visible to later constraints: each `assign` constraint is
//! rewritten through the substitution accumulated so far before it is
//! unified.
//!
//! Row unification follows the scoped-labels approach: a label is looked up
//! on the other side by rewriting, inventing fresh field and row
//! metavariables when the label is hidden behind an unsolved row tail.

use std::sync::Arc;

use fxhash::FxHashMap;

use crate::core::semantics::{
    ArcValue, Closure, Elim, ElimContext, EvalContext, ForeignDef, Globals, Head, ImportEntry,
    MatchClosure, MuValue, QuoteContext, SigmaEntry, Solutions, VBinder, Value,
};
use crate::core::{self, MetaId, Modalities, Row, RowVar, Var};
use crate::env::{EnvLen, SharedEnv, UniqueEnv};
use crate::symbol::Symbol;

use super::{Constraint, Context, Error as ElabError, MetaEnv, Provenance};

/// A mapping from metavariables to the values they were solved to.
///
/// Substitutions compose: `apply(compose(s1, s2), v)` is `apply(s1,
/// apply(s2, v))`. The context's zonker is a substitution that only ever
/// grows; a solved metavariable is never rebound to a different value.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    solutions: Solutions,
}

impl Substitution {
    pub fn new() -> Substitution {
        Substitution {
            solutions: Solutions::default(),
        }
    }

    pub fn singleton(meta: MetaId, value: ArcValue) -> Substitution {
        let mut solutions = Solutions::default();
        solutions.insert(meta, value);
        Substitution { solutions }
    }

    fn from_solutions(solutions: Solutions) -> Substitution {
        Substitution { solutions }
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    pub fn get(&self, meta: MetaId) -> Option<&ArcValue> {
        self.solutions.get(&meta)
    }

    pub fn solutions(&self) -> &Solutions {
        &self.solutions
    }

    /// Compose two substitutions, substituting `newer` through every value
    /// in `older` before merging.
    pub fn compose(newer: &Substitution, older: &Substitution) -> Substitution {
        let mut solutions = Solutions::default();
        for (meta, value) in &older.solutions {
            solutions.insert(*meta, newer.apply(value));
        }
        for (meta, value) in &newer.solutions {
            solutions
                .entry(*meta)
                .or_insert_with(|| value.clone());
        }
        Substitution { solutions }
    }

    /// Substitute solved metavariables out of a value. Spines blocked on a
    /// solved metavariable are re-attached without reducing; reduction
    /// happens the next time the value is forced.
    pub fn apply(&self, value: &ArcValue) -> ArcValue {
        match value.as_ref() {
            Value::Lit(_) => value.clone(),
            Value::Stuck(Head::Flexible(meta), spine) => {
                let spine: Vec<_> = spine.iter().map(|elim| self.apply_elim(elim)).collect();
                match self.solutions.get(meta) {
                    None => Arc::new(Value::Stuck(Head::Flexible(*meta), spine)),
                    Some(solution) => {
                        let solution = self.apply(solution);
                        if spine.is_empty() {
                            solution
                        } else {
                            match solution.as_ref() {
                                Value::Stuck(head, prefix) => {
                                    let mut prefix = prefix.clone();
                                    prefix.extend(spine);
                                    Arc::new(Value::Stuck(head.clone(), prefix))
                                }
                                _ => Arc::new(Value::Stuck(Head::Suspended(solution), spine)),
                            }
                        }
                    }
                }
            }
            Value::Stuck(head, spine) => {
                let head = match head {
                    Head::Rigid(level) => Head::Rigid(*level),
                    Head::Foreign(name) => Head::Foreign(*name),
                    Head::Flexible(meta) => Head::Flexible(*meta),
                    Head::Mu(mu) => Head::Mu(Arc::new(MuValue {
                        name: mu.name,
                        source: mu.source,
                        ann: self.apply(&mu.ann),
                        body: self.apply_closure(&mu.body),
                    })),
                    Head::Suspended(value) => Head::Suspended(self.apply(value)),
                };
                let spine = spine.iter().map(|elim| self.apply_elim(elim)).collect();
                Arc::new(Value::Stuck(head, spine))
            }
            Value::Abs(binder, closure) => {
                let binder = match binder {
                    VBinder::Lambda { name, plicity, ann } => VBinder::Lambda {
                        name: *name,
                        plicity: *plicity,
                        ann: self.apply(ann),
                    },
                    VBinder::Pi {
                        name,
                        plicity,
                        quantity,
                        ann,
                    } => VBinder::Pi {
                        name: *name,
                        plicity: *plicity,
                        quantity: *quantity,
                        ann: self.apply(ann),
                    },
                };
                Arc::new(Value::Abs(binder, self.apply_closure(closure)))
            }
            Value::Row(row) => Arc::new(Value::Row(self.apply_row(row))),
            Value::Struct(row) => Arc::new(Value::Struct(self.apply_row(row))),
            Value::Schema(row) => Arc::new(Value::Schema(self.apply_row(row))),
            Value::Variant(row) => Arc::new(Value::Variant(self.apply_row(row))),
            Value::Modal(inner, modalities) => Arc::new(Value::Modal(
                self.apply(inner),
                Modalities {
                    quantity: modalities.quantity,
                    liquid: modalities.liquid.as_ref().map(|liquid| self.apply(liquid)),
                },
            )),
            Value::External(external) => {
                let mut external = external.clone();
                external.args = external.args.iter().map(|arg| self.apply(arg)).collect();
                Arc::new(Value::External(external))
            }
        }
    }

    fn apply_elim(&self, elim: &Elim) -> Elim {
        match elim {
            Elim::App(plicity, arg) => Elim::App(*plicity, self.apply(arg)),
            Elim::Proj(label) => Elim::Proj(*label),
            Elim::Inj(label, value) => Elim::Inj(*label, self.apply(value)),
            Elim::Match(closure) => Elim::Match(MatchClosure::new(
                self.apply_env(closure.env()),
                closure.alternatives().to_vec(),
            )),
        }
    }

    fn apply_closure(&self, closure: &Closure) -> Closure {
        Closure::new(self.apply_env(closure.env()), closure.term().clone())
    }

    fn apply_env(&self, env: &SharedEnv<ArcValue>) -> SharedEnv<ArcValue> {
        let mut applied = SharedEnv::new();
        for entry in env.iter() {
            applied.push(self.apply(entry));
        }
        applied
    }

    fn apply_row(&self, row: &Row<ArcValue>) -> Row<ArcValue> {
        match row {
            Row::Empty => Row::Empty,
            Row::Extend(label, value, rest) => {
                Row::extend(*label, self.apply(value), self.apply_row(rest))
            }
            Row::Var(RowVar::Meta(meta)) => match self.solutions.get(meta) {
                Some(solution) => match self.apply(solution).as_ref() {
                    Value::Row(row) => row.clone(),
                    _ => Row::Var(RowVar::Meta(*meta)),
                },
                None => Row::Var(RowVar::Meta(*meta)),
            },
            Row::Var(var) => Row::Var(*var),
        }
    }
}

/// Errors encountered during unification. These are converted to
/// [elaboration errors][ElabError] by the solver, which knows the
/// provenance of the constraint being solved.
#[derive(Debug, Clone)]
pub enum Error {
    /// Two values with incompatible structure.
    Mismatch { lhs: ArcValue, rhs: ArcValue },
    /// A label present on one side of a row could not be found on the
    /// other.
    MissingLabel { label: Symbol },
    /// Solving the metavariable would produce an infinite value.
    Cyclic { meta: MetaId },
}

/// The constraint solver: a worklist over the constraints emitted by one
/// statement, accumulating metavariable solutions.
pub(crate) struct Solver<'ctx> {
    /// Current binder depth; reset per constraint, grown under binders.
    len: EnvLen,
    /// Declared types of rigid binders, for widening a rigid variable to
    /// its type when compared against a non-variable.
    types: UniqueEnv<ArcValue>,
    metas: &'ctx mut MetaEnv,
    imports: &'ctx FxHashMap<Symbol, ImportEntry>,
    sigma: &'ctx FxHashMap<Symbol, SigmaEntry>,
    foreigns: &'ctx FxHashMap<Symbol, ForeignDef>,
    instances: &'ctx [(Arc<core::Term>, ArcValue)],
    /// The solutions this solve started from.
    base: Solutions,
    /// `base` plus the solutions bound so far.
    working: Solutions,
}

impl<'ctx> Solver<'ctx> {
    fn globals(&self) -> Globals<'_> {
        Globals {
            imports: self.imports,
            sigma: self.sigma,
            foreigns: self.foreigns,
            solutions: &self.working,
        }
    }

    fn elim(&self) -> ElimContext<'_> {
        ElimContext::new(self.globals())
    }

    /// The solutions bound during this solve, as a substitution.
    fn delta(&self) -> Substitution {
        let mut solutions = Solutions::default();
        for (meta, value) in &self.working {
            if !self.base.contains_key(meta) {
                solutions.insert(*meta, value.clone());
            }
        }
        Substitution::from_solutions(solutions)
    }

    fn delta_is_empty(&self) -> bool {
        self.working.len() == self.base.len()
    }

    pub(crate) fn run(mut self, constraints: Vec<Constraint>) -> Result<Substitution, ElabError> {
        for constraint in constraints {
            match constraint {
                Constraint::Assign {
                    lhs,
                    rhs,
                    len,
                    provenance,
                } => {
                    self.len = len;
                    // Rewrite both sides through the substitution
                    // accumulated so far: earlier metas may appear in later
                    // constraints.
                    let lhs = self.elim().force(&lhs);
                    let rhs = self.elim().force(&rhs);
                    if let Err(error) = self.unify(&lhs, &rhs) {
                        return Err(self.report(error, provenance));
                    }
                }
                Constraint::Usage {
                    name,
                    expected,
                    computed,
                    range,
                } => {
                    if !expected.admits(computed) {
                        return Err(ElabError::UsageViolation {
                            range,
                            name,
                            expected,
                            computed,
                        });
                    }
                }
                Constraint::Resolve { meta, r#type, .. } => {
                    // Unification may already have found a solution.
                    if self.working.contains_key(&meta) {
                        continue;
                    }
                    // A failed lookup is not an error: the metavariable is
                    // left unsolved for generalisation to abstract.
                    self.resolve_instance(meta, &r#type);
                }
            }
        }
        Ok(self.delta())
    }

    fn report(&self, error: Error, provenance: Provenance) -> ElabError {
        match error {
            Error::Mismatch { lhs, rhs } => {
                let mut quoter = QuoteContext::new(self.len, self.globals());
                let lhs = quoter.quote(&lhs);
                let rhs = quoter.quote(&rhs);
                ElabError::UnificationFailure {
                    provenance,
                    lhs,
                    rhs,
                }
            }
            Error::MissingLabel { label } => ElabError::MissingLabel { provenance, label },
            Error::Cyclic { meta } => ElabError::CyclicSolution { provenance, meta },
        }
    }

    /// Scan the instance table for a value whose type unifies with the
    /// requested one without pinning down any further metavariables.
    fn resolve_instance(&mut self, meta: MetaId, r#type: &ArcValue) {
        let instances = self.instances;
        for (term, instance_type) in instances {
            let snapshot = self.working.clone();
            match self.unify(r#type, instance_type) {
                Ok(()) => {
                    let mut locals = SharedEnv::new();
                    let value = EvalContext::new(&mut locals, self.globals()).eval(term);
                    if self.bind(meta, value).is_ok() {
                        return;
                    }
                    self.working = snapshot;
                }
                Err(_) => self.working = snapshot,
            }
        }
    }

    /// Structural unification of two values.
    pub(crate) fn unify(&mut self, lhs: &ArcValue, rhs: &ArcValue) -> Result<(), Error> {
        let lhs = self.elim().force(lhs);
        let rhs = self.elim().force(rhs);

        match (lhs.as_ref(), rhs.as_ref()) {
            // Two unsolved metavariables: bind one to the other, then keep
            // their type annotations consistent.
            (Value::Stuck(Head::Flexible(m1), s1), Value::Stuck(Head::Flexible(m2), s2))
                if s1.is_empty() && s2.is_empty() =>
            {
                if m1 == m2 {
                    return Ok(());
                }
                let (m1, m2) = (*m1, *m2);
                self.bind(m1, rhs.clone())?;
                let ann1 = self.metas.ann(m1).clone();
                let ann2 = self.metas.ann(m2).clone();
                self.unify(&ann1, &ann2)
            }
            (Value::Stuck(Head::Flexible(meta), spine), _) if spine.is_empty() => {
                let meta = *meta;
                self.bind(meta, rhs.clone())
            }
            (_, Value::Stuck(Head::Flexible(meta), spine)) if spine.is_empty() => {
                let meta = *meta;
                self.bind(meta, lhs.clone())
            }

            (Value::Lit(l1), Value::Lit(l2)) => {
                if l1 == l2 {
                    Ok(())
                } else {
                    Err(Error::Mismatch {
                        lhs: lhs.clone(),
                        rhs: rhs.clone(),
                    })
                }
            }

            (Value::Modal(inner, _), _) => {
                let inner = inner.clone();
                self.unify(&inner, &rhs)
            }
            (_, Value::Modal(inner, _)) => {
                let inner = inner.clone();
                self.unify(&lhs, &inner)
            }

            // Fixpoints: equal fixpoints decompose, otherwise unfold one
            // step and retry.
            (Value::Stuck(Head::Mu(mu1), s1), Value::Stuck(Head::Mu(mu2), s2))
                if s1.is_empty() && s2.is_empty() =>
            {
                let (mu1, mu2) = (mu1.clone(), mu2.clone());
                self.unify(&mu1.ann, &mu2.ann)?;
                self.unify_closures(mu1.ann.clone(), &mu1.body, &mu2.body)
            }
            (Value::Stuck(Head::Mu(mu), spine), _) => {
                let unfolded = {
                    let elim = self.elim();
                    elim.apply_spine(elim.unfold_mu(mu), spine)
                };
                self.unify(&unfolded, &rhs)
            }
            (_, Value::Stuck(Head::Mu(mu), spine)) => {
                let unfolded = {
                    let elim = self.elim();
                    elim.apply_spine(elim.unfold_mu(mu), spine)
                };
                self.unify(&lhs, &unfolded)
            }

            (Value::Stuck(Head::Rigid(l1), s1), Value::Stuck(Head::Rigid(l2), s2)) => {
                if l1 == l2 {
                    self.unify_spines(&lhs, &rhs, s1, s2)
                } else {
                    Err(Error::Mismatch {
                        lhs: lhs.clone(),
                        rhs: rhs.clone(),
                    })
                }
            }
            // A rigid variable against a non-variable: widen the rigid to
            // its declared type and unify that instead.
            (Value::Stuck(Head::Rigid(level), spine), _) if spine.is_empty() => {
                match self.types.get_level(*level).cloned() {
                    Some(r#type) => self.unify(&r#type, &rhs),
                    None => Err(Error::Mismatch {
                        lhs: lhs.clone(),
                        rhs: rhs.clone(),
                    }),
                }
            }
            (_, Value::Stuck(Head::Rigid(level), spine)) if spine.is_empty() => {
                match self.types.get_level(*level).cloned() {
                    Some(r#type) => self.unify(&lhs, &r#type),
                    None => Err(Error::Mismatch {
                        lhs: lhs.clone(),
                        rhs: rhs.clone(),
                    }),
                }
            }

            (Value::Stuck(h1, s1), Value::Stuck(h2, s2)) if h1 == h2 => {
                self.unify_spines(&lhs, &rhs, s1, s2)
            }

            (Value::Abs(b1, c1), Value::Abs(b2, c2)) => match (b1, b2) {
                (
                    VBinder::Lambda { plicity: p1, .. },
                    VBinder::Lambda { plicity: p2, .. },
                ) if p1 == p2 => {
                    let ann = b1.ann().clone();
                    let (c1, c2) = (c1.clone(), c2.clone());
                    self.unify_closures(ann, &c1, &c2)
                }
                (
                    VBinder::Pi {
                        plicity: p1,
                        ann: ann1,
                        ..
                    },
                    VBinder::Pi {
                        plicity: p2,
                        ann: ann2,
                        ..
                    },
                ) if p1 == p2 => {
                    let (ann1, ann2) = (ann1.clone(), ann2.clone());
                    let (c1, c2) = (c1.clone(), c2.clone());
                    self.unify(&ann1, &ann2)?;
                    self.unify_closures(ann1, &c1, &c2)
                }
                (_, _) => Err(Error::Mismatch {
                    lhs: lhs.clone(),
                    rhs: rhs.clone(),
                }),
            },

            (Value::Row(r1), Value::Row(r2))
            | (Value::Struct(r1), Value::Struct(r2))
            | (Value::Schema(r1), Value::Schema(r2))
            | (Value::Variant(r1), Value::Variant(r2)) => {
                let (r1, r2) = (r1.clone(), r2.clone());
                self.unify_rows(&r1, &r2)
            }

            (Value::External(e1), Value::External(e2))
                if e1.name == e2.name && e1.args.len() == e2.args.len() =>
            {
                let (args1, args2) = (e1.args.clone(), e2.args.clone());
                for (a1, a2) in Iterator::zip(args1.iter(), args2.iter()) {
                    self.unify(a1, a2)?;
                }
                Ok(())
            }

            (_, _) => Err(Error::Mismatch {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            }),
        }
    }

    /// Unify two closures by applying both to the same fresh rigid
    /// variable.
    fn unify_closures(&mut self, ann: ArcValue, c1: &Closure, c2: &Closure) -> Result<(), Error> {
        let var = Value::rigid(self.len.next_level());
        let b1 = self.elim().apply_closure(c1, var.clone());
        let b2 = self.elim().apply_closure(c2, var);

        self.types.push(ann);
        self.len.push();
        let result = self.unify(&b1, &b2);
        self.len.pop();
        self.types.pop();

        result
    }

    fn unify_spines(
        &mut self,
        lhs: &ArcValue,
        rhs: &ArcValue,
        s1: &[Elim],
        s2: &[Elim],
    ) -> Result<(), Error> {
        if s1.len() != s2.len() {
            return Err(Error::Mismatch {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            });
        }
        for (e1, e2) in Iterator::zip(s1.iter(), s2.iter()) {
            match (e1, e2) {
                (Elim::App(p1, a1), Elim::App(p2, a2)) if p1 == p2 => {
                    let (a1, a2) = (a1.clone(), a2.clone());
                    self.unify(&a1, &a2)?;
                }
                (Elim::Proj(l1), Elim::Proj(l2)) if l1 == l2 => {}
                (Elim::Inj(l1, v1), Elim::Inj(l2, v2)) if l1 == l2 => {
                    let (v1, v2) = (v1.clone(), v2.clone());
                    self.unify(&v1, &v2)?;
                }
                (_, _) => {
                    return Err(Error::Mismatch {
                        lhs: lhs.clone(),
                        rhs: rhs.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Row unification: bidirectional containment via rewriting. Every
    /// label on one side must be found, possibly behind a row variable, on
    /// the other.
    fn unify_rows(&mut self, r1: &Row<ArcValue>, r2: &Row<ArcValue>) -> Result<(), Error> {
        let r1 = self.resolve_row(r1);
        let r2 = self.resolve_row(r2);

        match (&r1, &r2) {
            (Row::Empty, Row::Empty) => Ok(()),
            (Row::Var(v1), Row::Var(v2)) if v1 == v2 => Ok(()),
            (Row::Var(RowVar::Meta(meta)), _) => {
                let meta = *meta;
                self.bind(meta, Arc::new(Value::Row(r2)))
            }
            (_, Row::Var(RowVar::Meta(meta))) => {
                let meta = *meta;
                self.bind(meta, Arc::new(Value::Row(r1)))
            }
            (Row::Extend(label, v1, rest1), _) => {
                let (label, v1, rest1) = (*label, v1.clone(), (**rest1).clone());
                let (v2, rest2) = self.rewrite_row(&r2, label)?;
                self.unify(&v1, &v2)?;
                self.unify_rows(&rest1, &rest2)
            }
            (Row::Empty, Row::Extend(label, _, _)) => Err(Error::MissingLabel { label: *label }),
            (_, _) => Err(Error::Mismatch {
                lhs: Arc::new(Value::Row(r1.clone())),
                rhs: Arc::new(Value::Row(r2.clone())),
            }),
        }
    }

    /// Splice solved row tails into the row.
    fn resolve_row(&self, row: &Row<ArcValue>) -> Row<ArcValue> {
        match row {
            Row::Empty => Row::Empty,
            Row::Extend(label, value, rest) => {
                Row::extend(*label, value.clone(), self.resolve_row(rest))
            }
            Row::Var(RowVar::Meta(meta)) => match self.working.get(meta) {
                Some(solution) => match solution.as_ref() {
                    Value::Row(solved) => self.resolve_row(solved),
                    _ => Row::Var(RowVar::Meta(*meta)),
                },
                None => Row::Var(RowVar::Meta(*meta)),
            },
            Row::Var(var) => Row::Var(*var),
        }
    }

    /// Find `label` in the row, returning its entry and the remaining row.
    /// When the label is hidden behind an unsolved row tail, solve the tail
    /// to a fresh extension containing the label.
    fn rewrite_row(
        &mut self,
        row: &Row<ArcValue>,
        label: Symbol,
    ) -> Result<(ArcValue, Row<ArcValue>), Error> {
        if let Some(found) = row.rewrite(label) {
            return Ok(found);
        }
        match row.tail_var() {
            Some(RowVar::Meta(meta)) => {
                let kind = Value::flexible(self.metas.fresh(Value::universe()));
                let field = Value::flexible(self.metas.fresh(kind));
                let rest_meta = self.metas.fresh(Value::row_kind());
                self.bind(
                    meta,
                    Arc::new(Value::Row(Row::extend(
                        label,
                        field.clone(),
                        Row::Var(RowVar::Meta(rest_meta)),
                    ))),
                )?;
                let rest = Row::from_fields(
                    row.fields().map(|(label, value)| (label, value.clone())),
                    Row::Var(RowVar::Meta(rest_meta)),
                );
                Ok((field, rest))
            }
            _ => Err(Error::MissingLabel { label }),
        }
    }

    /// Record a metavariable solution, rejecting cyclic ones.
    fn bind(&mut self, meta: MetaId, value: ArcValue) -> Result<(), Error> {
        if let Value::Stuck(Head::Flexible(other), spine) = value.as_ref() {
            if *other == meta && spine.is_empty() {
                return Ok(());
            }
        }
        if self.occurs(meta, &value) {
            return Err(Error::Cyclic { meta });
        }
        self.working.insert(meta, value);
        Ok(())
    }

    fn occurs(&self, meta: MetaId, value: &ArcValue) -> bool {
        match value.as_ref() {
            Value::Lit(_) => false,
            Value::Stuck(head, spine) => {
                let in_head = match head {
                    Head::Rigid(_) | Head::Foreign(_) => false,
                    Head::Flexible(other) => {
                        if *other == meta {
                            true
                        } else {
                            match self.working.get(other) {
                                Some(solution) => self.occurs(meta, solution),
                                None => false,
                            }
                        }
                    }
                    Head::Mu(mu) => {
                        self.occurs(meta, &mu.ann) || self.occurs_term(meta, mu.body.term())
                    }
                    Head::Suspended(value) => self.occurs(meta, value),
                };
                in_head
                    || spine.iter().any(|elim| match elim {
                        Elim::App(_, arg) => self.occurs(meta, arg),
                        Elim::Proj(_) => false,
                        Elim::Inj(_, value) => self.occurs(meta, value),
                        Elim::Match(closure) => (closure.alternatives().iter())
                            .any(|alt| self.occurs_term(meta, &alt.term)),
                    })
            }
            Value::Abs(binder, closure) => {
                self.occurs(meta, binder.ann()) || self.occurs_term(meta, closure.term())
            }
            Value::Row(row) | Value::Struct(row) | Value::Schema(row) | Value::Variant(row) => {
                self.occurs_row(meta, row)
            }
            Value::Modal(inner, modalities) => {
                self.occurs(meta, inner)
                    || (modalities.liquid.as_ref())
                        .map_or(false, |liquid| self.occurs(meta, liquid))
            }
            Value::External(external) => external.args.iter().any(|arg| self.occurs(meta, arg)),
        }
    }

    fn occurs_row(&self, meta: MetaId, row: &Row<ArcValue>) -> bool {
        match row {
            Row::Empty => false,
            Row::Extend(_, value, rest) => {
                self.occurs(meta, value) || self.occurs_row(meta, rest)
            }
            Row::Var(RowVar::Meta(other)) => {
                if *other == meta {
                    true
                } else {
                    match self.working.get(other) {
                        Some(solution) => self.occurs(meta, solution),
                        None => false,
                    }
                }
            }
            Row::Var(_) => false,
        }
    }

    fn occurs_term(&self, meta: MetaId, term: &core::Term) -> bool {
        match term {
            core::Term::Lit(_) => false,
            core::Term::Var(Var::Meta(other)) => {
                if *other == meta {
                    true
                } else {
                    match self.working.get(other) {
                        Some(solution) => self.occurs(meta, solution),
                        None => false,
                    }
                }
            }
            core::Term::Var(_) => false,
            core::Term::Abs(binder, body) => {
                self.occurs_term(meta, binder.ann()) || self.occurs_term(meta, body)
            }
            core::Term::App(_, head, arg) => {
                self.occurs_term(meta, head) || self.occurs_term(meta, arg)
            }
            core::Term::Row(row)
            | core::Term::Struct(row)
            | core::Term::Schema(row)
            | core::Term::Variant(row) => {
                row.fields().any(|(_, term)| self.occurs_term(meta, term))
                    || match row.tail_var() {
                        Some(RowVar::Meta(other)) => other == meta,
                        _ => false,
                    }
            }
            core::Term::Proj(_, head) => self.occurs_term(meta, head),
            core::Term::Inj(_, value, head) => {
                self.occurs_term(meta, value) || self.occurs_term(meta, head)
            }
            core::Term::Ann(term, r#type) => {
                self.occurs_term(meta, term) || self.occurs_term(meta, r#type)
            }
            core::Term::Match(scrutinee, alternatives) => {
                self.occurs_term(meta, scrutinee)
                    || (alternatives.iter()).any(|alt| self.occurs_term(meta, &alt.term))
            }
            core::Term::Block(statements, ret) => {
                statements.iter().any(|statement| match statement {
                    core::Statement::Let { term, .. } | core::Statement::Expr(term) => {
                        self.occurs_term(meta, term)
                    }
                }) || self.occurs_term(meta, ret)
            }
            core::Term::Modal(term, modalities) => {
                self.occurs_term(meta, term)
                    || (modalities.liquid.as_ref())
                        .map_or(false, |liquid| self.occurs_term(meta, liquid))
            }
        }
    }
}

impl Context {
    /// Solve the constraints emitted by the current statement, in emission
    /// order, composing the resulting solutions into the zonker.
    pub fn solve(&mut self) -> Result<Substitution, ElabError> {
        let constraints = self.drain_constraints();
        let solver = Solver {
            len: self.len(),
            types: self.types.clone(),
            metas: &mut self.metas,
            imports: &self.imports,
            sigma: &self.sigma,
            foreigns: &self.foreigns,
            instances: &self.instances,
            base: self.zonker.solutions().clone(),
            working: self.zonker.solutions().clone(),
        };
        let delta = solver.run(constraints)?;
        self.zonker = Substitution::compose(&delta, &self.zonker);
        Ok(delta)
    }

    /// Look for an instance whose type unifies with the requested one
    /// without pinning down any further metavariables.
    pub(crate) fn resolve_implicit(&mut self, r#type: &ArcValue) -> Option<Arc<core::Term>> {
        let instances = self.instances.clone();
        for (term, instance_type) in &instances {
            let mut solver = Solver {
                len: self.len(),
                types: self.types.clone(),
                metas: &mut self.metas,
                imports: &self.imports,
                sigma: &self.sigma,
                foreigns: &self.foreigns,
                instances: &[],
                base: self.zonker.solutions().clone(),
                working: self.zonker.solutions().clone(),
            };
            if solver.unify(r#type, instance_type).is_ok() && solver.delta_is_empty() {
                return Some(term.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Literal;

    fn meta(id: usize) -> MetaId {
        MetaId::from_usize(id)
    }

    #[test]
    fn compose_apply_law() {
        // s2: ?1 -> ?0,  s1: ?0 -> 1.0
        let s2 = Substitution::singleton(meta(1), Value::flexible(meta(0)));
        let s1 = Substitution::singleton(meta(0), Value::lit(Literal::Num(1.0)));

        let value = Value::flexible(meta(1));
        let lhs = Substitution::compose(&s1, &s2).apply(&value);
        let rhs = s1.apply(&s2.apply(&value));
        assert!(matches!(lhs.as_ref(), Value::Lit(Literal::Num(n)) if *n == 1.0));
        assert!(matches!(rhs.as_ref(), Value::Lit(Literal::Num(n)) if *n == 1.0));
    }

    #[test]
    fn compose_keeps_unrelated_solutions() {
        let s2 = Substitution::singleton(meta(2), Value::lit(Literal::Bool(true)));
        let s1 = Substitution::singleton(meta(3), Value::lit(Literal::Bool(false)));
        let composed = Substitution::compose(&s1, &s2);
        assert_eq!(composed.len(), 2);
        assert!(composed.get(meta(2)).is_some());
        assert!(composed.get(meta(3)).is_some());
    }

    #[test]
    fn apply_substitutes_row_tails() {
        let row = Row::extend(
            Symbol::intern("x"),
            Value::lit(Literal::Num(1.0)),
            Row::Var(RowVar::Meta(meta(0))),
        );
        let solution = Substitution::singleton(meta(0), Arc::new(Value::Row(Row::Empty)));
        let applied = solution.apply(&Arc::new(Value::Schema(row)));
        match applied.as_ref() {
            Value::Schema(row) => assert!(row.tail_var().is_none()),
            _ => panic!("expected a schema"),
        }
    }
}
