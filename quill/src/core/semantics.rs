//! The operational semantics of the core language, implemented using
//! [normalisation by evaluation](https://en.wikipedia.org/wiki/Normalisation_by_evaluation).
//!
//! Terms are evaluated to weak-head-normal [values][Value]; eliminations of
//! values whose head is unknown accumulate in a spine until the head becomes
//! known. Values are [quoted][QuoteContext::quote] back to terms when the
//! elaborator needs syntax again.

use std::fmt;
use std::panic::panic_any;
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::core::quantity::{Quantity, Usages};
use crate::core::{
    Alternative, Binder, Literal, MetaId, Modalities, PatRow, Pattern, Plicity, Row, RowVar,
    Statement, Term, Var,
};
use crate::env::{EnvLen, Level, SharedEnv};
use crate::symbol::Symbol;

/// Atomically reference counted values. Reference counting increases the
/// amount of sharing we can achieve during evaluation.
pub type ArcValue = Arc<Value>;

/// Solutions found for metavariables. This map only ever grows, and a solved
/// metavariable is never rebound to a different value.
pub type Solutions = FxHashMap<MetaId, ArcValue>;

/// Values in weak-head-normal form, with bindings converted to closures.
#[derive(Debug, Clone)]
pub enum Value {
    /// Constant literals.
    Lit(Literal),
    /// A computation blocked on a [head][Head] that cannot be reduced in the
    /// current scope, along with a spine of pending eliminations.
    Stuck(Head, Vec<Elim>),
    /// Function literals and function types.
    Abs(VBinder, Closure),
    /// Row values.
    Row(Row<ArcValue>),
    /// Record values.
    Struct(Row<ArcValue>),
    /// Record types.
    Schema(Row<ArcValue>),
    /// Sum types.
    Variant(Row<ArcValue>),
    /// Modal values.
    Modal(ArcValue, Modalities<ArcValue>),
    /// A partially applied builtin.
    External(External),
}

impl Value {
    pub fn lit(literal: Literal) -> ArcValue {
        Arc::new(Value::Lit(literal))
    }

    pub fn atom(name: &'static str) -> ArcValue {
        Value::lit(Literal::Atom(Symbol::intern_static(name)))
    }

    /// The type of types.
    pub fn universe() -> ArcValue {
        Value::atom("Type")
    }

    /// The kind of rows.
    pub fn row_kind() -> ArcValue {
        Value::atom("Row")
    }

    pub fn rigid(level: Level) -> ArcValue {
        Arc::new(Value::Stuck(Head::Rigid(level), Vec::new()))
    }

    pub fn flexible(meta: MetaId) -> ArcValue {
        Arc::new(Value::Stuck(Head::Flexible(meta), Vec::new()))
    }

    pub fn foreign(name: Symbol) -> ArcValue {
        Arc::new(Value::Stuck(Head::Foreign(name), Vec::new()))
    }

    /// Match a literal atom of the given name.
    pub fn is_atom(&self, name: &str) -> bool {
        match self {
            Value::Lit(Literal::Atom(atom)) => atom.resolve() == name,
            _ => false,
        }
    }

    pub fn is_stuck(&self) -> bool {
        matches!(self, Value::Stuck(_, _))
    }
}

/// The head of a [stuck value][Value::Stuck].
#[derive(Debug, Clone)]
pub enum Head {
    /// Variables that refer to rigid binders.
    Rigid(Level),
    /// Variables that refer to unsolved metavariables.
    Flexible(MetaId),
    /// Builtins with no native implementation in scope.
    Foreign(Symbol),
    /// A recursive fixpoint, kept folded until the unifier unfolds it.
    Mu(Arc<MuValue>),
    /// A value that is not itself a variable, but whose elimination cannot
    /// yet compute (for example projecting a label hidden behind an
    /// unsolved row tail).
    Suspended(ArcValue),
}

impl PartialEq for Head {
    fn eq(&self, other: &Head) -> bool {
        match (self, other) {
            (Head::Rigid(a), Head::Rigid(b)) => a == b,
            (Head::Flexible(a), Head::Flexible(b)) => a == b,
            (Head::Foreign(a), Head::Foreign(b)) => a == b,
            (Head::Mu(a), Head::Mu(b)) => Arc::ptr_eq(a, b),
            (Head::Suspended(a), Head::Suspended(b)) => Arc::ptr_eq(a, b),
            (_, _) => false,
        }
    }
}

/// A pending elimination, to be reduced if the [head][Head] of a [stuck
/// value][Value::Stuck] becomes known.
#[derive(Debug, Clone)]
pub enum Elim {
    /// Function eliminations.
    App(Plicity, ArcValue),
    /// Field projections.
    Proj(Symbol),
    /// Field injections.
    Inj(Symbol, ArcValue),
    /// Suspended pattern matches.
    Match(MatchClosure),
}

/// A closure over an unevaluated term: the captured environment plus the
/// body, instantiated later with a value for the binder.
#[derive(Debug, Clone)]
pub struct Closure {
    env: SharedEnv<ArcValue>,
    term: Arc<Term>,
}

impl Closure {
    pub fn new(env: SharedEnv<ArcValue>, term: Arc<Term>) -> Closure {
        Closure { env, term }
    }

    pub fn term(&self) -> &Arc<Term> {
        &self.term
    }

    pub fn env(&self) -> &SharedEnv<ArcValue> {
        &self.env
    }
}

/// A pattern match suspended on a stuck scrutinee.
#[derive(Debug, Clone)]
pub struct MatchClosure {
    env: SharedEnv<ArcValue>,
    alternatives: Vec<Alternative>,
}

impl MatchClosure {
    pub fn new(env: SharedEnv<ArcValue>, alternatives: Vec<Alternative>) -> MatchClosure {
        MatchClosure { env, alternatives }
    }

    pub fn env(&self) -> &SharedEnv<ArcValue> {
        &self.env
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }
}

/// A recursive fixpoint value. Unfolding substitutes the fixpoint for its
/// own bound occurrence, so recursive definitions unfold one step at a time
/// instead of looping during evaluation.
#[derive(Debug, Clone)]
pub struct MuValue {
    pub name: Symbol,
    pub source: Symbol,
    pub ann: ArcValue,
    pub body: Closure,
}

/// A native evaluation step for a builtin. Returns `None` when the arguments
/// are outside the builtin's domain, leaving the application stuck.
pub type Step = fn(&[ArcValue]) -> Option<ArcValue>;

/// A builtin operation accumulating arguments towards its declared arity.
#[derive(Clone)]
pub struct External {
    pub name: Symbol,
    pub arity: usize,
    pub step: Step,
    pub args: Vec<ArcValue>,
}

impl fmt::Debug for External {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("External")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// A completed top-level definition.
#[derive(Debug, Clone)]
pub struct ImportEntry {
    pub term: Arc<Term>,
    pub r#type: ArcValue,
    pub usages: Usages,
}

/// A dependent-record field binding.
#[derive(Debug, Clone)]
pub struct SigmaEntry {
    pub expr: ArcValue,
    pub ann: ArcValue,
}

/// A builtin definition: declared arity, native step, and type.
#[derive(Clone)]
pub struct ForeignDef {
    pub arity: usize,
    pub step: Step,
    pub r#type: ArcValue,
}

impl fmt::Debug for ForeignDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignDef")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Read access to the global tables needed to run computations: completed
/// imports, dependent-record field bindings, builtin definitions, and the
/// metavariable solutions found so far.
#[derive(Copy, Clone)]
pub struct Globals<'env> {
    pub imports: &'env FxHashMap<Symbol, ImportEntry>,
    pub sigma: &'env FxHashMap<Symbol, SigmaEntry>,
    pub foreigns: &'env FxHashMap<Symbol, ForeignDef>,
    pub solutions: &'env Solutions,
}

/// Errors encountered while interpreting terms. These are internal invariant
/// violations: anything user-facing should have been rejected during
/// elaboration, so the whole run is aborted.
#[derive(Clone, Debug)]
pub enum Error {
    UnboundFree(Symbol),
    UnboundLabel(Symbol),
    EscapingRigid(Level),
    InvalidApp,
    InvalidProj,
    InvalidInj,
    InvalidRowTail,
    MissingLabel(Symbol),
    ArityMismatch(Symbol),
    NonExhaustiveMatch,
}

impl Error {
    pub fn description(&self) -> String {
        match self {
            Error::UnboundFree(name) => format!("unbound free variable `{name}`"),
            Error::UnboundLabel(name) => format!("unbound label `{name}`"),
            Error::EscapingRigid(level) => format!("rigid variable escaped its scope: {level:?}"),
            Error::InvalidApp => "tried to apply a non-function".to_owned(),
            Error::InvalidProj => "tried to project from a non-record".to_owned(),
            Error::InvalidInj => "tried to inject into a non-row".to_owned(),
            Error::InvalidRowTail => "row tail evaluated to a non-row".to_owned(),
            Error::MissingLabel(label) => format!("label `{label}` missing during evaluation"),
            Error::ArityMismatch(name) => format!("builtin `{name}` over-applied"),
            Error::NonExhaustiveMatch => "no alternative matched".to_owned(),
        }
    }
}

/// Evaluation context.
///
/// Maintains a local environment on top of an [`ElimContext`], allowing full
/// evaluation of terms.
pub struct EvalContext<'env> {
    locals: &'env mut SharedEnv<ArcValue>,
    globals: Globals<'env>,
}

impl<'env> EvalContext<'env> {
    pub fn new(locals: &'env mut SharedEnv<ArcValue>, globals: Globals<'env>) -> EvalContext<'env> {
        EvalContext { locals, globals }
    }

    fn elim_context(&self) -> ElimContext<'env> {
        ElimContext::new(self.globals)
    }

    /// Evaluate a [term][Term] into a [value][Value].
    pub fn eval(&mut self, term: &Term) -> ArcValue {
        match term {
            Term::Lit(literal) => Value::lit(*literal),
            Term::Var(Var::Bound(index)) => match self.locals.get_index(*index) {
                Some(value) => value.clone(),
                None => panic_any(Error::EscapingRigid(self.locals.len().next_level())),
            },
            Term::Var(Var::Free(name)) => match self.globals.imports.get(name) {
                // Imported terms are closed, so they evaluate in an empty
                // local environment.
                Some(entry) => {
                    let mut locals = SharedEnv::new();
                    EvalContext::new(&mut locals, self.globals).eval(&entry.term)
                }
                None => panic_any(Error::UnboundFree(*name)),
            },
            Term::Var(Var::Meta(meta)) => match self.globals.solutions.get(meta) {
                Some(value) => value.clone(),
                None => Value::flexible(*meta),
            },
            Term::Var(Var::Foreign(name)) => match self.globals.foreigns.get(name) {
                Some(def) if def.arity == 0 => match (def.step)(&[]) {
                    Some(value) => value,
                    None => panic_any(Error::ArityMismatch(*name)),
                },
                Some(def) => Arc::new(Value::External(External {
                    name: *name,
                    arity: def.arity,
                    step: def.step,
                    args: Vec::new(),
                })),
                None => Value::foreign(*name),
            },
            Term::Var(Var::Label(name)) => match self.globals.sigma.get(name) {
                Some(entry) => entry.expr.clone(),
                None => panic_any(Error::UnboundLabel(*name)),
            },
            Term::Abs(Binder::Lambda { name, plicity, ann }, body) => {
                let ann = self.eval(ann);
                Arc::new(Value::Abs(
                    VBinder::Lambda {
                        name: *name,
                        plicity: *plicity,
                        ann,
                    },
                    Closure::new(self.locals.clone(), body.clone()),
                ))
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
                let ann = self.eval(ann);
                Arc::new(Value::Abs(
                    VBinder::Pi {
                        name: *name,
                        plicity: *plicity,
                        quantity: *quantity,
                        ann,
                    },
                    Closure::new(self.locals.clone(), body.clone()),
                ))
            }
            Term::Abs(Binder::Mu { name, source, ann }, body) => {
                let ann = self.eval(ann);
                Arc::new(Value::Stuck(
                    Head::Mu(Arc::new(MuValue {
                        name: *name,
                        source: *source,
                        ann,
                        body: Closure::new(self.locals.clone(), body.clone()),
                    })),
                    Vec::new(),
                ))
            }
            Term::App(plicity, head, arg) => {
                let head = self.eval(head);
                let arg = self.eval(arg);
                self.elim_context().apply_fun(head, *plicity, arg)
            }
            Term::Row(row) => Arc::new(Value::Row(self.eval_row(row))),
            Term::Struct(row) => Arc::new(Value::Struct(self.eval_row(row))),
            Term::Schema(row) => Arc::new(Value::Schema(self.eval_row(row))),
            Term::Variant(row) => Arc::new(Value::Variant(self.eval_row(row))),
            Term::Proj(label, head) => {
                let head = self.eval(head);
                self.elim_context().apply_proj(head, *label)
            }
            Term::Inj(label, value, head) => {
                let value = self.eval(value);
                let head = self.eval(head);
                self.elim_context().apply_inj(head, *label, value)
            }
            Term::Ann(term, _) => self.eval(term),
            Term::Match(scrutinee, alternatives) => {
                let scrutinee = self.eval(scrutinee);
                let closure = MatchClosure::new(self.locals.clone(), alternatives.clone());
                self.elim_context().apply_match(scrutinee, closure)
            }
            Term::Block(statements, ret) => {
                let initial_len = self.locals.len();
                for statement in statements {
                    match statement {
                        Statement::Let { term, .. } => {
                            let value = self.eval(term);
                            self.locals.push(value);
                        }
                        Statement::Expr(term) => {
                            self.eval(term);
                        }
                    }
                }
                let ret = self.eval(ret);
                self.locals.truncate(initial_len);
                ret
            }
            Term::Modal(term, modalities) => {
                let value = self.eval(term);
                let liquid = modalities.liquid.as_ref().map(|liquid| self.eval(liquid));
                Arc::new(Value::Modal(
                    value,
                    Modalities {
                        quantity: modalities.quantity,
                        liquid,
                    },
                ))
            }
        }
    }

    fn eval_row(&mut self, row: &Row<Arc<Term>>) -> Row<ArcValue> {
        match row {
            Row::Empty => Row::Empty,
            Row::Extend(label, term, rest) => {
                let value = self.eval(term);
                let rest = self.eval_row(rest);
                Row::extend(*label, value, rest)
            }
            Row::Var(RowVar::Meta(meta)) => match self.globals.solutions.get(meta) {
                Some(solution) => match solution.as_ref() {
                    Value::Row(row) => row.clone(),
                    _ => panic_any(Error::InvalidRowTail),
                },
                None => Row::Var(RowVar::Meta(*meta)),
            },
            Row::Var(RowVar::Bound(index)) => match self.locals.get_index(*index) {
                Some(value) => match value.as_ref() {
                    Value::Row(row) => row.clone(),
                    Value::Stuck(Head::Rigid(level), spine) if spine.is_empty() => {
                        Row::Var(RowVar::Rigid(*level))
                    }
                    Value::Stuck(Head::Flexible(meta), spine) if spine.is_empty() => {
                        Row::Var(RowVar::Meta(*meta))
                    }
                    _ => panic_any(Error::InvalidRowTail),
                },
                None => panic_any(Error::InvalidRowTail),
            },
            Row::Var(RowVar::Rigid(level)) => Row::Var(RowVar::Rigid(*level)),
        }
    }
}

/// Binders for abstraction values. The annotation has been evaluated; `Mu`
/// binders never appear here, since fixpoints are kept folded as stuck
/// [heads][Head::Mu].
#[derive(Debug, Clone)]
pub enum VBinder {
    Lambda {
        name: Symbol,
        plicity: Plicity,
        ann: ArcValue,
    },
    Pi {
        name: Symbol,
        plicity: Plicity,
        quantity: Quantity,
        ann: ArcValue,
    },
}

impl VBinder {
    pub fn name(&self) -> Symbol {
        match self {
            VBinder::Lambda { name, .. } | VBinder::Pi { name, .. } => *name,
        }
    }

    pub fn ann(&self) -> &ArcValue {
        match self {
            VBinder::Lambda { ann, .. } | VBinder::Pi { ann, .. } => ann,
        }
    }

    pub fn plicity(&self) -> Plicity {
        match self {
            VBinder::Lambda { plicity, .. } | VBinder::Pi { plicity, .. } => *plicity,
        }
    }
}

/// Elimination context.
///
/// Contains enough state to run computations, but no local environment: that
/// is only needed for full evaluation.
#[derive(Copy, Clone)]
pub struct ElimContext<'env> {
    globals: Globals<'env>,
}

impl<'env> ElimContext<'env> {
    pub fn new(globals: Globals<'env>) -> ElimContext<'env> {
        ElimContext { globals }
    }

    /// Bring a value up-to-date with any new metavariable solutions that
    /// might now be present at its head.
    pub fn force(&self, value: &ArcValue) -> ArcValue {
        let mut forced = value.clone();
        loop {
            let next = match forced.as_ref() {
                Value::Stuck(Head::Flexible(meta), spine) => {
                    match self.globals.solutions.get(meta) {
                        Some(solution) => self.apply_spine(solution.clone(), spine),
                        None => break,
                    }
                }
                _ => break,
            };
            forced = next;
        }
        forced
    }

    /// Apply a closure to a value.
    pub fn apply_closure(&self, closure: &Closure, value: ArcValue) -> ArcValue {
        let mut env = closure.env.clone();
        env.push(value);
        EvalContext::new(&mut env, self.globals).eval(&closure.term)
    }

    /// Unfold a fixpoint one step by substituting it for its own binder.
    pub fn unfold_mu(&self, mu: &Arc<MuValue>) -> ArcValue {
        let fixpoint = Arc::new(Value::Stuck(Head::Mu(mu.clone()), Vec::new()));
        self.apply_closure(&mu.body, fixpoint)
    }

    /// Apply a function elimination, performing beta-reduction if possible.
    pub fn apply_fun(&self, mut head: ArcValue, plicity: Plicity, arg: ArcValue) -> ArcValue {
        match Arc::make_mut(&mut head) {
            // Beta-reduction
            Value::Abs(_, closure) => self.apply_closure(closure, arg),
            Value::Modal(inner, _) => self.apply_fun(inner.clone(), plicity, arg),
            // The computation is stuck, preventing further reduction. A
            // stuck `Mu` head stays folded here: only the unifier unfolds.
            Value::Stuck(_, spine) => {
                spine.push(Elim::App(plicity, arg));
                head
            }
            Value::External(external) => {
                if external.args.len() == external.arity {
                    panic_any(Error::ArityMismatch(external.name));
                }
                external.args.push(arg);
                if external.args.len() == external.arity
                    && !external.args.iter().any(|arg| strip_modal(arg).is_stuck())
                {
                    let args: Vec<_> = external.args.iter().map(strip_modal).collect();
                    match (external.step)(&args) {
                        Some(value) => value,
                        // Outside the builtin's domain: stay stuck.
                        None => head,
                    }
                } else {
                    head
                }
            }
            _ => panic_any(Error::InvalidApp),
        }
    }

    /// Apply a projection elimination, looking the label up in the row.
    pub fn apply_proj(&self, mut head: ArcValue, label: Symbol) -> ArcValue {
        if head.is_stuck() {
            if let Value::Stuck(_, spine) = Arc::make_mut(&mut head) {
                spine.push(Elim::Proj(label));
            }
            return head;
        }
        match head.as_ref() {
            Value::Row(row) | Value::Struct(row) | Value::Schema(row) | Value::Variant(row) => {
                match row.get(label) {
                    Some(value) => value.clone(),
                    // An open tail may still reveal the label later, so the
                    // projection suspends instead of forcing the row.
                    None if row.tail_var().is_some() => Arc::new(Value::Stuck(
                        Head::Suspended(head.clone()),
                        vec![Elim::Proj(label)],
                    )),
                    None => panic_any(Error::MissingLabel(label)),
                }
            }
            Value::Modal(inner, _) => self.apply_proj(inner.clone(), label),
            _ => panic_any(Error::InvalidProj),
        }
    }

    /// Apply an injection elimination, replacing or adding the label.
    pub fn apply_inj(&self, mut head: ArcValue, label: Symbol, value: ArcValue) -> ArcValue {
        if head.is_stuck() {
            if let Value::Stuck(_, spine) = Arc::make_mut(&mut head) {
                spine.push(Elim::Inj(label, value));
            }
            return head;
        }
        match head.as_ref() {
            Value::Row(row) => Arc::new(Value::Row(row.set(label, value))),
            Value::Struct(row) => Arc::new(Value::Struct(row.set(label, value))),
            Value::Schema(row) => Arc::new(Value::Schema(row.set(label, value))),
            Value::Variant(row) => Arc::new(Value::Variant(row.set(label, value))),
            Value::Modal(inner, _) => self.apply_inj(inner.clone(), label, value),
            _ => panic_any(Error::InvalidInj),
        }
    }

    /// Apply a match elimination. Stuck scrutinees suspend the whole match;
    /// otherwise alternatives are tried in order.
    pub fn apply_match(&self, mut scrutinee: ArcValue, closure: MatchClosure) -> ArcValue {
        if scrutinee.is_stuck() {
            if let Value::Stuck(_, spine) = Arc::make_mut(&mut scrutinee) {
                spine.push(Elim::Match(closure));
            }
            return scrutinee;
        }
        match self.run_match(&scrutinee, &closure) {
            Some(value) => value,
            // Non-exhaustive matches should have been rejected during
            // elaboration.
            None => panic_any(Error::NonExhaustiveMatch),
        }
    }

    fn run_match(&self, scrutinee: &ArcValue, closure: &MatchClosure) -> Option<ArcValue> {
        for alternative in &closure.alternatives {
            if let Some(bindings) = self.meet(&alternative.pattern, scrutinee) {
                let mut env = closure.env.clone();
                for binding in bindings {
                    env.push(binding);
                }
                return Some(EvalContext::new(&mut env, self.globals).eval(&alternative.term));
            }
        }
        None
    }

    /// Match a pattern against a value, returning the bound values in
    /// binding order. Bound values are wrapped `Modal` with an equality
    /// refinement to themselves, for the benefit of the external verifier.
    pub fn meet(&self, pattern: &Pattern, value: &ArcValue) -> Option<Vec<ArcValue>> {
        let value = self.force(value);
        let target = strip_modal(&value);
        match pattern {
            Pattern::Wildcard => Some(Vec::new()),
            Pattern::Binder(_) => Some(vec![selfify(&target)]),
            Pattern::Lit(literal) => match target.as_ref() {
                Value::Lit(other) if literal == other => Some(Vec::new()),
                _ => None,
            },
            Pattern::Named(name) => match target.as_ref() {
                Value::Lit(Literal::Atom(atom)) if atom == name => Some(Vec::new()),
                _ => None,
            },
            Pattern::Struct(pat_row) => match target.as_ref() {
                Value::Struct(row) | Value::Schema(row) => {
                    self.meet_all(pat_row, row, |row| Value::Struct(row))
                }
                _ => None,
            },
            Pattern::Row(pat_row) => match target.as_ref() {
                Value::Row(row) => self.meet_all(pat_row, row, |row| Value::Row(row)),
                _ => None,
            },
            Pattern::Variant(pat_row) => match target.as_ref() {
                Value::Struct(row) | Value::Variant(row) => self.meet_one(pat_row, row, &target),
                _ => None,
            },
        }
    }

    /// Match every pattern field via row rewriting: look the label up,
    /// remove it, and recurse on the rest. Extra value fields are permitted.
    fn meet_all(
        &self,
        pat_row: &PatRow,
        row: &Row<ArcValue>,
        rebuild: impl Fn(Row<ArcValue>) -> Value,
    ) -> Option<Vec<ArcValue>> {
        let mut bindings = Vec::new();
        let mut row = row.clone();
        for (label, pattern) in &pat_row.fields {
            let (value, rest) = row.rewrite(*label)?;
            bindings.extend(self.meet(pattern, &value)?);
            row = rest;
        }
        if pat_row.rest.is_some() {
            bindings.push(selfify(&Arc::new(rebuild(row))));
        }
        Some(bindings)
    }

    /// Match exactly one variant label: the first pattern field whose label
    /// is present wins, with no fallthrough to sibling fields.
    fn meet_one(
        &self,
        pat_row: &PatRow,
        row: &Row<ArcValue>,
        whole: &ArcValue,
    ) -> Option<Vec<ArcValue>> {
        for (label, pattern) in &pat_row.fields {
            if let Some((value, _)) = row.rewrite(*label) {
                return self.meet(pattern, &value);
            }
        }
        match pat_row.rest {
            Some(_) => Some(vec![selfify(whole)]),
            None => None,
        }
    }

    /// Apply a value to an elimination spine.
    pub fn apply_spine(&self, head: ArcValue, spine: &[Elim]) -> ArcValue {
        spine.iter().fold(head, |head, elim| match elim {
            Elim::App(plicity, arg) => self.apply_fun(head, *plicity, arg.clone()),
            Elim::Proj(label) => self.apply_proj(head, *label),
            Elim::Inj(label, value) => self.apply_inj(head, *label, value.clone()),
            Elim::Match(closure) => self.apply_match(head, closure.clone()),
        })
    }
}

/// Strip modal wrappers from a value.
pub fn strip_modal(value: &ArcValue) -> ArcValue {
    match value.as_ref() {
        Value::Modal(inner, _) => strip_modal(inner),
        _ => value.clone(),
    }
}

/// Strengthen a value with an equality refinement to itself.
fn selfify(value: &ArcValue) -> ArcValue {
    Arc::new(Value::Modal(
        value.clone(),
        Modalities {
            quantity: Quantity::Many,
            liquid: Some(value.clone()),
        },
    ))
}

/// Quotation context.
///
/// Keeps track of the length of the local environment, allowing values to be
/// read back into terms.
#[derive(Copy, Clone)]
pub struct QuoteContext<'env> {
    len: EnvLen,
    globals: Globals<'env>,
}

impl<'env> QuoteContext<'env> {
    pub fn new(len: EnvLen, globals: Globals<'env>) -> QuoteContext<'env> {
        QuoteContext { len, globals }
    }

    fn elim_context(&self) -> ElimContext<'env> {
        ElimContext::new(self.globals)
    }

    fn push(&mut self) {
        self.len.push();
    }

    fn pop(&mut self) {
        self.len.pop();
    }

    /// Quote a [value][Value] back into a [term][Term].
    pub fn quote(&mut self, value: &ArcValue) -> Arc<Term> {
        let value = self.elim_context().force(value);
        match value.as_ref() {
            Value::Lit(literal) => Term::lit(*literal),
            Value::Stuck(head, spine) => {
                let head = match head {
                    Head::Rigid(level) => match self.len.level_to_index(*level) {
                        Some(index) => Term::bound(index),
                        None => panic_any(Error::EscapingRigid(*level)),
                    },
                    Head::Flexible(meta) => Term::meta(*meta),
                    Head::Foreign(name) => Term::var(Var::Foreign(*name)),
                    Head::Mu(mu) => self.quote_mu(mu),
                    Head::Suspended(value) => self.quote(value),
                };
                spine.iter().fold(head, |head, elim| match elim {
                    Elim::App(plicity, arg) => {
                        Arc::new(Term::App(*plicity, head, self.quote(arg)))
                    }
                    Elim::Proj(label) => Arc::new(Term::Proj(*label, head)),
                    Elim::Inj(label, value) => {
                        Arc::new(Term::Inj(*label, self.quote(value), head))
                    }
                    Elim::Match(closure) => {
                        Arc::new(Term::Match(head, self.quote_match(closure)))
                    }
                })
            }
            Value::Abs(binder, closure) => {
                let (binder, body) = match binder {
                    VBinder::Lambda { name, plicity, ann } => {
                        let ann = self.quote(ann);
                        let body = self.quote_closure(closure);
                        (
                            Binder::Lambda {
                                name: *name,
                                plicity: *plicity,
                                ann,
                            },
                            body,
                        )
                    }
                    VBinder::Pi {
                        name,
                        plicity,
                        quantity,
                        ann,
                    } => {
                        let ann = self.quote(ann);
                        let body = self.quote_closure(closure);
                        (
                            Binder::Pi {
                                name: *name,
                                plicity: *plicity,
                                quantity: *quantity,
                                ann,
                            },
                            body,
                        )
                    }
                };
                Arc::new(Term::Abs(binder, body))
            }
            Value::Row(row) => Arc::new(Term::Row(self.quote_row(row))),
            Value::Struct(row) => Arc::new(Term::Struct(self.quote_row(row))),
            Value::Schema(row) => Arc::new(Term::Schema(self.quote_row(row))),
            Value::Variant(row) => Arc::new(Term::Variant(self.quote_row(row))),
            Value::Modal(inner, modalities) => Arc::new(Term::Modal(
                self.quote(inner),
                Modalities {
                    quantity: modalities.quantity,
                    liquid: modalities.liquid.as_ref().map(|liquid| self.quote(liquid)),
                },
            )),
            Value::External(external) => (external.args.iter()).fold(
                Term::var(Var::Foreign(external.name)),
                |head, arg| Arc::new(Term::App(Plicity::Explicit, head, self.quote(arg))),
            ),
        }
    }

    /// Quote a closure by applying it to a fresh rigid variable.
    fn quote_closure(&mut self, closure: &Closure) -> Arc<Term> {
        let var = Value::rigid(self.len.next_level());
        let value = self.elim_context().apply_closure(closure, var);

        self.push();
        let term = self.quote(&value);
        self.pop();

        term
    }

    fn quote_mu(&mut self, mu: &Arc<MuValue>) -> Arc<Term> {
        let ann = self.quote(&mu.ann);
        let body = self.quote_closure(&mu.body);
        Arc::new(Term::Abs(
            Binder::Mu {
                name: mu.name,
                source: mu.source,
                ann,
            },
            body,
        ))
    }

    fn quote_match(&mut self, closure: &MatchClosure) -> Vec<Alternative> {
        (closure.alternatives.iter())
            .map(|alternative| {
                let binders = alternative.pattern.binders();
                let mut env = closure.env.clone();
                let mut len = self.len;
                for _ in &binders {
                    env.push(Value::rigid(len.next_level()));
                    len.push();
                }
                let value = EvalContext::new(&mut env, self.globals).eval(&alternative.term);
                let term = QuoteContext::new(len, self.globals).quote(&value);
                Alternative {
                    pattern: alternative.pattern.clone(),
                    term,
                }
            })
            .collect()
    }

    fn quote_row(&mut self, row: &Row<ArcValue>) -> Row<Arc<Term>> {
        match row {
            Row::Empty => Row::Empty,
            Row::Extend(label, value, rest) => {
                let value = self.quote(value);
                let rest = self.quote_row(rest);
                Row::extend(*label, value, rest)
            }
            Row::Var(RowVar::Meta(meta)) => Row::Var(RowVar::Meta(*meta)),
            Row::Var(RowVar::Rigid(level)) => match self.len.level_to_index(*level) {
                Some(index) => Row::Var(RowVar::Bound(index)),
                None => panic_any(Error::EscapingRigid(*level)),
            },
            Row::Var(RowVar::Bound(index)) => Row::Var(RowVar::Bound(*index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Index;

    fn empty_globals() -> (
        FxHashMap<Symbol, ImportEntry>,
        FxHashMap<Symbol, SigmaEntry>,
        FxHashMap<Symbol, ForeignDef>,
        Solutions,
    ) {
        (
            FxHashMap::default(),
            FxHashMap::default(),
            FxHashMap::default(),
            Solutions::default(),
        )
    }

    fn identity_lambda() -> Arc<Term> {
        Arc::new(Term::Abs(
            Binder::Lambda {
                name: Symbol::intern("x"),
                plicity: Plicity::Explicit,
                ann: Term::atom("Any"),
            },
            Term::bound(Index::last()),
        ))
    }

    #[test]
    fn beta_reduction() {
        let (imports, sigma, foreigns, solutions) = empty_globals();
        let globals = Globals {
            imports: &imports,
            sigma: &sigma,
            foreigns: &foreigns,
            solutions: &solutions,
        };
        let mut locals = SharedEnv::new();
        let term = Term::App(
            Plicity::Explicit,
            identity_lambda(),
            Term::lit(Literal::Num(1.0)),
        );
        let value = EvalContext::new(&mut locals, globals).eval(&term);
        assert!(matches!(value.as_ref(), Value::Lit(Literal::Num(n)) if *n == 1.0));
    }

    #[test]
    fn quote_of_eval_round_trips() {
        let (imports, sigma, foreigns, solutions) = empty_globals();
        let globals = Globals {
            imports: &imports,
            sigma: &sigma,
            foreigns: &foreigns,
            solutions: &solutions,
        };
        let mut locals = SharedEnv::new();
        let term = identity_lambda();
        let value = EvalContext::new(&mut locals, globals).eval(&term);
        let quoted = QuoteContext::new(EnvLen::new(), globals).quote(&value);
        let revalue = EvalContext::new(&mut locals, globals).eval(&quoted);
        // Evaluating the quoted output again reaches the same value, up to
        // alpha-equivalence of bound names.
        let requoted = QuoteContext::new(EnvLen::new(), globals).quote(&revalue);
        match (quoted.as_ref(), requoted.as_ref()) {
            (Term::Abs(_, body0), Term::Abs(_, body1)) => {
                assert!(matches!(body0.as_ref(), Term::Var(Var::Bound(i)) if *i == Index::last()));
                assert!(matches!(body1.as_ref(), Term::Var(Var::Bound(i)) if *i == Index::last()));
            }
            (_, _) => panic!("expected lambdas"),
        }
    }

    #[test]
    fn stuck_spines_grow() {
        let (imports, sigma, foreigns, solutions) = empty_globals();
        let globals = Globals {
            imports: &imports,
            sigma: &sigma,
            foreigns: &foreigns,
            solutions: &solutions,
        };
        let elim = ElimContext::new(globals);
        let head = Value::flexible(MetaId::from_usize(0));
        let applied = elim.apply_fun(head, Plicity::Explicit, Value::lit(Literal::Num(2.0)));
        match applied.as_ref() {
            Value::Stuck(Head::Flexible(_), spine) => assert_eq!(spine.len(), 1),
            _ => panic!("expected a stuck spine"),
        }
    }

    #[test]
    fn force_applies_solutions() {
        let (imports, sigma, foreigns, mut solutions) = empty_globals();
        let meta = MetaId::from_usize(0);
        solutions.insert(meta, Value::lit(Literal::Num(3.0)));
        let globals = Globals {
            imports: &imports,
            sigma: &sigma,
            foreigns: &foreigns,
            solutions: &solutions,
        };
        let elim = ElimContext::new(globals);
        let forced = elim.force(&Value::flexible(meta));
        assert!(matches!(forced.as_ref(), Value::Lit(Literal::Num(n)) if *n == 3.0));
    }

    #[test]
    fn meet_binder_selfifies() {
        let (imports, sigma, foreigns, solutions) = empty_globals();
        let globals = Globals {
            imports: &imports,
            sigma: &sigma,
            foreigns: &foreigns,
            solutions: &solutions,
        };
        let elim = ElimContext::new(globals);
        let value = Value::lit(Literal::Num(4.0));
        let bindings = elim
            .meet(&Pattern::Binder(Symbol::intern("n")), &value)
            .unwrap();
        assert_eq!(bindings.len(), 1);
        match bindings[0].as_ref() {
            Value::Modal(inner, modalities) => {
                assert!(matches!(inner.as_ref(), Value::Lit(Literal::Num(n)) if *n == 4.0));
                assert!(modalities.liquid.is_some());
            }
            _ => panic!("expected a selfified binding"),
        }
    }

    #[test]
    fn variant_meet_first_match_wins() {
        let (imports, sigma, foreigns, solutions) = empty_globals();
        let globals = Globals {
            imports: &imports,
            sigma: &sigma,
            foreigns: &foreigns,
            solutions: &solutions,
        };
        let elim = ElimContext::new(globals);
        let some = Symbol::intern("some");
        let value = Arc::new(Value::Struct(Row::extend(
            some,
            Value::lit(Literal::Num(1.0)),
            Row::Empty,
        )));
        let pattern = Pattern::Variant(PatRow {
            fields: vec![
                (Symbol::intern("none"), Pattern::Wildcard),
                (some, Pattern::Binder(Symbol::intern("x"))),
            ],
            rest: None,
        });
        let bindings = elim.meet(&pattern, &value).unwrap();
        assert_eq!(bindings.len(), 1);
    }
}
