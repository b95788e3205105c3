//! Surface language.
//!
//! This is the contract with the external parser: a located tree of terms,
//! patterns, and top-level statements. Names are unresolved; the elaborator
//! resolves them against the context, innermost binder first.

use crate::core::quantity::Quantity;
use crate::core::{Literal, Plicity};
use crate::source::ByteRange;
use crate::symbol::Symbol;

pub mod elaboration;

/// Surface terms.
#[derive(Debug, Clone)]
pub enum Term {
    /// Constant literals.
    Lit(ByteRange, Literal),
    /// Named variable occurrences.
    Name(ByteRange, Symbol),
    /// A hole to be filled in by unification.
    Hole(ByteRange),
    /// Annotated terms.
    Ann(ByteRange, Box<Term>, Box<Term>),
    /// Function literals.
    Lambda {
        range: ByteRange,
        name: Symbol,
        plicity: Plicity,
        ann: Option<Box<Term>>,
        body: Box<Term>,
    },
    /// Dependent function types. The binder may carry a multiplicity.
    Pi {
        range: ByteRange,
        name: Symbol,
        plicity: Plicity,
        quantity: Option<Quantity>,
        domain: Box<Term>,
        codomain: Box<Term>,
    },
    /// Non-dependent function types.
    Arrow(ByteRange, Box<Term>, Box<Term>),
    /// Applications.
    App {
        range: ByteRange,
        plicity: Plicity,
        head: Box<Term>,
        arg: Box<Term>,
    },
    /// Record literals. Also record types, when checked against `Type`.
    Struct(ByteRange, RowExpr),
    /// Positional records, desugared to labels `_0`, `_1`, ….
    Tuple(ByteRange, Vec<Term>),
    /// Variant types.
    Variant(ByteRange, RowExpr),
    /// Bare row literals.
    Row(ByteRange, RowExpr),
    /// A tagged value, synthesising an open variant type.
    Tagged {
        range: ByteRange,
        tag: Symbol,
        term: Box<Term>,
    },
    /// Field projection.
    Proj {
        range: ByteRange,
        head: Box<Term>,
        label: Symbol,
    },
    /// Field injection.
    Inj {
        range: ByteRange,
        label: Symbol,
        value: Box<Term>,
        head: Box<Term>,
    },
    /// Pattern matches.
    Match {
        range: ByteRange,
        scrutinee: Box<Term>,
        alternatives: Vec<Alternative>,
    },
    /// Statement blocks. A missing return expression defaults to `unit`.
    Block {
        range: ByteRange,
        statements: Vec<Statement>,
        ret: Option<Box<Term>>,
    },
    /// Modal terms: an optional multiplicity and an optional liquid
    /// (refinement) predicate.
    Modal {
        range: ByteRange,
        term: Box<Term>,
        quantity: Option<Quantity>,
        liquid: Option<Box<Term>>,
    },
    /// List literals. Not supported by the elaborator yet.
    List(ByteRange, Vec<Term>),
}

impl Term {
    /// Get the source range of the term.
    pub fn range(&self) -> ByteRange {
        match self {
            Term::Lit(range, _)
            | Term::Name(range, _)
            | Term::Hole(range)
            | Term::Ann(range, _, _)
            | Term::Lambda { range, .. }
            | Term::Pi { range, .. }
            | Term::Arrow(range, _, _)
            | Term::App { range, .. }
            | Term::Struct(range, _)
            | Term::Tuple(range, _)
            | Term::Variant(range, _)
            | Term::Row(range, _)
            | Term::Tagged { range, .. }
            | Term::Proj { range, .. }
            | Term::Inj { range, .. }
            | Term::Match { range, .. }
            | Term::Block { range, .. }
            | Term::Modal { range, .. }
            | Term::List(range, _) => *range,
        }
    }
}

/// A surface row: labelled fields with an optional named tail variable.
#[derive(Debug, Clone)]
pub struct RowExpr {
    pub fields: Vec<(Symbol, Term)>,
    pub tail: Option<(ByteRange, Symbol)>,
}

impl RowExpr {
    pub fn closed(fields: Vec<(Symbol, Term)>) -> RowExpr {
        RowExpr {
            fields,
            tail: None,
        }
    }
}

/// A match alternative.
#[derive(Debug, Clone)]
pub struct Alternative {
    pub pattern: Pattern,
    pub term: Term,
}

/// Surface patterns.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches anything, binding nothing.
    Wildcard(ByteRange),
    /// Binds the scrutinee, unless the name resolves to an import.
    Name(ByteRange, Symbol),
    /// Matches a structurally equal literal.
    Lit(ByteRange, Literal),
    /// Matches a record field-wise.
    Struct(ByteRange, PatRowExpr),
    /// Positional record patterns.
    Tuple(ByteRange, Vec<Pattern>),
    /// Matches one variant label.
    Variant(ByteRange, PatRowExpr),
    /// List patterns. Not supported by the elaborator yet.
    List(ByteRange, Vec<Pattern>),
}

impl Pattern {
    pub fn range(&self) -> ByteRange {
        match self {
            Pattern::Wildcard(range)
            | Pattern::Name(range, _)
            | Pattern::Lit(range, _)
            | Pattern::Struct(range, _)
            | Pattern::Tuple(range, _)
            | Pattern::Variant(range, _)
            | Pattern::List(range, _) => *range,
        }
    }
}

/// A row of sub-patterns with an optional rest binder.
#[derive(Debug, Clone)]
pub struct PatRowExpr {
    pub fields: Vec<(Symbol, Pattern)>,
    pub rest: Option<Symbol>,
}

/// Top-level (and block-level) statements.
#[derive(Debug, Clone)]
pub enum Statement {
    /// Definitions.
    Let {
        range: ByteRange,
        name: Symbol,
        ann: Option<Term>,
        value: Term,
    },
    /// Register a value in the ambient instance table used to resolve
    /// implicit arguments.
    Using { range: ByteRange, value: Term },
    /// Declare a builtin with the given type.
    Foreign {
        range: ByteRange,
        name: Symbol,
        ann: Term,
    },
    /// A bare expression.
    Expr(Term),
}

impl Statement {
    pub fn range(&self) -> ByteRange {
        match self {
            Statement::Let { range, .. }
            | Statement::Using { range, .. }
            | Statement::Foreign { range, .. } => *range,
            Statement::Expr(term) => term.range(),
        }
    }

    /// The name this statement defines, if any.
    pub fn name(&self) -> Option<Symbol> {
        match self {
            Statement::Let { name, .. } | Statement::Foreign { name, .. } => Some(*name),
            Statement::Using { .. } | Statement::Expr(_) => None,
        }
    }
}
