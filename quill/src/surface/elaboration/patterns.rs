//! Elaboration of match patterns.
//!
//! Pattern elaboration returns the core pattern, the type of values it
//! matches, and the names it binds (with their types, in binding order). The
//! caller constrains the pattern type against the scrutinee type and pushes
//! the binders before elaborating the branch.

use std::sync::Arc;

use crate::core::semantics::{ArcValue, Value};
use crate::core::{Literal, PatRow, Pattern, Row, RowVar};
use crate::surface::elaboration::{Context, Error};
use crate::surface::{self, PatRowExpr};
use crate::symbol::Symbol;

impl Context {
    pub(crate) fn synth_pattern(
        &mut self,
        pattern: &surface::Pattern,
    ) -> Result<(Pattern, ArcValue, Vec<(Symbol, ArcValue)>), Error> {
        match pattern {
            surface::Pattern::Wildcard(_) => {
                let r#type = self.fresh_type_meta();
                Ok((Pattern::Wildcard, r#type, Vec::new()))
            }
            surface::Pattern::Name(_, name) => {
                // A name that resolves to an import matches that atom
                // instead of binding.
                if let Some(entry) = self.imports().get(name) {
                    return Ok((Pattern::Named(*name), entry.r#type.clone(), Vec::new()));
                }
                let r#type = self.fresh_type_meta();
                Ok((
                    Pattern::Binder(*name),
                    r#type.clone(),
                    vec![(*name, r#type)],
                ))
            }
            surface::Pattern::Lit(_, literal) => {
                let r#type = match literal {
                    Literal::Num(_) => Value::atom("Num"),
                    Literal::Str(_) => Value::atom("String"),
                    Literal::Bool(_) => Value::atom("Bool"),
                    Literal::Unit => Value::atom("Unit"),
                    Literal::Atom(_) => Value::universe(),
                };
                Ok((Pattern::Lit(*literal), r#type, Vec::new()))
            }
            surface::Pattern::Struct(_, row) => {
                let (pat_row, type_row, binders) = self.synth_pattern_row(row)?;
                Ok((
                    Pattern::Struct(pat_row),
                    Arc::new(Value::Schema(type_row)),
                    binders,
                ))
            }
            surface::Pattern::Tuple(_, fields) => {
                let row = PatRowExpr {
                    fields: fields
                        .iter()
                        .enumerate()
                        .map(|(index, field)| (Symbol::get_tuple_label(index), field.clone()))
                        .collect(),
                    rest: None,
                };
                let (pat_row, type_row, binders) = self.synth_pattern_row(&row)?;
                Ok((
                    Pattern::Struct(pat_row),
                    Arc::new(Value::Schema(type_row)),
                    binders,
                ))
            }
            surface::Pattern::Variant(_, row) => {
                let (pat_row, type_row, binders) = self.synth_pattern_row(row)?;
                // Variant patterns match an open variant: other labels may
                // flow in through the fresh tail.
                let type_row = self.open_row(type_row);
                Ok((
                    Pattern::Variant(pat_row),
                    Arc::new(Value::Variant(type_row)),
                    binders,
                ))
            }
            surface::Pattern::List(range, _) => Err(Error::NotImplemented {
                range: *range,
                feature: "list patterns",
            }),
        }
    }

    fn synth_pattern_row(
        &mut self,
        row: &PatRowExpr,
    ) -> Result<(PatRow, Row<ArcValue>, Vec<(Symbol, ArcValue)>), Error> {
        let mut binders = Vec::new();
        let mut fields = Vec::new();
        let mut type_fields = Vec::new();
        for (label, pattern) in &row.fields {
            let (pattern, r#type, field_binders) = self.synth_pattern(pattern)?;
            fields.push((*label, pattern));
            type_fields.push((*label, r#type));
            binders.extend(field_binders);
        }

        let tail = match row.rest {
            None => Row::Empty,
            Some(name) => {
                let row_meta = self.fresh_meta(Value::row_kind());
                let tail = Row::Var(RowVar::Meta(row_meta));
                binders.push((name, Arc::new(Value::Schema(tail.clone()))));
                tail
            }
        };

        Ok((
            PatRow {
                fields,
                rest: row.rest,
            },
            Row::from_fields(type_fields, tail),
            binders,
        ))
    }

    /// Ensure a row type has an open tail, adding a fresh row metavariable
    /// when it is closed.
    fn open_row(&mut self, row: Row<ArcValue>) -> Row<ArcValue> {
        match row {
            Row::Empty => {
                let row_meta = self.fresh_meta(Value::row_kind());
                Row::Var(RowVar::Meta(row_meta))
            }
            Row::Var(var) => Row::Var(var),
            Row::Extend(label, value, rest) => {
                let rest = self.open_row(*rest);
                Row::extend(label, value, rest)
            }
        }
    }
}
