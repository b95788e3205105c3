//! Reporting diagnostics from elaboration errors.

use codespan_reporting::diagnostic::{Diagnostic, Label};

use crate::core::pretty;
use crate::surface::elaboration::Error;

const PRETTY_WIDTH: usize = 78;

impl Error {
    /// Render this error as a diagnostic for the given file.
    pub fn to_diagnostic(&self, file_id: usize) -> Diagnostic<usize> {
        match self {
            Error::UnboundVariable {
                range,
                name,
                suggestion,
            } => {
                let diagnostic = Diagnostic::error()
                    .with_message(format!("cannot find `{name}` in scope"))
                    .with_labels(vec![Label::primary(file_id, *range)
                        .with_message("not found in scope")]);
                match suggestion {
                    Some(suggestion) => diagnostic
                        .with_notes(vec![format!("help: did you mean `{suggestion}`?")]),
                    None => diagnostic,
                }
            }
            Error::UnificationFailure {
                provenance,
                lhs,
                rhs,
            } => Diagnostic::error()
                .with_message("mismatched types")
                .with_labels(vec![Label::primary(file_id, provenance.range)
                    .with_message(provenance.task)])
                .with_notes(vec![
                    format!("expected: {}", pretty::Context::render(rhs, PRETTY_WIDTH)),
                    format!("   found: {}", pretty::Context::render(lhs, PRETTY_WIDTH)),
                ]),
            Error::CyclicSolution { provenance, meta } => Diagnostic::error()
                .with_message(format!("cannot construct the infinite type `{meta}`"))
                .with_labels(vec![Label::primary(file_id, provenance.range)
                    .with_message(provenance.task)]),
            Error::MissingLabel { provenance, label } => Diagnostic::error()
                .with_message(format!("missing field `{label}`"))
                .with_labels(vec![Label::primary(file_id, provenance.range)
                    .with_message(provenance.task)]),
            Error::UsageViolation {
                range,
                name,
                expected,
                computed,
            } => Diagnostic::error()
                .with_message(format!(
                    "`{name}` is used {computed} times, but its multiplicity is {expected}"
                ))
                .with_labels(vec![Label::primary(file_id, *range)
                    .with_message("usage exceeds the declared multiplicity")]),
            Error::PlicityMismatch {
                range,
                expected,
                found,
            } => Diagnostic::error()
                .with_message(format!(
                    "expected an {expected} argument, found an {found} argument"
                ))
                .with_labels(vec![Label::primary(file_id, *range)]),
            Error::NotImplemented { range, feature } => Diagnostic::error()
                .with_message(format!("{feature} are not supported yet"))
                .with_labels(vec![Label::primary(file_id, *range)]),
        }
    }
}
