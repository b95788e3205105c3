//! Globally interned strings.
//!
//! Names and row labels are compared constantly during elaboration, so they
//! are interned once and compared by id afterwards.

use std::fmt;
use std::sync::RwLock;

use once_cell::sync::Lazy;

struct StringInterner {
    strings: lasso::ThreadedRodeo,
    tuple_labels: Vec<Symbol>,
    alphabetic_names: Vec<Symbol>,
}

static INTERNER: Lazy<RwLock<StringInterner>> = Lazy::new(|| {
    RwLock::new(StringInterner {
        strings: lasso::ThreadedRodeo::new(),
        tuple_labels: Vec::new(),
        alphabetic_names: Vec::new(),
    })
});

impl StringInterner {
    /// Allocate and intern all alphabetic names up-to and including
    /// `max_index` if they are not already present.
    fn reserve_alphabetic_names(&mut self, max_index: usize) {
        fill_vec(&mut self.alphabetic_names, max_index, |index| {
            Symbol(self.strings.get_or_intern(alphabetic_name(index)))
        })
    }

    fn get_alphabetic_name(&mut self, index: usize) -> Symbol {
        self.reserve_alphabetic_names(index);
        self.alphabetic_names[index]
    }

    /// Allocate and intern all tuple labels up-to and including `max_index`
    /// if they are not already present.
    fn reserve_tuple_labels(&mut self, max_index: usize) {
        fill_vec(&mut self.tuple_labels, max_index, |index| {
            Symbol(self.strings.get_or_intern(format!("_{index}")))
        })
    }

    fn get_tuple_label(&mut self, index: usize) -> Symbol {
        self.reserve_tuple_labels(index);
        self.tuple_labels[index]
    }
}

/// Produce `a`–`z`, then `a1`–`z1`, and so on.
fn alphabetic_name(index: usize) -> String {
    let base = index / 26;
    let letter = (index % 26) as u8 + b'a';
    let letter = letter as char;
    if base == 0 {
        format!("{letter}")
    } else {
        format!("{letter}{base}")
    }
}

fn fill_vec<T>(vec: &mut Vec<T>, max_index: usize, f: impl FnMut(usize) -> T) {
    vec.extend((vec.len()..=max_index).map(f))
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(lasso::Spur);

impl Symbol {
    pub fn intern(sym: impl AsRef<str>) -> Self {
        Self(INTERNER.write().unwrap().strings.get_or_intern(sym))
    }

    pub fn intern_static(sym: &'static str) -> Self {
        Self(INTERNER.write().unwrap().strings.get_or_intern_static(sym))
    }

    pub fn resolve<'a>(&'a self) -> &'a str {
        let interner = INTERNER.read().unwrap();
        let symbol = interner.strings.resolve(&self.0);

        // SAFETY: The lifetime is a bit of a lie: it is really tied to the
        // lifetime of `INTERNER`. But `INTERNER` is never dropped (it is
        // static), so it is safe to truncate the lifetime to `'a`.
        unsafe { std::mem::transmute::<&str, &'a str>(symbol) }
    }

    /// Retrieve an alphabetic name based on a numeric count. Used to produce
    /// human-readable names for generated binders.
    pub fn get_alphabetic_name(index: usize) -> Symbol {
        INTERNER.write().unwrap().get_alphabetic_name(index)
    }

    /// Get or intern a label in the form `_{index}`.
    pub fn get_tuple_label(index: usize) -> Symbol {
        INTERNER.write().unwrap().get_tuple_label(index)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        self.resolve()
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resolve())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resolve())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        assert_eq!(Symbol::intern("x"), Symbol::intern("x"));
        assert_ne!(Symbol::intern("x"), Symbol::intern("y"));
        assert_eq!(Symbol::intern("x").resolve(), "x");
    }

    #[test]
    fn alphabetic_names() {
        assert_eq!(Symbol::get_alphabetic_name(0), Symbol::intern("a"));
        assert_eq!(Symbol::get_alphabetic_name(25), Symbol::intern("z"));
        assert_eq!(Symbol::get_alphabetic_name(26), Symbol::intern("a1"));
    }

    #[test]
    fn tuple_labels() {
        assert_eq!(Symbol::get_tuple_label(0), Symbol::intern("_0"));
        assert_eq!(Symbol::get_tuple_label(1), Symbol::intern("_1"));
    }
}
