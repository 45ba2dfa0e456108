//! Common definitions that are shared between different parts of the compiler.

use std::fmt::Display;

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers.
pub type Id = internment::Intern<String>;

/// What a name stands for.  Identifier occurrences start out [Kind::Fresh]
/// and are reclassified by context before symbol resolution binds them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, derive_more::Display)]
pub enum Kind {
    #[display("fresh")]
    Fresh,
    #[display("variable")]
    Variable,
    #[display("function")]
    Function,
    #[display("parameter")]
    Parameter,
    #[display("undefined function")]
    UndefinedFunction,
    #[display("function call")]
    FunctionCall,
}

/// A stable index into the symbol arena.  Identifier occurrences and scope
/// maps both project through this index, so every reference to a name sees
/// the annotations installed on its one symbol entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SymbolId(pub usize);

/// Accumulated warnings and errors for one compilation.
///
/// Passes report problems here and keep going, so a single run surfaces
/// everything it can find.  The driver checks [Diagnostics::errors] between
/// stages and suppresses code generation when it is non-zero.
#[derive(Debug, Default)]
pub struct Diagnostics {
    messages: Vec<String>,
    errors: u32,
    warnings: u32,
}

impl Diagnostics {
    pub fn error(&mut self, message: impl Display) {
        self.errors += 1;
        self.messages.push(format!("Error: {message}"));
    }

    pub fn warning(&mut self, message: impl Display) {
        self.warnings += 1;
        self.messages.push(format!("Warning: {message}"));
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn warnings(&self) -> u32 {
        self.warnings
    }

    /// The messages in the order they were reported, each already prefixed
    /// with `Error: ` or `Warning: `.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_keep_order_and_counts() {
        let mut diags = Diagnostics::default();
        diags.warning("Line 1: something dubious");
        diags.error("Line 2: something wrong");
        assert_eq!(diags.errors(), 1);
        assert_eq!(diags.warnings(), 1);
        assert_eq!(diags.messages()[0], "Warning: Line 1: something dubious");
        assert_eq!(diags.messages()[1], "Error: Line 2: something wrong");
    }
}
