//! Error types.

use crate::lexer::Pos;
use crate::RuleId;

/// A `Result` alias defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while compiling a rule table.
///
/// Every variant is fatal to compilation: a table that produces any of these
/// never yields a runnable pass.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// The rule table text could not be tokenized or parsed.
    #[error("{pos}: parse error: {msg}")]
    Parse {
        /// The error message.
        msg: String,
        /// Where the error occurred.
        pos: Pos,
    },

    /// A pattern is structurally invalid: wrong arity, unknown opcode, a
    /// variable named like an opcode, or a replacement that references a
    /// variable the search pattern never binds.
    #[error("{pos}: malformed pattern: {msg}")]
    MalformedPattern {
        /// The error message.
        msg: String,
        /// Where the error occurred.
        pos: Pos,
    },

    /// Two rules are byte-for-byte identical.
    #[error("{pos}: rule {rule} duplicates rule {first}")]
    DuplicateRule {
        /// The later of the two rules.
        rule: RuleId,
        /// The earlier rule it duplicates.
        first: RuleId,
        /// Where the duplicate is defined.
        pos: Pos,
    },

    /// Two uses of one variable or literal require incompatible types, or a
    /// replacement node's type cannot be determined.
    #[error("{pos}: type conflict: {msg}")]
    TypeConflict {
        /// The error message.
        msg: String,
        /// Where the error occurred.
        pos: Pos,
    },

    /// Multiple errors.
    #[error("{}", DisplayErrors(.0))]
    Errors(Vec<Error>),
}

impl Error {
    /// Collapse a list of errors into one, or `None` if the list is empty.
    pub fn from_errors(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Errors(errors)),
        }
    }

    /// Iterate over the individual errors, flattening `Errors`.
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            while let Some(e) = stack.pop() {
                match e {
                    Error::Errors(es) => stack.extend(es.iter().rev()),
                    e => return Some(e),
                }
            }
            None
        })
    }

    /// The source position this error refers to, if it is a single error.
    pub fn pos(&self) -> Option<Pos> {
        match self {
            Error::Parse { pos, .. }
            | Error::MalformedPattern { pos, .. }
            | Error::DuplicateRule { pos, .. }
            | Error::TypeConflict { pos, .. } => Some(*pos),
            Error::Errors(_) => None,
        }
    }
}

struct DisplayErrors<'a>(&'a [Error]);

impl std::fmt::Display for DisplayErrors<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}
