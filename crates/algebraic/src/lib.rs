#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

macro_rules! declare_id {
    (
        $(#[$attr:meta])*
            $name:ident
    ) => {
        $(#[$attr])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);
        impl $name {
            /// Get the index of this id.
            pub fn index(self) -> usize {
                self.0
            }
        }
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

declare_id!(
    /// The id of a rule: its position in the rule table.
    RuleId
);

pub mod ast;
pub mod commute;
pub mod compile;
pub mod config;
pub mod error;
pub mod infer;
pub mod ir;
pub mod lexer;
pub mod loader;
pub mod matcher;
pub mod opcodes;
pub mod parser;
pub mod pass;
pub mod pattern;
pub mod replace;
pub mod ssa;
pub mod types;
pub mod verify;

pub use crate::compile::{compile, CompiledRule, CompiledRules};
pub use crate::config::{CompileOptions, Config, DuplicatePolicy, PassOptions};
pub use crate::error::{Error, Result};
pub use crate::ir::Function;
pub use crate::opcodes::Opcode;
pub use crate::pass::{Pass, PassOutcome, PassState};
pub use crate::pattern::Exactness;
pub use crate::types::{Literal, Type, TypeClass};

/// The built-in table of algebraic simplifications, in rule-language source
/// form.
pub fn builtin_rules() -> &'static str {
    include_str!("../rules/algebraic.rules")
}
