//! Abstract syntax tree (AST) of rule-table source, before any validation.

use crate::lexer::Pos;

/// The parsed form of a rule table: the rules in source order.
#[derive(Clone, Debug)]
pub struct Defs {
    /// The rules.
    pub rules: Vec<RuleDef>,
}

/// An identifier with its position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ident(pub String, pub Pos);

/// `(rule [inexact] <search> <replace>)`
#[derive(Clone, Debug)]
pub struct RuleDef {
    /// Position of the `rule` keyword.
    pub pos: Pos,
    /// Whether the rule was tagged `inexact`.
    pub inexact: bool,
    /// The search pattern.
    pub search: Pattern,
    /// The replacement pattern.
    pub replace: Pattern,
}

/// A pattern as written.
///
/// The parser does not know the opcode catalog, so a parenthesized form is a
/// `Term` with any head symbol and a bare symbol is a `Var`; telling opcodes
/// from variables happens when the pattern is resolved.
#[derive(Clone, Debug)]
pub enum Pattern {
    /// `(sym args...)`
    Term {
        /// The operator symbol.
        sym: Ident,
        /// The operands.
        args: Vec<Pattern>,
        /// Position of the opening paren.
        pos: Pos,
    },
    /// A bare symbol, optionally with an `@` type annotation.
    Var {
        /// The name, including any leading `#`.
        name: Ident,
        /// The annotation after `@`, if any.
        annot: Option<Annot>,
    },
    /// An integer literal.
    Int {
        /// The value.
        val: i128,
        /// Where it occurs.
        pos: Pos,
    },
    /// A float literal.
    Float {
        /// The value.
        val: f64,
        /// Where it occurs.
        pos: Pos,
    },
    /// `true` or `false`.
    Bool {
        /// The value.
        val: bool,
        /// Where it occurs.
        pos: Pos,
    },
}

impl Pattern {
    /// The position of this pattern in the source.
    pub fn pos(&self) -> Pos {
        match self {
            Pattern::Term { pos, .. }
            | Pattern::Int { pos, .. }
            | Pattern::Float { pos, .. }
            | Pattern::Bool { pos, .. } => *pos,
            Pattern::Var { name, .. } => name.1,
        }
    }
}

/// A type annotation: the part after `@` in `a@32` or `a@float32`.
#[derive(Clone, Debug)]
pub enum Annot {
    /// A bare bit width.
    Bits(i128, Pos),
    /// A class name with an optional width, e.g. `float` or `int16`.
    Named(Ident),
}
