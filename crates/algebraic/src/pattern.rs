//! The pattern model: validated search and replacement expressions.

use std::fmt;

use crate::ast;
use crate::error::{Error, Result};
use crate::lexer::Pos;
use crate::opcodes::Opcode;
use crate::types::{ClassSet, Constraint, Literal, TypeClass};
use crate::RuleId;

/// How faithfully a rule preserves the value it rewrites.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Exactness {
    /// The replacement computes the same value as the search pattern for
    /// every non-NaN input. Signed zeros compare equal.
    Exact,
    /// The replacement is an approximation, e.g. it changes rounding.
    Inexact,
}

impl Exactness {
    /// The weaker of two tiers.
    pub fn weakest(self, other: Exactness) -> Exactness {
        self.max(other)
    }
}

impl fmt::Display for Exactness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Exactness::Exact => "exact",
            Exactness::Inexact => "inexact",
        })
    }
}

/// A validated rule.
#[derive(Clone, Debug)]
pub struct Rule {
    /// The rule's position in its table.
    pub id: RuleId,
    /// Where the rule is defined.
    pub pos: Pos,
    /// The precision tier.
    pub exactness: Exactness,
    /// The search pattern. Always an `Expr::Op`.
    pub search: Expr,
    /// The replacement.
    pub replace: Expr,
}

impl Rule {
    /// The canonical text of the rule's two sides, used to detect duplicates.
    pub fn canonical(&self) -> String {
        format!("{} {}", self.search, self.replace)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exactness {
            Exactness::Exact => write!(f, "(rule {} {})", self.search, self.replace),
            Exactness::Inexact => write!(f, "(rule inexact {} {})", self.search, self.replace),
        }
    }
}

/// A pattern variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Var {
    /// The name, without the `#` prefix.
    pub name: String,
    /// Whether the variable only matches compile-time constants.
    pub const_only: bool,
    /// The constraint from the variable's annotation.
    pub constraint: Constraint,
}

/// An expression node.
#[derive(Clone, Debug)]
pub enum Expr {
    /// An operation applied to operands.
    Op {
        /// The operation.
        opcode: Opcode,
        /// The operands, exactly as many as the opcode's arity.
        args: Vec<Expr>,
        /// Where the operation is written.
        pos: Pos,
    },
    /// A variable occurrence.
    Var {
        /// The variable.
        var: Var,
        /// Where the occurrence is written.
        pos: Pos,
    },
    /// A literal constant. Each occurrence is its own node.
    Const {
        /// The value, typed only by its literal form.
        value: Literal,
        /// Where the literal is written.
        pos: Pos,
    },
}

impl Expr {
    /// Resolve a parsed pattern against the opcode catalog.
    pub fn from_ast(pattern: &ast::Pattern) -> Result<Expr> {
        match pattern {
            ast::Pattern::Term { sym, args, pos } => {
                let opcode = Opcode::from_name(&sym.0).ok_or_else(|| {
                    malformed(sym.1, format!("unknown opcode `{}`", sym.0))
                })?;
                if args.len() != opcode.arity() {
                    return Err(malformed(
                        *pos,
                        format!(
                            "`{opcode}` takes {} operand(s) but {} were given",
                            opcode.arity(),
                            args.len()
                        ),
                    ));
                }
                let args = args.iter().map(Expr::from_ast).collect::<Result<_>>()?;
                Ok(Expr::Op {
                    opcode,
                    args,
                    pos: *pos,
                })
            }
            ast::Pattern::Var { name, annot } => {
                let pos = name.1;
                let (bare, const_only) = match name.0.strip_prefix('#') {
                    Some(bare) => (bare, true),
                    None => (&name.0[..], false),
                };
                if bare.is_empty() {
                    return Err(malformed(pos, "empty variable name".to_string()));
                }
                if Opcode::from_name(bare).is_some() {
                    return Err(malformed(
                        pos,
                        format!("`{bare}` is an opcode; write `({bare} ...)` to apply it"),
                    ));
                }
                let constraint = match annot {
                    Some(annot) => resolve_annot(annot)?,
                    None => Constraint::ANY,
                };
                Ok(Expr::Var {
                    var: Var {
                        name: bare.to_string(),
                        const_only,
                        constraint,
                    },
                    pos,
                })
            }
            ast::Pattern::Int { val, pos } => {
                let value = i64::try_from(*val)
                    .or_else(|_| u64::try_from(*val).map(|v| v as i64))
                    .map_err(|_| malformed(*pos, format!("integer literal `{val}` is out of range")))?;
                Ok(Expr::Const {
                    value: Literal::Int(value),
                    pos: *pos,
                })
            }
            ast::Pattern::Float { val, pos } => {
                if val.is_nan() {
                    return Err(malformed(*pos, "a NaN literal never matches".to_string()));
                }
                Ok(Expr::Const {
                    value: Literal::Float(*val),
                    pos: *pos,
                })
            }
            ast::Pattern::Bool { val, pos } => Ok(Expr::Const {
                value: Literal::Bool(*val),
                pos: *pos,
            }),
        }
    }

    /// Where this expression is written.
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Op { pos, .. } | Expr::Var { pos, .. } | Expr::Const { pos, .. } => *pos,
        }
    }

    /// Visit every variable occurrence, in pre-order.
    pub fn for_each_var<'a>(&'a self, f: &mut impl FnMut(&'a Var, Pos)) {
        match self {
            Expr::Op { args, .. } => {
                for arg in args {
                    arg.for_each_var(f);
                }
            }
            Expr::Var { var, pos } => f(var, *pos),
            Expr::Const { .. } => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Op { opcode, args, .. } => {
                write!(f, "({opcode}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            Expr::Var { var, .. } => write!(f, "{var}"),
            Expr::Const { value, .. } => write!(f, "{value}"),
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.const_only {
            write!(f, "#")?;
        }
        write!(f, "{}", self.name)?;
        let c = self.constraint;
        if c == Constraint::ANY {
            return Ok(());
        }
        match (c.classes.single(), c.bits) {
            (Some(TypeClass::Bool), _) => write!(f, "@bool"),
            (Some(class), Some(bits)) => write!(f, "@{class}{bits}"),
            (Some(class), None) => write!(f, "@{class}"),
            (None, Some(bits)) => write!(f, "@{bits}"),
            (None, None) => write!(f, "@{c}"),
        }
    }
}

fn malformed(pos: Pos, msg: String) -> Error {
    Error::MalformedPattern { msg, pos }
}

fn resolve_annot(annot: &ast::Annot) -> Result<Constraint> {
    let (constraint, pos, text) = match annot {
        ast::Annot::Bits(bits, pos) => {
            let c = u8::try_from(*bits)
                .ok()
                .map(|bits| Constraint::new(ClassSet::ANY, Some(bits)));
            (c, *pos, bits.to_string())
        }
        ast::Annot::Named(ast::Ident(name, pos)) => {
            let split = name
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(name.len());
            let (class, bits) = name.split_at(split);
            let classes = match class {
                "float" => ClassSet::FLOAT,
                "int" => ClassSet::INT,
                "bool" => ClassSet::BOOL,
                _ => ClassSet::EMPTY,
            };
            let bits = match bits {
                "" => Some(None),
                digits => digits.parse::<u8>().ok().map(Some),
            };
            let c = bits.map(|bits| Constraint::new(classes, bits));
            (c, *pos, name.clone())
        }
    };
    match constraint {
        Some(c) if !c.classes.is_empty() => Ok(c),
        _ => Err(malformed(pos, format!("`{text}` is not a valid type"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    fn resolve(src: &str) -> Result<Vec<(Expr, Expr)>> {
        parse_str(src)?
            .rules
            .iter()
            .map(|r| Ok((Expr::from_ast(&r.search)?, Expr::from_ast(&r.replace)?)))
            .collect()
    }

    #[track_caller]
    fn malformed_msg(src: &str) -> String {
        match resolve(src) {
            Err(Error::MalformedPattern { msg, .. }) => msg,
            r => panic!("expected a malformed pattern, got {r:?}"),
        }
    }

    #[test]
    fn canonical_printing() {
        let rules = resolve(
            "(rule (fadd   a  0.0) a)\n\
             (rule (iand #a@32 b@int16) (ior b@float a@bool))\n\
             (rule (fmul a 1e0) -inf)",
        )
        .unwrap();
        let printed: Vec<String> = rules.iter().map(|(s, r)| format!("{s} {r}")).collect();
        assert_eq!(
            printed,
            [
                "(fadd a 0.0) a",
                "(iand #a@32 b@int16) (ior b@float a@bool)",
                "(fmul a 1.0) -inf",
            ]
        );
    }

    #[test]
    fn arity_mismatch() {
        assert!(malformed_msg("(rule (fadd a) a)").contains("takes 2 operand(s) but 1"));
        assert!(malformed_msg("(rule (fneg a) (fneg a a))").contains("takes 1 operand(s)"));
    }

    #[test]
    fn opcode_names_are_not_variables() {
        assert!(malformed_msg("(rule (fadd fneg 0.0) fneg)").contains("`fneg` is an opcode"));
        assert!(malformed_msg("(rule (frobnicate a) a)").contains("unknown opcode"));
    }

    #[test]
    fn bad_literals_and_annotations() {
        assert!(malformed_msg("(rule (fadd a nan) a)").contains("NaN"));
        assert!(malformed_msg("(rule (iadd a@7 0) a)").contains("not a valid type"));
        assert!(malformed_msg("(rule (iadd a@uint 0) a)").contains("not a valid type"));
        assert!(malformed_msg("(rule (iadd a@float8 0) a)").contains("not a valid type"));
        assert!(
            malformed_msg("(rule (iadd a 0x1_0000_0000_0000_0000) a)").contains("out of range")
        );
    }

    #[test]
    fn unsigned_literals_wrap() {
        let rules = resolve("(rule (iand a 0xffff_ffff_ffff_ffff) a)").unwrap();
        match &rules[0].0 {
            Expr::Op { args, .. } => match &args[1] {
                Expr::Const { value, .. } => assert_eq!(*value, Literal::Int(-1)),
                e => panic!("unexpected {e}"),
            },
            e => panic!("unexpected {e}"),
        }
    }

    #[test]
    fn exactness_order() {
        assert_eq!(Exactness::Exact.weakest(Exactness::Inexact), Exactness::Inexact);
        assert_eq!(Exactness::Exact.weakest(Exactness::Exact), Exactness::Exact);
    }
}
