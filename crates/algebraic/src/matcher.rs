//! Compiling search patterns into linear match programs.
//!
//! A [`Matcher`] is a straight-line list of [`MatchOp`]s over a register
//! file of IR values. Register 0 holds the value being rewritten; each
//! `Opcode` op loads the operands of the instruction defining its register
//! into fresh registers. Ops run in order and the first failing op fails the
//! whole match, so nothing below a mismatched operation is ever looked at.

use std::collections::{HashMap, HashSet};
use std::fmt;

use smallvec::SmallVec;

use crate::infer::{Node, NodeId, NodeKind, Slot, TypedRule, VarId};
use crate::ir::{constant_value, Function};
use crate::opcodes::Opcode;
use crate::types::{Constraint, Literal};

declare_id!(
    /// A register of a match program.
    Reg
);

/// One check of a match program.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchOp {
    /// The value in `reg` must be defined by an `opcode` instruction. Its
    /// operands are loaded into `args`.
    Opcode {
        /// The register holding the value.
        reg: Reg,
        /// The required opcode.
        opcode: Opcode,
        /// The registers receiving the operands.
        args: SmallVec<[Reg; 3]>,
    },
    /// The type of the value in `reg` must satisfy `constraint`.
    Type {
        /// The register holding the value.
        reg: Reg,
        /// The required constraint.
        constraint: Constraint,
    },
    /// The value in `reg` must be a constant equal to `value` once `value` is
    /// converted to the register's type. A literal the type cannot hold
    /// never matches.
    Literal {
        /// The register holding the value.
        reg: Reg,
        /// The literal as written in the rule.
        value: Literal,
    },
    /// The value in `reg` must be a constant.
    IsConst {
        /// The register holding the value.
        reg: Reg,
    },
    /// The value in `reg` must be the same as the value in `first`.
    SameValue {
        /// A later occurrence of a variable.
        reg: Reg,
        /// The variable's first occurrence.
        first: Reg,
    },
    /// The values in `reg` and `first` must have the same type.
    SameType {
        /// The register holding the value.
        reg: Reg,
        /// The register holding the value whose type it must share.
        first: Reg,
    },
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchOp::Opcode { reg, opcode, args } => {
                write!(f, "opcode r{} {opcode} ->", reg.index())?;
                for arg in args {
                    write!(f, " r{}", arg.index())?;
                }
                Ok(())
            }
            MatchOp::Type { reg, constraint } => write!(f, "type r{} {constraint}", reg.index()),
            MatchOp::Literal { reg, value } => write!(f, "literal r{} {value}", reg.index()),
            MatchOp::IsConst { reg } => write!(f, "const r{}", reg.index()),
            MatchOp::SameValue { reg, first } => {
                write!(f, "same-value r{} r{}", reg.index(), first.index())
            }
            MatchOp::SameType { reg, first } => {
                write!(f, "same-type r{} r{}", reg.index(), first.index())
            }
        }
    }
}

/// The values a match bound, by register.
#[derive(Clone, Debug)]
pub struct Bindings<V> {
    regs: Vec<Option<V>>,
}

impl<V> Default for Bindings<V> {
    fn default() -> Self {
        Bindings { regs: vec![] }
    }
}

impl<V: Copy> Bindings<V> {
    /// Create an empty register file.
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, num_regs: usize, root: V) {
        self.regs.clear();
        self.regs.resize(num_regs.max(1), None);
        self.regs[0] = Some(root);
    }

    /// The value bound to `reg`, if the match got that far.
    pub fn get(&self, reg: Reg) -> Option<V> {
        self.regs.get(reg.index()).copied().flatten()
    }

    fn set(&mut self, reg: Reg, value: V) {
        self.regs[reg.index()] = Some(value);
    }
}

/// A compiled search pattern.
#[derive(Clone, Debug)]
pub struct Matcher {
    ops: Vec<MatchOp>,
    num_regs: usize,
    node_regs: Vec<Reg>,
}

impl Matcher {
    /// Compile one operand order of `rule`'s search pattern.
    pub fn compile(rule: &TypedRule, pattern: &Node) -> Matcher {
        let mut builder = Builder {
            rule,
            ops: vec![],
            num_regs: 1,
            node_regs: vec![Reg(usize::MAX); rule.search.size()],
            first_use: HashMap::new(),
            checked: HashSet::new(),
        };
        builder.node(pattern, Reg(0));
        for &(node, first) in &rule.same_type {
            let op = MatchOp::SameType {
                reg: builder.node_regs[node.index()],
                first: builder.node_regs[first.index()],
            };
            builder.ops.push(op);
        }
        Matcher {
            ops: builder.ops,
            num_regs: builder.num_regs,
            node_regs: builder.node_regs,
        }
    }

    /// The program's ops, in execution order.
    pub fn ops(&self) -> &[MatchOp] {
        &self.ops
    }

    /// The number of registers the program uses.
    pub fn num_regs(&self) -> usize {
        self.num_regs
    }

    /// The register that holds the value matched by search node `node`.
    pub fn node_reg(&self, node: NodeId) -> Reg {
        self.node_regs[node.index()]
    }

    /// Run the program against `root`.
    ///
    /// On success `bindings` holds a value for every register. `fold_depth`
    /// bounds how deep constant operands are folded through instructions.
    pub fn run<F: Function + ?Sized>(
        &self,
        func: &F,
        root: F::Value,
        bindings: &mut Bindings<F::Value>,
        fold_depth: usize,
    ) -> bool {
        bindings.reset(self.num_regs, root);
        self.ops
            .iter()
            .all(|op| check(op, func, bindings, fold_depth).is_some())
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.ops {
            writeln!(f, "{op}")?;
        }
        Ok(())
    }
}

struct Builder<'a> {
    rule: &'a TypedRule,
    ops: Vec<MatchOp>,
    num_regs: usize,
    node_regs: Vec<Reg>,
    first_use: HashMap<VarId, Reg>,
    checked: HashSet<Slot>,
}

impl Builder<'_> {
    fn fresh(&mut self) -> Reg {
        let reg = Reg(self.num_regs);
        self.num_regs += 1;
        reg
    }

    fn node(&mut self, node: &Node, reg: Reg) {
        let id = node.id.index();
        self.node_regs[id] = reg;

        let wanted = self.rule.search_types[id];
        if !self.rule.guaranteed[id].implies(wanted)
            && self.checked.insert(self.rule.search_groups[id])
        {
            self.ops.push(MatchOp::Type {
                reg,
                constraint: wanted,
            });
        }

        match &node.kind {
            NodeKind::Op(opcode, children) => {
                let args: SmallVec<[Reg; 3]> = children.iter().map(|_| self.fresh()).collect();
                self.ops.push(MatchOp::Opcode {
                    reg,
                    opcode: *opcode,
                    args: args.clone(),
                });
                for (child, arg) in children.iter().zip(args) {
                    self.node(child, arg);
                }
            }
            NodeKind::Var(var) => match self.first_use.get(var) {
                Some(&first) => self.ops.push(MatchOp::SameValue { reg, first }),
                None => {
                    self.first_use.insert(*var, reg);
                    if self.rule.vars[var.index()].const_only {
                        self.ops.push(MatchOp::IsConst { reg });
                    }
                }
            },
            NodeKind::Const(value) => self.ops.push(MatchOp::Literal { reg, value: *value }),
        }
    }
}

fn check<F: Function + ?Sized>(
    op: &MatchOp,
    func: &F,
    bindings: &mut Bindings<F::Value>,
    fold_depth: usize,
) -> Option<()> {
    match op {
        MatchOp::Opcode { reg, opcode, args } => {
            let inst = func.value_def(bindings.get(*reg)?)?;
            if func.inst_opcode(inst)? != *opcode {
                return None;
            }
            let operands = func.inst_args(inst);
            if operands.len() != args.len() {
                return None;
            }
            for (&arg, &value) in args.iter().zip(operands) {
                bindings.set(arg, value);
            }
        }
        MatchOp::Type { reg, constraint } => {
            let ty = func.value_type(bindings.get(*reg)?);
            constraint.accepts(ty).then_some(())?;
        }
        MatchOp::Literal { reg, value } => {
            let v = bindings.get(*reg)?;
            let want = value.fit(func.value_type(v))?;
            let have = constant_value(func, v, fold_depth)?;
            want.matches(have).then_some(())?;
        }
        MatchOp::IsConst { reg } => {
            constant_value(func, bindings.get(*reg)?, fold_depth)?;
        }
        MatchOp::SameValue { reg, first } => {
            let (a, b) = (bindings.get(*reg)?, bindings.get(*first)?);
            if a != b {
                // Distinct values only count as the same when they are
                // constants of one type with identical bits.
                if func.value_type(a) != func.value_type(b) {
                    return None;
                }
                let x = constant_value(func, a, fold_depth)?;
                let y = constant_value(func, b, fold_depth)?;
                x.same_bits(y).then_some(())?;
            }
        }
        MatchOp::SameType { reg, first } => {
            let (a, b) = (bindings.get(*reg)?, bindings.get(*first)?);
            (func.value_type(a) == func.value_type(b)).then_some(())?;
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commute::expand;
    use crate::config::CompileOptions;
    use crate::infer::infer;
    use crate::loader::load;
    use crate::ssa::SsaFunction;
    use crate::types::Type;

    fn matchers(src: &str) -> Vec<Matcher> {
        let rules = load(src, &CompileOptions::default()).unwrap();
        let rule = infer(&rules[0]).unwrap();
        expand(&rule)
            .iter()
            .map(|p| Matcher::compile(&rule, p))
            .collect()
    }

    fn program(m: &Matcher) -> Vec<String> {
        m.ops().iter().map(|op| op.to_string()).collect()
    }

    fn matches(m: &Matcher, func: &SsaFunction, root: &str) -> bool {
        let root = func.value_by_name(root).unwrap();
        m.run(func, root, &mut Bindings::new(), 4)
    }

    #[test]
    fn programs() {
        let m = matchers("(rule (fadd a 0.0) a)");
        assert_eq!(m.len(), 2);
        assert_eq!(program(&m[0]), ["opcode r0 fadd -> r1 r2", "literal r2 0.0"]);
        assert_eq!(program(&m[1]), ["opcode r0 fadd -> r1 r2", "literal r1 0.0"]);

        let m = matchers("(rule (iand a a) a)");
        assert_eq!(
            program(&m[0]),
            ["opcode r0 iand -> r1 r2", "same-value r2 r1"]
        );
    }

    #[test]
    fn type_checks_only_where_needed() {
        // `iand` accepts bools, the literal does not.
        let m = matchers("(rule (iand a 0) 0)");
        assert_eq!(
            program(&m[0]),
            ["type r0 int", "opcode r0 iand -> r1 r2", "literal r2 0"]
        );

        let m = matchers("(rule (iadd a@32 0) a)");
        assert_eq!(
            program(&m[0]),
            ["type r0 i32", "opcode r0 iadd -> r1 r2", "literal r2 0"]
        );

        let m = matchers("(rule (ishl a b) (iadd a b))");
        assert_eq!(
            program(&m[0]),
            ["opcode r0 ishl -> r1 r2", "same-type r2 r0"]
        );

        let m = matchers("(rule (fmul #a b) b)");
        assert_eq!(program(&m[0]), ["opcode r0 fmul -> r1 r2", "const r1"]);
    }

    #[test]
    fn literal_matching() {
        let func: SsaFunction = "
            (param v0 f32)
            (const v1 f32 0.0)
            (const v2 f32 -0.0)
            (const v3 f32 1.0)
            (inst v4 f32 (fadd v0 v1))
            (inst v5 f32 (fadd v2 v0))
            (inst v6 f32 (fadd v0 v3))
            (inst v7 f32 (fsub v3 v3))
            (inst v8 f32 (fadd v0 v7))
            (ret v4 v5 v6 v8)"
            .parse()
            .unwrap();
        let m = matchers("(rule (fadd a 0.0) a)");
        let any = |root| m.iter().any(|m| matches(m, &func, root));
        assert!(any("v4"));
        assert!(any("v5"), "-0.0 equals 0.0");
        assert!(!any("v6"));
        assert!(any("v8"), "folded operands are constants");
        assert!(!m.iter().any(|m| {
            let root = func.value_by_name("v8").unwrap();
            m.run(&func, root, &mut Bindings::new(), 0)
        }));
    }

    #[test]
    fn literals_too_wide_for_the_type_never_match() {
        let func: SsaFunction = "
            (param v0 i8)
            (const v1 i8 0)
            (inst v2 i8 (iadd v0 v1))
            (param v3 i16)
            (const v4 i16 256)
            (inst v5 i16 (iadd v3 v4))
            (const v6 i8 -1)
            (inst v7 i8 (iadd v0 v6))
            (ret v2 v5 v7)"
            .parse()
            .unwrap();
        let m = matchers("(rule (iadd a 256) a)");
        let any = |root| m.iter().any(|m| matches(m, &func, root));
        assert!(!any("v2"), "256 is not 0 at 8 bits");
        assert!(any("v5"));

        let m = matchers("(rule (iadd a 255) a)");
        assert!(m.iter().any(|m| matches(m, &func, "v7")), "255 fits as unsigned");
    }

    #[test]
    fn repetition_policy() {
        let func: SsaFunction = "
            (param v0 i32)
            (param v1 i32)
            (inst v2 i32 (iand v0 v0))
            (inst v3 i32 (iadd v0 v1))
            (inst v4 i32 (iadd v0 v1))
            (inst v5 i32 (iand v3 v4))
            (const v6 i32 7)
            (const v7 i32 7)
            (inst v8 i32 (iand v6 v7))
            (ret v2 v5 v8)"
            .parse()
            .unwrap();
        let m = &matchers("(rule (iand a a) a)")[0];
        assert!(matches(m, &func, "v2"));
        assert!(!matches(m, &func, "v5"), "equal computations are distinct values");
        assert!(matches(m, &func, "v8"), "equal constants of one type");
    }

    #[test]
    fn bindings() {
        let func: SsaFunction = "
            (param v0 f64)
            (param v1 f64)
            (inst v2 f64 (fneg v1))
            (inst v3 f64 (fmul v0 v2))
            (ret v3)"
            .parse()
            .unwrap();
        let m = &matchers("(rule (fmul a (fneg b)) (fneg (fmul a b)))")[0];
        let mut bindings = Bindings::new();
        let root = func.value_by_name("v3").unwrap();
        assert!(m.run(&func, root, &mut bindings, 4));
        let value = |node: usize| bindings.get(m.node_reg(NodeId(node)));
        assert_eq!(value(0), Some(root));
        assert_eq!(value(1), func.value_by_name("v0"));
        assert_eq!(value(3), func.value_by_name("v1"));
        assert_eq!(func.value_type(root), Type::F64);
    }

    #[test]
    fn wrong_types_do_not_match() {
        let func: SsaFunction = "
            (param v0 b1)
            (const v1 b1 false)
            (inst v2 b1 (iand v0 v1))
            (ret v2)"
            .parse()
            .unwrap();
        for m in matchers("(rule (iand a 0) 0)") {
            assert!(!matches(&m, &func, "v2"));
        }
    }
}
