//! Compiling replacement patterns into build steps, and running them.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::infer::{Node, NodeId, NodeKind, Slot, TypeSource, TypedRule};
use crate::ir::{constant_value, Function};
use crate::matcher::{Bindings, Matcher};
use crate::opcodes::Opcode;
use crate::types::{Literal, Type, TypeClass};

declare_id!(
    /// The index of a step in a [`Replacement`].
    StepIdx
);

/// One step of building a replacement value.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// The value bound to this search node.
    Capture(NodeId),
    /// A constant.
    Literal {
        /// The value, as written in the rule.
        value: Literal,
        /// Where the constant's type comes from.
        ty: TypeSource,
    },
    /// A new instruction, unless its operands are all constants.
    Inst {
        /// The operation.
        opcode: Opcode,
        /// The steps producing the operands.
        args: SmallVec<[StepIdx; 3]>,
        /// Where the result type comes from.
        ty: TypeSource,
    },
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum StepKey {
    Capture(NodeId),
    Literal((TypeClass, u64), Slot),
    Inst(Opcode, SmallVec<[StepIdx; 3]>, Slot),
}

/// A compiled replacement: steps in post-order, each operand built before
/// its user, with identical subtrees built once.
#[derive(Clone, Debug)]
pub struct Replacement {
    steps: Vec<Step>,
    result: StepIdx,
}

/// The value a replacement produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Built<V, I> {
    /// The replacement value.
    pub value: V,
    /// The instructions inserted to compute it.
    pub created: Vec<I>,
}

impl Replacement {
    /// Compile `rule`'s replacement pattern.
    pub fn compile(rule: &TypedRule) -> Replacement {
        // Search subtrees a replacement subtree may reuse. The search root
        // is only reusable as the whole replacement: anything built around
        // it would become one of its own users once uses are replaced.
        let mut search_ops = vec![];
        rule.search.walk(&mut |n| {
            if matches!(n.kind, NodeKind::Op(..)) {
                search_ops.push(n);
            }
        });

        let mut compiler = Compiler {
            rule,
            search_ops,
            steps: vec![],
            keys: HashMap::new(),
        };
        let result = compiler.node(&rule.replace, true);
        Replacement {
            steps: compiler.steps,
            result,
        }
    }

    /// The build steps.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The step producing the replacement value.
    pub fn result(&self) -> StepIdx {
        self.result
    }

    /// Build the replacement value for a successful match of `matcher`.
    ///
    /// New instructions are inserted before `before`. Returns `None`, with
    /// `func` untouched, when folding a constant subtree fails.
    pub fn build<F: Function + ?Sized>(
        &self,
        func: &mut F,
        matcher: &Matcher,
        bindings: &Bindings<F::Value>,
        before: F::Inst,
        fold_depth: usize,
    ) -> Option<Built<F::Value, F::Inst>> {
        let captured = |node: NodeId| bindings.get(matcher.node_reg(node));

        // Evaluate every step that does not need new IR first, so that a
        // failing fold leaves nothing behind.
        let mut known: Vec<Known<F::Value>> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let k = match step {
                Step::Capture(node) => {
                    let value = captured(*node)?;
                    Known {
                        value: Some(value),
                        constant: constant_value(&*func, value, fold_depth),
                        ty: func.value_type(value),
                    }
                }
                Step::Literal { value, ty } => {
                    let ty = resolve(&*func, *ty, captured)?;
                    let Some(constant) = value.fit(ty) else {
                        log::trace!("declined: {value} does not fit {ty}");
                        return None;
                    };
                    Known {
                        value: None,
                        constant: Some(constant),
                        ty,
                    }
                }
                Step::Inst { opcode, args, ty } => {
                    let ty = resolve(&*func, *ty, captured)?;
                    let lits: Option<SmallVec<[Literal; 3]>> =
                        args.iter().map(|a| known[a.index()].constant).collect();
                    let constant = match lits {
                        Some(lits) => {
                            let arg_ty = known[args[0].index()].ty;
                            match opcode.fold(&lits, arg_ty, ty) {
                                Some(c) => Some(c),
                                None => {
                                    log::trace!("declined: {opcode} does not fold on {lits:?}");
                                    return None;
                                }
                            }
                        }
                        None => None,
                    };
                    Known {
                        value: None,
                        constant,
                        ty,
                    }
                }
            };
            known.push(k);
        }

        // Only materialize what the result depends on. Folded instructions
        // do not need their operands.
        let mut needed = vec![false; self.steps.len()];
        needed[self.result.index()] = true;
        for (i, step) in self.steps.iter().enumerate().rev() {
            if !needed[i] || known[i].value.is_some() || known[i].constant.is_some() {
                continue;
            }
            if let Step::Inst { args, .. } = step {
                for arg in args {
                    needed[arg.index()] = true;
                }
            }
        }

        let mut created = vec![];
        for (i, step) in self.steps.iter().enumerate() {
            if !needed[i] || known[i].value.is_some() {
                continue;
            }
            let value = match (known[i].constant, step) {
                (Some(c), _) => func.insert_literal(before, c, known[i].ty),
                (None, Step::Inst { opcode, args, .. }) => {
                    let args = args
                        .iter()
                        .map(|a| known[a.index()].value)
                        .collect::<Option<SmallVec<[F::Value; 3]>>>()?;
                    func.insert_inst(before, *opcode, &args, known[i].ty)
                }
                (None, _) => return None,
            };
            if let Some(inst) = func.value_def(value) {
                created.push(inst);
            }
            known[i].value = Some(value);
        }

        // A matched value that is constant but not yet a literal is replaced
        // by its literal, so `(fmul #a #b) (fmul a b)` folds.
        let result = &known[self.result.index()];
        let value = match (result.value, result.constant) {
            (Some(v), Some(c)) if func.value_literal(v).is_none() => {
                let value = func.insert_literal(before, c, result.ty);
                created.extend(func.value_def(value));
                value
            }
            (value, _) => value?,
        };
        Some(Built { value, created })
    }
}

struct Known<V> {
    value: Option<V>,
    constant: Option<Literal>,
    ty: Type,
}

fn resolve<F: Function + ?Sized>(
    func: &F,
    source: TypeSource,
    captured: impl Fn(NodeId) -> Option<F::Value>,
) -> Option<Type> {
    match source {
        TypeSource::Fixed(ty) => Some(ty),
        TypeSource::Search(node) => Some(func.value_type(captured(node)?)),
    }
}

struct Compiler<'a> {
    rule: &'a TypedRule,
    search_ops: Vec<&'a Node>,
    steps: Vec<Step>,
    keys: HashMap<StepKey, StepIdx>,
}

impl Compiler<'_> {
    fn push(&mut self, key: StepKey, step: Step) -> StepIdx {
        if let Some(&idx) = self.keys.get(&key) {
            return idx;
        }
        let idx = StepIdx(self.steps.len());
        self.steps.push(step);
        self.keys.insert(key, idx);
        idx
    }

    fn node(&mut self, node: &Node, is_root: bool) -> StepIdx {
        let id = node.id.index();
        let slot = self.rule.replace_slots[id];
        let ty = self.rule.replace_sources[id];
        match &node.kind {
            NodeKind::Var(var) => {
                let first = self.rule.vars[var.index()].first;
                self.push(StepKey::Capture(first), Step::Capture(first))
            }
            NodeKind::Const(value) => self.push(
                StepKey::Literal(value.bits(), slot),
                Step::Literal { value: *value, ty },
            ),
            NodeKind::Op(opcode, children) => {
                if let Some(shared) = self.shared(node, is_root) {
                    return self.push(StepKey::Capture(shared), Step::Capture(shared));
                }
                let args: SmallVec<[StepIdx; 3]> =
                    children.iter().map(|c| self.node(c, false)).collect();
                self.push(
                    StepKey::Inst(*opcode, args.clone(), slot),
                    Step::Inst {
                        opcode: *opcode,
                        args,
                        ty,
                    },
                )
            }
        }
    }

    /// A search node computing exactly what the replacement node `node`
    /// computes.
    fn shared(&self, node: &Node, is_root: bool) -> Option<NodeId> {
        let slot = self.rule.replace_slots[node.id.index()];
        self.search_ops
            .iter()
            .filter(|s| is_root || s.id != self.rule.search.id)
            .find(|s| self.rule.search_slots[s.id.index()] == slot && same_tree(s, node))
            .map(|s| s.id)
    }
}

fn same_tree(search: &Node, replace: &Node) -> bool {
    match (&search.kind, &replace.kind) {
        (NodeKind::Op(a, xs), NodeKind::Op(b, ys)) => {
            a == b && xs.iter().zip(ys).all(|(x, y)| same_tree(x, y))
        }
        (NodeKind::Var(a), NodeKind::Var(b)) => a == b,
        (NodeKind::Const(a), NodeKind::Const(b)) => a.same_bits(*b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commute::expand;
    use crate::config::CompileOptions;
    use crate::infer::infer;
    use crate::loader::load;
    use crate::ssa::{InstData, SsaFunction};

    fn compiled(src: &str) -> (TypedRule, Replacement) {
        let rules = load(src, &CompileOptions::default()).unwrap();
        let rule = infer(&rules[0]).unwrap();
        let replacement = Replacement::compile(&rule);
        (rule, replacement)
    }

    /// Match `root` against the first operand order that fits, then build.
    fn apply(
        src: &str,
        func: &mut SsaFunction,
        root: &str,
    ) -> Option<Built<crate::ssa::Value, crate::ssa::Inst>> {
        let (rule, replacement) = compiled(src);
        let root = func.value_by_name(root).unwrap();
        let before = func.value_def(root).unwrap();
        let mut bindings = Bindings::new();
        let matcher = expand(&rule)
            .iter()
            .map(|p| Matcher::compile(&rule, p))
            .find(|m| m.run(&*func, root, &mut bindings, 4))
            .expect("no operand order matched");
        replacement.build(func, &matcher, &bindings, before, 4)
    }

    #[test]
    fn variables_and_shared_subtrees_are_captures() {
        let (_, r) = compiled("(rule (fadd a 0.0) a)");
        assert_eq!(r.steps(), [Step::Capture(NodeId(1))]);

        let (_, r) = compiled("(rule (fmul (fadd a b) (fadd a b)) (fmul (fadd a b) 2.0))");
        assert_eq!(r.steps()[0], Step::Capture(NodeId(1)));
        assert_eq!(r.steps().len(), 3);
    }

    #[test]
    fn search_root_is_not_shared_below_the_root() {
        let (_, r) = compiled("(rule (fadd a b) (fneg (fneg (fadd a b))))");
        assert!(!r.steps().contains(&Step::Capture(NodeId(0))));

        let (_, r) = compiled("(rule (fmin a b) (fmin a b))");
        assert_eq!(r.steps(), [Step::Capture(NodeId(0))]);
    }

    #[test]
    fn identical_subtrees_are_built_once() {
        let (_, r) = compiled("(rule (fsub a b) (fmul (fneg b) (fneg b)))");
        // b, (fneg b), (fmul ...)
        assert_eq!(r.steps().len(), 3);

        let (_, r) = compiled("(rule (feq a b) (iand (flt a 1.0) (flt b 1.0)))");
        assert_eq!(r.steps().len(), 6);

        // The same literal at two types is built twice.
        let (_, r) = compiled("(rule (ishl a@32 b@8) (ishl (iadd a 1) (iadd b 1)))");
        assert_eq!(r.steps().len(), 7);
    }

    #[test]
    fn build_creates_only_new_structure() {
        let mut func: SsaFunction = "
            (param v0 i32)
            (param v1 i32)
            (inst v2 i32 (inot v0))
            (inst v3 i32 (inot v1))
            (inst v4 i32 (iand v2 v3))
            (ret v4)"
            .parse()
            .unwrap();
        let built = apply(
            "(rule (iand (inot a) (inot b)) (inot (ior a b)))",
            &mut func,
            "v4",
        )
        .unwrap();
        assert_eq!(built.created.len(), 2);
        let ops: Vec<Option<Opcode>> = built.created.iter().map(|&i| func.inst_opcode(i)).collect();
        assert_eq!(ops, [Some(Opcode::Ior), Some(Opcode::Inot)]);
        assert_eq!(func.value_def(built.value), built.created.last().copied());
    }

    #[test]
    fn constant_replacements_fold() {
        let mut func: SsaFunction = "
            (param v0 f32)
            (const v1 f32 2.0)
            (const v2 f32 3.0)
            (inst v3 f32 (fadd v0 v1))
            (inst v4 f32 (fmul v3 v2))
            (ret v4)"
            .parse()
            .unwrap();
        let built = apply(
            "(rule (fmul (fadd a #b) #c) (fadd (fmul a c) (fmul b c)))",
            &mut func,
            "v4",
        )
        .unwrap();
        // (fmul b c) folds to 6.0; only the fadd, the fmul and the literal
        // are new.
        assert_eq!(built.created.len(), 3);
        let literal = built
            .created
            .iter()
            .find_map(|&i| match func.inst_data(i) {
                InstData::Literal(l) => Some(*l),
                _ => None,
            });
        assert_eq!(literal, Some(Literal::Float(6.0)));
    }

    #[test]
    fn constant_captures_become_literals() {
        let mut func: SsaFunction = "
            (const v0 f32 2.0)
            (const v1 f32 3.0)
            (inst v2 f32 (fmul v0 v1))
            (ret v2)"
            .parse()
            .unwrap();
        let built = apply("(rule (fmul #a #b) (fmul a b))", &mut func, "v2").unwrap();
        assert_eq!(built.created.len(), 1);
        assert_eq!(func.value_literal(built.value), Some(Literal::Float(6.0)));

        // Captures that already are literals are reused.
        let built = apply("(rule (fmul a #b) b)", &mut func, "v2").unwrap();
        assert!(built.created.is_empty());
        assert_eq!(Some(built.value), func.value_by_name("v1"));
    }

    #[test]
    fn literals_the_type_cannot_hold_decline() {
        let mut func: SsaFunction = "
            (param v0 i8)
            (param v1 i8)
            (inst v2 i8 (iadd v0 v1))
            (param v3 i16)
            (param v4 i16)
            (inst v5 i16 (iadd v3 v4))
            (ret v2 v5)"
            .parse()
            .unwrap();
        let before = func.to_string();
        assert!(apply("(rule (iadd a b) (iadd a 300))", &mut func, "v2").is_none());
        assert_eq!(func.to_string(), before);

        let built = apply("(rule (iadd a b) (iadd a 300))", &mut func, "v5").unwrap();
        let literal = built
            .created
            .iter()
            .find_map(|&i| match func.inst_data(i) {
                InstData::Literal(l) => Some(*l),
                _ => None,
            });
        assert_eq!(literal, Some(Literal::Int(300)));
    }

    #[test]
    fn failed_folds_leave_the_function_alone() {
        let mut func: SsaFunction = "
            (param v0 f32)
            (const v1 f32 0.0)
            (inst v2 f32 (fmul v0 v1))
            (ret v2)"
            .parse()
            .unwrap();
        let before = func.to_string();
        let built = apply("(rule (fmul a #b) (fmul a (frcp b)))", &mut func, "v2");
        assert!(built.is_none());
        assert_eq!(func.to_string(), before);
    }

    #[test]
    fn literal_results_are_materialized() {
        let mut func: SsaFunction = "
            (param v0 i64)
            (const v1 i64 0)
            (inst v2 i64 (imul v0 v1))
            (ret v2)"
            .parse()
            .unwrap();
        let built = apply("(rule (imul a 0) 0)", &mut func, "v2").unwrap();
        assert_eq!(func.value_literal(built.value), Some(Literal::Int(0)));
        assert_eq!(func.value_type(built.value), Type::I64);
    }
}
