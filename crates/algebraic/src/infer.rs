//! Type and bit-width inference for rules.
//!
//! Every node of a rule gets a type slot. Slots are merged with a union-find
//! structure as opcode signatures, repeated variables and the rule's two
//! roots demand that types be equal; merging intersects what is known about
//! each side, and an empty intersection is a type conflict.
//!
//! Inference runs twice over the search pattern. The first run uses only
//! what a well-typed IR already guarantees (opcode signatures and repeated
//! variables); the second adds literal classes, annotations and everything
//! the replacement implies. Wherever the second run knows more than the
//! first, the matcher has to check it at run time.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::lexer::Pos;
use crate::opcodes::{Opcode, Operand};
use crate::pattern::{Exactness, Expr, Rule};
use crate::types::{ClassSet, Constraint, Literal, Type};
use crate::RuleId;

declare_id!(
    /// A node of one side of a typed rule, numbered in pre-order.
    NodeId
);
declare_id!(
    /// A variable of a typed rule, numbered by first occurrence.
    VarId
);
declare_id!(
    /// A type slot.
    Slot
);

/// A node of a typed rule.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// The node's pre-order number on its side of the rule. Permuting operands
    /// does not renumber nodes.
    pub id: NodeId,
    /// What the node is.
    pub kind: NodeKind,
}

/// The kind of a [`Node`].
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// An operation.
    Op(Opcode, Vec<Node>),
    /// A variable occurrence.
    Var(VarId),
    /// A literal, exactly as written.
    Const(Literal),
}

impl Node {
    /// The operands of this node; empty unless it is an operation.
    pub fn children(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Op(_, args) => args,
            _ => &[],
        }
    }

    /// Visit this node and its descendants in pre-order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// The number of nodes in this tree.
    pub fn size(&self) -> usize {
        1 + self.children().iter().map(Node::size).sum::<usize>()
    }
}

/// A variable of a typed rule.
#[derive(Clone, Debug)]
pub struct VarInfo {
    /// The variable's name.
    pub name: String,
    /// Whether any occurrence was marked constant-only.
    pub const_only: bool,
    /// The variable's first occurrence in the search pattern.
    pub first: NodeId,
}

/// Where the replacement builder gets the type of a node it creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeSource {
    /// The type is known at compile time.
    Fixed(Type),
    /// The type is that of the value matched by this search node.
    Search(NodeId),
}

/// A rule with a type constraint for every node.
#[derive(Clone, Debug)]
pub struct TypedRule {
    /// The rule's id.
    pub id: RuleId,
    /// The rule's precision tier.
    pub exactness: Exactness,
    /// Where the rule is defined.
    pub pos: Pos,
    /// The search pattern.
    pub search: Node,
    /// The replacement.
    pub replace: Node,
    /// The rule's variables.
    pub vars: Vec<VarInfo>,
    /// The inferred constraint of each search node.
    pub search_types: Vec<Constraint>,
    /// The constraint a well-typed IR guarantees for each search node
    /// without any checks.
    pub guaranteed: Vec<Constraint>,
    /// For each search node, the group of nodes a well-typed IR forces to
    /// share its type. One type check covers a whole group.
    pub search_groups: Vec<Slot>,
    /// The type slot of each search node.
    pub search_slots: Vec<Slot>,
    /// The inferred constraint of each replacement node.
    pub replace_types: Vec<Constraint>,
    /// The type slot of each replacement node.
    pub replace_slots: Vec<Slot>,
    /// The type source of each replacement node.
    pub replace_sources: Vec<TypeSource>,
    /// Pairs of search nodes whose types must be equal but which nothing in
    /// the search pattern forces to be.
    pub same_type: Vec<(NodeId, NodeId)>,
}

/// Union-find over type slots, with the constraint of each set stored at its
/// representative.
#[derive(Clone, Debug, Default)]
struct TypeSlots {
    parent: Vec<Slot>,
    rank: Vec<u8>,
    constraint: Vec<Constraint>,
}

impl TypeSlots {
    fn fresh(&mut self, c: Constraint) -> Slot {
        let slot = Slot(self.parent.len());
        self.parent.push(slot);
        self.rank.push(0);
        self.constraint.push(c);
        slot
    }

    fn find(&mut self, mut x: Slot) -> Slot {
        while self.parent[x.index()] != x {
            let grandparent = self.parent[self.parent[x.index()].index()];
            self.parent[x.index()] = grandparent;
            x = grandparent;
        }
        x
    }

    fn get(&mut self, x: Slot) -> Constraint {
        let root = self.find(x);
        self.constraint[root.index()]
    }

    /// Narrow `x` by `c`. On conflict, returns the constraint `x` had.
    fn narrow(&mut self, x: Slot, c: Constraint) -> Result<(), Constraint> {
        let root = self.find(x);
        let old = self.constraint[root.index()];
        self.constraint[root.index()] = old.intersect(c).ok_or(old)?;
        Ok(())
    }

    /// Merge the sets of `x` and `y`. On conflict, returns both constraints.
    fn unify(&mut self, x: Slot, y: Slot) -> Result<(), (Constraint, Constraint)> {
        let (mut x, mut y) = (self.find(x), self.find(y));
        if x == y {
            return Ok(());
        }
        let (cx, cy) = (self.constraint[x.index()], self.constraint[y.index()]);
        let merged = cx.intersect(cy).ok_or((cx, cy))?;
        if self.rank[x.index()] < self.rank[y.index()] {
            std::mem::swap(&mut x, &mut y);
        }
        self.parent[y.index()] = x;
        if self.rank[x.index()] == self.rank[y.index()] {
            self.rank[x.index()] = self.rank[x.index()].saturating_add(1);
        }
        self.constraint[x.index()] = merged;
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Search,
    Replace,
}

struct Inference<'a> {
    rule: &'a Rule,
    /// Whether literal classes and annotations narrow slots.
    decorated: bool,
    slots: TypeSlots,
    var_ids: HashMap<&'a str, VarId>,
    vars: Vec<VarInfo>,
    var_slots: Vec<Slot>,
    node_slots: Vec<Slot>,
    node_pos: Vec<Pos>,
}

impl<'a> Inference<'a> {
    fn new(rule: &'a Rule, decorated: bool) -> Self {
        Inference {
            rule,
            decorated,
            slots: TypeSlots::default(),
            var_ids: HashMap::new(),
            vars: vec![],
            var_slots: vec![],
            node_slots: vec![],
            node_pos: vec![],
        }
    }

    fn conflict(&self, pos: Pos, msg: String) -> Error {
        Error::TypeConflict {
            msg: format!("{msg} (in rule {})", self.rule.id),
            pos,
        }
    }

    /// Reject literals that cannot be represented at the width inference
    /// fixed for them.
    fn check_literal_ranges(&self, side: &Node, types: &[Constraint], pos: &[Pos]) -> Result<()> {
        let mut result = Ok(());
        side.walk(&mut |node| {
            let NodeKind::Const(value) = &node.kind else {
                return;
            };
            let i = node.id.index();
            let Some(ty) = types[i].bits.and_then(|bits| Type::new(value.class(), bits)) else {
                return;
            };
            if result.is_ok() && value.fit(ty).is_none() {
                let msg = format!("literal `{value}` does not fit {ty}");
                result = Err(self.conflict(pos[i], msg));
            }
        });
        result
    }

    /// Lower one side of the rule, numbering its nodes from zero.
    fn lower_side(&mut self, expr: &'a Expr, side: Side) -> Result<(Node, Vec<Slot>, Vec<Pos>)> {
        self.node_slots.clear();
        self.node_pos.clear();
        let node = self.lower(expr, side)?;
        Ok((
            node,
            std::mem::take(&mut self.node_slots),
            std::mem::take(&mut self.node_pos),
        ))
    }

    fn lower(&mut self, expr: &'a Expr, side: Side) -> Result<Node> {
        let id = NodeId(self.node_slots.len());
        self.node_slots.push(Slot(usize::MAX));
        self.node_pos.push(expr.pos());

        match expr {
            Expr::Op { opcode, args, pos } => {
                let sig = opcode.signature();
                let vars: Vec<Slot> = sig
                    .vars
                    .iter()
                    .map(|&classes| self.slots.fresh(Constraint::of_classes(classes)))
                    .collect();
                let operand_slot = |slots: &mut TypeSlots, operand: Operand| match operand {
                    Operand::Var(v) => vars[usize::from(v)],
                    Operand::Fixed(ty) => slots.fresh(Constraint::of_type(ty)),
                };
                self.node_slots[id.index()] = operand_slot(&mut self.slots, sig.result);

                let mut children = Vec::with_capacity(args.len());
                for (j, (arg, &operand)) in args.iter().zip(sig.operands).enumerate() {
                    let child = self.lower(arg, side)?;
                    let expected = operand_slot(&mut self.slots, operand);
                    let actual = self.node_slots[child.id.index()];
                    if let Err((have, want)) = self.slots.unify(actual, expected) {
                        return Err(self.conflict(
                            arg.pos(),
                            format!(
                                "`{arg}` is {have} but operand {j} of `{opcode}` at {pos} must be {want}"
                            ),
                        ));
                    }
                    children.push(child);
                }
                Ok(Node {
                    id,
                    kind: NodeKind::Op(*opcode, children),
                })
            }

            Expr::Var { var, pos } => {
                let var_id = match (self.var_ids.get(var.name.as_str()), side) {
                    (Some(&v), _) => v,
                    (None, Side::Search) => {
                        let v = VarId(self.vars.len());
                        self.var_ids.insert(&var.name, v);
                        self.vars.push(VarInfo {
                            name: var.name.clone(),
                            const_only: false,
                            first: id,
                        });
                        self.var_slots.push(self.slots.fresh(Constraint::ANY));
                        v
                    }
                    (None, Side::Replace) => {
                        return Err(Error::MalformedPattern {
                            msg: format!("variable `{}` is not bound by the search pattern", var.name),
                            pos: *pos,
                        });
                    }
                };
                self.vars[var_id.index()].const_only |= var.const_only;
                let slot = self.var_slots[var_id.index()];
                if self.decorated {
                    if let Err(have) = self.slots.narrow(slot, var.constraint) {
                        return Err(self.conflict(
                            *pos,
                            format!(
                                "variable `{}` is {have} and cannot also be {}",
                                var.name, var.constraint
                            ),
                        ));
                    }
                }
                self.node_slots[id.index()] = slot;
                Ok(Node {
                    id,
                    kind: NodeKind::Var(var_id),
                })
            }

            Expr::Const { value, .. } => {
                let c = if self.decorated {
                    Constraint::of_classes(ClassSet::of(value.class()))
                } else {
                    Constraint::ANY
                };
                self.node_slots[id.index()] = self.slots.fresh(c);
                Ok(Node {
                    id,
                    kind: NodeKind::Const(*value),
                })
            }
        }
    }
}

/// Infer types for every node of `rule`.
pub fn infer(rule: &Rule) -> Result<TypedRule> {
    // What the IR guarantees on its own.
    let mut plain = Inference::new(rule, false);
    let (_, plain_slots, _) = plain.lower_side(&rule.search, Side::Search)?;
    let guaranteed: Vec<Constraint> = plain_slots.iter().map(|&s| plain.slots.get(s)).collect();
    let plain_roots: Vec<Slot> = plain_slots.iter().map(|&s| plain.slots.find(s)).collect();

    // Everything the rule says.
    let mut full = Inference::new(rule, true);
    let (search, search_slots, search_pos) = full.lower_side(&rule.search, Side::Search)?;
    let (replace, replace_slots, replace_pos) = full.lower_side(&rule.replace, Side::Replace)?;
    if let Err((have, want)) = full.slots.unify(replace_slots[0], search_slots[0]) {
        return Err(full.conflict(
            rule.replace.pos(),
            format!(
                "replacement `{}` is {have} but the search pattern `{}` is {want}",
                rule.replace, rule.search
            ),
        ));
    }

    let search_slots: Vec<Slot> = search_slots.iter().map(|&s| full.slots.find(s)).collect();
    let replace_slots: Vec<Slot> = replace_slots.iter().map(|&s| full.slots.find(s)).collect();
    let search_types: Vec<Constraint> = search_slots.iter().map(|&s| full.slots.get(s)).collect();
    let replace_types: Vec<Constraint> =
        replace_slots.iter().map(|&s| full.slots.get(s)).collect();

    full.check_literal_ranges(&search, &search_types, &search_pos)?;
    full.check_literal_ranges(&replace, &replace_types, &replace_pos)?;

    let mut first_in_slot: HashMap<Slot, NodeId> = HashMap::new();
    for (i, &slot) in search_slots.iter().enumerate() {
        first_in_slot.entry(slot).or_insert(NodeId(i));
    }

    let mut replace_sources = Vec::with_capacity(replace_slots.len());
    let mut replace_exprs = vec![];
    collect_exprs(&rule.replace, &mut replace_exprs);
    for (i, &slot) in replace_slots.iter().enumerate() {
        let source = match (replace_types[i].concrete(), first_in_slot.get(&slot)) {
            (Some(ty), _) => TypeSource::Fixed(ty),
            (None, Some(&node)) => TypeSource::Search(node),
            (None, None) => {
                return Err(full.conflict(
                    replace_pos[i],
                    format!(
                        "cannot infer the type of `{}`: it is only known to be {}",
                        replace_exprs[i], replace_types[i]
                    ),
                ));
            }
        };
        replace_sources.push(source);
    }

    // Search nodes the full inference joined although nothing in the search
    // pattern itself ties their types together.
    let mut groups: HashMap<Slot, Vec<(Slot, NodeId)>> = HashMap::new();
    let mut same_type = vec![];
    for (i, &slot) in search_slots.iter().enumerate() {
        let group = groups.entry(slot).or_default();
        if group.iter().any(|&(plain, _)| plain == plain_roots[i]) {
            continue;
        }
        if let Some(&(_, first)) = group.first() {
            if search_types[i].concrete().is_none() {
                same_type.push((NodeId(i), first));
            }
        }
        group.push((plain_roots[i], NodeId(i)));
    }

    log::trace!(
        "rule {}: {} search nodes, {} replacement nodes, {} runtime type equalities",
        rule.id,
        search_types.len(),
        replace_types.len(),
        same_type.len()
    );

    Ok(TypedRule {
        id: rule.id,
        exactness: rule.exactness,
        pos: rule.pos,
        search,
        replace,
        vars: full.vars,
        search_types,
        guaranteed,
        search_groups: plain_roots,
        search_slots,
        replace_types,
        replace_slots,
        replace_sources,
        same_type,
    })
}

fn collect_exprs<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    out.push(expr);
    if let Expr::Op { args, .. } = expr {
        for arg in args {
            collect_exprs(arg, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::loader::load;

    fn typed(src: &str) -> Result<TypedRule> {
        let rules = load(src, &CompileOptions::default())?;
        infer(&rules[0])
    }

    #[track_caller]
    fn conflict(src: &str) -> String {
        match typed(src) {
            Err(Error::TypeConflict { msg, .. }) => msg,
            r => panic!("expected a type conflict, got {r:?}"),
        }
    }

    #[test]
    fn variables_take_operand_types() {
        let rule = typed("(rule (fadd a 0.0) a)").unwrap();
        let a = rule.vars[0].first;
        assert_eq!(rule.search_types[a.index()].classes, ClassSet::FLOAT);
        assert_eq!(rule.search_types[a.index()].bits, None);
        assert_eq!(rule.replace_sources[0], TypeSource::Search(NodeId(0)));
        assert!(rule.same_type.is_empty());
    }

    #[test]
    fn comparisons_fix_bool_results() {
        let rule = typed("(rule (inot (flt a b)) (fge a b))").unwrap();
        assert_eq!(rule.search_types[0].concrete(), Some(Type::B1));
        assert_eq!(rule.replace_sources[0], TypeSource::Fixed(Type::B1));
        assert_eq!(
            rule.search_types[2].classes,
            ClassSet::FLOAT,
            "operands of flt are floats"
        );
        assert_eq!(rule.guaranteed[0].concrete(), Some(Type::B1));
    }

    #[test]
    fn literals_narrow_bitwise_ops() {
        let rule = typed("(rule (iand a 0) 0)").unwrap();
        assert_eq!(rule.search_types[0].classes, ClassSet::INT);
        assert_eq!(rule.guaranteed[0].classes, ClassSet::INT_OR_BOOL);
    }

    #[test]
    fn annotations_narrow() {
        let rule = typed("(rule (iadd a@16 b) b)").unwrap();
        for ty in &rule.search_types {
            assert_eq!(ty.concrete(), Some(Type::I16));
        }
        assert_eq!(rule.replace_sources[0], TypeSource::Fixed(Type::I16));
    }

    #[test]
    fn conflicting_variable_uses() {
        let msg = conflict("(rule (fadd a (ineg a)) a)");
        assert!(msg.contains("`(ineg a)`") || msg.contains("`a`"), "{msg}");
        let msg = conflict("(rule (flt a b) (fadd a b))");
        assert!(msg.contains("replacement"), "{msg}");
        conflict("(rule (fadd a b) (iadd a b))");
        conflict("(rule (iadd a 0) (iadd a 1.0))");
        conflict("(rule (fneg a@int) a)");
        conflict("(rule (iand a@32 a@64) a)");
    }

    #[test]
    fn literal_form_must_fit_context() {
        let msg = conflict("(rule (fadd a 0) a)");
        assert!(msg.contains("`0`"), "{msg}");
        conflict("(rule (fmul a 1.0) 1)");
    }

    #[test]
    fn literals_must_fit_fixed_widths() {
        let msg = conflict("(rule (iadd a@8 300) a)");
        assert!(msg.contains("`300` does not fit i8"), "{msg}");
        conflict("(rule (iadd a@16 b) (iadd b -40000))");
        conflict("(rule (fadd a@32 1e300) a)");

        typed("(rule (iadd a@8 255) a)").unwrap();
        typed("(rule (iadd a@8 -128) a)").unwrap();
        typed("(rule (fadd a@64 1e300) a)").unwrap();
        // Open widths are checked when the rule is applied.
        typed("(rule (iadd a 300) a)").unwrap();
    }

    #[test]
    fn replacement_only_types() {
        // `b` only shares `a`'s type through the replacement.
        let rule = typed("(rule (ishl a b) (iadd a b))").unwrap();
        let b = rule.vars[1].first;
        assert_eq!(rule.same_type, [(b, NodeId(0))]);

        // Concrete types are checked directly instead.
        let rule = typed("(rule (ishl a@32 b@32) (iadd a b))").unwrap();
        assert!(rule.same_type.is_empty());
    }

    #[test]
    fn replacement_type_must_be_known() {
        let msg = conflict("(rule (flt a b) (ilt 1 2))");
        assert!(msg.contains("cannot infer"), "{msg}");
    }

    #[test]
    fn node_numbering_is_preorder() {
        let rule = typed("(rule (iand (inot a) (inot b)) (inot (ior a b)))").unwrap();
        let mut ids = vec![];
        rule.search.walk(&mut |n| ids.push(n.id.index()));
        assert_eq!(ids, [0, 1, 2, 3, 4]);
        assert_eq!(rule.search.size(), 5);
        assert_eq!(rule.replace.size(), 4);
        assert_eq!(rule.vars.len(), 2);
        assert_eq!(rule.vars[1].first, NodeId(4));
    }
}
