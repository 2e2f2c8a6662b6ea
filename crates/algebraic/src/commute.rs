//! Expansion of search patterns over the operand orders of commutative
//! opcodes.
//!
//! The IR does not canonicalize operand order, so `(fadd a 0.0)` has to be
//! tried as `(fadd 0.0 a)` as well. Orders that only differ by a renaming of
//! variables match the same instructions and are dropped.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use crate::infer::{Node, NodeKind, TypedRule, VarId};

/// Every distinct operand order of `rule`'s search pattern, starting with the
/// pattern as written.
pub fn expand(rule: &TypedRule) -> Vec<Node> {
    let mut seen = HashSet::new();
    let permutations: Vec<Node> = expand_node(rule, &rule.search)
        .into_iter()
        .filter(|p| seen.insert(key(rule, p, true)))
        .collect();
    log::trace!(
        "rule {}: {} operand order(s)",
        rule.id,
        permutations.len()
    );
    permutations
}

fn expand_node(rule: &TypedRule, node: &Node) -> Vec<Node> {
    let NodeKind::Op(opcode, args) = &node.kind else {
        return vec![node.clone()];
    };

    // Cartesian product of the operands' own expansions, in order, so the
    // unpermuted combination comes first.
    let mut combos: Vec<Vec<Node>> = vec![vec![]];
    for arg in args {
        let options = expand_node(rule, arg);
        combos = combos
            .iter()
            .flat_map(|prefix| {
                options.iter().map(move |option| {
                    let mut combo = prefix.clone();
                    combo.push(option.clone());
                    combo
                })
            })
            .collect();
    }

    let mut out = Vec::with_capacity(combos.len() * 2);
    let mut seen = HashSet::new();
    let swap = opcode.commutative_operands();
    for combo in combos {
        let mut orders = vec![combo.clone()];
        if let Some((i, j)) = swap {
            let mut swapped = combo;
            swapped.swap(i, j);
            orders.push(swapped);
        }
        for children in orders {
            let candidate = Node {
                id: node.id,
                kind: NodeKind::Op(*opcode, children),
            };
            if seen.insert(key(rule, &candidate, false)) {
                out.push(candidate);
            }
        }
    }
    out
}

/// A printed form of `node`. With `rename`, two patterns get the same key
/// exactly when one is the other with variables renamed; without it, only
/// when they are identical.
///
/// Renaming is only sound for whole patterns: a subpattern shares its
/// variables with the rest of the pattern.
fn key(rule: &TypedRule, node: &Node, rename: bool) -> String {
    fn go(
        rule: &TypedRule,
        node: &Node,
        names: &mut Option<HashMap<VarId, usize>>,
        out: &mut String,
    ) {
        match &node.kind {
            NodeKind::Op(opcode, args) => {
                let _ = write!(out, "({opcode}");
                for arg in args {
                    out.push(' ');
                    go(rule, arg, names, out);
                }
                out.push(')');
            }
            NodeKind::Var(v) => {
                let n = match names {
                    Some(names) => {
                        let next = names.len();
                        *names.entry(*v).or_insert(next)
                    }
                    None => v.index(),
                };
                let info = &rule.vars[v.index()];
                let _ = write!(
                    out,
                    "{}v{n}:{}",
                    if info.const_only { "#" } else { "" },
                    rule.search_types[node.id.index()]
                );
            }
            NodeKind::Const(value) => {
                let (class, bits) = value.bits();
                let _ = write!(out, "{class}:{bits:#x}");
            }
        }
    }
    let mut out = String::new();
    go(rule, node, &mut rename.then(HashMap::new), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::infer::infer;
    use crate::loader::load;

    fn orders(src: &str) -> Vec<String> {
        let rules = load(src, &CompileOptions::default()).unwrap();
        let rule = infer(&rules[0]).unwrap();
        expand(&rule)
            .iter()
            .map(|p| print(&rule, p))
            .collect()
    }

    fn print(rule: &TypedRule, node: &Node) -> String {
        match &node.kind {
            NodeKind::Op(opcode, args) => {
                let args: Vec<String> = args.iter().map(|a| print(rule, a)).collect();
                format!("({opcode} {})", args.join(" "))
            }
            NodeKind::Var(v) => rule.vars[v.index()].name.clone(),
            NodeKind::Const(c) => c.to_string(),
        }
    }

    #[test]
    fn root_swap() {
        assert_eq!(
            orders("(rule (fadd a 0.0) a)"),
            ["(fadd a 0.0)", "(fadd 0.0 a)"]
        );
    }

    #[test]
    fn non_commutative_is_untouched() {
        assert_eq!(orders("(rule (fsub a 0.0) a)"), ["(fsub a 0.0)"]);
        assert_eq!(orders("(rule (flrp a b 0.0) a)"), ["(flrp a b 0.0)"]);
    }

    #[test]
    fn repeated_variables_dedupe() {
        assert_eq!(orders("(rule (iand a a) a)"), ["(iand a a)"]);
    }

    #[test]
    fn renamings_dedupe() {
        assert_eq!(orders("(rule (fmin a b) (fmin a b))"), ["(fmin a b)"]);
        assert_eq!(
            orders("(rule (iand (inot a) (inot b)) (inot (ior a b)))"),
            ["(iand (inot a) (inot b))"]
        );
    }

    #[test]
    fn const_only_markers_are_kept_apart() {
        assert_eq!(
            orders("(rule (fadd #a b) b)"),
            ["(fadd a b)", "(fadd b a)"]
        );
    }

    #[test]
    fn nested_swaps() {
        let got = orders("(rule (fadd (fmul a b) c) (ffma a b c))");
        assert_eq!(got, ["(fadd (fmul a b) c)", "(fadd c (fmul a b))"]);

        let got = orders("(rule (fmul (fadd a 1.0) 2.0) a)");
        assert_eq!(
            got,
            [
                "(fmul (fadd a 1.0) 2.0)",
                "(fmul 2.0 (fadd a 1.0))",
                "(fmul (fadd 1.0 a) 2.0)",
                "(fmul 2.0 (fadd 1.0 a))",
            ]
        );
    }

    #[test]
    fn ffma_swaps_multiplicands() {
        assert_eq!(
            orders("(rule (ffma 0.0 a b) b)"),
            ["(ffma 0.0 a b)", "(ffma a 0.0 b)"]
        );
    }

    #[test]
    fn node_ids_travel_with_nodes() {
        let rules = load("(rule (fadd a 0.0) a)", &CompileOptions::default()).unwrap();
        let rule = infer(&rules[0]).unwrap();
        let perms = expand(&rule);
        let ids: Vec<usize> = perms[1].children().iter().map(|n| n.id.index()).collect();
        assert_eq!(ids, [2, 1]);
    }
}
