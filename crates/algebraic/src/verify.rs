//! Checking rules by evaluation.
//!
//! Both sides of a rule are evaluated with the opcode fold functions under
//! concrete types and sample inputs. An exact rule must produce equal values
//! on both sides wherever the search side is defined, and the replacement
//! must be defined there too. Inputs that make the search side fold to
//! nothing (a domain error or NaN) are skipped.

use std::collections::HashMap;
use std::fmt;

use smallvec::SmallVec;

use crate::infer::{Node, NodeKind, Slot, TypedRule};
use crate::types::{ClassSet, Constraint, Literal, Type, TypeClass};

/// At most this many input combinations are evaluated per type assignment.
const MAX_CASES: usize = 4096;

const FLOAT_SAMPLES: &[f64] = &[
    0.0, -0.0, 1.0, -1.0, 0.5, 2.0, -3.25, 10.0, 1e-3, 123.456,
];
const INT_SAMPLES: &[i64] = &[0, 1, -1, 2, 7, -8];

/// The outcome of checking a rule.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    /// Both sides agreed on every evaluated case.
    Holds {
        /// The number of cases where both sides were defined.
        cases: usize,
    },
    /// The sides disagree.
    CounterExample {
        /// The value of each variable.
        inputs: Vec<(String, Type, Literal)>,
        /// The value of the search pattern.
        search: Literal,
        /// The value of the replacement, `None` where it is undefined.
        replace: Option<Literal>,
    },
    /// No case had the search side defined.
    Vacuous,
}

impl Verdict {
    /// Is this anything but a counterexample?
    pub fn holds(&self) -> bool {
        !matches!(self, Verdict::CounterExample { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Holds { cases } => write!(f, "holds on {cases} cases"),
            Verdict::Vacuous => write!(f, "no inputs evaluate the search pattern"),
            Verdict::CounterExample {
                inputs,
                search,
                replace,
            } => {
                write!(f, "fails for")?;
                for (name, ty, value) in inputs {
                    write!(f, " {name}:{ty} = {value}")?;
                }
                write!(f, ": search gives {search}, replacement ")?;
                match replace {
                    Some(replace) => write!(f, "gives {replace}"),
                    None => write!(f, "is undefined"),
                }
            }
        }
    }
}

/// Evaluate both sides of `rule` on sample inputs.
pub fn verify_rule(rule: &TypedRule) -> Verdict {
    let mut cases = 0;
    for types in type_assignments(rule) {
        let var_types: Vec<Type> = rule
            .vars
            .iter()
            .map(|v| types[&rule.search_slots[v.first.index()]])
            .collect();
        let samples: Vec<Vec<Literal>> = var_types.iter().map(|&ty| samples(ty)).collect();

        for env in combinations(&samples) {
            let search = eval(&rule.search, &rule.search_slots, &types, &env);
            let replace = eval(&rule.replace, &rule.replace_slots, &types, &env);
            let Some(search) = search else {
                continue;
            };
            cases += 1;
            if !replace.is_some_and(|r| search.matches(r)) {
                let inputs = rule
                    .vars
                    .iter()
                    .zip(&var_types)
                    .zip(&env)
                    .map(|((v, &ty), &value)| (v.name.clone(), ty, value))
                    .collect();
                return Verdict::CounterExample {
                    inputs,
                    search,
                    replace,
                };
            }
        }
    }
    log::trace!("rule {}: {cases} cases", rule.id);
    if cases == 0 {
        Verdict::Vacuous
    } else {
        Verdict::Holds { cases }
    }
}

/// Evaluate `node` with variables bound to `env`.
pub fn eval(
    node: &Node,
    slots: &[Slot],
    types: &HashMap<Slot, Type>,
    env: &[Literal],
) -> Option<Literal> {
    let ty = *types.get(&slots[node.id.index()])?;
    match &node.kind {
        NodeKind::Var(v) => env.get(v.index()).copied(),
        NodeKind::Const(value) => value.fit(ty),
        NodeKind::Op(opcode, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, slots, types, env))
                .collect::<Option<SmallVec<[Literal; 3]>>>()?;
            let arg_ty = *types.get(&slots[args.first()?.id.index()])?;
            opcode.fold(&values, arg_ty, ty)
        }
    }
}

/// Concrete types for every slot of `rule`: open widths at 8, 32 and 64
/// bits, and both the first and last class a slot admits.
fn type_assignments(rule: &TypedRule) -> Vec<HashMap<Slot, Type>> {
    let mut slots: Vec<(Slot, Constraint)> = vec![];
    let all = rule
        .search_slots
        .iter()
        .zip(&rule.search_types)
        .chain(rule.replace_slots.iter().zip(&rule.replace_types));
    for (&slot, &c) in all {
        if !slots.iter().any(|&(s, _)| s == slot) {
            slots.push((slot, c));
        }
    }

    let mut out: Vec<HashMap<Slot, Type>> = vec![];
    for default_bits in [8, 32, 64] {
        for last_class in [false, true] {
            let types: Option<HashMap<Slot, Type>> = slots
                .iter()
                .map(|&(slot, c)| {
                    let class = if last_class {
                        c.classes.iter().last()?
                    } else {
                        c.classes.iter().next()?
                    };
                    let narrowed = Constraint::new(ClassSet::of(class), c.bits);
                    Some((slot, narrowed.pick(default_bits)?))
                })
                .collect();
            if let Some(types) = types {
                if !out.contains(&types) {
                    out.push(types);
                }
            }
        }
    }
    out
}

fn samples(ty: Type) -> Vec<Literal> {
    match ty.class {
        TypeClass::Float => FLOAT_SAMPLES
            .iter()
            .filter_map(|&f| Literal::Float(f).normalize(ty))
            .collect(),
        TypeClass::Int => {
            let max = if ty.bits >= 64 {
                i64::MAX
            } else {
                (1i64 << (ty.bits - 1)) - 1
            };
            // One past the maximum is the minimum once normalized.
            let extremes = [max, max.wrapping_add(1)];
            INT_SAMPLES
                .iter()
                .chain(&extremes)
                .filter_map(|&i| Literal::Int(i).normalize(ty))
                .collect()
        }
        TypeClass::Bool => vec![Literal::Bool(false), Literal::Bool(true)],
    }
}

/// Up to `MAX_CASES` combinations of one sample per variable, spread over
/// the whole product when it is larger.
fn combinations(samples: &[Vec<Literal>]) -> Vec<Vec<Literal>> {
    let total = samples
        .iter()
        .try_fold(1usize, |acc, s| acc.checked_mul(s.len()))
        .unwrap_or(usize::MAX);
    if total == 0 {
        return vec![];
    }
    let count = total.min(MAX_CASES);
    let mut stride = if total > MAX_CASES { total / MAX_CASES + 1 } else { 1 };
    while gcd(stride, total) != 1 {
        stride += 1;
    }
    (0..count)
        .map(|i| {
            let mut index = i.wrapping_mul(stride) % total;
            samples
                .iter()
                .map(|s| {
                    let value = s[index % s.len()];
                    index /= s.len();
                    value
                })
                .collect()
        })
        .collect()
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
