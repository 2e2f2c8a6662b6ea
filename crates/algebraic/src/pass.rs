//! The pass driver: applies compiled rules to a function.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::compile::CompiledRules;
use crate::config::PassOptions;
use crate::ir::{live_insts, Function};
use crate::matcher::Bindings;
use crate::RuleId;

/// Where a pass is in its run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassState {
    /// Visiting instructions.
    Scanning,
    /// A rule matched and its replacement is being built.
    Applying,
    /// A scan finished without rewriting anything.
    Converged,
    /// The rewrite or iteration budget ran out before convergence. The
    /// function is still valid, only not fully simplified.
    Capped,
}

/// The result of running a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassOutcome {
    /// The state the pass ended in. `Scanning` after a single scan that
    /// rewrote something: another scan may find more.
    pub state: PassState,
    /// Rewrites performed.
    pub rewrites: usize,
    /// Rewrites performed per rule.
    pub fired: BTreeMap<RuleId, usize>,
}

impl PassOutcome {
    fn new() -> Self {
        PassOutcome {
            state: PassState::Scanning,
            rewrites: 0,
            fired: BTreeMap::new(),
        }
    }

    /// Did the pass change the function?
    pub fn changed(&self) -> bool {
        self.rewrites > 0
    }

    fn absorb(&mut self, other: PassOutcome) {
        self.state = other.state;
        self.rewrites += other.rewrites;
        for (rule, n) in other.fired {
            *self.fired.entry(rule).or_default() += n;
        }
    }
}

/// A run of compiled rules over functions.
///
/// Rules are tried on each instruction in ascending table order and the
/// first one that matches and builds a replacement wins.
#[derive(Debug)]
pub struct Pass<'a> {
    rules: &'a CompiledRules,
    options: PassOptions,
    state: PassState,
}

impl<'a> Pass<'a> {
    /// Create a pass over `rules`.
    pub fn new(rules: &'a CompiledRules, options: PassOptions) -> Self {
        Pass {
            rules,
            options,
            state: PassState::Scanning,
        }
    }

    /// The state of the last run.
    pub fn state(&self) -> PassState {
        self.state
    }

    /// Scan `func` once.
    ///
    /// Instructions are visited in program order. After a rewrite, the users
    /// of the replacement value and any instructions created for it are
    /// visited again, so one scan catches rewrites enabled by earlier ones.
    /// Instructions that were dead when the scan started are skipped.
    pub fn run<F: Function + ?Sized>(&mut self, func: &mut F) -> PassOutcome {
        self.state = PassState::Scanning;
        let rules = self.rules;
        let mut outcome = PassOutcome::new();
        let mut worklist: VecDeque<F::Inst> = func.insts().into();
        let mut queued: HashSet<F::Inst> = worklist.iter().copied().collect();
        let mut live = live_insts(&*func);
        let mut bindings = Bindings::new();

        'scan: while let Some(inst) = worklist.pop_front() {
            queued.remove(&inst);
            let Some(opcode) = func.inst_opcode(inst) else {
                continue;
            };
            let Some(old) = func.inst_result(inst) else {
                continue;
            };
            if !live.contains(&inst) || !func.value_is_used(old) {
                continue;
            }

            for (rule, matcher) in rules.candidates(opcode) {
                if !matcher.run(&*func, old, &mut bindings, self.options.fold_depth) {
                    continue;
                }
                log::trace!("rule {} matches {inst:?}", rule.id());
                if outcome.rewrites >= self.options.max_rewrites {
                    log::debug!("rewrite budget of {} exhausted", self.options.max_rewrites);
                    self.state = PassState::Capped;
                    break 'scan;
                }

                self.state = PassState::Applying;
                let built = rule.replacement().build(
                    func,
                    matcher,
                    &bindings,
                    inst,
                    self.options.fold_depth,
                );
                self.state = PassState::Scanning;
                let Some(built) = built else {
                    continue;
                };
                if built.value == old {
                    continue 'scan;
                }

                log::debug!("rule {}: {old:?} -> {:?}", rule.id(), built.value);
                func.replace_uses(old, built.value);
                outcome.rewrites += 1;
                *outcome.fired.entry(rule.id()).or_default() += 1;
                live.extend(built.created.iter().copied());

                let revisit = func
                    .value_users(built.value)
                    .into_iter()
                    .chain(built.created.iter().copied());
                for inst in revisit {
                    if queued.insert(inst) {
                        worklist.push_back(inst);
                    }
                }
                continue 'scan;
            }
        }

        if self.state != PassState::Capped {
            self.state = if outcome.changed() {
                PassState::Scanning
            } else {
                PassState::Converged
            };
        }
        outcome.state = self.state;
        outcome
    }

    /// Scan `func` until a scan rewrites nothing, at most
    /// `PassOptions::max_iterations` times.
    pub fn run_to_fixpoint<F: Function + ?Sized>(&mut self, func: &mut F) -> PassOutcome {
        let mut total = PassOutcome::new();
        for iteration in 0..self.options.max_iterations {
            let outcome = self.run(func);
            log::debug!(
                "scan {iteration}: {} rewrites, {:?}",
                outcome.rewrites,
                outcome.state
            );
            total.absorb(outcome);
            if matches!(total.state, PassState::Converged | PassState::Capped) {
                return total;
            }
        }
        self.state = PassState::Capped;
        total.state = PassState::Capped;
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::config::CompileOptions;
    use crate::ssa::SsaFunction;

    fn rules(src: &str) -> CompiledRules {
        compile(src, &CompileOptions::default()).unwrap()
    }

    fn func(src: &str) -> SsaFunction {
        src.parse().unwrap()
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = rules(
            "(rule (fmul a 0.0) 0.0)\n\
             (rule (fmul a #b) (fmul b a))",
        );
        let mut f = func(
            "(param v0 f32) (const v1 f32 0.0) (inst v2 f32 (fmul v0 v1)) (ret v2)",
        );
        let outcome = rules.pass(PassOptions::default()).run(&mut f);
        assert_eq!(outcome.rewrites, 1);
        assert_eq!(outcome.fired.keys().copied().collect::<Vec<_>>(), [RuleId(0)]);
    }

    #[test]
    fn declined_builds_fall_through() {
        let rules = rules(
            "(rule (fdiv a #b) (fmul a (frcp b)))\n\
             (rule (fdiv a a) 1.0)",
        );
        let mut f = func(
            "(const v0 f32 0.0) (inst v1 f32 (fdiv v0 v0)) (ret v1)",
        );
        let outcome = rules.pass(PassOptions::default()).run(&mut f);
        assert_eq!(outcome.fired.get(&RuleId(0)), None);
        assert_eq!(outcome.fired.get(&RuleId(1)), Some(&1));
    }

    #[test]
    fn unused_instructions_are_skipped() {
        let rules = rules("(rule (fneg (fneg a)) a)");
        let mut f = func("(param v0 f32) (inst v1 f32 (fneg v0)) (inst v2 f32 (fneg v1))");
        let outcome = rules.pass(PassOptions::default()).run(&mut f);
        assert_eq!(outcome.state, PassState::Converged);
    }

    #[test]
    fn worklist_revisits_created_instructions() {
        // The `fneg` built by the first rule is new, so only the worklist
        // gets the second rule to look at it.
        let rules = rules(
            "(rule (fsub a b) (fadd a (fneg b)))\n\
             (rule (fneg (fneg a)) a)",
        );
        let mut f = func(
            "(param v0 f32)
             (param v1 f32)
             (inst v2 f32 (fneg v1))
             (inst v3 f32 (fsub v0 v2))
             (ret v3)",
        );
        let outcome = rules.pass(PassOptions::default()).run(&mut f);
        assert_eq!(outcome.rewrites, 2);
        assert_eq!(outcome.state, PassState::Scanning);
        let text = f.to_string();
        assert!(text.contains("(inst v5 f32 (fadd v0 v1))"), "{text}");
        assert!(text.ends_with("(ret v5)\n"), "{text}");
    }

    #[test]
    fn rewrite_budget() {
        let rules = rules("(rule (fneg (fneg a)) a)");
        let mut f = func(
            "(param v0 f32)
             (inst v1 f32 (fneg v0))
             (inst v2 f32 (fneg v1))
             (inst v3 f32 (fneg v2))
             (inst v4 f32 (fneg v3))
             (ret v2 v4)",
        );
        let options = PassOptions {
            max_rewrites: 1,
            ..PassOptions::default()
        };
        let mut pass = rules.pass(options);
        let outcome = pass.run(&mut f);
        assert_eq!(outcome.state, PassState::Capped);
        assert_eq!(pass.state(), PassState::Capped);
        assert_eq!(outcome.rewrites, 1);
    }

    #[test]
    fn fixpoint() {
        let rules = rules("(rule (fneg (fneg a)) a)");
        let mut f = func(
            "(param v0 f32)
             (inst v1 f32 (fneg v0))
             (inst v2 f32 (fneg v1))
             (ret v2)",
        );
        let mut pass = rules.pass(PassOptions::default());
        let outcome = pass.run_to_fixpoint(&mut f);
        assert_eq!(outcome.state, PassState::Converged);
        assert_eq!(outcome.rewrites, 1);
        assert!(outcome.changed());

        let again = pass.run_to_fixpoint(&mut f);
        assert_eq!(again.state, PassState::Converged);
        assert!(!again.changed());
    }

    #[test]
    fn iteration_budget() {
        let rules = rules("(rule (fneg (fneg a)) a)");
        let mut f = func(
            "(param v0 f32)
             (inst v1 f32 (fneg v0))
             (inst v2 f32 (fneg v1))
             (ret v2)",
        );
        let options = PassOptions {
            max_iterations: 1,
            ..PassOptions::default()
        };
        let outcome = rules.pass(options).run_to_fixpoint(&mut f);
        assert_eq!(outcome.state, PassState::Capped);
        assert_eq!(outcome.rewrites, 1);
    }
}
