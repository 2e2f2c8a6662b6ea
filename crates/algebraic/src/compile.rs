//! Compiling a rule table into matchers and replacement builders.

use crate::commute;
use crate::config::{CompileOptions, PassOptions};
use crate::error::{Error, Result};
use crate::infer::{self, NodeKind, TypedRule};
use crate::lexer::Pos;
use crate::loader;
use crate::matcher::Matcher;
use crate::opcodes::Opcode;
use crate::pass::Pass;
use crate::pattern::{Exactness, Rule};
use crate::replace::Replacement;
use crate::RuleId;

/// One compiled rule.
#[derive(Clone, Debug)]
pub struct CompiledRule {
    rule: Rule,
    root: Opcode,
    typed: TypedRule,
    matchers: Vec<Matcher>,
    replacement: Replacement,
}

impl CompiledRule {
    /// The rule's position in its table.
    pub fn id(&self) -> RuleId {
        self.rule.id
    }

    /// The rule's precision tier.
    pub fn exactness(&self) -> Exactness {
        self.rule.exactness
    }

    /// Where the rule is defined.
    pub fn pos(&self) -> Pos {
        self.rule.pos
    }

    /// The rule as loaded.
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// The rule with its inferred types.
    pub fn typed(&self) -> &TypedRule {
        &self.typed
    }

    /// The opcode every match of this rule is rooted at.
    pub fn root_opcode(&self) -> Opcode {
        self.root
    }

    /// One matcher per operand order of the search pattern.
    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    /// The number of operand orders tried.
    pub fn permutations(&self) -> usize {
        self.matchers.len()
    }

    /// The replacement builder shared by all matchers.
    pub fn replacement(&self) -> &Replacement {
        &self.replacement
    }
}

/// A compiled rule table. Immutable once built; one table may serve any
/// number of passes, on any number of threads.
#[derive(Clone, Debug, Default)]
pub struct CompiledRules {
    rules: Vec<CompiledRule>,
    /// Per opcode, `(rule index, matcher index)` in ascending rule order.
    by_opcode: Vec<Vec<(usize, usize)>>,
}

/// Compile rule-table source text.
pub fn compile(src: &str, options: &CompileOptions) -> Result<CompiledRules> {
    let rules = loader::load(src, options)?;
    CompiledRules::from_rules(&rules)
}

impl CompiledRules {
    /// Compile loaded rules. Every type error in the table is reported; if
    /// there is any, nothing is compiled.
    pub fn from_rules(rules: &[Rule]) -> Result<CompiledRules> {
        let mut errors = vec![];
        let mut typed = vec![];
        for rule in rules {
            match infer::infer(rule) {
                Ok(t) => match t.search.kind {
                    NodeKind::Op(root, _) => typed.push((rule, root, t)),
                    _ => errors.push(Error::MalformedPattern {
                        msg: format!("search pattern `{}` must be an operation", rule.search),
                        pos: rule.pos,
                    }),
                },
                Err(e) => errors.push(e),
            }
        }
        if let Some(e) = Error::from_errors(errors) {
            return Err(e);
        }

        let mut compiled = CompiledRules {
            rules: Vec::with_capacity(typed.len()),
            by_opcode: vec![vec![]; Opcode::ALL.len()],
        };
        for (index, (rule, root, typed)) in typed.into_iter().enumerate() {
            let matchers: Vec<Matcher> = commute::expand(&typed)
                .iter()
                .map(|p| Matcher::compile(&typed, p))
                .collect();
            let replacement = Replacement::compile(&typed);
            let rule = CompiledRule {
                rule: rule.clone(),
                root,
                typed,
                matchers,
                replacement,
            };
            let slot = &mut compiled.by_opcode[root.index()];
            slot.extend((0..rule.matchers.len()).map(|m| (index, m)));
            compiled.rules.push(rule);
        }

        log::debug!(
            "compiled {} rules into {} matchers",
            compiled.rules.len(),
            compiled.rules.iter().map(|r| r.matchers.len()).sum::<usize>()
        );
        Ok(compiled)
    }

    /// The compiled rules, in table order.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// The rule with id `id`, if it was compiled.
    pub fn get(&self, id: RuleId) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.id() == id)
    }

    /// The `(rule, matcher)` pairs to try on an `opcode` instruction, in
    /// order.
    pub fn candidates(&self, opcode: Opcode) -> impl Iterator<Item = (&CompiledRule, &Matcher)> {
        self.by_opcode[opcode.index()]
            .iter()
            .map(|&(r, m)| (&self.rules[r], &self.rules[r].matchers[m]))
    }

    /// Create a pass running these rules.
    pub fn pass(&self, options: PassOptions) -> Pass<'_> {
        Pass::new(self, options)
    }
}
