//! The rule loader: turns a parsed rule table into validated [`Rule`]s.

use std::collections::{HashMap, HashSet};

use crate::ast::Defs;
use crate::config::{CompileOptions, DuplicatePolicy};
use crate::error::{Error, Result};
use crate::parser;
use crate::pattern::{Exactness, Expr, Rule};
use crate::RuleId;

/// Parse and validate rule-table source text.
pub fn load(src: &str, options: &CompileOptions) -> Result<Vec<Rule>> {
    let defs = parser::parse_str(src)?;
    load_defs(&defs, options)
}

/// Validate parsed rules.
///
/// Each rule gets the id of its position in `defs`, whether or not earlier
/// rules were dropped. Every problem in the table is reported; if there is
/// any, no rules are returned.
pub fn load_defs(defs: &Defs, options: &CompileOptions) -> Result<Vec<Rule>> {
    let mut errors = vec![];
    let mut rules: Vec<Rule> = vec![];
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, def) in defs.rules.iter().enumerate() {
        let id = RuleId(index);
        let rule = match resolve(id, def) {
            Ok(rule) => rule,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };

        let canonical = rule.canonical();
        if let Some(&first) = seen.get(&canonical) {
            let kept = &mut rules[first];
            match options.duplicates {
                DuplicatePolicy::Deny => errors.push(Error::DuplicateRule {
                    rule: id,
                    first: kept.id,
                    pos: rule.pos,
                }),
                DuplicatePolicy::Warn => {
                    log::warn!(
                        "{}: rule {id} duplicates rule {}; keeping the first",
                        rule.pos,
                        kept.id
                    );
                    kept.exactness = kept.exactness.weakest(rule.exactness);
                }
            }
            continue;
        }
        seen.insert(canonical, rules.len());
        rules.push(rule);
    }

    if let Some(e) = Error::from_errors(errors) {
        return Err(e);
    }

    if !options.include_inexact {
        rules.retain(|r| r.exactness == Exactness::Exact);
    }
    log::debug!("loaded {} of {} rules", rules.len(), defs.rules.len());
    Ok(rules)
}

fn resolve(id: RuleId, def: &crate::ast::RuleDef) -> Result<Rule> {
    let search = Expr::from_ast(&def.search)?;
    let replace = Expr::from_ast(&def.replace)?;

    if !matches!(search, Expr::Op { .. }) {
        return Err(Error::MalformedPattern {
            msg: format!("search pattern `{search}` must be an operation"),
            pos: search.pos(),
        });
    }

    let mut bound = HashSet::new();
    search.for_each_var(&mut |var, _| {
        bound.insert(var.name.as_str());
    });
    let mut error = None;
    replace.for_each_var(&mut |var, pos| {
        if error.is_some() {
            return;
        }
        if !bound.contains(var.name.as_str()) {
            error = Some(Error::MalformedPattern {
                msg: format!(
                    "variable `{}` is not bound by the search pattern",
                    var.name
                ),
                pos,
            });
        } else if var.const_only {
            error = Some(Error::MalformedPattern {
                msg: format!(
                    "`#{}`: constant-only variables may only be marked in the search pattern",
                    var.name
                ),
                pos,
            });
        }
    });
    if let Some(e) = error {
        return Err(e);
    }

    Ok(Rule {
        id,
        pos: def.pos,
        exactness: if def.inexact {
            Exactness::Inexact
        } else {
            Exactness::Exact
        },
        search,
        replace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_default(src: &str) -> Result<Vec<Rule>> {
        load(src, &CompileOptions::default())
    }

    #[test]
    fn ids_follow_table_order() {
        let rules = load_default(
            "(rule (fneg (fneg a)) a)\n\
             (rule (ineg (ineg a)) a)\n\
             (rule (fadd a 0.0) a)",
        )
        .unwrap();
        let ids: Vec<usize> = rules.iter().map(|r| r.id.index()).collect();
        assert_eq!(ids, [0, 1, 2]);
    }

    #[test]
    fn unbound_replacement_variable() {
        let err = load_default("(rule (fadd a 0.0) b)").unwrap_err();
        assert!(matches!(err, Error::MalformedPattern { .. }));
        assert!(err.to_string().contains("`b` is not bound"), "{err}");
    }

    #[test]
    fn search_must_be_an_operation() {
        let err = load_default("(rule a a)").unwrap_err();
        assert!(err.to_string().contains("must be an operation"), "{err}");
        let err = load_default("(rule 1.0 2.0)").unwrap_err();
        assert!(err.to_string().contains("must be an operation"), "{err}");
    }

    #[test]
    fn const_only_marker_in_replacement() {
        let err = load_default("(rule (fadd #a 0.0) #a)").unwrap_err();
        assert!(err.to_string().contains("constant-only"), "{err}");
    }

    #[test]
    fn all_errors_are_reported() {
        let err = load_default(
            "(rule (fadd a) a)\n\
             (rule (fneg (fneg a)) a)\n\
             (rule (fadd a 0.0) b)",
        )
        .unwrap_err();
        let positions: Vec<usize> = err.iter().filter_map(|e| e.pos()).map(|p| p.line).collect();
        assert_eq!(positions, [1, 3]);
    }

    #[test]
    fn duplicates_warn_and_keep_the_weaker_tier() {
        let rules = load_default(
            "(rule (feq (fadd a b) 0.0) (feq a (fneg b)))\n\
             (rule (fneg (fneg a)) a)\n\
             (rule inexact (feq (fadd a b) 0.0) (feq a (fneg b)))",
        )
        .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, RuleId(0));
        assert_eq!(rules[0].exactness, Exactness::Inexact);
        assert_eq!(rules[1].id, RuleId(1));
    }

    #[test]
    fn duplicates_ignore_whitespace_and_comments() {
        let rules = load_default(
            "(rule (fadd a 0.0) a)\n\
             ; again\n\
             (rule (fadd  a\n  0.0) a)",
        )
        .unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn duplicates_denied() {
        let options = CompileOptions {
            duplicates: DuplicatePolicy::Deny,
            ..CompileOptions::default()
        };
        let err = load(
            "(rule (fadd a 0.0) a)\n(rule (fadd a 0.0) a)",
            &options,
        )
        .unwrap_err();
        match err {
            Error::DuplicateRule { rule, first, pos } => {
                assert_eq!(rule, RuleId(1));
                assert_eq!(first, RuleId(0));
                assert_eq!(pos.line, 2);
            }
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn renamed_variables_are_not_duplicates() {
        let rules = load_default("(rule (fadd a 0.0) a)\n(rule (fadd b 0.0) b)").unwrap();
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn exact_only() {
        let options = CompileOptions {
            include_inexact: false,
            ..CompileOptions::default()
        };
        let rules = load(
            "(rule inexact (fadd (fmul a b) c) (ffma a b c))\n(rule (fneg (fneg a)) a)",
            &options,
        )
        .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, RuleId(1));
    }
}
