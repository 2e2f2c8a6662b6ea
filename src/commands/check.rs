//! The module that implements the `algebraic check` command.

use crate::RuleOptions;
use algebraic::Exactness;
use anyhow::{bail, Result};
use clap::Parser;

/// Compiles a rule table and reports what it contains.
#[derive(Parser)]
pub struct CheckCommand {
    #[command(flatten)]
    rules: RuleOptions,

    /// Print every rule with its matcher programs
    #[arg(long)]
    dump: bool,

    /// Only dump the rule with this index
    #[arg(long, value_name = "INDEX", requires = "dump")]
    rule: Option<usize>,
}

impl CheckCommand {
    /// Executes the command.
    pub fn execute(self) -> Result<()> {
        let config = self.rules.config()?;
        let rules = self.rules.compile(&config)?;

        let exact = rules
            .rules()
            .iter()
            .filter(|r| r.exactness() == Exactness::Exact)
            .count();
        let matchers: usize = rules.rules().iter().map(|r| r.permutations()).sum();
        println!(
            "{} rules ({exact} exact, {} inexact), {matchers} matchers",
            rules.rules().len(),
            rules.rules().len() - exact,
        );

        if !self.dump {
            return Ok(());
        }
        if let Some(index) = self.rule {
            if index >= rules.rules().len() {
                bail!("no rule with index {index}");
            }
        }
        for rule in rules.rules() {
            if self.rule.is_some_and(|i| i != rule.id().index()) {
                continue;
            }
            println!();
            println!("{} {}: {}", rule.id(), rule.pos(), rule.rule());
            for (i, matcher) in rule.matchers().iter().enumerate() {
                println!("  ; order {i}");
                for line in matcher.to_string().lines() {
                    println!("  {line}");
                }
            }
        }
        Ok(())
    }
}
