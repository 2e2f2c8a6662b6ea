//! The module that implements the `algebraic verify` command.

use crate::RuleOptions;
use algebraic::verify::{verify_rule, Verdict};
use algebraic::Exactness;
use anyhow::{bail, Result};
use clap::Parser;

/// Evaluates both sides of every rule on sample inputs.
///
/// Exact rules that disagree on some input are errors. Inexact rules that
/// disagree are expected and only reported with `--verbose`.
#[derive(Parser)]
pub struct VerifyCommand {
    #[command(flatten)]
    rules: RuleOptions,

    /// Also print rules that hold and inexact counterexamples
    #[arg(short, long)]
    verbose: bool,
}

impl VerifyCommand {
    /// Executes the command.
    pub fn execute(self) -> Result<()> {
        let config = self.rules.config()?;
        let rules = self.rules.compile(&config)?;

        let mut failures = 0;
        for rule in rules.rules() {
            let verdict = verify_rule(rule.typed());
            let failed = matches!(verdict, Verdict::CounterExample { .. })
                && rule.exactness() == Exactness::Exact;
            if failed {
                failures += 1;
            }
            if failed || self.verbose {
                println!("{} {}: {}", rule.pos(), rule.rule(), verdict);
            }
        }

        if failures > 0 {
            bail!("{failures} exact rules have counterexamples");
        }
        println!("{} rules checked", rules.rules().len());
        Ok(())
    }
}
