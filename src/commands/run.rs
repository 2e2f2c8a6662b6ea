//! The module that implements the `algebraic run` command.

use crate::RuleOptions;
use algebraic::ssa::SsaFunction;
use algebraic::PassState;
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

/// Runs a rule table over a function and prints the result.
#[derive(Parser)]
pub struct RunCommand {
    #[command(flatten)]
    rules: RuleOptions,

    /// Scans to run before giving up on convergence
    #[arg(long, value_name = "N")]
    max_iterations: Option<usize>,

    /// Rewrites one scan may perform
    #[arg(long, value_name = "N")]
    max_rewrites: Option<usize>,

    /// Levels of foldable instructions to look through for constants
    #[arg(long, value_name = "N")]
    fold_depth: Option<usize>,

    /// Run a single scan instead of running to a fixpoint
    #[arg(long)]
    once: bool,

    /// Remove dead instructions afterwards
    #[arg(long)]
    dce: bool,

    /// Exit with an error if the pass runs out of budget
    #[arg(long)]
    deny_capped: bool,

    /// The function to rewrite
    #[arg(value_name = "FUNCTION")]
    function: PathBuf,
}

impl RunCommand {
    /// Executes the command.
    pub fn execute(self) -> Result<()> {
        let mut config = self.rules.config()?;
        if let Some(n) = self.max_iterations {
            config.pass.max_iterations = n;
        }
        if let Some(n) = self.max_rewrites {
            config.pass.max_rewrites = n;
        }
        if let Some(n) = self.fold_depth {
            config.pass.fold_depth = n;
        }
        let rules = self.rules.compile(&config)?;

        let text = fs::read_to_string(&self.function)
            .with_context(|| format!("failed to read `{}`", self.function.display()))?;
        let mut func: SsaFunction = text
            .parse()
            .with_context(|| format!("failed to parse `{}`", self.function.display()))?;

        let mut pass = rules.pass(config.pass);
        let outcome = if self.once {
            pass.run(&mut func)
        } else {
            pass.run_to_fixpoint(&mut func)
        };
        if self.dce {
            let removed = func.eliminate_dead_code();
            log::debug!("removed {removed} dead instructions");
        }

        print!("{func}");

        eprintln!("{} rewrites, ended {:?}", outcome.rewrites, outcome.state);
        for (id, count) in &outcome.fired {
            if let Some(rule) = rules.get(*id) {
                eprintln!("  {count:>5}  {}", rule.rule());
            }
        }

        if self.deny_capped && outcome.state == PassState::Capped {
            bail!("pass did not converge within its budget");
        }
        Ok(())
    }
}
