//! The `algebraic` command line tool.
//!
//! See `algebraic --help` for usage.

use algebraic_cli::commands::{CheckCommand, RunCommand, VerifyCommand};
use anyhow::Result;
use clap::Parser;

/// Algebraic rewrite-rule compiler
#[derive(Parser)]
#[command(
    name = "algebraic",
    version,
    after_help = "Set RUST_LOG=debug to trace every rewrite.\n\
                  \n\
                  Usage examples:\n\
                  \n\
                  Checking a rule table:\n\
                  \n  \
                  algebraic check --rules my.rules --dump\n\
                  \n\
                  Simplifying a function with the built-in rules:\n\
                  \n  \
                  algebraic run --dce func.ssa\n"
)]
struct Algebraic {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser)]
enum Subcommand {
    /// Compiles a rule table and reports what it contains
    Check(CheckCommand),

    /// Runs a rule table over a function
    Run(RunCommand),

    /// Checks that exact rules hold on sample inputs
    Verify(VerifyCommand),
}

impl Algebraic {
    /// Executes the command.
    pub fn execute(self) -> Result<()> {
        match self.subcommand {
            Subcommand::Check(c) => c.execute(),
            Subcommand::Run(c) => c.execute(),
            Subcommand::Verify(c) => c.execute(),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    Algebraic::parse().execute()
}

#[test]
fn verify_cli() {
    use clap::CommandFactory;
    Algebraic::command().debug_assert()
}
