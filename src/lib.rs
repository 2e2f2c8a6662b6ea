//! The `algebraic` command line tool.
//!
//! Compiles rule tables, runs them over functions written in the textual
//! SSA form, and checks rules for exactness.

use algebraic::{CompiledRules, Config, DuplicatePolicy};
use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

pub mod commands;

/// Options shared by every command that compiles a rule table.
#[derive(Parser, Debug)]
pub struct RuleOptions {
    /// Rule table to compile; defaults to the built-in table
    #[arg(long, value_name = "PATH")]
    pub rules: Option<PathBuf>,

    /// TOML file with `[compile]` and `[pass]` sections
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Reject tables that contain the same rule twice
    #[arg(long)]
    pub deny_duplicates: bool,

    /// Leave out rules tagged `inexact`
    #[arg(long)]
    pub exact_only: bool,
}

impl RuleOptions {
    /// Load the configuration file, if any, and apply command line
    /// overrides on top of it.
    pub fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config `{}`", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("failed to parse config `{}`", path.display()))?
            }
            None => Config::default(),
        };
        if self.deny_duplicates {
            config.compile.duplicates = DuplicatePolicy::Deny;
        }
        if self.exact_only {
            config.compile.include_inexact = false;
        }
        Ok(config)
    }

    /// Read and compile the rule table.
    pub fn compile(&self, config: &Config) -> Result<CompiledRules> {
        let (name, src) = match &self.rules {
            Some(path) => {
                let src = fs::read_to_string(path)
                    .with_context(|| format!("failed to read rules `{}`", path.display()))?;
                (path.display().to_string(), src)
            }
            None => ("<builtin>".to_string(), algebraic::builtin_rules().to_string()),
        };
        let rules = algebraic::compile(&src, &config.compile)
            .with_context(|| format!("failed to compile rule table `{name}`"))?;
        log::info!("compiled {} rules from `{name}`", rules.rules().len());
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(args: &[&str]) -> RuleOptions {
        RuleOptions::try_parse_from(std::iter::once("algebraic").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn builtin_table_by_default() {
        let opts = options(&[]);
        let config = opts.config().unwrap();
        assert_eq!(config, Config::default());
        let rules = opts.compile(&config).unwrap();
        assert!(!rules.rules().is_empty());
    }

    #[test]
    fn flags_override_the_config() {
        let config = options(&["--deny-duplicates", "--exact-only"])
            .config()
            .unwrap();
        assert_eq!(config.compile.duplicates, DuplicatePolicy::Deny);
        assert!(!config.compile.include_inexact);
    }

    #[test]
    fn missing_files_are_reported() {
        let err = options(&["--rules", "/nonexistent/table.rules"])
            .compile(&Config::default())
            .unwrap_err();
        assert!(err.to_string().contains("failed to read rules"), "{err}");
    }
}
