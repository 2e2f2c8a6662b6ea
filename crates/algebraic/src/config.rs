//! Options for compiling rule tables and running passes.
//!
//! Both option sets deserialize from TOML sections:
//!
//! ```toml
//! [compile]
//! duplicates = "deny"
//! include-inexact = false
//!
//! [pass]
//! max-iterations = 8
//! max-rewrites = 1000
//! fold-depth = 2
//! ```

/// What the loader does when two rules are identical.
#[derive(serde_derive::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Log a warning and keep only the first copy. If the copies disagree on
    /// exactness the kept rule takes the weaker tier.
    #[default]
    Warn,
    /// Reject the table with `Error::DuplicateRule`.
    Deny,
}

/// Options controlling rule-table compilation.
#[derive(serde_derive::Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompileOptions {
    /// Duplicate rule handling.
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
    /// Whether rules tagged `inexact` are compiled at all.
    #[serde(default = "default_include_inexact", rename = "include-inexact")]
    pub include_inexact: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            duplicates: DuplicatePolicy::default(),
            include_inexact: default_include_inexact(),
        }
    }
}

fn default_include_inexact() -> bool {
    true
}

/// Options controlling pass execution.
#[derive(serde_derive::Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PassOptions {
    /// Scans `Pass::run_to_fixpoint` performs before giving up.
    #[serde(default = "default_max_iterations", rename = "max-iterations")]
    pub max_iterations: usize,
    /// Rewrites one scan may perform before it stops with `PassState::Capped`.
    #[serde(default = "default_max_rewrites", rename = "max-rewrites")]
    pub max_rewrites: usize,
    /// How many levels of foldable instructions the matcher looks through
    /// when deciding whether an operand is a constant.
    #[serde(default = "default_fold_depth", rename = "fold-depth")]
    pub fold_depth: usize,
}

impl Default for PassOptions {
    fn default() -> Self {
        PassOptions {
            max_iterations: default_max_iterations(),
            max_rewrites: default_max_rewrites(),
            fold_depth: default_fold_depth(),
        }
    }
}

fn default_max_iterations() -> usize {
    16
}

fn default_max_rewrites() -> usize {
    10_000
}

fn default_fold_depth() -> usize {
    4
}

/// A configuration file: compile options and pass options.
#[derive(serde_derive::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The `[compile]` section.
    #[serde(default)]
    pub compile: CompileOptions,
    /// The `[pass]` section.
    #[serde(default)]
    pub pass: PassOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.compile.duplicates, DuplicatePolicy::Warn);
        assert!(config.compile.include_inexact);
        assert_eq!(config.pass.max_iterations, 16);
        assert_eq!(config.pass.max_rewrites, 10_000);
        assert_eq!(config.pass.fold_depth, 4);
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            [compile]
            duplicates = "deny"
            include-inexact = false

            [pass]
            max-iterations = 8
            max-rewrites = 1000
            fold-depth = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.compile.duplicates, DuplicatePolicy::Deny);
        assert!(!config.compile.include_inexact);
        assert_eq!(
            config.pass,
            PassOptions {
                max_iterations: 8,
                max_rewrites: 1000,
                fold_depth: 2,
            }
        );
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config: Config = toml::from_str("[pass]\nfold-depth = 0\n").unwrap();
        assert_eq!(config.pass.fold_depth, 0);
        assert_eq!(config.pass.max_iterations, 16);
        assert_eq!(config.compile, CompileOptions::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("[pass]\nmax-iteration = 3\n").is_err());
        assert!(toml::from_str::<Config>("[compile]\nduplicates = \"ignore\"\n").is_err());
    }
}
