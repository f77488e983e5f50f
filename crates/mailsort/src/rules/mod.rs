//! Declarative, priority-ordered classification rules.

pub mod engine;
pub mod loader;
pub mod registry;
pub mod schema;

use std::path::PathBuf;

use thiserror::Error;

pub use engine::{MatchInput, MatchMode, Predicate, Rule, RuleSet, TextField};
pub use loader::{load_rules, load_rules_from_str};
pub use registry::RuleRegistry;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Failed to read rules file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rules YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Rule document does not match schema: {errors}")]
    Schema { errors: String },

    #[error("Failed to decode rule document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    #[error("Rule registry has no source file to reload from")]
    NoSource,
}
