use std::path::PathBuf;
use thiserror::Error;

use crate::actions::ActionError;
use crate::classifier::ClassifyError;
use crate::connector::ConnectorError;
use crate::db::DatabaseError;
use crate::logging::LoggingError;
use crate::pipeline::PipelineError;
use crate::rules::RuleError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum MailsortError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule error: {0}")]
    Rules(#[from] RuleError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Settings validation failed: {message}")]
    Validation { message: String },
}

pub type Result<T> = std::result::Result<T, MailsortError>;
