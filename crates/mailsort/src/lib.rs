//! Mailbox sync and classification.
//!
//! Messages are fetched from IMAP or REST providers, classified by a
//! priority-ordered rule set with a generative model as fallback, and then
//! moved, deleted or labelled at the provider, with every action audited.

pub mod actions;
pub mod classifier;
pub mod config;
pub mod connector;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod rules;
pub mod scheduler;
pub mod secrets;

pub use actions::{ActionDispatcher, ActionPlan, BulkMoveResult};
pub use classifier::{ClassificationService, Classifier, OllamaService};
pub use config::{load_settings, Settings};
pub use connector::{ConnectorFactory, MailConnector, ProviderConnectorFactory};
pub use db::{Database, RecordStore};
pub use error::{ConfigError, MailsortError, Result};
pub use model::{Account, Category, Message, ProcessingStatus, Provenance, ProviderKind};
pub use pipeline::{PipelineDriver, RunSummary};
pub use rules::{RuleRegistry, RuleSet};
pub use scheduler::{Scheduler, SchedulerCommand};
pub use secrets::{resolve_secret, resolve_secret_optional, CredentialVault, SecretError};
