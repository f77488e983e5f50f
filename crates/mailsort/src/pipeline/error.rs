use thiserror::Error;

use crate::connector::ConnectorError;
use crate::db::DatabaseError;
use crate::secrets::SecretError;

/// Conditions that end a run early. Per-message failures never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Account '{0}' not found")]
    AccountNotFound(String),

    #[error("A run for account '{0}' is already in progress")]
    RunInProgress(String),

    #[error("Account '{0}' requires re-authorization")]
    ReauthRequired(String),

    #[error("Credentials for account '{account}' could not be opened: {source}")]
    Credentials {
        account: String,
        #[source]
        source: SecretError,
    },

    #[error("Authentication failed: {0}")]
    Auth(#[source] ConnectorError),

    #[error("Provider error: {0}")]
    Connector(#[source] ConnectorError),

    #[error("Record store error: {0}")]
    Database(#[from] DatabaseError),
}

impl PipelineError {
    /// Terminal until an operator replaces the account's credentials.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            PipelineError::Auth(_) | PipelineError::Credentials { .. } | PipelineError::ReauthRequired(_)
        )
    }
}

impl From<ConnectorError> for PipelineError {
    fn from(err: ConnectorError) -> Self {
        if err.is_auth() {
            PipelineError::Auth(err)
        } else {
            PipelineError::Connector(err)
        }
    }
}
