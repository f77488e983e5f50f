//! Provider connectors: one uniform mailbox interface over IMAP and REST providers.
//!
//! A connector instance is owned by a single pipeline run. Its lifecycle is
//! tracked by [`StateMachine`]; OAuth2 tokens are refreshed transparently
//! before they expire and any refreshed credentials are handed back through
//! [`MailConnector::refreshed_credentials`] for persistence.

pub mod credentials;
mod error;
pub mod graph;
pub mod imap;
pub mod oauth;
pub mod parser;
pub mod retry;
pub mod state;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use credentials::{Credentials, OAuth2Credentials, PasswordCredentials};
pub use error::{ConnectorError, Result};
pub use graph::{GraphConnector, DEFAULT_GRAPH_BASE_URL};
pub use imap::ImapConnector;
pub use oauth::{OAuth2Provider, OAuthClient, OAuthTokenClient, TokenRefresher, TokenResponse};
pub use retry::{RetryOutcome, RetryPolicy};
pub use state::{ConnectorState, StateMachine};

use crate::model::{Account, FetchedMessage, ProviderKind};

/// Knobs shared by every connector instance.
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    pub retry: RetryPolicy,
    /// Tokens expiring within this window are refreshed before use.
    pub refresh_margin: chrono::Duration,
    pub preview_chars: usize,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            refresh_margin: chrono::Duration::minutes(5),
            preview_chars: 500,
        }
    }
}

/// Applies the fetch contract to already listed items: strictly after `since`,
/// newest first, at most `limit`.
pub fn newest_after<T>(
    mut items: Vec<T>,
    since: Option<DateTime<Utc>>,
    limit: usize,
    received: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    if let Some(since) = since {
        items.retain(|item| received(item) > since);
    }
    items.sort_by(|a, b| received(b).cmp(&received(a)));
    items.truncate(limit);
    items
}

#[async_trait]
pub trait MailConnector: Send {
    fn state(&self) -> ConnectorState;

    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Newest-first messages in `folder` received strictly after `since`, at most `limit`.
    async fn fetch_messages(
        &mut self,
        folder: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<FetchedMessage>>;

    /// `Ok(false)` when the message no longer exists at the provider.
    async fn move_message(&mut self, message_id: &str, folder: &str) -> Result<bool>;

    /// Moves to the provider's trash, or removes outright when `permanent`.
    async fn delete_message(&mut self, message_id: &str, permanent: bool) -> Result<bool>;

    async fn apply_label(&mut self, _message_id: &str, _label: &str) -> Result<bool> {
        Err(ConnectorError::Unsupported("apply_label"))
    }

    /// Credentials changed during this instance's life (token refresh), if any.
    fn refreshed_credentials(&self) -> Option<Credentials>;
}

/// Builds a connector for an account from its opened credentials.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, account: &Account, credentials: Credentials) -> Result<Box<dyn MailConnector>>;
}

pub struct ProviderConnectorFactory {
    refresher: Arc<dyn TokenRefresher>,
    options: ConnectorOptions,
    graph_base_url: String,
}

impl ProviderConnectorFactory {
    pub fn new(refresher: Arc<dyn TokenRefresher>, options: ConnectorOptions) -> Self {
        Self {
            refresher,
            options,
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
        }
    }

    pub fn with_graph_base_url(mut self, url: impl Into<String>) -> Self {
        self.graph_base_url = url.into();
        self
    }
}

impl ConnectorFactory for ProviderConnectorFactory {
    fn create(&self, account: &Account, credentials: Credentials) -> Result<Box<dyn MailConnector>> {
        match (account.provider, credentials) {
            (ProviderKind::PasswordImap, creds @ Credentials::Password(_))
            | (ProviderKind::OAuth2Imap, creds @ Credentials::OAuth2(_)) => Ok(Box::new(
                ImapConnector::new(creds, self.refresher.clone(), self.options.clone()),
            )),
            (ProviderKind::OAuth2Rest, Credentials::OAuth2(oauth)) => Ok(Box::new(
                GraphConnector::new(
                    oauth,
                    self.refresher.clone(),
                    self.options.clone(),
                    self.graph_base_url.clone(),
                )?,
            )),
            (kind, other) => Err(ConnectorError::Credentials(format!(
                "account {} is {} but holds {} credentials",
                account.id,
                kind,
                match other {
                    Credentials::Password(_) => "password",
                    Credentials::OAuth2(_) => "oauth2",
                }
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unused;

    #[async_trait]
    impl TokenRefresher for Unused {
        async fn refresh(&self, _c: &OAuth2Credentials) -> Result<TokenResponse> {
            Err(ConnectorError::RefreshFailed("unused".into()))
        }
    }

    fn account(provider: ProviderKind) -> Account {
        Account {
            id: "acct".into(),
            display_name: "Test".into(),
            provider,
            credential_blob: String::new(),
            last_sync: None,
            sync_watermark: None,
            last_error: None,
            requires_reauth: false,
            created_at: Utc::now(),
        }
    }

    fn password() -> Credentials {
        Credentials::Password(PasswordCredentials {
            host: "imap.example.com".into(),
            port: 993,
            username: "me".into(),
            password: "pw".into(),
            trash_folder: None,
        })
    }

    #[test]
    fn test_newest_after_excludes_boundary() {
        let t = Utc::now();
        let received = vec![
            t - chrono::Duration::seconds(1),
            t,
            t + chrono::Duration::seconds(1),
        ];
        assert_eq!(
            newest_after(received.clone(), Some(t), 10, |r| *r),
            vec![t + chrono::Duration::seconds(1)]
        );
        assert_eq!(newest_after(received, None, 2, |r| *r)[0], t + chrono::Duration::seconds(1));
    }

    #[test]
    fn test_newest_after_caps_newest_first() {
        let t = Utc::now();
        let received: Vec<_> = (0..5).map(|m| t + chrono::Duration::minutes(m)).collect();
        let kept = newest_after(received, Some(t), 2, |r| *r);
        assert_eq!(
            kept,
            vec![t + chrono::Duration::minutes(4), t + chrono::Duration::minutes(3)]
        );
    }

    #[test]
    fn test_factory_rejects_mismatched_credentials() {
        let factory = ProviderConnectorFactory::new(Arc::new(Unused), ConnectorOptions::default());
        assert!(factory
            .create(&account(ProviderKind::PasswordImap), password())
            .is_ok());
        assert!(matches!(
            factory.create(&account(ProviderKind::OAuth2Rest), password()),
            Err(ConnectorError::Credentials(_))
        ));
    }

    #[test]
    fn test_new_connector_starts_disconnected() {
        let factory = ProviderConnectorFactory::new(Arc::new(Unused), ConnectorOptions::default());
        let conn = factory
            .create(&account(ProviderKind::PasswordImap), password())
            .unwrap();
        assert_eq!(conn.state(), ConnectorState::Disconnected);
    }
}
