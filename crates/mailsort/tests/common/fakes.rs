//! In-memory stand-ins for the provider and the model service.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsort::classifier::{
    ClassificationRequest, ClassificationService, ClassifyError, ModelVerdict,
};
use mailsort::connector::{
    self, ConnectorError, ConnectorFactory, ConnectorState, Credentials, MailConnector,
};
use mailsort::model::{Account, FetchedMessage};

/// Provider-side state of one fake mailbox, inspected by tests after a run.
#[derive(Default)]
pub struct FakeMailbox {
    pub messages: Vec<FetchedMessage>,
    pub moved: Vec<(String, String)>,
    pub deleted: Vec<(String, bool)>,
    /// Provider ids whose move/delete calls fail with a server error.
    pub broken: HashSet<String>,
    pub reject_auth: bool,
    /// Handed back as refreshed credentials by every connector created.
    pub refreshed: Option<Credentials>,
    pub last_since: Option<DateTime<Utc>>,
    pub fetch_calls: usize,
    /// Held before each fetch answers, to keep a run in flight.
    pub fetch_delay: Option<Duration>,
}

pub type SharedMailbox = Arc<Mutex<FakeMailbox>>;

pub fn shared_mailbox() -> SharedMailbox {
    Arc::new(Mutex::new(FakeMailbox::default()))
}

pub struct FakeConnector {
    mailbox: SharedMailbox,
    state: ConnectorState,
}

impl FakeConnector {
    pub fn new(mailbox: SharedMailbox) -> Self {
        Self {
            mailbox,
            state: ConnectorState::Disconnected,
        }
    }

    /// A connector that is already connected, for driving the dispatcher directly.
    pub fn connected(mailbox: SharedMailbox) -> Self {
        Self {
            mailbox,
            state: ConnectorState::Connected,
        }
    }

    fn take(&self, message_id: &str) -> Result<bool, ConnectorError> {
        let mut mailbox = self.mailbox.lock().unwrap();
        if mailbox.broken.contains(message_id) {
            return Err(ConnectorError::Server {
                status: 500,
                body: "mailbox unavailable".to_string(),
            });
        }
        let before = mailbox.messages.len();
        mailbox.messages.retain(|m| m.provider_id != message_id);
        Ok(mailbox.messages.len() < before)
    }
}

#[async_trait]
impl MailConnector for FakeConnector {
    fn state(&self) -> ConnectorState {
        self.state
    }

    async fn connect(&mut self) -> connector::Result<()> {
        if self.mailbox.lock().unwrap().reject_auth {
            self.state = ConnectorState::AuthFailed;
            return Err(ConnectorError::Auth("invalid_grant".to_string()));
        }
        self.state = ConnectorState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> connector::Result<()> {
        self.state = ConnectorState::Disconnected;
        Ok(())
    }

    async fn fetch_messages(
        &mut self,
        _folder: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> connector::Result<Vec<FetchedMessage>> {
        let delay = self.mailbox.lock().unwrap().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.fetch_calls += 1;
        mailbox.last_since = since;
        Ok(connector::newest_after(
            mailbox.messages.clone(),
            since,
            limit,
            |m| m.received_at,
        ))
    }

    async fn move_message(&mut self, message_id: &str, folder: &str) -> connector::Result<bool> {
        let moved = self.take(message_id)?;
        if moved {
            self.mailbox
                .lock()
                .unwrap()
                .moved
                .push((message_id.to_string(), folder.to_string()));
        }
        Ok(moved)
    }

    async fn delete_message(&mut self, message_id: &str, permanent: bool) -> connector::Result<bool> {
        let deleted = self.take(message_id)?;
        if deleted {
            self.mailbox
                .lock()
                .unwrap()
                .deleted
                .push((message_id.to_string(), permanent));
        }
        Ok(deleted)
    }

    fn refreshed_credentials(&self) -> Option<Credentials> {
        self.mailbox.lock().unwrap().refreshed.clone()
    }
}

/// Hands out connectors over one fake mailbox per account.
#[derive(Default)]
pub struct FakeConnectorFactory {
    mailboxes: Mutex<HashMap<String, SharedMailbox>>,
    created: AtomicUsize,
}

impl FakeConnectorFactory {
    pub fn mailbox(&self, account_id: &str) -> SharedMailbox {
        self.mailboxes
            .lock()
            .unwrap()
            .entry(account_id.to_string())
            .or_insert_with(shared_mailbox)
            .clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ConnectorFactory for FakeConnectorFactory {
    fn create(
        &self,
        account: &Account,
        _credentials: Credentials,
    ) -> connector::Result<Box<dyn MailConnector>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnector::new(self.mailbox(&account.id))))
    }
}

/// Answers by subject keyword; anything unscripted is a service error.
#[derive(Default)]
pub struct ScriptedModel {
    answers: Mutex<Vec<(String, ModelVerdict)>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn answer(self, subject_keyword: &str, category: &str, confidence: u8) -> Self {
        self.answers.lock().unwrap().push((
            subject_keyword.to_string(),
            ModelVerdict {
                category: category.to_string(),
                confidence,
                rationale: format!("looks like {}", category),
            },
        ));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationService for ScriptedModel {
    async fn classify(&self, request: &ClassificationRequest) -> Result<ModelVerdict, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap()
            .iter()
            .find(|(keyword, _)| request.subject.contains(keyword.as_str()))
            .map(|(_, verdict)| verdict.clone())
            .ok_or_else(|| ClassifyError::Http("connection refused".to_string()))
    }
}
