//! A fully wired pipeline over an in-memory record store and fake provider.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use mailsort::classifier::Classifier;
use mailsort::connector::{Credentials, PasswordCredentials};
use mailsort::db::{account_repo, Database, RecordStore};
use mailsort::model::ProviderKind;
use mailsort::pipeline::{PipelineConfig, PipelineDriver};
use mailsort::rules::{Rule, RuleRegistry, RuleSet};
use mailsort::secrets::CredentialVault;

use super::fakes::{FakeConnectorFactory, ScriptedModel, SharedMailbox};

/// 32 bytes of ASCII hex digits, base64 encoded.
pub const TEST_VAULT_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

pub struct TestHarness {
    pub db: Database,
    pub vault: Arc<CredentialVault>,
    pub connectors: Arc<FakeConnectorFactory>,
    pub model: Arc<ScriptedModel>,
    pub registry: Arc<RuleRegistry>,
    pub config: PipelineConfig,
    pub permanent_delete: bool,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            db: Database::open_in_memory().expect("Failed to create test database"),
            vault: Arc::new(
                CredentialVault::from_base64_key(TEST_VAULT_KEY).expect("valid test key"),
            ),
            connectors: Arc::new(FakeConnectorFactory::default()),
            model: Arc::new(ScriptedModel::default()),
            registry: Arc::new(RuleRegistry::new(RuleSet::empty())),
            config: PipelineConfig::default(),
            permanent_delete: false,
        }
    }

    pub fn with_rules(self, rules: Vec<Rule>) -> Self {
        self.registry.replace(RuleSet::new(rules));
        self
    }

    /// Loads rules from a file so the registry can later be reloaded from it.
    pub fn with_rules_file(mut self, path: &Path) -> Self {
        self.registry = Arc::new(RuleRegistry::from_path(path).expect("valid rules file"));
        self
    }

    pub fn with_model(mut self, model: ScriptedModel) -> Self {
        self.model = Arc::new(model);
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut PipelineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::new(self.db.clone())
    }

    /// Enrolls a password IMAP account and returns its fake mailbox.
    pub fn enroll(&self, account_id: &str) -> SharedMailbox {
        let blob = password_credentials(account_id)
            .seal(&self.vault)
            .expect("seal test credentials");
        account_repo::insert(
            &self.db,
            account_id,
            account_id,
            ProviderKind::PasswordImap,
            &blob,
        )
        .expect("insert test account");
        self.connectors.mailbox(account_id)
    }

    pub fn driver(&self) -> Arc<PipelineDriver> {
        let classifier = Classifier::new(self.registry.clone(), self.model.clone(), 4);
        Arc::new(PipelineDriver::new(
            self.store(),
            self.vault.clone(),
            self.connectors.clone(),
            Arc::new(classifier),
            self.config.clone(),
            self.permanent_delete,
        ))
    }

    pub fn open_credentials(&self, account_id: &str) -> Credentials {
        let account = self
            .db
            .get_account(account_id)
            .expect("read account")
            .expect("account exists");
        Credentials::open(&account.credential_blob, &self.vault).expect("open credentials")
    }
}

pub fn password_credentials(username: &str) -> Credentials {
    Credentials::Password(PasswordCredentials {
        host: "imap.example.com".to_string(),
        port: 993,
        username: username.to_string(),
        password: "app-password".to_string(),
        trash_folder: None,
    })
}
