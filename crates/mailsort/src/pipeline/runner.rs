use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::actions::ActionDispatcher;
use crate::classifier::Classifier;
use crate::connector::{ConnectorFactory, Credentials, MailConnector};
use crate::db::RecordStore;
use crate::model::{Account, ProcessingStatus};
use crate::secrets::CredentialVault;

use super::config::{ActionMode, PipelineConfig};
use super::error::PipelineError;
use super::summary::RunSummary;

/// Runs sync → classify → act for one account at a time per account.
///
/// Runs for different accounts may proceed concurrently; a second run for an
/// account whose previous run is still active is refused, not queued.
pub struct PipelineDriver {
    store: Arc<dyn RecordStore>,
    vault: Arc<CredentialVault>,
    connectors: Arc<dyn ConnectorFactory>,
    classifier: Arc<Classifier>,
    dispatcher: ActionDispatcher,
    config: PipelineConfig,
    running: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PipelineDriver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        vault: Arc<CredentialVault>,
        connectors: Arc<dyn ConnectorFactory>,
        classifier: Arc<Classifier>,
        config: PipelineConfig,
        permanent_delete: bool,
    ) -> Self {
        let dispatcher = ActionDispatcher::new(store.clone(), permanent_delete);
        Self {
            store,
            vault,
            connectors,
            classifier,
            dispatcher,
            config,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Executes one run for `account_id`.
    ///
    /// Run-level failures are written to the account (`last_error`, and the
    /// reauth flag for authentication failures) before being returned.
    pub async fn run_account(&self, account_id: &str) -> Result<RunSummary, PipelineError> {
        let lock = self.account_lock(account_id);
        let _guard = lock
            .try_lock_owned()
            .map_err(|_| PipelineError::RunInProgress(account_id.to_string()))?;

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", account_id = %account_id, run_id = %run_id);
        self.run_locked(account_id, run_id).instrument(span).await
    }

    fn account_lock(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        running.entry(account_id.to_string()).or_default().clone()
    }

    async fn run_locked(&self, account_id: &str, run_id: String) -> Result<RunSummary, PipelineError> {
        let account = self
            .store
            .get_account(account_id)?
            .ok_or_else(|| PipelineError::AccountNotFound(account_id.to_string()))?;

        if account.requires_reauth {
            info!("Skipping account until credentials are replaced");
            return Err(PipelineError::ReauthRequired(account.id));
        }

        let deadline = self.config.run_budget.map(|budget| Instant::now() + budget);
        let mut summary = RunSummary::new(run_id, &account.id);

        let credentials = match Credentials::open(&account.credential_blob, &self.vault) {
            Ok(credentials) => credentials,
            Err(source) => {
                let err = PipelineError::Credentials {
                    account: account.id.clone(),
                    source,
                };
                return Err(self.fail(&account, err));
            }
        };

        let mut connector = match self.connectors.create(&account, credentials) {
            Ok(connector) => connector,
            Err(e) => return Err(self.fail(&account, e.into())),
        };

        let outcome = self
            .run_stages(connector.as_mut(), &account, deadline, &mut summary)
            .await;

        if let Err(e) = connector.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }

        // Single writer: the blob only changes here, after the connector is done.
        summary.credentials_refreshed = self.persist_credentials(connector.as_ref(), &account)?;

        let newest = match outcome {
            Ok(newest) => newest,
            Err(e) => return Err(self.fail(&account, e)),
        };

        if summary.partial {
            warn!("Run stopped at its deadline; watermark left for the next run");
        } else {
            if let Some(watermark) = newest {
                self.store.advance_watermark(&account.id, watermark)?;
            }
            self.store.record_sync_success(&account.id, Utc::now())?;
        }

        info!(
            fetched = summary.fetched,
            inserted = summary.inserted,
            classified = summary.classified,
            deferred = summary.classify_deferred,
            actioned = summary.actioned,
            action_failed = summary.action_failed,
            partial = summary.partial,
            "Run finished"
        );
        Ok(summary)
    }

    /// Returns the newest receipt time seen by the sync stage.
    async fn run_stages(
        &self,
        connector: &mut dyn MailConnector,
        account: &Account,
        deadline: Option<Instant>,
        summary: &mut RunSummary,
    ) -> Result<Option<DateTime<Utc>>, PipelineError> {
        connector
            .connect()
            .instrument(info_span!("connect"))
            .await?;

        let newest = self
            .sync(connector, account, summary)
            .instrument(info_span!("sync"))
            .await?;

        self.classify(account, deadline, summary)
            .instrument(info_span!("classify"))
            .await?;

        match self.config.action_mode {
            ActionMode::Auto => {
                self.act(connector, account, deadline, summary)
                    .instrument(info_span!("act"))
                    .await?
            }
            ActionMode::Suggest => debug!("Suggest mode, no provider actions"),
        }

        Ok(newest)
    }

    async fn sync(
        &self,
        connector: &mut dyn MailConnector,
        account: &Account,
        summary: &mut RunSummary,
    ) -> Result<Option<DateTime<Utc>>, PipelineError> {
        let since = account
            .sync_watermark
            .unwrap_or_else(|| Utc::now() - self.config.initial_lookback);

        let fetched = connector
            .fetch_messages(&self.config.folder, self.config.fetch_limit, Some(since))
            .await?;
        summary.fetched = fetched.len();

        for message in &fetched {
            if self.store.insert_message_if_new(&account.id, message)? {
                summary.inserted += 1;
            }
        }

        debug!(
            "Fetched {} messages since {}, {} new",
            summary.fetched, since, summary.inserted
        );
        Ok(fetched.iter().map(|m| m.received_at).max())
    }

    async fn classify(
        &self,
        account: &Account,
        deadline: Option<Instant>,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let pending =
            self.store
                .messages_with_status(&account.id, ProcessingStatus::Pending, self.config.batch_limit)?;
        if pending.is_empty() {
            return Ok(());
        }

        let total = pending.len();
        let results = self.classifier.classify_batch(pending, deadline).await;
        if results.len() < total {
            summary.partial = true;
            warn!(
                "Classification deadline reached after {} of {} messages",
                results.len(),
                total
            );
        }

        for result in &results {
            if let Err(e) = self.store.update_classification(result.message_id, &result.update) {
                error!("Message {}: could not store classification: {}", result.message_id, e);
                summary.classify_deferred += 1;
                continue;
            }
            if result.is_deferred() {
                summary.classify_deferred += 1;
            } else {
                summary.classified += 1;
            }
        }
        Ok(())
    }

    async fn act(
        &self,
        connector: &mut dyn MailConnector,
        account: &Account,
        deadline: Option<Instant>,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let classified = self.store.messages_with_status(
            &account.id,
            ProcessingStatus::Classified,
            self.config.batch_limit,
        )?;

        let outcome = self
            .dispatcher
            .dispatch_batch(connector, &classified, deadline)
            .await;

        summary.actioned = outcome.actioned + outcome.no_action;
        summary.action_failed = outcome.failed;
        if outcome.not_started > 0 {
            summary.partial = true;
        }
        Ok(())
    }

    fn persist_credentials(
        &self,
        connector: &dyn MailConnector,
        account: &Account,
    ) -> Result<bool, PipelineError> {
        let Some(credentials) = connector.refreshed_credentials() else {
            return Ok(false);
        };

        let blob = match credentials.seal(&self.vault) {
            Ok(blob) => blob,
            Err(e) => {
                error!("Could not seal refreshed credentials: {}", e);
                return Ok(false);
            }
        };
        self.store.store_refreshed_credentials(&account.id, &blob)?;
        info!("Persisted refreshed credentials");
        Ok(true)
    }

    /// Records a run-level failure on the account and hands the error back.
    fn fail(&self, account: &Account, err: PipelineError) -> PipelineError {
        let requires_reauth = err.requires_reauth();
        if requires_reauth {
            error!("Run failed, account needs re-authorization: {}", err);
        } else {
            error!("Run failed: {}", err);
        }
        if let Err(e) = self
            .store
            .record_account_error(&account.id, &err.to_string(), requires_reauth)
        {
            error!("Could not record account error: {}", e);
        }
        err
    }
}
