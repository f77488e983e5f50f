use std::sync::Arc;

use log::{error, info, warn};
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use super::audit::{self, APPLY_LABEL, BULK_MOVE, DELETE_EMAIL, MOVE_EMAIL};
use super::plan::{plan_for, ActionPlan};
use super::ActionError;
use crate::connector::{self, MailConnector};
use crate::db::{DatabaseError, RecordStore};
use crate::model::{AuditOutcome, Message, ProcessingStatus};

const NOT_AT_PROVIDER: &str = "message no longer present at provider";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Applied(ActionPlan),
    /// The category implies no movement; the message is still marked ACTIONED.
    NoAction,
    /// Only CLASSIFIED messages are acted on.
    Skipped(ProcessingStatus),
    Failed { plan: ActionPlan, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub actioned: usize,
    pub no_action: usize,
    pub failed: usize,
    /// Messages left untouched because the deadline passed.
    pub not_started: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkStatus {
    Success,
    Partial,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub id: i64,
    pub error: String,
}

/// Per-id outcome of a bulk move. `succeeded` and `failed` are disjoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkMoveResult {
    pub succeeded: Vec<i64>,
    pub failed: Vec<BulkFailure>,
    pub total: usize,
}

impl BulkMoveResult {
    pub fn status(&self) -> BulkStatus {
        match (self.succeeded.is_empty(), self.failed.is_empty()) {
            (_, true) => BulkStatus::Success,
            (false, false) => BulkStatus::Partial,
            (true, false) => BulkStatus::Error,
        }
    }
}

/// Executes provider-side actions and writes one audit entry per attempt.
///
/// The connector is borrowed per call: a dispatcher is shared across runs while
/// each run owns its own connector.
pub struct ActionDispatcher {
    store: Arc<dyn RecordStore>,
    permanent_delete: bool,
}

impl ActionDispatcher {
    pub fn new(store: Arc<dyn RecordStore>, permanent_delete: bool) -> Self {
        Self {
            store,
            permanent_delete,
        }
    }

    /// Applies the single action implied by a classified message.
    ///
    /// Provider failures are recorded (audit entry, FAILED status) and reported
    /// as [`ActionResult::Failed`]; only record-store errors are returned as `Err`.
    pub async fn dispatch(
        &self,
        connector: &mut dyn MailConnector,
        message: &Message,
    ) -> Result<ActionResult, ActionError> {
        if message.status != ProcessingStatus::Classified {
            return Ok(ActionResult::Skipped(message.status));
        }

        let plan = plan_for(message.category, &message.rule_hint);
        let mut details = audit::base_details(message);

        let (action, attempt) = match &plan {
            ActionPlan::None => {
                self.store
                    .update_status(message.id, ProcessingStatus::Actioned)?;
                return Ok(ActionResult::NoAction);
            }
            ActionPlan::Move { folder } => {
                details.insert("folder".into(), json!(folder));
                let attempt = connector.move_message(&message.provider_id, folder).await;
                (MOVE_EMAIL, attempt)
            }
            ActionPlan::Delete => {
                details.insert("permanent".into(), json!(self.permanent_delete));
                let attempt = connector
                    .delete_message(&message.provider_id, self.permanent_delete)
                    .await;
                (DELETE_EMAIL, attempt)
            }
        };

        let failure = self.record(message, action, attempt, details)?;
        self.settle(message.id, failure.is_none())?;

        Ok(match failure {
            None => {
                info!("Message {}: {} ({})", message.id, action, message.category);
                ActionResult::Applied(plan)
            }
            Some(error) => {
                warn!("Message {}: {} failed: {}", message.id, action, error);
                ActionResult::Failed { plan, error }
            }
        })
    }

    /// Dispatches messages one after another over the same connector.
    ///
    /// A failing message never stops its siblings. Once `deadline` passes no
    /// further message is started.
    pub async fn dispatch_batch(
        &self,
        connector: &mut dyn MailConnector,
        messages: &[Message],
        deadline: Option<Instant>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for (index, message) in messages.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                summary.not_started = messages.len() - index;
                warn!(
                    "Action deadline reached, {} messages left for the next run",
                    summary.not_started
                );
                break;
            }

            match self.dispatch(connector, message).await {
                Ok(ActionResult::Applied(_)) => summary.actioned += 1,
                Ok(ActionResult::NoAction) => summary.no_action += 1,
                Ok(ActionResult::Skipped(_)) => {}
                Ok(ActionResult::Failed { .. }) => summary.failed += 1,
                Err(e) => {
                    error!("Message {}: could not record action: {}", message.id, e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Moves each id independently; whatever succeeded stays committed.
    pub async fn bulk_move(
        &self,
        connector: &mut dyn MailConnector,
        account_id: &str,
        ids: &[i64],
        folder: &str,
    ) -> BulkMoveResult {
        info!("Bulk moving {} messages to {}", ids.len(), folder);

        let mut result = BulkMoveResult {
            succeeded: Vec::new(),
            failed: Vec::new(),
            total: ids.len(),
        };

        for &id in ids {
            match self.bulk_move_one(connector, account_id, id, folder).await {
                Ok(None) => result.succeeded.push(id),
                Ok(Some(error)) => result.failed.push(BulkFailure { id, error }),
                Err(e) => result.failed.push(BulkFailure {
                    id,
                    error: e.to_string(),
                }),
            }
        }

        info!(
            "Bulk move finished: {} succeeded, {} failed",
            result.succeeded.len(),
            result.failed.len()
        );
        result
    }

    async fn bulk_move_one(
        &self,
        connector: &mut dyn MailConnector,
        account_id: &str,
        id: i64,
        folder: &str,
    ) -> Result<Option<String>, ActionError> {
        let message = self.load(account_id, id)?;

        let mut details = audit::base_details(&message);
        details.insert("folder".into(), json!(folder));
        let attempt = connector.move_message(&message.provider_id, folder).await;

        let failure = self.record(&message, BULK_MOVE, attempt, details)?;
        self.settle(message.id, failure.is_none())?;
        Ok(failure)
    }

    /// Applies a provider label. Labels are not terminal: status is left alone.
    pub async fn apply_label(
        &self,
        connector: &mut dyn MailConnector,
        account_id: &str,
        id: i64,
        label: &str,
    ) -> Result<bool, ActionError> {
        let message = self.load(account_id, id)?;

        let mut details = audit::base_details(&message);
        details.insert("label".into(), json!(label));

        match connector.apply_label(&message.provider_id, label).await {
            Ok(applied) => {
                self.record(&message, APPLY_LABEL, Ok(applied), details)?;
                Ok(applied)
            }
            Err(e) => {
                let text = e.to_string();
                self.record(&message, APPLY_LABEL, Err(e), details)?;
                Err(ActionError::Provider(text))
            }
        }
    }

    fn load(&self, account_id: &str, id: i64) -> Result<Message, ActionError> {
        self.store
            .get_message(id)?
            .filter(|m| m.account_id == account_id)
            .ok_or(ActionError::MessageNotFound(id))
    }

    /// Appends the audit entry for one attempt. Returns the failure text, if any.
    fn record(
        &self,
        message: &Message,
        action: &str,
        attempt: connector::Result<bool>,
        mut details: Map<String, Value>,
    ) -> Result<Option<String>, DatabaseError> {
        let failure = match attempt {
            Ok(true) => None,
            Ok(false) => Some(NOT_AT_PROVIDER.to_string()),
            Err(e) => Some(e.to_string()),
        };

        let outcome = match &failure {
            None => AuditOutcome::Success,
            Some(error) => {
                details.insert("error".into(), json!(error));
                AuditOutcome::Failure
            }
        };

        self.store
            .append_audit(&audit::entry(message, action, outcome, details))?;
        Ok(failure)
    }

    fn settle(&self, id: i64, succeeded: bool) -> Result<(), DatabaseError> {
        let status = if succeeded {
            ProcessingStatus::Actioned
        } else {
            ProcessingStatus::Failed
        };
        self.store.update_status(id, status)
    }
}
