//! Provider-side actions driven by classification results, with an audit trail.

mod audit;
mod dispatcher;
mod plan;

use thiserror::Error;

pub use audit::{APPLY_LABEL, BULK_MOVE, COMPONENT, DELETE_EMAIL, MOVE_EMAIL};
pub use dispatcher::{
    ActionDispatcher, ActionResult, BulkFailure, BulkMoveResult, BulkStatus, DispatchSummary,
};
pub use plan::{default_folder, plan_for, ActionPlan};

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Message {0} not found for this account")]
    MessageNotFound(i64),

    #[error("Provider action failed: {0}")]
    Provider(String),

    #[error("Record store error: {0}")]
    Database(#[from] DatabaseError),
}
