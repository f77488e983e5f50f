//! Audit entry construction for dispatcher actions.

use serde_json::{json, Map, Value};

use crate::model::{AuditOutcome, Message, NewAuditEntry};

pub const COMPONENT: &str = "action_dispatcher";

pub const MOVE_EMAIL: &str = "move_email";
pub const DELETE_EMAIL: &str = "delete_email";
pub const BULK_MOVE: &str = "bulk_move";
pub const APPLY_LABEL: &str = "apply_label";

/// Details common to every entry: enough to tell why the action was taken.
pub(crate) fn base_details(message: &Message) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("message_id".into(), json!(message.id));
    details.insert("category".into(), json!(message.category.as_str()));
    details.insert("provenance".into(), json!(message.provenance.to_string()));
    if let Some(rule) = message.provenance.rule_name() {
        details.insert("rule".into(), json!(rule));
    }
    details
}

pub(crate) fn entry(
    message: &Message,
    action: &str,
    outcome: AuditOutcome,
    details: Map<String, Value>,
) -> NewAuditEntry {
    NewAuditEntry {
        account_id: message.account_id.clone(),
        message_ref: message.provider_id.clone(),
        action: action.to_string(),
        outcome,
        details: Value::Object(details),
        component: COMPONENT.to_string(),
    }
}
