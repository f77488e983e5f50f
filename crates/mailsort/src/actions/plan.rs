//! Maps a classification outcome to the one provider action it implies.

use crate::model::{Category, RuleHint};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPlan {
    Move { folder: String },
    Delete,
    None,
}

impl ActionPlan {
    pub fn name(&self) -> &'static str {
        match self {
            ActionPlan::Move { .. } => "move",
            ActionPlan::Delete => "delete",
            ActionPlan::None => "none",
        }
    }
}

/// Destination folder used when no rule names one.
///
/// Professional, personal and unclassified mail stays where it is; spam has
/// no folder because it is deleted instead.
pub fn default_folder(category: Category) -> Option<&'static str> {
    match category {
        Category::Invoice => Some("Finance/Invoices"),
        Category::Receipt => Some("Finance/Receipts"),
        Category::Document => Some("Documents"),
        Category::Newsletter => Some("Newsletters"),
        Category::Promotion => Some("Promotions"),
        Category::Social => Some("Social"),
        Category::Notification => Some("Notifications"),
        Category::Professional
        | Category::Personal
        | Category::Spam
        | Category::Unclassified => None,
    }
}

/// Rule hints win over the category table. Never yields both a move and a delete.
pub fn plan_for(category: Category, hint: &RuleHint) -> ActionPlan {
    if hint.auto_delete {
        return ActionPlan::Delete;
    }
    if let Some(folder) = hint.folder.as_deref().filter(|f| !f.trim().is_empty()) {
        return ActionPlan::Move {
            folder: folder.to_string(),
        };
    }
    if category == Category::Spam {
        return ActionPlan::Delete;
    }
    match default_folder(category) {
        Some(folder) => ActionPlan::Move {
            folder: folder.to_string(),
        },
        None => ActionPlan::None,
    }
}
