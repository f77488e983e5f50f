use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Settings;

/// Whether classified messages are acted on or only labelled in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMode {
    #[default]
    Auto,
    /// Classification is stored; no provider action is taken.
    Suggest,
}

impl ActionMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(ActionMode::Auto),
            "suggest" => Some(ActionMode::Suggest),
            _ => None,
        }
    }
}

/// Per-run knobs, derived from [`Settings`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub folder: String,
    pub fetch_limit: usize,
    /// How far back the first run of a new account looks.
    pub initial_lookback: chrono::Duration,
    /// PENDING / CLASSIFIED messages handled per run.
    pub batch_limit: usize,
    /// Wall-clock budget; `None` runs to completion.
    pub run_budget: Option<Duration>,
    pub action_mode: ActionMode,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            folder: settings.sync.folder.clone(),
            fetch_limit: settings.sync.fetch_limit,
            initial_lookback: chrono::Duration::days(i64::from(settings.sync.initial_lookback_days)),
            batch_limit: settings.sync.batch_limit,
            run_budget: match settings.scheduler.run_budget_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            action_mode: settings.actions.mode,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
