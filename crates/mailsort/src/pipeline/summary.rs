use serde::Serialize;

/// Counts and outcome of one run, for logs and the `once` command's output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub account_id: String,
    pub fetched: usize,
    pub inserted: usize,
    pub classified: usize,
    pub classify_deferred: usize,
    pub actioned: usize,
    pub action_failed: usize,
    /// The run stopped at its deadline; the next tick picks up the rest.
    pub partial: bool,
    pub credentials_refreshed: bool,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            account_id: account_id.into(),
            ..Default::default()
        }
    }
}
