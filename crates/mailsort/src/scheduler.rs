//! Timer-driven scheduler: one pipeline run per account per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::pipeline::{PipelineDriver, PipelineError, RunSummary};

/// Requests accepted by a running scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Start a pass now instead of waiting for the next tick.
    RunNow,
    /// Swap in the rule file's current contents before the next pass.
    ReloadRules,
}

pub type PassResult = Vec<(String, Result<RunSummary, PipelineError>)>;

pub struct Scheduler {
    driver: Arc<PipelineDriver>,
    interval: Duration,
    max_concurrent: usize,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(driver: Arc<PipelineDriver>, interval: Duration, max_concurrent: usize) -> Self {
        Self {
            driver,
            interval,
            max_concurrent: max_concurrent.max(1),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between passes; setting it ends [`run`](Self::run).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Ticks until stopped. The first pass starts immediately.
    ///
    /// After [`stop`](Self::stop), send any command to wake the loop.
    pub async fn run(&self, mut commands: broadcast::Receiver<SchedulerCommand>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        loop {
            if self.stopping() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                command = commands.recv(), if commands_open => match command {
                    Ok(SchedulerCommand::RunNow) => log::info!("Manual run triggered"),
                    Ok(SchedulerCommand::ReloadRules) => {
                        self.reload_rules();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Scheduler dropped {} queued commands", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        commands_open = false;
                        continue;
                    }
                },
            }

            if self.stopping() {
                break;
            }

            self.run_pass().await;
        }

        log::info!("Scheduler stopped");
    }

    /// Runs every eligible account once, concurrently up to `max_concurrent`.
    ///
    /// Accounts flagged for re-authorization are skipped.
    pub async fn run_pass(&self) -> PassResult {
        let accounts = match self.driver.store().list_accounts() {
            Ok(accounts) => accounts,
            Err(e) => {
                log::error!("Could not list accounts: {}", e);
                return Vec::new();
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut runs = JoinSet::new();

        for account in accounts {
            if account.requires_reauth {
                log::debug!("Skipping {}: re-authorization required", account.id);
                continue;
            }

            let driver = Arc::clone(&self.driver);
            let semaphore = Arc::clone(&semaphore);
            runs.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = driver.run_account(&account.id).await;
                (account.id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok((account_id, result)) => {
                    if let Err(e) = &result {
                        log::warn!("Run for {} failed: {}", account_id, e);
                    }
                    results.push((account_id, result));
                }
                Err(e) => log::error!("Run task aborted: {}", e),
            }
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    pub fn reload_rules(&self) {
        match self.driver.classifier().registry().reload() {
            Ok(count) => log::info!("Rules reloaded ({} active)", count),
            Err(e) => log::error!("Rule reload failed, previous rules stay active: {}", e),
        }
    }
}
