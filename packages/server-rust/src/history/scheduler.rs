//! Periodic history maintenance on a background worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::maintenance::MaintenanceReport;
use super::manager::HistoryManager;
use crate::worker::{BackgroundRunnable, BackgroundWorker};

/// Task variants for the maintenance worker.
#[derive(Debug)]
pub enum MaintenanceTask {
    /// Run a full maintenance pass regardless of `needs_cleanup`.
    RunNow,
}

/// Runs [`HistoryManager::perform_maintenance`] when the history needs it.
pub struct MaintenanceRunnable {
    history: Arc<HistoryManager>,
    last_report: Option<MaintenanceReport>,
}

impl MaintenanceRunnable {
    #[must_use]
    pub fn new(history: Arc<HistoryManager>) -> Self {
        Self {
            history,
            last_report: None,
        }
    }

    fn maintain(&mut self) {
        let result = self.history.perform_maintenance();
        match result.data {
            Some(report) if result.success => self.last_report = Some(report),
            _ => warn!(error = ?result.error, "scheduled history maintenance failed"),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for MaintenanceRunnable {
    type Task = MaintenanceTask;

    async fn run(&mut self, task: MaintenanceTask) {
        match task {
            MaintenanceTask::RunNow => self.maintain(),
        }
    }

    async fn on_tick(&mut self) {
        let advice = self.history.needs_cleanup();
        match advice.data {
            Some(advice) if advice.needs_cleanup => self.maintain(),
            Some(_) => debug!("history maintenance not needed"),
            None => warn!(error = ?advice.error, "history cleanup check failed"),
        }
    }

    async fn shutdown(&mut self) {
        debug!(last_report = ?self.last_report, "maintenance worker stopped");
    }
}

/// Starts a worker that checks the history every `interval`.
#[must_use]
pub fn start_maintenance(
    history: Arc<HistoryManager>,
    interval: Duration,
) -> BackgroundWorker<MaintenanceRunnable> {
    BackgroundWorker::start(MaintenanceRunnable::new(history), interval)
}
