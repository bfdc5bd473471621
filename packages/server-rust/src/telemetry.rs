//! Batched delivery of storage events to an external telemetry sink.
//!
//! A bus listener forwards events to a background worker without blocking
//! the emitter. The worker sends a batch when it reaches `batch_size`, on
//! every flush interval, and once more on stop.

use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::TelemetryConfig;
use crate::events::{EventBus, EventFilter, EventListener, ListenerId, StorageEvent};
use crate::worker::{BackgroundRunnable, BackgroundWorker, TaskSender};

/// Destination for event batches.
#[async_trait]
pub trait TelemetrySink: Send + Sync + 'static {
    /// Delivers one batch.
    ///
    /// # Errors
    ///
    /// A failed batch is logged and dropped.
    async fn send_batch(&self, events: Vec<StorageEvent>) -> anyhow::Result<()>;
}

/// Sink that writes a summary of each batch to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn send_batch(&self, events: Vec<StorageEvent>) -> anyhow::Result<()> {
        let first = events.first().map(|e| e.timestamp);
        let last = events.last().map(|e| e.timestamp);
        debug!(count = events.len(), first = ?first, last = ?last, "telemetry batch");
        Ok(())
    }
}

pub struct TelemetryRunnable {
    sink: Arc<dyn TelemetrySink>,
    buffer: Vec<StorageEvent>,
    batch_size: usize,
}

impl TelemetryRunnable {
    #[must_use]
    pub fn new(sink: Arc<dyn TelemetrySink>, batch_size: usize) -> Self {
        Self {
            sink,
            buffer: Vec::with_capacity(batch_size),
            batch_size: batch_size.max(1),
        }
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = mem::take(&mut self.buffer);
        let count = batch.len();
        match self.sink.send_batch(batch).await {
            Ok(()) => {
                metrics::counter!("locale_store_telemetry_events_sent_total").increment(count as u64);
            }
            Err(e) => {
                warn!(count, error = %e, "telemetry batch dropped");
                metrics::counter!("locale_store_telemetry_batches_failed_total").increment(1);
            }
        }
    }
}

#[async_trait]
impl BackgroundRunnable for TelemetryRunnable {
    type Task = StorageEvent;

    async fn run(&mut self, event: StorageEvent) {
        self.buffer.push(event);
        if self.buffer.len() >= self.batch_size {
            self.flush().await;
        }
    }

    async fn on_tick(&mut self) {
        self.flush().await;
    }

    async fn shutdown(&mut self) {
        self.flush().await;
    }
}

/// Forwards bus events to the telemetry worker.
pub struct TelemetryListener {
    sender: TaskSender<StorageEvent>,
}

impl EventListener for TelemetryListener {
    fn on_event(&self, event: &StorageEvent) -> anyhow::Result<()> {
        self.sender.try_submit(event.clone())
    }
}

/// Owns the telemetry worker and its bus registration.
pub struct TelemetryReporter {
    worker: BackgroundWorker<TelemetryRunnable>,
    registration: Option<(Arc<EventBus>, ListenerId)>,
}

impl TelemetryReporter {
    /// Starts the worker. Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(sink: Arc<dyn TelemetrySink>, config: &TelemetryConfig) -> Self {
        let runnable = TelemetryRunnable::new(sink, config.batch_size);
        Self {
            worker: BackgroundWorker::start(runnable, config.flush_interval),
            registration: None,
        }
    }

    /// Subscribes the reporter to every event on `bus`.
    pub fn attach(&mut self, bus: &Arc<EventBus>) {
        let Some(sender) = self.worker.sender() else {
            return;
        };
        let id = bus.add_event_listener(EventFilter::All, Arc::new(TelemetryListener { sender }));
        self.registration = Some((Arc::clone(bus), id));
    }

    /// Unsubscribes, then flushes pending events and stops the worker.
    pub async fn stop(&mut self) {
        if let Some((bus, id)) = self.registration.take() {
            bus.remove_event_listener(id);
        }
        self.worker.stop().await;
    }
}
