//! Typed publish/subscribe bus with a bounded event history.
//!
//! Listeners are invoked synchronously, in registration order, with no lock
//! held: a listener may itself emit events or (de)register listeners. A
//! listener that returns an error or panics is logged and counted; the
//! remaining listeners still run and the emitter never sees the failure.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, warn};

use super::types::{EventFilter, StorageEvent, StorageEventType};

/// Receives storage events.
///
/// Used as `Arc<dyn EventListener>`. Closures of the matching shape
/// implement it directly.
pub trait EventListener: Send + Sync {
    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Any error is logged by the bus and otherwise ignored.
    fn on_event(&self, event: &StorageEvent) -> anyhow::Result<()>;
}

impl<F> EventListener for F
where
    F: Fn(&StorageEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &StorageEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Handle returned by [`EventBus::add_event_listener`], used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    filter: EventFilter,
    listener: Arc<dyn EventListener>,
}

/// Outcome of one [`EventBus::emit_event`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that returned `Ok`.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

/// Registered listener counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStats {
    pub total_listeners: usize,
    pub wildcard_listeners: usize,
    pub by_type: BTreeMap<StorageEventType, usize>,
}

/// Event bus owned by one store instance.
pub struct EventBus {
    listeners: RwLock<Vec<Registration>>,
    history: Mutex<VecDeque<StorageEvent>>,
    history_limit: usize,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates a bus retaining at most `history_limit` past events.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(history_limit.min(1024))),
            history_limit,
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `listener` for events matching `filter`.
    pub fn add_event_listener(
        &self,
        filter: impl Into<EventFilter>,
        listener: Arc<dyn EventListener>,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Registration {
            id,
            filter: filter.into(),
            listener,
        });
        id
    }

    /// Unregisters one listener. Returns `false` if it was not registered.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    /// Unregisters every listener registered with exactly `filter`, or every
    /// listener at all when `filter` is `None`. Returns how many were removed.
    pub fn remove_all_listeners(&self, filter: Option<EventFilter>) -> usize {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        match filter {
            Some(filter) => listeners.retain(|r| r.filter != filter),
            None => listeners.clear(),
        }
        before - listeners.len()
    }

    /// Records `event` in the history ring and dispatches it to every
    /// listener registered for its type or for all events.
    pub fn emit_event(&self, event: StorageEvent) -> DispatchReport {
        {
            let mut history = self.history.lock();
            if self.history_limit > 0 {
                while history.len() >= self.history_limit {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
        }

        let targets: Vec<(ListenerId, Arc<dyn EventListener>)> = self
            .listeners
            .read()
            .iter()
            .filter(|r| r.filter.matches(event.event_type))
            .map(|r| (r.id, Arc::clone(&r.listener)))
            .collect();

        metrics::counter!(
            "locale_store_events_emitted_total",
            "type" => event.event_type.as_str()
        )
        .increment(1);

        let mut report = DispatchReport::default();
        for (id, listener) in targets {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        listener = ?id,
                        event_type = %event.event_type,
                        error = %e,
                        "event listener failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    error!(
                        listener = ?id,
                        event_type = %event.event_type,
                        "event listener panicked"
                    );
                }
            }
        }

        if report.failed > 0 {
            metrics::counter!("locale_store_event_listener_failures_total")
                .increment(report.failed as u64);
        }
        report
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    #[must_use]
    pub fn get_listener_stats(&self) -> ListenerStats {
        let listeners = self.listeners.read();
        let mut stats = ListenerStats {
            total_listeners: listeners.len(),
            ..ListenerStats::default()
        };
        for registration in listeners.iter() {
            match registration.filter {
                EventFilter::All => stats.wildcard_listeners += 1,
                EventFilter::Only(t) => *stats.by_type.entry(t).or_default() += 1,
            }
        }
        stats
    }

    /// Past events in chronological order. With `limit`, only the most
    /// recent `limit` events are returned.
    #[must_use]
    pub fn get_event_history(&self, limit: Option<usize>) -> Vec<StorageEvent> {
        let history = self.history.lock();
        let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
        history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_event_history(&self) {
        self.history.lock().clear();
    }

    /// Drops every listener and the event history. Safe to call repeatedly.
    pub fn cleanup_event_system(&self) {
        self.listeners.write().clear();
        self.history.lock().clear();
    }
}
