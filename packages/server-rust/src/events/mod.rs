//! Storage events: vocabulary, bus and default listeners.

pub mod bus;
pub mod listeners;
pub mod types;

pub use bus::{DispatchReport, EventBus, EventListener, ListenerId, ListenerStats};
pub use listeners::{
    setup_default_listeners, DefaultListenerOptions, HistoryRecordingListener, LoggingListener,
};
pub use types::{EventFilter, StorageEvent, StorageEventType};
