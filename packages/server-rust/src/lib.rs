//! Locale Store Server — dual-backend locale preference storage, detection
//! history, storage events, cross-backend reconciliation, and an HTTP surface.

pub mod config;
pub mod events;
pub mod history;
pub mod network;
pub mod preference;
pub mod reconcile;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use config::StoreConfig;
pub use events::{EventBus, StorageEvent, StorageEventType};
pub use history::HistoryManager;
pub use preference::PreferenceManager;
pub use reconcile::ConsistencyChecker;
pub use store::LocaleStore;
