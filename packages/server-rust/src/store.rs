//! Per-instance wiring of backends, cache, event bus and managers.
//!
//! Each `LocaleStore` owns its own state; two stores never share a cache,
//! listener set or event history.

use std::sync::Arc;

use locale_store_core::{ClockSource, Locale};
use tracing::info;

use crate::config::StoreConfig;
use crate::events::{setup_default_listeners, DefaultListenerOptions, EventBus, ListenerId};
use crate::history::{HistoryCache, HistoryManager};
use crate::preference::PreferenceManager;
use crate::reconcile::ConsistencyChecker;
use crate::storage::{BackendError, CookieStore, LocalStore};

pub struct LocaleStore {
    config: StoreConfig,
    local: Arc<LocalStore>,
    cookie: Arc<CookieStore>,
    events: Arc<EventBus>,
    history: Arc<HistoryManager>,
    preferences: PreferenceManager,
    checker: ConsistencyChecker,
    default_listeners: Vec<ListenerId>,
}

impl LocaleStore {
    /// Builds a store with the default listeners installed.
    ///
    /// # Errors
    ///
    /// Fails if `config.local.persist_path` is set and the snapshot there
    /// cannot be read.
    pub fn new(config: StoreConfig, clock: Arc<dyn ClockSource>) -> Result<Self, BackendError> {
        Self::with_listeners(config, clock, DefaultListenerOptions::default())
    }

    /// Builds a store, installing only the listeners `options` enables.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn with_listeners(
        config: StoreConfig,
        clock: Arc<dyn ClockSource>,
        options: DefaultListenerOptions,
    ) -> Result<Self, BackendError> {
        let local = Arc::new(match &config.local.persist_path {
            Some(path) => LocalStore::open(path, config.local.clone())?,
            None => LocalStore::new(config.local.clone()),
        });
        let cookie = Arc::new(CookieStore::new(config.cookie.clone()));
        let events = Arc::new(EventBus::new(config.events.history_limit));

        let cache = Arc::new(HistoryCache::new(config.history.cache_ttl, Arc::clone(&clock)));
        let history = Arc::new(
            HistoryManager::new(
                local.clone(),
                cache,
                Arc::clone(&clock),
                config.history.clone(),
            )
            .with_events(Arc::clone(&events)),
        );
        let preferences = PreferenceManager::new(
            local.clone(),
            cookie.clone(),
            Arc::clone(&events),
            Arc::clone(&clock),
            config.default_locale,
        );
        let checker = ConsistencyChecker::new(
            local.clone(),
            cookie.clone(),
            Arc::clone(&clock),
            config.reconcile.clone(),
        )
        .with_events(Arc::clone(&events));

        let default_listeners = setup_default_listeners(&events, &history, options);
        info!(
            listeners = default_listeners.len(),
            persisted = config.local.persist_path.is_some(),
            "locale store ready"
        );

        Ok(Self {
            config,
            local,
            cookie,
            events,
            history,
            preferences,
            checker,
            default_listeners,
        })
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn preferences(&self) -> &PreferenceManager {
        &self.preferences
    }

    #[must_use]
    pub fn history(&self) -> &Arc<HistoryManager> {
        &self.history
    }

    #[must_use]
    pub fn checker(&self) -> &ConsistencyChecker {
        &self.checker
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    #[must_use]
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    #[must_use]
    pub fn cookie(&self) -> &Arc<CookieStore> {
        &self.cookie
    }

    #[must_use]
    pub fn default_listeners(&self) -> &[ListenerId] {
        &self.default_listeners
    }

    /// Override, else preference, else the configured default.
    #[must_use]
    pub fn effective_locale(&self) -> Locale {
        self.preferences.get_effective_locale()
    }

    /// Detaches every listener and drops the event history.
    pub fn shutdown(&self) {
        self.events.cleanup_event_system();
        info!("locale store shut down");
    }
}
