//! Registry of persisted storage keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One logical record persisted by the locale store.
///
/// The same key names the record in both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageKey {
    /// The user's current [`PreferenceRecord`](crate::PreferenceRecord).
    LocalePreference,
    /// The [`LocaleDetectionHistory`](crate::LocaleDetectionHistory) aggregate.
    LocaleDetectionHistory,
    /// An explicit locale chosen by the user, stored as a bare locale code.
    UserLocaleOverride,
}

impl StorageKey {
    /// Every key the store knows about.
    pub const ALL: [StorageKey; 3] = [
        StorageKey::LocalePreference,
        StorageKey::LocaleDetectionHistory,
        StorageKey::UserLocaleOverride,
    ];

    /// Physical name used by both backends (cookie name / local-store key).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::LocalePreference => "locale_preference",
            StorageKey::LocaleDetectionHistory => "locale_detection_history",
            StorageKey::UserLocaleOverride => "user_locale_override",
        }
    }

    /// Whether the key is written to the cookie backend as well as the local one.
    ///
    /// Detection history is local-only: it routinely exceeds cookie size limits.
    #[must_use]
    pub fn is_cookie_mirrored(self) -> bool {
        !matches!(self, StorageKey::LocaleDetectionHistory)
    }

    /// Keys that exist in both backends and are subject to reconciliation.
    pub fn mirrored() -> impl Iterator<Item = StorageKey> {
        Self::ALL.into_iter().filter(|k| k.is_cookie_mirrored())
    }

    /// Looks a key up by its physical name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<StorageKey> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
