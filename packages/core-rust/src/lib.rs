//! Locale Store Core — locale vocabulary, persisted record types, validation,
//! result envelope, injectable clock, and webhook signature helpers.
//!
//! Nothing in this crate performs I/O.

pub mod clock;
pub mod keys;
pub mod locale;
pub mod record;
pub mod result;
pub mod validation;
pub mod webhook;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use keys::StorageKey;
pub use locale::{is_supported, resolve_locale, Locale, UnsupportedLocale, DEFAULT_LOCALE};
pub use record::{
    clamp_confidence, DetectionRecord, LocaleDetectionHistory, PreferenceRecord,
    DEFAULT_MAX_HISTORY_RECORDS,
};
pub use result::{DataSource, StorageResult};
pub use validation::{
    parse_detection, parse_history, parse_override, parse_preference, validate_history_data,
    validate_preference_data, ValidationError,
};
