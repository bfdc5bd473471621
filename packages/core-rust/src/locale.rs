//! Supported locales and effective-locale resolution.
//!
//! [`Locale`] is a closed enum: any string that does not parse into one of
//! its variants is rejected at the boundary, so no lookup downstream ever
//! indexes by an arbitrary user-supplied string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A locale the application ships translations for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    /// English.
    En,
    /// Chinese.
    Zh,
}

/// Locale used when neither an override nor a stored preference exists.
pub const DEFAULT_LOCALE: Locale = Locale::En;

impl Locale {
    /// Every supported locale, in display order.
    pub const ALL: [Locale; 2] = [Locale::En, Locale::Zh];

    /// Returns the BCP 47 language code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Zh => "zh",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a supported locale code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported locale: {0:?}")]
pub struct UnsupportedLocale(pub String);

impl FromStr for Locale {
    type Err = UnsupportedLocale;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Locale::En),
            "zh" => Ok(Locale::Zh),
            other => Err(UnsupportedLocale(other.to_string())),
        }
    }
}

/// Returns `true` if `code` names a supported locale.
#[must_use]
pub fn is_supported(code: &str) -> bool {
    code.parse::<Locale>().is_ok()
}

/// Resolve the effective locale.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit user override
/// 2. Stored preference
/// 3. Configured default
#[must_use]
pub fn resolve_locale(
    user_override: Option<Locale>,
    preference: Option<Locale>,
    default: Locale,
) -> Locale {
    user_override.or(preference).unwrap_or(default)
}
