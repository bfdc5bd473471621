//! Structural validation of stored records.
//!
//! Stored JSON is untrusted: it may come from an older client, a hand-edited
//! cookie, or a partially written file. Each `parse_*` function turns a
//! [`serde_json::Value`] into a typed record or explains why it cannot. The
//! `validate_*` wrappers expose the same rules as plain booleans.
//!
//! All functions are pure; `now` is passed in so future-dated timestamps can
//! be rejected deterministically.

use serde_json::{Map, Value};

use crate::locale::{Locale, UnsupportedLocale};
use crate::record::{DetectionRecord, LocaleDetectionHistory, PreferenceRecord};

/// Why a candidate record was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error(transparent)]
    UnsupportedLocale(#[from] UnsupportedLocale),
    #[error("timestamp {timestamp} is outside [0, {now}]")]
    TimestampOutOfRange { timestamp: f64, now: u64 },
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
    #[error("record {index}: {reason}")]
    InvalidEntry {
        index: usize,
        reason: Box<ValidationError>,
    },
}

fn as_object(candidate: &Value) -> Result<&Map<String, Value>, ValidationError> {
    candidate.as_object().ok_or(ValidationError::NotAnObject)
}

fn required<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a Value, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(value) => Ok(value),
    }
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, ValidationError> {
    required(obj, field)?.as_str().ok_or(ValidationError::WrongType {
        field,
        expected: "a string",
    })
}

fn required_number(obj: &Map<String, Value>, field: &'static str) -> Result<f64, ValidationError> {
    required(obj, field)?.as_f64().ok_or(ValidationError::WrongType {
        field,
        expected: "a number",
    })
}

// Timestamps are JSON numbers; fractional milliseconds are truncated after
// the range check.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn checked_timestamp(timestamp: f64, now: u64) -> Result<u64, ValidationError> {
    if timestamp.is_finite() && timestamp >= 0.0 && timestamp <= now as f64 {
        Ok(timestamp as u64)
    } else {
        Err(ValidationError::TimestampOutOfRange { timestamp, now })
    }
}

fn checked_confidence(confidence: f64) -> Result<f64, ValidationError> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(ValidationError::ConfidenceOutOfRange(confidence))
    }
}

fn parse_locale(obj: &Map<String, Value>) -> Result<Locale, ValidationError> {
    Ok(required_str(obj, "locale")?.parse::<Locale>()?)
}

/// Parses a [`PreferenceRecord`], enforcing every field rule.
///
/// # Errors
///
/// Returns the first rule the candidate violates.
pub fn parse_preference(candidate: &Value, now: u64) -> Result<PreferenceRecord, ValidationError> {
    let obj = as_object(candidate)?;
    let locale = parse_locale(obj)?;
    let source = required_str(obj, "source")?.to_string();
    let timestamp = checked_timestamp(required_number(obj, "timestamp")?, now)?;
    let confidence = checked_confidence(required_number(obj, "confidence")?)?;
    Ok(PreferenceRecord {
        locale,
        source,
        timestamp,
        confidence,
    })
}

/// Parses one [`DetectionRecord`]: the preference rules plus optional metadata.
///
/// # Errors
///
/// Returns the first rule the candidate violates.
pub fn parse_detection(candidate: &Value, now: u64) -> Result<DetectionRecord, ValidationError> {
    let base = parse_preference(candidate, now)?;
    let metadata = match candidate.get("metadata") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "metadata",
                expected: "an object",
            })
        }
    };
    Ok(DetectionRecord {
        locale: base.locale,
        source: base.source,
        timestamp: base.timestamp,
        confidence: base.confidence,
        metadata,
    })
}

/// Parses a [`LocaleDetectionHistory`].
///
/// The record list may be named `history` or `detections`. Every element is
/// validated independently; the first invalid element rejects the whole
/// aggregate. `totalDetections` is re-derived from the list.
///
/// # Errors
///
/// Returns the first rule the candidate violates.
pub fn parse_history(candidate: &Value, now: u64) -> Result<LocaleDetectionHistory, ValidationError> {
    let obj = as_object(candidate)?;
    let list = obj
        .get("history")
        .or_else(|| obj.get("detections"))
        .ok_or(ValidationError::MissingField("history"))?;
    let entries = list.as_array().ok_or(ValidationError::WrongType {
        field: "history",
        expected: "an array",
    })?;

    let last_updated = required_number(obj, "lastUpdated")?;
    if !last_updated.is_finite() || last_updated < 0.0 {
        return Err(ValidationError::WrongType {
            field: "lastUpdated",
            expected: "a non-negative number",
        });
    }

    let history = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            parse_detection(entry, now).map_err(|reason| ValidationError::InvalidEntry {
                index,
                reason: Box::new(reason),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let last_updated = last_updated as u64;
    let total_detections = history.len() as u64;
    Ok(LocaleDetectionHistory {
        history,
        last_updated,
        total_detections,
    })
}

/// Parses a bare locale code as stored under the override key.
///
/// # Errors
///
/// Returns [`ValidationError::UnsupportedLocale`] for unknown codes.
pub fn parse_override(raw: &str) -> Result<Locale, ValidationError> {
    Ok(raw.trim().parse::<Locale>()?)
}

/// `true` if `candidate` is a well-formed [`PreferenceRecord`].
#[must_use]
pub fn validate_preference_data(candidate: &Value, now: u64) -> bool {
    parse_preference(candidate, now).is_ok()
}

/// `true` if `candidate` is a well-formed [`LocaleDetectionHistory`].
#[must_use]
pub fn validate_history_data(candidate: &Value, now: u64) -> bool {
    parse_history(candidate, now).is_ok()
}
