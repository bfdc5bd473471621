//! Aggregate statistics, daily trends and read-path performance for the
//! detection history.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::DateTime;
use locale_store_core::{Locale, LocaleDetectionHistory, StorageResult};
use serde::Serialize;

use super::manager::HistoryManager;

const DAY_MS: u64 = 86_400_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionStats {
    pub total_detections: usize,
    pub locale_counts: BTreeMap<Locale, usize>,
    pub source_counts: BTreeMap<String, usize>,
    pub average_confidence: f64,
    pub most_common_locale: Option<Locale>,
    pub most_common_source: Option<String>,
    pub oldest_detection: Option<u64>,
    pub newest_detection: Option<u64>,
}

/// Detections bucketed into one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTrend {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub day_start: u64,
    pub count: usize,
    pub average_confidence: f64,
    pub locale_counts: BTreeMap<Locale, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Empty,
    DominantLocale,
    DominantSource,
    Confidence,
    LocaleSwitching,
    RecentActivity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryInsight {
    pub kind: InsightKind,
    pub message: String,
}

/// Trend window used when the caller does not pick one.
pub const DEFAULT_TREND_DAYS: u32 = 7;
/// Longest trend window served.
pub const MAX_TREND_DAYS: u32 = 365;

/// Read timing counters kept by the manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadTimings {
    cache_reads: u64,
    cache_time: Duration,
    backend_reads: u64,
    backend_time: Duration,
}

impl ReadTimings {
    pub fn record_cache(&mut self, elapsed: Duration) {
        self.cache_reads += 1;
        self.cache_time += elapsed;
    }

    pub fn record_backend(&mut self, elapsed: Duration) {
        self.backend_reads += 1;
        self.backend_time += elapsed;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub cache_hits: u64,
    pub backend_reads: u64,
    pub cache_hit_rate: f64,
    pub avg_cache_read_micros: f64,
    pub avg_backend_read_micros: f64,
    pub record_count: usize,
}

#[allow(clippy::cast_precision_loss)]
fn average(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Key with the highest count; ties go to the smallest key.
fn most_common<K: Ord + Clone>(counts: &BTreeMap<K, usize>) -> Option<K> {
    counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(k, _)| k.clone())
}

#[must_use]
pub fn detection_stats(history: &LocaleDetectionHistory) -> DetectionStats {
    let mut locale_counts = BTreeMap::new();
    let mut source_counts = BTreeMap::new();
    let mut confidence_sum = 0.0;
    for record in &history.history {
        *locale_counts.entry(record.locale).or_insert(0) += 1;
        *source_counts.entry(record.source.clone()).or_insert(0) += 1;
        confidence_sum += record.confidence;
    }

    DetectionStats {
        total_detections: history.len(),
        most_common_locale: most_common(&locale_counts),
        most_common_source: most_common(&source_counts),
        locale_counts,
        source_counts,
        average_confidence: average(confidence_sum, history.len()),
        oldest_detection: history.oldest_timestamp(),
        newest_detection: history.newest_timestamp(),
    }
}

/// One bucket per UTC day for the `days` days ending today, oldest first.
/// Days without detections are included with a zero count.
#[must_use]
pub fn detection_trends(history: &LocaleDetectionHistory, days: u32, now: u64) -> Vec<DailyTrend> {
    let today_start = now - now % DAY_MS;
    (0..u64::from(days))
        .rev()
        .map(|back| {
            let day_start = today_start.saturating_sub(back * DAY_MS);
            let day_end = day_start + DAY_MS;
            let mut locale_counts = BTreeMap::new();
            let mut confidence_sum = 0.0;
            let mut count = 0;
            for record in history
                .history
                .iter()
                .filter(|r| r.timestamp >= day_start && r.timestamp < day_end)
            {
                *locale_counts.entry(record.locale).or_insert(0) += 1;
                confidence_sum += record.confidence;
                count += 1;
            }
            DailyTrend {
                date: day_label(day_start),
                day_start,
                count,
                average_confidence: average(confidence_sum, count),
                locale_counts,
            }
        })
        .collect()
}

fn day_label(day_start: u64) -> String {
    i64::try_from(day_start)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map_or_else(String::new, |dt| dt.format("%Y-%m-%d").to_string())
}

/// Plain-language observations about the history.
#[must_use]
pub fn generate_insights(history: &LocaleDetectionHistory, now: u64) -> Vec<HistoryInsight> {
    if history.is_empty() {
        return vec![HistoryInsight {
            kind: InsightKind::Empty,
            message: "No locale detections recorded yet".to_string(),
        }];
    }

    let stats = detection_stats(history);
    let total = stats.total_detections;
    let mut insights = Vec::new();

    if let Some(locale) = stats.most_common_locale {
        let count = stats.locale_counts.get(&locale).copied().unwrap_or(0);
        insights.push(HistoryInsight {
            kind: InsightKind::DominantLocale,
            message: format!(
                "Most detections resolve to {locale} ({count} of {total}, {}%)",
                count * 100 / total
            ),
        });
    }

    if let Some(source) = &stats.most_common_source {
        insights.push(HistoryInsight {
            kind: InsightKind::DominantSource,
            message: format!("Most detections come from the {source} source"),
        });
    }

    let confidence = stats.average_confidence;
    let level = if confidence >= 0.8 {
        "high"
    } else if confidence >= 0.5 {
        "moderate"
    } else {
        "low"
    };
    insights.push(HistoryInsight {
        kind: InsightKind::Confidence,
        message: format!("Average detection confidence is {level} ({confidence:.2})"),
    });

    let switches = history
        .history
        .windows(2)
        .filter(|pair| pair[0].locale != pair[1].locale)
        .count();
    if switches > 0 {
        insights.push(HistoryInsight {
            kind: InsightKind::LocaleSwitching,
            message: format!("Detected locale changed {switches} times"),
        });
    }

    let last_day = history
        .history
        .iter()
        .filter(|r| now.saturating_sub(r.timestamp) < DAY_MS)
        .count();
    insights.push(HistoryInsight {
        kind: InsightKind::RecentActivity,
        message: format!("{last_day} detections in the last 24 hours"),
    });

    insights
}

impl HistoryManager {
    pub fn get_detection_stats(&self) -> StorageResult<DetectionStats> {
        self.with_history("get_detection_stats", detection_stats)
    }

    /// Daily buckets for the last `days` days, clamped to
    /// `1..=MAX_TREND_DAYS`.
    pub fn get_detection_trends(&self, days: u32) -> StorageResult<Vec<DailyTrend>> {
        let days = days.clamp(1, MAX_TREND_DAYS);
        let now = self.now();
        self.with_history("get_detection_trends", |h| detection_trends(h, days, now))
    }

    pub fn get_history_insights(&self) -> StorageResult<Vec<HistoryInsight>> {
        let now = self.now();
        self.with_history("get_history_insights", |h| generate_insights(h, now))
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn get_performance_metrics(&self) -> StorageResult<PerformanceMetrics> {
        let record_count = match self.load() {
            Ok((history, _)) => history.len(),
            Err(e) => return self.conclude("get_performance_metrics", Err(e)),
        };
        let timings = *self.timings.lock();
        let reads = timings.cache_reads + timings.backend_reads;
        let metrics = PerformanceMetrics {
            cache_hits: timings.cache_reads,
            backend_reads: timings.backend_reads,
            cache_hit_rate: if reads == 0 {
                0.0
            } else {
                timings.cache_reads as f64 / reads as f64
            },
            avg_cache_read_micros: average(
                timings.cache_time.as_secs_f64() * 1e6,
                usize::try_from(timings.cache_reads).unwrap_or(usize::MAX),
            ),
            avg_backend_read_micros: average(
                timings.backend_time.as_secs_f64() * 1e6,
                usize::try_from(timings.backend_reads).unwrap_or(usize::MAX),
            ),
            record_count,
        };
        StorageResult::ok(metrics, self.now())
    }
}

#[cfg(test)]
mod tests {
    use locale_store_core::DetectionRecord;

    use super::*;
    use crate::history::manager::tests::{add, fixture};

    // 2023-11-14T22:13:20Z
    const NOW: u64 = 1_700_000_000_000;

    fn history(records: &[(Locale, &str, u64, f64)]) -> LocaleDetectionHistory {
        let mut h = LocaleDetectionHistory::empty(NOW);
        h.history = records
            .iter()
            .map(|&(locale, source, timestamp, confidence)| DetectionRecord {
                locale,
                source: source.to_string(),
                timestamp,
                confidence,
                metadata: None,
            })
            .collect();
        h.touch(NOW);
        h
    }

    #[test]
    fn stats_count_and_average() {
        let h = history(&[
            (Locale::Zh, "user", NOW, 1.0),
            (Locale::En, "browser", NOW - 1, 0.5),
            (Locale::Zh, "browser", NOW - 2, 0.0),
        ]);
        let stats = detection_stats(&h);
        assert_eq!(stats.total_detections, 3);
        assert_eq!(stats.locale_counts[&Locale::Zh], 2);
        assert_eq!(stats.most_common_locale, Some(Locale::Zh));
        assert_eq!(stats.most_common_source.as_deref(), Some("browser"));
        assert!((stats.average_confidence - 0.5).abs() < 1e-9);
        assert_eq!(stats.oldest_detection, Some(NOW - 2));
        assert_eq!(stats.newest_detection, Some(NOW));
    }

    #[test]
    fn stats_on_empty_history() {
        let stats = detection_stats(&LocaleDetectionHistory::empty(NOW));
        assert_eq!(stats.total_detections, 0);
        assert!(stats.most_common_locale.is_none());
        assert!(stats.average_confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn most_common_breaks_ties_by_smallest_key() {
        let h = history(&[(Locale::Zh, "b", NOW, 1.0), (Locale::En, "a", NOW, 1.0)]);
        let stats = detection_stats(&h);
        assert_eq!(stats.most_common_locale, Some(Locale::En));
        assert_eq!(stats.most_common_source.as_deref(), Some("a"));
    }

    #[test]
    fn trends_bucket_by_utc_day() {
        let h = history(&[
            (Locale::Zh, "user", NOW, 1.0),
            (Locale::En, "user", NOW - DAY_MS, 0.5),
            (Locale::En, "user", NOW - DAY_MS - 1, 0.7),
            (Locale::En, "user", NOW - 10 * DAY_MS, 0.7),
        ]);
        let trends = detection_trends(&h, 3, NOW);

        assert_eq!(trends.len(), 3);
        assert_eq!(trends[2].date, "2023-11-14");
        assert_eq!(trends[1].date, "2023-11-13");
        assert_eq!(trends[0].date, "2023-11-12");
        assert_eq!(trends[2].count, 1);
        assert_eq!(trends[1].count, 2);
        assert!((trends[1].average_confidence - 0.6).abs() < 1e-9);
        assert_eq!(trends[0].count, 0);
        assert!(trends.windows(2).all(|w| w[1].day_start - w[0].day_start == DAY_MS));
    }

    #[test]
    fn insights_for_empty_history() {
        let insights = generate_insights(&LocaleDetectionHistory::empty(NOW), NOW);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].kind, InsightKind::Empty);
    }

    #[test]
    fn insights_mention_switching_and_confidence() {
        let h = history(&[
            (Locale::Zh, "user", NOW, 0.9),
            (Locale::En, "browser", NOW - 1, 0.9),
            (Locale::Zh, "user", NOW - 2 * DAY_MS, 0.9),
        ]);
        let insights = generate_insights(&h, NOW);
        let kinds: Vec<_> = insights.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&InsightKind::LocaleSwitching));

        let confidence = insights
            .iter()
            .find(|i| i.kind == InsightKind::Confidence)
            .unwrap();
        assert!(confidence.message.contains("high"));

        let activity = insights
            .iter()
            .find(|i| i.kind == InsightKind::RecentActivity)
            .unwrap();
        assert_eq!(activity.message, "2 detections in the last 24 hours");
    }

    #[test]
    fn performance_metrics_track_cache_and_backend_reads() {
        let f = fixture();
        add(&f, Locale::En, "a", 0.5);
        f.manager.get_detection_history();
        f.manager.get_detection_history();

        let metrics = f.manager.get_performance_metrics().data.unwrap();
        assert!(metrics.backend_reads >= 1);
        assert!(metrics.cache_hits >= 1);
        assert!(metrics.cache_hit_rate > 0.0 && metrics.cache_hit_rate < 1.0);
        assert_eq!(metrics.record_count, 1);
    }

    #[test]
    fn performance_metrics_count_records_without_cache() {
        let f = fixture();
        add(&f, Locale::En, "a", 0.5);
        add(&f, Locale::Zh, "b", 0.5);
        f.manager.cache().clear_cache();

        let metrics = f.manager.get_performance_metrics().data.unwrap();
        assert_eq!(metrics.record_count, 2);
    }

    #[test]
    fn trend_window_is_clamped() {
        let f = fixture();
        assert_eq!(f.manager.get_detection_trends(0).data.unwrap().len(), 1);
        assert_eq!(
            f.manager.get_detection_trends(1000).data.unwrap().len(),
            MAX_TREND_DAYS as usize
        );
    }

    #[test]
    fn manager_stats_and_trends() {
        let f = fixture();
        add(&f, Locale::Zh, "user", 1.0);
        add(&f, Locale::Zh, "geo", 0.5);

        let stats = f.manager.get_detection_stats().data.unwrap();
        assert_eq!(stats.total_detections, 2);

        let trends = f.manager.get_detection_trends(7).data.unwrap();
        assert_eq!(trends.len(), 7);
        assert_eq!(trends.iter().map(|t| t.count).sum::<usize>(), 2);

        assert!(!f.manager.get_history_insights().data.unwrap().is_empty());
    }
}
