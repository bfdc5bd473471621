//! Detection history: TTL cache, manager, maintenance, queries and
//! statistics.

pub mod cache;
pub mod maintenance;
pub mod manager;
pub mod query;
pub mod scheduler;
pub mod stats;

pub use cache::{CacheStatus, HistoryCache};
pub use maintenance::{HistoryBackup, MaintenanceReport, BACKUP_VERSION};
pub use manager::{CleanupAdvice, HistoryError, HistoryManager, HistorySummary, NewDetection};
pub use query::DetectionQuery;
pub use scheduler::{start_maintenance, MaintenanceRunnable, MaintenanceTask};
pub use stats::{
    DailyTrend, DetectionStats, HistoryInsight, InsightKind, PerformanceMetrics,
    DEFAULT_TREND_DAYS, MAX_TREND_DAYS,
};
