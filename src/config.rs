//! Engine configuration.
//!
//! Every numeric threshold the detector, suggester, learner, and orchestrator
//! use lives here with its default, so deployments can tune sensitivity
//! without code changes. All sections deserialize with defaults, so a partial
//! config file is valid.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub detection: DetectionConfig,
    pub suggestion: SuggestionConfig,
    pub learning: LearningConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    /// Minimum overlapping tasks per user before a resource conflict fires.
    pub overlap_task_threshold: usize,
    /// Estimated effort hours per complexity point, for capacity checks.
    pub effort_hours_per_complexity: f64,
    /// Capacity assumed for users with no assignment record.
    pub default_capacity_hours: f64,
    /// Days overdue at which severity steps up to Medium / High / Critical.
    pub overdue_medium_days: i64,
    pub overdue_high_days: i64,
    pub overdue_critical_days: i64,
    /// Working days a single complexity point is expected to take.
    pub days_per_complexity_point: f64,
    /// Window width for the deadline-convergence check.
    pub convergence_window_days: i64,
    /// Minimum high-priority tasks inside the window to flag convergence.
    pub convergence_min_tasks: usize,
    /// Slack granted to a blocked successor before its due date is at risk.
    pub blocked_buffer_days: i64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            overlap_task_threshold: 2,
            effort_hours_per_complexity: 4.0,
            default_capacity_hours: 40.0,
            overdue_medium_days: 3,
            overdue_high_days: 7,
            overdue_critical_days: 14,
            days_per_complexity_point: 1.5,
            convergence_window_days: 3,
            convergence_min_tasks: 3,
            blocked_buffer_days: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SuggestionConfig {
    /// Maximum candidates kept per conflict after ranking.
    pub max_candidates: usize,
    /// Confidence assigned to the manual-review fallback.
    pub fallback_confidence: u8,
    /// Users with fewer active tasks than this count as reassignment targets.
    pub spare_task_threshold: usize,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            fallback_confidence: 30,
            spare_task_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LearningConfig {
    /// Ratings at or above this count as a successful outcome.
    pub success_threshold: u8,
    /// Sample count at which a pattern's adjustment reaches full weight.
    pub maturity_samples: u64,
    /// Minimum board-scoped samples before board data outranks global.
    pub board_min_samples: u64,
    /// Absolute bound on the learned confidence adjustment.
    pub max_adjustment: i8,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            success_threshold: 4,
            maturity_samples: 5,
            board_min_samples: 3,
            max_adjustment: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    /// Seconds between scheduled full-cycle scans.
    pub interval_secs: u64,
    /// Per-board wall-clock budget; a slow board must not stall the cycle.
    pub board_timeout_secs: u64,
    /// Closed conflicts older than this are purged by the retention sweep.
    pub retention_days: i64,
    /// Hours between retention sweeps.
    pub retention_sweep_hours: i64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            board_timeout_secs: 30,
            retention_days: 90,
            retention_sweep_hours: 24,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.detection.overlap_task_threshold, 2);
        assert_eq!(cfg.learning.maturity_samples, 5);
        assert_eq!(cfg.scan.interval_secs, 3600);
        assert_eq!(cfg.suggestion.fallback_confidence, 30);
    }

    #[test]
    fn test_partial_config_deserializes() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"scan": {"intervalSecs": 60}}"#).unwrap();
        assert_eq!(cfg.scan.interval_secs, 60);
        assert_eq!(cfg.scan.retention_days, 90);
        assert_eq!(cfg.detection.convergence_min_tasks, 3);
    }
}
