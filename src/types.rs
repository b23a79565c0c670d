//! Core domain types for the conflict engine.
//!
//! Conflict and resolution kinds are closed enums with string codes for the
//! database layer, so adding a kind is a compile-time-checked exercise rather
//! than a runtime string comparison.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Snapshot input model
// ---------------------------------------------------------------------------

/// Task priority as reported by the task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// High and Critical both count as "high priority" for convergence checks.
    pub fn is_high(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// Task workflow status as reported by the task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Terminal tasks are invisible to every detection pass.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

/// One task in a board snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub assignees: Vec<String>,
    /// Scheduled start date; None for not-yet-scheduled tasks.
    pub start: Option<NaiveDate>,
    /// Due date; None for not-yet-scheduled tasks.
    pub due: Option<NaiveDate>,
    pub priority: Priority,
    /// Complexity score from the task store (1 trivial .. 10 very complex).
    pub complexity: u8,
    pub status: TaskStatus,
    /// Predecessor task ids this task depends on.
    pub depends_on: Vec<String>,
}

impl Task {
    /// The scheduled [start, due] interval, when both ends exist and are ordered.
    pub fn interval(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.start, self.due) {
            (Some(start), Some(due)) if start <= due => Some((start, due)),
            _ => None,
        }
    }

    /// Calendar days covered by the scheduled interval (inclusive), if any.
    pub fn duration_days(&self) -> Option<i64> {
        self.interval().map(|(start, due)| (due - start).num_days() + 1)
    }
}

/// One user's capacity and workload in a board snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub user_id: String,
    /// Working capacity in hours for the planning window.
    pub capacity_hours: f64,
    pub task_ids: Vec<String>,
}

/// A directed dependency edge: `successor` waits on `predecessor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub predecessor: String,
    pub successor: String,
}

/// Immutable, scan-scoped view of one board.
///
/// Built once per scan by the snapshot reader and passed by reference through
/// detection and suggestion; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub board_id: String,
    /// RFC3339 capture timestamp.
    pub taken_at: String,
    pub tasks: Vec<Task>,
    pub assignments: Vec<Assignment>,
    pub edges: Vec<DependencyEdge>,
}

impl Snapshot {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn assignment(&self, user_id: &str) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.user_id == user_id)
    }

    /// Non-terminal tasks assigned to the given user.
    pub fn active_tasks_for(&self, user_id: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| !t.status.is_terminal() && t.assignees.iter().any(|a| a == user_id))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// The three conflict families the detector emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Resource,
    Schedule,
    Dependency,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Schedule => "schedule",
            Self::Dependency => "dependency",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "resource" => Some(Self::Resource),
            "schedule" => Some(Self::Schedule),
            "dependency" => Some(Self::Dependency),
            _ => None,
        }
    }
}

/// Ordinal severity, monotonic in the magnitude of the underlying violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Raise one level, saturating at Critical.
    pub fn raised(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

/// Conflict lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Active,
    Acknowledged,
    Resolved,
    Ignored,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Ignored => "ignored",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "active" => Some(Self::Active),
            "acknowledged" => Some(Self::Acknowledged),
            "resolved" => Some(Self::Resolved),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }

    /// Open conflicts participate in fingerprint dedup and self-resolution.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::Acknowledged)
    }
}

/// A detected resource/schedule/dependency problem on a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub board_id: String,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub status: ConflictStatus,
    /// Stable hash of type + sorted affected task ids; dedup key across scans.
    pub fingerprint: String,
    pub summary: String,
    pub detail: String,
    /// Sorted, deduplicated task ids.
    pub affected_tasks: Vec<String>,
    pub affected_users: Vec<String>,
    pub detected_at: String,
    pub last_seen_at: String,
    /// Set when the conflict leaves the open state (resolved or ignored).
    pub resolved_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolutions
// ---------------------------------------------------------------------------

/// The closed menu of remedy families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    Reassign,
    Reschedule,
    AdjustDates,
    AddResources,
    SplitTask,
    ReduceScope,
    ModifyDependency,
    /// Generic fallback when no heuristic applies to the conflict.
    ManualReview,
}

impl ResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reassign => "reassign",
            Self::Reschedule => "reschedule",
            Self::AdjustDates => "adjust_dates",
            Self::AddResources => "add_resources",
            Self::SplitTask => "split_task",
            Self::ReduceScope => "reduce_scope",
            Self::ModifyDependency => "modify_dependency",
            Self::ManualReview => "manual_review",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "reassign" => Some(Self::Reassign),
            "reschedule" => Some(Self::Reschedule),
            "adjust_dates" => Some(Self::AdjustDates),
            "add_resources" => Some(Self::AddResources),
            "split_task" => Some(Self::SplitTask),
            "reduce_scope" => Some(Self::ReduceScope),
            "modify_dependency" => Some(Self::ModifyDependency),
            "manual_review" => Some(Self::ManualReview),
            _ => None,
        }
    }

    /// Fixed tie-break order: lowest-disruption remedies first.
    pub fn priority_rank(&self) -> u8 {
        match self {
            Self::Reassign => 0,
            Self::Reschedule => 1,
            Self::AdjustDates => 2,
            Self::AddResources => 3,
            Self::SplitTask => 4,
            Self::ReduceScope => 5,
            Self::ModifyDependency => 6,
            Self::ManualReview => 7,
        }
    }
}

/// A candidate remedy for one conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub id: String,
    pub conflict_id: String,
    pub resolution_type: ResolutionType,
    /// Human-readable implementation steps, in order.
    pub steps: Vec<String>,
    pub impact_summary: String,
    /// Numeric impact estimate in calendar days, where one applies.
    pub impact_days: Option<f64>,
    /// Rule-heuristic confidence, 0-100.
    pub base_confidence: u8,
    /// Learned delta from the pattern learner, bounded to +/-50.
    pub learned_adjustment: i8,
    /// clamp(base + adjustment, 0, 100).
    pub final_confidence: u8,
    pub times_suggested: u32,
    pub times_accepted: u32,
    /// Superseded rows are kept for history; the live set excludes them.
    pub superseded: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Learning
// ---------------------------------------------------------------------------

/// Granularity at which a pattern is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatternScope {
    Global,
    Board(String),
}

impl PatternScope {
    /// Database code: the literal "global" or the board id.
    pub fn as_code(&self) -> &str {
        match self {
            Self::Global => "global",
            Self::Board(id) => id,
        }
    }

    pub fn from_code(code: &str) -> Self {
        if code == "global" {
            Self::Global
        } else {
            Self::Board(code.to_string())
        }
    }
}

/// Aggregate learning key: how often a (conflict, resolution) pairing worked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey {
    pub conflict_type: ConflictType,
    pub resolution_type: ResolutionType,
    pub scope: PatternScope,
}

/// One recorded outcome for an applied resolution. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    pub id: String,
    pub conflict_id: String,
    pub resolution_id: String,
    /// Discrete effectiveness rating, 1-5.
    pub rating: u8,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::Critical.raised(), Severity::Critical);
    }

    #[test]
    fn test_status_openness() {
        assert!(ConflictStatus::Active.is_open());
        assert!(ConflictStatus::Acknowledged.is_open());
        assert!(!ConflictStatus::Resolved.is_open());
        assert!(!ConflictStatus::Ignored.is_open());
    }

    #[test]
    fn test_task_interval_requires_both_ends() {
        let mut task = Task {
            id: "t1".to_string(),
            title: "Task".to_string(),
            assignees: vec![],
            start: Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            due: None,
            priority: Priority::Medium,
            complexity: 3,
            status: TaskStatus::Todo,
            depends_on: vec![],
        };
        assert!(task.interval().is_none());

        task.due = Some(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert!(task.interval().is_some());
        assert_eq!(task.duration_days(), Some(5));
    }

    #[test]
    fn test_enum_codes_round_trip() {
        for ct in [ConflictType::Resource, ConflictType::Schedule, ConflictType::Dependency] {
            assert_eq!(ConflictType::from_code(ct.as_str()), Some(ct));
        }
        for rt in [
            ResolutionType::Reassign,
            ResolutionType::Reschedule,
            ResolutionType::AdjustDates,
            ResolutionType::AddResources,
            ResolutionType::SplitTask,
            ResolutionType::ReduceScope,
            ResolutionType::ModifyDependency,
            ResolutionType::ManualReview,
        ] {
            assert_eq!(ResolutionType::from_code(rt.as_str()), Some(rt));
        }
    }

    #[test]
    fn test_pattern_scope_codes() {
        assert_eq!(PatternScope::Global.as_code(), "global");
        assert_eq!(PatternScope::from_code("global"), PatternScope::Global);
        assert_eq!(
            PatternScope::from_code("board-7"),
            PatternScope::Board("board-7".to_string())
        );
    }
}
