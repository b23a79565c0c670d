//! Conflict detection passes.
//!
//! Three independent passes (resource, schedule, dependency) run over one
//! snapshot. A failing pass is recorded and skipped; it never aborts the
//! others. Pass output is deduplicated by fingerprint before it reaches the
//! orchestrator, keeping the most severe finding per fingerprint.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};

use crate::config::DetectionConfig;
use crate::types::{Conflict, ConflictStatus, ConflictType, Severity, Snapshot};

pub mod dependency;
pub mod resource;
pub mod schedule;

/// Per-scan inputs shared by every pass. `today` is injected rather than read
/// from the wall clock so detection output is reproducible.
#[derive(Debug, Clone)]
pub struct DetectorContext {
    pub today: NaiveDate,
    pub config: DetectionConfig,
}

impl DetectorContext {
    pub fn new(today: NaiveDate, config: DetectionConfig) -> Self {
        Self { today, config }
    }
}

/// One failed pass, with the others' findings unaffected.
#[derive(Debug, Clone)]
pub struct PassError {
    pub pass: &'static str,
    /// The conflict family the failed pass is responsible for. Reconciliation
    /// must not treat that family's open conflicts as vanished this scan.
    pub conflict_type: ConflictType,
    pub message: String,
}

/// Everything one detection run produced.
#[derive(Debug, Default)]
pub struct DetectionOutput {
    /// Deduplicated, severity-ordered findings.
    pub conflicts: Vec<Conflict>,
    pub pass_errors: Vec<PassError>,
}

type DetectorPass = fn(&Snapshot, &DetectorContext) -> Result<Vec<Conflict>, String>;

struct PassEntry {
    name: &'static str,
    conflict_type: ConflictType,
    run: DetectorPass,
}

const PASSES: &[PassEntry] = &[
    PassEntry { name: "resource", conflict_type: ConflictType::Resource, run: resource::run },
    PassEntry { name: "schedule", conflict_type: ConflictType::Schedule, run: schedule::run },
    PassEntry { name: "dependency", conflict_type: ConflictType::Dependency, run: dependency::run },
];

/// Run all passes over one snapshot.
pub fn detect(snapshot: &Snapshot, ctx: &DetectorContext) -> DetectionOutput {
    let mut output = DetectionOutput::default();
    let mut by_fingerprint: HashMap<String, Conflict> = HashMap::new();

    for pass in PASSES {
        match (pass.run)(snapshot, ctx) {
            Ok(found) => {
                for conflict in found {
                    match by_fingerprint.get_mut(&conflict.fingerprint) {
                        Some(existing) => {
                            // Same fingerprint from two checks: keep the worst
                            if conflict.severity > existing.severity {
                                *existing = conflict;
                            }
                        }
                        None => {
                            by_fingerprint.insert(conflict.fingerprint.clone(), conflict);
                        }
                    }
                }
            }
            Err(message) => {
                log::warn!("detection pass '{}' failed on board {}: {}", pass.name, snapshot.board_id, message);
                output.pass_errors.push(PassError {
                    pass: pass.name,
                    conflict_type: pass.conflict_type,
                    message,
                });
            }
        }
    }

    let mut conflicts: Vec<Conflict> = by_fingerprint.into_values().collect();
    conflicts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    output.conflicts = conflicts;
    output
}

/// Stable identity of a finding: SHA-256 over the conflict type and the
/// sorted, deduplicated set of affected task ids. Invariant across scans as
/// long as the same tasks collide the same way.
pub fn fingerprint(conflict_type: ConflictType, task_ids: &[String]) -> String {
    let mut sorted: Vec<&str> = task_ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(conflict_type.as_str().as_bytes());
    for id in sorted {
        hasher.update(b"|");
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Construct a new Active conflict with a fresh id and normalized task/user
/// lists. Shared by all passes.
pub(crate) fn new_conflict(
    board_id: &str,
    conflict_type: ConflictType,
    severity: Severity,
    mut task_ids: Vec<String>,
    mut user_ids: Vec<String>,
    summary: String,
    detail: String,
) -> Conflict {
    task_ids.sort_unstable();
    task_ids.dedup();
    user_ids.sort_unstable();
    user_ids.dedup();
    let fingerprint = fingerprint(conflict_type, &task_ids);
    let now = Utc::now().to_rfc3339();
    Conflict {
        id: format!("cf-{}", uuid::Uuid::new_v4()),
        board_id: board_id.to_string(),
        conflict_type,
        severity,
        status: ConflictStatus::Active,
        fingerprint,
        summary,
        detail,
        affected_tasks: task_ids,
        affected_users: user_ids,
        detected_at: now.clone(),
        last_seen_at: now,
        resolved_at: None,
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use crate::types::{Assignment, DependencyEdge, Priority, Snapshot, Task, TaskStatus};
    use chrono::NaiveDate;

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    pub fn task(id: &str, assignee: &str, start: Option<NaiveDate>, due: Option<NaiveDate>) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Task {id}"),
            assignees: if assignee.is_empty() { vec![] } else { vec![assignee.to_string()] },
            start,
            due,
            priority: Priority::Medium,
            complexity: 3,
            status: TaskStatus::InProgress,
            depends_on: vec![],
        }
    }

    pub fn snapshot(tasks: Vec<Task>) -> Snapshot {
        Snapshot {
            board_id: "b1".to_string(),
            taken_at: "2025-06-01T00:00:00+00:00".to_string(),
            tasks,
            assignments: vec![],
            edges: vec![],
        }
    }

    pub fn edge(pred: &str, succ: &str) -> DependencyEdge {
        DependencyEdge {
            predecessor: pred.to_string(),
            successor: succ.to_string(),
        }
    }

    pub fn assignment(user: &str, capacity: f64, task_ids: &[&str]) -> Assignment {
        Assignment {
            user_id: user.to_string(),
            capacity_hours: capacity,
            task_ids: task_ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::*;
    use super::*;
    use crate::config::DetectionConfig;

    fn ctx(today: NaiveDate) -> DetectorContext {
        DetectorContext::new(today, DetectionConfig::default())
    }

    #[test]
    fn test_fingerprint_order_independent() {
        let a = fingerprint(ConflictType::Resource, &["t2".to_string(), "t1".to_string()]);
        let b = fingerprint(ConflictType::Resource, &["t1".to_string(), "t2".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_type_and_tasks() {
        let tasks = vec!["t1".to_string(), "t2".to_string()];
        let resource = fingerprint(ConflictType::Resource, &tasks);
        let schedule = fingerprint(ConflictType::Schedule, &tasks);
        assert_ne!(resource, schedule);

        let other = fingerprint(ConflictType::Resource, &["t1".to_string(), "t3".to_string()]);
        assert_ne!(resource, other);
    }

    #[test]
    fn test_detect_is_deterministic() {
        // Two overlapping tasks for one user, one overdue task
        let mut t1 = task("t1", "u1", Some(date(2025, 6, 1)), Some(date(2025, 6, 10)));
        t1.priority = crate::types::Priority::High;
        let t2 = task("t2", "u1", Some(date(2025, 6, 5)), Some(date(2025, 6, 15)));
        let t3 = task("t3", "u2", Some(date(2025, 5, 1)), Some(date(2025, 5, 10)));
        let snap = snapshot(vec![t1, t2, t3]);
        let ctx = ctx(date(2025, 6, 8));

        let first = detect(&snap, &ctx);
        let second = detect(&snap, &ctx);

        assert!(!first.conflicts.is_empty());
        assert_eq!(first.conflicts.len(), second.conflicts.len());
        for (a, b) in first.conflicts.iter().zip(second.conflicts.iter()) {
            assert_eq!(a.fingerprint, b.fingerprint);
            assert_eq!(a.severity, b.severity);
            assert_eq!(a.conflict_type, b.conflict_type);
        }
    }

    #[test]
    fn test_detect_sorted_by_severity() {
        let t1 = task("t1", "u1", Some(date(2025, 6, 1)), Some(date(2025, 6, 10)));
        let t2 = task("t2", "u1", Some(date(2025, 6, 5)), Some(date(2025, 6, 15)));
        // Barely overdue task: Low severity
        let mut t3 = task("t3", "u2", Some(date(2025, 6, 1)), Some(date(2025, 6, 7)));
        t3.complexity = 1;
        let snap = snapshot(vec![t1, t2, t3]);

        let output = detect(&snap, &ctx(date(2025, 6, 8)));
        for pair in output.conflicts.windows(2) {
            assert!(pair[0].severity >= pair[1].severity);
        }
    }
}
