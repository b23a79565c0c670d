//! Resource pass: assignment overlaps and capacity overload per user.
//!
//! Overlap clustering is transitive: tasks chain into one cluster through
//! pairwise overlaps, so A and C land together when both overlap B even if
//! they never share a day. The cluster is the unit the user experiences as
//! one scheduling problem, at the cost that a date shift at a chain's edge
//! changes the whole cluster's membership and therefore its fingerprint.

use std::collections::BTreeMap;

use crate::types::{Conflict, ConflictType, Severity, Snapshot, Task};

use super::{new_conflict, DetectorContext};

pub(crate) fn run(snapshot: &Snapshot, ctx: &DetectorContext) -> Result<Vec<Conflict>, String> {
    let mut conflicts = Vec::new();
    conflicts.extend(detect_overlaps(snapshot, ctx));
    conflicts.extend(detect_overload(snapshot, ctx));
    Ok(conflicts)
}

/// Cluster each user's scheduled tasks by transitive interval overlap and
/// flag clusters at or above the configured size. Tasks missing either date
/// never enter a cluster.
fn detect_overlaps(snapshot: &Snapshot, ctx: &DetectorContext) -> Vec<Conflict> {
    // BTreeMap keeps user iteration deterministic
    let mut by_user: BTreeMap<&str, Vec<&Task>> = BTreeMap::new();
    for task in &snapshot.tasks {
        if task.status.is_terminal() || task.interval().is_none() {
            continue;
        }
        for user in &task.assignees {
            by_user.entry(user.as_str()).or_default().push(task);
        }
    }

    let mut conflicts = Vec::new();
    for (user, mut tasks) in by_user {
        tasks.sort_by(|a, b| a.interval().cmp(&b.interval()).then_with(|| a.id.cmp(&b.id)));

        let mut cluster: Vec<&Task> = Vec::new();
        let mut cluster_end = None;
        for task in tasks {
            let (start, due) = match task.interval() {
                Some(iv) => iv,
                None => continue,
            };
            match cluster_end {
                // Inclusive intervals: starting on the current end day overlaps
                Some(end) if start <= end => {
                    cluster.push(task);
                    if due > end {
                        cluster_end = Some(due);
                    }
                }
                _ => {
                    flush_cluster(snapshot, ctx, user, &cluster, &mut conflicts);
                    cluster = vec![task];
                    cluster_end = Some(due);
                }
            }
        }
        flush_cluster(snapshot, ctx, user, &cluster, &mut conflicts);
    }
    conflicts
}

fn flush_cluster(
    snapshot: &Snapshot,
    ctx: &DetectorContext,
    user: &str,
    cluster: &[&Task],
    conflicts: &mut Vec<Conflict>,
) {
    if cluster.len() < ctx.config.overlap_task_threshold {
        return;
    }
    let severity = cluster_severity(cluster);
    let ids: Vec<String> = cluster.iter().map(|t| t.id.clone()).collect();
    let titles: Vec<&str> = cluster.iter().map(|t| t.title.as_str()).collect();
    let summary = format!("{user} has {} overlapping scheduled tasks", cluster.len());
    let detail = format!(
        "Tasks {} overlap on {}'s schedule between {} and {}",
        titles.join(", "),
        user,
        cluster.iter().filter_map(|t| t.start).min().map(|d| d.to_string()).unwrap_or_default(),
        cluster.iter().filter_map(|t| t.due).max().map(|d| d.to_string()).unwrap_or_default(),
    );
    conflicts.push(new_conflict(
        &snapshot.board_id,
        ConflictType::Resource,
        severity,
        ids,
        vec![user.to_string()],
        summary,
        detail,
    ));
}

/// Cluster size drives the base severity; it never goes down as the cluster
/// grows. A two-task cluster escalates when the overlap covers more than half
/// of the shorter task, and three or more high-priority tasks force Critical.
fn cluster_severity(cluster: &[&Task]) -> Severity {
    let mut severity = match cluster.len() {
        0 | 1 => Severity::Low,
        2 => Severity::Medium,
        3 => Severity::High,
        _ => Severity::Critical,
    };

    if cluster.len() == 2 && overlap_fraction(cluster[0], cluster[1]) > 0.5 {
        severity = severity.raised();
    }

    let high_priority = cluster.iter().filter(|t| t.priority.is_high()).count();
    if high_priority >= 3 {
        severity = Severity::Critical;
    }
    severity
}

/// Overlap window as a fraction of the shorter task's duration (both in
/// inclusive calendar days).
fn overlap_fraction(a: &Task, b: &Task) -> f64 {
    let ((a_start, a_due), (b_start, b_due)) = match (a.interval(), b.interval()) {
        (Some(x), Some(y)) => (x, y),
        _ => return 0.0,
    };
    let start = a_start.max(b_start);
    let end = a_due.min(b_due);
    if start > end {
        return 0.0;
    }
    let overlap_days = (end - start).num_days() + 1;
    let shorter = ((a_due - a_start).num_days() + 1).min((b_due - b_start).num_days() + 1);
    if shorter <= 0 {
        return 0.0;
    }
    overlap_days as f64 / shorter as f64
}

/// Capacity check: estimated effort across a user's active tasks vs their
/// recorded capacity. Severity scales with the overload ratio.
fn detect_overload(snapshot: &Snapshot, ctx: &DetectorContext) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for assignment in &snapshot.assignments {
        let mut effort = 0.0;
        let mut task_ids = Vec::new();
        for task_id in &assignment.task_ids {
            let Some(task) = snapshot.task(task_id) else { continue };
            if task.status.is_terminal() {
                continue;
            }
            effort += f64::from(task.complexity) * ctx.config.effort_hours_per_complexity;
            task_ids.push(task.id.clone());
        }

        let capacity = if assignment.capacity_hours > 0.0 {
            assignment.capacity_hours
        } else {
            ctx.config.default_capacity_hours
        };
        if effort <= capacity || task_ids.is_empty() {
            continue;
        }

        let ratio = effort / capacity;
        let severity = if ratio >= 2.0 {
            Severity::Critical
        } else if ratio >= 1.5 {
            Severity::High
        } else {
            Severity::Medium
        };
        let summary = format!(
            "{} is over capacity ({:.0}h estimated vs {:.0}h available)",
            assignment.user_id, effort, capacity
        );
        let detail = format!(
            "Estimated effort across {} active tasks is {:.0}h, {:.0}% of {}'s capacity",
            task_ids.len(),
            effort,
            ratio * 100.0,
            assignment.user_id
        );
        conflicts.push(new_conflict(
            &snapshot.board_id,
            ConflictType::Resource,
            severity,
            task_ids,
            vec![assignment.user_id.clone()],
            summary,
            detail,
        ));
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::*;
    use super::*;
    use crate::config::DetectionConfig;
    use crate::detect::DetectorContext;
    use crate::types::{Priority, TaskStatus};

    fn ctx() -> DetectorContext {
        DetectorContext::new(date(2025, 6, 1), DetectionConfig::default())
    }

    #[test]
    fn test_two_task_overlap_detected() {
        // A: Jan 1-10, B: Jan 5-15 on the same user. Overlap window is 6 of
        // A's 10 days, so the pair escalates past Medium.
        let a = task("ta", "u1", Some(date(2024, 1, 1)), Some(date(2024, 1, 10)));
        let b = task("tb", "u1", Some(date(2024, 1, 5)), Some(date(2024, 1, 15)));
        let snap = snapshot(vec![a, b]);

        let conflicts = run(&snap, &ctx()).expect("pass");
        assert_eq!(conflicts.len(), 1);
        let c = &conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::Resource);
        assert_eq!(c.affected_tasks, vec!["ta", "tb"]);
        assert_eq!(c.affected_users, vec!["u1"]);
        assert!(c.severity >= Severity::Medium);
        assert_eq!(c.severity, Severity::High, "majority overlap raises the pair");
    }

    #[test]
    fn test_disjoint_intervals_no_conflict() {
        let a = task("ta", "u1", Some(date(2024, 1, 1)), Some(date(2024, 1, 5)));
        let b = task("tb", "u1", Some(date(2024, 1, 6)), Some(date(2024, 1, 10)));
        let snap = snapshot(vec![a, b]);
        assert!(run(&snap, &ctx()).expect("pass").is_empty());
    }

    #[test]
    fn test_different_users_no_conflict() {
        let a = task("ta", "u1", Some(date(2024, 1, 1)), Some(date(2024, 1, 10)));
        let b = task("tb", "u2", Some(date(2024, 1, 5)), Some(date(2024, 1, 15)));
        let snap = snapshot(vec![a, b]);
        assert!(run(&snap, &ctx()).expect("pass").is_empty());
    }

    #[test]
    fn test_unscheduled_tasks_skipped() {
        let a = task("ta", "u1", Some(date(2024, 1, 1)), Some(date(2024, 1, 10)));
        let b = task("tb", "u1", None, Some(date(2024, 1, 5)));
        let c = task("tc", "u1", Some(date(2024, 1, 3)), None);
        let snap = snapshot(vec![a, b, c]);
        assert!(run(&snap, &ctx()).expect("pass").is_empty());
    }

    #[test]
    fn test_terminal_tasks_skipped() {
        let a = task("ta", "u1", Some(date(2024, 1, 1)), Some(date(2024, 1, 10)));
        let mut b = task("tb", "u1", Some(date(2024, 1, 5)), Some(date(2024, 1, 15)));
        b.status = TaskStatus::Done;
        let snap = snapshot(vec![a, b]);
        assert!(run(&snap, &ctx()).expect("pass").is_empty());
    }

    #[test]
    fn test_chained_overlaps_form_one_cluster() {
        // A and C never share a day but both overlap B; the chain is one
        // cluster of three, not two pairs.
        let a = task("ta", "u1", Some(date(2024, 1, 1)), Some(date(2024, 1, 10)));
        let b = task("tb", "u1", Some(date(2024, 1, 5)), Some(date(2024, 1, 15)));
        let c = task("tc", "u1", Some(date(2024, 1, 14)), Some(date(2024, 1, 20)));
        let snap = snapshot(vec![a, b, c]);

        let conflicts = run(&snap, &ctx()).expect("pass");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].affected_tasks, vec!["ta", "tb", "tc"]);
        assert_eq!(conflicts[0].severity, Severity::High);
    }

    #[test]
    fn test_severity_monotone_in_cluster_size() {
        let mk = |n: usize| -> Vec<crate::types::Task> {
            (0..n)
                .map(|i| {
                    task(
                        &format!("t{i}"),
                        "u1",
                        Some(date(2024, 1, 1)),
                        Some(date(2024, 1, 20)),
                    )
                })
                .collect()
        };

        let mut last = Severity::Low;
        for n in 2..=5 {
            let conflicts = run(&snapshot(mk(n)), &ctx()).expect("pass");
            assert_eq!(conflicts.len(), 1, "one cluster expected for n={n}");
            assert!(
                conflicts[0].severity >= last,
                "severity must not decrease as the cluster grows (n={n})"
            );
            last = conflicts[0].severity;
        }
        assert_eq!(last, Severity::Critical);
    }

    #[test]
    fn test_high_priority_cluster_forces_critical() {
        let mut tasks = Vec::new();
        for i in 0..3 {
            let mut t = task(
                &format!("t{i}"),
                "u1",
                Some(date(2024, 1, 1)),
                Some(date(2024, 1, 20)),
            );
            t.priority = Priority::High;
            tasks.push(t);
        }
        let conflicts = run(&snapshot(tasks), &ctx()).expect("pass");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::Critical);
    }

    #[test]
    fn test_capacity_overload() {
        // 3 tasks x complexity 4 x 4h = 48h against a 40h capacity
        let mut tasks = Vec::new();
        for i in 0..3 {
            let mut t = task(&format!("t{i}"), "u1", None, None);
            t.complexity = 4;
            tasks.push(t);
        }
        let mut snap = snapshot(tasks);
        snap.assignments.push(assignment("u1", 40.0, &["t0", "t1", "t2"]));

        let conflicts = run(&snap, &ctx()).expect("pass");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::Medium);
        assert!(conflicts[0].summary.contains("over capacity"));
    }

    #[test]
    fn test_capacity_within_limits_no_conflict() {
        let mut t = task("t0", "u1", None, None);
        t.complexity = 5;
        let mut snap = snapshot(vec![t]);
        snap.assignments.push(assignment("u1", 40.0, &["t0"]));
        assert!(run(&snap, &ctx()).expect("pass").is_empty());
    }
}
