//! Schedule pass: overdue tasks, implausible deadlines, deadline convergence.

use crate::types::{Conflict, ConflictType, Severity, Snapshot, Task};

use super::{new_conflict, DetectorContext};

pub(crate) fn run(snapshot: &Snapshot, ctx: &DetectorContext) -> Result<Vec<Conflict>, String> {
    let mut conflicts = Vec::new();
    conflicts.extend(detect_overdue(snapshot, ctx));
    conflicts.extend(detect_implausible_deadlines(snapshot, ctx));
    conflicts.extend(detect_convergence(snapshot, ctx));
    Ok(conflicts)
}

/// One conflict per overdue, non-terminal task. Severity steps with the
/// configured overdue-day thresholds.
fn detect_overdue(snapshot: &Snapshot, ctx: &DetectorContext) -> Vec<Conflict> {
    let cfg = &ctx.config;
    let mut conflicts = Vec::new();
    for task in &snapshot.tasks {
        if task.status.is_terminal() {
            continue;
        }
        let Some(due) = task.due else { continue };
        if due >= ctx.today {
            continue;
        }
        let days_overdue = (ctx.today - due).num_days();
        let severity = if days_overdue >= cfg.overdue_critical_days {
            Severity::Critical
        } else if days_overdue >= cfg.overdue_high_days {
            Severity::High
        } else if days_overdue >= cfg.overdue_medium_days {
            Severity::Medium
        } else {
            Severity::Low
        };
        let summary = format!("'{}' is {days_overdue} days overdue", task.title);
        let detail = format!("Task {} was due {due} and is still {:?}", task.id, task.status);
        conflicts.push(new_conflict(
            &snapshot.board_id,
            ConflictType::Schedule,
            severity,
            vec![task.id.clone()],
            task.assignees.clone(),
            summary,
            detail,
        ));
    }
    conflicts
}

/// Flag tasks whose remaining calendar time cannot plausibly fit the
/// complexity-derived effort. Already-overdue tasks are the overdue check's
/// business, not this one's.
fn detect_implausible_deadlines(snapshot: &Snapshot, ctx: &DetectorContext) -> Vec<Conflict> {
    let cfg = &ctx.config;
    let mut conflicts = Vec::new();
    for task in &snapshot.tasks {
        if task.status.is_terminal() {
            continue;
        }
        let Some(due) = task.due else { continue };
        let remaining = (due - ctx.today).num_days();
        if remaining < 0 {
            continue;
        }
        let required = f64::from(task.complexity) * cfg.days_per_complexity_point;
        if (remaining as f64) >= required {
            continue;
        }

        let shortfall = required / (remaining.max(1) as f64);
        let severity = if shortfall >= 4.0 {
            Severity::Critical
        } else if shortfall >= 2.0 {
            Severity::High
        } else if shortfall >= 1.5 {
            Severity::Medium
        } else {
            Severity::Low
        };
        let summary = format!(
            "'{}' needs ~{required:.0} working days but only {remaining} remain",
            task.title
        );
        let detail = format!(
            "Task {} (complexity {}) is due {due}; the estimate exceeds the remaining window {:.1}x",
            task.id, task.complexity, shortfall
        );
        conflicts.push(new_conflict(
            &snapshot.board_id,
            ConflictType::Schedule,
            severity,
            vec![task.id.clone()],
            task.assignees.clone(),
            summary,
            detail,
        ));
    }
    conflicts
}

/// Deadline convergence: several high-priority tasks landing in the same
/// short window, tied together by a shared assignee or a shared predecessor.
fn detect_convergence(snapshot: &Snapshot, ctx: &DetectorContext) -> Vec<Conflict> {
    let cfg = &ctx.config;
    let mut candidates: Vec<&Task> = snapshot
        .tasks
        .iter()
        .filter(|t| !t.status.is_terminal() && t.priority.is_high() && t.due.is_some())
        .collect();
    candidates.sort_by(|a, b| a.due.cmp(&b.due).then_with(|| a.id.cmp(&b.id)));

    let mut conflicts = Vec::new();
    let mut i = 0;
    while i < candidates.len() {
        let window_start = match candidates[i].due {
            Some(d) => d,
            None => break,
        };
        let group: Vec<&Task> = candidates[i..]
            .iter()
            .take_while(|t| {
                t.due
                    .map(|d| (d - window_start).num_days() <= cfg.convergence_window_days)
                    .unwrap_or(false)
            })
            .copied()
            .collect();

        if group.len() >= cfg.convergence_min_tasks && group_is_linked(snapshot, &group) {
            let severity = match group.len() {
                0..=3 => Severity::Medium,
                4 => Severity::High,
                _ => Severity::Critical,
            };
            let ids: Vec<String> = group.iter().map(|t| t.id.clone()).collect();
            let users: Vec<String> = group.iter().flat_map(|t| t.assignees.clone()).collect();
            let window_end = group.iter().filter_map(|t| t.due).max().unwrap_or(window_start);
            let summary = format!(
                "{} high-priority tasks converge between {window_start} and {window_end}",
                group.len()
            );
            let detail = format!(
                "Tasks {} all land within a {}-day window",
                group.iter().map(|t| t.title.as_str()).collect::<Vec<_>>().join(", "),
                cfg.convergence_window_days
            );
            conflicts.push(new_conflict(
                &snapshot.board_id,
                ConflictType::Schedule,
                severity,
                ids,
                users,
                summary,
                detail,
            ));
            i += group.len();
        } else {
            i += 1;
        }
    }
    conflicts
}

/// Independent deadlines piling up is pressure, not a conflict. The group
/// counts only when some user owns at least two of the tasks or some
/// predecessor blocks at least two of them.
fn group_is_linked(snapshot: &Snapshot, group: &[&Task]) -> bool {
    use std::collections::HashMap;

    let mut per_user: HashMap<&str, usize> = HashMap::new();
    for task in group {
        for user in &task.assignees {
            *per_user.entry(user.as_str()).or_default() += 1;
        }
    }
    if per_user.values().any(|&n| n >= 2) {
        return true;
    }

    let group_ids: Vec<&str> = group.iter().map(|t| t.id.as_str()).collect();
    let mut per_pred: HashMap<&str, usize> = HashMap::new();
    for task in group {
        for dep in &task.depends_on {
            *per_pred.entry(dep.as_str()).or_default() += 1;
        }
    }
    for edge in &snapshot.edges {
        if group_ids.contains(&edge.successor.as_str()) {
            *per_pred.entry(edge.predecessor.as_str()).or_default() += 1;
        }
    }
    per_pred.values().any(|&n| n >= 2)
}
