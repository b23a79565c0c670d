//! Dependency pass: cycles and at-risk blocked chains.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Duration;

use crate::types::{Conflict, ConflictType, Severity, Snapshot, TaskStatus};

use super::{new_conflict, DetectorContext};

pub(crate) fn run(snapshot: &Snapshot, ctx: &DetectorContext) -> Result<Vec<Conflict>, String> {
    let adj = build_adjacency(snapshot);
    let mut conflicts = detect_cycles(snapshot, &adj);
    conflicts.extend(detect_blocked_chains(snapshot, ctx, &adj));
    Ok(conflicts)
}

/// predecessor -> successors, from both the edge list and per-task
/// `depends_on`. BTree containers keep traversal order deterministic.
fn build_adjacency<'a>(snapshot: &'a Snapshot) -> BTreeMap<&'a str, BTreeSet<&'a str>> {
    let mut adj: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for edge in &snapshot.edges {
        adj.entry(edge.predecessor.as_str()).or_default().insert(edge.successor.as_str());
    }
    for task in &snapshot.tasks {
        for dep in &task.depends_on {
            adj.entry(dep.as_str()).or_default().insert(task.id.as_str());
        }
    }
    adj
}

/// DFS with in-stack marking. Each distinct set of cycle members yields
/// exactly one Critical conflict, however many times the walk re-enters it.
fn detect_cycles(snapshot: &Snapshot, adj: &BTreeMap<&str, BTreeSet<&str>>) -> Vec<Conflict> {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    let mut color: HashMap<&str, u8> = HashMap::new();
    let mut cycles: BTreeSet<Vec<String>> = BTreeSet::new();

    for &start in adj.keys() {
        if color.get(start).copied().unwrap_or(WHITE) != WHITE {
            continue;
        }
        // (node, iterator position) stack; `path` mirrors the gray chain
        let mut stack: Vec<(&str, Vec<&str>, usize)> = Vec::new();
        let mut path: Vec<&str> = Vec::new();

        color.insert(start, GRAY);
        path.push(start);
        let succs: Vec<&str> = adj.get(start).map(|s| s.iter().copied().collect()).unwrap_or_default();
        stack.push((start, succs, 0));

        while let Some((_, succs, idx)) = stack.last_mut() {
            if let Some(&next) = succs.get(*idx) {
                *idx += 1;
                match color.get(next).copied().unwrap_or(WHITE) {
                    WHITE => {
                        color.insert(next, GRAY);
                        path.push(next);
                        let next_succs: Vec<&str> =
                            adj.get(next).map(|s| s.iter().copied().collect()).unwrap_or_default();
                        stack.push((next, next_succs, 0));
                    }
                    GRAY => {
                        // Back edge: the gray suffix of the path is the cycle
                        if let Some(pos) = path.iter().position(|&n| n == next) {
                            let mut members: Vec<String> =
                                path[pos..].iter().map(|s| s.to_string()).collect();
                            members.sort_unstable();
                            cycles.insert(members);
                        }
                    }
                    _ => {}
                }
            } else {
                let (node, _, _) = stack.pop().unwrap_or((start, Vec::new(), 0));
                color.insert(node, BLACK);
                path.pop();
            }
        }
    }

    cycles
        .into_iter()
        .map(|members| {
            let summary = format!("Circular dependency across {} tasks", members.len());
            let detail = format!("Tasks {} depend on each other in a cycle; none can start", members.join(" -> "));
            let users: Vec<String> = members
                .iter()
                .filter_map(|id| snapshot.task(id))
                .flat_map(|t| t.assignees.clone())
                .collect();
            new_conflict(
                &snapshot.board_id,
                ConflictType::Dependency,
                Severity::Critical,
                members,
                users,
                summary,
                detail,
            )
        })
        .collect()
}

/// Blocked successor whose due date can't survive its predecessor's projected
/// completion. Severity scales with how many tasks sit downstream of the
/// blocked one.
fn detect_blocked_chains(
    snapshot: &Snapshot,
    ctx: &DetectorContext,
    adj: &BTreeMap<&str, BTreeSet<&str>>,
) -> Vec<Conflict> {
    let cfg = &ctx.config;
    let mut conflicts = Vec::new();

    for task in &snapshot.tasks {
        if task.status != TaskStatus::Blocked {
            continue;
        }
        let Some(task_due) = task.due else { continue };

        let mut preds: Vec<&str> = task.depends_on.iter().map(String::as_str).collect();
        for edge in &snapshot.edges {
            if edge.successor == task.id {
                preds.push(edge.predecessor.as_str());
            }
        }
        preds.sort_unstable();
        preds.dedup();

        for pred_id in preds {
            let Some(pred) = snapshot.task(pred_id) else { continue };
            if pred.status == TaskStatus::Done {
                continue;
            }
            let Some(pred_due) = pred.due else { continue };

            let lead_days =
                (f64::from(pred.complexity) * cfg.days_per_complexity_point).ceil() as i64;
            let projected = pred_due + Duration::days(lead_days);
            if task_due > projected + Duration::days(cfg.blocked_buffer_days) {
                continue;
            }

            let fanout = downstream_count(adj, &task.id);
            let severity = if fanout >= 5 {
                Severity::Critical
            } else if fanout >= 3 {
                Severity::High
            } else if fanout >= 1 {
                Severity::Medium
            } else {
                Severity::Low
            };
            let summary = format!(
                "'{}' is blocked on '{}' with no room before its due date",
                task.title, pred.title
            );
            let detail = format!(
                "Task {} is due {task_due}, but {} projects to finish around {projected}; \
                 {fanout} downstream tasks inherit the slip",
                task.id, pred.id
            );
            let mut users = task.assignees.clone();
            users.extend(pred.assignees.clone());
            conflicts.push(new_conflict(
                &snapshot.board_id,
                ConflictType::Dependency,
                severity,
                vec![pred.id.clone(), task.id.clone()],
                users,
                summary,
                detail,
            ));
        }
    }
    conflicts
}

/// Tasks transitively reachable downstream of `root` (excluding it).
fn downstream_count(adj: &BTreeMap<&str, BTreeSet<&str>>, root: &str) -> usize {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut queue: Vec<&str> = adj.get(root).map(|s| s.iter().copied().collect()).unwrap_or_default();
    while let Some(node) = queue.pop() {
        if !seen.insert(node) || node == root {
            continue;
        }
        if let Some(succs) = adj.get(node) {
            queue.extend(succs.iter().copied());
        }
    }
    seen.remove(root);
    seen.len()
}
