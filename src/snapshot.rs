//! Snapshot ingestion boundary.
//!
//! The engine never talks to the task store directly; it asks a
//! `SnapshotReader` for a consistent point-in-time view of one board and
//! validates the result before any detection pass sees it.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::types::Snapshot;

/// Read-side boundary to the task store.
#[async_trait]
pub trait SnapshotReader: Send + Sync {
    /// Produce a consistent snapshot of one board.
    ///
    /// Implementations map store-level outages to `EngineError::Transient` so
    /// the orchestrator retries on the next cycle instead of failing the board.
    async fn read_snapshot(&self, board_id: &str) -> Result<Snapshot, EngineError>;
}

/// Structural validation at the ingestion boundary.
///
/// A snapshot that fails here never reaches detection: downstream passes
/// assume unique task ids, resolvable edges, and ordered date pairs.
pub fn validate(snapshot: &Snapshot) -> Result<(), EngineError> {
    if snapshot.board_id.trim().is_empty() {
        return Err(EngineError::DataIntegrity("snapshot has empty board id".to_string()));
    }

    let mut ids: HashSet<&str> = HashSet::with_capacity(snapshot.tasks.len());
    for task in &snapshot.tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(EngineError::DataIntegrity(format!(
                "duplicate task id '{}'",
                task.id
            )));
        }
        if let (Some(start), Some(due)) = (task.start, task.due) {
            if start > due {
                return Err(EngineError::DataIntegrity(format!(
                    "task '{}' starts after its due date ({start} > {due})",
                    task.id
                )));
            }
        }
    }

    for task in &snapshot.tasks {
        for dep in &task.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(EngineError::DataIntegrity(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.id, dep
                )));
            }
        }
    }

    for edge in &snapshot.edges {
        if !ids.contains(edge.predecessor.as_str()) || !ids.contains(edge.successor.as_str()) {
            return Err(EngineError::DataIntegrity(format!(
                "dependency edge {} -> {} references an unknown task",
                edge.predecessor, edge.successor
            )));
        }
    }

    for assignment in &snapshot.assignments {
        for task_id in &assignment.task_ids {
            if !ids.contains(task_id.as_str()) {
                return Err(EngineError::DataIntegrity(format!(
                    "assignment for '{}' references unknown task '{}'",
                    assignment.user_id, task_id
                )));
            }
        }
    }

    Ok(())
}
